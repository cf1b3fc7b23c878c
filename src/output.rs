//! Output types returned by [`crate::ImageProcessor`].

use crate::error::Stage;
use crate::pipeline::validate::ImageKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The platform's record of a hosted image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    /// Opaque platform identifier; never empty.
    pub media_id: String,
    /// Public URL the platform serves the image from.
    pub hosted_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// Everything known about one successful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedImage {
    pub upload: UploadResult,
    /// Display form of the source (path, URL, or prompt).
    pub source: String,
    /// Format that was actually uploaded.
    pub format: ImageKind,
    /// Bytes of the acquired file.
    pub original_bytes: u64,
    /// Bytes of the uploaded file.
    pub uploaded_bytes: u64,
    /// Whether compression produced the uploaded bytes.
    pub compressed: bool,
    /// JPEG quality used when `compressed` is true.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
    /// Upload attempts made, including the successful one.
    pub attempts: u32,
    pub duration_ms: u64,
}

impl ProcessedImage {
    pub fn media_id(&self) -> &str {
        &self.upload.media_id
    }
}

/// Header-level facts about a local image, read without uploading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub path: PathBuf,
    pub format: ImageKind,
    pub width: u32,
    pub height: u32,
    pub size_bytes: u64,
    /// Would the current policy re-encode this file?
    pub exceeds_budget: bool,
}

/// Per-item outcome of [`crate::ImageProcessor::process_batch`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum BatchItem {
    Uploaded(ProcessedImage),
    Failed {
        source: String,
        stage: Stage,
        error: String,
    },
}

impl BatchItem {
    pub fn is_success(&self) -> bool {
        matches!(self, BatchItem::Uploaded(_))
    }
}
