//! Error types for the imgpost library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`ImgPostError`]: **Fatal**: the run cannot produce a hosted asset
//!   (source missing, download failed, unsupported format, upload gave up).
//!   Returned as `Err(ImgPostError)` from every `ImageProcessor` entry point.
//!
//! * [`CompressionError`]: **Recoverable**: the compressor could not shrink
//!   the image. The orchestrator logs it and uploads the original bytes.
//!
//! * [`UploadError`]: **Per attempt**: one upload call failed. The retry
//!   loop classifies it as retryable or fatal via [`UploadError::disposition`]
//!   and only the last one surfaces, wrapped in [`ImgPostError`].

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The pipeline step a run was in when it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Acquire,
    Validate,
    Compress,
    Upload,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Acquire => "acquire",
            Stage::Validate => "validate",
            Stage::Compress => "compress",
            Stage::Upload => "upload",
        };
        f.write_str(name)
    }
}

/// All fatal errors returned by the imgpost library.
#[derive(Debug, Error)]
pub enum ImgPostError {
    // ── Acquisition errors ────────────────────────────────────────────────
    /// Local source does not exist.
    #[error("Image file not found: '{path}'")]
    NotFound { path: PathBuf },

    /// Local source exists but is a directory or special file.
    #[error("Not a regular file: '{path}'")]
    NotAFile { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// Remote fetch failed (non-2xx, transport error, short write).
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Remote fetch exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The generation provider returned an error status or no usable result.
    #[error("Image generation failed: {reason}")]
    GenerationFailed { reason: String },

    // ── Validation errors ─────────────────────────────────────────────────
    /// The acquired bytes are not in the supported raster allow-list.
    #[error("Unsupported image format: '{path}' ({detail})")]
    UnsupportedFormat { path: PathBuf, detail: String },

    // ── Upload errors ─────────────────────────────────────────────────────
    /// The platform rejected the upload with a non-retryable error.
    #[error("Upload rejected: {source}")]
    UploadRejected {
        #[source]
        source: UploadError,
    },

    /// Every attempt failed with a retryable error.
    #[error("Upload failed after {attempts} attempts: {last}")]
    UploadExhausted {
        attempts: u32,
        #[source]
        last: UploadError,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed or a required credential is missing.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (temp file creation, task join failure).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ImgPostError {
    /// The pipeline step that produced this error.
    ///
    /// `InvalidConfig` is reported against [`Stage::Acquire`] because
    /// credential checks run before any source is touched.
    pub fn stage(&self) -> Stage {
        match self {
            ImgPostError::NotFound { .. }
            | ImgPostError::NotAFile { .. }
            | ImgPostError::PermissionDenied { .. }
            | ImgPostError::DownloadFailed { .. }
            | ImgPostError::DownloadTimeout { .. }
            | ImgPostError::GenerationFailed { .. }
            | ImgPostError::InvalidConfig(_)
            | ImgPostError::Internal(_) => Stage::Acquire,
            ImgPostError::UnsupportedFormat { .. } => Stage::Validate,
            ImgPostError::UploadRejected { .. } | ImgPostError::UploadExhausted { .. } => {
                Stage::Upload
            }
        }
    }
}

/// Why the compressor could not produce a smaller image.
///
/// Never fatal to a run: the orchestrator falls back to the original file.
#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("failed to decode '{path}': {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to encode JPEG at quality {quality}: {source}")]
    Encode {
        quality: u8,
        #[source]
        source: image::ImageError,
    },

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The format cannot be re-encoded without losing content (animated GIF).
    #[error("'{path}' cannot be compressed: {reason}")]
    Unsupported { path: PathBuf, reason: String },

    #[error("compression task failed: {0}")]
    Task(String),
}

/// Whether a failed upload attempt is worth repeating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    Fatal,
}

/// A single failed upload attempt.
#[derive(Debug, Clone, Error)]
pub enum UploadError {
    /// Connection refused, DNS failure, request timeout, body read error.
    #[error("transport error: {detail}")]
    Transport { detail: String },

    /// Non-2xx HTTP status from the platform.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The access token was rejected as expired or invalid.
    #[error("access token expired (errcode {code}): {message}")]
    TokenExpired { code: i64, message: String },

    /// Platform reported it is temporarily busy.
    #[error("platform busy (errcode {code}): {message}")]
    Busy { code: i64, message: String },

    /// The file was refused as malformed, wrong type or wrong size.
    #[error("invalid media (errcode {code}): {message}")]
    InvalidMedia { code: i64, message: String },

    /// The account's API or storage quota is exhausted.
    #[error("quota exceeded (errcode {code}): {message}")]
    QuotaExceeded { code: i64, message: String },

    /// Any other platform error code.
    #[error("platform error (errcode {code}): {message}")]
    Rejected { code: i64, message: String },

    /// A 2xx response that did not carry a usable media id.
    #[error("malformed platform response: {detail}")]
    InvalidResponse { detail: String },

    /// The file to upload could not be read.
    #[error("cannot read '{path}': {detail}")]
    Io { path: PathBuf, detail: String },
}

impl UploadError {
    /// Default classification used by [`crate::config::RetryPolicy`].
    ///
    /// Retryable: transport failures, 5xx, 429, busy, token expiry.
    /// Fatal: everything that would fail the same way again.
    pub fn disposition(&self) -> RetryDisposition {
        match self {
            UploadError::Transport { .. }
            | UploadError::TokenExpired { .. }
            | UploadError::Busy { .. } => RetryDisposition::Retryable,
            UploadError::Http { status, .. } if *status == 429 || (500..=599).contains(status) => {
                RetryDisposition::Retryable
            }
            UploadError::Http { .. }
            | UploadError::InvalidMedia { .. }
            | UploadError::QuotaExceeded { .. }
            | UploadError::Rejected { .. }
            | UploadError::InvalidResponse { .. }
            | UploadError::Io { .. } => RetryDisposition::Fatal,
        }
    }

    /// Map a platform `errcode`/`errmsg` pair to a classified error.
    pub fn from_platform_code(code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            -1 => UploadError::Busy { code, message },
            40001 | 40014 | 42001 => UploadError::TokenExpired { code, message },
            40004 | 40005 | 40006 | 40009 => UploadError::InvalidMedia { code, message },
            45009 => UploadError::QuotaExceeded { code, message },
            _ => UploadError::Rejected { code, message },
        }
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(e: reqwest::Error) -> Self {
        UploadError::Transport {
            detail: e.to_string(),
        }
    }
}
