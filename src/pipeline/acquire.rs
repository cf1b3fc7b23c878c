//! Acquisition: normalise a local path, URL, or generation prompt to a local file.
//!
//! ## Ownership of temp files
//!
//! A local source is used in place and never deleted. Remote and generated
//! sources are streamed into a temp file that the returned [`ImageAsset`]
//! owns through a [`TempPath`]; the file disappears when the asset is
//! dropped, whether the run succeeded, failed, panicked, or its future was
//! cancelled.

use crate::error::ImgPostError;
use crate::pipeline::compress;
use crate::pipeline::generate::{self, GenerationEndpoint, GenerationOptions};
use crate::pipeline::new_temp_file;
use crate::pipeline::validate::{ImageKind, SourceTrust};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Where an image comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ImageSource {
    Local(PathBuf),
    Remote(String),
    Generated {
        prompt: String,
        options: GenerationOptions,
    },
}

impl ImageSource {
    /// `http://` / `https://` strings are remote; everything else is a path.
    pub fn parse(input: &str) -> Self {
        if is_url(input) {
            ImageSource::Remote(input.to_string())
        } else {
            ImageSource::Local(PathBuf::from(input))
        }
    }

    pub fn generated(prompt: impl Into<String>, options: GenerationOptions) -> Self {
        ImageSource::Generated {
            prompt: prompt.into(),
            options,
        }
    }

    pub fn trust(&self) -> SourceTrust {
        match self {
            ImageSource::Local(_) => SourceTrust::Trusted,
            ImageSource::Remote(_) | ImageSource::Generated { .. } => SourceTrust::Untrusted,
        }
    }
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::Local(p) => write!(f, "{}", p.display()),
            ImageSource::Remote(u) => f.write_str(u),
            ImageSource::Generated { prompt, .. } => write!(f, "prompt:{prompt:?}"),
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// An acquired image, readable at [`ImageAsset::path`].
#[derive(Debug)]
pub struct ImageAsset {
    path: PathBuf,
    size_bytes: u64,
    kind: Option<ImageKind>,
    dimensions: Option<(u32, u32)>,
    origin_url: Option<String>,
    temp: Option<TempPath>,
}

impl ImageAsset {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Declared format, set once validated.
    pub fn kind(&self) -> Option<ImageKind> {
        self.kind
    }

    /// Pixel dimensions, set once probed.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.dimensions
    }

    /// The URL the bytes were downloaded from, if any.
    pub fn origin_url(&self) -> Option<&str> {
        self.origin_url.as_deref()
    }

    /// Whether this asset deletes its file on drop.
    pub fn owns_temp_file(&self) -> bool {
        self.temp.is_some()
    }

    pub fn set_kind(&mut self, kind: ImageKind) {
        self.kind = Some(kind);
    }

    /// Read the pixel dimensions from the header without decoding.
    pub fn probe(&mut self) -> Option<(u32, u32)> {
        if self.dimensions.is_none() {
            self.dimensions = compress::probe_dimensions(&self.path, self.kind).ok();
        }
        self.dimensions
    }
}

/// Use a caller-owned file in place.
pub fn from_local(path: &Path) -> Result<ImageAsset, ImgPostError> {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(ImgPostError::PermissionDenied {
                path: path.to_path_buf(),
            })
        }
        Err(_) => {
            return Err(ImgPostError::NotFound {
                path: path.to_path_buf(),
            })
        }
    };
    if !metadata.is_file() {
        return Err(ImgPostError::NotAFile {
            path: path.to_path_buf(),
        });
    }

    // Check read permission by attempting to open
    if let Err(e) = std::fs::File::open(path) {
        return Err(if e.kind() == std::io::ErrorKind::PermissionDenied {
            ImgPostError::PermissionDenied {
                path: path.to_path_buf(),
            }
        } else {
            ImgPostError::NotFound {
                path: path.to_path_buf(),
            }
        });
    }

    debug!("Resolved local image: {} ({} bytes)", path.display(), metadata.len());
    Ok(ImageAsset {
        path: path.to_path_buf(),
        size_bytes: metadata.len(),
        kind: None,
        dimensions: None,
        origin_url: None,
        temp: None,
    })
}

/// Stream `url` into a new temp file under `temp_dir`.
pub async fn from_remote(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
    temp_dir: Option<&Path>,
) -> Result<ImageAsset, ImgPostError> {
    info!("Downloading image from: {}", url);

    let failed = |reason: String| ImgPostError::DownloadFailed {
        url: url.to_string(),
        reason,
    };
    let classify = |e: reqwest::Error| {
        if e.is_timeout() {
            ImgPostError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout.as_secs(),
            }
        } else {
            failed(e.to_string())
        }
    };

    let mut response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(classify)?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let suffix = url_suffix(url);
    let tmp = new_temp_file(temp_dir, &suffix)
        .map_err(|e| ImgPostError::Internal(format!("Failed to create temp file: {e}")))?;
    // From here on `temp` deletes the file on every early return.
    let (file, temp) = tmp.into_parts();
    let mut file = tokio::fs::File::from_std(file);

    let mut written: u64 = 0;
    while let Some(chunk) = response.chunk().await.map_err(classify)? {
        file.write_all(&chunk)
            .await
            .map_err(|e| ImgPostError::Internal(format!("Failed to write temp file: {e}")))?;
        written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| ImgPostError::Internal(format!("Failed to write temp file: {e}")))?;
    drop(file);

    if written == 0 {
        return Err(failed("empty response body".into()));
    }

    info!("Downloaded {} bytes to: {}", written, temp.display());
    Ok(ImageAsset {
        path: temp.to_path_buf(),
        size_bytes: written,
        kind: None,
        dimensions: None,
        origin_url: Some(url.to_string()),
        temp: Some(temp),
    })
}

/// Generate an image from `prompt`, then download it.
pub async fn from_generated(
    client: &reqwest::Client,
    endpoint: &GenerationEndpoint,
    prompt: &str,
    options: &GenerationOptions,
    download_timeout: Duration,
    temp_dir: Option<&Path>,
) -> Result<ImageAsset, ImgPostError> {
    let url = generate::request_image(client, endpoint, prompt, options).await?;
    from_remote(client, &url, download_timeout, temp_dir).await
}

/// Temp-file suffix from the URL path when it names a known image type.
fn url_suffix(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if let Some(kind) = Path::new(last)
                    .extension()
                    .and_then(|e| e.to_str())
                    .and_then(ImageKind::from_extension)
                {
                    return format!(".{}", kind.extension());
                }
            }
        }
    }
    ".img".to_string()
}
