//! Format validation against the raster allow-list.
//!
//! Local files are the caller's own and are classified by extension, falling
//! back to the content header when the extension is missing or unknown.
//! Downloaded and generated files come from arbitrary servers, so their
//! extension is ignored and the magic bytes decide.

use crate::error::ImgPostError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Supported raster formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Jpeg,
    Png,
    Gif,
    WebP,
    Bmp,
}

impl ImageKind {
    /// Classify by file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(ImageKind::Jpeg),
            "png" => Some(ImageKind::Png),
            "gif" => Some(ImageKind::Gif),
            "webp" => Some(ImageKind::WebP),
            "bmp" => Some(ImageKind::Bmp),
            _ => None,
        }
    }

    /// Classify by the first bytes of the file.
    pub fn sniff(header: &[u8]) -> Option<Self> {
        match header {
            [0xFF, 0xD8, 0xFF, ..] => Some(ImageKind::Jpeg),
            [0x89, b'P', b'N', b'G', ..] => Some(ImageKind::Png),
            [b'G', b'I', b'F', b'8', ..] => Some(ImageKind::Gif),
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(ImageKind::WebP),
            [b'B', b'M', ..] => Some(ImageKind::Bmp),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageKind::Jpeg => "jpg",
            ImageKind::Png => "png",
            ImageKind::Gif => "gif",
            ImageKind::WebP => "webp",
            ImageKind::Bmp => "bmp",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Png => "image/png",
            ImageKind::Gif => "image/gif",
            ImageKind::WebP => "image/webp",
            ImageKind::Bmp => "image/bmp",
        }
    }

    pub fn to_image_format(&self) -> image::ImageFormat {
        match self {
            ImageKind::Jpeg => image::ImageFormat::Jpeg,
            ImageKind::Png => image::ImageFormat::Png,
            ImageKind::Gif => image::ImageFormat::Gif,
            ImageKind::WebP => image::ImageFormat::WebP,
            ImageKind::Bmp => image::ImageFormat::Bmp,
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImageKind::Jpeg => "JPEG",
            ImageKind::Png => "PNG",
            ImageKind::Gif => "GIF",
            ImageKind::WebP => "WebP",
            ImageKind::Bmp => "BMP",
        };
        f.write_str(name)
    }
}

/// How much the file name of an asset can be believed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceTrust {
    /// The caller's own file.
    Trusted,
    /// Bytes fetched from a server.
    Untrusted,
}

/// Classify `path` or explain why it is rejected.
pub fn validate(path: &Path, trust: SourceTrust) -> Result<ImageKind, ImgPostError> {
    if trust == SourceTrust::Trusted {
        if let Some(kind) = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(ImageKind::from_extension)
        {
            debug!("{} classified as {} by extension", path.display(), kind);
            return Ok(kind);
        }
    }

    let header = read_header(path)?;
    match ImageKind::sniff(&header) {
        Some(kind) => {
            debug!("{} classified as {} by content", path.display(), kind);
            Ok(kind)
        }
        None => Err(ImgPostError::UnsupportedFormat {
            path: path.to_path_buf(),
            detail: if header.len() < 4 {
                "file too small to be an image".to_string()
            } else {
                format!("unrecognised header {:02X?}", &header[..4])
            },
        }),
    }
}

/// `true` when [`validate`] would accept the file.
pub fn is_supported_format(path: &Path, trust: SourceTrust) -> bool {
    validate(path, trust).is_ok()
}

fn read_header(path: &Path) -> Result<Vec<u8>, ImgPostError> {
    let unreadable = |e: std::io::Error| ImgPostError::UnsupportedFormat {
        path: path.to_path_buf(),
        detail: format!("cannot read header: {e}"),
    };
    let file = std::fs::File::open(path).map_err(unreadable)?;
    let mut header = Vec::with_capacity(12);
    file.take(12).read_to_end(&mut header).map_err(unreadable)?;
    Ok(header)
}
