//! Compression: bring an image inside the platform's width and size budget.
//!
//! The compressor is a no-op for images already inside the budget, so running
//! it twice never degrades an image twice. Otherwise it downsizes to the width
//! cap and walks a JPEG quality ladder from `initial_quality` down to
//! `min_quality` until the encoded size fits. When even the floor does not
//! fit, the smallest encode is returned with `within_budget() == false` and
//! the caller decides whether to upload it.
//!
//! Decoding and encoding are CPU-bound; async callers run [`compress`] on the
//! blocking pool.

use crate::config::CompressionPolicy;
use crate::error::CompressionError;
use crate::pipeline::{new_temp_file, validate::ImageKind};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::{debug, info};

/// Result of a compression pass.
///
/// When `changed()` is true the replacement lives in a temp file owned by
/// this value and deleted when it is dropped.
#[derive(Debug)]
pub struct Compressed {
    path: PathBuf,
    changed: bool,
    width: u32,
    height: u32,
    size_bytes: u64,
    quality: Option<u8>,
    within_budget: bool,
    temp: Option<TempPath>,
}

impl Compressed {
    /// File to upload: the replacement if one was produced, else the input.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn changed(&self) -> bool {
        self.changed
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// JPEG quality of the replacement; `None` when unchanged.
    pub fn quality(&self) -> Option<u8> {
        self.quality
    }

    /// Whether the output satisfies the size budget.
    pub fn within_budget(&self) -> bool {
        self.within_budget
    }

    /// Format of the replacement; `None` when unchanged.
    pub fn kind(&self) -> Option<ImageKind> {
        self.changed.then_some(ImageKind::Jpeg)
    }

    /// Keep the result at `dest`.
    ///
    /// A replacement is moved out of the temp location (copied if the rename
    /// crosses filesystems); an unchanged result copies the original.
    pub fn persist(self, dest: &Path) -> Result<PathBuf, CompressionError> {
        let io_err = |source| CompressionError::Io {
            path: dest.to_path_buf(),
            source,
        };
        match self.temp {
            Some(temp) => match temp.persist(dest) {
                Ok(()) => Ok(dest.to_path_buf()),
                Err(e) => {
                    // Rename failed (e.g. cross-device); the temp is still ours.
                    std::fs::copy(&e.path, dest).map_err(io_err)?;
                    Ok(dest.to_path_buf())
                }
            },
            None => {
                std::fs::copy(&self.path, dest).map_err(io_err)?;
                Ok(dest.to_path_buf())
            }
        }
    }

    fn unchanged(path: &Path, width: u32, height: u32, size_bytes: u64, within_budget: bool) -> Self {
        Self {
            path: path.to_path_buf(),
            changed: false,
            width,
            height,
            size_bytes,
            quality: None,
            within_budget,
            temp: None,
        }
    }
}

/// Compress `path` to fit `policy`, writing any replacement under `temp_dir`.
pub fn compress(
    path: &Path,
    policy: &CompressionPolicy,
    temp_dir: Option<&Path>,
) -> Result<Compressed, CompressionError> {
    let io_err = |source| CompressionError::Io {
        path: path.to_path_buf(),
        source,
    };

    // ── Probe ────────────────────────────────────────────────────────────
    let original_size = std::fs::metadata(path).map_err(io_err)?.len();
    let (width, height) = probe_dimensions(path, None).map_err(|source| CompressionError::Decode {
        path: path.to_path_buf(),
        source,
    })?;

    if width <= policy.max_width_px && original_size <= policy.max_size_bytes {
        debug!(
            "{} already within budget ({}px, {} bytes)",
            path.display(),
            width,
            original_size
        );
        return Ok(Compressed::unchanged(path, width, height, original_size, true));
    }

    // ── Decode ───────────────────────────────────────────────────────────
    let reader = ImageReader::open(path)
        .map_err(io_err)?
        .with_guessed_format()
        .map_err(io_err)?;
    if reader.format() == Some(ImageFormat::Gif) {
        return Err(CompressionError::Unsupported {
            path: path.to_path_buf(),
            reason: "GIF may be animated; re-encoding would drop frames".into(),
        });
    }
    let mut img = reader.decode().map_err(|source| CompressionError::Decode {
        path: path.to_path_buf(),
        source,
    })?;

    // ── Resize ───────────────────────────────────────────────────────────
    let resized = width > policy.max_width_px;
    if resized {
        let (w, h) = scaled_dimensions(width, height, policy.max_width_px);
        debug!("Resizing {}x{} → {}x{}", width, height, w, h);
        img = img.resize_exact(w, h, FilterType::Lanczos3);
    }
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());

    // ── Quality ladder ───────────────────────────────────────────────────
    let floor = policy.min_quality.clamp(1, 100);
    let step = policy.quality_step.max(1);
    let mut quality = policy.initial_quality.clamp(floor, 100);
    let max_encodes = policy.max_encodes();
    let mut encodes = 0;
    let (best, best_quality) = loop {
        let bytes = encode_jpeg(&rgb, quality)?;
        encodes += 1;
        debug!("q={} → {} bytes (budget {})", quality, bytes.len(), policy.max_size_bytes);
        if bytes.len() as u64 <= policy.max_size_bytes || quality <= floor || encodes >= max_encodes {
            break (bytes, quality);
        }
        quality = quality.saturating_sub(step).max(floor);
    };

    let best_size = best.len() as u64;
    if !resized && best_size >= original_size {
        debug!(
            "Re-encode of {} is not smaller ({} ≥ {} bytes); keeping original",
            path.display(),
            best_size,
            original_size
        );
        return Ok(Compressed::unchanged(path, width, height, original_size, false));
    }

    // ── Write replacement ────────────────────────────────────────────────
    let mut tmp = new_temp_file(temp_dir, ".jpg").map_err(io_err)?;
    tmp.write_all(&best).map_err(io_err)?;
    tmp.flush().map_err(io_err)?;
    let temp = tmp.into_temp_path();

    let within_budget = best_size <= policy.max_size_bytes;
    info!(
        "Compressed {}: {} → {} bytes, {}x{} → {}x{}, q={}{}",
        path.display(),
        original_size,
        best_size,
        width,
        height,
        rgb.width(),
        rgb.height(),
        best_quality,
        if within_budget { "" } else { " (over budget at quality floor)" }
    );

    Ok(Compressed {
        path: temp.to_path_buf(),
        changed: true,
        width: rgb.width(),
        height: rgb.height(),
        size_bytes: best_size,
        quality: Some(best_quality),
        within_budget,
        temp: Some(temp),
    })
}

/// Read pixel dimensions from the header without decoding.
///
/// The format is sniffed from the file's leading bytes. `hint`, then the
/// file extension, only count when the content is not recognised.
pub fn probe_dimensions(path: &Path, hint: Option<ImageKind>) -> image::ImageResult<(u32, u32)> {
    let mut reader = ImageReader::open(path)?;
    if let Some(kind) = hint {
        reader.set_format(kind.to_image_format());
    }
    reader.with_guessed_format()?.into_dimensions()
}

/// Scale to `max_width`, preserving aspect ratio. Height is rounded and at least 1.
pub fn scaled_dimensions(width: u32, height: u32, max_width: u32) -> (u32, u32) {
    if width <= max_width || width == 0 {
        return (width, height);
    }
    let h = (f64::from(height) * f64::from(max_width) / f64::from(width)).round();
    (max_width, (h as u32).max(1))
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, CompressionError> {
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    img.write_with_encoder(encoder)
        .map_err(|source| CompressionError::Encode { quality, source })?;
    Ok(buf)
}
