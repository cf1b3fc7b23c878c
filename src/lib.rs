//! # imgpost
//!
//! Acquire, compress, and upload images to a content platform's media
//! library.
//!
//! ## Why this crate?
//!
//! Publishing platforms cap the width and byte size of uploaded images and
//! answer transient failures with cryptic error codes. This crate takes an
//! image reference (a local file, a URL, or a text prompt for an image
//! generation API), brings it inside the platform's budget, and uploads it
//! with bounded retry, leaving no temp files behind whatever happens.
//!
//! ## Pipeline Overview
//!
//! ```text
//! path / URL / prompt
//!  │
//!  ├─ 1. Acquire   use local file, or download / generate into a temp file
//!  ├─ 2. Validate  JPEG / PNG / GIF / WebP / BMP allow-list (magic bytes)
//!  ├─ 3. Compress  resize to max width, walk JPEG quality ladder (spawn_blocking)
//!  ├─ 4. Upload    token + multipart upload, retry transient errors
//!  └─ 5. Output    media id, hosted URL, sizes, attempt count
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use imgpost::{ImageProcessor, ImageSource, ProcessorConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ProcessorConfig::builder()
//!         .app_credentials("wx123", "app-secret")
//!         .max_image_width(1280)
//!         .build()?;
//!     let processor = ImageProcessor::new(config)?;
//!
//!     let image = processor
//!         .process(&ImageSource::parse("https://example.com/cover.png"))
//!         .await?;
//!     println!("{} ({} bytes)", image.media_id(), image.uploaded_bytes);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `imgpost` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! imgpost = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod processor;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{Backoff, CompressionPolicy, ProcessorConfig, ProcessorConfigBuilder, RetryPolicy};
pub use error::{CompressionError, ImgPostError, RetryDisposition, Stage, UploadError};
pub use output::{BatchItem, ImageInfo, ProcessedImage, UploadResult};
pub use pipeline::acquire::{ImageAsset, ImageSource};
pub use pipeline::compress::Compressed;
pub use pipeline::generate::GenerationOptions;
pub use pipeline::upload::{upload_with_retry, MediaUploader, PlatformUploader};
pub use pipeline::validate::{is_supported_format, ImageKind, SourceTrust};
pub use processor::ImageProcessor;
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
