//! Pipeline orchestration: one image reference in, one hosted asset out.
//!
//! Every run goes `acquire → validate → compress → upload`. Temp files are
//! owned by the [`ImageAsset`] and [`Compressed`] values living in the run's
//! scope, so they are removed on every exit path: success, error, panic, or
//! the caller dropping the future.
//!
//! [`ImageProcessor`] holds only immutable state behind `Arc` and is cheap to
//! clone. Per-run settings are snapshots, so concurrent runs never race.

use crate::config::{CompressionPolicy, ProcessorConfig, RetryPolicy};
use crate::error::{CompressionError, ImgPostError};
use crate::output::{BatchItem, ImageInfo, ProcessedImage};
use crate::pipeline::acquire::{self, ImageAsset, ImageSource};
use crate::pipeline::compress::{self, Compressed};
use crate::pipeline::generate::{GenerationEndpoint, GenerationOptions};
use crate::pipeline::upload::{self, MediaUploader, PlatformUploader};
use crate::pipeline::validate::{self, SourceTrust};
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Drives images through the pipeline and uploads them.
///
/// # Example
/// ```rust,no_run
/// use imgpost::{ImageProcessor, ProcessorConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ProcessorConfig::builder()
///     .app_credentials("wx123", "secret")
///     .build()?;
/// let processor = ImageProcessor::new(config)?;
/// let image = processor.upload_local("photo.jpg").await?;
/// println!("{} → {}", image.media_id(), image.upload.hosted_url);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ImageProcessor {
    config: Arc<ProcessorConfig>,
    http: reqwest::Client,
    uploader: Arc<dyn MediaUploader>,
}

impl std::fmt::Debug for ImageProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageProcessor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ImageProcessor {
    /// Processor that uploads to the platform named in `config`.
    pub fn new(config: ProcessorConfig) -> Result<Self, ImgPostError> {
        let http = build_client()?;
        let uploader = Arc::new(PlatformUploader::from_config(http.clone(), &config));
        Ok(Self {
            config: Arc::new(config),
            http,
            uploader,
        })
    }

    /// Processor with a caller-supplied upload backend.
    pub fn with_uploader(
        config: ProcessorConfig,
        uploader: Arc<dyn MediaUploader>,
    ) -> Result<Self, ImgPostError> {
        Ok(Self {
            config: Arc::new(config),
            http: build_client()?,
            uploader,
        })
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Default compression policy snapshot.
    pub fn compression_policy(&self) -> CompressionPolicy {
        self.config.compression_policy()
    }

    /// Default retry policy snapshot.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.config.retry_policy()
    }

    /// Run `source` through the pipeline with the default policy.
    pub async fn process(&self, source: &ImageSource) -> Result<ProcessedImage, ImgPostError> {
        self.process_with(source, self.compression_policy()).await
    }

    /// Run `source` through the pipeline with an explicit compression policy.
    ///
    /// # Errors
    /// - `InvalidConfig`: missing credentials; checked before any I/O
    /// - `NotFound` / `NotAFile` / `PermissionDenied`: bad local path
    /// - `DownloadFailed` / `DownloadTimeout` / `GenerationFailed`: remote acquisition
    /// - `UnsupportedFormat`: bytes are not an allow-listed image
    /// - `UploadRejected` / `UploadExhausted`: the platform did not accept it
    ///
    /// Compression failures are not errors: the original bytes are uploaded.
    pub async fn process_with(
        &self,
        source: &ImageSource,
        policy: CompressionPolicy,
    ) -> Result<ProcessedImage, ImgPostError> {
        let start = Instant::now();
        info!("Processing image: {}", source);

        // ── Step 1: Pre-flight ───────────────────────────────────────────
        self.uploader.preflight()?;
        policy.validate()?;
        let endpoint = match source {
            ImageSource::Generated { .. } => Some(GenerationEndpoint::from_config(&self.config)?),
            _ => None,
        };

        // ── Step 2: Acquire ──────────────────────────────────────────────
        let mut asset = self.acquire(source, endpoint.as_ref()).await?;

        // ── Step 3: Validate ─────────────────────────────────────────────
        let kind = validate::validate(asset.path(), source.trust())?;
        asset.set_kind(kind);

        // ── Step 4: Compress (optional) ──────────────────────────────────
        let compressed = if self.config.compression_enabled {
            match self.compress_blocking(asset.path(), policy).await {
                Ok(c) => Some(c),
                Err(e) => {
                    warn!("Compression skipped for {}: {}; uploading original", source, e);
                    None
                }
            }
        } else {
            debug!("Compression disabled; uploading {} as-is", source);
            None
        };

        let dimensions = match &compressed {
            Some(c) => Some((c.width(), c.height())),
            None => asset.probe(),
        };
        if let Some(c) = compressed.as_ref().filter(|c| !c.within_budget()) {
            warn!(
                "{} is still {} bytes after compression (budget {}); uploading best effort",
                source,
                c.size_bytes(),
                policy.max_size_bytes
            );
        }
        let (upload_path, upload_kind, uploaded_bytes) = match &compressed {
            Some(c) if c.changed() => (c.path(), c.kind().unwrap_or(kind), c.size_bytes()),
            _ => (asset.path(), kind, asset.size_bytes()),
        };

        // ── Step 5: Upload ───────────────────────────────────────────────
        let (mut result, attempts) =
            upload::upload_with_retry(self.uploader.as_ref(), upload_path, upload_kind, &self.retry_policy())
                .await?;
        if let Some((w, h)) = dimensions {
            result.width.get_or_insert(w);
            result.height.get_or_insert(h);
        }

        let changed = compressed.as_ref().is_some_and(Compressed::changed);
        let processed = ProcessedImage {
            source: match (source, asset.origin_url()) {
                (ImageSource::Generated { prompt, .. }, _) => prompt.clone(),
                (_, Some(url)) => url.to_string(),
                _ => source.to_string(),
            },
            format: upload_kind,
            original_bytes: asset.size_bytes(),
            uploaded_bytes,
            compressed: changed,
            quality: compressed.as_ref().and_then(Compressed::quality),
            attempts,
            duration_ms: start.elapsed().as_millis() as u64,
            upload: result,
        };

        info!(
            "Uploaded {} as {} in {}ms ({} → {} bytes, {} attempt(s))",
            source,
            processed.media_id(),
            processed.duration_ms,
            processed.original_bytes,
            processed.uploaded_bytes,
            processed.attempts
        );
        // `compressed` then `asset` drop here, removing any temp files.
        Ok(processed)
    }

    /// Upload a local image file.
    pub async fn upload_local(&self, path: impl AsRef<Path>) -> Result<ProcessedImage, ImgPostError> {
        self.process(&ImageSource::Local(path.as_ref().to_path_buf())).await
    }

    /// Download a remote image and upload it.
    pub async fn download_and_upload(&self, url: &str) -> Result<ProcessedImage, ImgPostError> {
        self.process(&ImageSource::Remote(url.to_string())).await
    }

    /// Generate an image from `prompt` with the configured model and upload it.
    pub async fn generate_and_upload(&self, prompt: &str) -> Result<ProcessedImage, ImgPostError> {
        let options = GenerationOptions::from_config(&self.config);
        self.process(&ImageSource::generated(prompt, options)).await
    }

    /// Process many sources, at most `concurrency` at a time.
    ///
    /// Results come back in input order. One failure never aborts the others.
    pub async fn process_batch(
        &self,
        sources: impl IntoIterator<Item = ImageSource>,
        concurrency: usize,
    ) -> Vec<BatchItem> {
        let sources: Vec<ImageSource> = sources.into_iter().collect();
        let total = sources.len();
        let callback = self.config.progress_callback.clone();

        if let Some(ref cb) = callback {
            cb.on_batch_start(total);
        }

        let items: Vec<BatchItem> = stream::iter(sources.into_iter().enumerate().map(|(index, source)| {
            let callback = callback.clone();
            async move {
                let label = source.to_string();
                if let Some(ref cb) = callback {
                    cb.on_image_start(index, total, &label);
                }
                match self.process(&source).await {
                    Ok(image) => {
                        if let Some(ref cb) = callback {
                            cb.on_image_complete(index, total, image.media_id());
                        }
                        BatchItem::Uploaded(image)
                    }
                    Err(e) => {
                        warn!("Image {}/{} ({}) failed: {}", index + 1, total, label, e);
                        if let Some(ref cb) = callback {
                            cb.on_image_error(index, total, &e.to_string());
                        }
                        BatchItem::Failed {
                            source: label,
                            stage: e.stage(),
                            error: e.to_string(),
                        }
                    }
                }
            }
        }))
        .buffered(concurrency.max(1))
        .collect()
        .await;

        let success = items.iter().filter(|i| i.is_success()).count();
        info!("Batch complete: {}/{} uploaded", success, total);
        if let Some(ref cb) = callback {
            cb.on_batch_complete(total, success);
        }
        items
    }

    /// Compress a local file without uploading it.
    ///
    /// The result owns its replacement file; call [`Compressed::persist`] to
    /// keep it.
    pub async fn compress_image(
        &self,
        path: impl AsRef<Path>,
        policy: Option<CompressionPolicy>,
    ) -> Result<Compressed, CompressionError> {
        let policy = policy.unwrap_or_else(|| self.compression_policy());
        self.compress_blocking(path.as_ref(), policy).await
    }

    /// Read format, dimensions and size of a local image without uploading.
    pub async fn image_info(&self, path: impl AsRef<Path>) -> Result<ImageInfo, ImgPostError> {
        let path = path.as_ref();
        let mut asset = acquire::from_local(path)?;
        let kind = validate::validate(asset.path(), SourceTrust::Trusted)?;
        let (width, height) = asset.probe().ok_or_else(|| ImgPostError::UnsupportedFormat {
            path: path.to_path_buf(),
            detail: format!("cannot read {kind} dimensions"),
        })?;
        let policy = self.compression_policy();
        Ok(ImageInfo {
            path: path.to_path_buf(),
            format: kind,
            width,
            height,
            size_bytes: asset.size_bytes(),
            exceeds_budget: width > policy.max_width_px || asset.size_bytes() > policy.max_size_bytes,
        })
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    async fn acquire(
        &self,
        source: &ImageSource,
        endpoint: Option<&GenerationEndpoint>,
    ) -> Result<ImageAsset, ImgPostError> {
        let temp_dir = self.config.temp_dir.as_deref();
        let download_timeout = Duration::from_secs(self.config.download_timeout_secs);
        match (source, endpoint) {
            (ImageSource::Local(path), _) => acquire::from_local(path),
            (ImageSource::Remote(url), _) => {
                acquire::from_remote(&self.http, url, download_timeout, temp_dir).await
            }
            (ImageSource::Generated { prompt, options }, Some(endpoint)) => {
                acquire::from_generated(&self.http, endpoint, prompt, options, download_timeout, temp_dir)
                    .await
            }
            (ImageSource::Generated { .. }, None) => Err(ImgPostError::Internal(
                "generation endpoint not resolved".into(),
            )),
        }
    }

    /// Run the compressor on the blocking pool.
    ///
    /// If the caller's future is dropped mid-compression the task still
    /// finishes, and its output (with its temp file) is dropped unseen.
    async fn compress_blocking(
        &self,
        path: &Path,
        policy: CompressionPolicy,
    ) -> Result<Compressed, CompressionError> {
        let path = path.to_path_buf();
        let temp_dir = self.config.temp_dir.clone();
        tokio::task::spawn_blocking(move || compress::compress(&path, &policy, temp_dir.as_deref()))
            .await
            .map_err(|e| CompressionError::Task(e.to_string()))?
    }
}

fn build_client() -> Result<reqwest::Client, ImgPostError> {
    reqwest::Client::builder()
        .user_agent(concat!("imgpost/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ImgPostError::Internal(format!("Failed to build HTTP client: {e}")))
}
