//! Configuration types for the image pipeline.
//!
//! All processor behaviour is controlled through [`ProcessorConfig`], built
//! via its [`ProcessorConfigBuilder`]. The config is handed to
//! [`crate::ImageProcessor::new`] once and is read-only afterwards; per-run
//! knobs are captured as [`CompressionPolicy`] and [`RetryPolicy`] snapshots
//! so concurrent runs never observe each other's settings.

use crate::error::{ImgPostError, RetryDisposition, UploadError};
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for an [`crate::ImageProcessor`].
///
/// # Example
/// ```rust
/// use imgpost::ProcessorConfig;
///
/// let config = ProcessorConfig::builder()
///     .max_image_width(1280)
///     .max_image_size(2 * 1024 * 1024)
///     .app_credentials("wx123", "secret")
///     .build()
///     .unwrap();
/// assert_eq!(config.compression_policy().max_width_px, 1280);
/// ```
#[derive(Clone)]
pub struct ProcessorConfig {
    /// Re-encode images that exceed the width or size budget. Default: true.
    pub compression_enabled: bool,

    /// Maximum width in pixels accepted by the platform. Range: 100–10000. Default: 1920.
    pub max_image_width: u32,

    /// Maximum upload size in bytes. Minimum 100 KiB. Default: 5 MiB.
    pub max_image_size: u64,

    /// JPEG quality of the first compression attempt. Default: 85.
    pub initial_quality: u8,

    /// Lowest JPEG quality the compressor will try. Default: 40.
    pub min_quality: u8,

    /// Quality decrement between attempts. Default: 10.
    pub quality_step: u8,

    /// Bearer key for the image generation endpoint.
    pub image_api_key: Option<String>,

    /// Base URL of the OpenAI-compatible generation API. Default: `https://api.openai.com/v1`.
    pub image_api_base: String,

    /// Generation model name. Default: `dall-e-3`.
    pub image_model: String,

    /// Generated image size. Default: `1024x1024`.
    pub image_size: String,

    /// Platform application id used to obtain an access token.
    pub app_id: String,

    /// Platform application secret.
    pub app_secret: String,

    /// Base URL of the platform API. Default: `https://api.weixin.qq.com`.
    pub platform_api_base: String,

    /// Total upload attempts per image, including the first. Default: 3.
    pub max_upload_attempts: u32,

    /// Delay shape between upload attempts. Default: exponential, 500 ms base, 8 s cap.
    pub retry_backoff: Backoff,

    /// Download timeout for remote sources in seconds. Default: 30.
    pub download_timeout_secs: u64,

    /// Generation request timeout in seconds. Default: 60.
    pub generation_timeout_secs: u64,

    /// Per-attempt upload timeout in seconds. Default: 30.
    pub upload_timeout_secs: u64,

    /// Directory for downloaded and compressed temp files. `None` uses the system temp dir.
    pub temp_dir: Option<PathBuf>,

    /// Optional batch progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            compression_enabled: true,
            max_image_width: 1920,
            max_image_size: 5 * 1024 * 1024,
            initial_quality: 85,
            min_quality: 40,
            quality_step: 10,
            image_api_key: None,
            image_api_base: "https://api.openai.com/v1".to_string(),
            image_model: "dall-e-3".to_string(),
            image_size: "1024x1024".to_string(),
            app_id: String::new(),
            app_secret: String::new(),
            platform_api_base: "https://api.weixin.qq.com".to_string(),
            max_upload_attempts: 3,
            retry_backoff: Backoff::default(),
            download_timeout_secs: 30,
            generation_timeout_secs: 60,
            upload_timeout_secs: 30,
            temp_dir: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ProcessorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorConfig")
            .field("compression_enabled", &self.compression_enabled)
            .field("max_image_width", &self.max_image_width)
            .field("max_image_size", &self.max_image_size)
            .field("initial_quality", &self.initial_quality)
            .field("min_quality", &self.min_quality)
            .field("quality_step", &self.quality_step)
            .field("image_api_key", &self.image_api_key.as_deref().map(mask))
            .field("image_api_base", &self.image_api_base)
            .field("image_model", &self.image_model)
            .field("image_size", &self.image_size)
            .field("app_id", &self.app_id)
            .field("app_secret", &mask(&self.app_secret))
            .field("platform_api_base", &self.platform_api_base)
            .field("max_upload_attempts", &self.max_upload_attempts)
            .field("retry_backoff", &self.retry_backoff)
            .field("temp_dir", &self.temp_dir)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ProgressCallback>"),
            )
            .finish()
    }
}

/// Hide all but the first and last two characters of a secret.
pub(crate) fn mask(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    if value.len() <= 4 || !value.is_ascii() {
        return "***".to_string();
    }
    format!("{}***{}", &value[..2], &value[value.len() - 2..])
}

impl ProcessorConfig {
    /// Create a new builder for `ProcessorConfig`.
    pub fn builder() -> ProcessorConfigBuilder {
        ProcessorConfigBuilder {
            config: Self::default(),
        }
    }

    /// Snapshot of the compression knobs for one run.
    pub fn compression_policy(&self) -> CompressionPolicy {
        CompressionPolicy {
            max_width_px: self.max_image_width,
            max_size_bytes: self.max_image_size,
            initial_quality: self.initial_quality,
            min_quality: self.min_quality,
            quality_step: self.quality_step,
        }
    }

    /// Snapshot of the retry knobs for one run.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_upload_attempts,
            backoff: self.retry_backoff,
            classifier: UploadError::disposition,
        }
    }

    /// Fail fast when image generation is requested without a key.
    pub fn validate_for_generation(&self) -> Result<(), ImgPostError> {
        match self.image_api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(()),
            _ => Err(ImgPostError::InvalidConfig(
                "IMAGE_API_KEY is required for image generation".into(),
            )),
        }
    }
}

/// Builder for [`ProcessorConfig`].
#[derive(Debug)]
pub struct ProcessorConfigBuilder {
    config: ProcessorConfig,
}

impl ProcessorConfigBuilder {
    pub fn compression_enabled(mut self, v: bool) -> Self {
        self.config.compression_enabled = v;
        self
    }

    pub fn max_image_width(mut self, px: u32) -> Self {
        self.config.max_image_width = px;
        self
    }

    pub fn max_image_size(mut self, bytes: u64) -> Self {
        self.config.max_image_size = bytes;
        self
    }

    pub fn initial_quality(mut self, q: u8) -> Self {
        self.config.initial_quality = q;
        self
    }

    pub fn min_quality(mut self, q: u8) -> Self {
        self.config.min_quality = q;
        self
    }

    pub fn quality_step(mut self, step: u8) -> Self {
        self.config.quality_step = step;
        self
    }

    pub fn image_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.image_api_key = Some(key.into());
        self
    }

    pub fn image_api_base(mut self, base: impl Into<String>) -> Self {
        self.config.image_api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn image_model(mut self, model: impl Into<String>) -> Self {
        self.config.image_model = model.into();
        self
    }

    pub fn image_size(mut self, size: impl Into<String>) -> Self {
        self.config.image_size = size.into();
        self
    }

    pub fn app_credentials(mut self, app_id: impl Into<String>, app_secret: impl Into<String>) -> Self {
        self.config.app_id = app_id.into();
        self.config.app_secret = app_secret.into();
        self
    }

    pub fn platform_api_base(mut self, base: impl Into<String>) -> Self {
        self.config.platform_api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn max_upload_attempts(mut self, n: u32) -> Self {
        self.config.max_upload_attempts = n;
        self
    }

    pub fn retry_backoff(mut self, backoff: Backoff) -> Self {
        self.config.retry_backoff = backoff;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs.max(1);
        self
    }

    pub fn generation_timeout_secs(mut self, secs: u64) -> Self {
        self.config.generation_timeout_secs = secs.max(1);
        self
    }

    pub fn upload_timeout_secs(mut self, secs: u64) -> Self {
        self.config.upload_timeout_secs = secs.max(1);
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = Some(dir.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ProcessorConfig, ImgPostError> {
        let c = &self.config;
        if !(100..=10_000).contains(&c.max_image_width) {
            return Err(ImgPostError::InvalidConfig(format!(
                "max image width must be 100–10000 px, got {}",
                c.max_image_width
            )));
        }
        if c.max_image_size < 100 * 1024 {
            return Err(ImgPostError::InvalidConfig(format!(
                "max image size must be at least 100 KiB, got {} bytes",
                c.max_image_size
            )));
        }
        c.compression_policy().validate()?;
        if c.max_upload_attempts == 0 {
            return Err(ImgPostError::InvalidConfig(
                "max upload attempts must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Per-run policies ─────────────────────────────────────────────────────

/// Size and dimension budget for one run, plus the quality ladder used to meet it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionPolicy {
    pub max_width_px: u32,
    pub max_size_bytes: u64,
    pub initial_quality: u8,
    pub min_quality: u8,
    pub quality_step: u8,
}

impl Default for CompressionPolicy {
    fn default() -> Self {
        ProcessorConfig::default().compression_policy()
    }
}

impl CompressionPolicy {
    /// Check the quality ladder is well-formed and terminates.
    pub fn validate(&self) -> Result<(), ImgPostError> {
        if self.max_width_px == 0 {
            return Err(ImgPostError::InvalidConfig("max width must be ≥ 1 px".into()));
        }
        if self.min_quality == 0 || self.initial_quality > 100 {
            return Err(ImgPostError::InvalidConfig(format!(
                "JPEG quality must be 1–100, got {}..{}",
                self.min_quality, self.initial_quality
            )));
        }
        if self.min_quality > self.initial_quality {
            return Err(ImgPostError::InvalidConfig(format!(
                "min quality {} exceeds initial quality {}",
                self.min_quality, self.initial_quality
            )));
        }
        if self.quality_step == 0 {
            return Err(ImgPostError::InvalidConfig("quality step must be ≥ 1".into()));
        }
        Ok(())
    }

    /// Upper bound on the number of encodes the compressor may perform.
    pub fn max_encodes(&self) -> u32 {
        let span = u32::from(self.initial_quality.saturating_sub(self.min_quality));
        let step = u32::from(self.quality_step.max(1));
        span.div_ceil(step) + 1
    }
}

/// Delay between failed upload attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay after every failure.
    Fixed(Duration),
    /// `base × n` after the n-th failure.
    Linear { base: Duration },
    /// `base × 2^(n-1)` after the n-th failure, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            base: Duration::from_millis(500),
            max: Duration::from_secs(8),
        }
    }
}

impl Backoff {
    /// No delay; used by tests and callers that impose their own pacing.
    pub const NONE: Backoff = Backoff::Fixed(Duration::ZERO);

    /// Delay to wait after `failures` consecutive failed attempts (1-based).
    pub fn delay(&self, failures: u32) -> Duration {
        let n = failures.max(1);
        match *self {
            Backoff::Fixed(d) => d,
            Backoff::Linear { base } => base.saturating_mul(n),
            Backoff::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(n - 1);
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

/// Attempt budget, pacing, and error classification for the upload loop.
#[derive(Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first. Values below 1 are treated as 1.
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub classifier: fn(&UploadError) -> RetryDisposition,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        ProcessorConfig::default().retry_policy()
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            backoff,
            classifier: UploadError::disposition,
        }
    }

    pub fn with_classifier(mut self, classifier: fn(&UploadError) -> RetryDisposition) -> Self {
        self.classifier = classifier;
        self
    }
}
