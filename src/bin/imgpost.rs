//! CLI binary for imgpost.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ProcessorConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use imgpost::{
    Backoff, BatchItem, BatchProgressCallback, GenerationOptions, ImageProcessor, ImageSource,
    ProcessorConfig, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per image. Images finish out of
/// order when `--concurrency` > 1.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} images  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Uploading");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&index))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Uploading {total} image(s)…"))
        ));
    }

    fn on_image_start(&self, index: usize, _total: usize, source: &str) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(index, Instant::now());
        }
        self.bar.set_message(truncate(source, 40));
    }

    fn on_image_complete(&self, index: usize, total: usize, media_id: &str) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} Image {:>3}/{:<3}  {}  {}",
            green("✓"),
            index + 1,
            total,
            dim(media_id),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_image_error(&self, index: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(index);
        self.errors.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} Image {:>3}/{:<3}  {}  {}",
            red("✗"),
            index + 1,
            total,
            red(&truncate(error, 80)),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total: usize, success_count: usize) {
        let failed = total.saturating_sub(success_count);
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!(
                "{} {} image(s) uploaded",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} image(s) uploaded  ({} failed)",
                if failed == total { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let head: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{head}\u{2026}")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Upload a local image
  imgpost cover.png

  # Download and upload several URLs, four at a time
  imgpost -c 4 https://example.com/a.jpg https://example.com/b.png

  # Generate an image and upload it
  imgpost --generate "a watercolor fox in the snow"

  # Inspect images without uploading (no credentials needed)
  imgpost --info photo.jpg banner.png

  # Compress only, keep the result locally
  imgpost --compress-to small.jpg huge.png

  # JSON records for scripting
  imgpost --json *.png > uploaded.json

ENVIRONMENT VARIABLES:
  WECHAT_APPID        Platform application id
  WECHAT_SECRET       Platform application secret
  IMAGE_API_KEY       Key for the image generation API (--generate only)
  IMAGE_API_BASE      Generation API base URL
  COMPRESS_IMAGES     true / false
  MAX_IMAGE_WIDTH     Width cap in pixels (100–10000)
  MAX_IMAGE_SIZE      Size cap in bytes (≥ 102400)
  HTTP_TIMEOUT        Download and upload timeout in seconds
  RUST_LOG            Override log filter (e.g. imgpost=debug)
"#;

/// Upload images to a content platform's media library.
#[derive(Parser, Debug)]
#[command(
    name = "imgpost",
    version,
    about = "Acquire, compress and upload images to a content platform",
    long_about = "Take local files, URLs, or generation prompts, bring each image inside the \
platform's width and size budget, and upload it with bounded retry. Prints the media id and \
hosted URL of every uploaded image.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local image paths or HTTP/HTTPS URLs.
    inputs: Vec<String>,

    /// Generate an image from this prompt and upload it (repeatable).
    #[arg(short, long = "generate", value_name = "PROMPT")]
    generate: Vec<String>,

    /// Platform application id.
    #[arg(long, env = "WECHAT_APPID", default_value = "")]
    app_id: String,

    /// Platform application secret.
    #[arg(long, env = "WECHAT_SECRET", default_value = "", hide_env_values = true)]
    app_secret: String,

    /// Platform API base URL.
    #[arg(long, env = "WECHAT_API_BASE", default_value = "https://api.weixin.qq.com")]
    platform_api_base: String,

    /// Image generation API key.
    #[arg(long, env = "IMAGE_API_KEY", hide_env_values = true)]
    image_api_key: Option<String>,

    /// Image generation API base URL.
    #[arg(long, env = "IMAGE_API_BASE", default_value = "https://api.openai.com/v1")]
    image_api_base: String,

    /// Image generation model.
    #[arg(long, env = "IMAGE_MODEL", default_value = "dall-e-3")]
    image_model: String,

    /// Generated image size.
    #[arg(long, env = "IMAGE_SIZE", default_value = "1024x1024")]
    image_size: String,

    /// Compress images that exceed the width or size budget.
    #[arg(long, env = "COMPRESS_IMAGES", default_value_t = true, action = clap::ArgAction::Set)]
    compress: bool,

    /// Maximum width in pixels (100–10000).
    #[arg(long, env = "MAX_IMAGE_WIDTH", default_value_t = 1920,
          value_parser = clap::value_parser!(u32).range(100..=10_000))]
    max_width: u32,

    /// Maximum upload size in bytes.
    #[arg(long, env = "MAX_IMAGE_SIZE", default_value_t = 5 * 1024 * 1024)]
    max_size: u64,

    /// JPEG quality of the first compression attempt (1–100).
    #[arg(long, env = "IMGPOST_QUALITY", default_value_t = 85,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: u8,

    /// Lowest JPEG quality the compressor may use (1–100).
    #[arg(long, env = "IMGPOST_MIN_QUALITY", default_value_t = 40,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    min_quality: u8,

    /// Quality decrement between compression attempts.
    #[arg(long, default_value_t = 10)]
    quality_step: u8,

    /// Total upload attempts per image.
    #[arg(long, env = "IMGPOST_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// Base delay before the first retry, doubled on each further retry.
    #[arg(long, default_value_t = 500)]
    retry_backoff_ms: u64,

    /// Download and per-attempt upload timeout in seconds.
    #[arg(long, env = "HTTP_TIMEOUT", default_value_t = 30)]
    http_timeout: u64,

    /// Image generation timeout in seconds.
    #[arg(long, default_value_t = 60)]
    generation_timeout: u64,

    /// Directory for temp files (default: system temp dir).
    #[arg(long, env = "IMGPOST_TEMP_DIR")]
    temp_dir: Option<PathBuf>,

    /// Number of images processed at once.
    #[arg(short, long, env = "IMGPOST_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Print format, dimensions and size only; no upload.
    #[arg(long, conflicts_with_all = ["generate", "compress_to"])]
    info: bool,

    /// Compress the single input to this path; no upload.
    #[arg(long, value_name = "PATH", conflicts_with = "generate")]
    compress_to: Option<PathBuf>,

    /// Output JSON records instead of text.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "IMGPOST_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let uploading = !cli.info && cli.compress_to.is_none();
    let show_progress = uploading && !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;
    let processor = ImageProcessor::new(config).context("Failed to initialise processor")?;

    // ── Info mode ────────────────────────────────────────────────────────
    if cli.info {
        if cli.inputs.is_empty() {
            anyhow::bail!("--info needs at least one image path");
        }
        let mut infos = Vec::with_capacity(cli.inputs.len());
        for input in &cli.inputs {
            let info = processor
                .image_info(input)
                .await
                .with_context(|| format!("Failed to inspect {input}"))?;
            infos.push(info);
        }
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&infos).context("Failed to serialise info")?
            );
        } else {
            for info in &infos {
                println!("File:        {}", info.path.display());
                println!("Format:      {}", info.format);
                println!("Dimensions:  {}x{}", info.width, info.height);
                println!("Size:        {} bytes", info.size_bytes);
                println!(
                    "Compress:    {}",
                    if info.exceeds_budget { "yes (over budget)" } else { "no" }
                );
            }
        }
        return Ok(());
    }

    // ── Compress-only mode ───────────────────────────────────────────────
    if let Some(ref dest) = cli.compress_to {
        let [input] = cli.inputs.as_slice() else {
            anyhow::bail!("--compress-to needs exactly one input path");
        };
        let policy = processor.compression_policy();
        let compressed = processor
            .compress_image(input, Some(policy))
            .await
            .with_context(|| format!("Failed to compress {input}"))?;
        let (changed, size, w, h, quality) = (
            compressed.changed(),
            compressed.size_bytes(),
            compressed.width(),
            compressed.height(),
            compressed.quality(),
        );
        let within = compressed.within_budget();
        compressed
            .persist(dest)
            .with_context(|| format!("Failed to write {}", dest.display()))?;
        if !cli.quiet {
            eprintln!(
                "{}  {}x{}  {} bytes{}  →  {}",
                if within { green("✔") } else { cyan("⚠") },
                w,
                h,
                size,
                match (changed, quality) {
                    (true, Some(q)) => format!("  q={q}"),
                    _ => "  (unchanged)".to_string(),
                },
                bold(&dest.display().to_string()),
            );
        }
        return Ok(());
    }

    // ── Upload mode ──────────────────────────────────────────────────────
    let options = GenerationOptions::from_config(processor.config());
    let sources: Vec<ImageSource> = cli
        .inputs
        .iter()
        .map(|s| ImageSource::parse(s))
        .chain(
            cli.generate
                .iter()
                .map(|p| ImageSource::generated(p.clone(), options.clone())),
        )
        .collect();
    if sources.is_empty() {
        anyhow::bail!("Nothing to upload: give image paths, URLs, or --generate PROMPT");
    }

    let total = sources.len();
    let items = processor.process_batch(sources, cli.concurrency).await;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&items).context("Failed to serialise results")?
        );
    } else {
        for item in &items {
            match item {
                BatchItem::Uploaded(image) => {
                    println!("{}\t{}\t{}", image.media_id(), image.upload.hosted_url, image.source);
                }
                BatchItem::Failed { source, stage, error } if !show_progress && !cli.quiet => {
                    eprintln!("{} {} [{}]: {}", red("✗"), source, stage, error);
                }
                BatchItem::Failed { .. } => {}
            }
        }
    }

    let failed = items.iter().filter(|i| !i.is_success()).count();
    if failed > 0 {
        anyhow::bail!("{failed} of {total} image(s) failed");
    }
    Ok(())
}

/// Map CLI args to `ProcessorConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ProcessorConfig> {
    let mut builder = ProcessorConfig::builder()
        .compression_enabled(cli.compress)
        .max_image_width(cli.max_width)
        .max_image_size(cli.max_size)
        .initial_quality(cli.quality)
        .min_quality(cli.min_quality)
        .quality_step(cli.quality_step)
        .app_credentials(&cli.app_id, &cli.app_secret)
        .platform_api_base(&cli.platform_api_base)
        .image_api_base(&cli.image_api_base)
        .image_model(&cli.image_model)
        .image_size(&cli.image_size)
        .max_upload_attempts(cli.max_attempts)
        .retry_backoff(Backoff::Exponential {
            base: Duration::from_millis(cli.retry_backoff_ms),
            max: Duration::from_secs(8),
        })
        .download_timeout_secs(cli.http_timeout)
        .upload_timeout_secs(cli.http_timeout)
        .generation_timeout_secs(cli.generation_timeout);

    if let Some(ref key) = cli.image_api_key {
        builder = builder.image_api_key(key);
    }
    if let Some(ref dir) = cli.temp_dir {
        builder = builder.temp_dir(dir);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
