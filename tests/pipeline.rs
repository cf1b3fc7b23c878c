//! Integration tests for the full acquire → validate → compress → upload run.
//!
//! The platform is replaced by an in-process [`MediaUploader`] that records
//! what it was asked to upload; remote and generated sources are served by
//! `mockito`. Every test points `temp_dir` at its own directory so temp-file
//! cleanup can be checked exactly.

use async_trait::async_trait;
use imgpost::{
    BatchItem, BatchProgressCallback, CompressionPolicy, ImageKind, ImageProcessor, ImageSource,
    ImgPostError, MediaUploader, ProcessorConfig, ProcessorConfigBuilder, Stage, UploadError,
    UploadResult,
};
use mockito::Matcher;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// What the stub saw for one upload call.
#[derive(Debug, Clone)]
struct SeenUpload {
    path: PathBuf,
    kind: ImageKind,
    existed: bool,
    header: Vec<u8>,
    dimensions: Option<(u32, u32)>,
}

/// Records calls and answers from a script; the last entry repeats.
struct RecordingUploader {
    calls: AtomicUsize,
    seen: Mutex<Vec<SeenUpload>>,
    script: Mutex<Vec<Result<UploadResult, UploadError>>>,
}

impl RecordingUploader {
    fn succeeding() -> Arc<Self> {
        Self::scripted(vec![Ok(hosted("media-ok"))])
    }

    fn scripted(script: Vec<Result<UploadResult, UploadError>>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            script: Mutex::new(script),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn seen(&self) -> Vec<SeenUpload> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaUploader for RecordingUploader {
    async fn upload(&self, path: &Path, kind: ImageKind) -> Result<UploadResult, UploadError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let bytes = std::fs::read(path).unwrap_or_default();
        self.seen.lock().unwrap().push(SeenUpload {
            path: path.to_path_buf(),
            kind,
            existed: path.exists(),
            header: bytes.iter().take(4).copied().collect(),
            dimensions: image::ImageReader::open(path)
                .and_then(|r| r.with_guessed_format())
                .ok()
                .and_then(|r| r.into_dimensions().ok()),
        });
        let script = self.script.lock().unwrap();
        let idx = n.min(script.len() - 1);
        match &script[idx] {
            Ok(r) => Ok(UploadResult {
                media_id: format!("{}-{}", r.media_id, n + 1),
                ..r.clone()
            }),
            Err(e) => Err(e.clone()),
        }
    }
}

fn hosted(id: &str) -> UploadResult {
    UploadResult {
        media_id: id.to_string(),
        hosted_url: format!("https://mmbiz.example/{id}"),
        width: None,
        height: None,
    }
}

fn busy() -> Result<UploadResult, UploadError> {
    Err(UploadError::Http {
        status: 503,
        body: "service unavailable".into(),
    })
}

fn base_config(temp: &Path) -> ProcessorConfigBuilder {
    ProcessorConfig::builder()
        .temp_dir(temp)
        .retry_backoff(imgpost::Backoff::NONE)
}

fn processor(config: ProcessorConfig, uploader: &Arc<RecordingUploader>) -> ImageProcessor {
    ImageProcessor::with_uploader(config, uploader.clone() as Arc<dyn MediaUploader>).unwrap()
}

fn entries(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect()
}

/// Smooth gradient with a little texture, saved as PNG.
fn gradient_png(path: &Path, width: u32, height: u32) {
    image::RgbImage::from_fn(width, height, |x, y| {
        let r = (x * 255 / width.max(1)) as u8;
        let g = (y * 255 / height.max(1)) as u8;
        let b = ((x ^ y) & 0x1F) as u8;
        image::Rgb([r, g, b])
    })
    .save(path)
    .unwrap();
}

/// Per-pixel xorshift noise, saved as PNG; JPEG cannot shrink it much.
fn noise_png(path: &Path, width: u32, height: u32) {
    let mut state: u32 = 0x2545_F491;
    image::RgbImage::from_fn(width, height, |_, _| {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        let [r, g, b, _] = state.to_le_bytes();
        image::Rgb([r, g, b])
    })
    .save(path)
    .unwrap();
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("img.png");
    gradient_png(&path, width, height);
    std::fs::read(path).unwrap()
}

const JPEG_MAGIC: [u8; 3] = [0xFF, 0xD8, 0xFF];

// ── Local sources ────────────────────────────────────────────────────────────

#[tokio::test]
async fn local_wide_image_is_resized_compressed_and_uploaded() {
    let src_dir = tempfile::tempdir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let path = src_dir.path().join("wide.png");
    gradient_png(&path, 2400, 1200);

    let uploader = RecordingUploader::succeeding();
    let p = processor(base_config(tmp.path()).build().unwrap(), &uploader);

    let image = p.upload_local(&path).await.unwrap();

    assert!(!image.media_id().is_empty());
    assert!(image.compressed);
    assert_eq!(image.format, ImageKind::Jpeg);
    assert_eq!(image.attempts, 1);
    assert_eq!(image.upload.width, Some(1920));
    assert_eq!(image.upload.height, Some(960));

    let seen = uploader.seen();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].existed, "compressed file must exist while uploading");
    assert_eq!(seen[0].kind, ImageKind::Jpeg);
    assert_eq!(&seen[0].header[..3], &JPEG_MAGIC);
    assert_eq!(seen[0].dimensions, Some((1920, 960)));
    assert!(seen[0].path.starts_with(tmp.path()));

    // Temp copy is gone; the caller's file is untouched.
    assert!(entries(tmp.path()).is_empty(), "left behind: {:?}", entries(tmp.path()));
    assert!(path.exists());
}

#[tokio::test]
async fn image_over_width_and_size_walks_the_quality_ladder() {
    let src_dir = tempfile::tempdir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let path = src_dir.path().join("noisy.png");
    noise_png(&path, 2400, 800);

    let uploader = RecordingUploader::succeeding();
    let p = processor(base_config(tmp.path()).build().unwrap(), &uploader);
    let policy = CompressionPolicy {
        max_width_px: 1920,
        max_size_bytes: 1024 * 1024,
        initial_quality: 85,
        min_quality: 40,
        quality_step: 15,
    };

    let image = p.process_with(&ImageSource::Local(path.clone()), policy).await.unwrap();

    assert!(image.compressed);
    assert_eq!(image.upload.width, Some(1920));
    assert_eq!(image.upload.height, Some(640));
    let q = image.quality.unwrap();
    assert!(q < policy.initial_quality, "ladder should step down, stopped at q={q}");
    assert!(image.uploaded_bytes <= policy.max_size_bytes || q == policy.min_quality);
    assert!(image.uploaded_bytes < image.original_bytes);
    assert_eq!(uploader.seen()[0].dimensions, Some((1920, 640)));
    assert!(entries(tmp.path()).is_empty());
}

#[tokio::test]
async fn over_budget_at_quality_floor_is_uploaded_best_effort() {
    let src_dir = tempfile::tempdir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let path = src_dir.path().join("noisy.png");
    noise_png(&path, 600, 400);

    let uploader = RecordingUploader::succeeding();
    let p = processor(base_config(tmp.path()).build().unwrap(), &uploader);
    let policy = CompressionPolicy {
        max_width_px: 1920,
        max_size_bytes: 5_000,
        initial_quality: 60,
        min_quality: 30,
        quality_step: 15,
    };

    let image = p.process_with(&ImageSource::Local(path.clone()), policy).await.unwrap();

    assert!(image.compressed);
    assert_eq!(image.quality, Some(30));
    assert!(image.uploaded_bytes > policy.max_size_bytes);
    assert_eq!(image.format, ImageKind::Jpeg);
    assert_eq!(uploader.calls(), 1);
    let seen = uploader.seen();
    assert!(seen[0].existed);
    assert_eq!(&seen[0].header[..3], &JPEG_MAGIC);
    assert!(seen[0].path.starts_with(tmp.path()));
    assert!(entries(tmp.path()).is_empty(), "left behind: {:?}", entries(tmp.path()));
}

#[tokio::test]
async fn local_image_within_budget_is_uploaded_as_is() {
    let src_dir = tempfile::tempdir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let path = src_dir.path().join("small.png");
    gradient_png(&path, 320, 200);

    let uploader = RecordingUploader::succeeding();
    let p = processor(base_config(tmp.path()).build().unwrap(), &uploader);

    let image = p.upload_local(&path).await.unwrap();

    assert!(!image.compressed);
    assert_eq!(image.format, ImageKind::Png);
    assert_eq!(image.original_bytes, image.uploaded_bytes);
    assert_eq!(image.quality, None);
    assert_eq!(uploader.seen()[0].path, path);
    assert!(entries(tmp.path()).is_empty());
}

#[tokio::test]
async fn missing_local_file_fails_without_upload_or_temp_files() {
    let tmp = tempfile::tempdir().unwrap();
    let uploader = RecordingUploader::succeeding();
    let p = processor(base_config(tmp.path()).build().unwrap(), &uploader);

    let err = p
        .process(&ImageSource::Local("missing.png".into()))
        .await
        .unwrap_err();

    assert!(matches!(err, ImgPostError::NotFound { .. }), "got {err:?}");
    assert_eq!(err.stage(), Stage::Acquire);
    assert_eq!(uploader.calls(), 0);
    assert!(entries(tmp.path()).is_empty());
}

#[tokio::test]
async fn non_image_local_file_is_rejected_before_upload() {
    let src_dir = tempfile::tempdir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let path = src_dir.path().join("notes.txt");
    std::fs::write(&path, "just some text").unwrap();

    let uploader = RecordingUploader::succeeding();
    let p = processor(base_config(tmp.path()).build().unwrap(), &uploader);

    let err = p.upload_local(&path).await.unwrap_err();
    assert!(matches!(err, ImgPostError::UnsupportedFormat { .. }));
    assert_eq!(err.stage(), Stage::Validate);
    assert_eq!(uploader.calls(), 0);
}

#[tokio::test]
async fn compression_disabled_uploads_original() {
    let src_dir = tempfile::tempdir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let path = src_dir.path().join("wide.png");
    gradient_png(&path, 2400, 100);

    let uploader = RecordingUploader::succeeding();
    let config = base_config(tmp.path()).compression_enabled(false).build().unwrap();
    let p = processor(config, &uploader);

    let image = p.upload_local(&path).await.unwrap();
    assert!(!image.compressed);
    assert_eq!(image.format, ImageKind::Png);
    assert_eq!(uploader.seen()[0].dimensions, Some((2400, 100)));
    assert_eq!(image.upload.width, Some(2400));
}

#[tokio::test]
async fn explicit_policy_overrides_default_for_one_run() {
    let src_dir = tempfile::tempdir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let path = src_dir.path().join("photo.png");
    gradient_png(&path, 1000, 500);

    let uploader = RecordingUploader::succeeding();
    let p = processor(base_config(tmp.path()).build().unwrap(), &uploader);

    let narrow = CompressionPolicy {
        max_width_px: 400,
        ..p.compression_policy()
    };
    let first = p
        .process_with(&ImageSource::Local(path.clone()), narrow)
        .await
        .unwrap();
    assert_eq!(first.upload.width, Some(400));

    // The processor's own default is unaffected.
    let second = p.upload_local(&path).await.unwrap();
    assert!(!second.compressed);
    assert_eq!(second.upload.width, Some(1000));
    assert!(entries(tmp.path()).is_empty());
}

// ── Upload retry ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn transient_upload_failures_are_retried() {
    let src_dir = tempfile::tempdir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let path = src_dir.path().join("wide.png");
    gradient_png(&path, 2400, 300);

    let uploader = RecordingUploader::scripted(vec![busy(), busy(), Ok(hosted("third-time"))]);
    let p = processor(base_config(tmp.path()).build().unwrap(), &uploader);

    let image = p.upload_local(&path).await.unwrap();
    assert_eq!(image.attempts, 3);
    assert_eq!(uploader.calls(), 3);
    // Every attempt saw the same compressed file.
    let seen = uploader.seen();
    assert!(seen.iter().all(|s| s.existed && s.path == seen[0].path));
    assert!(entries(tmp.path()).is_empty());
}

#[tokio::test]
async fn exhausted_retries_fail_and_clean_up() {
    let src_dir = tempfile::tempdir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let path = src_dir.path().join("wide.png");
    gradient_png(&path, 2400, 300);

    let uploader = RecordingUploader::scripted(vec![busy()]);
    let p = processor(base_config(tmp.path()).build().unwrap(), &uploader);

    let err = p.upload_local(&path).await.unwrap_err();
    assert!(matches!(err, ImgPostError::UploadExhausted { attempts: 3, .. }), "got {err:?}");
    assert_eq!(err.stage(), Stage::Upload);
    assert_eq!(uploader.calls(), 3);
    assert!(entries(tmp.path()).is_empty());
}

#[tokio::test]
async fn fatal_upload_error_is_not_retried() {
    let src_dir = tempfile::tempdir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let path = src_dir.path().join("a.png");
    gradient_png(&path, 64, 64);

    let uploader = RecordingUploader::scripted(vec![Err(UploadError::from_platform_code(
        45009,
        "api freq out of limit",
    ))]);
    let p = processor(base_config(tmp.path()).build().unwrap(), &uploader);

    let err = p.upload_local(&path).await.unwrap_err();
    assert!(matches!(err, ImgPostError::UploadRejected { .. }));
    assert_eq!(uploader.calls(), 1);
}

// ── Remote sources ───────────────────────────────────────────────────────────

#[tokio::test]
async fn remote_image_is_downloaded_uploaded_and_removed() {
    let mut server = mockito::Server::new_async().await;
    let _img = server
        .mock("GET", "/images/cover.png")
        .with_status(200)
        .with_header("content-type", "image/png")
        .with_body(png_bytes(200, 100))
        .create_async()
        .await;
    let tmp = tempfile::tempdir().unwrap();

    let uploader = RecordingUploader::succeeding();
    let p = processor(base_config(tmp.path()).build().unwrap(), &uploader);

    let url = format!("{}/images/cover.png", server.url());
    let image = p.download_and_upload(&url).await.unwrap();

    assert_eq!(image.source, url);
    assert_eq!(image.format, ImageKind::Png);
    let seen = uploader.seen();
    assert!(seen[0].existed);
    assert!(seen[0].path.starts_with(tmp.path()), "download goes to temp_dir");
    assert!(entries(tmp.path()).is_empty());
}

#[tokio::test]
async fn remote_image_is_compressed_whatever_its_url_says() {
    let mut server = mockito::Server::new_async().await;
    let body = png_bytes(2400, 200);
    let _blob = server
        .mock("GET", "/blob/123")
        .with_status(200)
        .with_body(body.clone())
        .create_async()
        .await;
    let _misnamed = server
        .mock("GET", "/a.jpg")
        .with_status(200)
        .with_header("content-type", "image/jpeg")
        .with_body(body)
        .create_async()
        .await;
    let tmp = tempfile::tempdir().unwrap();

    let uploader = RecordingUploader::succeeding();
    let p = processor(base_config(tmp.path()).build().unwrap(), &uploader);

    for route in ["/blob/123", "/a.jpg"] {
        let url = format!("{}{route}", server.url());
        let image = p.download_and_upload(&url).await.unwrap();
        assert!(image.compressed, "{route} was uploaded uncompressed");
        assert_eq!(image.format, ImageKind::Jpeg);
        assert_eq!(image.upload.width, Some(1920));
        assert_eq!(image.upload.height, Some(160));
    }
    let seen = uploader.seen();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|s| s.dimensions == Some((1920, 160))));
    assert!(entries(tmp.path()).is_empty());
}

/// Signals when an upload starts, then never finishes.
struct StalledUploader {
    entered: Notify,
}

#[async_trait]
impl MediaUploader for StalledUploader {
    async fn upload(&self, _path: &Path, _kind: ImageKind) -> Result<UploadResult, UploadError> {
        self.entered.notify_one();
        std::future::pending().await
    }
}

#[tokio::test]
async fn dropping_a_run_mid_upload_removes_its_temp_files() {
    let mut server = mockito::Server::new_async().await;
    let _img = server
        .mock("GET", "/wide")
        .with_status(200)
        .with_body(png_bytes(2400, 200))
        .create_async()
        .await;
    let tmp = tempfile::tempdir().unwrap();

    let uploader = Arc::new(StalledUploader {
        entered: Notify::new(),
    });
    let p = ImageProcessor::with_uploader(
        base_config(tmp.path()).build().unwrap(),
        uploader.clone() as Arc<dyn MediaUploader>,
    )
    .unwrap();

    let source = ImageSource::Remote(format!("{}/wide", server.url()));
    let run = tokio::spawn(async move { p.process(&source).await });

    uploader.entered.notified().await;
    // Download and its compressed replacement are both alive mid-upload.
    assert_eq!(entries(tmp.path()).len(), 2, "found: {:?}", entries(tmp.path()));

    run.abort();
    let err = run.await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(entries(tmp.path()).is_empty(), "left behind: {:?}", entries(tmp.path()));
}

#[tokio::test]
async fn remote_html_with_image_extension_is_rejected() {
    let mut server = mockito::Server::new_async().await;
    let _page = server
        .mock("GET", "/fake.png")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body("<html><body>Not found</body></html>")
        .create_async()
        .await;
    let tmp = tempfile::tempdir().unwrap();

    let uploader = RecordingUploader::succeeding();
    let p = processor(base_config(tmp.path()).build().unwrap(), &uploader);

    let err = p
        .download_and_upload(&format!("{}/fake.png", server.url()))
        .await
        .unwrap_err();
    assert!(matches!(err, ImgPostError::UnsupportedFormat { .. }), "got {err:?}");
    assert_eq!(uploader.calls(), 0);
    assert!(entries(tmp.path()).is_empty());
}

#[tokio::test]
async fn remote_404_is_download_error() {
    let mut server = mockito::Server::new_async().await;
    let _gone = server
        .mock("GET", "/gone.jpg")
        .with_status(404)
        .create_async()
        .await;
    let tmp = tempfile::tempdir().unwrap();

    let uploader = RecordingUploader::succeeding();
    let p = processor(base_config(tmp.path()).build().unwrap(), &uploader);

    let err = p
        .download_and_upload(&format!("{}/gone.jpg", server.url()))
        .await
        .unwrap_err();
    assert!(matches!(err, ImgPostError::DownloadFailed { .. }));
    assert_eq!(uploader.calls(), 0);
    assert!(entries(tmp.path()).is_empty());
}

// ── Generated sources ────────────────────────────────────────────────────────

#[tokio::test]
async fn generated_image_is_fetched_and_uploaded() {
    let mut server = mockito::Server::new_async().await;
    let image_url = format!("{}/generated/abc", server.url());
    let gen = server
        .mock("POST", "/v1/images/generations")
        .match_header("authorization", "Bearer sk-test")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "model": "dall-e-3",
            "prompt": "a lighthouse at dusk",
            "n": 1
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(serde_json::json!({ "data": [{ "url": image_url }] }).to_string())
        .create_async()
        .await;
    let _img = server
        .mock("GET", "/generated/abc")
        .with_status(200)
        .with_body(png_bytes(128, 128))
        .create_async()
        .await;
    let tmp = tempfile::tempdir().unwrap();

    let uploader = RecordingUploader::succeeding();
    let config = base_config(tmp.path())
        .image_api_key("sk-test")
        .image_api_base(format!("{}/v1", server.url()))
        .build()
        .unwrap();
    let p = processor(config, &uploader);

    let image = p.generate_and_upload("a lighthouse at dusk").await.unwrap();

    assert_eq!(image.source, "a lighthouse at dusk");
    // No extension in the URL: the content header decides.
    assert_eq!(uploader.seen()[0].kind, ImageKind::Png);
    gen.assert_async().await;
    assert!(entries(tmp.path()).is_empty());
}

#[tokio::test]
async fn generation_without_key_makes_no_network_call() {
    let mut server = mockito::Server::new_async().await;
    let gen = server
        .mock("POST", Matcher::Any)
        .expect(0)
        .create_async()
        .await;
    let tmp = tempfile::tempdir().unwrap();

    let uploader = RecordingUploader::succeeding();
    let config = base_config(tmp.path())
        .image_api_base(server.url())
        .build()
        .unwrap();
    let p = processor(config, &uploader);

    let err = p.generate_and_upload("anything").await.unwrap_err();
    assert!(matches!(err, ImgPostError::InvalidConfig(_)), "got {err:?}");
    assert_eq!(uploader.calls(), 0);
    gen.assert_async().await;
}

#[tokio::test]
async fn generation_with_no_result_fails() {
    let mut server = mockito::Server::new_async().await;
    let _gen = server
        .mock("POST", "/images/generations")
        .with_status(200)
        .with_body(r#"{"data":[]}"#)
        .create_async()
        .await;
    let tmp = tempfile::tempdir().unwrap();

    let uploader = RecordingUploader::succeeding();
    let config = base_config(tmp.path())
        .image_api_key("sk-test")
        .image_api_base(server.url())
        .build()
        .unwrap();
    let p = processor(config, &uploader);

    let err = p.generate_and_upload("anything").await.unwrap_err();
    assert!(matches!(err, ImgPostError::GenerationFailed { .. }));
    assert!(entries(tmp.path()).is_empty());
}

// ── Batches ──────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Events {
    log: Mutex<Vec<String>>,
}

impl BatchProgressCallback for Events {
    fn on_batch_start(&self, total: usize) {
        self.log.lock().unwrap().push(format!("start {total}"));
    }
    fn on_image_complete(&self, index: usize, _total: usize, _media_id: &str) {
        self.log.lock().unwrap().push(format!("ok {index}"));
    }
    fn on_image_error(&self, index: usize, _total: usize, _error: &str) {
        self.log.lock().unwrap().push(format!("err {index}"));
    }
    fn on_batch_complete(&self, total: usize, success_count: usize) {
        self.log
            .lock()
            .unwrap()
            .push(format!("done {success_count}/{total}"));
    }
}

#[tokio::test]
async fn batch_keeps_input_order_and_isolates_failures() {
    let src_dir = tempfile::tempdir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let a = src_dir.path().join("a.png");
    let c = src_dir.path().join("c.png");
    gradient_png(&a, 50, 50);
    gradient_png(&c, 2100, 50);

    let events = Arc::new(Events::default());
    let uploader = RecordingUploader::succeeding();
    let config = base_config(tmp.path())
        .progress_callback(events.clone() as Arc<dyn BatchProgressCallback>)
        .build()
        .unwrap();
    let p = processor(config, &uploader);

    let items = p
        .process_batch(
            vec![
                ImageSource::Local(a.clone()),
                ImageSource::Local(src_dir.path().join("missing.png")),
                ImageSource::Local(c.clone()),
            ],
            3,
        )
        .await;

    assert_eq!(items.len(), 3);
    assert!(items[0].is_success());
    match &items[1] {
        BatchItem::Failed { source, stage, .. } => {
            assert!(source.ends_with("missing.png"));
            assert_eq!(*stage, Stage::Acquire);
        }
        other => panic!("expected failure, got {other:?}"),
    }
    match &items[2] {
        BatchItem::Uploaded(image) => assert!(image.compressed),
        other => panic!("expected upload, got {other:?}"),
    }
    assert_eq!(uploader.calls(), 2);

    let log = events.log.lock().unwrap().clone();
    assert_eq!(log.first().map(String::as_str), Some("start 3"));
    assert_eq!(log.last().map(String::as_str), Some("done 2/3"));
    assert!(log.contains(&"err 1".to_string()));
    assert!(entries(tmp.path()).is_empty());
}

#[tokio::test]
async fn processor_clones_share_nothing_mutable() {
    let src_dir = tempfile::tempdir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let path = src_dir.path().join("wide.png");
    gradient_png(&path, 2000, 200);

    let uploader = RecordingUploader::succeeding();
    let p = processor(base_config(tmp.path()).build().unwrap(), &uploader);

    let runs = (0..4).map(|_| {
        let p = p.clone();
        let path = path.clone();
        tokio::spawn(async move { p.upload_local(path).await })
    });
    for handle in runs.collect::<Vec<_>>() {
        let image = handle.await.unwrap().unwrap();
        assert!(image.compressed);
    }

    // Four distinct temp files were used and all removed.
    let mut paths: Vec<PathBuf> = uploader.seen().into_iter().map(|s| s.path).collect();
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), 4);
    assert!(entries(tmp.path()).is_empty());
}
