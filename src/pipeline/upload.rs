//! Upload to the media platform with bounded retry.
//!
//! ## Protocol
//!
//! Every attempt is two calls:
//!
//! 1. `GET {base}/cgi-bin/token?grant_type=client_credential&appid=..&secret=..`
//!    → `{"access_token": "..", "expires_in": 7200}`
//! 2. `POST {base}/cgi-bin/material/add_material?access_token=..&type=image`
//!    with a multipart `media` field → `{"media_id": "..", "url": ".."}`
//!
//! Either call may answer `{"errcode": n, "errmsg": ".."}` instead; the code
//! is classified by [`UploadError::from_platform_code`]. A fresh token is
//! fetched on every attempt, so an expired token heals on the next try.
//!
//! ## Retry Strategy
//!
//! [`upload_with_retry`] makes at most `policy.max_attempts` calls. Fatal
//! errors stop the loop immediately; retryable ones sleep for
//! `policy.backoff.delay(n)` and go again. With the default 500 ms
//! exponential backoff and 3 attempts the worst case waits 500 ms → 1 s.

use crate::config::{ProcessorConfig, RetryPolicy};
use crate::error::{ImgPostError, RetryDisposition, UploadError};
use crate::output::UploadResult;
use crate::pipeline::validate::ImageKind;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Anything that can host an image file and hand back a media id.
#[async_trait]
pub trait MediaUploader: Send + Sync {
    /// Check credentials before any source is touched.
    fn preflight(&self) -> Result<(), ImgPostError> {
        Ok(())
    }

    /// One upload attempt. No retrying here.
    async fn upload(&self, path: &Path, kind: ImageKind) -> Result<UploadResult, UploadError>;
}

/// Uploader for the WeChat-style permanent material API.
#[derive(Clone)]
pub struct PlatformUploader {
    client: reqwest::Client,
    api_base: String,
    app_id: String,
    app_secret: String,
    timeout: Duration,
}

impl std::fmt::Debug for PlatformUploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformUploader")
            .field("api_base", &self.api_base)
            .field("app_id", &self.app_id)
            .field("app_secret", &crate::config::mask(&self.app_secret))
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    errcode: Option<i64>,
    #[serde(default)]
    errmsg: Option<String>,
}

#[derive(Deserialize)]
struct MaterialResponse {
    #[serde(default)]
    media_id: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    errcode: Option<i64>,
    #[serde(default)]
    errmsg: Option<String>,
}

fn platform_error(code: Option<i64>, msg: Option<String>) -> Option<UploadError> {
    match code {
        Some(c) if c != 0 => Some(UploadError::from_platform_code(c, msg.unwrap_or_default())),
        _ => None,
    }
}

impl PlatformUploader {
    pub fn new(
        client: reqwest::Client,
        api_base: impl Into<String>,
        app_id: impl Into<String>,
        app_secret: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            app_id: app_id.into(),
            app_secret: app_secret.into(),
            timeout,
        }
    }

    pub fn from_config(client: reqwest::Client, config: &ProcessorConfig) -> Self {
        Self::new(
            client,
            &config.platform_api_base,
            &config.app_id,
            &config.app_secret,
            Duration::from_secs(config.upload_timeout_secs),
        )
    }

    async fn access_token(&self) -> Result<String, UploadError> {
        let url = format!("{}/cgi-bin/token", self.api_base);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("grant_type", "client_credential"),
                ("appid", self.app_id.as_str()),
                ("secret", self.app_secret.as_str()),
            ])
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TokenResponse = response.json().await.map_err(|e| UploadError::InvalidResponse {
            detail: format!("token response: {e}"),
        })?;
        if let Some(err) = platform_error(parsed.errcode, parsed.errmsg) {
            return Err(err);
        }
        match parsed.access_token {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(UploadError::InvalidResponse {
                detail: "token response has no access_token".into(),
            }),
        }
    }
}

#[async_trait]
impl MediaUploader for PlatformUploader {
    fn preflight(&self) -> Result<(), ImgPostError> {
        if self.app_id.trim().is_empty() || self.app_secret.trim().is_empty() {
            return Err(ImgPostError::InvalidConfig(
                "WECHAT_APPID and WECHAT_SECRET are required for upload".into(),
            ));
        }
        Ok(())
    }

    async fn upload(&self, path: &Path, kind: ImageKind) -> Result<UploadResult, UploadError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| UploadError::Io {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        let token = self.access_token().await?;

        let file_name = format!("image.{}", kind.extension());
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(kind.mime_type())?;
        let form = reqwest::multipart::Form::new().part("media", part);

        let url = format!("{}/cgi-bin/material/add_material", self.api_base);
        debug!("POST {} ({})", url, kind);
        let response = self
            .client
            .post(&url)
            .query(&[("access_token", token.as_str()), ("type", "image")])
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: MaterialResponse =
            response.json().await.map_err(|e| UploadError::InvalidResponse {
                detail: format!("material response: {e}"),
            })?;
        if let Some(err) = platform_error(parsed.errcode, parsed.errmsg) {
            return Err(err);
        }
        match parsed.media_id {
            Some(media_id) if !media_id.is_empty() => Ok(UploadResult {
                media_id,
                hosted_url: parsed.url.unwrap_or_default(),
                width: None,
                height: None,
            }),
            _ => Err(UploadError::InvalidResponse {
                detail: "response has no media_id".into(),
            }),
        }
    }
}

/// Upload `path`, retrying retryable failures up to the policy's budget.
///
/// Returns the result and the number of attempts it took.
pub async fn upload_with_retry(
    uploader: &dyn MediaUploader,
    path: &Path,
    kind: ImageKind,
    policy: &RetryPolicy,
) -> Result<(UploadResult, u32), ImgPostError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match uploader.upload(path, kind).await {
            Ok(result) => {
                info!("Uploaded {} → media_id {} (attempt {})", path.display(), result.media_id, attempt);
                return Ok((result, attempt));
            }
            Err(err) => {
                if (policy.classifier)(&err) == RetryDisposition::Fatal {
                    warn!("Upload of {} rejected: {}", path.display(), err);
                    return Err(ImgPostError::UploadRejected { source: err });
                }
                if attempt >= max_attempts {
                    warn!("Upload of {} failed after {} attempts: {}", path.display(), attempt, err);
                    return Err(ImgPostError::UploadExhausted {
                        attempts: attempt,
                        last: err,
                    });
                }
                let delay = policy.backoff.delay(attempt);
                warn!(
                    "Upload attempt {}/{} failed: {}; retrying in {}ms",
                    attempt,
                    max_attempts,
                    err,
                    delay.as_millis()
                );
                sleep(delay).await;
            }
        }
    }
}
