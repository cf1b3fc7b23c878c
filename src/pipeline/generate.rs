//! Image generation via an OpenAI-compatible `/images/generations` endpoint.
//!
//! The provider is asked for exactly one image and returns a short-lived URL;
//! the acquirer downloads it like any other remote source.

use crate::config::ProcessorConfig;
use crate::error::ImgPostError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Per-request generation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model name, e.g. `dall-e-3`.
    pub model: String,
    /// Output size, e.g. `1024x1024`.
    pub size: String,
}

impl GenerationOptions {
    /// Options taken from the processor defaults.
    pub fn from_config(config: &ProcessorConfig) -> Self {
        Self {
            model: config.image_model.clone(),
            size: config.image_size.clone(),
        }
    }
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self::from_config(&ProcessorConfig::default())
    }
}

/// Endpoint and credentials for the generation provider.
#[derive(Clone)]
pub struct GenerationEndpoint {
    pub api_base: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for GenerationEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationEndpoint")
            .field("api_base", &self.api_base)
            .field("api_key", &crate::config::mask(&self.api_key))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl GenerationEndpoint {
    /// Build from config, failing before any network call when the key is missing.
    pub fn from_config(config: &ProcessorConfig) -> Result<Self, ImgPostError> {
        config.validate_for_generation()?;
        Ok(Self {
            api_base: config.image_api_base.trim_end_matches('/').to_string(),
            api_key: config.image_api_key.clone().unwrap_or_default(),
            timeout: Duration::from_secs(config.generation_timeout_secs),
        })
    }
}

#[derive(Serialize)]
struct GenerationRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    size: &'a str,
}

#[derive(Deserialize)]
struct GenerationResponse {
    #[serde(default)]
    data: Vec<GeneratedItem>,
}

#[derive(Deserialize)]
struct GeneratedItem {
    #[serde(default)]
    url: Option<String>,
}

/// Ask the provider for one image and return its URL.
pub async fn request_image(
    client: &reqwest::Client,
    endpoint: &GenerationEndpoint,
    prompt: &str,
    options: &GenerationOptions,
) -> Result<String, ImgPostError> {
    if endpoint.api_key.trim().is_empty() {
        return Err(ImgPostError::InvalidConfig(
            "IMAGE_API_KEY is required for image generation".into(),
        ));
    }
    if prompt.trim().is_empty() {
        return Err(ImgPostError::GenerationFailed {
            reason: "prompt is empty".into(),
        });
    }

    let url = format!("{}/images/generations", endpoint.api_base);
    info!("Requesting image generation ({}, {})", options.model, options.size);
    debug!("Generation prompt: {}", prompt);

    let body = GenerationRequest {
        model: &options.model,
        prompt,
        n: 1,
        size: &options.size,
    };

    let response = client
        .post(&url)
        .bearer_auth(&endpoint.api_key)
        .timeout(endpoint.timeout)
        .json(&body)
        .send()
        .await
        .map_err(|e| ImgPostError::GenerationFailed {
            reason: if e.is_timeout() {
                format!("request timed out after {}s", endpoint.timeout.as_secs())
            } else {
                e.to_string()
            },
        })?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(ImgPostError::GenerationFailed {
            reason: format!("API error (HTTP {}): {}", status.as_u16(), truncate(&text, 300)),
        });
    }

    let parsed: GenerationResponse =
        response
            .json()
            .await
            .map_err(|e| ImgPostError::GenerationFailed {
                reason: format!("unreadable response: {e}"),
            })?;

    let mut urls = parsed
        .data
        .into_iter()
        .filter_map(|item| item.url)
        .filter(|u| !u.is_empty());
    let first = urls.next().ok_or_else(|| ImgPostError::GenerationFailed {
        reason: "no image generated".into(),
    })?;
    let extra = urls.count();
    if extra > 0 {
        warn!("Provider returned {} extra images; using the first", extra);
    }

    info!("Image generated: {}", first);
    Ok(first)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
