use anyhow::{bail, Context};
use rand::Rng;
use reqwest::{header::CONTENT_TYPE, Client, Url};
use serde::Deserialize;
use thiserror::Error;

use crate::{config::GeneratorConfig, models::NewGeneratedImage};

pub const MAX_PROMPT_CHARS: usize = 2000;
pub const MIN_DIMENSION: u32 = 64;
pub const MAX_DIMENSION: u32 = 2048;
const SEED_RANGE: u64 = 1_000_000;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("{0}")]
    Invalid(String),

    #[error("Image API request failed: {0}")]
    Upstream(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default = "default_dimension")]
    pub width: u32,
    #[serde(default = "default_dimension")]
    pub height: u32,
    pub model: Option<String>,
    pub seed: Option<u64>,
    #[serde(default)]
    pub nologo: bool,
}

fn default_dimension() -> u32 {
    1024
}

impl GenerationRequest {
    pub fn validate(&self) -> Result<(), GenerationError> {
        let prompt = self.prompt.trim();
        if prompt.is_empty() {
            return Err(GenerationError::Invalid("Prompt must not be empty".to_string()));
        }
        if prompt.chars().count() > MAX_PROMPT_CHARS {
            return Err(GenerationError::Invalid(format!(
                "Prompt must be at most {} characters",
                MAX_PROMPT_CHARS
            )));
        }

        for (name, value) in [("width", self.width), ("height", self.height)] {
            if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&value) {
                return Err(GenerationError::Invalid(format!(
                    "{} must be between {} and {}",
                    name, MIN_DIMENSION, MAX_DIMENSION
                )));
            }
        }

        if matches!(&self.model, Some(model) if model.trim().is_empty()) {
            return Err(GenerationError::Invalid("Model must not be empty".to_string()));
        }

        Ok(())
    }
}

/// Client for the external text-to-image endpoint.
pub struct ImageGenerator {
    client: Client,
    base_url: Url,
    default_model: String,
    prefetch: bool,
}

impl ImageGenerator {
    pub fn new(config: &GeneratorConfig) -> anyhow::Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid image API base URL: {}", config.base_url))?;
        if base_url.cannot_be_a_base() {
            bail!("Image API base URL cannot carry a path: {}", config.base_url);
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build image API client")?;

        Ok(Self {
            client,
            base_url,
            default_model: config.default_model.clone(),
            prefetch: config.prefetch,
        })
    }

    /// Validates the request and resolves it into the metadata of one image.
    pub fn prepare(&self, request: &GenerationRequest) -> Result<NewGeneratedImage, GenerationError> {
        request.validate()?;

        let prompt = request.prompt.trim().to_string();
        let model = request
            .model
            .as_deref()
            .map(str::trim)
            .unwrap_or(&self.default_model)
            .to_string();
        let seed = request
            .seed
            .unwrap_or_else(|| rand::thread_rng().gen_range(0..SEED_RANGE));

        let image_url = self.image_url(&prompt, request.width, request.height, &model, seed, request.nologo)?;

        Ok(NewGeneratedImage {
            prompt,
            image_url,
            model_used: model,
            width: request.width,
            height: request.height,
            seed,
            nologo: request.nologo,
        })
    }

    fn image_url(
        &self,
        prompt: &str,
        width: u32,
        height: u32,
        model: &str,
        seed: u64,
        nologo: bool,
    ) -> Result<String, GenerationError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GenerationError::Upstream("Image API base URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .push("prompt")
            .push(prompt);

        url.query_pairs_mut()
            .append_pair("width", &width.to_string())
            .append_pair("height", &height.to_string())
            .append_pair("model", model)
            .append_pair("seed", &seed.to_string())
            .append_pair("nologo", if nologo { "true" } else { "false" });

        Ok(url.into())
    }

    /// Requests the image once so it is rendered before the URL is handed out.
    /// No-op unless prefetching is enabled.
    pub async fn warm_up(&self, image_url: &str) -> Result<(), GenerationError> {
        if !self.prefetch {
            return Ok(());
        }

        let response = self
            .client
            .get(image_url)
            .send()
            .await
            .map_err(|e| GenerationError::Upstream(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GenerationError::Upstream(format!(
                "Image API returned {}",
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if !content_type.starts_with("image/") {
            return Err(GenerationError::Upstream(format!(
                "Image API returned unexpected content type {:?}",
                content_type
            )));
        }

        tracing::debug!("Warmed up {}", image_url);
        Ok(())
    }
}
