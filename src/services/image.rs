use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::core::config::{resolve_key, Config};
use crate::services::llm::{GEMINI_KEY_VARS, OPENAI_KEY_VARS};
use crate::utils::image::to_data_uri;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ImageConfig {
    #[serde(default = "default_provider")]
    pub provider: String, // "gemini" or "openai"
    pub gemini: Option<ImagenConfig>,
    pub openai: Option<OpenAIImageConfig>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            gemini: None,
            openai: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ImagenConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_imagen_model")]
    pub model: String,
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,
}

impl Default for ImagenConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_imagen_model(),
            aspect_ratio: default_aspect_ratio(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAIImageConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    #[serde(default = "default_size")]
    pub size: String,
    pub base_url: Option<String>,
}

impl Default for OpenAIImageConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_openai_model(),
            size: default_size(),
            base_url: None,
        }
    }
}

fn default_provider() -> String {
    "gemini".to_string()
}
fn default_imagen_model() -> String {
    "imagen-4.0-generate-001".to_string()
}
fn default_aspect_ratio() -> String {
    "1:1".to_string()
}
fn default_openai_model() -> String {
    "dall-e-3".to_string()
}
fn default_size() -> String {
    "1024x1024".to_string()
}

impl ImageConfig {
    pub fn api_key<F>(&self, env: &F) -> Result<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        match self.provider.as_str() {
            "gemini" => {
                let configured = self.gemini.as_ref().map(|c| c.api_key.as_str()).unwrap_or("");
                resolve_key(configured, GEMINI_KEY_VARS, env).ok_or_else(|| {
                    anyhow!("No Gemini API key: set image.gemini.api_key or GEMINI_API_KEY")
                })
            }
            "openai" => {
                let configured = self.openai.as_ref().map(|c| c.api_key.as_str()).unwrap_or("");
                resolve_key(configured, OPENAI_KEY_VARS, env).ok_or_else(|| {
                    anyhow!("No OpenAI API key: set image.openai.api_key or OPENAI_API_KEY")
                })
            }
            other => Err(anyhow!("Unknown image provider: {}", other)),
        }
    }
}

/// Renders exactly one illustration per call and returns a displayable reference.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate_image(
        &self,
        scene_prompt: &str,
        style_prompt: &str,
        character_description: &str,
    ) -> Result<String>;
}

/// Style first, then the character anchor, then the scene.
pub fn compose_prompt(scene_prompt: &str, style_prompt: &str, character_description: &str) -> String {
    format!("{}. {}. {}", style_prompt, character_description, scene_prompt)
}

pub fn create_image_generator(config: &Config) -> Result<Box<dyn ImageGenerator>> {
    let env = |k: &str| std::env::var(k).ok();
    let api_key = config.image.api_key(&env)?;
    match config.image.provider.as_str() {
        "gemini" => {
            let cfg = config.image.gemini.clone().unwrap_or_default();
            Ok(Box::new(ImagenClient::new(&api_key, cfg)))
        }
        "openai" => {
            let cfg = config.image.openai.clone().unwrap_or_default();
            Ok(Box::new(OpenAIImageClient::new(&api_key, cfg)))
        }
        _ => Err(anyhow!("Unknown image provider: {}", config.image.provider)),
    }
}

// --- Gemini (Imagen) ---

struct ImagenClient {
    api_key: String,
    config: ImagenConfig,
    client: reqwest::Client,
}

impl ImagenClient {
    fn new(api_key: &str, config: ImagenConfig) -> Self {
        Self {
            api_key: api_key.to_string(),
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct ImagenRequest {
    instances: Vec<ImagenInstance>,
    parameters: ImagenParameters,
}

#[derive(Serialize)]
struct ImagenInstance {
    prompt: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImagenParameters {
    sample_count: u32,
    aspect_ratio: String,
    output_options: ImagenOutputOptions,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImagenOutputOptions {
    mime_type: String,
}

#[derive(Deserialize)]
struct ImagenResponse {
    #[serde(default)]
    predictions: Vec<ImagenPrediction>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImagenPrediction {
    bytes_base64_encoded: Option<String>,
    mime_type: Option<String>,
    rai_filtered_reason: Option<String>,
}

impl ImagenResponse {
    fn into_data_uri(self) -> Result<String> {
        let first = self
            .predictions
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No image was generated."))?;

        match first.bytes_base64_encoded {
            Some(bytes) if !bytes.is_empty() => {
                let mime = first.mime_type.as_deref().unwrap_or("image/jpeg");
                Ok(to_data_uri(mime, &bytes))
            }
            _ => Err(anyhow!(
                "No image was generated. Filter reason: {}",
                first.rai_filtered_reason.as_deref().unwrap_or("UNKNOWN")
            )),
        }
    }
}

#[async_trait]
impl ImageGenerator for ImagenClient {
    async fn generate_image(
        &self,
        scene_prompt: &str,
        style_prompt: &str,
        character_description: &str,
    ) -> Result<String> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:predict",
            self.config.model
        );
        let prompt = compose_prompt(scene_prompt, style_prompt, character_description);
        debug!("Imagen prompt: {}", prompt);

        let request_body = ImagenRequest {
            instances: vec![ImagenInstance { prompt }],
            parameters: ImagenParameters {
                sample_count: 1,
                aspect_ratio: self.config.aspect_ratio.clone(),
                output_options: ImagenOutputOptions {
                    mime_type: "image/jpeg".to_string(),
                },
            },
        };

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body)
            .send()
            .await
            .context("Failed to send Imagen request")?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Imagen API error: {}", error_text));
        }

        let result: ImagenResponse = resp.json().await.context("Failed to parse Imagen response")?;
        result.into_data_uri()
    }
}

// --- OpenAI Images ---

struct OpenAIImageClient {
    api_key: String,
    config: OpenAIImageConfig,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAIImageClient {
    fn new(api_key: &str, config: OpenAIImageConfig) -> Self {
        let base_url = config
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1")
            .trim_end_matches('/')
            .to_string();
        Self {
            api_key: api_key.to_string(),
            config,
            base_url,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct OpenAIImageRequest {
    model: String,
    prompt: String,
    n: u32,
    size: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIImageResponse {
    #[serde(default)]
    data: Vec<OpenAIImageData>,
}

#[derive(Deserialize)]
struct OpenAIImageData {
    b64_json: Option<String>,
}

impl OpenAIImageResponse {
    fn into_data_uri(self) -> Result<String> {
        self.data
            .into_iter()
            .next()
            .and_then(|d| d.b64_json)
            .filter(|b| !b.is_empty())
            .map(|b| to_data_uri("image/png", &b))
            .ok_or_else(|| anyhow!("No image was generated."))
    }
}

#[async_trait]
impl ImageGenerator for OpenAIImageClient {
    async fn generate_image(
        &self,
        scene_prompt: &str,
        style_prompt: &str,
        character_description: &str,
    ) -> Result<String> {
        let url = format!("{}/images/generations", self.base_url);
        let prompt = compose_prompt(scene_prompt, style_prompt, character_description);
        debug!("OpenAI image prompt: {}", prompt);

        // gpt-image models always answer with base64 and reject the field.
        let response_format =
            (!self.config.model.starts_with("gpt-image")).then(|| "b64_json".to_string());

        let request_body = OpenAIImageRequest {
            model: self.config.model.clone(),
            prompt,
            n: 1,
            size: self.config.size.clone(),
            response_format,
        };

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request_body)
            .send()
            .await
            .context("Failed to send OpenAI image request")?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("OpenAI image API error: {}", error_text));
        }

        let result: OpenAIImageResponse = resp.json().await?;
        result.into_data_uri()
    }
}
