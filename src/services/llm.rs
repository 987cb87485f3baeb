use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::core::config::{resolve_key, Config};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String, // "gemini" or "openai"
    pub gemini: Option<GeminiConfig>,
    pub openai: Option<OpenAIConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            gemini: None,
            openai: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_gemini_model")]
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct OpenAIConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    pub base_url: Option<String>,
}

fn default_provider() -> String {
    "gemini".to_string()
}
fn default_gemini_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

pub(crate) const GEMINI_KEY_VARS: &[&str] = &["GEMINI_API_KEY", "API_KEY"];
pub(crate) const OPENAI_KEY_VARS: &[&str] = &["OPENAI_API_KEY"];

impl LlmConfig {
    pub fn api_key<F>(&self, env: &F) -> Result<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        match self.provider.as_str() {
            "gemini" => {
                let configured = self.gemini.as_ref().map(|c| c.api_key.as_str()).unwrap_or("");
                resolve_key(configured, GEMINI_KEY_VARS, env).ok_or_else(|| {
                    anyhow!("No Gemini API key: set llm.gemini.api_key or GEMINI_API_KEY")
                })
            }
            "openai" => {
                let configured = self.openai.as_ref().map(|c| c.api_key.as_str()).unwrap_or("");
                resolve_key(configured, OPENAI_KEY_VARS, env).ok_or_else(|| {
                    anyhow!("No OpenAI API key: set llm.openai.api_key or OPENAI_API_KEY")
                })
            }
            other => Err(anyhow!("Unknown LLM provider: {}", other)),
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync + Debug {
    /// Sends one system + user exchange and returns the raw reply text.
    /// `json` asks the model for a JSON-only reply where the provider supports it.
    async fn chat(&self, system: &str, user: &str, json: bool) -> Result<String>;
}

pub fn create_llm(config: &Config) -> Result<Box<dyn LlmClient>> {
    let env = |k: &str| std::env::var(k).ok();
    let api_key = config.llm.api_key(&env)?;
    match config.llm.provider.as_str() {
        "gemini" => {
            let cfg = config.llm.gemini.clone().unwrap_or_default();
            let model = if cfg.model.is_empty() { default_gemini_model() } else { cfg.model };
            Ok(Box::new(GeminiClient::new(&api_key, &model)))
        }
        "openai" => {
            let cfg = config.llm.openai.clone().unwrap_or_default();
            let model = if cfg.model.is_empty() { default_openai_model() } else { cfg.model };
            Ok(Box::new(OpenAIClient::new(&api_key, &model, cfg.base_url.as_deref())))
        }
        _ => Err(anyhow!("Unknown LLM provider: {}", config.llm.provider)),
    }
}

// --- Gemini ---
#[derive(Debug)]
struct GeminiClient {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl GeminiClient {
    fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    response_mime_type: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContentResponse>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Deserialize)]
struct GeminiPartResponse {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    message: String,
}

impl GeminiResponse {
    fn into_text(self, body: &str) -> Result<String> {
        if let Some(err) = self.error {
            return Err(anyhow!("Gemini API returned error: {}", err.message));
        }

        if let Some(first) = self.candidates.as_ref().and_then(|c| c.first()) {
            if let Some(content) = &first.content {
                let text: String = content.parts.iter().map(|p| p.text.as_str()).collect();
                if !text.is_empty() {
                    return Ok(text);
                }
            }

            let reason = first.finish_reason.as_deref().unwrap_or("UNKNOWN");
            return Err(anyhow!("Gemini response empty. Finish reason: {}", reason));
        }

        Err(anyhow!("Gemini response format unexpected or empty. Body: {}", body))
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn chat(&self, system: &str, user: &str, json: bool) -> Result<String> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            self.model
        );

        let request_body = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart { text: user.to_string() }],
            }],
            system_instruction: Some(GeminiSystemInstruction {
                parts: vec![GeminiPart { text: system.to_string() }],
            }),
            generation_config: json.then(|| GeminiGenerationConfig {
                response_mime_type: "application/json".to_string(),
            }),
        };

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body)
            .send()
            .await
            .context("Failed to send Gemini request")?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Gemini API error: {}", error_text));
        }

        let response_text = resp.text().await?;
        debug!("Gemini replied with {} bytes", response_text.len());
        let result: GeminiResponse = serde_json::from_str(&response_text).map_err(|e| {
            anyhow!("Failed to parse Gemini response: {}. Body: {}", e, response_text)
        })?;

        result.into_text(&response_text)
    }
}

// --- OpenAI ---

#[derive(Debug)]
struct OpenAIClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAIClient {
    fn new(api_key: &str, model: &str, base_url: Option<&str>) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url
                .unwrap_or("https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<OpenAIResponseFormat>,
}

#[derive(Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct OpenAIResponseFormat {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessageResponse,
}

#[derive(Deserialize)]
struct OpenAIMessageResponse {
    content: Option<String>,
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn chat(&self, system: &str, user: &str, json: bool) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let request_body = OpenAIRequest {
            model: self.model.clone(),
            messages: vec![
                OpenAIMessage { role: "system".to_string(), content: system.to_string() },
                OpenAIMessage { role: "user".to_string(), content: user.to_string() },
            ],
            response_format: json.then(|| OpenAIResponseFormat {
                kind: "json_object".to_string(),
            }),
        };

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request_body)
            .send()
            .await
            .context("Failed to send OpenAI request")?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("OpenAI API error: {}", error_text));
        }

        let result: OpenAIResponse = resp.json().await?;
        if let Some(choice) = result.choices.first() {
            if let Some(content) = &choice.message.content {
                return Ok(content.clone());
            }
        }

        Err(anyhow!("OpenAI response empty or missing content"))
    }
}
