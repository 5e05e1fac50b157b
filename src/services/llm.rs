use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use std::time::Duration;

use crate::core::config::{default_retry_count, default_retry_delay};
use crate::services::retry::RetryPolicy;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_retry_count")]
    pub retry_count: usize,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
    pub gemini: Option<GeminiConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            retry_count: default_retry_count(),
            retry_delay_seconds: default_retry_delay(),
            gemini: None,
        }
    }
}

impl LlmConfig {
    pub fn gemini_mut(&mut self) -> &mut GeminiConfig {
        self.gemini.get_or_insert_with(Default::default)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_count, Duration::from_secs(self.retry_delay_seconds))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_gemini_model")]
    pub model: String,
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_gemini_model(),
            base_url: default_gemini_base_url(),
        }
    }
}

fn default_provider() -> String {
    "gemini".to_string()
}
fn default_gemini_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

/// A file handed to the model alongside the prompt.
#[derive(Debug, Clone)]
pub struct DocumentPart {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl DocumentPart {
    pub fn pdf(data: Vec<u8>) -> Self {
        Self {
            mime_type: "application/pdf".to_string(),
            data,
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync + Debug {
    /// Asks for a JSON answer constrained by `schema` and returns the raw text.
    async fn generate_json(
        &self,
        document: &DocumentPart,
        prompt: &str,
        schema: &Value,
    ) -> Result<String>;
}

pub fn create_llm(config: &LlmConfig) -> Result<Box<dyn LlmClient>> {
    match config.provider.as_str() {
        "gemini" => {
            let cfg = config.gemini.as_ref().context("Gemini config missing")?;
            if cfg.api_key.is_empty() {
                return Err(anyhow!("Gemini api_key missing (set GEMINI_KEY)"));
            }
            Ok(Box::new(GeminiClient::new(cfg)))
        }
        _ => Err(anyhow!("Unknown LLM provider: {}", config.provider)),
    }
}

// --- Gemini ---
#[derive(Debug)]
struct GeminiClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiClient {
    fn new(config: &GeminiConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<GeminiInlineData>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    response_mime_type: String,
    response_schema: Value,
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
    text: String,
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    message: String,
}

fn build_request(document: &DocumentPart, prompt: &str, schema: &Value) -> GeminiRequest {
    GeminiRequest {
        contents: vec![GeminiContent {
            role: "user".to_string(),
            parts: vec![
                GeminiPart {
                    text: None,
                    inline_data: Some(GeminiInlineData {
                        mime_type: document.mime_type.clone(),
                        data: base64::engine::general_purpose::STANDARD.encode(&document.data),
                    }),
                },
                GeminiPart {
                    text: Some(prompt.to_string()),
                    inline_data: None,
                },
            ],
        }],
        generation_config: GeminiGenerationConfig {
            response_mime_type: "application/json".to_string(),
            response_schema: schema.clone(),
        },
    }
}

fn extract_text(response_text: &str) -> Result<String> {
    let result: GeminiResponse = match serde_json::from_str(response_text) {
        Ok(r) => r,
        Err(e) => {
            return Err(anyhow!(
                "Failed to parse Gemini response: {}. Body: {}",
                e,
                response_text
            ))
        }
    };

    if let Some(err) = result.error {
        return Err(anyhow!("Gemini API returned error: {}", err.message));
    }

    if let Some(candidates) = result.candidates {
        if let Some(first) = candidates.first() {
            if let Some(content) = &first.content {
                if let Some(part) = content.parts.first() {
                    return Ok(part.text.clone());
                }
            }

            let reason = first.finish_reason.as_deref().unwrap_or("UNKNOWN");
            return Err(anyhow!("Gemini response empty. Finish reason: {}", reason));
        }
    }

    Err(anyhow!("Gemini response format unexpected or empty. Body: {}", response_text))
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn generate_json(
        &self,
        document: &DocumentPart,
        prompt: &str,
        schema: &Value,
    ) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let request_body = build_request(document, prompt, schema);

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await?;
            return Err(anyhow!("Gemini API error ({}): {}", status, error_text));
        }

        let response_text = resp.text().await?;
        extract_text(&response_text)
    }
}
