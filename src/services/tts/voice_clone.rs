use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, info};
use reqwest::{multipart, Client};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use tokio::sync::OnceCell;
use url::Url;

use crate::services::tts::SpeechSynthesizer;

// --- Config ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct VoiceCloneConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Reference recording the server clones the narrator voice from.
    #[serde(default = "default_voice_prompt")]
    pub voice_prompt: PathBuf,
    /// Gradio endpoint taking `(voice prompt file, text, language)`.
    #[serde(default = "default_api_name")]
    pub api_name: String,
}

impl Default for VoiceCloneConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            voice_prompt: default_voice_prompt(),
            api_name: default_api_name(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:7860".to_string()
}
fn default_voice_prompt() -> PathBuf {
    PathBuf::from("meta/narrator.wav")
}
fn default_api_name() -> String {
    "generate".to_string()
}

// --- Client ---

/// Client for a Gradio voice-cloning TTS server: the reference prompt is
/// uploaded once, then every line is one generation call followed by the
/// SSE result stream and a file download.
pub struct VoiceCloneClient {
    base_url: String,
    api_name: String,
    language: String,
    voice_prompt: Vec<u8>,
    prompt_file_name: String,
    uploaded_prompt: OnceCell<String>,
    client: Client,
}

impl VoiceCloneClient {
    pub async fn new(config: VoiceCloneConfig, language: String) -> Result<Self> {
        Url::parse(&config.base_url)
            .with_context(|| format!("Invalid TTS base_url: {}", config.base_url))?;

        let voice_prompt = tokio::fs::read(&config.voice_prompt)
            .await
            .with_context(|| {
                format!("Failed to read voice prompt {}", config.voice_prompt.display())
            })?;
        let prompt_file_name = config
            .voice_prompt
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "prompt.wav".to_string());

        info!(
            "Voice clone TTS at {} ({} bytes of reference audio)",
            config.base_url,
            voice_prompt.len()
        );

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_name: config.api_name,
            language,
            voice_prompt,
            prompt_file_name,
            uploaded_prompt: OnceCell::new(),
            client: Client::new(),
        })
    }

    async fn upload_prompt(&self) -> Result<String> {
        debug!("Uploading voice prompt ({} bytes)", self.voice_prompt.len());
        let part = multipart::Part::bytes(self.voice_prompt.clone())
            .file_name(self.prompt_file_name.clone())
            .mime_str("application/octet-stream")
            .context("Invalid mime type")?;

        let form = multipart::Form::new().part("files", part);

        let upload_resp = self
            .client
            .post(format!("{}/gradio_api/upload", self.base_url))
            .multipart(form)
            .send()
            .await
            .context("Failed to send upload request")?
            .json::<Vec<String>>()
            .await
            .context("Failed to parse upload response")?;

        let server_path = upload_resp
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Upload failed: empty response"))?;
        debug!("Voice prompt stored on server at {}", server_path);
        Ok(server_path)
    }

    async fn generate_and_download(&self, prompt_path: &str, text: &str) -> Result<Vec<u8>> {
        let gen_url = format!("{}/gradio_api/call/{}", self.base_url, self.api_name);
        let payload = generation_payload(prompt_path, text, &self.language);

        let gen_resp = self
            .client
            .post(&gen_url)
            .json(&payload)
            .send()
            .await
            .context("Failed to send generation request")?
            .json::<Value>()
            .await
            .context("Failed to parse generation response")?;

        let event_id = gen_resp["event_id"]
            .as_str()
            .ok_or_else(|| anyhow!("No event_id in generation response"))?;
        debug!("Generation event {}", event_id);

        let mut stream = self
            .client
            .get(format!("{}/{}", gen_url, event_id))
            .send()
            .await
            .context("Failed to connect to event stream")?
            .bytes_stream();

        let mut download_path = None;
        let mut pending = String::new();
        'stream: while let Some(item) = stream.next().await {
            let chunk = item.context("Stream error")?;
            pending.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = pending.find('\n') {
                let line: String = pending.drain(..=pos).collect();
                if let Some(event) = parse_event_line(line.trim_end()) {
                    match event {
                        StreamEvent::Output(path) => {
                            download_path = Some(path);
                            break 'stream;
                        }
                        StreamEvent::Error(message) => {
                            return Err(anyhow!("TTS server reported an error: {}", message));
                        }
                    }
                }
            }
        }

        let download_path =
            download_path.ok_or_else(|| anyhow!("Failed to get output file path from stream"))?;

        let download_url = format!("{}/gradio_api/file={}", self.base_url, download_path);
        let resp = self
            .client
            .get(download_url)
            .send()
            .await
            .context("Failed to download result")?;
        if !resp.status().is_success() {
            return Err(anyhow!("Failed to download {}: {}", download_path, resp.status()));
        }
        let bytes = resp.bytes().await.context("Failed to get bytes")?;
        debug!("Downloaded {} bytes of audio", bytes.len());
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl SpeechSynthesizer for VoiceCloneClient {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let prompt_path = self
            .uploaded_prompt
            .get_or_try_init(|| self.upload_prompt())
            .await?;
        self.generate_and_download(prompt_path, text).await
    }
}

fn generation_payload(prompt_path: &str, text: &str, language: &str) -> Value {
    json!({
        "data": [
            {
                "path": prompt_path,
                "meta": {"_type": "gradio.FileData"}
            },
            text,
            language
        ]
    })
}

#[derive(Debug, PartialEq, Eq)]
enum StreamEvent {
    Output(String),
    Error(String),
}

/// Interprets one line of a Gradio SSE stream. `event: error` lines carry
/// no payload of their own, so errors are recognised from `data:` lines
/// that are not output arrays.
fn parse_event_line(line: &str) -> Option<StreamEvent> {
    let json_str = line.strip_prefix("data:")?.trim();
    if json_str.is_empty() || json_str == "null" {
        return None;
    }

    match serde_json::from_str::<Value>(json_str) {
        Ok(Value::Array(outputs)) => outputs
            .first()
            .and_then(|file_info| file_info["path"].as_str())
            .map(|path| StreamEvent::Output(path.to_string())),
        Ok(Value::String(message)) => Some(StreamEvent::Error(message)),
        Ok(other) if other.get("error").is_some() => {
            Some(StreamEvent::Error(other["error"].to_string()))
        }
        _ => None,
    }
}
