use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::services::llm::LlmConfig;
use crate::services::tts::voice_clone::VoiceCloneConfig;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub aws: AwsConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub audio: AudioConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AwsConfig {
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub queue_url: String,
    #[serde(default)]
    pub table_name: String,
    #[serde(default)]
    pub bucket: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WorkerConfig {
    /// Parent of the per-job workspaces. Defaults to the system temp dir.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
    #[serde(default = "default_poll_wait")]
    pub poll_wait_seconds: u64,
    #[serde(default = "default_error_backoff")]
    pub error_backoff_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workspace_root: None,
            poll_wait_seconds: default_poll_wait(),
            error_backoff_seconds: default_error_backoff(),
        }
    }
}

impl WorkerConfig {
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_seconds)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AudioConfig {
    #[serde(default = "default_tts_provider")]
    pub provider: String,
    #[serde(default = "default_language")]
    pub language: String,
    /// Extension of the generated `dialogue_<index>` files.
    #[serde(default = "default_audio_extension")]
    pub extension: String,
    #[serde(default = "default_retry_count")]
    pub retry_count: usize,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
    /// Synthesis calls in flight per chapter. 1 keeps the pipeline sequential.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    pub voice_clone: Option<VoiceCloneConfig>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            provider: default_tts_provider(),
            language: default_language(),
            extension: default_audio_extension(),
            retry_count: default_retry_count(),
            retry_delay_seconds: default_retry_delay(),
            concurrency: default_concurrency(),
            voice_clone: None,
        }
    }
}

fn default_poll_wait() -> u64 {
    20
}
fn default_error_backoff() -> u64 {
    10
}
fn default_tts_provider() -> String {
    "voice_clone".to_string()
}
fn default_language() -> String {
    "English".to_string()
}
fn default_audio_extension() -> String {
    "mp3".to_string()
}
pub(crate) fn default_retry_count() -> usize {
    3
}
pub(crate) fn default_retry_delay() -> u64 {
    2
}
fn default_concurrency() -> usize {
    1
}

const CONFIG_PATH_ENV: &str = "N2A_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.yml";

impl Config {
    /// Reads `config.yml` (if present), applies environment overrides and
    /// checks that every required option is set.
    pub fn load() -> Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::from_file(Path::new(&path))?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("{} not found, using defaults and environment", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml_ng::from_str(content)?)
    }

    /// Environment wins over the file. Empty variables are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("AWS_REGION") {
            self.aws.region = v;
        }
        if let Some(v) = get("SQS_QUEUE_URL") {
            self.aws.queue_url = v;
        }
        if let Some(v) = get("DYNAMODB_TABLE_NAME") {
            self.aws.table_name = v;
        }
        if let Some(v) = get("S3_BUCKET_NAME") {
            self.aws.bucket = v;
        }
        if let Some(v) = get("WORKSPACE_ROOT") {
            self.worker.workspace_root = Some(PathBuf::from(v));
        }
        if let Some(v) = get("GEMINI_KEY") {
            self.llm.gemini_mut().api_key = v;
        }
        if let Some(v) = get("GEMINI_MODEL") {
            self.llm.gemini_mut().model = v;
        }
        if let Some(v) = get("TTS_BASE_URL") {
            self.audio.voice_clone.get_or_insert_with(Default::default).base_url = v;
        }
        if let Some(v) = get("TTS_VOICE_PROMPT") {
            let voice_clone = self.audio.voice_clone.get_or_insert_with(Default::default);
            voice_clone.voice_prompt = PathBuf::from(v);
        }
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            ("aws.queue_url (SQS_QUEUE_URL)", &self.aws.queue_url),
            ("aws.table_name (DYNAMODB_TABLE_NAME)", &self.aws.table_name),
            ("aws.bucket (S3_BUCKET_NAME)", &self.aws.bucket),
            ("aws.region (AWS_REGION)", &self.aws.region),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();

        if !missing.is_empty() {
            anyhow::bail!("Missing required configuration: {}", missing.join(", "));
        }
        if self.audio.concurrency == 0 {
            anyhow::bail!("audio.concurrency must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_worker_constants() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.worker.poll_wait_seconds, 20);
        assert_eq!(config.worker.error_backoff_seconds, 10);
        assert_eq!(config.llm.retry_count, 3);
        assert_eq!(config.llm.retry_delay_seconds, 2);
        assert_eq!(config.audio.extension, "mp3");
        assert_eq!(config.audio.concurrency, 1);
    }

    #[test]
    fn test_missing_required_options_are_all_reported() {
        let mut config = Config::default();
        config.apply_env(env(&[("SQS_QUEUE_URL", "https://sqs/queue")]));

        let err = config.validate().unwrap_err().to_string();
        assert!(!err.contains("SQS_QUEUE_URL"));
        assert!(err.contains("DYNAMODB_TABLE_NAME"));
        assert!(err.contains("S3_BUCKET_NAME"));
        assert!(err.contains("AWS_REGION"));
    }

    #[test]
    fn test_env_overrides_file() {
        let yaml = r#"
aws:
  region: us-east-1
  queue_url: https://sqs/from-file
  table_name: TTS_Jobs
  bucket: novels
audio:
  concurrency: 4
  voice_clone:
    base_url: http://tts:7860
    voice_prompt: meta/narrator.wav
"#;
        let mut config = Config::from_yaml(yaml).unwrap();
        config.apply_env(env(&[
            ("SQS_QUEUE_URL", "https://sqs/from-env"),
            ("S3_BUCKET_NAME", "  "),
            ("GEMINI_KEY", "secret"),
        ]));

        assert_eq!(config.aws.queue_url, "https://sqs/from-env");
        assert_eq!(config.aws.bucket, "novels");
        assert_eq!(config.audio.concurrency, 4);
        assert_eq!(config.llm.gemini.as_ref().unwrap().api_key, "secret");
        assert_eq!(
            config.audio.voice_clone.as_ref().unwrap().base_url,
            "http://tts:7860"
        );
        config.validate().unwrap();
    }
}
