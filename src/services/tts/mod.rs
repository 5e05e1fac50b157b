use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::info;
use std::sync::Arc;

use crate::core::config::AudioConfig;

pub mod voice_clone;

/// Turns one line of text into encoded audio.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

pub async fn create_synthesizer(config: &AudioConfig) -> Result<Arc<dyn SpeechSynthesizer>> {
    info!("Initializing TTS client for provider: {}", config.provider);
    match config.provider.as_str() {
        "voice_clone" => {
            let clone_config = config
                .voice_clone
                .clone()
                .ok_or_else(|| anyhow!("voice_clone config missing"))?;
            let client =
                voice_clone::VoiceCloneClient::new(clone_config, config.language.clone()).await?;
            Ok(Arc::new(client))
        }
        _ => Err(anyhow!("Unknown TTS provider: {}", config.provider)),
    }
}
