//! Модуль для интеграции с OpenAI API
//!
//! Синтез одной реплики через `/audio/speech` с повторами на 429 и 5xx.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::config::{OpenAiConfig, RetryPolicy};
use crate::error::{Result, TurnError};
use crate::tts::retry::send_with_retry;
use crate::tts::SpeechSynthesizer;
use crate::types::Provider;

/// Голоса, которые принимает `/audio/speech`
pub const KNOWN_VOICES: &[&str] = &[
    "alloy", "ash", "ballad", "coral", "echo", "fable", "nova", "onyx", "sage", "shimmer", "verse",
];

/// Синтез речи через OpenAI TTS
pub struct OpenAiSynthesizer {
    client: Client,
    config: OpenAiConfig,
    retry: RetryPolicy,
}

impl OpenAiSynthesizer {
    pub fn new(config: OpenAiConfig, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()?;
        Ok(Self { client, config, retry })
    }

    fn endpoint(&self) -> String {
        format!("{}/audio/speech", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSynthesizer {
    fn provider(&self) -> Provider {
        Provider::CloudProviderA
    }

    fn file_extension(&self) -> &str {
        &self.config.response_format
    }

    fn is_available(&self) -> bool {
        !self.config.api_key.trim().is_empty()
    }

    fn check_voice(&self, voice_id: &str) -> std::result::Result<(), String> {
        if KNOWN_VOICES.contains(&voice_id) {
            Ok(())
        } else {
            Err(format!("unknown OpenAI voice '{}'", voice_id))
        }
    }

    async fn synthesize_to_file(&self, text: &str, voice_id: &str, dest: &Path) -> std::result::Result<(), TurnError> {
        let provider = self.provider();
        if !self.is_available() {
            log::error!("OpenAI API key is empty");
            return Err(TurnError::synthesis(
                provider,
                "OpenAI API key is required for TTS generation",
            ));
        }

        let url = self.endpoint();
        let body = serde_json::json!({
            "model": self.config.model.as_str(),
            "voice": voice_id,
            "input": text,
            "response_format": self.config.response_format,
            "speed": self.config.speed,
        });

        log::info!("Sending TTS request to OpenAI API ({} chars, voice {})", text.len(), voice_id);
        let response = send_with_retry(provider, &self.retry, || {
            self.client
                .post(&url)
                .bearer_auth(&self.config.api_key)
                .json(&body)
                .send()
        })
        .await?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| TurnError::synthesis(provider, format!("failed to read response bytes: {}", e)))?;
        if bytes.is_empty() {
            log::error!("Received empty response from OpenAI API");
            return Err(TurnError::synthesis(provider, "received an empty response"));
        }

        tokio::fs::write(dest, &bytes)
            .await
            .map_err(|e| TurnError::synthesis(provider, format!("failed to save audio: {}", e)))?;
        log::debug!("Saved OpenAI audio to {}", dest.display());
        Ok(())
    }
}
