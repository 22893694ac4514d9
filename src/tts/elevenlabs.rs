//! Синтез речи через ElevenLabs
//!
//! Пометки в квадратных скобках передаются как есть: модель их понимает.
//! Тело ответа пишется в файл по частям.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;

use crate::config::{ElevenLabsConfig, RetryPolicy};
use crate::error::{ReelSyncError, Result, TurnError};
use crate::tts::retry::send_with_retry;
use crate::tts::SpeechSynthesizer;
use crate::types::Provider;

pub struct ElevenLabsSynthesizer {
    client: Client,
    config: ElevenLabsConfig,
    retry: RetryPolicy,
    extension: String,
}

/// Расширение файла по `output_format` (`mp3_44100_128` -> `mp3`)
fn extension_for_format(output_format: &str) -> Result<String> {
    let codec = output_format
        .split('_')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    match codec.as_str() {
        "mp3" | "opus" | "wav" => Ok(codec),
        other => Err(ReelSyncError::Configuration(format!(
            "elevenlabs.output_format '{}' has no supported container ({})",
            output_format, other
        ))),
    }
}

impl ElevenLabsSynthesizer {
    pub fn new(config: ElevenLabsConfig, retry: RetryPolicy) -> Result<Self> {
        let extension = extension_for_format(&config.output_format)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            client,
            config,
            retry,
            extension,
        })
    }

    fn endpoint(&self, voice_id: &str) -> String {
        format!(
            "{}/text-to-speech/{}",
            self.config.base_url.trim_end_matches('/'),
            voice_id
        )
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSynthesizer {
    fn provider(&self) -> Provider {
        Provider::CloudProviderB
    }

    fn file_extension(&self) -> &str {
        &self.extension
    }

    fn is_available(&self) -> bool {
        !self.config.api_key.trim().is_empty()
    }

    fn keeps_direction_tags(&self) -> bool {
        true
    }

    async fn synthesize_to_file(&self, text: &str, voice_id: &str, dest: &Path) -> std::result::Result<(), TurnError> {
        let provider = self.provider();
        if !self.is_available() {
            return Err(TurnError::synthesis(
                provider,
                "ElevenLabs API key is required for TTS generation",
            ));
        }

        let url = self.endpoint(voice_id);
        let body = serde_json::json!({
            "text": text,
            "model_id": self.config.model_id,
        });

        log::info!("Sending TTS request to ElevenLabs ({} chars, voice {})", text.len(), voice_id);
        let response = send_with_retry(provider, &self.retry, || {
            self.client
                .post(&url)
                .query(&[("output_format", self.config.output_format.as_str())])
                .header("xi-api-key", &self.config.api_key)
                .json(&body)
                .send()
        })
        .await?;

        let write_err = |e: std::io::Error| TurnError::synthesis(provider, format!("failed to save audio: {}", e));
        let mut file = tokio::fs::File::create(dest).await.map_err(write_err)?;
        let mut stream = response.bytes_stream();
        let mut written = 0usize;
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| TurnError::synthesis(provider, format!("audio stream interrupted: {}", e)))?;
            written += chunk.len();
            file.write_all(&chunk).await.map_err(write_err)?;
        }
        file.flush().await.map_err(write_err)?;
        file.sync_all().await.map_err(write_err)?;

        if written == 0 {
            return Err(TurnError::synthesis(provider, "received an empty audio stream"));
        }
        log::debug!("Saved {} bytes of ElevenLabs audio to {}", written, dest.display());
        Ok(())
    }
}
