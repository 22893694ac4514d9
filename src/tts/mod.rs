//! Модуль синтеза речи
//!
//! Каждый провайдер реализует `SpeechSynthesizer` и пишет аудио одной реплики
//! в заданный файл. Общая функция `synthesize` отвечает за подготовку текста,
//! атомарную запись, кэш и измерение длительности по готовому файлу.

pub mod cache;
pub mod elevenlabs;
pub mod local;
pub mod openai;
pub mod retry;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;

use crate::config::{ReelSyncConfig, SanityConfig};
use crate::error::{Result, TurnError};
use crate::media::audio::measure_duration_async;
use crate::types::{Provider, VoiceBinding};
use crate::utils::temp;

pub use cache::SynthesisCache;
pub use elevenlabs::ElevenLabsSynthesizer;
pub use local::LocalSynthesizer;
pub use openai::OpenAiSynthesizer;

lazy_static! {
    static ref HTML_TAG: Regex = Regex::new(r"<[^>]*>").unwrap();
    static ref DIRECTION_TAG: Regex = Regex::new(r"\[[^\]]*\]").unwrap();
}

/// Подготовка текста для TTS: HTML-теги, сущности, пробелы
pub fn prepare_text_for_tts(text: &str) -> String {
    let text = HTML_TAG.replace_all(text, "");

    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    text.split_whitespace().collect::<Vec<&str>>().join(" ")
}

/// Удалить режиссерские пометки вида `[sarcastically]`
pub fn strip_direction_tags(text: &str) -> String {
    let text = DIRECTION_TAG.replace_all(text, " ");
    text.split_whitespace().collect::<Vec<&str>>().join(" ")
}

/// Провайдер синтеза речи
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    fn provider(&self) -> Provider;

    /// Расширение файлов, которые пишет провайдер
    fn file_extension(&self) -> &str;

    /// Готов ли провайдер к работе (программа в PATH, ключ API задан)
    fn is_available(&self) -> bool;

    /// Передавать ли провайдеру пометки в квадратных скобках
    fn keeps_direction_tags(&self) -> bool {
        false
    }

    /// Проверить, что провайдер знает такой голос
    fn check_voice(&self, voice_id: &str) -> std::result::Result<(), String> {
        if voice_id.trim().is_empty() {
            return Err("voice id is empty".to_string());
        }
        Ok(())
    }

    /// Записать речь для `text` в файл `dest`
    async fn synthesize_to_file(&self, text: &str, voice_id: &str, dest: &Path) -> std::result::Result<(), TurnError>;
}

/// Результат синтеза одной реплики
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAudio {
    pub audio_path: PathBuf,
    /// Длительность, измеренная по записанному файлу
    pub nominal_duration_seconds: f64,
}

/// Текст, который получит провайдер
pub fn text_for_provider(synthesizer: &dyn SpeechSynthesizer, text: &str) -> String {
    let prepared = prepare_text_for_tts(text);
    if synthesizer.keeps_direction_tags() {
        prepared
    } else {
        strip_direction_tags(&prepared)
    }
}

/// Синтезировать реплику в `output_path`
///
/// Файл появляется под итоговым именем только целиком. Длительность всегда
/// берется из самого файла.
pub async fn synthesize(
    synthesizer: &dyn SpeechSynthesizer,
    text: &str,
    voice: &VoiceBinding,
    output_path: &Path,
    cache: Option<&SynthesisCache>,
) -> std::result::Result<SynthesizedAudio, TurnError> {
    let provider = synthesizer.provider();
    if voice.provider != provider {
        return Err(TurnError::synthesis(
            provider,
            format!("voice for '{}' is bound to {}", voice.speaker, voice.provider),
        ));
    }
    synthesizer
        .check_voice(&voice.provider_voice_id)
        .map_err(|reason| TurnError::synthesis(provider, reason))?;

    let prepared = text_for_provider(synthesizer, text);
    if prepared.trim().is_empty() {
        return Err(TurnError::synthesis(provider, "text is empty after trimming"));
    }

    let extension = synthesizer.file_extension().to_string();
    let cache_key = cache.map(|_| SynthesisCache::cache_key(provider, &voice.provider_voice_id, &prepared));
    let partial = temp::PartialFile::new(output_path);

    let cached = match (cache, cache_key.as_deref()) {
        (Some(cache), Some(key)) => cache.fetch(key, &extension, partial.path()).await.unwrap_or_else(|e| {
            log::warn!("Synthesis cache lookup failed: {}", e);
            false
        }),
        _ => false,
    };

    if cached {
        log::debug!("Cache hit for {} voice '{}'", provider, voice.provider_voice_id);
    } else {
        synthesizer
            .synthesize_to_file(&prepared, &voice.provider_voice_id, partial.path())
            .await?;
    }

    let nominal = verify_output(provider, partial.path()).await?;

    if let (false, Some(cache), Some(key)) = (cached, cache, cache_key.as_deref()) {
        if let Err(e) = cache.store(key, &extension, partial.path()).await {
            log::warn!("Failed to store synthesized audio in cache: {}", e);
        }
    }

    partial
        .commit(output_path)
        .await
        .map_err(|e| TurnError::synthesis(provider, format!("failed to move audio into place: {}", e)))?;

    Ok(SynthesizedAudio {
        audio_path: output_path.to_path_buf(),
        nominal_duration_seconds: nominal,
    })
}

async fn verify_output(provider: Provider, path: &Path) -> std::result::Result<f64, TurnError> {
    let size = tokio::fs::metadata(path)
        .await
        .map(|m| m.len())
        .map_err(|e| TurnError::synthesis(provider, format!("no audio file was produced: {}", e)))?;
    if size == 0 {
        return Err(TurnError::synthesis(provider, "produced an empty audio file"));
    }

    let duration = measure_duration_async(path)
        .await
        .map_err(|e| TurnError::synthesis(provider, format!("produced an unreadable audio file: {}", e)))?;
    if !(duration.is_finite() && duration > 0.0) {
        return Err(TurnError::synthesis(
            provider,
            format!("produced audio with invalid duration {:.3}s", duration),
        ));
    }
    Ok(duration)
}

/// Проверить, что длительность правдоподобна для числа слов
pub fn check_duration_sanity(
    provider: Provider,
    nominal_duration_seconds: f64,
    word_count: usize,
    sanity: &SanityConfig,
) -> std::result::Result<(), TurnError> {
    if word_count == 0 {
        return Ok(());
    }
    let per_word = nominal_duration_seconds / word_count as f64;
    if per_word < sanity.min_seconds_per_word || per_word > sanity.max_seconds_per_word {
        return Err(TurnError::synthesis(
            provider,
            format!(
                "implausible duration {:.2}s for {} words ({:.3}s per word, allowed {:.2}-{:.2})",
                nominal_duration_seconds,
                word_count,
                per_word,
                sanity.min_seconds_per_word,
                sanity.max_seconds_per_word
            ),
        ));
    }
    Ok(())
}

/// Набор провайдеров, выбираемый по `VoiceBinding.provider`
#[derive(Clone, Default)]
pub struct SynthesizerSet {
    synthesizers: HashMap<Provider, Arc<dyn SpeechSynthesizer>>,
}

impl SynthesizerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Все три провайдера по конфигурации
    pub fn from_config(config: &ReelSyncConfig) -> Result<Self> {
        let mut set = Self::new();
        set.insert(Arc::new(LocalSynthesizer::new(config.local_voice.clone())));
        set.insert(Arc::new(OpenAiSynthesizer::new(config.openai.clone(), config.retry.clone())?));
        set.insert(Arc::new(ElevenLabsSynthesizer::new(
            config.elevenlabs.clone(),
            config.retry.clone(),
        )?));

        for provider in Provider::all() {
            if let Some(synthesizer) = set.get(provider) {
                if !synthesizer.is_available() {
                    log::warn!("Provider {} is not available in this environment", provider);
                }
            }
        }
        Ok(set)
    }

    /// Добавить или заменить провайдера
    pub fn insert(&mut self, synthesizer: Arc<dyn SpeechSynthesizer>) {
        self.synthesizers.insert(synthesizer.provider(), synthesizer);
    }

    pub fn with(mut self, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        self.insert(synthesizer);
        self
    }

    pub fn get(&self, provider: Provider) -> Option<Arc<dyn SpeechSynthesizer>> {
        self.synthesizers.get(&provider).cloned()
    }
}

impl std::fmt::Debug for SynthesizerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthesizerSet")
            .field("providers", &self.synthesizers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::audio::test_support::write_tone_wav;

    struct ToneSynthesizer {
        seconds: f64,
        empty: bool,
    }

    #[async_trait]
    impl SpeechSynthesizer for ToneSynthesizer {
        fn provider(&self) -> Provider {
            Provider::LocalOs
        }

        fn file_extension(&self) -> &str {
            "wav"
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn synthesize_to_file(&self, _text: &str, _voice_id: &str, dest: &Path) -> std::result::Result<(), TurnError> {
            if self.empty {
                std::fs::write(dest, b"").unwrap();
            } else {
                write_tone_wav(dest, 16000, 0.0, self.seconds, 0.0);
            }
            Ok(())
        }
    }

    fn binding() -> VoiceBinding {
        VoiceBinding::new("Host", Provider::LocalOs, "Samantha")
    }

    #[test]
    fn text_preparation() {
        assert_eq!(prepare_text_for_tts("<i>Hi</i>  &amp;   bye"), "Hi & bye");
        assert_eq!(strip_direction_tags("[laughs] Sure, [pause] why not"), "Sure, why not");
    }

    #[tokio::test]
    async fn measures_duration_from_written_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("turn_0000.wav");
        let synthesizer = ToneSynthesizer { seconds: 1.25, empty: false };

        let audio = synthesize(&synthesizer, "Hello there", &binding(), &dest, None)
            .await
            .unwrap();
        assert_eq!(audio.audio_path, dest);
        assert!((audio.nominal_duration_seconds - 1.25).abs() < 1e-6);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn rejects_empty_text_and_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("turn_0001.wav");

        let ok = ToneSynthesizer { seconds: 1.0, empty: false };
        let err = synthesize(&ok, "  [sighs]  ", &binding(), &dest, None).await.unwrap_err();
        assert!(matches!(err, TurnError::Synthesis { .. }));

        let empty = ToneSynthesizer { seconds: 1.0, empty: true };
        let err = synthesize(&empty, "Hello", &binding(), &dest, None).await.unwrap_err();
        assert!(err.to_string().contains("empty audio file"));
        assert!(!dest.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn rejects_voice_bound_to_other_provider() {
        let dir = tempfile::tempdir().unwrap();
        let voice = VoiceBinding::new("Host", Provider::CloudProviderB, "voice");
        let synthesizer = ToneSynthesizer { seconds: 1.0, empty: false };
        let err = synthesize(&synthesizer, "Hello", &voice, &dir.path().join("t.wav"), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bound to cloud_provider_b"));
    }

    #[test]
    fn sanity_bounds() {
        let sanity = SanityConfig::default();
        assert!(check_duration_sanity(Provider::LocalOs, 1.2, 3, &sanity).is_ok());
        assert!(check_duration_sanity(Provider::LocalOs, 0.05, 3, &sanity).is_err());
        assert!(check_duration_sanity(Provider::LocalOs, 30.0, 2, &sanity).is_err());
    }
}
