//! Модуль конфигурации библиотеки reel-sync
//!
//! Вся конфигурация передается в компоненты явно. Файл конфигурации в JSON
//! может задавать любое подмножество полей, остальные берутся по умолчанию.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ReelSyncError, Result};
use crate::types::Provider;

/// Модель TTS для использования с OpenAI API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TtsModel {
    /// Стандартная модель
    #[default]
    Standard,
    /// Модель высокого качества
    HighDefinition,
}

impl TtsModel {
    /// Получить строковое представление модели
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "tts-1",
            Self::HighDefinition => "tts-1-hd",
        }
    }
}

/// Настройки OpenAI TTS
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: TtsModel,
    pub base_url: String,
    pub speed: f32,
    pub response_format: String,
    pub request_timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: TtsModel::default(),
            base_url: "https://api.openai.com/v1".to_string(),
            speed: 1.0,
            response_format: "mp3".to_string(),
            request_timeout_secs: 60,
        }
    }
}

/// Настройки ElevenLabs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElevenLabsConfig {
    pub api_key: String,
    pub model_id: String,
    pub output_format: String,
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for ElevenLabsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model_id: "eleven_multilingual_v2".to_string(),
            output_format: "mp3_44100_128".to_string(),
            base_url: "https://api.elevenlabs.io/v1".to_string(),
            request_timeout_secs: 60,
        }
    }
}

/// Движок системного голоса
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LocalVoiceEngine {
    /// macOS `say`
    Say,
    /// `espeak-ng`
    EspeakNg,
}

impl Default for LocalVoiceEngine {
    fn default() -> Self {
        if cfg!(target_os = "macos") {
            Self::Say
        } else {
            Self::EspeakNg
        }
    }
}

/// Настройки системного голоса
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalVoiceConfig {
    pub engine: LocalVoiceEngine,
    /// Путь к исполняемому файлу, если он не в PATH
    pub binary: Option<String>,
    pub sample_rate: u32,
}

impl Default for LocalVoiceConfig {
    fn default() -> Self {
        Self {
            engine: LocalVoiceEngine::default(),
            binary: None,
            sample_rate: 22050,
        }
    }
}

/// Способ выравнивания слов
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AlignerBackend {
    /// Распределение слов по найденному участку речи
    #[default]
    Proportional,
    /// whisper.cpp с пословными метками
    WhisperCli,
}

/// Настройки выравнивания
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignerConfig {
    pub backend: AlignerBackend,
    pub whisper_binary: String,
    pub whisper_model: Option<PathBuf>,
    pub language: String,
    /// Порог RMS (0.0 - 1.0), ниже которого окно считается тишиной
    pub silence_rms_threshold: f32,
    pub analysis_window_ms: u32,
    pub comma_pause_seconds: f64,
    pub sentence_pause_seconds: f64,
    pub weight_exponent: f64,
}

impl Default for AlignerConfig {
    fn default() -> Self {
        Self {
            backend: AlignerBackend::default(),
            whisper_binary: "whisper-cli".to_string(),
            whisper_model: None,
            language: "en".to_string(),
            silence_rms_threshold: 0.01,
            analysis_window_ms: 20,
            comma_pause_seconds: 0.2,
            sentence_pause_seconds: 0.4,
            weight_exponent: 0.75,
        }
    }
}

/// Настройки пула параллельной обработки реплик
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Максимальное количество одновременно обрабатываемых реплик
    pub max_parallel: usize,
    /// Лимит времени на одну реплику (синтез + выравнивание)
    pub turn_timeout_secs: f64,
    /// Дополнительные ограничения параллелизма по провайдерам
    pub provider_limits: HashMap<Provider, usize>,
}

impl SchedulerConfig {
    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.turn_timeout_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let provider_limits = HashMap::from([
            (Provider::LocalOs, 10),
            (Provider::CloudProviderA, 3),
            (Provider::CloudProviderB, 2),
        ]);
        Self {
            max_parallel: 4,
            turn_timeout_secs: 120.0,
            provider_limits,
        }
    }
}

/// Политика повторов запросов к облачным провайдерам
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
            max_delay_ms: 60_000,
        }
    }
}

/// Стиль субтитров
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionStyle {
    /// Слова короче этого порога сливаются с соседним окном
    pub min_clip_duration_seconds: f64,
    pub highlight_palette: Vec<String>,
    pub bounce_extra_scale: f64,
}

impl Default for CaptionStyle {
    fn default() -> Self {
        Self {
            min_clip_duration_seconds: 0.04,
            highlight_palette: ["#FF4500", "#FFA500", "#FFD700", "#32CD32", "#1E90FF", "#9370DB"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            bounce_extra_scale: 0.15,
        }
    }
}

/// Настройки кэша синтезированных реплик
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub dir: Option<PathBuf>,
    /// Максимальный размер кэша в байтах
    pub max_size_bytes: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: None,
            max_size_bytes: Some(1024 * 1024 * 1024), // 1 GB
        }
    }
}

/// Границы правдоподобия длительностей
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SanityConfig {
    pub min_seconds_per_word: f64,
    pub max_seconds_per_word: f64,
    /// Допустимое отклонение общего коэффициента масштаба от 1.0
    pub max_scale_deviation: f64,
}

impl Default for SanityConfig {
    fn default() -> Self {
        Self {
            min_seconds_per_word: 0.05,
            max_seconds_per_word: 3.0,
            max_scale_deviation: 0.25,
        }
    }
}

/// Конфигурация библиотеки
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReelSyncConfig {
    pub openai: OpenAiConfig,
    pub elevenlabs: ElevenLabsConfig,
    pub local_voice: LocalVoiceConfig,
    pub aligner: AlignerConfig,
    pub scheduler: SchedulerConfig,
    pub retry: RetryPolicy,
    pub captions: CaptionStyle,
    pub cache: CacheConfig,
    pub sanity: SanityConfig,
    /// Каталог для промежуточных файлов заданий
    pub work_dir: PathBuf,
    /// Продолжать сведение, если часть реплик не удалась
    pub allow_partial: bool,
}

impl Default for ReelSyncConfig {
    fn default() -> Self {
        Self {
            openai: OpenAiConfig::default(),
            elevenlabs: ElevenLabsConfig::default(),
            local_voice: LocalVoiceConfig::default(),
            aligner: AlignerConfig::default(),
            scheduler: SchedulerConfig::default(),
            retry: RetryPolicy::default(),
            captions: CaptionStyle::default(),
            cache: CacheConfig::default(),
            sanity: SanityConfig::default(),
            work_dir: std::env::temp_dir().join("reel-sync"),
            allow_partial: true,
        }
    }
}

impl ReelSyncConfig {
    /// Загрузить конфигурацию из JSON файла
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ReelSyncError::FileNotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: ReelSyncConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Подставить ключи API и каталог из переменных окружения
    pub fn apply_env(mut self) -> Self {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.trim().is_empty() {
                self.openai.api_key = key;
            }
        }
        if let Ok(key) = std::env::var("ELEVEN_API") {
            if !key.trim().is_empty() {
                self.elevenlabs.api_key = key;
            }
        }
        if let Ok(dir) = std::env::var("REEL_SYNC_WORK_DIR") {
            if !dir.trim().is_empty() {
                self.work_dir = PathBuf::from(dir);
            }
        }
        self
    }

    /// Проверить значения на допустимость
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_parallel == 0 {
            return Err(ReelSyncError::Configuration(
                "scheduler.max_parallel must be at least 1".to_string(),
            ));
        }
        if let Some((provider, _)) = self.scheduler.provider_limits.iter().find(|(_, limit)| **limit == 0) {
            return Err(ReelSyncError::Configuration(format!(
                "scheduler.provider_limits.{} must be at least 1",
                provider
            )));
        }
        if !(self.scheduler.turn_timeout_secs.is_finite() && self.scheduler.turn_timeout_secs > 0.0) {
            return Err(ReelSyncError::Configuration(
                "scheduler.turn_timeout_secs must be positive".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ReelSyncError::Configuration(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if !(self.captions.min_clip_duration_seconds >= 0.0) {
            return Err(ReelSyncError::Configuration(
                "captions.min_clip_duration_seconds must not be negative".to_string(),
            ));
        }
        if self.sanity.min_seconds_per_word < 0.0
            || self.sanity.max_seconds_per_word <= self.sanity.min_seconds_per_word
        {
            return Err(ReelSyncError::Configuration(
                "sanity bounds must satisfy 0 <= min_seconds_per_word < max_seconds_per_word".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.aligner.silence_rms_threshold) {
            return Err(ReelSyncError::Configuration(
                "aligner.silence_rms_threshold must be within 0.0 - 1.0".to_string(),
            ));
        }
        Ok(())
    }
}
