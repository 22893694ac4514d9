//! # Типы конвейера
//!
//! Общие структуры данных, которые передаются между синтезом, выравниванием,
//! сведением временной шкалы и построением субтитров.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::TurnError;

/// Провайдер синтеза речи
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Системный голос ОС (`say` на macOS, `espeak-ng` на остальных)
    #[serde(alias = "mac_say", alias = "local")]
    LocalOs,
    /// OpenAI TTS
    #[serde(alias = "openai")]
    CloudProviderA,
    /// ElevenLabs
    #[serde(alias = "elevenlabs")]
    CloudProviderB,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalOs => "local_os",
            Self::CloudProviderA => "cloud_provider_a",
            Self::CloudProviderB => "cloud_provider_b",
        }
    }

    pub fn all() -> [Provider; 3] {
        [Self::LocalOs, Self::CloudProviderA, Self::CloudProviderB]
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Одна реплика диалога
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DialogueTurn {
    pub speaker: String,
    pub text: String,
    pub order_index: usize,
}

impl DialogueTurn {
    pub fn new(order_index: usize, speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
            order_index,
        }
    }
}

/// Привязка голоса к говорящему
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoiceBinding {
    pub speaker: String,
    pub provider: Provider,
    pub provider_voice_id: String,
}

impl VoiceBinding {
    pub fn new(speaker: impl Into<String>, provider: Provider, voice_id: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            provider,
            provider_voice_id: voice_id.into(),
        }
    }
}

/// Карта говорящий -> голос
pub type VoiceMap = HashMap<String, VoiceBinding>;

/// Собрать карту голосов из списка привязок
pub fn voice_map(bindings: impl IntoIterator<Item = VoiceBinding>) -> VoiceMap {
    bindings
        .into_iter()
        .map(|binding| (binding.speaker.clone(), binding))
        .collect()
}

/// Временная метка одного слова
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WordTimestamp {
    pub text: String,
    pub start_seconds: f64,
    pub end_seconds: f64,
    /// Говорящий; заполняется при сведении шкалы
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

impl WordTimestamp {
    pub fn new(text: impl Into<String>, start_seconds: f64, end_seconds: f64) -> Self {
        Self {
            text: text.into(),
            start_seconds,
            end_seconds,
            speaker: None,
        }
    }

    pub fn duration(&self) -> f64 {
        self.end_seconds - self.start_seconds
    }
}

/// Результат обработки одной реплики
///
/// Метки в `words` отсчитываются от начала аудио этой реплики.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResult {
    pub order_index: usize,
    pub speaker: String,
    pub audio_path: Option<PathBuf>,
    pub nominal_duration_seconds: f64,
    pub words: Vec<WordTimestamp>,
    pub error: Option<TurnError>,
}

impl TurnResult {
    pub fn failed(turn: &DialogueTurn, error: TurnError) -> Self {
        Self {
            order_index: turn.order_index,
            speaker: turn.speaker.clone(),
            audio_path: None,
            nominal_duration_seconds: 0.0,
            words: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Положение реплики на общей шкале
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnSpan {
    pub order_index: usize,
    pub speaker: String,
    pub start_seconds: f64,
    pub end_seconds: f64,
}

/// Сведенная временная шкала всего задания
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciledTimeline {
    pub combined_audio_path: PathBuf,
    pub true_duration_seconds: f64,
    /// Отношение фактической длительности к сумме номинальных
    pub scale_factor: f64,
    pub words: Vec<WordTimestamp>,
    pub turns: Vec<TurnSpan>,
    /// Индексы реплик, исключенных из-за ошибок
    pub dropped_turns: Vec<usize>,
}

/// Окно показа субтитра
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaptionEvent {
    pub display_text: String,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub animation_seed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

impl CaptionEvent {
    pub fn duration(&self) -> f64 {
        self.end_seconds - self.start_seconds
    }

    /// Цвет подсветки из палитры, детерминированный по `animation_seed`
    pub fn highlight_color<'a>(&self, palette: &'a [String]) -> Option<&'a str> {
        if palette.is_empty() {
            return None;
        }
        let index = (self.animation_seed % palette.len() as u64) as usize;
        Some(palette[index].as_str())
    }

    /// Пиковый масштаб "прыжка" слова в диапазоне `[1.0, 1.0 + max_extra]`
    pub fn bounce_scale(&self, max_extra: f64) -> f64 {
        let unit = (self.animation_seed >> 11) as f64 / (1u64 << 53) as f64;
        1.0 + unit * max_extra.max(0.0)
    }
}

impl From<&CaptionEvent> for WordTimestamp {
    fn from(event: &CaptionEvent) -> Self {
        Self {
            text: event.display_text.clone(),
            start_seconds: event.start_seconds,
            end_seconds: event.end_seconds,
            speaker: event.speaker.clone(),
        }
    }
}
