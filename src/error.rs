//! Модуль обработки ошибок библиотеки reel-sync
//!
//! Ошибки делятся на два уровня: `TurnError` описывает сбой одной реплики и
//! хранится в `TurnResult.error`, `ReelSyncError` описывает сбой всего задания.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Provider;

/// Ошибка обработки одной реплики диалога
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnError {
    /// Провайдер не смог синтезировать речь (после всех повторов)
    ///
    /// `provider` пуст, если для говорящего не задан голос.
    #[error("Synthesis error{}: {reason}", provider_label(.provider))]
    Synthesis {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider: Option<Provider>,
        reason: String,
    },

    /// Выравнивание слов по аудио не удалось
    #[error("Alignment error: {0}")]
    Alignment(String),

    /// Реплика превысила отведенное время
    #[error("Turn timed out after {seconds:.1}s")]
    Timeout { seconds: f64 },

    /// Задание было отменено до запуска реплики
    #[error("Turn cancelled before dispatch")]
    Cancelled,
}

fn provider_label(provider: &Option<Provider>) -> String {
    provider.map(|p| format!(" ({})", p)).unwrap_or_default()
}

impl TurnError {
    pub fn synthesis(provider: Provider, reason: impl Into<String>) -> Self {
        TurnError::Synthesis {
            provider: Some(provider),
            reason: reason.into(),
        }
    }

    /// Для говорящего нет привязки голоса
    pub fn unbound_voice(speaker: &str) -> Self {
        TurnError::Synthesis {
            provider: None,
            reason: format!("no voice binding for speaker '{}'", speaker),
        }
    }

    pub fn alignment(reason: impl Into<String>) -> Self {
        TurnError::Alignment(reason.into())
    }
}

/// Ошибки библиотеки reel-sync
#[derive(Debug, Error)]
pub enum ReelSyncError {
    /// Ошибка HTTP запроса
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Ошибка ввода-вывода
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Ошибка сериализации/десериализации JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Ошибка чтения или записи WAV
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    /// Ошибка конфигурации
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Ошибка обработки аудио
    #[error("Audio processing error: {0}")]
    AudioProcessing(String),

    /// Файл не найден
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Ошибка сценария диалога
    #[error("Script error: {0}")]
    Script(String),

    /// Ни одна реплика не пригодна для сведения
    #[error("Reconciliation error: {0}")]
    Reconciliation(String),

    /// Нарушены инварианты входной временной шкалы
    #[error("Invalid timeline: {0}")]
    InvalidTimeline(String),

    /// Ошибка отдельной реплики, поднятая до уровня задания
    #[error("Turn {order_index} failed: {source}")]
    Turn {
        order_index: usize,
        #[source]
        source: TurnError,
    },

    /// Часть реплик не удалась, а частичный результат запрещен
    #[error("{failed} of {total} turns failed")]
    PartialFailure { failed: usize, total: usize },

    /// Другая ошибка
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<&str> for ReelSyncError {
    fn from(s: &str) -> Self {
        ReelSyncError::Other(anyhow::anyhow!(s.to_string()))
    }
}

impl From<String> for ReelSyncError {
    fn from(s: String) -> Self {
        ReelSyncError::Other(anyhow::anyhow!(s))
    }
}

impl From<symphonia::core::errors::Error> for ReelSyncError {
    fn from(err: symphonia::core::errors::Error) -> Self {
        ReelSyncError::AudioProcessing(err.to_string())
    }
}

/// Тип Result для библиотеки reel-sync
pub type Result<T> = std::result::Result<T, ReelSyncError>;
