//! Выравнивание слов по аудио
//!
//! Текст реплики известен заранее, поэтому выравниватель не распознает речь,
//! а расставляет метки для слов эталонного текста. Результат всегда содержит
//! ровно столько меток, сколько слов в эталоне.

pub mod proportional;
pub mod whisper;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{AlignerBackend, AlignerConfig};
use crate::error::{ReelSyncError, Result, TurnError};
use crate::tts::{prepare_text_for_tts, strip_direction_tags};
use crate::types::WordTimestamp;

pub use proportional::ProportionalAligner;
pub use whisper::WhisperCliAligner;

/// Выравниватель слов
#[async_trait]
pub trait Aligner: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_available(&self) -> bool;

    /// Метки слов `reference_text` относительно начала `audio_path`
    async fn align(&self, audio_path: &Path, reference_text: &str) -> std::result::Result<Vec<WordTimestamp>, TurnError>;
}

/// Разбить эталонный текст на слова
///
/// Пометки в квадратных скобках не произносятся и удаляются. Токены без
/// единой буквы или цифры (тире, многоточия) словами не считаются.
pub fn tokenize_reference(text: &str) -> Vec<String> {
    strip_direction_tags(&prepare_text_for_tts(text))
        .split_whitespace()
        .filter(|token| token.chars().any(char::is_alphanumeric))
        .map(str::to_string)
        .collect()
}

/// Проверить результат выравнивания против эталона
pub fn verify_alignment(reference: &[String], words: &[WordTimestamp]) -> std::result::Result<(), TurnError> {
    if words.is_empty() {
        return Err(TurnError::alignment("aligner produced no words"));
    }
    if words.len() != reference.len() {
        return Err(TurnError::alignment(format!(
            "reference has {} words, aligner returned {}",
            reference.len(),
            words.len()
        )));
    }
    let mut previous_end = 0.0;
    for (i, word) in words.iter().enumerate() {
        if !(word.start_seconds.is_finite() && word.end_seconds.is_finite()) {
            return Err(TurnError::alignment(format!("word {} has a non-finite timestamp", i)));
        }
        if word.start_seconds > word.end_seconds {
            return Err(TurnError::alignment(format!(
                "word {} ('{}') ends before it starts",
                i, word.text
            )));
        }
        if word.start_seconds + 1e-9 < previous_end {
            return Err(TurnError::alignment(format!(
                "word {} ('{}') overlaps the previous word",
                i, word.text
            )));
        }
        previous_end = word.end_seconds;
    }
    Ok(())
}

/// Выбрать выравниватель по конфигурации
pub fn build_aligner(config: &AlignerConfig) -> Result<Arc<dyn Aligner>> {
    let aligner: Arc<dyn Aligner> = match config.backend {
        AlignerBackend::Proportional => Arc::new(ProportionalAligner::new(config.clone())),
        AlignerBackend::WhisperCli => {
            let aligner = WhisperCliAligner::new(config.clone())?;
            if !aligner.is_available() {
                return Err(ReelSyncError::Configuration(format!(
                    "whisper binary '{}' or ffmpeg not found in PATH",
                    config.whisper_binary
                )));
            }
            Arc::new(aligner)
        }
    };
    log::info!("Using {} aligner", aligner.name());
    Ok(aligner)
}
