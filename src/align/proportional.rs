//! Выравнивание по участку речи
//!
//! Находит в аудио участок от первого до последнего звучащего окна и делит
//! его между словами пропорционально весу `chars^exp`. После запятой и конца
//! предложения резервируется короткая пауза.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::align::{tokenize_reference, Aligner};
use crate::config::AlignerConfig;
use crate::error::TurnError;
use crate::media::audio::{decode_mono, detect_speech_region};
use crate::types::WordTimestamp;

/// Паузы не занимают больше этой доли участка речи
const MAX_PAUSE_SHARE: f64 = 0.5;

pub struct ProportionalAligner {
    config: AlignerConfig,
}

impl ProportionalAligner {
    pub fn new(config: AlignerConfig) -> Self {
        Self { config }
    }
}

fn pause_after(token: &str, config: &AlignerConfig) -> f64 {
    match token.trim_end_matches(['"', '\'', ')', '”', '’']).chars().last() {
        Some('.') | Some('!') | Some('?') => config.sentence_pause_seconds,
        Some(',') | Some(';') | Some(':') => config.comma_pause_seconds,
        _ => 0.0,
    }
}

fn weight(token: &str, exponent: f64) -> f64 {
    let chars = token.chars().filter(|c| c.is_alphanumeric()).count().max(1);
    (chars as f64).powf(exponent)
}

/// Распределить слова по участку `[start, end]`
pub fn distribute_words(tokens: &[String], region: (f64, f64), config: &AlignerConfig) -> Vec<WordTimestamp> {
    let (start, end) = region;
    let span = (end - start).max(0.0);
    if tokens.is_empty() {
        return Vec::new();
    }

    // после последнего слова пауза не нужна
    let mut pauses: Vec<f64> = tokens.iter().map(|t| pause_after(t, config)).collect();
    if let Some(last) = pauses.last_mut() {
        *last = 0.0;
    }
    let total_pause: f64 = pauses.iter().sum();
    let pause_budget = span * MAX_PAUSE_SHARE;
    if total_pause > pause_budget && total_pause > 0.0 {
        let shrink = pause_budget / total_pause;
        pauses.iter_mut().for_each(|p| *p *= shrink);
    }
    let total_pause: f64 = pauses.iter().sum();

    let weights: Vec<f64> = tokens.iter().map(|t| weight(t, weight_exponent(config))).collect();
    let total_weight: f64 = weights.iter().sum();
    let speech_time = (span - total_pause).max(0.0);

    let mut words = Vec::with_capacity(tokens.len());
    let mut cursor = start;
    for (i, token) in tokens.iter().enumerate() {
        let duration = speech_time * weights[i] / total_weight;
        let word_end = if i + 1 == tokens.len() { end } else { (cursor + duration).min(end) };
        words.push(WordTimestamp::new(token.clone(), cursor, word_end));
        cursor = (word_end + pauses[i]).min(end);
    }
    words
}

fn weight_exponent(config: &AlignerConfig) -> f64 {
    if config.weight_exponent.is_finite() && config.weight_exponent > 0.0 {
        config.weight_exponent
    } else {
        1.0
    }
}

#[async_trait]
impl Aligner for ProportionalAligner {
    fn name(&self) -> &'static str {
        "proportional"
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn align(&self, audio_path: &Path, reference_text: &str) -> std::result::Result<Vec<WordTimestamp>, TurnError> {
        let tokens = tokenize_reference(reference_text);
        if tokens.is_empty() {
            return Err(TurnError::alignment("reference text contains no words"));
        }

        let path: PathBuf = audio_path.to_path_buf();
        let threshold = self.config.silence_rms_threshold;
        let window_ms = self.config.analysis_window_ms;
        let region = tokio::task::spawn_blocking(move || {
            decode_mono(&path).map(|audio| detect_speech_region(&audio, threshold, window_ms))
        })
        .await
        .map_err(|e| TurnError::alignment(format!("alignment task failed: {}", e)))?
        .map_err(|e| TurnError::alignment(format!("failed to decode audio: {}", e)))?;

        let region = region.ok_or_else(|| TurnError::alignment("no speech detected in audio"))?;
        log::debug!(
            "Speech region {:.3}-{:.3}s for {} words in {}",
            region.0,
            region.1,
            tokens.len(),
            audio_path.display()
        );
        Ok(distribute_words(&tokens, region, &self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::audio::test_support::write_tone_wav;

    fn tokens(text: &str) -> Vec<String> {
        tokenize_reference(text)
    }

    #[test]
    fn longer_words_take_longer() {
        let words = distribute_words(&tokens("a extraordinary"), (0.0, 2.0), &AlignerConfig::default());
        assert_eq!(words.len(), 2);
        assert!(words[1].duration() > words[0].duration() * 3.0);
        assert_eq!(words[1].end_seconds, 2.0);
    }

    #[test]
    fn pauses_after_punctuation() {
        let config = AlignerConfig::default();
        let words = distribute_words(&tokens("Good, thanks."), (0.0, 2.0), &config);
        let gap = words[1].start_seconds - words[0].end_seconds;
        assert!((gap - config.comma_pause_seconds).abs() < 1e-9, "gap = {}", gap);
        assert_eq!(words[1].end_seconds, 2.0);
    }

    #[test]
    fn pauses_never_swallow_the_region() {
        let words = distribute_words(&tokens("A. B. C. D."), (0.0, 0.4), &AlignerConfig::default());
        let speech: f64 = words.iter().map(|w| w.duration()).sum();
        assert!(speech >= 0.2 - 1e-9);
        for pair in words.windows(2) {
            assert!(pair[0].end_seconds <= pair[1].start_seconds);
        }
    }

    #[tokio::test]
    async fn single_word_spans_speech_region() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("turn_0000.wav");
        write_tone_wav(&path, 16000, 0.2, 0.6, 0.4);

        let aligner = ProportionalAligner::new(AlignerConfig::default());
        let words = aligner.align(&path, "Hi.").await.unwrap();
        assert_eq!(words.len(), 1);
        assert!((words[0].start_seconds - 0.2).abs() <= 0.02);
        assert!((words[0].end_seconds - 0.8).abs() <= 0.02);
    }

    #[tokio::test]
    async fn silent_audio_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("silence.wav");
        write_tone_wav(&path, 16000, 1.0, 0.0, 0.0);

        let aligner = ProportionalAligner::new(AlignerConfig::default());
        let err = aligner.align(&path, "Hello").await.unwrap_err();
        assert_eq!(err, TurnError::alignment("no speech detected in audio"));
    }
}
