//! Выравнивание через whisper.cpp
//!
//! Аудио приводится к 16 кГц моно, `whisper-cli` запускается с разбиением по
//! словам и JSON выводом. Куски слов без ведущего пробела склеиваются обратно,
//! распознанные слова сопоставляются со словами эталона один к одному.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;

use crate::align::{tokenize_reference, Aligner};
use crate::config::AlignerConfig;
use crate::error::{ReelSyncError, Result, TurnError};
use crate::types::WordTimestamp;
use crate::utils::ffmpeg;

#[derive(Debug, Deserialize)]
struct WhisperOutput {
    #[serde(default)]
    transcription: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    offsets: WhisperOffsets,
    text: String,
}

/// Смещения в миллисекундах
#[derive(Debug, Deserialize)]
struct WhisperOffsets {
    from: u64,
    to: u64,
}

pub struct WhisperCliAligner {
    config: AlignerConfig,
    model: PathBuf,
}

impl WhisperCliAligner {
    pub fn new(config: AlignerConfig) -> Result<Self> {
        let model = config.whisper_model.clone().ok_or_else(|| {
            ReelSyncError::Configuration("aligner.whisper_model is required for the whisper_cli backend".to_string())
        })?;
        Ok(Self { config, model })
    }

    async fn transcribe(&self, audio_path: &Path) -> Result<String> {
        let work = tempfile::tempdir()?;
        let wav = work.path().join("input.wav");

        let convert_args: [&OsStr; 9] = [
            "-i".as_ref(),
            audio_path.as_os_str(),
            "-ar".as_ref(),
            "16000".as_ref(),
            "-ac".as_ref(),
            "1".as_ref(),
            "-c:a".as_ref(),
            "pcm_s16le".as_ref(),
            wav.as_os_str(),
        ];
        ffmpeg::run_ffmpeg_command(convert_args).await?;

        let output_base = work.path().join("words");
        let args: [&OsStr; 12] = [
            "-m".as_ref(),
            self.model.as_os_str(),
            "-f".as_ref(),
            wav.as_os_str(),
            "-l".as_ref(),
            OsStr::new(&self.config.language),
            "-ml".as_ref(),
            "1".as_ref(),
            "-sow".as_ref(),
            "-oj".as_ref(),
            "-of".as_ref(),
            output_base.as_os_str(),
        ];
        ffmpeg::run_checked(&self.config.whisper_binary, args).await?;

        let json_path = output_base.with_extension("json");
        Ok(tokio::fs::read_to_string(&json_path).await?)
    }
}

/// Склеить куски слов и отбросить знаки препинания, продлив предыдущее слово
fn merge_pieces(segments: &[WhisperSegment]) -> Vec<WordTimestamp> {
    let mut words: Vec<WordTimestamp> = Vec::new();
    for segment in segments {
        let text = segment.text.as_str();
        if text.trim().is_empty() {
            continue;
        }
        let start = segment.offsets.from as f64 / 1000.0;
        let end = (segment.offsets.to.max(segment.offsets.from)) as f64 / 1000.0;
        let continues_word = !text.starts_with(char::is_whitespace);
        let has_alnum = text.chars().any(char::is_alphanumeric);

        if continues_word || !has_alnum {
            if let Some(last) = words.last_mut() {
                last.text.push_str(text.trim());
                last.end_seconds = last.end_seconds.max(end);
                continue;
            }
        }
        if has_alnum {
            words.push(WordTimestamp::new(text.trim(), start, end));
        }
    }

    // метки whisper могут перекрываться на границах слов
    let mut previous_end = 0.0_f64;
    for word in &mut words {
        word.start_seconds = word.start_seconds.max(previous_end);
        word.end_seconds = word.end_seconds.max(word.start_seconds);
        previous_end = word.end_seconds;
    }
    words
}

/// Разобрать JSON whisper.cpp и сопоставить слова с эталоном
pub fn pair_with_reference(json: &str, reference: &[String]) -> std::result::Result<Vec<WordTimestamp>, TurnError> {
    let output: WhisperOutput = serde_json::from_str(json)
        .map_err(|e| TurnError::alignment(format!("failed to parse whisper output: {}", e)))?;
    let recognized = merge_pieces(&output.transcription);

    if recognized.is_empty() {
        return Err(TurnError::alignment("whisper recognized no words"));
    }
    if recognized.len() != reference.len() {
        return Err(TurnError::alignment(format!(
            "reference has {} words, whisper recognized {}",
            reference.len(),
            recognized.len()
        )));
    }

    Ok(recognized
        .into_iter()
        .zip(reference)
        .map(|(word, text)| WordTimestamp::new(text.clone(), word.start_seconds, word.end_seconds))
        .collect())
}

#[async_trait]
impl Aligner for WhisperCliAligner {
    fn name(&self) -> &'static str {
        "whisper_cli"
    }

    fn is_available(&self) -> bool {
        ffmpeg::is_installed(&self.config.whisper_binary) && ffmpeg::check_ffmpeg_installed() && self.model.exists()
    }

    async fn align(&self, audio_path: &Path, reference_text: &str) -> std::result::Result<Vec<WordTimestamp>, TurnError> {
        let reference = tokenize_reference(reference_text);
        if reference.is_empty() {
            return Err(TurnError::alignment("reference text contains no words"));
        }

        let json = self
            .transcribe(audio_path)
            .await
            .map_err(|e| TurnError::alignment(format!("whisper failed: {}", e)))?;
        pair_with_reference(&json, &reference)
    }
}
