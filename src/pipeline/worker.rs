//! Обработка одной реплики: синтез, затем выравнивание
//!
//! Работник никогда не возвращает ошибку: любой сбой попадает в
//! `TurnResult.error`. Метки слов отсчитываются от начала аудио реплики.

use std::path::PathBuf;
use std::sync::Arc;

use crate::align::{tokenize_reference, verify_alignment, Aligner};
use crate::config::SanityConfig;
use crate::error::TurnError;
use crate::tts::{check_duration_sanity, synthesize, SynthesisCache, SynthesizerSet};
use crate::types::{DialogueTurn, TurnResult, VoiceBinding, WordTimestamp};

/// Все, что нужно работнику; общий для всех реплик задания
#[derive(Clone)]
pub struct TurnContext {
    pub synthesizers: SynthesizerSet,
    pub aligner: Arc<dyn Aligner>,
    /// Каталог промежуточных файлов задания
    pub job_dir: PathBuf,
    pub cache: Option<Arc<SynthesisCache>>,
    pub sanity: SanityConfig,
}

impl TurnContext {
    pub fn new(synthesizers: SynthesizerSet, aligner: Arc<dyn Aligner>, job_dir: impl Into<PathBuf>) -> Self {
        Self {
            synthesizers,
            aligner,
            job_dir: job_dir.into(),
            cache: None,
            sanity: SanityConfig::default(),
        }
    }

    pub fn with_cache(mut self, cache: Option<Arc<SynthesisCache>>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_sanity(mut self, sanity: SanityConfig) -> Self {
        self.sanity = sanity;
        self
    }

    /// Путь к аудио реплики: `turn_<order_index>.<ext>`
    pub fn turn_audio_path(&self, order_index: usize, extension: &str) -> PathBuf {
        self.job_dir.join(format!("turn_{:04}.{}", order_index, extension))
    }
}

/// Подрезать метки, выходящие за номинальную длительность
pub fn clamp_to_duration(words: &mut [WordTimestamp], duration: f64) -> usize {
    let mut clamped = 0;
    for word in words.iter_mut() {
        if word.end_seconds > duration {
            word.end_seconds = duration;
            word.start_seconds = word.start_seconds.min(duration);
            clamped += 1;
        }
    }
    clamped
}

async fn run_turn(
    turn: &DialogueTurn,
    voice: &VoiceBinding,
    ctx: &TurnContext,
) -> Result<(PathBuf, f64, Vec<WordTimestamp>), TurnError> {
    let synthesizer = ctx.synthesizers.get(voice.provider).ok_or_else(|| {
        TurnError::synthesis(voice.provider, "provider is not configured for this job")
    })?;

    let output_path = ctx.turn_audio_path(turn.order_index, synthesizer.file_extension());
    let audio = synthesize(
        synthesizer.as_ref(),
        &turn.text,
        voice,
        &output_path,
        ctx.cache.as_deref(),
    )
    .await?;

    let reference = tokenize_reference(&turn.text);
    check_duration_sanity(
        voice.provider,
        audio.nominal_duration_seconds,
        reference.len(),
        &ctx.sanity,
    )?;

    let mut words = ctx.aligner.align(&audio.audio_path, &turn.text).await?;
    verify_alignment(&reference, &words)?;

    let clamped = clamp_to_duration(&mut words, audio.nominal_duration_seconds);
    if clamped > 0 {
        log::warn!(
            "Turn {}: clamped {} word(s) to the audio duration {:.3}s",
            turn.order_index,
            clamped,
            audio.nominal_duration_seconds
        );
    }

    Ok((audio.audio_path, audio.nominal_duration_seconds, words))
}

/// Синтезировать и выровнять одну реплику
pub async fn process_turn(turn: &DialogueTurn, voice: Option<&VoiceBinding>, ctx: &TurnContext) -> TurnResult {
    let voice = match voice {
        Some(voice) => voice,
        None => {
            log::error!("Turn {}: no voice for speaker '{}'", turn.order_index, turn.speaker);
            return TurnResult::failed(turn, TurnError::unbound_voice(&turn.speaker));
        }
    };

    match run_turn(turn, voice, ctx).await {
        Ok((audio_path, nominal_duration_seconds, words)) => {
            log::info!(
                "Turn {} ({}): {:.3}s, {} words",
                turn.order_index,
                turn.speaker,
                nominal_duration_seconds,
                words.len()
            );
            TurnResult {
                order_index: turn.order_index,
                speaker: turn.speaker.clone(),
                audio_path: Some(audio_path),
                nominal_duration_seconds,
                words,
                error: None,
            }
        }
        Err(error) => {
            log::error!("Turn {} ({}) failed: {}", turn.order_index, turn.speaker, error);
            TurnResult::failed(turn, error)
        }
    }
}
