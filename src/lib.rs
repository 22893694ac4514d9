//! Основной файл библиотеки reel-sync
//!
//! Библиотека озвучивает диалог несколькими голосами, выравнивает слова по
//! аудио, сводит реплики в одну дорожку с общей временной шкалой и строит по
//! ней окна субтитров. Ход работы сообщается наблюдателям прогресса.

pub mod align;
pub mod captions;
pub mod config;
pub mod error;
pub mod media;
pub mod notification;
pub mod pipeline;
pub mod progress;
pub mod script;
pub mod tts;
pub mod types;
pub mod utils;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use crate::config::ReelSyncConfig;
pub use crate::error::{ReelSyncError, Result, TurnError};
pub use crate::types::{
    voice_map, CaptionEvent, DialogueTurn, Provider, ReconciledTimeline, TurnResult, TurnSpan, VoiceBinding,
    VoiceMap, WordTimestamp,
};

use crate::align::{build_aligner, Aligner};
use crate::media::concat::{AudioJoiner, DefaultJoiner};
use crate::pipeline::{check_scale_factor, partition_results, reconcile, run_batch, TurnContext};
use crate::progress::{millis, PipelineEvent, ProcessStep, ProgressObserver, ProgressReporter, ProgressTracker};
use crate::tts::{SynthesisCache, SynthesizerSet};
use crate::utils::temp::JobWorkspace;

/// Результат одного задания
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutput {
    pub job_id: Uuid,
    /// Каталог промежуточных файлов задания
    pub job_dir: PathBuf,
    pub timeline: ReconciledTimeline,
    pub captions: Vec<CaptionEvent>,
    /// Результаты всех реплик, включая неудачные
    pub turn_results: Vec<TurnResult>,
}

/// Основная структура для работы с библиотекой
pub struct ReelSync {
    config: ReelSyncConfig,
    synthesizers: SynthesizerSet,
    aligner: Arc<dyn Aligner>,
    joiner: Arc<dyn AudioJoiner>,
    cache: Option<Arc<SynthesisCache>>,
    progress_tracker: Arc<ProgressTracker>,
    /// Токен текущих заданий; после отмены заменяется новым
    cancel: Mutex<CancellationToken>,
}

/// Заменяет отмененный токен движка после завершения задания
struct CancelReset<'a>(&'a Mutex<CancellationToken>);

impl Drop for CancelReset<'_> {
    fn drop(&mut self) {
        let mut token = self.0.lock();
        if token.is_cancelled() {
            log::debug!("Job cancelled, next job gets a fresh cancellation token");
            *token = CancellationToken::new();
        }
    }
}

impl ReelSync {
    /// Создать экземпляр со стандартными провайдерами и выравнивателем
    pub fn new(config: ReelSyncConfig) -> Result<Self> {
        config.validate()?;
        let synthesizers = SynthesizerSet::from_config(&config)?;
        let aligner = build_aligner(&config.aligner)?;
        Self::with_components(config, synthesizers, aligner, Arc::new(DefaultJoiner::default()))
    }

    /// Создать экземпляр с собственными провайдерами
    pub fn with_components(
        config: ReelSyncConfig,
        synthesizers: SynthesizerSet,
        aligner: Arc<dyn Aligner>,
        joiner: Arc<dyn AudioJoiner>,
    ) -> Result<Self> {
        config.validate()?;
        let cache = SynthesisCache::from_config(&config.cache)?.map(Arc::new);
        Ok(Self {
            config,
            synthesizers,
            aligner,
            joiner,
            cache,
            progress_tracker: Arc::new(ProgressTracker::new()),
            cancel: Mutex::new(CancellationToken::new()),
        })
    }

    /// Установить репортер прогресса
    pub fn with_progress_reporter(self, reporter: Box<dyn ProgressReporter>) -> Self {
        self.progress_tracker.set_reporter(reporter);
        self
    }

    /// Добавить наблюдателя прогресса
    pub fn add_observer(&self, observer: Box<dyn ProgressObserver>) -> usize {
        self.progress_tracker.add_observer(observer)
    }

    pub fn progress_tracker(&self) -> Arc<ProgressTracker> {
        self.progress_tracker.clone()
    }

    /// Токен отмены текущих и ближайшего задания
    ///
    /// После `cancel()` выполняемые задания не запускают новых реплик. Когда
    /// отмененное задание завершается, движок получает новый токен, и
    /// следующие вызовы `process` работают как обычно.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.lock().clone()
    }

    pub fn config(&self) -> &ReelSyncConfig {
        &self.config
    }

    /// Озвучить диалог и построить шкалу и субтитры
    pub async fn process(&self, turns: &[DialogueTurn], voices: &VoiceMap) -> Result<PipelineOutput> {
        let job_cancel = self.cancel.lock().child_token();
        let _reset = CancelReset(&self.cancel);
        self.process_with_cancel(turns, voices, &job_cancel).await
    }

    /// То же, что `process`, но с собственным токеном отмены задания
    pub async fn process_with_cancel(
        &self,
        turns: &[DialogueTurn],
        voices: &VoiceMap,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutput> {
        if turns.is_empty() {
            return Err(ReelSyncError::Script("dialogue has no turns".to_string()));
        }
        log::info!("Starting reel-sync job for {} turns", turns.len());
        let tracker = self.progress_tracker.clone();

        let mut workspace = JobWorkspace::create(&self.config.work_dir, true)?;
        let ctx = TurnContext::new(self.synthesizers.clone(), self.aligner.clone(), workspace.dir())
            .with_cache(self.cache.clone())
            .with_sanity(self.config.sanity.clone());

        // 1. Синтез и выравнивание реплик
        tracker.set_step(ProcessStep::SpeechGeneration);
        tracker.update_step_progress(0.0, Some("Начало генерации речи".to_string()));
        let turn_results = run_batch(
            turns,
            voices,
            &ctx,
            &self.config.scheduler,
            cancel,
            Some(tracker.clone()),
        )
        .await?;

        let failed = turn_results.iter().filter(|r| !r.is_ok()).count();
        if failed > 0 && !self.config.allow_partial {
            log::error!("{} of {} turns failed and partial results are disabled", failed, turn_results.len());
            return Err(ReelSyncError::PartialFailure {
                failed,
                total: turn_results.len(),
            });
        }

        // 2. Склейка и сведение шкалы
        tracker.set_step(ProcessStep::Reconciliation);
        tracker.update_step_progress(0.0, Some("Объединение аудиофайлов".to_string()));
        let started = Instant::now();
        let inputs: Vec<PathBuf> = partition_results(&turn_results)
            .0
            .iter()
            .filter_map(|r| r.audio_path.clone())
            .collect();
        let output_path = workspace.combined_audio_path(&self.joiner.output_extension(&inputs));
        let timeline = reconcile(&turn_results, &output_path, self.joiner.as_ref()).await?;
        check_scale_factor(timeline.scale_factor, self.config.sanity.max_scale_deviation);
        tracker.emit(
            PipelineEvent::ReconciliationCompleted {
                true_duration_seconds: timeline.true_duration_seconds,
                word_count: timeline.words.len(),
                dropped_turns: timeline.dropped_turns.clone(),
                elapsed_ms: millis(started.elapsed()),
            },
            100.0,
            Some("Сведение шкалы завершено".to_string()),
        );

        // 3. Окна субтитров
        tracker.set_step(ProcessStep::CaptionWindowing);
        let started = Instant::now();
        let windows =
            captions::window_with_stats(&timeline.words, self.config.captions.min_clip_duration_seconds)?;
        tracker.emit(
            PipelineEvent::WindowingCompleted {
                event_count: windows.events.len(),
                merged_words: windows.merged_words,
                elapsed_ms: millis(started.elapsed()),
            },
            100.0,
            Some("Субтитры готовы".to_string()),
        );
        tracker.complete();

        workspace.keep();
        log::info!(
            "Job {} finished: {:.3}s of audio, {} caption events",
            workspace.job_id(),
            timeline.true_duration_seconds,
            windows.events.len()
        );

        Ok(PipelineOutput {
            job_id: workspace.job_id(),
            job_dir: workspace.dir().to_path_buf(),
            timeline,
            captions: windows.events,
            turn_results,
        })
    }
}
