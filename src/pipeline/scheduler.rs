//! Параллельная обработка реплик с ограничением пула
//!
//! Каждая реплика запускается отдельной задачей tokio. Задача сначала берет
//! разрешение семафора своего провайдера, затем общего семафора на
//! `max_parallel` мест, и только после этого считается запущенной. Отмена
//! задания действует только на еще не запущенные реплики. Результаты
//! возвращаются в порядке `order_index` независимо от порядка завершения.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::error::{ReelSyncError, Result, TurnError};
use crate::pipeline::worker::{process_turn, TurnContext};
use crate::progress::{millis, PipelineEvent, ProgressTracker};
use crate::types::{DialogueTurn, Provider, TurnResult, VoiceBinding, VoiceMap};
use crate::utils::temp;

struct Permits {
    _provider: Option<OwnedSemaphorePermit>,
    _global: OwnedSemaphorePermit,
}

async fn acquire(
    provider: Option<Arc<Semaphore>>,
    global: Arc<Semaphore>,
) -> std::result::Result<Permits, tokio::sync::AcquireError> {
    // порядок фиксирован: сначала провайдер, потом общий пул
    let provider = match provider {
        Some(semaphore) => Some(semaphore.acquire_owned().await?),
        None => None,
    };
    let global = global.acquire_owned().await?;
    Ok(Permits {
        _provider: provider,
        _global: global,
    })
}

fn provider_semaphores(config: &SchedulerConfig) -> HashMap<Provider, Arc<Semaphore>> {
    config
        .provider_limits
        .iter()
        .map(|(provider, limit)| (*provider, Arc::new(Semaphore::new((*limit).max(1)))))
        .collect()
}

struct Progress {
    tracker: Option<Arc<ProgressTracker>>,
    completed: AtomicUsize,
    total: usize,
}

impl Progress {
    fn percent(&self, completed: usize) -> f32 {
        if self.total == 0 {
            return 100.0;
        }
        completed as f32 / self.total as f32 * 100.0
    }

    fn started(&self, turn: &DialogueTurn, voice: Option<&VoiceBinding>) {
        if let Some(tracker) = &self.tracker {
            let completed = self.completed.load(Ordering::SeqCst);
            tracker.emit(
                PipelineEvent::TurnStarted {
                    order_index: turn.order_index,
                    speaker: turn.speaker.clone(),
                    provider: voice.map(|v| v.provider),
                },
                self.percent(completed),
                Some(format!("Генерация речи: реплика {}", turn.order_index)),
            );
        }
    }

    fn finished(&self, result: &TurnResult, started_at: Instant) {
        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(tracker) = &self.tracker {
            tracker.emit(
                PipelineEvent::TurnCompleted {
                    order_index: result.order_index,
                    speaker: result.speaker.clone(),
                    elapsed_ms: millis(started_at.elapsed()),
                    error: result.error.clone(),
                },
                self.percent(completed),
                Some(format!("Генерация речи: {}/{} реплик", completed, self.total)),
            );
        }
    }
}

/// Обработать все реплики и вернуть результаты в порядке `order_index`
///
/// Сбой отдельной реплики не прерывает остальные и попадает в ее
/// `TurnResult.error`. Ошибка возвращается только при неверных входных данных
/// или сбое самого пула задач.
pub async fn run_batch(
    turns: &[DialogueTurn],
    voices: &VoiceMap,
    ctx: &TurnContext,
    config: &SchedulerConfig,
    cancel: &CancellationToken,
    tracker: Option<Arc<ProgressTracker>>,
) -> Result<Vec<TurnResult>> {
    if config.max_parallel == 0 {
        return Err(ReelSyncError::Configuration(
            "scheduler.max_parallel must be at least 1".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    if let Some(duplicate) = turns.iter().find(|t| !seen.insert(t.order_index)) {
        return Err(ReelSyncError::Configuration(format!(
            "duplicate order_index {} in dialogue",
            duplicate.order_index
        )));
    }

    let mut ordered: Vec<DialogueTurn> = turns.to_vec();
    ordered.sort_by_key(|t| t.order_index);

    log::info!(
        "Processing {} turns (max_parallel {}, timeout {:.0}s)",
        ordered.len(),
        config.max_parallel,
        config.turn_timeout_secs
    );

    let global = Arc::new(Semaphore::new(config.max_parallel));
    let per_provider = provider_semaphores(config);
    let timeout = config.turn_timeout();
    let progress = Arc::new(Progress {
        tracker,
        completed: AtomicUsize::new(0),
        total: ordered.len(),
    });

    let mut handles = Vec::with_capacity(ordered.len());
    for turn in ordered {
        let voice = voices.get(&turn.speaker).cloned();
        let provider_semaphore = voice.as_ref().and_then(|v| per_provider.get(&v.provider).cloned());
        let global = global.clone();
        let ctx = ctx.clone();
        let cancel = cancel.clone();
        let progress = progress.clone();
        let order_index = turn.order_index;

        let handle = tokio::spawn(async move {
            let permits = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permits = acquire(provider_semaphore, global) => Some(permits),
            };
            let _permits = match permits {
                None => {
                    log::info!("Turn {} cancelled before dispatch", turn.order_index);
                    let result = TurnResult::failed(&turn, TurnError::Cancelled);
                    progress.finished(&result, Instant::now());
                    return Ok(result);
                }
                Some(Err(e)) => return Err(ReelSyncError::Other(anyhow::anyhow!("worker pool closed: {}", e))),
                Some(Ok(permits)) => permits,
            };

            let started_at = Instant::now();
            progress.started(&turn, voice.as_ref());
            let result = match tokio::time::timeout(timeout, process_turn(&turn, voice.as_ref(), &ctx)).await {
                Ok(result) => result,
                Err(_) => {
                    log::warn!(
                        "Turn {} ({}) timed out after {:.1}s",
                        turn.order_index,
                        turn.speaker,
                        timeout.as_secs_f64()
                    );
                    TurnResult::failed(
                        &turn,
                        TurnError::Timeout {
                            seconds: timeout.as_secs_f64(),
                        },
                    )
                }
            };
            progress.finished(&result, started_at);
            Ok(result)
        });
        handles.push((order_index, handle));
    }

    let (indices, handles): (Vec<usize>, Vec<_>) = handles.into_iter().unzip();
    let joined = join_all(handles).await;

    let mut results = Vec::with_capacity(joined.len());
    for (order_index, outcome) in indices.into_iter().zip(joined) {
        match outcome {
            Ok(Ok(result)) => results.push(result),
            Ok(Err(e)) => return Err(e),
            Err(e) => {
                log::error!("Worker for turn {} crashed: {}", order_index, e);
                return Err(ReelSyncError::Other(anyhow::anyhow!(
                    "worker for turn {} crashed: {}",
                    order_index,
                    e
                )));
            }
        }
    }
    results.sort_by_key(|r| r.order_index);

    // сброшенные по тайм-ауту реплики могли оставить недописанные файлы
    let swept = temp::sweep_partials(&ctx.job_dir);
    if swept > 0 {
        log::debug!("Removed {} partial file(s) from {}", swept, ctx.job_dir.display());
    }

    let failed = results.iter().filter(|r| !r.is_ok()).count();
    if failed > 0 {
        log::warn!("{} of {} turns failed", failed, results.len());
    }
    Ok(results)
}
