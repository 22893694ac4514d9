//! Модуль для реализации системы уведомлений
//!
//! Конкретные наблюдатели для системы прогресса: запись в лог, в память,
//! в файл, в канал tokio и в произвольную функцию обратного вызова.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::progress::{PipelineEvent, ProgressInfo, ProgressObserver};

fn describe(progress: &ProgressInfo) -> String {
    let mut line = format!(
        "step={} step_progress={:.1}% total={:.1}%",
        progress.step, progress.step_progress, progress.total_progress
    );
    match &progress.event {
        Some(PipelineEvent::TurnStarted { order_index, speaker, .. }) => {
            line.push_str(&format!(" turn #{} ({}) started", order_index, speaker));
        }
        Some(PipelineEvent::TurnCompleted {
            order_index,
            speaker,
            elapsed_ms,
            error,
        }) => match error {
            None => line.push_str(&format!(
                " turn #{} ({}) done in {}ms",
                order_index, speaker, elapsed_ms
            )),
            Some(err) => line.push_str(&format!(
                " turn #{} ({}) failed after {}ms: {}",
                order_index, speaker, elapsed_ms, err
            )),
        },
        Some(PipelineEvent::ReconciliationCompleted {
            true_duration_seconds,
            word_count,
            dropped_turns,
            elapsed_ms,
        }) => line.push_str(&format!(
            " reconciled {} words over {:.2}s (dropped {:?}) in {}ms",
            word_count, true_duration_seconds, dropped_turns, elapsed_ms
        )),
        Some(PipelineEvent::WindowingCompleted {
            event_count,
            merged_words,
            elapsed_ms,
        }) => line.push_str(&format!(
            " {} caption events ({} merged words) in {}ms",
            event_count, merged_words, elapsed_ms
        )),
        None => {}
    }
    if let Some(details) = &progress.details {
        line.push_str(", ");
        line.push_str(details);
    }
    line
}

/// Наблюдатель, пишущий прогресс в лог
pub struct LogProgressObserver {
    prefix: Option<String>,
}

impl LogProgressObserver {
    pub fn new() -> Self {
        Self { prefix: None }
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }
}

impl Default for LogProgressObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for LogProgressObserver {
    fn on_progress_update(&self, progress: ProgressInfo) {
        let prefix = self.prefix.as_deref().unwrap_or("");
        match &progress.event {
            Some(PipelineEvent::TurnCompleted { error: Some(_), .. }) => {
                log::warn!("{}{}", prefix, describe(&progress))
            }
            _ => log::info!("{}{}", prefix, describe(&progress)),
        }
    }
}

/// Наблюдатель, сохраняющий информацию о прогрессе в памяти
#[derive(Clone, Default)]
pub struct MemoryProgressObserver {
    history: Arc<Mutex<Vec<ProgressInfo>>>,
}

impl MemoryProgressObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Получить историю обновлений прогресса
    pub fn history(&self) -> Vec<ProgressInfo> {
        self.history.lock().clone()
    }

    /// Только события конвейера, в порядке поступления
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.history
            .lock()
            .iter()
            .filter_map(|info| info.event.clone())
            .collect()
    }

    pub fn clear_history(&self) {
        self.history.lock().clear();
    }
}

impl ProgressObserver for MemoryProgressObserver {
    fn on_progress_update(&self, progress: ProgressInfo) {
        self.history.lock().push(progress);
    }
}

/// Наблюдатель, записывающий информацию о прогрессе в файл
pub struct FileProgressObserver {
    file_path: PathBuf,
}

impl FileProgressObserver {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
        }
    }
}

impl ProgressObserver for FileProgressObserver {
    fn on_progress_update(&self, progress: ProgressInfo) {
        let log_entry = format!(
            "[{}] {}\n",
            progress.timestamp.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S%.3f"),
            describe(&progress)
        );

        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)
        {
            Ok(mut file) => {
                if let Err(e) = file.write_all(log_entry.as_bytes()) {
                    log::warn!("Failed to append progress to {}: {}", self.file_path.display(), e);
                }
            }
            Err(e) => log::warn!("Failed to open progress log {}: {}", self.file_path.display(), e),
        }
    }
}

/// Наблюдатель, отправляющий информацию о прогрессе через канал
pub struct ChannelProgressObserver {
    sender: mpsc::UnboundedSender<ProgressInfo>,
}

impl ChannelProgressObserver {
    pub fn new(sender: mpsc::UnboundedSender<ProgressInfo>) -> Self {
        Self { sender }
    }

    /// Создать наблюдатель вместе с приемником
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressInfo>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl ProgressObserver for ChannelProgressObserver {
    fn on_progress_update(&self, progress: ProgressInfo) {
        // приемник мог быть уже закрыт
        let _ = self.sender.send(progress);
    }
}

/// Наблюдатель, вызывающий функцию обратного вызова при обновлении прогресса
pub struct CallbackProgressObserver<F>
where
    F: Fn(ProgressInfo) + Send + Sync + 'static,
{
    callback: F,
}

impl<F> CallbackProgressObserver<F>
where
    F: Fn(ProgressInfo) + Send + Sync + 'static,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressObserver for CallbackProgressObserver<F>
where
    F: Fn(ProgressInfo) + Send + Sync + 'static,
{
    fn on_progress_update(&self, progress: ProgressInfo) {
        (self.callback)(progress);
    }
}

/// Комбинированный наблюдатель, объединяющий несколько наблюдателей
#[derive(Default)]
pub struct CompositeProgressObserver {
    observers: Vec<Box<dyn ProgressObserver>>,
}

impl CompositeProgressObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_observer(&mut self, observer: Box<dyn ProgressObserver>) {
        self.observers.push(observer);
    }

    pub fn clear(&mut self) {
        self.observers.clear();
    }
}

impl ProgressObserver for CompositeProgressObserver {
    fn on_progress_update(&self, progress: ProgressInfo) {
        for observer in &self.observers {
            observer.on_progress_update(progress.clone());
        }
    }
}
