//! Модуль для отслеживания прогресса выполнения задания
//!
//! Реализация паттерна Observer: конвейер сообщает о начале и завершении
//! каждой реплики, о сведении шкалы и о построении субтитров, а наблюдатели
//! получают эти события вместе с общим процентом выполнения.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::TurnError;
use crate::types::Provider;

/// Событие конвейера
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    TurnStarted {
        order_index: usize,
        speaker: String,
        provider: Option<Provider>,
    },
    TurnCompleted {
        order_index: usize,
        speaker: String,
        elapsed_ms: u64,
        error: Option<TurnError>,
    },
    ReconciliationCompleted {
        true_duration_seconds: f64,
        word_count: usize,
        dropped_turns: Vec<usize>,
        elapsed_ms: u64,
    },
    WindowingCompleted {
        event_count: usize,
        merged_words: usize,
        elapsed_ms: u64,
    },
}

pub(crate) fn millis(elapsed: Duration) -> u64 {
    elapsed.as_millis().min(u64::MAX as u128) as u64
}

/// Информация о прогрессе выполнения операции
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressInfo {
    /// Текущий этап операции
    pub step: String,
    /// Процент выполнения текущего этапа (0.0 - 100.0)
    pub step_progress: f32,
    /// Общий процент выполнения всей операции (0.0 - 100.0)
    pub total_progress: f32,
    /// Дополнительная информация о текущем этапе
    pub details: Option<String>,
    /// Событие, вызвавшее обновление
    pub event: Option<PipelineEvent>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressInfo {
    /// Создает новый экземпляр ProgressInfo
    pub fn new(step: impl Into<String>, step_progress: f32, total_progress: f32, details: Option<String>) -> Self {
        Self {
            step: step.into(),
            step_progress: step_progress.clamp(0.0, 100.0),
            total_progress: total_progress.clamp(0.0, 100.0),
            details,
            event: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_event(mut self, event: PipelineEvent) -> Self {
        self.event = Some(event);
        self
    }
}

/// Трейт для наблюдателя, получающего уведомления о прогрессе
pub trait ProgressObserver: Send + Sync {
    /// Метод, вызываемый при обновлении прогресса
    fn on_progress_update(&self, progress: ProgressInfo);
}

/// Трейт для объекта, отправляющего уведомления о прогрессе
pub trait ProgressReporter: Send + Sync {
    /// Добавить наблюдателя
    ///
    /// Возвращает уникальный идентификатор наблюдателя, который можно использовать
    /// для его удаления в будущем.
    fn add_observer(&mut self, observer: Box<dyn ProgressObserver>) -> usize;

    /// Удалить наблюдателя по идентификатору
    fn remove_observer(&mut self, id: usize) -> Option<Box<dyn ProgressObserver>>;

    /// Уведомить всех наблюдателей
    fn notify_progress(&self, progress: ProgressInfo);
}

/// Стандартная реализация репортера
pub struct DefaultProgressReporter {
    observers: RwLock<HashMap<usize, Box<dyn ProgressObserver>>>,
    next_id: AtomicUsize,
}

impl DefaultProgressReporter {
    pub fn new() -> Self {
        Self {
            observers: RwLock::new(HashMap::new()),
            next_id: AtomicUsize::new(0),
        }
    }

    fn next_id(&self) -> usize {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for DefaultProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for DefaultProgressReporter {
    fn add_observer(&mut self, observer: Box<dyn ProgressObserver>) -> usize {
        let id = self.next_id();
        self.observers.write().insert(id, observer);
        id
    }

    fn remove_observer(&mut self, id: usize) -> Option<Box<dyn ProgressObserver>> {
        self.observers.write().remove(&id)
    }

    fn notify_progress(&self, progress: ProgressInfo) {
        let observers = self.observers.read();
        for observer in observers.values() {
            observer.on_progress_update(progress.clone());
        }
    }
}

/// Этапы задания
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessStep {
    /// Синтез и выравнивание реплик
    SpeechGeneration,
    /// Склейка аудио и пересчет меток
    Reconciliation,
    /// Построение окон субтитров
    CaptionWindowing,
}

impl ProcessStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SpeechGeneration => "speech_generation",
            Self::Reconciliation => "reconciliation",
            Self::CaptionWindowing => "caption_windowing",
        }
    }

    /// Весовой коэффициент этапа (в процентах от общего процесса)
    pub fn weight(&self) -> f32 {
        match self {
            Self::SpeechGeneration => 70.0,
            Self::Reconciliation => 20.0,
            Self::CaptionWindowing => 10.0,
        }
    }
}

struct TrackerState {
    current_step: ProcessStep,
    step_progress: f32,
    total_progress: f32,
    completed_steps: HashMap<ProcessStep, f32>,
}

impl TrackerState {
    fn recompute_total(&mut self) {
        let mut total = 0.0;
        let mut total_weight = 0.0;
        for (step, progress) in &self.completed_steps {
            if *step == self.current_step {
                continue;
            }
            total += step.weight() * progress / 100.0;
            total_weight += step.weight();
        }
        total += self.current_step.weight() * self.step_progress / 100.0;
        total_weight += self.current_step.weight();

        // Вес еще не начатых этапов тоже учитывается, иначе первый этап дал бы 100%
        let all_weight: f32 = [
            ProcessStep::SpeechGeneration,
            ProcessStep::Reconciliation,
            ProcessStep::CaptionWindowing,
        ]
        .iter()
        .map(|s| s.weight())
        .sum();
        let denominator = all_weight.max(total_weight);
        self.total_progress = (total / denominator * 100.0).clamp(0.0, 100.0);
    }
}

/// Трекер прогресса задания
///
/// Разделяется между задачами планировщика через `Arc`.
pub struct ProgressTracker {
    reporter: RwLock<Option<Box<dyn ProgressReporter>>>,
    state: RwLock<TrackerState>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            reporter: RwLock::new(None),
            state: RwLock::new(TrackerState {
                current_step: ProcessStep::SpeechGeneration,
                step_progress: 0.0,
                total_progress: 0.0,
                completed_steps: HashMap::new(),
            }),
        }
    }

    pub fn with_reporter(reporter: Box<dyn ProgressReporter>) -> Self {
        let tracker = Self::new();
        tracker.set_reporter(reporter);
        tracker
    }

    pub fn set_reporter(&self, reporter: Box<dyn ProgressReporter>) {
        *self.reporter.write() = Some(reporter);
    }

    /// Добавить наблюдателя; без репортера создается стандартный
    pub fn add_observer(&self, observer: Box<dyn ProgressObserver>) -> usize {
        let mut reporter = self.reporter.write();
        reporter
            .get_or_insert_with(|| Box::new(DefaultProgressReporter::new()))
            .add_observer(observer)
    }

    pub fn current_step(&self) -> ProcessStep {
        self.state.read().current_step
    }

    pub fn total_progress(&self) -> f32 {
        self.state.read().total_progress
    }

    /// Установить текущий этап; предыдущий считается завершенным
    pub fn set_step(&self, step: ProcessStep) {
        {
            let mut state = self.state.write();
            if state.current_step == step {
                return;
            }
            let previous = state.current_step;
            state.completed_steps.insert(previous, 100.0);
            state.current_step = step;
            state.step_progress = 0.0;
            state.recompute_total();
        }
        self.report(None, None);
    }

    /// Обновить прогресс текущего этапа
    pub fn update_step_progress(&self, progress: f32, details: Option<String>) {
        {
            let mut state = self.state.write();
            state.step_progress = progress.clamp(0.0, 100.0);
            state.recompute_total();
        }
        self.report(details, None);
    }

    /// Сообщить о событии конвейера вместе с прогрессом этапа
    pub fn emit(&self, event: PipelineEvent, step_progress: f32, details: Option<String>) {
        {
            let mut state = self.state.write();
            state.step_progress = step_progress.clamp(0.0, 100.0);
            state.recompute_total();
        }
        self.report(details, Some(event));
    }

    /// Отметить завершение всего задания
    pub fn complete(&self) {
        {
            let mut state = self.state.write();
            let current = state.current_step;
            state.completed_steps.insert(current, 100.0);
            state.step_progress = 100.0;
            state.total_progress = 100.0;
        }
        self.report(Some("Job completed".to_string()), None);
    }

    fn report(&self, details: Option<String>, event: Option<PipelineEvent>) {
        let reporter = self.reporter.read();
        if let Some(reporter) = reporter.as_ref() {
            let info = {
                let state = self.state.read();
                ProgressInfo::new(
                    state.current_step.as_str(),
                    state.step_progress,
                    state.total_progress,
                    details,
                )
            };
            let info = match event {
                Some(event) => info.with_event(event),
                None => info,
            };
            reporter.notify_progress(info);
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct TestObserver {
        updates: Arc<Mutex<Vec<ProgressInfo>>>,
    }

    impl TestObserver {
        fn new() -> (Self, Arc<Mutex<Vec<ProgressInfo>>>) {
            let updates = Arc::new(Mutex::new(Vec::new()));
            (Self { updates: updates.clone() }, updates)
        }
    }

    impl ProgressObserver for TestObserver {
        fn on_progress_update(&self, progress: ProgressInfo) {
            self.updates.lock().unwrap().push(progress);
        }
    }

    #[test]
    fn test_progress_tracker() {
        let tracker = ProgressTracker::new();
        let (observer, updates) = TestObserver::new();
        tracker.add_observer(Box::new(observer));

        tracker.update_step_progress(50.0, None);
        {
            let updates = updates.lock().unwrap();
            assert_eq!(updates.len(), 1);
            assert_eq!(updates[0].step, ProcessStep::SpeechGeneration.as_str());
            assert_eq!(updates[0].step_progress, 50.0);
            assert!((updates[0].total_progress - 35.0).abs() < 1e-3);
        }

        tracker.set_step(ProcessStep::Reconciliation);
        {
            let updates = updates.lock().unwrap();
            assert_eq!(updates.len(), 2);
            assert_eq!(updates[1].step, ProcessStep::Reconciliation.as_str());
            assert_eq!(updates[1].step_progress, 0.0);
            assert!((updates[1].total_progress - 70.0).abs() < 1e-3);
        }

        tracker.complete();
        {
            let updates = updates.lock().unwrap();
            assert_eq!(updates.len(), 3);
            assert_eq!(updates[2].total_progress, 100.0);
            assert_eq!(updates[2].details, Some("Job completed".to_string()));
        }
    }

    #[test]
    fn emitted_events_reach_observers() {
        let tracker = ProgressTracker::new();
        let (observer, updates) = TestObserver::new();
        tracker.add_observer(Box::new(observer));

        tracker.emit(
            PipelineEvent::TurnStarted {
                order_index: 2,
                speaker: "Host".into(),
                provider: Some(Provider::LocalOs),
            },
            10.0,
            None,
        );

        let updates = updates.lock().unwrap();
        assert!(matches!(
            updates[0].event,
            Some(PipelineEvent::TurnStarted { order_index: 2, .. })
        ));
    }

    #[test]
    fn removed_observer_stops_receiving() {
        let mut reporter = DefaultProgressReporter::new();
        let (observer, updates) = TestObserver::new();
        let id = reporter.add_observer(Box::new(observer));
        reporter.notify_progress(ProgressInfo::new("a", 1.0, 1.0, None));
        assert!(reporter.remove_observer(id).is_some());
        reporter.notify_progress(ProgressInfo::new("b", 2.0, 2.0, None));
        assert_eq!(updates.lock().unwrap().len(), 1);
    }
}
