//! Интеграционные тесты конвейера на поддельных провайдерах
//!
//! Провайдер пишет WAV с тоном, длина которого зависит от числа слов, а
//! выравнивание делается настоящим `ProportionalAligner`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use reel_sync::align::{tokenize_reference, ProportionalAligner};
use reel_sync::captions::window_words;
use reel_sync::config::{AlignerConfig, SchedulerConfig};
use reel_sync::media::concat::DefaultJoiner;
use reel_sync::notification::MemoryProgressObserver;
use reel_sync::pipeline::{reconcile, run_batch, TurnContext};
use reel_sync::progress::PipelineEvent;
use reel_sync::tts::{SpeechSynthesizer, SynthesizerSet};
use reel_sync::{
    voice_map, DialogueTurn, Provider, ReelSync, ReelSyncConfig, ReelSyncError, TurnError, VoiceBinding, VoiceMap,
    WordTimestamp,
};

const SAMPLE_RATE: u32 = 16000;
const SECONDS_PER_WORD: f64 = 0.4;
const PADDING: f64 = 0.1;

fn write_tone_wav(path: &Path, lead: f64, tone: f64, tail: f64) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let frames = |secs: f64| (secs * SAMPLE_RATE as f64).round() as usize;
    for _ in 0..frames(lead) {
        writer.write_sample(0i16).unwrap();
    }
    for n in 0..frames(tone) {
        let t = n as f64 / SAMPLE_RATE as f64;
        let v = (t * 330.0 * std::f64::consts::TAU).sin() * 0.6;
        writer.write_sample((v * i16::MAX as f64) as i16).unwrap();
    }
    for _ in 0..frames(tail) {
        writer.write_sample(0i16).unwrap();
    }
    writer.finalize().unwrap();
}

/// Поддельный провайдер: задержки и сбои задаются по тексту реплики
#[derive(Default)]
struct FakeSynthesizer {
    delays: HashMap<String, Duration>,
    failing: Vec<String>,
    /// Реплики, которые пишут файл и затем зависают
    stalling: Vec<String>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    completed: Mutex<Vec<String>>,
}

impl FakeSynthesizer {
    fn delay(mut self, text: &str, delay: Duration) -> Self {
        self.delays.insert(text.to_string(), delay);
        self
    }

    fn fail(mut self, text: &str) -> Self {
        self.failing.push(text.to_string());
        self
    }

    fn stall(mut self, text: &str) -> Self {
        self.stalling.push(text.to_string());
        self
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    fn provider(&self) -> Provider {
        Provider::LocalOs
    }

    fn file_extension(&self) -> &str {
        "wav"
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn synthesize_to_file(&self, text: &str, _voice_id: &str, dest: &Path) -> Result<(), TurnError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delays.get(text) {
            tokio::time::sleep(*delay).await;
        }
        let outcome = if self.failing.iter().any(|t| t == text) {
            Err(TurnError::synthesis(Provider::LocalOs, "provider returned 500 after 3 attempts"))
        } else {
            let words = tokenize_reference(text).len().max(1) as f64;
            write_tone_wav(dest, PADDING, words * SECONDS_PER_WORD, PADDING);
            if self.stalling.iter().any(|t| t == text) {
                tokio::time::sleep(Duration::from_secs(10)).await;
            }
            Ok(())
        };

        self.completed.lock().push(text.to_string());
        self.active.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

fn voices() -> VoiceMap {
    voice_map([
        VoiceBinding::new("Host", Provider::LocalOs, "Samantha"),
        VoiceBinding::new("Guest", Provider::LocalOs, "Daniel"),
    ])
}

fn scenario_turns() -> Vec<DialogueTurn> {
    vec![
        DialogueTurn::new(0, "Host", "Hi."),
        DialogueTurn::new(1, "Guest", "How are you?"),
        DialogueTurn::new(2, "Host", "Good, thanks."),
    ]
}

fn context(dir: &Path, synthesizer: Arc<FakeSynthesizer>) -> TurnContext {
    let _ = env_logger::builder().is_test(true).try_init();
    TurnContext::new(
        SynthesizerSet::new().with(synthesizer),
        Arc::new(ProportionalAligner::new(AlignerConfig::default())),
        dir,
    )
}

fn assert_monotonic(words: &[WordTimestamp]) {
    for pair in words.windows(2) {
        assert!(
            pair[0].end_seconds <= pair[1].start_seconds,
            "{:?} overlaps {:?}",
            pair[0],
            pair[1]
        );
    }
}

#[tokio::test]
async fn all_turns_succeed_and_words_add_up() {
    let dir = tempfile::tempdir().unwrap();
    let synthesizer = Arc::new(FakeSynthesizer::default());
    let ctx = context(dir.path(), synthesizer);
    let turns = scenario_turns();

    let results = run_batch(
        &turns,
        &voices(),
        &ctx,
        &SchedulerConfig::default(),
        &CancellationToken::new(),
        None,
    )
    .await
    .unwrap();

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.error.is_none()), "{:?}", results);
    let per_turn: usize = results.iter().map(|r| r.words.len()).sum();
    assert_eq!(per_turn, 1 + 3 + 2);

    let timeline = reconcile(&results, &dir.path().join("combined.wav"), &DefaultJoiner::default())
        .await
        .unwrap();
    assert_eq!(timeline.words.len(), per_turn);
    assert!(timeline.dropped_turns.is_empty());

    let expected: f64 = results.iter().map(|r| r.nominal_duration_seconds).sum();
    assert!((timeline.true_duration_seconds - expected).abs() < 1e-3);
    assert!((timeline.scale_factor - 1.0).abs() < 1e-3);
    assert!(timeline.words.iter().all(|w| w.end_seconds <= timeline.true_duration_seconds));
    assert_monotonic(&timeline.words);

    assert_eq!(timeline.turns.len(), 3);
    assert_eq!(timeline.words[1].speaker.as_deref(), Some("Guest"));
}

#[tokio::test]
async fn results_follow_dialogue_order_not_completion_order() {
    let dir = tempfile::tempdir().unwrap();
    let texts = ["One.", "Two.", "Three.", "Four.", "Five.", "Six."];
    let mut fake = FakeSynthesizer::default();
    for (i, text) in texts.iter().enumerate() {
        // ранние реплики завершаются позже поздних
        fake = fake.delay(text, Duration::from_millis(60 * (texts.len() - i) as u64));
    }
    let synthesizer = Arc::new(fake);
    let ctx = context(dir.path(), synthesizer.clone());

    // order_index не обязан совпадать с позицией во входном списке
    let mut turns: Vec<DialogueTurn> = texts
        .iter()
        .enumerate()
        .map(|(i, text)| DialogueTurn::new(i * 10, if i % 2 == 0 { "Host" } else { "Guest" }, *text))
        .collect();
    turns.reverse();

    let config = SchedulerConfig {
        max_parallel: texts.len(),
        ..SchedulerConfig::default()
    };
    let results = run_batch(&turns, &voices(), &ctx, &config, &CancellationToken::new(), None)
        .await
        .unwrap();

    let indices: Vec<usize> = results.iter().map(|r| r.order_index).collect();
    assert_eq!(indices, vec![0, 10, 20, 30, 40, 50]);
    let completed = synthesizer.completed.lock().clone();
    assert_eq!(completed.first().map(String::as_str), Some("Six."));
}

#[tokio::test]
async fn pool_size_bounds_concurrency() {
    let dir = tempfile::tempdir().unwrap();
    let mut fake = FakeSynthesizer::default();
    let texts: Vec<String> = (0..6).map(|i| format!("Line number {}.", i)).collect();
    for text in &texts {
        fake = fake.delay(text, Duration::from_millis(50));
    }
    let synthesizer = Arc::new(fake);
    let ctx = context(dir.path(), synthesizer.clone());
    let turns: Vec<DialogueTurn> = texts
        .iter()
        .enumerate()
        .map(|(i, text)| DialogueTurn::new(i, "Host", text.clone()))
        .collect();

    let config = SchedulerConfig {
        max_parallel: 2,
        ..SchedulerConfig::default()
    };
    let results = run_batch(&turns, &voices(), &ctx, &config, &CancellationToken::new(), None)
        .await
        .unwrap();
    assert!(results.iter().all(|r| r.is_ok()));
    assert!(synthesizer.max_active.load(Ordering::SeqCst) <= 2);

    // лимит провайдера строже общего пула
    let synthesizer = Arc::new({
        let mut fake = FakeSynthesizer::default();
        for text in &texts {
            fake = fake.delay(text, Duration::from_millis(30));
        }
        fake
    });
    let ctx = context(dir.path(), synthesizer.clone());
    let config = SchedulerConfig {
        max_parallel: 4,
        provider_limits: HashMap::from([(Provider::LocalOs, 1)]),
        ..SchedulerConfig::default()
    };
    run_batch(&turns, &voices(), &ctx, &config, &CancellationToken::new(), None)
        .await
        .unwrap();
    assert_eq!(synthesizer.max_active.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn timed_out_turn_is_dropped_from_timeline() {
    let dir = tempfile::tempdir().unwrap();
    let synthesizer = Arc::new(FakeSynthesizer::default().delay("How are you?", Duration::from_secs(10)));
    let ctx = context(dir.path(), synthesizer);
    let config = SchedulerConfig {
        turn_timeout_secs: 0.5,
        ..SchedulerConfig::default()
    };

    let results = run_batch(
        &scenario_turns(),
        &voices(),
        &ctx,
        &config,
        &CancellationToken::new(),
        None,
    )
    .await
    .unwrap();

    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert_eq!(results[1].error, Some(TurnError::Timeout { seconds: 0.5 }));
    assert!(results[2].is_ok());

    let timeline = reconcile(&results, &dir.path().join("combined.wav"), &DefaultJoiner::default())
        .await
        .unwrap();
    assert_eq!(timeline.dropped_turns, vec![1]);
    assert_eq!(timeline.words.len(), 1 + 2);
    let spans: Vec<usize> = timeline.turns.iter().map(|t| t.order_index).collect();
    assert_eq!(spans, vec![0, 2]);
}

#[tokio::test]
async fn all_failed_turns_fail_reconciliation() {
    let dir = tempfile::tempdir().unwrap();
    let synthesizer = Arc::new(
        FakeSynthesizer::default()
            .fail("Hi.")
            .fail("How are you?")
            .fail("Good, thanks."),
    );
    let ctx = context(dir.path(), synthesizer);

    let results = run_batch(
        &scenario_turns(),
        &voices(),
        &ctx,
        &SchedulerConfig::default(),
        &CancellationToken::new(),
        None,
    )
    .await
    .unwrap();
    assert_eq!(results.len(), 3);
    assert!(results
        .iter()
        .all(|r| matches!(r.error, Some(TurnError::Synthesis { .. }))));

    let err = reconcile(&results, &dir.path().join("combined.wav"), &DefaultJoiner::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ReelSyncError::Reconciliation(_)));
    assert!(!dir.path().join("combined.wav").exists());
}

#[tokio::test]
async fn cancellation_stops_new_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    let synthesizer = Arc::new(FakeSynthesizer::default().delay("Hi.", Duration::from_millis(300)));
    let ctx = context(dir.path(), synthesizer);
    let config = SchedulerConfig {
        max_parallel: 1,
        provider_limits: HashMap::new(),
        ..SchedulerConfig::default()
    };
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let turns = scenario_turns();
    let results = run_batch(&turns, &voices(), &ctx, &config, &cancel, None).await.unwrap();

    let dispatched: Vec<&reel_sync::TurnResult> = results.iter().filter(|r| r.error != Some(TurnError::Cancelled)).collect();
    assert_eq!(dispatched.len(), 1, "{:?}", results);
    assert!(dispatched[0].is_ok());
    assert_eq!(results.len(), 3);
}

fn job_config(dir: &Path) -> ReelSyncConfig {
    ReelSyncConfig {
        work_dir: dir.to_path_buf(),
        ..ReelSyncConfig::default()
    }
}

fn engine(config: ReelSyncConfig, synthesizer: Arc<FakeSynthesizer>) -> ReelSync {
    let _ = env_logger::builder().is_test(true).try_init();
    ReelSync::with_components(
        config,
        SynthesizerSet::new().with(synthesizer),
        Arc::new(ProportionalAligner::new(AlignerConfig::default())),
        Arc::new(DefaultJoiner::default()),
    )
    .unwrap()
}

#[tokio::test]
async fn facade_reports_progress_and_builds_captions() {
    let dir = tempfile::tempdir().unwrap();
    let reel = engine(job_config(dir.path()), Arc::new(FakeSynthesizer::default()));
    let observer = MemoryProgressObserver::new();
    reel.add_observer(Box::new(observer.clone()));

    let output = reel.process(&scenario_turns(), &voices()).await.unwrap();

    assert!(output.timeline.combined_audio_path.exists());
    assert!(output.timeline.combined_audio_path.starts_with(dir.path()));
    assert_eq!(output.turn_results.len(), 3);
    assert_eq!(output.captions.len(), output.timeline.words.len());

    for pair in output.captions.windows(2) {
        assert!(pair[0].end_seconds <= pair[1].start_seconds);
    }
    let last = output.captions.last().unwrap();
    assert!(last.end_seconds <= output.timeline.true_duration_seconds);

    // повторный проход по готовым окнам ничего не сливает
    let as_words: Vec<WordTimestamp> = output.captions.iter().map(WordTimestamp::from).collect();
    let again = window_words(&as_words, ReelSyncConfig::default().captions.min_clip_duration_seconds).unwrap();
    assert_eq!(again, output.captions);

    let events = observer.events();
    let started = events
        .iter()
        .filter(|e| matches!(e, PipelineEvent::TurnStarted { .. }))
        .count();
    let completed = events
        .iter()
        .filter(|e| matches!(e, PipelineEvent::TurnCompleted { .. }))
        .count();
    assert_eq!(started, 3);
    assert_eq!(completed, 3);
    assert!(events
        .iter()
        .any(|e| matches!(e, PipelineEvent::ReconciliationCompleted { word_count: 6, .. })));
    assert!(matches!(events.last(), Some(PipelineEvent::WindowingCompleted { .. })));
    assert_eq!(reel.progress_tracker().total_progress(), 100.0);
}

#[tokio::test]
async fn partial_failure_policy_is_configurable() {
    let dir = tempfile::tempdir().unwrap();

    let strict = ReelSyncConfig {
        allow_partial: false,
        ..job_config(dir.path())
    };
    let reel = engine(strict, Arc::new(FakeSynthesizer::default().fail("How are you?")));
    let err = reel.process(&scenario_turns(), &voices()).await.unwrap_err();
    assert!(matches!(err, ReelSyncError::PartialFailure { failed: 1, total: 3 }));
    // каталог неудачного задания удаляется
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

    let lenient = engine(job_config(dir.path()), Arc::new(FakeSynthesizer::default().fail("How are you?")));
    let output = lenient.process(&scenario_turns(), &voices()).await.unwrap();
    assert_eq!(output.timeline.dropped_turns, vec![1]);
    assert_eq!(output.timeline.words.len(), 3);
}

#[tokio::test]
async fn unknown_speaker_fails_only_its_turn() {
    let dir = tempfile::tempdir().unwrap();
    let reel = engine(job_config(dir.path()), Arc::new(FakeSynthesizer::default()));
    let mut turns = scenario_turns();
    turns.push(DialogueTurn::new(3, "Narrator", "The end."));

    let output = reel.process(&turns, &voices()).await.unwrap();
    assert_eq!(
        output.turn_results[3].error,
        Some(TurnError::unbound_voice("Narrator"))
    );
    assert_eq!(output.timeline.dropped_turns, vec![3]);
}

#[test]
fn empty_dialogue_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let reel = engine(job_config(dir.path()), Arc::new(FakeSynthesizer::default()));
    let err = tokio_test::block_on(reel.process(&[], &voices())).unwrap_err();
    assert!(matches!(err, ReelSyncError::Script(_)));
}

fn partial_files(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .filter(|name| name.contains(".partial-"))
        .collect()
}

#[tokio::test]
async fn timed_out_turn_leaves_no_partial_audio() {
    let dir = tempfile::tempdir().unwrap();
    let synthesizer = Arc::new(FakeSynthesizer::default().stall("How are you?"));
    let ctx = context(dir.path(), synthesizer);
    let config = SchedulerConfig {
        turn_timeout_secs: 0.5,
        ..SchedulerConfig::default()
    };

    let results = run_batch(
        &scenario_turns(),
        &voices(),
        &ctx,
        &config,
        &CancellationToken::new(),
        None,
    )
    .await
    .unwrap();

    assert_eq!(results[1].error, Some(TurnError::Timeout { seconds: 0.5 }));
    assert!(partial_files(dir.path()).is_empty(), "{:?}", partial_files(dir.path()));
    assert!(dir.path().join("turn_0000.wav").exists());
    assert!(!dir.path().join("turn_0001.wav").exists());
}

#[tokio::test]
async fn engine_recovers_after_cancelled_job() {
    let dir = tempfile::tempdir().unwrap();
    let reel = engine(job_config(dir.path()), Arc::new(FakeSynthesizer::default()));

    reel.cancellation_token().cancel();
    let err = reel.process(&scenario_turns(), &voices()).await.unwrap_err();
    assert!(matches!(err, ReelSyncError::Reconciliation(_)));

    assert!(!reel.cancellation_token().is_cancelled());
    let output = reel.process(&scenario_turns(), &voices()).await.unwrap();
    assert!(output.turn_results.iter().all(|r| r.is_ok()));
    assert!(output.timeline.dropped_turns.is_empty());
}

#[tokio::test]
async fn job_token_cancels_only_its_job() {
    let dir = tempfile::tempdir().unwrap();
    let reel = engine(job_config(dir.path()), Arc::new(FakeSynthesizer::default()));

    let job = CancellationToken::new();
    job.cancel();
    let err = reel
        .process_with_cancel(&scenario_turns(), &voices(), &job)
        .await
        .unwrap_err();
    assert!(matches!(err, ReelSyncError::Reconciliation(_)));

    assert!(!reel.cancellation_token().is_cancelled());
    assert!(reel.process(&scenario_turns(), &voices()).await.is_ok());
}
