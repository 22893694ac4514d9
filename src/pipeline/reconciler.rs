//! Сведение реплик в общую временную шкалу
//!
//! Аудио уцелевших реплик склеивается в одну дорожку, ее длительность
//! измеряется по файлу, и все метки слов растягиваются одним коэффициентом:
//! `global = (offset + local) * true_duration / sum_nominal`, где `offset` это
//! сумма номинальных длительностей предыдущих реплик.

use std::path::{Path, PathBuf};

use crate::error::{ReelSyncError, Result};
use crate::media::audio::measure_duration_async;
use crate::media::concat::AudioJoiner;
use crate::types::{ReconciledTimeline, TurnResult, TurnSpan, WordTimestamp};

/// Реплики, пригодные для сведения, и индексы отброшенных
pub fn partition_results(results: &[TurnResult]) -> (Vec<&TurnResult>, Vec<usize>) {
    let mut survivors: Vec<&TurnResult> = Vec::new();
    let mut dropped = Vec::new();
    for result in results {
        match (&result.error, &result.audio_path) {
            (None, Some(_)) => survivors.push(result),
            (Some(error), _) => {
                log::warn!(
                    "Dropping turn {} ({}) from the timeline: {}",
                    result.order_index,
                    result.speaker,
                    error
                );
                dropped.push(result.order_index);
            }
            (None, None) => {
                log::warn!("Dropping turn {} ({}): no audio file", result.order_index, result.speaker);
                dropped.push(result.order_index);
            }
        }
    }
    survivors.sort_by_key(|r| r.order_index);
    (survivors, dropped)
}

/// Метки и границы реплик на общей шкале
#[derive(Debug, Clone, PartialEq)]
pub struct RescaledTimeline {
    pub scale_factor: f64,
    pub words: Vec<WordTimestamp>,
    pub turns: Vec<TurnSpan>,
}

/// Перевести метки реплик на общую шкалу длительностью `true_duration`
///
/// Реплики должны быть уже отсортированы по `order_index`. Никакая метка не
/// выходит за `true_duration`, метки не убывают.
pub fn rescale(turns: &[&TurnResult], true_duration: f64) -> Result<RescaledTimeline> {
    if turns.is_empty() {
        return Err(ReelSyncError::Reconciliation(
            "no successful turns to reconcile".to_string(),
        ));
    }
    if !(true_duration.is_finite() && true_duration >= 0.0) {
        return Err(ReelSyncError::Reconciliation(format!(
            "combined audio has invalid duration {}",
            true_duration
        )));
    }
    let total_nominal: f64 = turns.iter().map(|t| t.nominal_duration_seconds).sum();
    if !(total_nominal.is_finite() && total_nominal > 0.0) {
        return Err(ReelSyncError::Reconciliation(format!(
            "total nominal duration is {}",
            total_nominal
        )));
    }

    let scale = true_duration / total_nominal;
    let to_global = |offset: f64, local: f64| ((offset + local) * scale).clamp(0.0, true_duration);

    let mut words = Vec::new();
    let mut spans = Vec::with_capacity(turns.len());
    let mut offset = 0.0;
    let mut previous_end = 0.0_f64;

    for turn in turns {
        let nominal = turn.nominal_duration_seconds.max(0.0);
        let turn_end = offset + nominal;
        spans.push(TurnSpan {
            order_index: turn.order_index,
            speaker: turn.speaker.clone(),
            start_seconds: to_global(offset, 0.0),
            end_seconds: to_global(turn_end, 0.0),
        });

        for word in &turn.words {
            // метки за пределами своей реплики не должны залезать в соседнюю
            let local_start = word.start_seconds.clamp(0.0, nominal);
            let local_end = word.end_seconds.clamp(local_start, nominal);
            let start = to_global(offset, local_start).max(previous_end);
            let end = to_global(offset, local_end).max(start);
            previous_end = end;

            words.push(WordTimestamp {
                text: word.text.clone(),
                start_seconds: start,
                end_seconds: end,
                speaker: Some(turn.speaker.clone()),
            });
        }
        offset = turn_end;
    }

    // граница последней реплики совпадает с концом дорожки
    if let Some(last) = spans.last_mut() {
        last.end_seconds = true_duration;
    }

    Ok(RescaledTimeline {
        scale_factor: scale,
        words,
        turns: spans,
    })
}

/// Склеить аудио уцелевших реплик в `output_path` и свести метки
///
/// Ошибка возвращается, только если ни одна реплика не пригодна или общая
/// номинальная длительность равна нулю.
pub async fn reconcile(
    results: &[TurnResult],
    output_path: &Path,
    joiner: &dyn AudioJoiner,
) -> Result<ReconciledTimeline> {
    let (survivors, dropped_turns) = partition_results(results);
    if survivors.is_empty() {
        return Err(ReelSyncError::Reconciliation(format!(
            "all {} turns failed, nothing to reconcile",
            results.len()
        )));
    }
    let total_nominal: f64 = survivors.iter().map(|t| t.nominal_duration_seconds).sum();
    if !(total_nominal > 0.0) {
        return Err(ReelSyncError::Reconciliation(
            "total nominal duration of surviving turns is zero".to_string(),
        ));
    }

    let inputs: Vec<PathBuf> = survivors.iter().filter_map(|t| t.audio_path.clone()).collect();
    joiner.join(&inputs, output_path).await?;
    let true_duration = measure_duration_async(output_path).await?;

    let rescaled = rescale(&survivors, true_duration)?;
    log::info!(
        "Reconciled {} turns ({} dropped): nominal {:.3}s, true {:.3}s, scale {:.5}",
        survivors.len(),
        dropped_turns.len(),
        total_nominal,
        true_duration,
        rescaled.scale_factor
    );

    Ok(ReconciledTimeline {
        combined_audio_path: output_path.to_path_buf(),
        true_duration_seconds: true_duration,
        scale_factor: rescaled.scale_factor,
        words: rescaled.words,
        turns: rescaled.turns,
        dropped_turns,
    })
}

/// Предупредить, если коэффициент масштаба подозрительно далек от 1.0
pub fn check_scale_factor(scale_factor: f64, max_deviation: f64) -> bool {
    let plausible = (scale_factor - 1.0).abs() <= max_deviation;
    if !plausible {
        log::warn!(
            "Timeline scale factor {:.4} deviates from 1.0 by more than {:.2}",
            scale_factor,
            max_deviation
        );
    }
    plausible
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TurnError;

    fn turn(order_index: usize, nominal: f64, words: Vec<WordTimestamp>) -> TurnResult {
        TurnResult {
            order_index,
            speaker: format!("S{}", order_index),
            audio_path: Some(PathBuf::from(format!("turn_{:04}.wav", order_index))),
            nominal_duration_seconds: nominal,
            words,
            error: None,
        }
    }

    #[test]
    fn rescales_with_cumulative_offsets() {
        let first = turn(0, 2.0, vec![WordTimestamp::new("Hi", 0.2, 1.8)]);
        let second = turn(
            1,
            3.0,
            vec![WordTimestamp::new("How", 1.0, 1.5), WordTimestamp::new("so", 1.6, 2.9)],
        );
        let timeline = rescale(&[&first, &second], 5.5).unwrap();

        assert!((timeline.scale_factor - 1.1).abs() < 1e-12);
        assert!((timeline.words[1].start_seconds - 3.3).abs() < 1e-9);
        assert!((timeline.words[0].start_seconds - 0.22).abs() < 1e-9);
        assert_eq!(timeline.words[1].speaker.as_deref(), Some("S1"));
        assert!((timeline.turns[1].start_seconds - 2.2).abs() < 1e-9);
        assert_eq!(timeline.turns[1].end_seconds, 5.5);
    }

    #[test]
    fn clamps_to_true_duration() {
        let only = turn(0, 1.0, vec![WordTimestamp::new("end", 0.5, 1.0)]);
        let timeline = rescale(&[&only], 0.999_999_9).unwrap();
        assert!(timeline.words[0].end_seconds <= 0.999_999_9);

        let overshoot = turn(0, 1.0, vec![WordTimestamp::new("end", 0.5, 1.3)]);
        let timeline = rescale(&[&overshoot], 1.0).unwrap();
        assert_eq!(timeline.words[0].end_seconds, 1.0);
    }

    #[test]
    fn zero_nominal_duration_is_an_error() {
        let silent = turn(0, 0.0, Vec::new());
        assert!(matches!(rescale(&[&silent], 1.0), Err(ReelSyncError::Reconciliation(_))));
        assert!(matches!(rescale(&[], 1.0), Err(ReelSyncError::Reconciliation(_))));
    }

    #[test]
    fn failed_turns_are_dropped() {
        let ok = turn(2, 1.0, Vec::new());
        let mut failed = turn(1, 0.0, Vec::new());
        failed.audio_path = None;
        failed.error = Some(TurnError::Timeout { seconds: 5.0 });

        let results = vec![ok, failed];
        let (survivors, dropped) = partition_results(&results);
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].order_index, 2);
        assert_eq!(dropped, vec![1]);
    }

    #[test]
    fn scale_factor_plausibility() {
        assert!(check_scale_factor(1.1, 0.25));
        assert!(!check_scale_factor(1.6, 0.25));
    }

    #[tokio::test]
    async fn all_failed_turns_cannot_be_reconciled() {
        let mut failed = turn(0, 0.0, Vec::new());
        failed.error = Some(TurnError::Cancelled);
        let dir = tempfile::tempdir().unwrap();
        let err = reconcile(
            &[failed],
            &dir.path().join("combined.wav"),
            &crate::media::concat::DefaultJoiner::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ReelSyncError::Reconciliation(_)));
    }
}
