//! Построение окон субтитров по меткам слов
//!
//! Слово короче `min_clip_duration_seconds` или без единой буквы/цифры
//! считается шумом выравнивания. Шум не получает собственного окна: он
//! продлевает предыдущее окно до своего конца, а если предыдущего окна нет,
//! следующее окно начинается с начала шума. Если шумом оказались все слова,
//! получается одно окно на весь участок.

use crate::error::{ReelSyncError, Result};
use crate::types::{CaptionEvent, ReconciledTimeline, WordTimestamp};

/// Допуск на погрешность вычислений при проверке порядка меток
const ORDER_EPSILON: f64 = 1e-9;

/// Окна субтитров и число слитых слов
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionWindows {
    pub events: Vec<CaptionEvent>,
    pub merged_words: usize,
}

/// Детерминированное зерно анимации по номеру окна (splitmix64)
pub fn animation_seed(index: usize) -> u64 {
    let mut z = (index as u64).wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn is_noise(word: &WordTimestamp, min_clip_duration: f64) -> bool {
    word.duration() < min_clip_duration || !word.text.chars().any(char::is_alphanumeric)
}

fn validate(words: &[WordTimestamp], min_clip_duration: f64) -> Result<()> {
    if !(min_clip_duration.is_finite() && min_clip_duration >= 0.0) {
        return Err(ReelSyncError::Configuration(format!(
            "min_clip_duration_seconds must be a non-negative number, got {}",
            min_clip_duration
        )));
    }
    let mut previous_end = f64::NEG_INFINITY;
    for (i, word) in words.iter().enumerate() {
        if !(word.start_seconds.is_finite() && word.end_seconds.is_finite()) {
            return Err(ReelSyncError::InvalidTimeline(format!(
                "word {} ('{}') has a non-finite timestamp",
                i, word.text
            )));
        }
        if word.start_seconds > word.end_seconds {
            return Err(ReelSyncError::InvalidTimeline(format!(
                "word {} ('{}') starts at {:.3}s after it ends at {:.3}s",
                i, word.text, word.start_seconds, word.end_seconds
            )));
        }
        if word.start_seconds + ORDER_EPSILON < previous_end {
            return Err(ReelSyncError::InvalidTimeline(format!(
                "word {} ('{}') starts at {:.3}s before the previous word ends at {:.3}s",
                i, word.text, word.start_seconds, previous_end
            )));
        }
        previous_end = word.end_seconds;
    }
    Ok(())
}

/// Построить окна субтитров и посчитать слитые слова
pub fn window_with_stats(words: &[WordTimestamp], min_clip_duration_seconds: f64) -> Result<CaptionWindows> {
    validate(words, min_clip_duration_seconds)?;

    let mut events: Vec<CaptionEvent> = Vec::new();
    let mut merged_words = 0;
    // начало шума перед первым полноценным словом
    let mut leading_start: Option<f64> = None;
    let mut leading: Vec<&WordTimestamp> = Vec::new();

    for word in words {
        if is_noise(word, min_clip_duration_seconds) {
            merged_words += 1;
            match events.last_mut() {
                Some(previous) => previous.end_seconds = previous.end_seconds.max(word.end_seconds),
                None => {
                    leading_start.get_or_insert(word.start_seconds);
                    leading.push(word);
                }
            }
            continue;
        }

        // перекрытие в пределах допуска не попадает в окна
        let floor = events.last().map_or(f64::NEG_INFINITY, |e| e.end_seconds);
        let start = leading_start.take().unwrap_or(word.start_seconds).max(floor);
        events.push(CaptionEvent {
            display_text: word.text.clone(),
            start_seconds: start,
            end_seconds: word.end_seconds.max(start),
            animation_seed: animation_seed(events.len()),
            speaker: word.speaker.clone(),
        });
    }

    if events.is_empty() {
        if let (Some(first), Some(last)) = (leading.first(), leading.last()) {
            let display_text = leading
                .iter()
                .map(|w| w.text.trim())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            events.push(CaptionEvent {
                display_text,
                start_seconds: first.start_seconds,
                end_seconds: last.end_seconds,
                animation_seed: animation_seed(0),
                speaker: first.speaker.clone(),
            });
            // все слова вошли в одно окно
            merged_words = leading.len().saturating_sub(1);
        }
    }

    Ok(CaptionWindows { events, merged_words })
}

/// Окна субтитров для последовательности слов
pub fn window_words(words: &[WordTimestamp], min_clip_duration_seconds: f64) -> Result<Vec<CaptionEvent>> {
    window_with_stats(words, min_clip_duration_seconds).map(|w| w.events)
}

/// Окна субтитров для сведенной шкалы
pub fn window(timeline: &ReconciledTimeline, min_clip_duration_seconds: f64) -> Result<Vec<CaptionEvent>> {
    window_words(&timeline.words, min_clip_duration_seconds)
}
