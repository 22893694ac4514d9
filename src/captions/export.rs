//! Экспорт окон субтитров в SRT и WebVTT

use std::fmt::Write;
use std::path::Path;

use crate::error::Result;
use crate::types::CaptionEvent;
use crate::utils::temp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptionFormat {
    Srt,
    WebVtt,
}

impl CaptionFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Srt => "srt",
            Self::WebVtt => "vtt",
        }
    }
}

/// Время в формате `HH:MM:SS,mmm` (SRT) или `HH:MM:SS.mmm` (WebVTT)
fn format_timestamp(seconds: f64, separator: char) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{:02}:{:02}:{:02}{}{:03}", hours, minutes, secs, separator, millis)
}

pub fn to_srt(events: &[CaptionEvent]) -> String {
    let mut out = String::new();
    for (i, event) in events.iter().enumerate() {
        let _ = writeln!(out, "{}", i + 1);
        let _ = writeln!(
            out,
            "{} --> {}",
            format_timestamp(event.start_seconds, ','),
            format_timestamp(event.end_seconds, ',')
        );
        let _ = writeln!(out, "{}\n", event.display_text);
    }
    out
}

pub fn to_vtt(events: &[CaptionEvent]) -> String {
    let mut out = String::from("WEBVTT\n\n");
    for event in events {
        let _ = writeln!(
            out,
            "{} --> {}",
            format_timestamp(event.start_seconds, '.'),
            format_timestamp(event.end_seconds, '.')
        );
        match &event.speaker {
            Some(speaker) => {
                let _ = writeln!(out, "<v {}>{}\n", speaker, event.display_text);
            }
            None => {
                let _ = writeln!(out, "{}\n", event.display_text);
            }
        }
    }
    out
}

pub fn render(events: &[CaptionEvent], format: CaptionFormat) -> String {
    match format {
        CaptionFormat::Srt => to_srt(events),
        CaptionFormat::WebVtt => to_vtt(events),
    }
}

/// Записать субтитры в файл атомарно
pub async fn write_captions(path: &Path, events: &[CaptionEvent], format: CaptionFormat) -> Result<()> {
    let content = render(events, format);
    temp::atomic_write(path, content.as_bytes()).await?;
    log::info!("Wrote {} caption events to {}", events.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events() -> Vec<CaptionEvent> {
        vec![
            CaptionEvent {
                display_text: "Hi.".to_string(),
                start_seconds: 0.0,
                end_seconds: 0.4556,
                animation_seed: 1,
                speaker: Some("Host".to_string()),
            },
            CaptionEvent {
                display_text: "there".to_string(),
                start_seconds: 3661.5,
                end_seconds: 3662.0,
                animation_seed: 2,
                speaker: None,
            },
        ]
    }

    #[test]
    fn srt_layout() {
        let srt = to_srt(&events());
        assert_eq!(
            srt,
            "1\n00:00:00,000 --> 00:00:00,456\nHi.\n\n2\n01:01:01,500 --> 01:01:02,000\nthere\n\n"
        );
    }

    #[test]
    fn vtt_layout() {
        let vtt = to_vtt(&events());
        assert!(vtt.starts_with("WEBVTT\n\n00:00:00.000 --> 00:00:00.456\n<v Host>Hi.\n\n"));
        assert!(vtt.ends_with("01:01:01.500 --> 01:01:02.000\nthere\n\n"));
    }

    #[tokio::test]
    async fn writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!("captions.{}", CaptionFormat::Srt.extension()));
        write_captions(&path, &events(), CaptionFormat::Srt).await.unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().starts_with("1\n00:00:00,000"));
    }
}
