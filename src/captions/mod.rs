//! Окна субтитров и их экспорт

pub mod export;
pub mod windower;

pub use export::{render, to_srt, to_vtt, write_captions, CaptionFormat};
pub use windower::{animation_seed, window, window_with_stats, window_words, CaptionWindows};
