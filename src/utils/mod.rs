//! Вспомогательные модули: внешние программы и промежуточные файлы

pub mod ffmpeg;
pub mod temp;
