//! Работа с аудиофайлами: длительность, декодирование, склейка

pub mod audio;
pub mod concat;

pub use audio::{
    decode_mono, detect_speech_region, measure_duration, measure_duration_async, stream_params, PcmAudio, StreamParams,
};
pub use concat::{AudioJoiner, DefaultJoiner, JoinStrategy};
