//! Модуль для работы с аудио
//!
//! Измерение длительности по самому файлу (заголовок WAV, кадры кодека),
//! декодирование в моно PCM и поиск участка речи по энергии сигнала.

use std::fs::File;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecType, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{ReelSyncError, Result};
use crate::utils::ffmpeg;

/// Моно PCM в диапазоне [-1.0, 1.0]
#[derive(Debug, Clone)]
pub struct PcmAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl PcmAudio {
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

pub fn is_wav(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("wav") || e.eq_ignore_ascii_case("wave"))
        .unwrap_or(false)
}

/// Длительность WAV по заголовку
pub fn wav_duration(path: &Path) -> Result<f64> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(ReelSyncError::AudioProcessing(format!(
            "WAV file {} reports a zero sample rate",
            path.display()
        )));
    }
    // duration() считается в кадрах (сэмплах на канал)
    Ok(reader.duration() as f64 / spec.sample_rate as f64)
}

fn open_format(path: &Path) -> Result<Box<dyn FormatReader>> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    Ok(probed.format)
}

fn is_end_of_stream(err: &SymphoniaError) -> bool {
    matches!(err, SymphoniaError::IoError(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
}

/// Параметры аудиопотока, от которых зависит склейка без перекодирования
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub codec: CodecType,
    pub sample_rate: u32,
    pub channels: usize,
}

/// Прочитать параметры первого аудиопотока (блокирующий вызов)
pub fn stream_params(path: &Path) -> Result<StreamParams> {
    let format = open_format(path)?;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| ReelSyncError::AudioProcessing(format!("No audio track in {}", path.display())))?;
    let params = &track.codec_params;
    let sample_rate = params.sample_rate.ok_or_else(|| {
        ReelSyncError::AudioProcessing(format!("Unknown sample rate in {}", path.display()))
    })?;
    let channels = params.channels.map(|c| c.count()).ok_or_else(|| {
        ReelSyncError::AudioProcessing(format!("Unknown channel layout in {}", path.display()))
    })?;
    Ok(StreamParams {
        codec: params.codec,
        sample_rate,
        channels,
    })
}

/// Длительность сжатого файла по данным кодека
pub fn encoded_duration(path: &Path) -> Result<f64> {
    let mut format = open_format(path)?;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| ReelSyncError::AudioProcessing(format!("No audio track in {}", path.display())))?;
    let track_id = track.id;
    let params = track.codec_params.clone();

    if let (Some(frames), Some(rate)) = (params.n_frames, params.sample_rate) {
        if rate > 0 && frames > 0 {
            return Ok(frames as f64 / rate as f64);
        }
    }

    // Без счетчика кадров в заголовке проходим по всем пакетам
    let mut total_ts: u64 = 0;
    loop {
        match format.next_packet() {
            Ok(packet) if packet.track_id() == track_id => total_ts += packet.dur,
            Ok(_) => {}
            Err(ref e) if is_end_of_stream(e) => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e.into()),
        }
    }

    if let Some(time_base) = params.time_base {
        let time = time_base.calc_time(total_ts);
        return Ok(time.seconds as f64 + time.frac);
    }
    match params.sample_rate {
        Some(rate) if rate > 0 => Ok(total_ts as f64 / rate as f64),
        _ => Err(ReelSyncError::AudioProcessing(format!(
            "Cannot determine time base of {}",
            path.display()
        ))),
    }
}

/// Измерить фактическую длительность аудиофайла (блокирующий вызов)
pub fn measure_duration(path: &Path) -> Result<f64> {
    if !path.exists() {
        return Err(ReelSyncError::FileNotFound(path.display().to_string()));
    }
    if is_wav(path) {
        wav_duration(path)
    } else {
        encoded_duration(path)
    }
}

/// Измерить длительность в пуле блокирующих задач, с FFprobe как запасным вариантом
pub async fn measure_duration_async(path: &Path) -> Result<f64> {
    let owned: PathBuf = path.to_path_buf();
    let measured = tokio::task::spawn_blocking(move || measure_duration(&owned))
        .await
        .map_err(|e| ReelSyncError::AudioProcessing(format!("Duration task failed: {}", e)))?;

    match measured {
        Ok(duration) => Ok(duration),
        Err(ReelSyncError::FileNotFound(p)) => Err(ReelSyncError::FileNotFound(p)),
        Err(e) => {
            log::warn!(
                "Native duration read failed for {} ({}), falling back to ffprobe",
                path.display(),
                e
            );
            ffmpeg::probe_duration(path).await
        }
    }
}

fn decode_wav(path: &Path) -> Result<PcmAudio> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    Ok(PcmAudio {
        samples: downmix(&interleaved, channels),
        sample_rate: spec.sample_rate,
    })
}

fn decode_encoded(path: &Path) -> Result<PcmAudio> {
    let mut format = open_format(path)?;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| ReelSyncError::AudioProcessing(format!("No audio track in {}", path.display())))?;
    let track_id = track.id;
    let mut decoder = symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(ref e) if is_end_of_stream(e) => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }
        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                let channels = spec.channels.count().max(1);
                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                samples.extend(downmix(buffer.samples(), channels));
            }
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("Skipping undecodable packet in {}: {}", path.display(), e);
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(PcmAudio { samples, sample_rate })
}

fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Декодировать файл в моно PCM (блокирующий вызов)
pub fn decode_mono(path: &Path) -> Result<PcmAudio> {
    if is_wav(path) {
        decode_wav(path)
    } else {
        decode_encoded(path)
    }
}

/// Найти участок речи: от первого до последнего окна с RMS не ниже порога
///
/// Возвращает `(start, end)` в секундах или `None`, если речи нет.
pub fn detect_speech_region(audio: &PcmAudio, rms_threshold: f32, window_ms: u32) -> Option<(f64, f64)> {
    if audio.sample_rate == 0 || audio.samples.is_empty() {
        return None;
    }
    let window = ((audio.sample_rate as u64 * window_ms.max(1) as u64) / 1000).max(1) as usize;

    let mut first: Option<usize> = None;
    let mut last: Option<usize> = None;
    for (i, chunk) in audio.samples.chunks(window).enumerate() {
        let energy: f32 = chunk.iter().map(|s| s * s).sum::<f32>() / chunk.len() as f32;
        if energy.sqrt() >= rms_threshold {
            first.get_or_insert(i);
            last = Some(i);
        }
    }

    let (first, last) = (first?, last?);
    let rate = audio.sample_rate as f64;
    let start = (first * window) as f64 / rate;
    let end = (((last + 1) * window).min(audio.samples.len())) as f64 / rate;
    Some((start, end))
}


#[cfg(test)]
mod tests {
    use super::test_support::write_tone_wav;
    use super::*;

    #[test]
    fn wav_duration_comes_from_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.wav");
        write_tone_wav(&path, 16000, 0.25, 1.0, 0.25);
        let duration = measure_duration(&path).unwrap();
        assert!((duration - 1.5).abs() < 1e-6, "duration = {}", duration);
    }

    #[test]
    fn speech_region_excludes_silence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.wav");
        write_tone_wav(&path, 16000, 0.3, 0.8, 0.5);
        let audio = decode_mono(&path).unwrap();
        assert!((audio.duration_seconds() - 1.6).abs() < 1e-6);

        let (start, end) = detect_speech_region(&audio, 0.01, 20).unwrap();
        assert!((start - 0.3).abs() <= 0.02, "start = {}", start);
        assert!((end - 1.1).abs() <= 0.02, "end = {}", end);
    }

    #[test]
    fn silent_audio_has_no_speech_region() {
        let audio = PcmAudio {
            samples: vec![0.0; 16000],
            sample_rate: 16000,
        };
        assert_eq!(detect_speech_region(&audio, 0.01, 20), None);
    }

    #[test]
    fn missing_file_is_reported() {
        let result = measure_duration(Path::new("/tmp/reel-sync-missing/none.wav"));
        assert!(matches!(result, Err(ReelSyncError::FileNotFound(_))));
    }
}
