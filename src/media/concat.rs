//! Объединение аудиофайлов реплик в одну дорожку
//!
//! Выбор способа зависит от входных файлов:
//! - все WAV с одинаковыми параметрами: побайтовая склейка сэмплов через hound;
//! - один контейнер, кодек, частота и число каналов: FFmpeg concat demuxer
//!   с копированием потока;
//! - все остальное: FFmpeg concat filter с декодированием в PCM WAV.
//!
//! Результат сначала пишется во временный файл и переименовывается по готовности.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::error::{ReelSyncError, Result};
use crate::media::audio::{is_wav, stream_params, StreamParams};
use crate::utils::{ffmpeg, temp};

/// Способ склейки, выбранный для набора файлов
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStrategy {
    WavSamples,
    StreamCopy,
    DecodeToWav,
}

/// Склейка аудиофайлов
#[async_trait]
pub trait AudioJoiner: Send + Sync {
    /// Расширение итогового файла для данных входов
    fn output_extension(&self, inputs: &[PathBuf]) -> String;

    /// Склеить `inputs` по порядку в `output`
    async fn join(&self, inputs: &[PathBuf], output: &Path) -> Result<()>;
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_ascii_lowercase())
}

fn common_extension(inputs: &[PathBuf]) -> Option<String> {
    let first = extension_of(inputs.first()?)?;
    inputs
        .iter()
        .all(|p| extension_of(p).as_deref() == Some(first.as_str()))
        .then_some(first)
}

fn common_wav_spec(inputs: &[PathBuf]) -> Option<WavSpec> {
    if inputs.is_empty() || !inputs.iter().all(|p| is_wav(p)) {
        return None;
    }
    let mut spec: Option<WavSpec> = None;
    for input in inputs {
        let current = WavReader::open(input).ok()?.spec();
        match spec {
            None => spec = Some(current),
            Some(s) if s == current => {}
            Some(_) => return None,
        }
    }
    spec
}

/// Совпадают ли параметры всех потоков
///
/// concat demuxer берет параметры потока из первого файла, поэтому любое
/// расхождение исказило бы длительность остальных.
pub fn streams_match(params: &[StreamParams]) -> bool {
    match params.first() {
        Some(first) => params.iter().all(|p| p == first),
        None => false,
    }
}

fn common_stream_params(inputs: &[PathBuf]) -> bool {
    if common_extension(inputs).is_none() {
        return false;
    }
    let mut params = Vec::with_capacity(inputs.len());
    for input in inputs {
        match stream_params(input) {
            Ok(p) => params.push(p),
            Err(e) => {
                log::debug!("Cannot read stream parameters of {}: {}", input.display(), e);
                return false;
            }
        }
    }
    streams_match(&params)
}

/// Выбрать способ склейки (читает заголовки входных файлов)
pub fn choose_strategy(inputs: &[PathBuf]) -> JoinStrategy {
    if common_wav_spec(inputs).is_some() {
        JoinStrategy::WavSamples
    } else if !inputs.iter().all(|p| is_wav(p)) && common_stream_params(inputs) {
        JoinStrategy::StreamCopy
    } else {
        JoinStrategy::DecodeToWav
    }
}

/// Склейка WAV без перекодирования (блокирующий вызов)
pub fn concat_wav_files(inputs: &[PathBuf], output: &Path) -> Result<()> {
    let spec = common_wav_spec(inputs).ok_or_else(|| {
        ReelSyncError::AudioProcessing("WAV inputs must share one format to be joined directly".to_string())
    })?;

    let mut writer = WavWriter::create(output, spec)?;
    for input in inputs {
        let mut reader = WavReader::open(input)?;
        match spec.sample_format {
            SampleFormat::Float => {
                for sample in reader.samples::<f32>() {
                    writer.write_sample(sample?)?;
                }
            }
            SampleFormat::Int => {
                for sample in reader.samples::<i32>() {
                    writer.write_sample(sample?)?;
                }
            }
        }
    }
    writer.finalize()?;
    Ok(())
}

fn escape_concat_path(path: &Path) -> String {
    path.to_string_lossy().replace('\'', "'\\''")
}

/// Склейка через FFmpeg concat demuxer без перекодирования
pub async fn concat_stream_copy(inputs: &[PathBuf], output: &Path) -> Result<()> {
    let list_dir = output.parent().unwrap_or_else(|| Path::new("."));
    let mut list = tempfile::Builder::new()
        .prefix(".concat_list")
        .suffix(".txt")
        .tempfile_in(list_dir)?;
    for input in inputs {
        let absolute = if input.is_absolute() {
            input.clone()
        } else {
            std::env::current_dir()?.join(input)
        };
        writeln!(list, "file '{}'", escape_concat_path(&absolute))?;
    }
    list.flush()?;

    let list_path = list.path().to_path_buf();
    let args: Vec<std::ffi::OsString> = vec![
        "-f".into(),
        "concat".into(),
        "-safe".into(),
        "0".into(),
        "-i".into(),
        list_path.into_os_string(),
        "-c".into(),
        "copy".into(),
        output.as_os_str().to_os_string(),
    ];
    ffmpeg::run_ffmpeg_command(&args).await
}

/// Склейка разнородных файлов через FFmpeg concat filter в PCM WAV
pub async fn concat_decode_to_wav(inputs: &[PathBuf], output: &Path, sample_rate: u32) -> Result<()> {
    let mut args: Vec<std::ffi::OsString> = Vec::new();
    for input in inputs {
        args.push("-i".into());
        args.push(input.as_os_str().to_os_string());
    }

    let mut filter = String::new();
    for i in 0..inputs.len() {
        filter.push_str(&format!(
            "[{i}:a]aresample={rate},aformat=sample_fmts=s16:channel_layouts=mono[a{i}];",
            i = i,
            rate = sample_rate
        ));
    }
    for i in 0..inputs.len() {
        filter.push_str(&format!("[a{}]", i));
    }
    filter.push_str(&format!("concat=n={}:v=0:a=1[out]", inputs.len()));

    args.extend([
        "-filter_complex".into(),
        filter.into(),
        "-map".into(),
        "[out]".into(),
        "-c:a".into(),
        "pcm_s16le".into(),
        output.as_os_str().to_os_string(),
    ]);
    ffmpeg::run_ffmpeg_command(&args).await
}

/// Стандартная реализация склейки
#[derive(Debug, Clone)]
pub struct DefaultJoiner {
    /// Частота дискретизации при перекодировании разнородных входов
    pub decode_sample_rate: u32,
}

impl Default for DefaultJoiner {
    fn default() -> Self {
        Self {
            decode_sample_rate: 44100,
        }
    }
}

#[async_trait]
impl AudioJoiner for DefaultJoiner {
    fn output_extension(&self, inputs: &[PathBuf]) -> String {
        match choose_strategy(inputs) {
            JoinStrategy::DecodeToWav => "wav".to_string(),
            _ => common_extension(inputs).unwrap_or_else(|| "wav".to_string()),
        }
    }

    async fn join(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        if inputs.is_empty() {
            return Err(ReelSyncError::AudioProcessing("Nothing to join".to_string()));
        }
        let strategy = choose_strategy(inputs);
        log::info!(
            "Joining {} audio files into {} ({:?})",
            inputs.len(),
            output.display(),
            strategy
        );

        let partial = temp::PartialFile::new(output);
        let target = partial.path().to_path_buf();
        match strategy {
            JoinStrategy::WavSamples => {
                let inputs = inputs.to_vec();
                tokio::task::spawn_blocking(move || concat_wav_files(&inputs, &target))
                    .await
                    .map_err(|e| ReelSyncError::AudioProcessing(format!("WAV join task failed: {}", e)))??
            }
            JoinStrategy::StreamCopy => concat_stream_copy(inputs, &target).await?,
            JoinStrategy::DecodeToWav => concat_decode_to_wav(inputs, &target, self.decode_sample_rate).await?,
        }
        partial.commit(output).await
    }
}
