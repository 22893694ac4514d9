//! Модуль для запуска внешних программ (FFmpeg, FFprobe и другие)
//!
//! Все процессы запускаются через `tokio::process` с `kill_on_drop`, поэтому
//! отмена ожидающей задачи по таймауту завершает и сам процесс.

use std::ffi::OsStr;
use std::path::Path;
use std::process::{Output, Stdio};

use tokio::process::Command;

use crate::error::{ReelSyncError, Result};

/// Проверка наличия программы в PATH
pub fn is_installed(binary: &str) -> bool {
    which::which(binary).is_ok()
}

/// Проверка наличия FFmpeg
pub fn check_ffmpeg_installed() -> bool {
    is_installed("ffmpeg")
}

/// Запустить программу и дождаться завершения, собрав stdout и stderr
pub async fn run_tool<I, S>(program: &str, args: I) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    log::debug!("Running {:?}", command.as_std());

    let output = command.output().await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ReelSyncError::Configuration(format!("'{}' not found in PATH", program))
        } else {
            ReelSyncError::Io(e)
        }
    })?;

    Ok(output)
}

/// Запустить программу и превратить ненулевой код возврата в ошибку
pub async fn run_checked<I, S>(program: &str, args: I) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_tool(program, args).await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ReelSyncError::AudioProcessing(format!(
            "{} failed with status {}: {}",
            program,
            output.status,
            stderr.trim()
        )));
    }
    Ok(output)
}

/// Запуск команды FFmpeg
pub async fn run_ffmpeg_command<I, S>(args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let base: [&OsStr; 4] = ["-hide_banner".as_ref(), "-loglevel".as_ref(), "error".as_ref(), "-y".as_ref()];
    let args: Vec<std::ffi::OsString> = base
        .iter()
        .map(|a| a.to_os_string())
        .chain(args.into_iter().map(|a| a.as_ref().to_os_string()))
        .collect();
    run_checked("ffmpeg", &args).await?;
    Ok(())
}

/// Получение длительности через FFprobe
pub async fn probe_duration(path: &Path) -> Result<f64> {
    let output = run_checked(
        "ffprobe",
        [
            OsStr::new("-v"),
            OsStr::new("error"),
            OsStr::new("-show_entries"),
            OsStr::new("format=duration"),
            OsStr::new("-of"),
            OsStr::new("default=noprint_wrappers=1:nokey=1"),
            path.as_os_str(),
        ],
    )
    .await?;

    parse_duration_output(&String::from_utf8_lossy(&output.stdout))
}

fn parse_duration_output(stdout: &str) -> Result<f64> {
    let trimmed = stdout.trim();
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| ReelSyncError::AudioProcessing(format!("Failed to parse audio duration: '{}'", trimmed)))
}
