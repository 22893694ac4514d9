//! Системный голос ОС
//!
//! На macOS используется `say`, на остальных платформах `espeak-ng`. Оба
//! пишут несжатый WAV, поэтому длительность читается из заголовка. Текст
//! передается через файл, а не аргументом командной строки.

use std::ffi::OsString;
use std::io::Write;
use std::path::Path;

use async_trait::async_trait;

use crate::config::{LocalVoiceConfig, LocalVoiceEngine};
use crate::error::TurnError;
use crate::tts::SpeechSynthesizer;
use crate::types::Provider;
use crate::utils::ffmpeg;

pub struct LocalSynthesizer {
    config: LocalVoiceConfig,
}

impl LocalSynthesizer {
    pub fn new(config: LocalVoiceConfig) -> Self {
        Self { config }
    }

    fn binary(&self) -> &str {
        match (&self.config.binary, self.config.engine) {
            (Some(binary), _) => binary.as_str(),
            (None, LocalVoiceEngine::Say) => "say",
            (None, LocalVoiceEngine::EspeakNg) => "espeak-ng",
        }
    }

    /// Аргументы командной строки для записи `text_file` в `dest`
    fn command_args(&self, voice_id: &str, text_file: &Path, dest: &Path) -> Vec<OsString> {
        match self.config.engine {
            LocalVoiceEngine::Say => vec![
                "-v".into(),
                voice_id.into(),
                "-o".into(),
                dest.as_os_str().to_os_string(),
                "--file-format=WAVE".into(),
                format!("--data-format=LEI16@{}", self.config.sample_rate).into(),
                "-f".into(),
                text_file.as_os_str().to_os_string(),
            ],
            LocalVoiceEngine::EspeakNg => vec![
                "-v".into(),
                voice_id.into(),
                "-w".into(),
                dest.as_os_str().to_os_string(),
                "-f".into(),
                text_file.as_os_str().to_os_string(),
            ],
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for LocalSynthesizer {
    fn provider(&self) -> Provider {
        Provider::LocalOs
    }

    fn file_extension(&self) -> &str {
        "wav"
    }

    fn is_available(&self) -> bool {
        ffmpeg::is_installed(self.binary())
    }

    async fn synthesize_to_file(&self, text: &str, voice_id: &str, dest: &Path) -> std::result::Result<(), TurnError> {
        let provider = self.provider();
        let fail = |reason: String| TurnError::synthesis(provider, reason);

        let text_dir = dest.parent().unwrap_or_else(|| Path::new("."));
        let mut text_file = tempfile::Builder::new()
            .prefix(".tts_text")
            .suffix(".txt")
            .tempfile_in(text_dir)
            .map_err(|e| fail(format!("failed to create text file: {}", e)))?;
        text_file
            .write_all(text.as_bytes())
            .and_then(|_| text_file.flush())
            .map_err(|e| fail(format!("failed to write text file: {}", e)))?;

        let binary = self.binary().to_string();
        let args = self.command_args(voice_id, text_file.path(), dest);
        log::debug!("Synthesizing {} chars with {} voice '{}'", text.len(), binary, voice_id);

        ffmpeg::run_checked(&binary, &args)
            .await
            .map_err(|e| fail(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn say_writes_pcm_wave() {
        let synthesizer = LocalSynthesizer::new(LocalVoiceConfig {
            engine: LocalVoiceEngine::Say,
            binary: None,
            sample_rate: 22050,
        });
        let args = synthesizer.command_args("Samantha", Path::new("/tmp/t.txt"), Path::new("/tmp/t.wav"));
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().to_string()).collect();
        assert_eq!(synthesizer.binary(), "say");
        assert!(args.contains(&"--file-format=WAVE".to_string()));
        assert!(args.contains(&"--data-format=LEI16@22050".to_string()));
        assert_eq!(&args[0..2], &["-v".to_string(), "Samantha".to_string()]);
    }

    #[test]
    fn espeak_uses_configured_binary() {
        let synthesizer = LocalSynthesizer::new(LocalVoiceConfig {
            engine: LocalVoiceEngine::EspeakNg,
            binary: Some("/opt/bin/espeak-ng".to_string()),
            sample_rate: 22050,
        });
        assert_eq!(synthesizer.binary(), "/opt/bin/espeak-ng");
        let args = synthesizer.command_args("en-us", Path::new("t.txt"), Path::new("t.wav"));
        assert_eq!(args[2], OsString::from("-w"));
    }

    #[tokio::test]
    async fn missing_binary_is_a_synthesis_error() {
        let synthesizer = LocalSynthesizer::new(LocalVoiceConfig {
            engine: LocalVoiceEngine::EspeakNg,
            binary: Some("reel-sync-no-such-voice".to_string()),
            sample_rate: 22050,
        });
        assert!(!synthesizer.is_available());
        let dir = tempfile::tempdir().unwrap();
        let err = synthesizer
            .synthesize_to_file("Hello", "en", &dir.path().join("t.wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, TurnError::Synthesis { provider: Some(Provider::LocalOs), .. }));
    }
}
