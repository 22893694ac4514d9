//! Загрузка сценария диалога
//!
//! Формат JSON:
//! `{"conversation": [{"speaker": "Host", "text": "..."}], "metadata": {"language": "en"}}`.
//! Вместо `speaker` допускается ключ `role`.

use std::path::Path;

use serde::Deserialize;

use crate::error::{ReelSyncError, Result};
use crate::types::{DialogueTurn, VoiceBinding, VoiceMap};

#[derive(Debug, Deserialize)]
struct RawLine {
    #[serde(alias = "role")]
    speaker: Option<String>,
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScriptMetadata {
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawScript {
    conversation: Option<Vec<RawLine>>,
    #[serde(default)]
    metadata: Option<ScriptMetadata>,
}

/// Сценарий: реплики по порядку и метаданные
#[derive(Debug)]
pub struct Script {
    pub turns: Vec<DialogueTurn>,
    pub metadata: ScriptMetadata,
}

/// Разобрать сценарий из строки JSON
pub fn parse_script(json: &str) -> Result<Script> {
    let raw: RawScript =
        serde_json::from_str(json).map_err(|e| ReelSyncError::Script(format!("invalid script JSON: {}", e)))?;
    let lines = raw
        .conversation
        .ok_or_else(|| ReelSyncError::Script("script has no 'conversation' list".to_string()))?;
    if lines.is_empty() {
        return Err(ReelSyncError::Script("conversation is empty".to_string()));
    }

    let mut turns = Vec::with_capacity(lines.len());
    for (order_index, line) in lines.into_iter().enumerate() {
        let speaker = line
            .speaker
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ReelSyncError::Script(format!("line {} has no speaker", order_index)))?;
        let text = line
            .text
            .ok_or_else(|| ReelSyncError::Script(format!("line {} has no text", order_index)))?;
        turns.push(DialogueTurn::new(order_index, speaker, text));
    }

    Ok(Script {
        turns,
        metadata: raw.metadata.unwrap_or_default(),
    })
}

/// Загрузить сценарий из файла
pub fn load_script(path: impl AsRef<Path>) -> Result<Script> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ReelSyncError::FileNotFound(path.display().to_string()));
    }
    let content = std::fs::read_to_string(path)?;
    parse_script(&content)
}

/// Загрузить привязки голосов: JSON список `VoiceBinding`
pub fn load_voices(path: impl AsRef<Path>) -> Result<VoiceMap> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ReelSyncError::FileNotFound(path.display().to_string()));
    }
    let content = std::fs::read_to_string(path)?;
    let bindings: Vec<VoiceBinding> = serde_json::from_str(&content)?;
    Ok(crate::types::voice_map(bindings))
}
