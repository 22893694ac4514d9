//! Модуль для кэширования результатов TTS
//!
//! Ключ кэша считается по провайдеру, голосу и подготовленному тексту, файл
//! хранится под именем `<md5>.<ext>`. При превышении лимита размера удаляются
//! самые старые файлы.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::CacheConfig;
use crate::error::{ReelSyncError, Result};
use crate::types::Provider;
use crate::utils::temp;

/// Кэш синтезированных реплик на диске
#[derive(Debug, Clone)]
pub struct SynthesisCache {
    /// Директория для кэша
    cache_dir: PathBuf,
    /// Максимальный размер кэша в байтах
    max_size: Option<u64>,
}

impl SynthesisCache {
    pub fn new(cache_dir: impl Into<PathBuf>, max_size: Option<u64>) -> Result<Self> {
        let cache_dir = cache_dir.into();
        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir)?;
        }
        Ok(Self { cache_dir, max_size })
    }

    /// Кэш по конфигурации; `None`, если кэш выключен
    pub fn from_config(config: &CacheConfig) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }
        let dir = config
            .dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("reel-sync-cache"));
        Self::new(dir, config.max_size_bytes).map(Some)
    }

    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Генерировать ключ для кэша
    pub fn cache_key(provider: Provider, voice_id: &str, text: &str) -> String {
        let mut hasher = md5::Context::new();
        hasher.consume(provider.as_str().as_bytes());
        hasher.consume([0u8]);
        hasher.consume(voice_id.as_bytes());
        hasher.consume([0u8]);
        hasher.consume(text.as_bytes());

        format!("{:x}", hasher.compute())
    }

    fn entry_path(&self, key: &str, extension: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.{}", key, extension))
    }

    /// Скопировать кэшированный файл в `dest`; `false`, если записи нет
    pub async fn fetch(&self, key: &str, extension: &str, dest: &Path) -> Result<bool> {
        let entry = self.entry_path(key, extension);
        if tokio::fs::metadata(&entry).await.is_err() {
            return Ok(false);
        }
        tokio::fs::copy(&entry, dest).await?;
        Ok(true)
    }

    /// Добавить файл в кэш
    pub async fn store(&self, key: &str, extension: &str, source: &Path) -> Result<()> {
        let entry = self.entry_path(key, extension);
        let partial = temp::partial_path(&entry);
        if let Err(e) = tokio::fs::copy(source, &partial).await {
            temp::discard(&partial).await;
            return Err(e.into());
        }
        temp::commit(&partial, &entry).await?;

        if let Some(max_size) = self.max_size {
            let dir = self.cache_dir.clone();
            tokio::task::spawn_blocking(move || evict_oldest(&dir, max_size))
                .await
                .map_err(|e| ReelSyncError::Other(anyhow::anyhow!("cache eviction task failed: {}", e)))??;
        }
        Ok(())
    }

    /// Очистить кэш
    pub fn clear(&self) -> Result<()> {
        for file in fs::read_dir(&self.cache_dir)? {
            let file = file?;
            if file.file_type()?.is_file() {
                fs::remove_file(file.path())?;
            }
        }
        Ok(())
    }
}

/// Удалять старые файлы, пока размер каталога больше `max_size`
fn evict_oldest(dir: &Path, max_size: u64) -> Result<()> {
    let mut total_size = 0;
    let mut files = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            let metadata = entry.metadata()?;
            total_size += metadata.len();
            files.push((entry.path(), metadata.modified()?, metadata.len()));
        }
    }

    if total_size <= max_size {
        return Ok(());
    }

    files.sort_by(|a, b| a.1.cmp(&b.1));
    for (path, _, len) in files {
        if total_size <= max_size {
            break;
        }
        match fs::remove_file(&path) {
            Ok(()) => total_size = total_size.saturating_sub(len),
            // файл уже удален параллельной задачей
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => total_size = total_size.saturating_sub(len),
            Err(e) => return Err(e.into()),
        }
        log::debug!("Evicted {} from synthesis cache", path.display());
    }
    Ok(())
}
