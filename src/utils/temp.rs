//! Модуль для работы с промежуточными файлами задания
//!
//! Каждое задание пишет в собственный каталог `work_dir/<job_id>`, а каждая
//! реплика в собственный файл `turn_<order_index>.<ext>` внутри него.
//! Файлы появляются под итоговым именем только целиком: сначала запись во
//! временный файл рядом, потом переименование.

use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::Result;

/// Каталог промежуточных файлов одного задания
#[derive(Debug)]
pub struct JobWorkspace {
    job_id: Uuid,
    dir: PathBuf,
    /// Нужно ли удалять каталог при уничтожении
    cleanup: bool,
}

impl JobWorkspace {
    /// Создать каталог нового задания внутри `work_dir`
    pub fn create(work_dir: &Path, cleanup: bool) -> Result<Self> {
        let job_id = Uuid::new_v4();
        let dir = work_dir.join(job_id.to_string());
        fs::create_dir_all(&dir)?;
        log::debug!("Created job workspace {}", dir.display());

        Ok(Self { job_id, dir, cleanup })
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Путь к итоговой склеенной дорожке
    pub fn combined_audio_path(&self, extension: &str) -> PathBuf {
        self.dir.join(format!("combined.{}", extension))
    }

    /// Не удалять каталог при уничтожении (результат нужен дальше)
    pub fn keep(&mut self) {
        self.cleanup = false;
    }
}

impl Drop for JobWorkspace {
    fn drop(&mut self) {
        if self.cleanup {
            if let Err(e) = fs::remove_dir_all(&self.dir) {
                log::warn!("Failed to remove job workspace {}: {}", self.dir.display(), e);
            }
        }
    }
}

/// Временный путь рядом с `dest` с тем же расширением
pub fn partial_path(dest: &Path) -> PathBuf {
    let file_name = dest
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "audio".to_string());
    let partial_name = match dest.extension() {
        Some(ext) => format!(".{}.partial-{}.{}", file_name, Uuid::new_v4().simple(), ext.to_string_lossy()),
        None => format!(".{}.partial-{}", file_name, Uuid::new_v4().simple()),
    };
    dest.with_file_name(partial_name)
}

/// Временный файл, который удаляется при уничтожении, если его не перенесли
///
/// Будущее реплики может быть сброшено по тайм-ауту в любой точке.
#[derive(Debug)]
pub struct PartialFile {
    path: PathBuf,
    armed: bool,
}

impl PartialFile {
    pub fn new(dest: &Path) -> Self {
        Self {
            path: partial_path(dest),
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Переименовать в `dest`
    pub async fn commit(mut self, dest: &Path) -> Result<()> {
        self.armed = false;
        commit(&self.path, dest).await
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.armed && self.path.exists() {
            if let Err(e) = fs::remove_file(&self.path) {
                log::warn!("Failed to remove partial file {}: {}", self.path.display(), e);
            }
        }
    }
}

fn is_partial_name(name: &str) -> bool {
    name.starts_with('.') && name.contains(".partial-")
}

/// Удалить оставшиеся временные файлы в каталоге, вернуть их число
pub fn sweep_partials(dir: &Path) -> usize {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };
    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !is_partial_name(&name.to_string_lossy()) {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => log::warn!("Failed to remove partial file {}: {}", entry.path().display(), e),
        }
    }
    removed
}

/// Переименовать готовый временный файл в итоговый
pub async fn commit(partial: &Path, dest: &Path) -> Result<()> {
    if let Err(e) = tokio::fs::rename(partial, dest).await {
        let _ = tokio::fs::remove_file(partial).await;
        return Err(e.into());
    }
    Ok(())
}

/// Атомарно записать байты в файл
pub async fn atomic_write(dest: &Path, bytes: &[u8]) -> Result<()> {
    let partial = partial_path(dest);
    if let Err(e) = tokio::fs::write(&partial, bytes).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(e.into());
    }
    commit(&partial, dest).await
}

/// Удалить временный файл, если он остался после сбоя
pub async fn discard(partial: &Path) {
    if tokio::fs::metadata(partial).await.is_ok() {
        if let Err(e) = tokio::fs::remove_file(partial).await {
            log::warn!("Failed to remove partial file {}: {}", partial.display(), e);
        }
    }
}
