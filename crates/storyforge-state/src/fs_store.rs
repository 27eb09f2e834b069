//! Filesystem-backed task store.
//!
//! Layout: `<root>/tasks/<task id>.json`, one pretty-printed record per
//! file. Writes go to a temp file in the same directory and are renamed
//! into place, so a crash never leaves a torn record behind.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::storage_traits::*;

/// Durable task store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsTaskStore {
    tasks_dir: PathBuf,
}

impl FsTaskStore {
    /// Create a store rooted at `root`. Creates `root/tasks/` if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let tasks_dir = root.as_ref().join("tasks");
        fs::create_dir_all(&tasks_dir)?;
        Ok(Self { tasks_dir })
    }

    fn record_path(&self, id: &TaskId) -> PathBuf {
        self.tasks_dir.join(format!("{}.json", id.as_str()))
    }

    fn write_record(tasks_dir: &Path, path: &Path, record: &TaskRecord) -> StorageResult<()> {
        let bytes = serde_json::to_vec_pretty(record)?;
        let mut tmp = NamedTempFile::new_in(tasks_dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| StorageError::Io(e.error))?;
        Ok(())
    }

    fn read_record(path: &Path) -> StorageResult<Option<TaskRecord>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn scan(tasks_dir: &Path, filter: &TaskFilter) -> StorageResult<Vec<TaskRecord>> {
        let mut records = Vec::new();
        for entry in fs::read_dir(tasks_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_record(&path) {
                Ok(Some(record)) if filter.matches(&record) => records.push(record),
                Ok(_) => {}
                Err(e) => {
                    // One corrupt file must not hide every other task.
                    warn!(path = %path.display(), error = %e, "skipping unreadable task record");
                }
            }
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.0.cmp(&b.id.0)));
        Ok(records)
    }
}

async fn blocking<T, F>(f: F) -> StorageResult<T>
where
    F: FnOnce() -> StorageResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Backend(format!("blocking task failed: {e}")))?
}

#[async_trait]
impl TaskStore for FsTaskStore {
    async fn put(&self, record: &TaskRecord) -> StorageResult<()> {
        record.id.validate()?;
        let tasks_dir = self.tasks_dir.clone();
        let path = self.record_path(&record.id);
        let record = record.clone();
        debug!(task_id = %record.id, status = %record.status, "writing task record");
        blocking(move || Self::write_record(&tasks_dir, &path, &record)).await
    }

    async fn get(&self, id: &TaskId) -> StorageResult<Option<TaskRecord>> {
        id.validate()?;
        let path = self.record_path(id);
        blocking(move || Self::read_record(&path)).await
    }

    async fn list(&self, filter: &TaskFilter) -> StorageResult<Vec<TaskRecord>> {
        let tasks_dir = self.tasks_dir.clone();
        let filter = *filter;
        blocking(move || Self::scan(&tasks_dir, &filter)).await
    }
}
