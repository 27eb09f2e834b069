//! Task store backend selection.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::fakes::MemoryTaskStore;
use crate::fs_store::FsTaskStore;
use crate::storage_traits::{StorageResult, TaskStore};
use crate::surreal_store::SurrealTaskStore;

/// Environment variable naming the task store backend.
pub const TASK_STORE_ENV: &str = "STORYFORGE_TASK_STORE";

/// Local persistence used when nothing is configured.
pub const DEFAULT_SURREAL_URL: &str = "surrealkv://.storyforge/db";

/// Which backend holds task records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStoreConfig {
    /// Volatile; tasks are lost on restart.
    Memory,
    /// One JSON file per task under the given directory.
    Fs(PathBuf),
    /// Any SurrealDB endpoint URL (`mem://`, `surrealkv://…`, `ws://…`).
    Surreal(String),
}

impl TaskStoreConfig {
    /// Parse a backend string: `memory`, `fs:<dir>`, or a SurrealDB URL.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.eq_ignore_ascii_case("memory") {
            TaskStoreConfig::Memory
        } else if let Some(dir) = value.strip_prefix("fs:") {
            TaskStoreConfig::Fs(PathBuf::from(dir))
        } else {
            TaskStoreConfig::Surreal(value.to_string())
        }
    }

    /// Read [`TASK_STORE_ENV`], falling back to [`DEFAULT_SURREAL_URL`].
    pub fn from_env() -> Self {
        match std::env::var(TASK_STORE_ENV) {
            Ok(value) if !value.trim().is_empty() => Self::parse(&value),
            _ => TaskStoreConfig::Surreal(DEFAULT_SURREAL_URL.to_string()),
        }
    }

    /// Open the configured backend.
    pub async fn open(&self) -> StorageResult<Arc<dyn TaskStore>> {
        match self {
            TaskStoreConfig::Memory => {
                info!("using in-memory task store (tasks will not survive restart)");
                Ok(Arc::new(MemoryTaskStore::new()))
            }
            TaskStoreConfig::Fs(dir) => {
                info!(dir = %dir.display(), "using filesystem task store");
                Ok(Arc::new(FsTaskStore::new(dir)?))
            }
            TaskStoreConfig::Surreal(url) => {
                if let Some(dir) = url.strip_prefix("surrealkv://") {
                    std::fs::create_dir_all(dir)?;
                }
                Ok(Arc::new(SurrealTaskStore::connect(url).await?))
            }
        }
    }
}
