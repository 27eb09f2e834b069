//! In-memory task store (volatile)
//!
//! `MemoryTaskStore` satisfies the [`TaskStore`] contract without any
//! external dependencies. Used by tests and by short-lived processes that do
//! not need tasks to survive a restart.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::storage_traits::*;

/// In-memory task store backed by a `HashMap<task id, TaskRecord>`.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<HashMap<String, TaskRecord>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<String, TaskRecord>> {
        // A panic while holding the lock cannot leave a record half-written
        // (inserts are single operations), so the data is still usable.
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn put(&self, record: &TaskRecord) -> StorageResult<()> {
        record.id.validate()?;
        self.tasks().insert(record.id.0.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &TaskId) -> StorageResult<Option<TaskRecord>> {
        Ok(self.tasks().get(&id.0).cloned())
    }

    async fn list(&self, filter: &TaskFilter) -> StorageResult<Vec<TaskRecord>> {
        let mut records: Vec<TaskRecord> = self
            .tasks()
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.0.cmp(&b.id.0)));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_roundtrip() {
        let store = MemoryTaskStore::new();
        let task = TaskRecord::new(TaskType::Evaluation, 2);
        store.put(&task).await.unwrap();
        assert_eq!(store.get(&task.id).await.unwrap(), Some(task));
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let store = MemoryTaskStore::new();
        assert!(store.get(&TaskId::new()).await.unwrap().is_none());
    }
}
