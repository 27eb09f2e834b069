//! SurrealDB-backed TaskStore implementation
//!
//! Each task is one row in the `tasks` table. Indexed columns (`task_id`,
//! `status`, `task_type`, `created_at`) are stored as plain strings; the
//! full record travels as a JSON `payload` so the row layout stays stable
//! when `TaskRecord` grows fields.

use async_trait::async_trait;
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::storage_traits::*;

const NAMESPACE: &str = "storyforge";
const DATABASE: &str = "main";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TaskRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<surrealdb::sql::Thing>,
    task_id: String,
    status: String,
    task_type: String,
    /// RFC 3339 with fixed precision so string order equals time order.
    created_at: String,
    payload: String,
}

impl TaskRow {
    fn from_record(record: &TaskRecord) -> StorageResult<Self> {
        let task_type = serde_json::to_value(record.task_type)?
            .as_str()
            .unwrap_or_default()
            .to_string();
        Ok(Self {
            id: None,
            task_id: record.id.0.clone(),
            status: record.status.as_str().to_string(),
            task_type,
            created_at: record
                .created_at
                .to_rfc3339_opts(SecondsFormat::Micros, true),
            payload: serde_json::to_string(record)?,
        })
    }

    fn into_record(self) -> StorageResult<TaskRecord> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

/// SurrealDB-backed implementation of [`TaskStore`].
pub struct SurrealTaskStore {
    db: Surreal<Any>,
}

impl SurrealTaskStore {
    /// Connect to any SurrealDB endpoint (`mem://`, `surrealkv://<dir>`,
    /// `ws://host:port`), select `storyforge/main` and initialise the schema.
    pub async fn connect(url: &str) -> StorageResult<Self> {
        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StorageError::Backend(format!("failed to connect to {url}: {e}")))?;

        db.use_ns(NAMESPACE).use_db(DATABASE).await?;
        init_schema(&db).await?;

        info!(url = %url, "SurrealTaskStore connected");
        Ok(Self { db })
    }

    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> StorageResult<Self> {
        Self::connect("mem://").await
    }

    async fn fetch_row(&self, task_id: &str) -> StorageResult<Option<TaskRow>> {
        let tid = task_id.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM tasks WHERE task_id = $tid")
            .bind(("tid", tid))
            .await?;
        let rows: Vec<TaskRow> = res.take(0)?;
        Ok(rows.into_iter().next())
    }
}

/// Define the `tasks` table and its indexes. Idempotent.
async fn init_schema(db: &Surreal<Any>) -> StorageResult<()> {
    let sql = r#"
        DEFINE TABLE IF NOT EXISTS tasks SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_task_id ON TABLE tasks COLUMNS task_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_task_status ON TABLE tasks COLUMNS status;
        DEFINE INDEX IF NOT EXISTS idx_task_created ON TABLE tasks COLUMNS created_at;
    "#;
    db.query(sql).await?.check()?;
    debug!("tasks table initialised");
    Ok(())
}

#[async_trait]
impl TaskStore for SurrealTaskStore {
    async fn put(&self, record: &TaskRecord) -> StorageResult<()> {
        record.id.validate()?;
        let row = TaskRow::from_record(record)?;

        if self.fetch_row(&record.id.0).await?.is_none() {
            let _created: Option<TaskRow> = self.db.create("tasks").content(row).await?;
        } else {
            let tid = record.id.0.clone();
            self.db
                .query("UPDATE tasks CONTENT $row WHERE task_id = $tid")
                .bind(("row", row))
                .bind(("tid", tid))
                .await?
                .check()?;
        }
        debug!(task_id = %record.id, status = %record.status, "task row written");
        Ok(())
    }

    async fn get(&self, id: &TaskId) -> StorageResult<Option<TaskRecord>> {
        id.validate()?;
        self.fetch_row(&id.0)
            .await?
            .map(TaskRow::into_record)
            .transpose()
    }

    async fn list(&self, filter: &TaskFilter) -> StorageResult<Vec<TaskRecord>> {
        let rows: Vec<TaskRow> = if let Some(status) = filter.status {
            let mut res = self
                .db
                .query("SELECT * FROM tasks WHERE status = $status ORDER BY created_at ASC")
                .bind(("status", status.as_str().to_string()))
                .await?;
            res.take(0)?
        } else {
            let mut res = self
                .db
                .query("SELECT * FROM tasks ORDER BY created_at ASC")
                .await?;
            res.take(0)?
        };

        let mut records = rows
            .into_iter()
            .map(TaskRow::into_record)
            .collect::<StorageResult<Vec<_>>>()?;
        records.retain(|r| filter.matches(r));
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.0.cmp(&b.id.0)));
        Ok(records)
    }
}
