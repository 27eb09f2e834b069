//! Storage trait definitions for StoryForge
//!
//! - `TaskRecord`: durable state of one evaluation/optimization task
//! - `TaskStore`: key-scoped persistence (put/get/list by id)
//!
//! All backends implement the same trait so the orchestration logic never
//! depends on where records live. An in-memory fake is provided in
//! [`crate::fakes`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// TaskId
// ---------------------------------------------------------------------------

/// Unique identifier for a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generate a new random TaskId
    pub fn new() -> Self {
        TaskId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Ids end up in file names and query bindings; only
    /// `[A-Za-z0-9_-]` is accepted.
    pub fn validate(&self) -> StorageResult<()> {
        let ok = !self.0.is_empty()
            && self.0.len() <= 128
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if ok {
            Ok(())
        } else {
            Err(StorageError::InvalidTaskId {
                task_id: self.0.clone(),
            })
        }
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        TaskId(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Task model
// ---------------------------------------------------------------------------

/// Kind of work wrapped by a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// One distributional evaluation of a prompt.
    Evaluation,
    /// A full champion/challenger optimization run.
    Optimization,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Evaluation => "evaluation",
            TaskType::Optimization => "optimization",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Units of work finished so far out of the planned total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskProgress {
    pub completed: u64,
    pub total: u64,
}

/// Full durable task record.
///
/// Transitions (enforced by the methods below):
/// - `Pending → Running` on pickup
/// - `Running → Completed | Failed`
/// - `Pending → Failed` (cancelled or interrupted before pickup)
///
/// Terminal records never change again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub progress: TaskProgress,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskRecord {
    /// Create a new pending task with `total` planned units of work.
    pub fn new(task_type: TaskType, total: u64) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            task_type,
            status: TaskStatus::Pending,
            progress: TaskProgress {
                completed: 0,
                total,
            },
            created_at: now,
            updated_at: now,
            result: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn ensure_not_terminal(&self) -> StorageResult<()> {
        if self.is_terminal() {
            return Err(StorageError::AlreadyTerminal {
                task_id: self.id.0.clone(),
                status: self.status.to_string(),
            });
        }
        Ok(())
    }

    fn invalid(&self, to: TaskStatus) -> StorageError {
        StorageError::InvalidTransition {
            task_id: self.id.0.clone(),
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }

    /// `Pending → Running`.
    pub fn start(&mut self) -> StorageResult<()> {
        self.ensure_not_terminal()?;
        if self.status != TaskStatus::Pending {
            return Err(self.invalid(TaskStatus::Running));
        }
        self.status = TaskStatus::Running;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record progress. Progress never moves backwards and never exceeds
    /// the planned total; stale (smaller) values are ignored.
    pub fn advance(&mut self, completed: u64) -> StorageResult<()> {
        self.ensure_not_terminal()?;
        if self.status != TaskStatus::Running {
            return Err(self.invalid(TaskStatus::Running));
        }
        let clamped = completed.min(self.progress.total);
        if clamped > self.progress.completed {
            self.progress.completed = clamped;
            self.updated_at = Utc::now();
        }
        Ok(())
    }

    /// `Running → Completed`.
    pub fn complete(&mut self, result: serde_json::Value) -> StorageResult<()> {
        self.ensure_not_terminal()?;
        if self.status != TaskStatus::Running {
            return Err(self.invalid(TaskStatus::Completed));
        }
        self.status = TaskStatus::Completed;
        self.progress.completed = self.progress.total;
        self.result = Some(result);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// `Pending | Running → Failed`. Recorded progress is preserved.
    pub fn fail(&mut self, error: impl Into<String>) -> StorageResult<()> {
        self.ensure_not_terminal()?;
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Filter for [`TaskStore::list`]. `None` fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub task_type: Option<TaskType>,
}

impl TaskFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            task_type: None,
        }
    }

    pub fn matches(&self, record: &TaskRecord) -> bool {
        self.status.map(|s| s == record.status).unwrap_or(true)
            && self.task_type.map(|t| t == record.task_type).unwrap_or(true)
    }
}

/// Key-scoped task persistence.
///
/// Guarantees:
/// - `put` overwrites the record stored under `record.id` (last write wins;
///   each task has a single owning execution).
/// - `get` returns the exact record last written, or `None`.
/// - `list` returns matching records ordered by `created_at` ascending.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert or replace the record under its id.
    async fn put(&self, record: &TaskRecord) -> StorageResult<()>;

    /// Fetch a record by id.
    async fn get(&self, id: &TaskId) -> StorageResult<Option<TaskRecord>>;

    /// List records matching `filter`.
    async fn list(&self, filter: &TaskFilter) -> StorageResult<Vec<TaskRecord>>;
}
