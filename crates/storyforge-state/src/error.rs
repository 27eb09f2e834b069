//! Error types for storyforge-state

use thiserror::Error;

/// Errors produced by task persistence and task state transitions.
#[derive(Error, Debug)]
pub enum StorageError {
    /// No record is stored under the given task id.
    #[error("task not found: {task_id}")]
    NotFound { task_id: String },

    /// A transition was attempted on a task that already reached
    /// `completed` or `failed`.
    #[error("task {task_id} is already terminal ({status})")]
    AlreadyTerminal { task_id: String, status: String },

    /// A non-terminal transition that skips a required state
    /// (e.g. completing a task that never started).
    #[error("invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: String,
        to: String,
    },

    /// Task ids must be filesystem- and query-safe.
    #[error("invalid task id: {task_id}")]
    InvalidTaskId { task_id: String },

    /// Backend (database / filesystem) failure.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Record (de)serialization failure.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}
