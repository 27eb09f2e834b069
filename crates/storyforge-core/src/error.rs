//! Engine error taxonomy.
//!
//! Run-level failures (generation errors, judge errors, timeouts) are
//! captured as data on `DistRun` / `ScorerResult` and never surface as
//! `Err` during batch processing; `SchemaInvalid` and `GenerationFailure`
//! supply the failure text recorded on those runs. The remaining variants
//! are returned when a caller contract is violated or a task-level
//! operation cannot proceed.

use storyforge_state::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Output failed structural validation.
    #[error("schema invalid: {0}")]
    SchemaInvalid(String),

    /// Model call error or timeout.
    #[error("generation failed: {0}")]
    GenerationFailure(String),

    /// Judge call error or timeout (every panelist failed).
    #[error("judge failed: {0}")]
    JudgeFailure(String),

    /// Vectors of unequal length passed to `cosine`.
    #[error("dimension mismatch: {left} != {right}")]
    DimensionMismatch { left: usize, right: usize },

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("task {task_id} is already terminal ({status})")]
    TaskAlreadyTerminal { task_id: String, status: String },

    /// The owning task stopped being `running` while work was in flight.
    #[error("cancelled")]
    Cancelled,

    #[error("no archived patch to roll back to")]
    NoPreviousPatch,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("storage error: {0}")]
    Storage(StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { task_id } => EngineError::TaskNotFound(task_id),
            StorageError::AlreadyTerminal { task_id, status } => {
                EngineError::TaskAlreadyTerminal { task_id, status }
            }
            other => EngineError::Storage(other),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_mismatch_display() {
        let err = EngineError::DimensionMismatch { left: 3, right: 4 };
        assert_eq!(err.to_string(), "dimension mismatch: 3 != 4");
    }

    #[test]
    fn storage_terminal_maps_to_task_already_terminal() {
        let err: EngineError = StorageError::AlreadyTerminal {
            task_id: "t-9".to_string(),
            status: "failed".to_string(),
        }
        .into();
        assert!(matches!(err, EngineError::TaskAlreadyTerminal { .. }));
    }

    #[test]
    fn storage_not_found_maps_to_task_not_found() {
        let err: EngineError = StorageError::NotFound {
            task_id: "t-1".to_string(),
        }
        .into();
        assert!(matches!(err, EngineError::TaskNotFound(id) if id == "t-1"));
    }

    #[test]
    fn backend_errors_stay_storage() {
        let err: EngineError = StorageError::Backend("disk full".to_string()).into();
        assert!(err.to_string().contains("disk full"));
    }
}
