//! StoryForge-State: durable task persistence
//!
//! Evaluation and optimization runs are wrapped as tasks whose state must
//! survive process restarts and be pollable by id. This crate owns the task
//! record model, its one-directional state machine, and the interchangeable
//! storage backends behind a single [`TaskStore`] trait.
//!
//! ## Key Components
//!
//! - `TaskRecord`: status, progress, result or error, timestamps
//! - `TaskStore`: `put` / `get` / `list(filter)`
//! - `MemoryTaskStore`, `FsTaskStore`, `SurrealTaskStore`: backends
//! - `TaskStoreConfig`: backend selection from the environment

pub mod config;
mod error;
pub mod fakes;
pub mod fs_store;
pub mod storage_traits;
pub mod surreal_store;

pub use config::{TaskStoreConfig, DEFAULT_SURREAL_URL, TASK_STORE_ENV};
pub use error::StorageError;
pub use fakes::MemoryTaskStore;
pub use fs_store::FsTaskStore;
pub use storage_traits::{
    StorageResult, TaskFilter, TaskId, TaskProgress, TaskRecord, TaskStatus, TaskStore, TaskType,
};
pub use surreal_store::SurrealTaskStore;
