//! Trait contract tests for TaskStore.
//!
//! Every backend must satisfy the same behavioral contract; the contracts
//! are written once against `&dyn TaskStore` and run per backend.

use std::time::Duration;

use storyforge_state::storage_traits::*;
use storyforge_state::{FsTaskStore, MemoryTaskStore, StorageError, SurrealTaskStore};

// ===========================================================================
// Contracts
// ===========================================================================

async fn contract_put_then_get_returns_identical_record(store: &dyn TaskStore) {
    let mut task = TaskRecord::new(TaskType::Evaluation, 4);
    task.start().unwrap();
    task.advance(2).unwrap();
    store.put(&task).await.unwrap();

    let loaded = store.get(&task.id).await.unwrap().expect("record present");
    assert_eq!(loaded, task);
}

async fn contract_get_missing_returns_none(store: &dyn TaskStore) {
    assert!(store.get(&TaskId::new()).await.unwrap().is_none());
}

async fn contract_put_overwrites(store: &dyn TaskStore) {
    let mut task = TaskRecord::new(TaskType::Evaluation, 1);
    store.put(&task).await.unwrap();
    task.start().unwrap();
    task.complete(serde_json::json!({"objective": 0.8})).unwrap();
    store.put(&task).await.unwrap();

    let loaded = store.get(&task.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, TaskStatus::Completed);
    assert_eq!(loaded.result, Some(serde_json::json!({"objective": 0.8})));
    assert_eq!(store.list(&TaskFilter::all()).await.unwrap().len(), 1);
}

async fn contract_list_filters_by_status(store: &dyn TaskStore) {
    let pending = TaskRecord::new(TaskType::Evaluation, 1);
    let mut running = TaskRecord::new(TaskType::Optimization, 1);
    running.start().unwrap();
    let mut failed = TaskRecord::new(TaskType::Evaluation, 1);
    failed.fail("cancelled").unwrap();

    for t in [&pending, &running, &failed] {
        store.put(t).await.unwrap();
    }

    let all = store.list(&TaskFilter::all()).await.unwrap();
    assert_eq!(all.len(), 3);

    let only_running = store
        .list(&TaskFilter::with_status(TaskStatus::Running))
        .await
        .unwrap();
    assert_eq!(only_running.len(), 1);
    assert_eq!(only_running[0].id, running.id);

    let only_failed = store
        .list(&TaskFilter::with_status(TaskStatus::Failed))
        .await
        .unwrap();
    assert_eq!(only_failed.len(), 1);
    assert_eq!(only_failed[0].error.as_deref(), Some("cancelled"));
}

async fn contract_list_filters_by_type(store: &dyn TaskStore) {
    store
        .put(&TaskRecord::new(TaskType::Evaluation, 1))
        .await
        .unwrap();
    store
        .put(&TaskRecord::new(TaskType::Optimization, 1))
        .await
        .unwrap();

    let filter = TaskFilter {
        status: None,
        task_type: Some(TaskType::Optimization),
    };
    let listed = store.list(&filter).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].task_type, TaskType::Optimization);
}

async fn contract_list_orders_by_creation(store: &dyn TaskStore) {
    let first = TaskRecord::new(TaskType::Evaluation, 1);
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = TaskRecord::new(TaskType::Evaluation, 1);

    store.put(&second).await.unwrap();
    store.put(&first).await.unwrap();

    let listed = store.list(&TaskFilter::all()).await.unwrap();
    assert_eq!(listed[0].id, first.id);
    assert_eq!(listed[1].id, second.id);
}

async fn contract_rejects_unsafe_ids(store: &dyn TaskStore) {
    let mut task = TaskRecord::new(TaskType::Evaluation, 1);
    task.id = TaskId::from("bad id/with slash");
    let err = store.put(&task).await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidTaskId { .. }));
}

macro_rules! store_contracts {
    ($module:ident, $make:expr) => {
        mod $module {
            use super::*;

            #[tokio::test]
            async fn put_then_get_returns_identical_record() {
                let (_guard, store) = $make;
                contract_put_then_get_returns_identical_record(&store).await;
            }

            #[tokio::test]
            async fn get_missing_returns_none() {
                let (_guard, store) = $make;
                contract_get_missing_returns_none(&store).await;
            }

            #[tokio::test]
            async fn put_overwrites() {
                let (_guard, store) = $make;
                contract_put_overwrites(&store).await;
            }

            #[tokio::test]
            async fn list_filters_by_status() {
                let (_guard, store) = $make;
                contract_list_filters_by_status(&store).await;
            }

            #[tokio::test]
            async fn list_filters_by_type() {
                let (_guard, store) = $make;
                contract_list_filters_by_type(&store).await;
            }

            #[tokio::test]
            async fn list_orders_by_creation() {
                let (_guard, store) = $make;
                contract_list_orders_by_creation(&store).await;
            }

            #[tokio::test]
            async fn rejects_unsafe_ids() {
                let (_guard, store) = $make;
                contract_rejects_unsafe_ids(&store).await;
            }
        }
    };
}

store_contracts!(memory, ((), MemoryTaskStore::new()));

store_contracts!(fs, {
    let dir = tempfile::tempdir().unwrap();
    let store = FsTaskStore::new(dir.path()).unwrap();
    (dir, store)
});

store_contracts!(surreal, ((), SurrealTaskStore::in_memory().await.unwrap()));

// ===========================================================================
// Durability
// ===========================================================================

#[tokio::test]
async fn fs_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let mut task = TaskRecord::new(TaskType::Evaluation, 3);
    task.start().unwrap();
    task.advance(3).unwrap();
    task.complete(serde_json::json!({"mean": 0.6})).unwrap();

    {
        let store = FsTaskStore::new(dir.path()).unwrap();
        store.put(&task).await.unwrap();
    }

    let reopened = FsTaskStore::new(dir.path()).unwrap();
    let loaded = reopened.get(&task.id).await.unwrap().unwrap();
    assert_eq!(loaded, task);
}
