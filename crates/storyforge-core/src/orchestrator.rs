//! Durable, pollable tasks around evaluations and optimizations.
//!
//! `submit_*` persists a `pending` record and returns it immediately; a
//! background tokio task then moves it to `running`, streams progress into
//! the store as work units finish, and finally writes `completed` with the
//! serialized result or `failed` with an error string.
//!
//! The store is the source of truth. Cancelling marks a task `failed`; the
//! worker notices on its next progress write, stops issuing work and
//! discards whatever was still in flight. Terminal records are never
//! rewritten.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn, Instrument};

use storyforge_state::{
    StorageResult, TaskFilter, TaskId, TaskRecord, TaskStatus, TaskStore, TaskType,
};

use crate::domain::{ChampionPrompt, Epic, PromptVersion};
use crate::error::{EngineError, Result};
use crate::eval::{DistributionalEvaluator, ProgressSink};
use crate::evolution::EvolutionEngine;
use crate::metrics::METRICS;
use crate::obs;

/// Error recorded on tasks cancelled through [`TaskOrchestrator::cancel`].
pub const CANCELLED_ERROR: &str = "cancelled";

/// Error recorded on tasks found unfinished by
/// [`TaskOrchestrator::recover_interrupted`].
pub const INTERRUPTED_ERROR: &str = "interrupted: process stopped before the task finished";

#[derive(Clone)]
pub struct TaskOrchestrator {
    store: Arc<dyn TaskStore>,
    evaluator: Arc<DistributionalEvaluator>,
    evolution: Option<Arc<EvolutionEngine>>,
    /// Serializes read-modify-write cycles on task records.
    write_lock: Arc<Mutex<()>>,
}

impl TaskOrchestrator {
    pub fn new(store: Arc<dyn TaskStore>, evaluator: DistributionalEvaluator) -> Self {
        Self {
            store,
            evaluator: Arc::new(evaluator),
            evolution: None,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_evolution(mut self, engine: EvolutionEngine) -> Self {
        self.evolution = Some(Arc::new(engine));
        self
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Start a distributional evaluation of `prompt` over `epics`.
    ///
    /// Progress total is `epics × replicates`.
    pub async fn submit_evaluation(
        &self,
        prompt: PromptVersion,
        epics: Vec<Epic>,
    ) -> Result<TaskRecord> {
        if epics.is_empty() {
            return Err(EngineError::InvalidConfig(
                "evaluation needs at least one epic".to_string(),
            ));
        }
        let total = self.evaluator.total_runs(epics.len());
        let record = self.create(TaskType::Evaluation, total).await?;

        let sink = self.progress_sink(&record.id);
        let evaluator = Arc::clone(&self.evaluator);
        let work = async move {
            let report = evaluator.evaluate(&prompt, &epics, Some(sink)).await?;
            Ok::<_, EngineError>(serde_json::to_value(report)?)
        };
        self.spawn(&record, work);
        Ok(record)
    }

    /// Start a champion/challenger optimization session.
    ///
    /// Progress counts evaluation runs against
    /// [`EvolutionEngine::total_work`], an upper bound that assumes every
    /// generation runs and evaluates `K` fresh challengers; early stops
    /// complete the task with progress filled.
    pub async fn submit_optimization(
        &self,
        champion: ChampionPrompt,
        epics: Vec<Epic>,
    ) -> Result<TaskRecord> {
        let engine = self.evolution.clone().ok_or_else(|| {
            EngineError::InvalidConfig("no evolution engine configured".to_string())
        })?;
        if epics.is_empty() {
            return Err(EngineError::InvalidConfig(
                "optimization needs at least one epic".to_string(),
            ));
        }
        let total = engine.total_work(epics.len());
        let record = self.create(TaskType::Optimization, total).await?;

        let sink = self.progress_sink(&record.id);
        let work = async move {
            let outcome = engine.run(champion, &epics, Some(sink)).await?;
            Ok::<_, EngineError>(serde_json::to_value(outcome)?)
        };
        self.spawn(&record, work);
        Ok(record)
    }

    pub async fn get(&self, id: &TaskId) -> Result<TaskRecord> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| EngineError::TaskNotFound(id.to_string()))
    }

    pub async fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>> {
        Ok(self.store.list(filter).await?)
    }

    /// Mark a pending or running task failed with [`CANCELLED_ERROR`].
    ///
    /// Fails with [`EngineError::TaskAlreadyTerminal`] for finished tasks.
    pub async fn cancel(&self, id: &TaskId) -> Result<TaskRecord> {
        let record = self.update(id, |r| r.fail(CANCELLED_ERROR)).await?;
        obs::emit_task_cancelled(id.as_str(), CANCELLED_ERROR);
        Ok(record)
    }

    /// Poll until the task is terminal.
    pub async fn wait(&self, id: &TaskId, poll_interval: Duration) -> Result<TaskRecord> {
        loop {
            let record = self.get(id).await?;
            if record.is_terminal() {
                return Ok(record);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Fail every `pending` or `running` task with [`INTERRUPTED_ERROR`].
    ///
    /// Call once at startup, before submitting new work: any such record
    /// belongs to an execution that no longer exists. Recorded progress is
    /// kept.
    pub async fn recover_interrupted(&self) -> Result<Vec<TaskRecord>> {
        let mut stale = self
            .store
            .list(&TaskFilter::with_status(TaskStatus::Pending))
            .await?;
        stale.extend(
            self.store
                .list(&TaskFilter::with_status(TaskStatus::Running))
                .await?,
        );

        let mut recovered = Vec::with_capacity(stale.len());
        for record in stale {
            match self.update(&record.id, |r| r.fail(INTERRUPTED_ERROR)).await {
                Ok(r) => {
                    obs::emit_task_cancelled(r.id.as_str(), INTERRUPTED_ERROR);
                    recovered.push(r);
                }
                // Finished between list and update.
                Err(EngineError::TaskAlreadyTerminal { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(recovered)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn create(&self, task_type: TaskType, total: u64) -> Result<TaskRecord> {
        let record = TaskRecord::new(task_type, total);
        self.store.put(&record).await?;
        obs::emit_task_created(record.id.as_str(), task_type.as_str(), total);
        Ok(record)
    }

    fn progress_sink(&self, id: &TaskId) -> Arc<dyn ProgressSink> {
        Arc::new(TaskProgressSink {
            store: Arc::clone(&self.store),
            id: id.clone(),
            write_lock: Arc::clone(&self.write_lock),
        })
    }

    fn spawn<F>(&self, record: &TaskRecord, work: F)
    where
        F: Future<Output = Result<serde_json::Value>> + Send + 'static,
    {
        let span = obs::task_span(record.id.as_str(), record.task_type.as_str());
        let this = self.clone();
        let id = record.id.clone();
        tokio::spawn(async move { this.drive(id, work).await }.instrument(span));
    }

    /// Background body shared by every task type.
    async fn drive<F>(self, id: TaskId, work: F)
    where
        F: Future<Output = Result<serde_json::Value>>,
    {
        let started = Instant::now();
        if let Err(e) = self.update(&id, TaskRecord::start).await {
            // Cancelled before pickup.
            warn!(error = %e, "task not started");
            return;
        }
        obs::emit_task_started(id.as_str());

        let outcome = work.await;
        let finished = match outcome {
            Ok(value) => self.finish(&id, |r| r.complete(value)).await,
            Err(EngineError::Cancelled) => {
                debug!("work stopped after cancellation");
                Ok(None)
            }
            Err(e) => {
                let message = e.to_string();
                self.finish(&id, |r| r.fail(message)).await
            }
        };

        let elapsed = started.elapsed().as_millis() as u64;
        match finished {
            Ok(Some(record)) => {
                METRICS.inc_tasks_finished();
                obs::emit_task_finished(id.as_str(), record.status.as_str(), elapsed);
            }
            Ok(None) => {
                obs::emit_task_finished(id.as_str(), TaskStatus::Failed.as_str(), elapsed);
            }
            Err(e) => warn!(error = %e, "failed to persist task outcome"),
        }
        METRICS.flush();
    }

    /// Apply a terminal transition only if the task is still running;
    /// otherwise the outcome is discarded and `None` returned.
    async fn finish<T>(&self, id: &TaskId, transition: T) -> Result<Option<TaskRecord>>
    where
        T: FnOnce(&mut TaskRecord) -> StorageResult<()>,
    {
        let _guard = self.write_lock.lock().await;
        let mut record = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| EngineError::TaskNotFound(id.to_string()))?;
        if record.status != TaskStatus::Running {
            debug!(status = %record.status, "discarding outcome of task that is no longer running");
            return Ok(None);
        }
        transition(&mut record)?;
        self.store.put(&record).await?;
        Ok(Some(record))
    }

    async fn update<T>(&self, id: &TaskId, transition: T) -> Result<TaskRecord>
    where
        T: FnOnce(&mut TaskRecord) -> StorageResult<()>,
    {
        let _guard = self.write_lock.lock().await;
        let mut record = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| EngineError::TaskNotFound(id.to_string()))?;
        transition(&mut record)?;
        self.store.put(&record).await?;
        Ok(record)
    }
}

/// Writes progress into the task record and reports whether the task is
/// still wanted.
struct TaskProgressSink {
    store: Arc<dyn TaskStore>,
    id: TaskId,
    write_lock: Arc<Mutex<()>>,
}

#[async_trait]
impl ProgressSink for TaskProgressSink {
    async fn advance(&self, completed: u64, total: u64) -> bool {
        let _guard = self.write_lock.lock().await;
        let mut record = match self.store.get(&self.id).await {
            Ok(Some(r)) => r,
            Ok(None) => return false,
            Err(e) => {
                warn!(error = %e, "progress read failed");
                return true;
            }
        };
        if record.status != TaskStatus::Running {
            return false;
        }
        if record.advance(completed).is_err() {
            return false;
        }
        if let Err(e) = self.store.put(&record).await {
            warn!(error = %e, "progress write failed");
        }
        obs::emit_task_progress(self.id.as_str(), record.progress.completed, total);
        true
    }

    async fn still_running(&self) -> bool {
        match self.store.get(&self.id).await {
            Ok(Some(r)) => r.status == TaskStatus::Running,
            Ok(None) => false,
            Err(_) => true,
        }
    }
}
