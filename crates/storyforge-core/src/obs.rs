//! Structured lifecycle events for tasks, evaluations and evolution.
//!
//! Every event is an `info!` (or `warn!`) record with an `event` field so
//! log pipelines can filter on it, e.g. `event=task.finished`.

use tracing::{info, warn};

/// Span that a task's background future is instrumented with, so every
/// record emitted while the task runs carries `task_id` and `task_type`.
///
/// ```ignore
/// tokio::spawn(work.instrument(obs::task_span("task-123", "evaluation")));
/// ```
pub fn task_span(task_id: &str, task_type: &str) -> tracing::Span {
    tracing::info_span!("storyforge.task", task_id = %task_id, task_type = %task_type)
}

pub fn emit_task_created(task_id: &str, task_type: &str, total: u64) {
    info!(event = "task.created", task_id = %task_id, task_type = %task_type, total = total);
}

pub fn emit_task_started(task_id: &str) {
    info!(event = "task.started", task_id = %task_id);
}

pub fn emit_task_progress(task_id: &str, completed: u64, total: u64) {
    tracing::debug!(
        event = "task.progress",
        task_id = %task_id,
        completed = completed,
        total = total
    );
}

/// Emit event: task reached a terminal state.
pub fn emit_task_finished(task_id: &str, status: &str, duration_ms: u64) {
    info!(
        event = "task.finished",
        task_id = %task_id,
        status = %status,
        duration_ms = duration_ms,
    );
}

/// Emit event: a task was cancelled or found interrupted.
pub fn emit_task_cancelled(task_id: &str, reason: &str) {
    warn!(event = "task.cancelled", task_id = %task_id, reason = %reason);
}

/// Emit event: one distributional evaluation finished.
pub fn emit_eval_completed(prompt_id: &str, runs: usize, failed: usize, objective: f64) {
    info!(
        event = "eval.completed",
        prompt_id = %prompt_id,
        runs = runs,
        failed = failed,
        objective = objective,
    );
}

pub fn emit_evolution_generation(
    generation: usize,
    champion_objective: f64,
    challengers: usize,
    promoted: bool,
) {
    info!(
        event = "evolution.generation",
        generation = generation,
        champion_objective = champion_objective,
        challengers = challengers,
        promoted = promoted,
    );
}

pub fn emit_evolution_promoted(generation: usize, prompt_id: &str, from: f64, to: f64) {
    info!(
        event = "evolution.promoted",
        generation = generation,
        prompt_id = %prompt_id,
        from_objective = from,
        to_objective = to,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_span_carries_task_fields() {
        let span = task_span("task-1", "evaluation");
        let _entered = span.enter();
        emit_task_started("task-1");
    }
}
