//! Global atomic counters for StoryForge observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a task).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters, no allocations and no locking.
pub struct Metrics {
    runs_scored: AtomicU64,
    runs_failed: AtomicU64,
    judge_failures: AtomicU64,
    promotions: AtomicU64,
    tasks_finished: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            runs_scored: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            judge_failures: AtomicU64::new(0),
            promotions: AtomicU64::new(0),
            tasks_finished: AtomicU64::new(0),
        }
    }

    /// A generate+score run produced a score.
    pub fn inc_runs_scored(&self) {
        self.runs_scored.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_scored", "counter incremented");
    }

    /// A run failed at generation (error, timeout or panic).
    pub fn inc_runs_failed(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_failed", "counter incremented");
    }

    /// A judged sub-metric degraded to 0 because its whole panel failed.
    pub fn inc_judge_failures(&self) {
        self.judge_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "judge_failures", "counter incremented");
    }

    pub fn inc_promotions(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "promotions", "counter incremented");
    }

    pub fn inc_tasks_finished(&self) {
        self.tasks_finished.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "tasks_finished", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            runs_scored = self.runs_scored(),
            runs_failed = self.runs_failed(),
            judge_failures = self.judge_failures(),
            promotions = self.promotions(),
            tasks_finished = self.tasks_finished(),
        );
    }

    pub fn runs_scored(&self) -> u64 {
        self.runs_scored.load(Ordering::Relaxed)
    }

    pub fn runs_failed(&self) -> u64 {
        self.runs_failed.load(Ordering::Relaxed)
    }

    pub fn judge_failures(&self) -> u64 {
        self.judge_failures.load(Ordering::Relaxed)
    }

    pub fn promotions(&self) -> u64 {
        self.promotions.load(Ordering::Relaxed)
    }

    pub fn tasks_finished(&self) -> u64 {
        self.tasks_finished.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.runs_scored.store(0, Ordering::Relaxed);
        self.runs_failed.store(0, Ordering::Relaxed);
        self.judge_failures.store(0, Ordering::Relaxed);
        self.promotions.store(0, Ordering::Relaxed);
        self.tasks_finished.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_runs_scored();
        m.inc_runs_scored();
        m.inc_runs_failed();
        m.inc_judge_failures();
        m.inc_promotions();
        m.inc_tasks_finished();
        assert_eq!(m.runs_scored(), 2);
        assert_eq!(m.runs_failed(), 1);
        assert_eq!(m.judge_failures(), 1);
        assert_eq!(m.promotions(), 1);
        assert_eq!(m.tasks_finished(), 1);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_runs_scored();
        m.inc_promotions();
        m.reset();
        assert_eq!(m.runs_scored(), 0);
        assert_eq!(m.promotions(), 0);
    }
}
