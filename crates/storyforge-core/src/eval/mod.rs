//! Distributional evaluation of a prompt.
//!
//! A prompt is judged by the distribution of scores it produces, not by one
//! sample: every epic is generated and scored `R` times under fixed seeds,
//! then per-epic and cross-epic statistics are reduced into a scalar
//! objective.
//!
//! Runs fan out under a semaphore. A run that fails (generator error,
//! timeout, panic) becomes a zero-score [`DistRun`] carrying the error and
//! never aborts the batch. Aggregation sorts runs by seed first, so reports
//! do not depend on completion order.

pub mod stats;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tracing::{instrument, warn};

use crate::collaborators::{GenerateOptions, Generator};
use crate::config::{EngineConfig, EvalConfig, ObjectiveWeights};
use crate::domain::{Epic, GeneratedOutput, PromptVersion};
use crate::error::{EngineError, Result};
use crate::metrics::METRICS;
use crate::obs;
use crate::scoring::{GateDecision, RunScorer};

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// One (epic, replicate) generate+score run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistRun {
    pub seed: u64,
    pub score: f64,
    pub pass: bool,
    pub gate: GateDecision,
    pub output: GeneratedOutput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Scorer explanation, or the failure for failed runs.
    pub reason: String,
}

impl DistRun {
    /// A run whose generation call failed: score 0, not passing. The
    /// error's display text is kept as the run's failure.
    pub fn failed(seed: u64, error: &EngineError) -> Self {
        let error = error.to_string();
        Self {
            seed,
            score: 0.0,
            pass: false,
            gate: GateDecision::Block,
            output: GeneratedOutput::failed(error.clone()),
            reason: error.clone(),
            error: Some(error),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Statistics over one epic's runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpicDistResult {
    pub epic_id: String,
    /// Sorted by seed.
    pub runs: Vec<DistRun>,
    pub mean_score: f64,
    pub p10_score: f64,
    pub std_score: f64,
    pub pass_rate: f64,
    /// Distinct clusters among passing outputs.
    pub discoverability_k: usize,
}

impl EpicDistResult {
    pub fn from_runs(
        epic_id: impl Into<String>,
        mut runs: Vec<DistRun>,
        pass_threshold: f64,
        cluster_similarity: f64,
    ) -> Self {
        runs.sort_by_key(|r| r.seed);
        let scores: Vec<f64> = runs.iter().map(|r| r.score).collect();
        let passing: Vec<String> = runs
            .iter()
            .filter(|r| r.pass)
            .map(|r| r.output.comparison_text())
            .filter(|t| !t.trim().is_empty())
            .collect();
        Self {
            epic_id: epic_id.into(),
            mean_score: stats::mean(&scores),
            p10_score: stats::p10(&scores),
            std_score: stats::std_dev(&scores),
            pass_rate: stats::pass_rate(&scores, pass_threshold),
            discoverability_k: stats::distinct_clusters(&passing, cluster_similarity),
            runs,
        }
    }
}

/// Cross-epic means plus the objective.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub mean_of_means: f64,
    pub mean_pass_rate: f64,
    pub mean_p10: f64,
    pub mean_std: f64,
    pub mean_discoverability: f64,
    pub objective: f64,
}

impl AggregateStats {
    pub fn from_epics(per_epic: &[EpicDistResult], weights: &ObjectiveWeights) -> Self {
        let col = |f: fn(&EpicDistResult) -> f64| {
            stats::mean(&per_epic.iter().map(f).collect::<Vec<_>>())
        };
        let mean_of_means = col(|e| e.mean_score);
        let mean_pass_rate = col(|e| e.pass_rate);
        let mean_p10 = col(|e| e.p10_score);
        let mean_std = col(|e| e.std_score);
        Self {
            mean_of_means,
            mean_pass_rate,
            mean_p10,
            mean_std,
            mean_discoverability: col(|e| e.discoverability_k as f64),
            objective: stats::objective(weights, mean_pass_rate, mean_of_means, mean_p10, mean_std),
        }
    }
}

/// Result of evaluating one prompt version over a set of epics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptDistReport {
    pub prompt_id: String,
    pub per_epic: Vec<EpicDistResult>,
    pub agg: AggregateStats,
}

impl PromptDistReport {
    pub fn new(
        prompt_id: impl Into<String>,
        per_epic: Vec<EpicDistResult>,
        weights: &ObjectiveWeights,
    ) -> Self {
        let agg = AggregateStats::from_epics(&per_epic, weights);
        Self {
            prompt_id: prompt_id.into(),
            per_epic,
            agg,
        }
    }

    pub fn objective(&self) -> f64 {
        self.agg.objective
    }

    pub fn runs(&self) -> impl Iterator<Item = &DistRun> {
        self.per_epic.iter().flat_map(|e| e.runs.iter())
    }

    pub fn total_runs(&self) -> usize {
        self.per_epic.iter().map(|e| e.runs.len()).sum()
    }

    pub fn failed_runs(&self) -> usize {
        self.runs().filter(|r| r.is_failed()).count()
    }

    /// Fraction of runs whose output passed schema validation.
    pub fn constraint_fit(&self) -> f64 {
        let total = self.total_runs();
        if total == 0 {
            return 0.0;
        }
        self.runs().filter(|r| r.output.is_valid()).count() as f64 / total as f64
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Receives incremental progress from long-running work.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Record `completed` of `total` units. Returning `false` asks the
    /// caller to stop issuing new work.
    async fn advance(&self, completed: u64, total: u64) -> bool;

    /// Whether the owner still wants results, without recording progress.
    async fn still_running(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// Runs `R` seeded replicates per epic and aggregates them.
#[derive(Clone)]
pub struct DistributionalEvaluator {
    generator: Arc<dyn Generator>,
    scorer: Arc<dyn RunScorer>,
    config: EvalConfig,
    objective: ObjectiveWeights,
}

impl DistributionalEvaluator {
    pub fn new(
        generator: Arc<dyn Generator>,
        scorer: Arc<dyn RunScorer>,
        config: EvalConfig,
        objective: ObjectiveWeights,
    ) -> Self {
        Self {
            generator,
            scorer,
            config,
            objective,
        }
    }

    pub fn from_config(
        generator: Arc<dyn Generator>,
        scorer: Arc<dyn RunScorer>,
        config: &EngineConfig,
    ) -> Self {
        Self::new(generator, scorer, config.eval.clone(), config.objective)
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    pub fn objective_weights(&self) -> &ObjectiveWeights {
        &self.objective
    }

    /// Number of runs an evaluation over `epics` epics performs.
    pub fn total_runs(&self, epics: usize) -> u64 {
        (epics * self.config.replicates) as u64
    }

    /// `seed = seed_base + epic_index · R + replicate_index`.
    pub fn seed_for(&self, epic_index: usize, replicate: usize) -> u64 {
        self.config.seed_base + (epic_index * self.config.replicates + replicate) as u64
    }

    /// Evaluate `prompt` over `epics`.
    ///
    /// Returns [`EngineError::Cancelled`] when `progress` asked to stop;
    /// runs still in flight at that point drain and are discarded.
    #[instrument(skip_all, fields(prompt_id = %prompt.short_id(), epics = epics.len()))]
    pub async fn evaluate(
        &self,
        prompt: &PromptVersion,
        epics: &[Epic],
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> Result<PromptDistReport> {
        if epics.is_empty() {
            return Err(EngineError::InvalidConfig(
                "evaluation needs at least one epic".to_string(),
            ));
        }

        let total = self.total_runs(epics.len());
        let sem = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let (cancel_tx, _cancel_rx) = watch::channel(false);
        let cancel = Arc::new(cancel_tx);
        let completed = Arc::new(AtomicU64::new(0));
        let prompt_text: Arc<str> = Arc::from(prompt.text.as_str());
        let timeout = self.config.call_timeout();

        let mut tasks = Vec::with_capacity(total as usize);
        for (epic_index, epic) in epics.iter().enumerate() {
            let epic = Arc::new(epic.clone());
            for replicate in 0..self.config.replicates {
                let seed = self.seed_for(epic_index, replicate);
                let options = GenerateOptions {
                    seed: Some(seed),
                    temperature: self.config.temperature,
                    max_tokens: self.config.max_tokens,
                };
                let job = RunJob {
                    generator: Arc::clone(&self.generator),
                    scorer: Arc::clone(&self.scorer),
                    epic: Arc::clone(&epic),
                    prompt: Arc::clone(&prompt_text),
                    options,
                    timeout,
                    pass_threshold: self.config.pass_threshold,
                };
                let sem = Arc::clone(&sem);
                let cancel = Arc::clone(&cancel);
                let cancel_rx = cancel.subscribe();
                let completed = Arc::clone(&completed);
                let progress = progress.clone();

                let task = tokio::spawn(async move {
                    let _permit = sem.acquire_owned().await.ok();
                    if *cancel_rx.borrow() {
                        return None;
                    }
                    let run = job.run().await;
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(sink) = progress {
                        if !sink.advance(done, total).await {
                            cancel.send_replace(true);
                        }
                    }
                    Some(run)
                });
                tasks.push((epic_index, seed, task));
            }
        }

        let mut buckets: Vec<Vec<DistRun>> = vec![Vec::new(); epics.len()];
        for (epic_index, seed, task) in tasks {
            match task.await {
                Ok(Some(run)) => buckets[epic_index].push(run),
                Ok(None) => {}
                Err(e) => {
                    warn!(seed, error = %e, "run task aborted");
                    METRICS.inc_runs_failed();
                    let err = EngineError::GenerationFailure(format!("run aborted: {e}"));
                    buckets[epic_index].push(DistRun::failed(seed, &err));
                }
            }
        }

        if *cancel.borrow() {
            return Err(EngineError::Cancelled);
        }

        let per_epic = epics
            .iter()
            .zip(buckets)
            .map(|(epic, runs)| {
                EpicDistResult::from_runs(
                    epic.id.clone(),
                    runs,
                    self.config.pass_threshold,
                    self.config.cluster_similarity,
                )
            })
            .collect();
        let report = PromptDistReport::new(prompt.id.clone(), per_epic, &self.objective);

        obs::emit_eval_completed(
            prompt.short_id(),
            report.total_runs(),
            report.failed_runs(),
            report.objective(),
        );
        Ok(report)
    }
}

/// Everything one spawned run needs, owned.
struct RunJob {
    generator: Arc<dyn Generator>,
    scorer: Arc<dyn RunScorer>,
    epic: Arc<Epic>,
    prompt: Arc<str>,
    options: GenerateOptions,
    timeout: Duration,
    pass_threshold: f64,
}

impl RunJob {
    async fn run(self) -> DistRun {
        let seed = self.options.seed.unwrap_or_default();
        let generated = tokio::time::timeout(
            self.timeout,
            self.generator.generate(&self.epic, &self.prompt, self.options),
        )
        .await;

        let output = match generated {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                METRICS.inc_runs_failed();
                warn!(epic_id = %self.epic.id, seed, error = %e, "generation failed");
                return DistRun::failed(seed, &EngineError::GenerationFailure(format!("{e:#}")));
            }
            Err(_) => {
                METRICS.inc_runs_failed();
                warn!(epic_id = %self.epic.id, seed, "generation timed out");
                let detail = format!("timed out after {}ms", self.timeout.as_millis());
                return DistRun::failed(seed, &EngineError::GenerationFailure(detail));
            }
        };

        let result = self.scorer.score(&self.epic, &output).await;
        METRICS.inc_runs_scored();
        DistRun {
            seed,
            score: result.score,
            pass: result.score > self.pass_threshold,
            gate: result.gate,
            output,
            error: None,
            reason: result.reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(seed: u64, score: f64) -> DistRun {
        DistRun {
            seed,
            score,
            pass: score > 0.5,
            gate: GateDecision::Pass,
            output: GeneratedOutput::invalid(format!("output {seed}"), "n/a"),
            error: None,
            reason: String::new(),
        }
    }

    #[test]
    fn epic_result_sorts_runs_by_seed() {
        let runs = vec![run(3, 0.3), run(1, 0.9), run(2, 0.6)];
        let r = EpicDistResult::from_runs("E1", runs, 0.5, 0.85);
        let seeds: Vec<u64> = r.runs.iter().map(|r| r.seed).collect();
        assert_eq!(seeds, vec![1, 2, 3]);
        assert!((r.mean_score - 0.6).abs() < 1e-9);
        assert!((r.pass_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn failed_run_is_zero_and_not_passing() {
        let r = DistRun::failed(7, &EngineError::GenerationFailure("boom".into()));
        assert_eq!(r.score, 0.0);
        assert!(!r.pass);
        assert!(r.is_failed());
        assert_eq!(r.error.as_deref(), Some("generation failed: boom"));
        assert_eq!(r.reason, "generation failed: boom");
    }

    #[test]
    fn report_aggregates_across_epics() {
        let w = ObjectiveWeights::default();
        let a = EpicDistResult::from_runs("A", vec![run(0, 1.0), run(1, 1.0)], 0.5, 0.85);
        let b = EpicDistResult::from_runs("B", vec![run(2, 0.0), run(3, 0.0)], 0.5, 0.85);
        let report = PromptDistReport::new("p", vec![a, b], &w);
        assert_eq!(report.agg.mean_of_means, 0.5);
        assert_eq!(report.agg.mean_pass_rate, 0.5);
        assert_eq!(report.total_runs(), 4);
        assert_eq!(report.constraint_fit(), 0.0);
        let expected = 0.45 * 0.5 + 0.35 * 0.5 + 0.20 * 0.5;
        assert!((report.objective() - expected).abs() < 1e-9);
    }
}
