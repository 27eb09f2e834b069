//! Champion/challenger prompt evolution.
//!
//! Each generation:
//! 1. evaluate the champion (reports are cached by prompt id),
//! 2. mine contrast pairs from its report,
//! 3. ask the proposer for `K` challenger patches,
//! 4. evaluate every challenger with the same evaluator,
//! 5. promote at most one challenger whose objective beats the champion
//!    by at least `min_promotion_margin`.
//!
//! When several challengers clear the margin, the winner is drawn from
//! their Pareto front over objective, novelty and constraint fit. Near
//! misses that are not dominated are kept in a small portfolio.
//!
//! The loop stops after `max_generations` or after `patience` generations
//! in a row without a promotion.
//!
//! Progress is counted in evaluation runs against the upper bound
//! [`EvolutionEngine::total_work`]. Cached reports and unused challenger
//! slots are skipped over at the end of each generation, so the counter
//! reaches `generation × per-generation budget` there.

pub mod pareto;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::collaborators::{PatchProposer, ProposalRequest};
use crate::config::{EngineConfig, EvolutionConfig};
use crate::domain::{ChampionPrompt, Epic, PromptVersion};
use crate::error::{EngineError, Result};
use crate::eval::{DistributionalEvaluator, ProgressSink, PromptDistReport};
use crate::metrics::METRICS;
use crate::miner::PairMiner;
use crate::obs;
use crate::similarity::text_similarity;

pub use pareto::{pareto_front, select_winner, Dimensions};

/// One challenger (or portfolio entry) as evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSummary {
    pub prompt_id: String,
    pub patch: String,
    pub objective: f64,
    pub novelty: f64,
    pub constraint_fit: f64,
    pub mean_pass_rate: f64,
    /// Set when the candidate's evaluation failed; such candidates are
    /// never promoted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CandidateSummary {
    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            objective: self.objective,
            novelty: self.novelty,
            constraint_fit: self.constraint_fit,
        }
    }

    fn is_usable(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    /// 1-based.
    pub generation: usize,
    pub champion_id: String,
    pub champion_objective: f64,
    pub pairs_mined: usize,
    pub candidates: Vec<CandidateSummary>,
    /// Prompt id of the promoted challenger, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promoted: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MaxGenerations,
    /// `patience` consecutive generations without promotion.
    Stagnation,
}

/// Final state of an optimization session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionOutcome {
    pub champion: ChampionPrompt,
    pub champion_report: PromptDistReport,
    pub generations: Vec<GenerationRecord>,
    /// Non-dominated near-miss challengers, best objective first.
    pub portfolio: Vec<CandidateSummary>,
    pub stop_reason: StopReason,
}

/// Drives generations of propose → evaluate → promote.
#[derive(Clone)]
pub struct EvolutionEngine {
    evaluator: DistributionalEvaluator,
    proposer: Arc<dyn PatchProposer>,
    miner: PairMiner,
    config: EvolutionConfig,
}

impl EvolutionEngine {
    pub fn new(
        evaluator: DistributionalEvaluator,
        proposer: Arc<dyn PatchProposer>,
        miner: PairMiner,
        config: EvolutionConfig,
    ) -> Self {
        Self {
            evaluator,
            proposer,
            miner,
            config,
        }
    }

    pub fn from_config(
        evaluator: DistributionalEvaluator,
        proposer: Arc<dyn PatchProposer>,
        config: &EngineConfig,
    ) -> Self {
        Self::new(
            evaluator,
            proposer,
            PairMiner::new(config.miner),
            config.evolution,
        )
    }

    pub fn config(&self) -> &EvolutionConfig {
        &self.config
    }

    pub fn evaluator(&self) -> &DistributionalEvaluator {
        &self.evaluator
    }

    /// Evaluation runs one generation can spend: champion plus `K`
    /// challengers, each over every epic and replicate.
    pub fn runs_per_generation(&self, epics: usize) -> u64 {
        (self.config.challengers_per_generation as u64 + 1) * self.evaluator.total_runs(epics)
    }

    /// Upper bound on the evaluation runs of a whole session; the progress
    /// total of optimization tasks.
    pub fn total_work(&self, epics: usize) -> u64 {
        self.config.max_generations as u64 * self.runs_per_generation(epics)
    }

    /// Run the full optimization loop starting from `champion`.
    ///
    /// `progress` is advanced as every evaluation run finishes, in units of
    /// [`total_work`](Self::total_work); returning `false` yields
    /// [`EngineError::Cancelled`].
    #[instrument(
        skip_all,
        fields(epics = epics.len(), max_generations = self.config.max_generations)
    )]
    pub async fn run(
        &self,
        champion: ChampionPrompt,
        epics: &[Epic],
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> Result<EvolutionOutcome> {
        let mut champion = champion;
        let mut cache: HashMap<String, PromptDistReport> = HashMap::new();
        let mut seen_patches: Vec<String> = champion
            .history()
            .iter()
            .map(|a| a.patch.clone())
            .chain(std::iter::once(champion.patch().to_string()))
            .filter(|p| !p.trim().is_empty())
            .collect();
        let mut session = SessionProgress::new(
            progress,
            self.runs_per_generation(epics.len()),
            self.total_work(epics.len()),
        );

        let mut generations = Vec::new();
        let mut portfolio: Vec<CandidateSummary> = Vec::new();
        let mut stale = 0usize;
        let mut stop_reason = StopReason::MaxGenerations;

        for generation in 1..=self.config.max_generations {
            let champion_version = champion.prompt_version();
            let champion_report = self
                .report_for(&champion_version, epics, &mut cache, &mut session)
                .await?;
            let champion_objective = champion_report.objective();

            let pairs = self.miner.mine(&champion_report);
            let request = ProposalRequest {
                champion: &champion,
                report: &champion_report,
                pairs: &pairs,
                count: self.config.challengers_per_generation,
            };
            let proposals = match self.proposer.propose(request).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(
                        generation,
                        error = %e,
                        "patch proposer failed; generation has no challengers"
                    );
                    Vec::new()
                }
            };
            let patches = select_patches(
                proposals,
                champion.patch(),
                self.config.challengers_per_generation,
            );

            let mut candidates = Vec::with_capacity(patches.len());
            for patch in patches {
                let version = champion.candidate(&patch);
                let novelty = novelty(&patch, &seen_patches);
                let evaluated = self
                    .report_for(&version, epics, &mut cache, &mut session)
                    .await;
                let summary = match evaluated {
                    Ok(report) => CandidateSummary {
                        prompt_id: version.id.clone(),
                        patch: patch.clone(),
                        objective: report.objective(),
                        novelty,
                        constraint_fit: report.constraint_fit(),
                        mean_pass_rate: report.agg.mean_pass_rate,
                        error: None,
                    },
                    Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
                    Err(e) => {
                        warn!(
                            generation,
                            prompt_id = %version.short_id(),
                            error = %e,
                            "challenger evaluation failed"
                        );
                        CandidateSummary {
                            prompt_id: version.id.clone(),
                            patch: patch.clone(),
                            objective: 0.0,
                            novelty,
                            constraint_fit: 0.0,
                            mean_pass_rate: 0.0,
                            error: Some(e.to_string()),
                        }
                    }
                };
                seen_patches.push(patch);
                candidates.push(summary);
            }

            let margin = self.config.min_promotion_margin;
            let improving: Vec<usize> = candidates
                .iter()
                .enumerate()
                .filter(|(_, c)| c.is_usable() && c.objective - champion_objective >= margin)
                .map(|(i, _)| i)
                .collect();
            let winner = winner_among(&candidates, &improving, margin);

            let promoted = match winner {
                Some(i) => {
                    let w = &candidates[i];
                    champion.promote(w.patch.clone(), Some(champion_objective));
                    METRICS.inc_promotions();
                    obs::emit_evolution_promoted(
                        generation,
                        &w.prompt_id,
                        champion_objective,
                        w.objective,
                    );
                    stale = 0;
                    Some(w.prompt_id.clone())
                }
                None => {
                    stale += 1;
                    None
                }
            };

            let champion_id = champion.prompt_version().id;
            portfolio = merge_portfolio(
                portfolio,
                candidates
                    .iter()
                    .filter(|c| {
                        c.is_usable()
                            && c.prompt_id != champion_id
                            && c.objective > champion_objective - margin
                    })
                    .cloned(),
                &champion_id,
                self.config.portfolio_size,
            );

            obs::emit_evolution_generation(
                generation,
                champion_objective,
                candidates.len(),
                promoted.is_some(),
            );
            generations.push(GenerationRecord {
                generation,
                champion_id: champion_version.id,
                champion_objective,
                pairs_mined: pairs.len(),
                candidates,
                promoted,
            });

            if !session.end_generation(generation).await {
                return Err(EngineError::Cancelled);
            }

            if self.config.patience > 0 && stale >= self.config.patience {
                info!(generation, stale, "stopping: no promotion within patience");
                stop_reason = StopReason::Stagnation;
                break;
            }
        }

        let champion_report = self
            .report_for(&champion.prompt_version(), epics, &mut cache, &mut session)
            .await?;
        Ok(EvolutionOutcome {
            champion,
            champion_report,
            generations,
            portfolio,
            stop_reason,
        })
    }

    async fn report_for(
        &self,
        version: &PromptVersion,
        epics: &[Epic],
        cache: &mut HashMap<String, PromptDistReport>,
        session: &mut SessionProgress,
    ) -> Result<PromptDistReport> {
        if let Some(report) = cache.get(&version.id) {
            return Ok(report.clone());
        }
        let report = self
            .evaluator
            .evaluate(version, epics, session.evaluation_sink())
            .await?;
        session.done += report.total_runs() as u64;
        cache.insert(version.id.clone(), report.clone());
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Session-wide run counter fed by every evaluation of one `run` call.
struct SessionProgress {
    outer: Option<Arc<dyn ProgressSink>>,
    per_generation: u64,
    total: u64,
    /// Runs finished by completed evaluations, plus skipped budget.
    done: u64,
}

impl SessionProgress {
    fn new(outer: Option<Arc<dyn ProgressSink>>, per_generation: u64, total: u64) -> Self {
        Self {
            outer,
            per_generation,
            total,
            done: 0,
        }
    }

    /// Sink for the next evaluation, offset by what is already done.
    fn evaluation_sink(&self) -> Option<Arc<dyn ProgressSink>> {
        self.outer.clone().map(|outer| {
            Arc::new(OffsetSink {
                outer,
                offset: self.done,
                total: self.total,
            }) as Arc<dyn ProgressSink>
        })
    }

    /// Move to the generation boundary; `false` when the owner cancelled.
    async fn end_generation(&mut self, generation: usize) -> bool {
        self.done = self.done.max(generation as u64 * self.per_generation);
        match &self.outer {
            Some(sink) => sink.advance(self.done.min(self.total), self.total).await,
            None => true,
        }
    }
}

/// Reports an evaluation's `completed` as `offset + completed` of the
/// session total.
struct OffsetSink {
    outer: Arc<dyn ProgressSink>,
    offset: u64,
    total: u64,
}

#[async_trait]
impl ProgressSink for OffsetSink {
    async fn advance(&self, completed: u64, _total: u64) -> bool {
        self.outer.advance(self.offset + completed, self.total).await
    }

    async fn still_running(&self) -> bool {
        self.outer.still_running().await
    }
}

/// Trimmed, distinct, non-empty proposals that differ from the current
/// patch, at most `limit`.
fn select_patches(proposals: Vec<String>, current: &str, limit: usize) -> Vec<String> {
    let current = current.trim();
    let mut out: Vec<String> = Vec::new();
    for p in proposals {
        let p = p.trim();
        if p.is_empty() || p == current || out.iter().any(|o| o == p) {
            continue;
        }
        out.push(p.to_string());
        if out.len() == limit {
            break;
        }
    }
    out
}

/// `1 − max similarity` to previously seen patches; 1 when none exist.
fn novelty(patch: &str, seen: &[String]) -> f64 {
    let max_sim = seen
        .iter()
        .map(|s| text_similarity(patch, s))
        .fold(0.0, f64::max);
    (1.0 - max_sim).clamp(0.0, 1.0)
}

/// Pareto-front pick among the improving candidates. Objectives closer
/// than `margin` are not told apart, so novelty and constraint fit decide.
fn winner_among(
    candidates: &[CandidateSummary],
    improving: &[usize],
    margin: f64,
) -> Option<usize> {
    let dims: Vec<Dimensions> = improving
        .iter()
        .map(|&i| candidates[i].dimensions())
        .collect();
    let front = pareto_front(&dims);
    select_winner(&dims, &front, margin).map(|k| improving[k])
}

/// Combine the portfolio with new entries, keep the Pareto front, best
/// objective first, at most `cap` entries.
fn merge_portfolio(
    current: Vec<CandidateSummary>,
    new: impl Iterator<Item = CandidateSummary>,
    champion_id: &str,
    cap: usize,
) -> Vec<CandidateSummary> {
    let mut pool: Vec<CandidateSummary> = Vec::new();
    for c in current.into_iter().chain(new) {
        if c.prompt_id == champion_id || pool.iter().any(|p| p.prompt_id == c.prompt_id) {
            continue;
        }
        pool.push(c);
    }
    let dims: Vec<Dimensions> = pool.iter().map(CandidateSummary::dimensions).collect();
    let mut kept: Vec<CandidateSummary> = pareto_front(&dims)
        .into_iter()
        .map(|i| pool[i].clone())
        .collect();
    kept.sort_by(|a, b| b.objective.total_cmp(&a.objective));
    kept.truncate(cap);
    kept
}
