//! Engine configuration.
//!
//! One [`EngineConfig`] is constructed at startup (defaults, JSON file, or
//! JSON string) and handed to each component. Every tuned constant lives
//! here under a name; nothing in the engine reads ambient state.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Weights of the five scorer sub-metrics. Must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub keyword_coverage: f64,
    pub invest: f64,
    pub acceptance_criteria: f64,
    pub duplication: f64,
    pub item_count: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            keyword_coverage: 0.25,
            invest: 0.30,
            acceptance_criteria: 0.30,
            duplication: 0.10,
            item_count: 0.05,
        }
    }
}

impl ScoreWeights {
    pub fn sum(&self) -> f64 {
        self.keyword_coverage
            + self.invest
            + self.acceptance_criteria
            + self.duplication
            + self.item_count
    }
}

/// Composite-score cutoffs for the gate decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateThresholds {
    /// `score >= pass` → Pass.
    pub pass: f64,
    /// `degrade <= score < pass` → Degrade; below → Block.
    pub degrade: f64,
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self {
            pass: 0.75,
            degrade: 0.5,
        }
    }
}

/// Inclusive target range for the number of generated stories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRange {
    pub min: usize,
    pub max: usize,
}

impl Default for ItemRange {
    fn default() -> Self {
        Self { min: 4, max: 8 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    pub weights: ScoreWeights,
    pub gate: GateThresholds,
    /// Two stories at or above this text similarity count as duplicates.
    pub duplicate_similarity: f64,
    pub target_items: ItemRange,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            gate: GateThresholds::default(),
            duplicate_similarity: 0.85,
            target_items: ItemRange::default(),
        }
    }
}

/// One judge-panel agreement level: panels whose score spread is at most
/// `max_spread` lose `penalty` from their weakest score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CongruenceTier {
    pub name: String,
    pub max_spread: f64,
    pub penalty: f64,
}

impl CongruenceTier {
    fn new(name: &str, max_spread: f64, penalty: f64) -> Self {
        Self {
            name: name.to_string(),
            max_spread,
            penalty,
        }
    }
}

/// Default congruence tiers, tightest agreement first.
pub fn default_congruence_tiers() -> Vec<CongruenceTier> {
    vec![
        CongruenceTier::new("unanimous", 0.10, 0.0),
        CongruenceTier::new("strong", 0.20, 0.05),
        CongruenceTier::new("moderate", 0.35, 0.10),
        CongruenceTier::new("split", 1.0, 0.20),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    /// Ordered by ascending `max_spread`; the last tier catches everything.
    pub tiers: Vec<CongruenceTier>,
    pub judge_timeout_ms: u64,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            tiers: default_congruence_tiers(),
            judge_timeout_ms: 30_000,
        }
    }
}

impl PanelConfig {
    pub fn judge_timeout(&self) -> Duration {
        Duration::from_millis(self.judge_timeout_ms)
    }
}

/// `objective = pass_rate·passRate + mean_score·meanScore + p10_score·p10
///  − std_penalty·std`.
///
/// Defaults: 0.45 / 0.35 / 0.20 and λ = `std_penalty` = 0.10.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectiveWeights {
    pub pass_rate: f64,
    pub mean_score: f64,
    pub p10_score: f64,
    pub std_penalty: f64,
}

/// Default λ for the standard-deviation penalty.
pub const DEFAULT_STD_PENALTY: f64 = 0.10;

impl Default for ObjectiveWeights {
    fn default() -> Self {
        Self {
            pass_rate: 0.45,
            mean_score: 0.35,
            p10_score: 0.20,
            std_penalty: DEFAULT_STD_PENALTY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Replicates per epic (R).
    pub replicates: usize,
    /// Upper bound on concurrent generate+score runs.
    pub max_concurrency: usize,
    /// A run passes when its score is strictly above this value.
    pub pass_threshold: f64,
    /// Per-generation-call timeout.
    pub call_timeout_ms: u64,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Passing outputs at or above this similarity share a cluster.
    pub cluster_similarity: f64,
    /// `seed = seed_base + epic_index * R + replicate_index`.
    pub seed_base: u64,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            replicates: 5,
            max_concurrency: 4,
            pass_threshold: 0.5,
            call_timeout_ms: 60_000,
            temperature: 0.7,
            max_tokens: 2048,
            cluster_similarity: 0.85,
            seed_base: 0,
        }
    }
}

impl EvalConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinerConfig {
    /// Minimum text similarity for a pair to qualify.
    pub similarity_threshold: f64,
    /// Pairs must differ in score by strictly more than this.
    pub min_score_delta: f64,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.6,
            min_score_delta: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
    pub max_generations: usize,
    /// Challengers requested from the proposer per generation (K).
    pub challengers_per_generation: usize,
    /// A challenger must beat the champion's objective by at least this.
    pub min_promotion_margin: f64,
    /// Stop after this many consecutive generations without promotion (M).
    pub patience: usize,
    /// Maximum size of the retained non-dominated portfolio.
    pub portfolio_size: usize,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            max_generations: 10,
            challengers_per_generation: 3,
            min_promotion_margin: 0.02,
            patience: 3,
            portfolio_size: 3,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scorer: ScorerConfig,
    pub panel: PanelConfig,
    pub eval: EvalConfig,
    pub objective: ObjectiveWeights,
    pub miner: MinerConfig,
    pub evolution: EvolutionConfig,
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(EngineError::InvalidConfig(format!(
            "{name} must be within [0, 1], got {value}"
        )));
    }
    Ok(())
}

impl EngineConfig {
    /// Parse and validate a JSON document. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        let sum = self.scorer.weights.sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(EngineError::InvalidConfig(format!(
                "scorer weights must sum to 1, got {sum}"
            )));
        }
        let w = &self.scorer.weights;
        for (name, v) in [
            ("weights.keyword_coverage", w.keyword_coverage),
            ("weights.invest", w.invest),
            ("weights.acceptance_criteria", w.acceptance_criteria),
            ("weights.duplication", w.duplication),
            ("weights.item_count", w.item_count),
            ("gate.pass", self.scorer.gate.pass),
            ("gate.degrade", self.scorer.gate.degrade),
            ("duplicate_similarity", self.scorer.duplicate_similarity),
            ("eval.pass_threshold", self.eval.pass_threshold),
            ("eval.cluster_similarity", self.eval.cluster_similarity),
            ("miner.similarity_threshold", self.miner.similarity_threshold),
        ] {
            check_unit(name, v)?;
        }
        if self.scorer.gate.degrade > self.scorer.gate.pass {
            return Err(EngineError::InvalidConfig(
                "gate.degrade must not exceed gate.pass".to_string(),
            ));
        }
        let range = self.scorer.target_items;
        if range.min == 0 || range.min > range.max {
            return Err(EngineError::InvalidConfig(format!(
                "target_items must satisfy 0 < min <= max, got {}..={}",
                range.min, range.max
            )));
        }
        if self.panel.tiers.is_empty() {
            return Err(EngineError::InvalidConfig(
                "panel.tiers must not be empty".to_string(),
            ));
        }
        if self
            .panel
            .tiers
            .windows(2)
            .any(|w| w[0].max_spread > w[1].max_spread || w[0].penalty > w[1].penalty)
        {
            return Err(EngineError::InvalidConfig(
                "panel.tiers must be ordered by ascending spread and penalty".to_string(),
            ));
        }
        if self.eval.replicates == 0 {
            return Err(EngineError::InvalidConfig(
                "eval.replicates must be at least 1".to_string(),
            ));
        }
        if self.eval.max_concurrency == 0 {
            return Err(EngineError::InvalidConfig(
                "eval.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.objective.std_penalty < 0.0 {
            return Err(EngineError::InvalidConfig(
                "objective.std_penalty must be non-negative".to_string(),
            ));
        }
        if self.evolution.min_promotion_margin < 0.0 {
            return Err(EngineError::InvalidConfig(
                "evolution.min_promotion_margin must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}
