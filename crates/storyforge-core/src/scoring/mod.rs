//! Composite scorer for a single generated output.
//!
//! Pipeline:
//! 1. Schema gate: an invalid output scores 0 and nothing else is computed.
//! 2. Five sub-metrics combined with [`ScoreWeights`]: keyword coverage,
//!    INVEST quality, acceptance-criteria testability, duplication and item
//!    count. The two quality metrics come from a [`JudgePanel`] when one is
//!    configured and from deterministic heuristics otherwise.
//! 3. Gate decision from the composite and [`GateThresholds`].
//!
//! Judge failures degrade the affected sub-metric to 0 with a note in the
//! reason; scoring itself never fails.

pub mod judge;
pub mod metrics;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{GateThresholds, ScoreWeights, ScorerConfig};
use crate::domain::{Epic, GeneratedOutput, StoryPack};
use crate::error::{EngineError, Result};
use crate::metrics::METRICS;

pub use judge::{
    aggregate, congruence_tier, Judge, JudgePanel, JudgeVerdict, PanelVerdict, AC_JUDGE_PROMPT,
    INVEST_JUDGE_PROMPT,
};

/// Pass / degrade / block / abstain verdict attached to each score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    Pass,
    Degrade,
    Block,
    /// The judge panel produced nothing usable for either quality metric,
    /// so the composite rests on heuristics alone.
    Abstain,
}

impl GateDecision {
    pub fn from_score(score: f64, gate: &GateThresholds) -> Self {
        if score >= gate.pass {
            GateDecision::Pass
        } else if score >= gate.degrade {
            GateDecision::Degrade
        } else {
            GateDecision::Block
        }
    }
}

/// Individual sub-metric values, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
    pub keyword_coverage: f64,
    pub invest: f64,
    pub acceptance_criteria: f64,
    pub duplication: f64,
    pub item_count: f64,
}

impl SubScores {
    /// Weighted sum clamped to `[0, 1]`.
    pub fn composite(&self, w: &ScoreWeights) -> f64 {
        let raw = w.keyword_coverage * self.keyword_coverage
            + w.invest * self.invest
            + w.acceptance_criteria * self.acceptance_criteria
            + w.duplication * self.duplication
            + w.item_count * self.item_count;
        raw.clamp(0.0, 1.0)
    }
}

/// Outcome of scoring one run. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorerResult {
    pub score: f64,
    pub reason: String,
    /// `None` when the schema gate short-circuited.
    pub sub_scores: Option<SubScores>,
    pub gate: GateDecision,
}

impl ScorerResult {
    pub fn schema_invalid(detail: Option<&str>) -> Self {
        let detail = match detail {
            Some(d) if !d.is_empty() => d.to_string(),
            _ => "no story pack parsed".to_string(),
        };
        Self {
            score: 0.0,
            reason: EngineError::SchemaInvalid(detail).to_string(),
            sub_scores: None,
            gate: GateDecision::Block,
        }
    }
}

/// Scores one output against its epic. The evaluator depends on this seam
/// rather than on [`Scorer`] so alternative scorers can be plugged in.
#[async_trait]
pub trait RunScorer: Send + Sync {
    async fn score(&self, epic: &Epic, output: &GeneratedOutput) -> ScorerResult;
}

/// The standard five-metric scorer.
#[derive(Clone)]
pub struct Scorer {
    config: ScorerConfig,
    panel: Option<JudgePanel>,
}

impl Scorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self {
            config,
            panel: None,
        }
    }

    pub fn with_panel(mut self, panel: JudgePanel) -> Self {
        self.panel = Some(panel);
        self
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    /// Judged metric value plus an optional reason note.
    async fn judged(
        panel: &JudgePanel,
        label: &str,
        epic: &Epic,
        pack: &StoryPack,
        prompt: &str,
    ) -> (Result<PanelVerdict>, Option<String>) {
        let verdict = panel.evaluate(epic, pack, prompt).await;
        let note = match &verdict {
            Ok(v) if v.failures.is_empty() => None,
            Ok(v) => {
                METRICS.inc_judge_failures();
                Some(format!(
                    "{label} scored {:.2}: {} of {} judges failed ({})",
                    v.effective,
                    v.failures.len(),
                    panel.len(),
                    v.failures.join("; ")
                ))
            }
            Err(e) => {
                METRICS.inc_judge_failures();
                Some(format!("{label} scored 0: {e}"))
            }
        };
        (verdict, note)
    }

    async fn score_pack(&self, epic: &Epic, pack: &StoryPack) -> ScorerResult {
        let mut notes = Vec::new();

        let (invest, acceptance_criteria, abstain) = match &self.panel {
            Some(panel) if !panel.is_empty() => {
                let ((invest, invest_note), (ac, ac_note)) = tokio::join!(
                    Self::judged(panel, "invest", epic, pack, INVEST_JUDGE_PROMPT),
                    Self::judged(panel, "acceptance_criteria", epic, pack, AC_JUDGE_PROMPT),
                );
                notes.extend(invest_note);
                notes.extend(ac_note);
                let abstain = invest.is_err() && ac.is_err();
                (
                    invest.map(|v| v.effective).unwrap_or(0.0),
                    ac.map(|v| v.effective).unwrap_or(0.0),
                    abstain,
                )
            }
            _ => (
                metrics::invest_heuristic(pack),
                metrics::gwt_heuristic(pack),
                false,
            ),
        };

        let sub = SubScores {
            keyword_coverage: metrics::keyword_coverage(epic, pack),
            invest,
            acceptance_criteria,
            duplication: metrics::duplication(pack, self.config.duplicate_similarity),
            item_count: metrics::item_count(pack.stories.len(), self.config.target_items),
        };
        let score = sub.composite(&self.config.weights);
        let gate = if abstain {
            GateDecision::Abstain
        } else {
            GateDecision::from_score(score, &self.config.gate)
        };

        let mut reason = format!(
            "score {score:.3}: keywords {:.2}, invest {:.2}, criteria {:.2}, \
             duplication {:.2}, items {:.2} ({} stories)",
            sub.keyword_coverage,
            sub.invest,
            sub.acceptance_criteria,
            sub.duplication,
            sub.item_count,
            pack.stories.len(),
        );
        if !notes.is_empty() {
            reason.push_str("; ");
            reason.push_str(&notes.join("; "));
        }

        ScorerResult {
            score,
            reason,
            sub_scores: Some(sub),
            gate,
        }
    }
}

#[async_trait]
impl RunScorer for Scorer {
    async fn score(&self, epic: &Epic, output: &GeneratedOutput) -> ScorerResult {
        match &output.story_pack {
            Some(pack) => self.score_pack(epic, pack).await,
            None => ScorerResult::schema_invalid(output.error.as_deref()),
        }
    }
}
