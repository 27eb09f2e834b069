//! Judge collaborators and panel aggregation.
//!
//! A panel calls every judge concurrently with a per-judge timeout and
//! combines their scores with a weakest-link rule:
//!
//! ```text
//! effective = max(0, min(scores) − penalty(spread))
//! ```
//!
//! where `spread = max(scores) − min(scores)` selects one of the configured
//! congruence tiers. A judge that errors, times out or answers outside
//! `[0, 1]` contributes a score of 0, so one failed panelist zeroes the
//! metric.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{CongruenceTier, PanelConfig};
use crate::domain::{Epic, StoryPack};
use crate::error::{EngineError, Result};

/// Instructions for the INVEST structural-quality judge.
pub const INVEST_JUDGE_PROMPT: &str = "Rate the story pack against the INVEST criteria \
(Independent, Negotiable, Valuable, Estimable, Small, Testable). \
Respond with JSON {\"score\": <0..1>, \"rationale\": \"...\"}.";

/// Instructions for the acceptance-criteria testability judge.
pub const AC_JUDGE_PROMPT: &str = "Rate how testable the acceptance criteria are. \
Criteria in Given/When/Then form with observable outcomes score highest. \
Respond with JSON {\"score\": <0..1>, \"rationale\": \"...\"}.";

/// One judge's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    pub score: f64,
    pub rationale: String,
}

/// An LLM (or any other) judge of a single quality dimension.
#[async_trait]
pub trait Judge: Send + Sync {
    /// Stable name used in failure notes and logs.
    fn name(&self) -> &str;

    async fn judge(
        &self,
        epic: &Epic,
        pack: &StoryPack,
        judge_prompt: &str,
    ) -> anyhow::Result<JudgeVerdict>;
}

/// Aggregated panel result for one sub-metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelVerdict {
    /// Weakest-link score after the disagreement penalty.
    pub effective: f64,
    /// One score per judge, in panel order; failed judges score 0.
    pub individual: Vec<f64>,
    pub spread: f64,
    pub tier: String,
    pub penalty: f64,
    /// `"<judge>: <error>"` for each panelist that failed.
    pub failures: Vec<String>,
}

/// First tier whose `max_spread` admits `spread`; the last tier otherwise.
pub fn congruence_tier(tiers: &[CongruenceTier], spread: f64) -> Option<&CongruenceTier> {
    tiers
        .iter()
        .find(|t| spread <= t.max_spread)
        .or_else(|| tiers.last())
}

/// Weakest-link aggregation over already-collected scores.
///
/// Returns `None` for an empty score list.
pub fn aggregate(scores: &[f64], tiers: &[CongruenceTier]) -> Option<PanelVerdict> {
    let min = scores.iter().copied().reduce(f64::min)?;
    let max = scores.iter().copied().reduce(f64::max)?;
    let spread = max - min;
    let (tier, penalty) = match congruence_tier(tiers, spread) {
        Some(t) => (t.name.clone(), t.penalty),
        None => ("none".to_string(), 0.0),
    };
    Some(PanelVerdict {
        effective: (min - penalty).max(0.0),
        individual: scores.to_vec(),
        spread,
        tier,
        penalty,
        failures: Vec::new(),
    })
}

/// A set of independently configured judges scoring the same dimension.
#[derive(Clone)]
pub struct JudgePanel {
    judges: Vec<Arc<dyn Judge>>,
    config: PanelConfig,
}

impl JudgePanel {
    pub fn new(judges: Vec<Arc<dyn Judge>>, config: PanelConfig) -> Self {
        Self { judges, config }
    }

    pub fn len(&self) -> usize {
        self.judges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.judges.is_empty()
    }

    /// Ask every judge concurrently and aggregate.
    ///
    /// Individual judge errors, timeouts and out-of-range scores count as
    /// 0 for that judge and are listed in [`PanelVerdict::failures`].
    /// [`EngineError::JudgeFailure`] is returned when the panel is empty or
    /// no judge produced a usable score.
    pub async fn evaluate(
        &self,
        epic: &Epic,
        pack: &StoryPack,
        judge_prompt: &str,
    ) -> Result<PanelVerdict> {
        let timeout = self.config.judge_timeout();
        let calls = self.judges.iter().map(|judge| async move {
            let outcome =
                tokio::time::timeout(timeout, judge.judge(epic, pack, judge_prompt)).await;
            let result = match outcome {
                Err(_) => Err(format!("timed out after {}ms", timeout.as_millis())),
                Ok(Err(e)) => Err(e.to_string()),
                Ok(Ok(v)) if !v.score.is_finite() || !(0.0..=1.0).contains(&v.score) => {
                    Err(format!("score {} outside [0, 1]", v.score))
                }
                Ok(Ok(v)) => Ok(v.score),
            };
            (judge.name().to_string(), result)
        });

        let mut scores = Vec::with_capacity(self.judges.len());
        let mut failures = Vec::new();
        for (name, result) in join_all(calls).await {
            match result {
                Ok(score) => scores.push(score),
                Err(e) => {
                    warn!(judge = %name, error = %e, "judge call failed");
                    failures.push(format!("{name}: {e}"));
                    scores.push(0.0);
                }
            }
        }

        if failures.len() == scores.len() {
            let detail = if failures.is_empty() {
                "panel has no judges".to_string()
            } else {
                failures.join("; ")
            };
            return Err(EngineError::JudgeFailure(detail));
        }
        let mut verdict = aggregate(&scores, &self.config.tiers)
            .ok_or_else(|| EngineError::JudgeFailure("panel has no judges".to_string()))?;
        verdict.failures = failures;
        Ok(verdict)
    }
}
