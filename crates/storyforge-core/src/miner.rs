//! Contrastive pair mining.
//!
//! For each epic, find the two runs that look most alike on the surface
//! while differing most in quality. Those pairs isolate what a prompt
//! change should push toward (`good`) and away from (`bad`).

use serde::{Deserialize, Serialize};

use crate::config::MinerConfig;
use crate::eval::{DistRun, EpicDistResult, PromptDistReport};
use crate::similarity::text_similarity;

/// One side of a contrast pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairSide {
    pub seed: u64,
    pub score: f64,
    pub text: String,
}

impl PairSide {
    fn from_run(run: &DistRun, text: String) -> Self {
        Self {
            seed: run.seed,
            score: run.score,
            text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContrastPair {
    pub epic_id: String,
    /// Higher-scoring side.
    pub good: PairSide,
    pub bad: PairSide,
    pub similarity: f64,
    pub score_delta: f64,
}

/// Mines at most one pair per epic.
#[derive(Debug, Clone, Copy, Default)]
pub struct PairMiner {
    config: MinerConfig,
}

impl PairMiner {
    pub fn new(config: MinerConfig) -> Self {
        Self { config }
    }

    /// All qualifying pairs across the report, largest delta first.
    pub fn mine(&self, report: &PromptDistReport) -> Vec<ContrastPair> {
        let mut pairs: Vec<ContrastPair> = report
            .per_epic
            .iter()
            .filter_map(|epic| self.mine_epic(epic))
            .collect();
        pairs.sort_by(|a, b| {
            b.score_delta
                .total_cmp(&a.score_delta)
                .then(b.similarity.total_cmp(&a.similarity))
                .then_with(|| a.epic_id.cmp(&b.epic_id))
        });
        pairs
    }

    /// Best pair for one epic: maximal score delta among pairs at or above
    /// the similarity threshold, ties broken by higher similarity. Runs
    /// with no text never pair.
    pub fn mine_epic(&self, epic: &EpicDistResult) -> Option<ContrastPair> {
        let texts: Vec<String> = epic
            .runs
            .iter()
            .map(|r| r.output.comparison_text())
            .collect();

        let mut best: Option<(usize, usize, f64, f64)> = None;
        for i in 0..epic.runs.len() {
            if texts[i].trim().is_empty() {
                continue;
            }
            for j in (i + 1)..epic.runs.len() {
                if texts[j].trim().is_empty() {
                    continue;
                }
                let delta = (epic.runs[i].score - epic.runs[j].score).abs();
                if delta <= self.config.min_score_delta {
                    continue;
                }
                let similarity = text_similarity(&texts[i], &texts[j]);
                if similarity < self.config.similarity_threshold {
                    continue;
                }
                let better = match best {
                    None => true,
                    Some((_, _, best_delta, best_sim)) => {
                        delta > best_delta || (delta == best_delta && similarity > best_sim)
                    }
                };
                if better {
                    best = Some((i, j, delta, similarity));
                }
            }
        }

        let (i, j, score_delta, similarity) = best?;
        let (good, bad) = if epic.runs[i].score >= epic.runs[j].score {
            (i, j)
        } else {
            (j, i)
        };
        Some(ContrastPair {
            epic_id: epic.epic_id.clone(),
            good: PairSide::from_run(&epic.runs[good], texts[good].clone()),
            bad: PairSide::from_run(&epic.runs[bad], texts[bad].clone()),
            similarity,
            score_delta,
        })
    }
}
