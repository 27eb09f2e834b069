//! Pareto-front selection over candidate quality dimensions.

use serde::{Deserialize, Serialize};

/// Quality dimensions a candidate is compared on. Higher is better on all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Distributional objective (reliability).
    pub objective: f64,
    /// `1 − max similarity` to every previously seen patch.
    pub novelty: f64,
    /// Fraction of runs whose output passed schema validation.
    pub constraint_fit: f64,
}

impl Dimensions {
    fn values(&self) -> [f64; 3] {
        [self.objective, self.novelty, self.constraint_fit]
    }

    /// `self` is at least as good everywhere and strictly better somewhere.
    pub fn dominates(&self, other: &Dimensions) -> bool {
        let (a, b) = (self.values(), other.values());
        a.iter().zip(b.iter()).all(|(x, y)| x >= y) && a.iter().zip(b.iter()).any(|(x, y)| x > y)
    }
}

/// Indices of the non-dominated items, in input order.
pub fn pareto_front(dims: &[Dimensions]) -> Vec<usize> {
    (0..dims.len())
        .filter(|&i| {
            !dims
                .iter()
                .enumerate()
                .any(|(j, other)| j != i && other.dominates(&dims[i]))
        })
        .collect()
}

/// Winner among `candidates` (indices into `dims`, normally a Pareto front).
///
/// Candidates whose objective lies within `tolerance` of the best objective
/// are treated as indistinguishable on reliability. Among them the one with
/// the highest sum of min-max normalized dimensions wins, so novelty and
/// constraint fit decide between near-equal objectives. Ties go to the
/// higher objective, then the earliest index. A `tolerance` of 0 reduces to
/// the objective argmax.
pub fn select_winner(dims: &[Dimensions], candidates: &[usize], tolerance: f64) -> Option<usize> {
    let best = candidates
        .iter()
        .map(|&i| dims[i].objective)
        .reduce(f64::max)?;
    let band: Vec<usize> = candidates
        .iter()
        .copied()
        .filter(|&i| best - dims[i].objective <= tolerance.max(0.0))
        .collect();

    let mut lo = [f64::INFINITY; 3];
    let mut hi = [f64::NEG_INFINITY; 3];
    for &i in &band {
        for (k, v) in dims[i].values().into_iter().enumerate() {
            lo[k] = lo[k].min(v);
            hi[k] = hi[k].max(v);
        }
    }
    let balance = |i: usize| -> f64 {
        dims[i]
            .values()
            .into_iter()
            .enumerate()
            .map(|(k, v)| {
                let range = hi[k] - lo[k];
                if range > 0.0 {
                    (v - lo[k]) / range
                } else {
                    0.0
                }
            })
            .sum()
    };

    band.into_iter().reduce(|winner, i| {
        let ord = balance(i)
            .total_cmp(&balance(winner))
            .then(dims[i].objective.total_cmp(&dims[winner].objective));
        if ord.is_gt() {
            i
        } else {
            winner
        }
    })
}
