//! Order-independent aggregate statistics over run scores.

use crate::config::ObjectiveWeights;
use crate::similarity::text_similarity;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Percentile `q ∈ [0, 1]` by linear interpolation between closest ranks
/// over the sorted values (`index = q · (n − 1)`).
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

pub fn p10(values: &[f64]) -> f64 {
    percentile(values, 0.10)
}

/// Fraction of values strictly above `threshold`.
pub fn pass_rate(values: &[f64], threshold: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().filter(|v| **v > threshold).count() as f64 / values.len() as f64
}

/// `w.pass_rate·pass + w.mean_score·mean + w.p10_score·p10 − w.std_penalty·std`.
pub fn objective(w: &ObjectiveWeights, pass: f64, mean: f64, p10: f64, std: f64) -> f64 {
    w.pass_rate * pass + w.mean_score * mean + w.p10_score * p10 - w.std_penalty * std
}

/// Number of near-duplicate clusters among `texts`.
///
/// Greedy single pass: each text joins the first cluster whose
/// representative is at least `threshold` similar, else founds a new one.
/// Callers pass texts in seed order so the count is reproducible.
pub fn distinct_clusters<S: AsRef<str>>(texts: &[S], threshold: f64) -> usize {
    let mut reps: Vec<&str> = Vec::new();
    for text in texts {
        let text = text.as_ref();
        if !reps.iter().any(|r| text_similarity(r, text) >= threshold) {
            reps.push(text);
        }
    }
    reps.len()
}
