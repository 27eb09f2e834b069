//! Deterministic text similarity.
//!
//! A bag-of-tokens hash embedding (feature hashing with FNV-1a) plus cosine
//! similarity. No model calls, no randomness: the same text always maps to
//! the same vector on every platform.

use crate::error::{EngineError, Result};

/// Default embedding dimension.
pub const DEFAULT_DIM: usize = 512;

/// Tokens shorter than this are discarded.
pub const MIN_TOKEN_LEN: usize = 3;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME)
    })
}

/// Lowercased alphanumeric tokens of at least [`MIN_TOKEN_LEN`] characters.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= MIN_TOKEN_LEN)
        .map(str::to_lowercase)
}

/// Hash embedding of `text` with `dim` buckets (term counts).
///
/// Returns the zero vector when `text` has no qualifying tokens.
pub fn hash_vector(text: &str, dim: usize) -> Vec<f64> {
    let mut vec = vec![0.0; dim];
    if dim == 0 {
        return vec;
    }
    for token in tokenize(text) {
        let bucket = (fnv1a(token.as_bytes()) % dim as u64) as usize;
        vec[bucket] += 1.0;
    }
    vec
}

/// Normalized dot product, clamped to `[-1, 1]`.
///
/// Returns 0 when either vector has zero magnitude and fails with
/// [`EngineError::DimensionMismatch`] on unequal lengths.
pub fn cosine(a: &[f64], b: &[f64]) -> Result<f64> {
    if a.len() != b.len() {
        return Err(EngineError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok((dot / (norm_a * norm_b)).clamp(-1.0, 1.0))
}

/// `cosine(hash_vector(a), hash_vector(b))` at [`DEFAULT_DIM`].
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let va = hash_vector(a, DEFAULT_DIM);
    let vb = hash_vector(b, DEFAULT_DIM);
    // Both vectors have DEFAULT_DIM entries.
    cosine(&va, &vb).unwrap_or(0.0)
}
