//! External collaborators the engine drives but does not implement.
//!
//! Model clients and the patch-writing model live outside the engine;
//! they plug in through these traits. Errors are `anyhow` so any client
//! stack can be adapted, and the engine records them as run-level data.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{ChampionPrompt, Epic, GeneratedOutput};
use crate::eval::PromptDistReport;
use crate::miner::ContrastPair;

/// Per-call sampling options.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerateOptions {
    pub seed: Option<u64>,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Turns an epic plus a prompt into a StoryPack.
///
/// Output that does not validate is returned as
/// [`GeneratedOutput::invalid`], not as an error. `Err` is reserved for
/// transport or model failures.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        epic: &Epic,
        prompt: &str,
        options: GenerateOptions,
    ) -> anyhow::Result<GeneratedOutput>;
}

/// Everything a proposer sees when writing challenger patches.
#[derive(Debug, Clone, Copy)]
pub struct ProposalRequest<'a> {
    pub champion: &'a ChampionPrompt,
    pub report: &'a PromptDistReport,
    /// Mined pairs, largest score delta first.
    pub pairs: &'a [ContrastPair],
    /// Number of patches wanted.
    pub count: usize,
}

/// Writes replacement patches for the champion prompt.
///
/// Returned strings are whole patches (they replace the champion's patch;
/// the base is never touched).
#[async_trait]
pub trait PatchProposer: Send + Sync {
    async fn propose(&self, request: ProposalRequest<'_>) -> anyhow::Result<Vec<String>>;
}
