//! Prompt identity and the champion prompt under optimization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{EngineError, Result};

/// A concrete prompt text plus its content-derived id.
///
/// The id is the SHA-256 hex digest of the text, so identical prompts
/// share cached evaluation reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PromptVersion {
    pub id: String,
    pub text: String,
}

impl PromptVersion {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let id = hex::encode(Sha256::digest(text.as_bytes()));
        Self { id, text }
    }

    /// Short form (first 12 hex chars).
    pub fn short_id(&self) -> &str {
        &self.id[..12.min(self.id.len())]
    }
}

/// A patch that was replaced by a promotion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedPatch {
    pub version: u32,
    pub patch: String,
    /// Objective the patch held while it was champion, if evaluated.
    pub objective: Option<f64>,
    pub archived_at: DateTime<Utc>,
}

/// The active champion: an immutable `base` plus a mutable `patch`.
///
/// Promotions replace `patch` only and archive the previous one;
/// `base` is fixed for the lifetime of an optimization session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChampionPrompt {
    base: String,
    patch: String,
    version: u32,
    #[serde(default)]
    history: Vec<ArchivedPatch>,
}

impl ChampionPrompt {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            patch: String::new(),
            version: 0,
            history: Vec::new(),
        }
    }

    pub fn with_patch(mut self, patch: impl Into<String>) -> Self {
        self.patch = patch.into();
        self
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn patch(&self) -> &str {
        &self.patch
    }

    /// Incremented on every promotion and rollback.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Archived patches still reachable by `rollback`, oldest first.
    pub fn history(&self) -> &[ArchivedPatch] {
        &self.history
    }

    /// Compose `base` and `patch` into the prompt actually sent to the model.
    pub fn composed(&self) -> String {
        compose(&self.base, &self.patch)
    }

    pub fn prompt_version(&self) -> PromptVersion {
        PromptVersion::new(self.composed())
    }

    /// The prompt a challenger carrying `patch` would send.
    pub fn candidate(&self, patch: &str) -> PromptVersion {
        PromptVersion::new(compose(&self.base, patch))
    }

    /// Replace the patch, archiving the current one with the objective it
    /// held as champion.
    pub fn promote(&mut self, patch: impl Into<String>, previous_objective: Option<f64>) {
        let previous = std::mem::replace(&mut self.patch, patch.into());
        self.history.push(ArchivedPatch {
            version: self.version,
            patch: previous,
            objective: previous_objective,
            archived_at: Utc::now(),
        });
        self.version += 1;
    }

    /// Restore the most recently archived patch and drop it from history,
    /// so repeated calls step further back. The version still increases.
    pub fn rollback(&mut self) -> Result<()> {
        let restore = self.history.pop().ok_or(EngineError::NoPreviousPatch)?;
        self.patch = restore.patch;
        self.version += 1;
        Ok(())
    }
}

fn compose(base: &str, patch: &str) -> String {
    let patch = patch.trim();
    if patch.is_empty() {
        base.to_string()
    } else {
        format!("{}\n\n{}", base.trim_end(), patch)
    }
}
