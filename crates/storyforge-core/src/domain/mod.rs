//! Domain models for StoryForge.
//!
//! Canonical definitions for the core entities:
//! - `Epic`: immutable structured requirement input
//! - `StoryPack` / `Story`: validated structured generation output
//! - `GeneratedOutput`: one generation attempt (valid pack or raw text + error)
//! - `PromptVersion` / `ChampionPrompt`: the prompt under optimization

pub mod epic;
pub mod prompt;
pub mod validation;

pub use epic::{Epic, GeneratedOutput, Story, StoryPack};
pub use prompt::{ArchivedPatch, ChampionPrompt, PromptVersion};
pub use validation::{JsonStoryPackValidator, OutputValidator, ValidationError};
