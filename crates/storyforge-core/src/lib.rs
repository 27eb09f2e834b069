//! StoryForge Core Library
//!
//! Evaluation and evolution engine for prompts that turn an [`Epic`] into a
//! validated [`StoryPack`]:
//!
//! - `similarity`: deterministic hash embeddings + cosine
//! - `scoring`: five-metric composite scorer with an optional judge panel
//! - `eval`: seeded, bounded-parallel distributional evaluation
//! - `miner`: contrastive pair mining over evaluation runs
//! - `evolution`: champion/challenger promotion loop
//! - `orchestrator`: durable, pollable tasks over a [`TaskStore`]

pub mod collaborators;
pub mod config;
pub mod domain;
pub mod error;
pub mod eval;
pub mod evolution;
pub mod fakes;
pub mod metrics;
pub mod miner;
pub mod obs;
pub mod orchestrator;
pub mod scoring;
pub mod similarity;
pub mod telemetry;

/// Crate version, for embedding in reports and logs.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use collaborators::{GenerateOptions, Generator, PatchProposer, ProposalRequest};
pub use config::{
    default_congruence_tiers, CongruenceTier, EngineConfig, EvalConfig, EvolutionConfig,
    GateThresholds, ItemRange, MinerConfig, ObjectiveWeights, PanelConfig, ScoreWeights,
    ScorerConfig, DEFAULT_STD_PENALTY,
};
pub use domain::{
    ArchivedPatch, ChampionPrompt, Epic, GeneratedOutput, JsonStoryPackValidator,
    OutputValidator, PromptVersion, Story, StoryPack, ValidationError,
};
pub use error::{EngineError, Result};
pub use eval::{
    AggregateStats, DistRun, DistributionalEvaluator, EpicDistResult, ProgressSink,
    PromptDistReport,
};
pub use evolution::{
    CandidateSummary, Dimensions, EvolutionEngine, EvolutionOutcome, GenerationRecord, StopReason,
};
pub use metrics::METRICS;
pub use miner::{ContrastPair, PairMiner, PairSide};
pub use orchestrator::{TaskOrchestrator, CANCELLED_ERROR, INTERRUPTED_ERROR};
pub use scoring::{
    GateDecision, Judge, JudgePanel, JudgeVerdict, PanelVerdict, RunScorer, Scorer, ScorerResult,
    SubScores,
};
pub use similarity::{cosine, hash_vector, text_similarity, DEFAULT_DIM};

pub use storyforge_state::{
    TaskFilter, TaskId, TaskProgress, TaskRecord, TaskStatus, TaskStore, TaskStoreConfig, TaskType,
};
