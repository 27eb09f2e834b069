//! In-memory collaborators for tests and offline runs.
//!
//! None of these talk to a model. They let the evaluator, evolution loop
//! and orchestrator run deterministically: generators driven by closures,
//! judges returning fixed scores, proposers replaying scripted patches.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::watch;

use crate::collaborators::{GenerateOptions, Generator, PatchProposer, ProposalRequest};
use crate::config::GateThresholds;
use crate::domain::{Epic, GeneratedOutput, Story, StoryPack};
use crate::scoring::{GateDecision, Judge, JudgeVerdict, RunScorer, ScorerResult};

// ---------------------------------------------------------------------------
// Sample data
// ---------------------------------------------------------------------------

/// Checkout epic used across tests.
pub fn sample_epic() -> Epic {
    Epic::new(
        "E-checkout",
        "Checkout payments",
        "Shoppers pay for cart items by card and receive receipts",
    )
    .with_constraint("PCI compliance")
    .with_persona("shopper")
}

/// Five distinct, complete stories covering every keyword of
/// [`sample_epic`].
pub fn well_formed_pack() -> StoryPack {
    StoryPack {
        epic_id: "E-checkout".to_string(),
        stories: vec![
            Story::new("Pay for checkout by card", "Card payments at checkout")
                .with_narrative(
                    "shopper",
                    "to pay for cart items by card",
                    "checkout payments are quick",
                )
                .with_criterion(
                    "Given a cart with items When I pay by card Then the payment is captured",
                ),
            Story::new("Receive an emailed receipt", "Receipts after purchase")
                .with_narrative(
                    "returning shopper",
                    "to receive receipts by email",
                    "I can track spending",
                )
                .with_criterion(
                    "Given a completed payment When the order confirms \
                     Then an emailed receipt arrives",
                ),
            Story::new(
                "Save PCI compliant cards",
                "Shoppers store cards under PCI compliance rules",
            )
            .with_narrative(
                "frequent buyer",
                "to save a card token",
                "later purchases skip typing numbers",
            )
            .with_criterion("Given stored tokens When I return Then saved cards appear masked"),
            Story::new("Handle declined payments", "Issuer declines")
                .with_narrative(
                    "customer",
                    "clear decline messages",
                    "I can retry with another method",
                )
                .with_criterion(
                    "Given an issuer decline When submitting Then a retry prompt shows",
                ),
            Story::new("Review cart items before paying", "Order summary")
                .with_narrative("shopper", "an itemised summary", "totals surprise nobody")
                .with_criterion(
                    "Given several items When reviewing Then subtotal tax shipping display",
                ),
        ],
    }
}

/// `n` epics with ids `E0..E{n-1}`.
pub fn epics(n: usize) -> Vec<Epic> {
    (0..n)
        .map(|i| Epic::new(format!("E{i}"), format!("Epic {i}"), "Generated stories"))
        .collect()
}

/// An invalid output whose raw text is `score`, for use with
/// [`RawScoreScorer`].
pub fn scored_output(score: f64) -> GeneratedOutput {
    GeneratedOutput::invalid(format!("{score}"), "scripted")
}

/// Like [`scored_output`] with `text` after the score, so outputs can be
/// compared for similarity.
pub fn scored_text(score: f64, text: &str) -> GeneratedOutput {
    GeneratedOutput::invalid(format!("{score} {text}"), "scripted")
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

type GenerateFn =
    dyn Fn(&Epic, &str, u64) -> anyhow::Result<GeneratedOutput> + Send + Sync + 'static;

/// Generator driven by a closure of `(epic, prompt, seed)`.
pub struct ScriptedGenerator {
    script: Box<GenerateFn>,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&Epic, &str, u64) -> anyhow::Result<GeneratedOutput> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always returns [`well_formed_pack`].
    pub fn well_formed() -> Self {
        Self::new(|_, _, _| Ok(GeneratedOutput::valid(well_formed_pack(), "{}")))
    }

    /// Emits `scores[seed % len]` as raw text, for [`RawScoreScorer`].
    pub fn by_seed(scores: Vec<f64>) -> Self {
        Self::new(move |_, _, seed| {
            let i = seed as usize % scores.len().max(1);
            Ok(scored_output(scores.get(i).copied().unwrap_or(0.0)))
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(
        &self,
        epic: &Epic,
        prompt: &str,
        options: GenerateOptions,
    ) -> anyhow::Result<GeneratedOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.script)(epic, prompt, options.seed.unwrap_or_default())
    }
}

/// Sleeps before delegating; exercises call timeouts.
pub struct SlowGenerator {
    delay: Duration,
    inner: Arc<dyn Generator>,
}

impl SlowGenerator {
    pub fn new(delay: Duration, inner: Arc<dyn Generator>) -> Self {
        Self { delay, inner }
    }
}

#[async_trait]
impl Generator for SlowGenerator {
    async fn generate(
        &self,
        epic: &Epic,
        prompt: &str,
        options: GenerateOptions,
    ) -> anyhow::Result<GeneratedOutput> {
        tokio::time::sleep(self.delay).await;
        self.inner.generate(epic, prompt, options).await
    }
}

/// Holds every call until [`Gate::open`]; lets tests observe a task while
/// it is running with no progress.
pub struct GatedGenerator {
    open: watch::Receiver<bool>,
    inner: Arc<dyn Generator>,
}

/// Releases a [`GatedGenerator`].
pub struct Gate(watch::Sender<bool>);

impl Gate {
    pub fn open(&self) {
        self.0.send_replace(true);
    }
}

impl GatedGenerator {
    pub fn new(inner: Arc<dyn Generator>) -> (Self, Gate) {
        let (tx, rx) = watch::channel(false);
        (Self { open: rx, inner }, Gate(tx))
    }
}

#[async_trait]
impl Generator for GatedGenerator {
    async fn generate(
        &self,
        epic: &Epic,
        prompt: &str,
        options: GenerateOptions,
    ) -> anyhow::Result<GeneratedOutput> {
        let mut open = self.open.clone();
        let opened = open.wait_for(|o| *o).await.is_ok();
        if !opened {
            return Err(anyhow!("gate dropped before opening"));
        }
        self.inner.generate(epic, prompt, options).await
    }
}

// ---------------------------------------------------------------------------
// Scorers and judges
// ---------------------------------------------------------------------------

/// Reads the score from the first word of `raw_text` (clamped to
/// `[0, 1]`); text that does not start with a number scores 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawScoreScorer {
    pub gate: GateThresholds,
}

#[async_trait]
impl RunScorer for RawScoreScorer {
    async fn score(&self, _epic: &Epic, output: &GeneratedOutput) -> ScorerResult {
        let score = output
            .raw_text
            .split_whitespace()
            .next()
            .and_then(|word| word.parse::<f64>().ok())
            .map(|s| s.clamp(0.0, 1.0))
            .unwrap_or(0.0);
        ScorerResult {
            score,
            reason: format!("scripted score {score}"),
            sub_scores: None,
            gate: GateDecision::from_score(score, &self.gate),
        }
    }
}

/// Judge that always answers `score`, optionally after a delay.
pub struct FixedJudge {
    name: String,
    score: f64,
    delay: Option<Duration>,
}

impl FixedJudge {
    pub fn new(name: &str, score: f64) -> Self {
        Self {
            name: name.to_string(),
            score,
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl Judge for FixedJudge {
    fn name(&self) -> &str {
        &self.name
    }

    async fn judge(
        &self,
        _epic: &Epic,
        _pack: &StoryPack,
        _judge_prompt: &str,
    ) -> anyhow::Result<JudgeVerdict> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(JudgeVerdict {
            score: self.score,
            rationale: format!("fixed {}", self.score),
        })
    }
}

/// Judge whose every call errors.
pub struct FailingJudge {
    name: String,
}

impl FailingJudge {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl Judge for FailingJudge {
    fn name(&self) -> &str {
        &self.name
    }

    async fn judge(
        &self,
        _epic: &Epic,
        _pack: &StoryPack,
        _judge_prompt: &str,
    ) -> anyhow::Result<JudgeVerdict> {
        Err(anyhow!("judge endpoint unavailable"))
    }
}

// ---------------------------------------------------------------------------
// Proposers
// ---------------------------------------------------------------------------

/// Replays one scripted batch of patches per call; empty once exhausted.
#[derive(Default)]
pub struct ScriptedProposer {
    batches: Mutex<VecDeque<Vec<String>>>,
    pairs_seen: Mutex<Vec<usize>>,
}

impl ScriptedProposer {
    pub fn new(batches: Vec<Vec<&str>>) -> Self {
        Self {
            batches: Mutex::new(
                batches
                    .into_iter()
                    .map(|b| b.into_iter().map(str::to_string).collect())
                    .collect(),
            ),
            pairs_seen: Mutex::new(Vec::new()),
        }
    }

    /// Number of contrast pairs handed over on each call so far.
    pub fn pairs_seen(&self) -> Vec<usize> {
        self.pairs_seen
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl PatchProposer for ScriptedProposer {
    async fn propose(&self, request: ProposalRequest<'_>) -> anyhow::Result<Vec<String>> {
        self.pairs_seen
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(request.pairs.len());
        Ok(self
            .batches
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
            .unwrap_or_default())
    }
}

/// Proposer whose every call errors.
#[derive(Debug, Default)]
pub struct FailingProposer;

#[async_trait]
impl PatchProposer for FailingProposer {
    async fn propose(&self, _request: ProposalRequest<'_>) -> anyhow::Result<Vec<String>> {
        Err(anyhow!("proposal model unavailable"))
    }
}
