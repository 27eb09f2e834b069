//! Champion/challenger loop: promotion margin, Pareto selection, caching,
//! stopping rules and cancellation.

use std::sync::Arc;

use async_trait::async_trait;

use storyforge_core::fakes::{
    epics, scored_output, scored_text, well_formed_pack, FailingProposer, RawScoreScorer,
    ScriptedGenerator, ScriptedProposer,
};
use storyforge_core::{
    ChampionPrompt, DistributionalEvaluator, EngineError, EvalConfig, EvolutionConfig,
    EvolutionEngine, GeneratedOutput, MinerConfig, ObjectiveWeights, PairMiner, PatchProposer,
    ProgressSink, StopReason,
};

const BASE: &str = "You turn epics into user stories. Respond with JSON.";

/// Scores every run by which hint the prompt carries.
fn hint_generator() -> Arc<ScriptedGenerator> {
    Arc::new(ScriptedGenerator::new(|_, prompt, _| {
        let score = if prompt.contains("criteria") {
            0.9
        } else if prompt.contains("short") {
            0.6
        } else if prompt.contains("tiny") {
            0.81
        } else if prompt.contains("steady") {
            0.8
        } else {
            0.5
        };
        Ok(scored_output(score))
    }))
}

fn eval_config() -> EvalConfig {
    EvalConfig {
        replicates: 2,
        ..EvalConfig::default()
    }
}

fn engine(
    generator: Arc<ScriptedGenerator>,
    proposer: Arc<dyn PatchProposer>,
    config: EvolutionConfig,
) -> EvolutionEngine {
    let evaluator = DistributionalEvaluator::new(
        generator,
        Arc::new(RawScoreScorer::default()),
        eval_config(),
        ObjectiveWeights::default(),
    );
    EvolutionEngine::new(evaluator, proposer, PairMiner::new(MinerConfig::default()), config)
}

#[tokio::test]
async fn best_challenger_is_promoted_and_base_is_untouched() {
    let generator = hint_generator();
    let proposer = Arc::new(ScriptedProposer::new(vec![vec![
        "Keep stories short.",
        "Write testable acceptance criteria.",
    ]]));
    let config = EvolutionConfig {
        max_generations: 5,
        patience: 2,
        ..EvolutionConfig::default()
    };
    let outcome = engine(generator.clone(), proposer, config)
        .run(ChampionPrompt::new(BASE), &epics(2), None)
        .await
        .unwrap();

    assert_eq!(outcome.champion.base(), BASE);
    assert_eq!(outcome.champion.patch(), "Write testable acceptance criteria.");
    assert_eq!(outcome.champion.version(), 1);
    assert_eq!(outcome.champion.history()[0].patch, "");

    let first = &outcome.generations[0];
    assert_eq!(first.candidates.len(), 2);
    assert!(first.promoted.is_some());
    let previous = outcome.champion.history()[0].objective.unwrap();
    assert!((previous - first.champion_objective).abs() < 1e-12);
    assert!(outcome.champion_report.objective() - previous >= 0.02);

    // The runner-up stays in the portfolio.
    assert!(outcome
        .portfolio
        .iter()
        .any(|c| c.patch == "Keep stories short."));

    assert_eq!(outcome.generations.len(), 3);
    assert_eq!(outcome.stop_reason, StopReason::Stagnation);
    // champion + 2 challengers, 2 epics × 2 replicates each; later
    // generations reuse cached reports
    assert_eq!(generator.calls(), 12);
}

#[tokio::test]
async fn improvement_below_margin_is_not_promoted() {
    let generator = hint_generator();
    let proposer = Arc::new(ScriptedProposer::new(vec![vec!["Be tiny."]]));
    let config = EvolutionConfig {
        max_generations: 4,
        patience: 1,
        min_promotion_margin: 0.02,
        ..EvolutionConfig::default()
    };
    let outcome = engine(generator, proposer, config)
        .run(ChampionPrompt::new(BASE).with_patch("Stay steady."), &epics(1), None)
        .await
        .unwrap();

    let first = &outcome.generations[0];
    let challenger = &first.candidates[0];
    assert!(challenger.objective > first.champion_objective);
    assert!(challenger.objective - first.champion_objective < 0.02);
    assert!(first.promoted.is_none());
    assert_eq!(outcome.champion.patch(), "Stay steady.");
    assert_eq!(outcome.champion.version(), 0);
    assert_eq!(outcome.stop_reason, StopReason::Stagnation);
    assert_eq!(outcome.generations.len(), 1);
    assert_eq!(outcome.portfolio.len(), 1);
}

#[tokio::test]
async fn near_tie_is_broken_by_novelty_and_constraint_fit() {
    // "criteria" scores a hair higher but never validates; "personas"
    // validates every time.
    let generator = Arc::new(ScriptedGenerator::new(|_, prompt, _| {
        if prompt.contains("criteria") {
            Ok(scored_output(0.91))
        } else if prompt.contains("personas") {
            Ok(GeneratedOutput::valid(well_formed_pack(), "0.9"))
        } else {
            Ok(scored_output(0.5))
        }
    }));
    let proposer = Arc::new(ScriptedProposer::new(vec![vec![
        "Add personas to every story.",
        "Add personas and testable acceptance criteria.",
    ]]));
    let config = EvolutionConfig {
        max_generations: 1,
        min_promotion_margin: 0.02,
        ..EvolutionConfig::default()
    };
    let outcome = engine(generator, proposer, config)
        .run(ChampionPrompt::new(BASE), &epics(1), None)
        .await
        .unwrap();

    let first = &outcome.generations[0];
    let (broad, sharp) = (&first.candidates[0], &first.candidates[1]);
    assert!(broad.objective - first.champion_objective >= 0.02);
    assert!(sharp.objective - first.champion_objective >= 0.02);
    // The plain objective argmax would pick the second patch.
    assert!(sharp.objective > broad.objective);
    assert!(sharp.objective - broad.objective < 0.02);
    assert_eq!(broad.constraint_fit, 1.0);
    assert_eq!(sharp.constraint_fit, 0.0);
    assert!(sharp.novelty < broad.novelty);

    assert_eq!(first.promoted.as_deref(), Some(broad.prompt_id.as_str()));
    assert_eq!(outcome.champion.patch(), "Add personas to every story.");
}

#[tokio::test]
async fn proposer_failure_is_not_fatal() {
    let config = EvolutionConfig {
        max_generations: 2,
        patience: 5,
        ..EvolutionConfig::default()
    };
    let outcome = engine(hint_generator(), Arc::new(FailingProposer), config)
        .run(ChampionPrompt::new(BASE), &epics(1), None)
        .await
        .unwrap();

    assert_eq!(outcome.generations.len(), 2);
    assert!(outcome.generations.iter().all(|g| g.candidates.is_empty()));
    assert_eq!(outcome.stop_reason, StopReason::MaxGenerations);
    assert_eq!(outcome.champion.version(), 0);
}

#[tokio::test]
async fn contrast_pairs_reach_the_proposer() {
    let generator = Arc::new(ScriptedGenerator::new(|_, _, seed| {
        let score = if seed % 2 == 0 { 0.9 } else { 0.2 };
        Ok(scored_text(
            score,
            "shopper pays for the cart by card and receives a receipt",
        ))
    }));
    let proposer = Arc::new(ScriptedProposer::new(vec![]));
    let config = EvolutionConfig {
        max_generations: 1,
        ..EvolutionConfig::default()
    };
    engine(generator, proposer.clone(), config)
        .run(ChampionPrompt::new(BASE), &epics(3), None)
        .await
        .unwrap();

    assert_eq!(proposer.pairs_seen(), vec![3]);
}

struct Refuse;

#[async_trait]
impl ProgressSink for Refuse {
    async fn advance(&self, _completed: u64, _total: u64) -> bool {
        false
    }
}

#[tokio::test]
async fn cancelled_progress_stops_the_loop() {
    let proposer = Arc::new(ScriptedProposer::new(vec![vec!["Keep stories short."]]));
    let err = engine(hint_generator(), proposer, EvolutionConfig::default())
        .run(ChampionPrompt::new(BASE), &epics(1), Some(Arc::new(Refuse)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
}
