//! Task lifecycle over real stores: pending → running → completed, progress
//! visibility, cancellation, restart and crash recovery.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use storyforge_core::fakes::{
    epics, scored_output, GatedGenerator, RawScoreScorer, ScriptedGenerator, ScriptedProposer,
};
use storyforge_core::{
    ChampionPrompt, DistributionalEvaluator, EngineError, Epic, EvalConfig, EvolutionConfig,
    EvolutionEngine, GenerateOptions, GeneratedOutput, Generator, ObjectiveWeights, PairMiner,
    PromptVersion, TaskFilter, TaskId, TaskOrchestrator, TaskProgress, TaskRecord, TaskStatus,
    TaskStore, TaskType, CANCELLED_ERROR, INTERRUPTED_ERROR,
};
use storyforge_state::{FsTaskStore, MemoryTaskStore};

const POLL: Duration = Duration::from_millis(5);

fn evaluator(generator: Arc<dyn Generator>) -> DistributionalEvaluator {
    DistributionalEvaluator::new(
        generator,
        Arc::new(RawScoreScorer::default()),
        EvalConfig {
            replicates: 3,
            ..EvalConfig::default()
        },
        ObjectiveWeights::default(),
    )
}

async fn poll_until<F>(orch: &TaskOrchestrator, id: &TaskId, pred: F) -> TaskRecord
where
    F: Fn(&TaskRecord) -> bool,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let record = orch.get(id).await.unwrap();
            if pred(&record) {
                return record;
            }
            tokio::time::sleep(POLL).await;
        }
    })
    .await
    .expect("condition not reached in time")
}

#[tokio::test]
async fn evaluation_task_lifecycle_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn TaskStore> = Arc::new(FsTaskStore::new(dir.path()).unwrap());
    let (gated, gate) =
        GatedGenerator::new(Arc::new(ScriptedGenerator::by_seed(vec![0.9, 0.6, 0.3])));
    let orch = TaskOrchestrator::new(store, evaluator(Arc::new(gated)));

    let created = orch
        .submit_evaluation(PromptVersion::new("Write stories."), epics(2))
        .await
        .unwrap();
    assert_eq!(created.status, TaskStatus::Pending);
    assert_eq!(created.task_type, TaskType::Evaluation);
    assert_eq!(created.progress, TaskProgress { completed: 0, total: 6 });

    let running = poll_until(&orch, &created.id, |r| r.status == TaskStatus::Running).await;
    assert_eq!(running.progress, TaskProgress { completed: 0, total: 6 });

    gate.open();
    let done = orch.wait(&created.id, POLL).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.progress, TaskProgress { completed: 6, total: 6 });
    assert!(done.error.is_none());
    let result = done.result.as_ref().unwrap();
    let mean = result["per_epic"][0]["mean_score"].as_f64().unwrap();
    assert!((mean - 0.6).abs() < 1e-9);

    // A fresh store over the same directory sees the identical record.
    drop(orch);
    let reopened = FsTaskStore::new(dir.path()).unwrap();
    let again = reopened.get(&created.id).await.unwrap().unwrap();
    assert_eq!(again, done);
}

#[tokio::test]
async fn progress_is_monotonic_while_polling() {
    let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
    let orch = TaskOrchestrator::new(
        store,
        evaluator(Arc::new(ScriptedGenerator::by_seed(vec![0.7]))),
    );
    let created = orch
        .submit_evaluation(PromptVersion::new("p"), epics(4))
        .await
        .unwrap();

    let mut last = 0;
    loop {
        let record = orch.get(&created.id).await.unwrap();
        assert!(record.progress.completed >= last);
        last = record.progress.completed;
        if record.is_terminal() {
            assert_eq!(record.status, TaskStatus::Completed);
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(last, 12);
}

#[tokio::test]
async fn cancelled_task_discards_in_flight_results() {
    let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
    let (gated, gate) = GatedGenerator::new(Arc::new(ScriptedGenerator::by_seed(vec![1.0])));
    let orch = TaskOrchestrator::new(store, evaluator(Arc::new(gated)));

    let created = orch
        .submit_evaluation(PromptVersion::new("p"), epics(3))
        .await
        .unwrap();
    poll_until(&orch, &created.id, |r| r.status == TaskStatus::Running).await;

    let cancelled = orch.cancel(&created.id).await.unwrap();
    assert_eq!(cancelled.status, TaskStatus::Failed);
    assert_eq!(cancelled.error.as_deref(), Some(CANCELLED_ERROR));

    gate.open();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let after = orch.get(&created.id).await.unwrap();
    assert_eq!(after, cancelled);
    assert!(after.result.is_none());

    let err = orch.cancel(&created.id).await.unwrap_err();
    assert!(matches!(err, EngineError::TaskAlreadyTerminal { .. }));
}

#[tokio::test]
async fn recover_interrupted_fails_unfinished_tasks() {
    let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());

    let pending = TaskRecord::new(TaskType::Evaluation, 4);
    let mut running = TaskRecord::new(TaskType::Optimization, 5);
    running.start().unwrap();
    running.advance(2).unwrap();
    let mut finished = TaskRecord::new(TaskType::Evaluation, 1);
    finished.start().unwrap();
    finished.complete(serde_json::json!({"ok": true})).unwrap();
    for r in [&pending, &running, &finished] {
        store.put(r).await.unwrap();
    }

    let orch = TaskOrchestrator::new(
        Arc::clone(&store),
        evaluator(Arc::new(ScriptedGenerator::by_seed(vec![0.5]))),
    );
    let recovered = orch.recover_interrupted().await.unwrap();
    assert_eq!(recovered.len(), 2);
    assert!(recovered
        .iter()
        .all(|r| r.status == TaskStatus::Failed && r.error.as_deref() == Some(INTERRUPTED_ERROR)));

    let running_after = orch.get(&running.id).await.unwrap();
    assert_eq!(running_after.progress.completed, 2);
    assert_eq!(orch.get(&finished.id).await.unwrap(), finished);

    let failed = orch
        .list(&TaskFilter::with_status(TaskStatus::Failed))
        .await
        .unwrap();
    assert_eq!(failed.len(), 2);
    assert!(orch.recover_interrupted().await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_task_is_not_found() {
    let orch = TaskOrchestrator::new(
        Arc::new(MemoryTaskStore::new()),
        evaluator(Arc::new(ScriptedGenerator::by_seed(vec![0.5]))),
    );
    let missing = TaskId::from("no-such-task");
    assert!(matches!(
        orch.get(&missing).await.unwrap_err(),
        EngineError::TaskNotFound(_)
    ));
    assert!(matches!(
        orch.cancel(&missing).await.unwrap_err(),
        EngineError::TaskNotFound(_)
    ));
}

#[tokio::test]
async fn optimization_requires_an_engine() {
    let orch = TaskOrchestrator::new(
        Arc::new(MemoryTaskStore::new()),
        evaluator(Arc::new(ScriptedGenerator::by_seed(vec![0.5]))),
    );
    let err = orch
        .submit_optimization(ChampionPrompt::new("Base."), epics(1))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidConfig(_)));
}

#[tokio::test]
async fn optimization_task_completes_with_outcome() {
    let generator: Arc<dyn Generator> = Arc::new(ScriptedGenerator::new(|_, prompt, _| {
        let score = if prompt.contains("criteria") { 0.9 } else { 0.4 };
        Ok(scored_output(score))
    }));
    let eval = evaluator(generator);
    let proposer = Arc::new(ScriptedProposer::new(vec![vec!["Write testable criteria."]]));
    let engine = EvolutionEngine::new(
        eval.clone(),
        proposer,
        PairMiner::default(),
        EvolutionConfig {
            max_generations: 3,
            patience: 1,
            ..EvolutionConfig::default()
        },
    );
    let orch = TaskOrchestrator::new(Arc::new(MemoryTaskStore::new()), eval).with_evolution(engine);

    let created = orch
        .submit_optimization(ChampionPrompt::new("Base."), epics(1))
        .await
        .unwrap();
    assert_eq!(created.task_type, TaskType::Optimization);
    // 3 generations × (champion + 3 challengers) × 1 epic × 3 replicates
    assert_eq!(created.progress.total, 36);

    let done = orch.wait(&created.id, POLL).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed, "error: {:?}", done.error);
    assert_eq!(done.progress.completed, 36);
    let result = done.result.unwrap();
    assert_eq!(result["champion"]["patch"], "Write testable criteria.");
    assert_eq!(result["champion"]["base"], "Base.");
    assert_eq!(result["stop_reason"], "stagnation");
}

/// Answers champion prompts at once and holds challenger prompts (those
/// mentioning "criteria") until the gate opens.
struct ChallengerGate {
    champion: ScriptedGenerator,
    challenger: GatedGenerator,
}

#[async_trait]
impl Generator for ChallengerGate {
    async fn generate(
        &self,
        epic: &Epic,
        prompt: &str,
        options: GenerateOptions,
    ) -> anyhow::Result<GeneratedOutput> {
        if prompt.contains("criteria") {
            self.challenger.generate(epic, prompt, options).await
        } else {
            self.champion.generate(epic, prompt, options).await
        }
    }
}

#[tokio::test]
async fn optimization_progress_moves_within_a_generation() {
    let (challenger, gate) = GatedGenerator::new(Arc::new(ScriptedGenerator::by_seed(vec![0.9])));
    let generator = ChallengerGate {
        champion: ScriptedGenerator::by_seed(vec![0.4]),
        challenger,
    };
    let eval = evaluator(Arc::new(generator));
    let proposer = Arc::new(ScriptedProposer::new(vec![vec!["Write testable criteria."]]));
    let engine = EvolutionEngine::new(
        eval.clone(),
        proposer,
        PairMiner::default(),
        EvolutionConfig {
            max_generations: 2,
            challengers_per_generation: 1,
            patience: 1,
            ..EvolutionConfig::default()
        },
    );
    let orch = TaskOrchestrator::new(Arc::new(MemoryTaskStore::new()), eval).with_evolution(engine);

    let created = orch
        .submit_optimization(ChampionPrompt::new("Base."), epics(1))
        .await
        .unwrap();
    // 2 generations × (champion + 1 challenger) × 3 replicates
    assert_eq!(created.progress.total, 12);

    // The champion's three runs land while the challenger is still held,
    // so the first generation has not finished yet.
    let mid = poll_until(&orch, &created.id, |r| r.progress.completed >= 3).await;
    assert_eq!(mid.status, TaskStatus::Running);
    assert_eq!(mid.progress, TaskProgress { completed: 3, total: 12 });

    gate.open();
    let done = orch.wait(&created.id, POLL).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed, "error: {:?}", done.error);
    assert_eq!(done.progress, TaskProgress { completed: 12, total: 12 });
}
