//! Scheduler tick integration tests with a deterministic executor.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use lily::db::Database;
use lily::executor::{ExecutionOutcome, ExecutorRoute, StepExecutor};
use lily::models::{PipelineStatus, StepStatus};
use lily::pipeline::{DependsOn, PipelineEngine, PipelineInput, StepInput};
use lily::scheduler::Scheduler;
use parking_lot::Mutex;
use std::sync::Arc;

/// Executor that replays scripted outcomes and records prompts.
struct ScriptedExecutor {
    outcomes: Mutex<Vec<ExecutionOutcome>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    fn returning(outcomes: Vec<ExecutionOutcome>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn always_ok() -> Arc<Self> {
        Self::returning(vec![])
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl StepExecutor for ScriptedExecutor {
    async fn execute(&self, _route: &ExecutorRoute, prompt: &str) -> ExecutionOutcome {
        self.prompts.lock().push(prompt.to_string());
        let mut outcomes = self.outcomes.lock();
        if outcomes.is_empty() {
            ExecutionOutcome::ok("OK")
        } else {
            outcomes.remove(0)
        }
    }
}

fn local_step(name: &str, prompt: &str) -> StepInput {
    StepInput {
        name: name.to_string(),
        step_type: None,
        tier: None,
        executor: Some("local".to_string()),
        prompt: Some(prompt.to_string()),
        depends_on: Vec::new(),
        depends_on_all: None,
        max_retries: None,
    }
}

async fn setup() -> (PipelineEngine, Arc<Database>) {
    let db = Arc::new(Database::in_memory().await.unwrap());
    (PipelineEngine::new(db.clone()), db)
}

#[tokio::test]
async fn test_cron_trigger_clones_and_runs_pipeline() {
    let (engine, _db) = setup().await;
    let source_id = engine
        .create(PipelineInput {
            name: "nightly".to_string(),
            trigger_message: String::new(),
            config: None,
            created_by: None,
            steps: vec![local_step("root", "say OK")],
        })
        .await
        .unwrap();
    engine.schedule(&source_id, "0 5 * * *", None).await.unwrap();

    let executor = ScriptedExecutor::always_ok();
    let scheduler = Scheduler::new(engine.clone(), executor.clone());

    // First tick at 05:00:00 fires, clones, dispatches, and completes.
    let at_five = Utc.with_ymd_and_hms(2026, 3, 10, 5, 0, 0).unwrap();
    let report = scheduler.tick(at_five).await.unwrap();
    assert_eq!(report.fired, 1);

    let instances: Vec<_> = engine
        .repo()
        .list_by_status(PipelineStatus::Complete)
        .await
        .unwrap();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].name, "nightly");
    assert_eq!(instances[0].created_by, "scheduler");
    assert_ne!(instances[0].id, source_id);

    let steps = engine.repo().steps_for(&instances[0].id).await.unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].status(), StepStatus::Complete);
    assert_eq!(steps[0].output.as_deref(), Some("OK"));

    // A second tick 30 seconds later does not double-fire.
    let thirty_later = Utc.with_ymd_and_hms(2026, 3, 10, 5, 0, 30).unwrap();
    let report = scheduler.tick(thirty_later).await.unwrap();
    assert_eq!(report.fired, 0);
}

#[tokio::test]
async fn test_trigger_skips_while_instance_is_active() {
    let (engine, _db) = setup().await;
    let source_id = engine
        .create(PipelineInput {
            name: "slow".to_string(),
            trigger_message: String::new(),
            config: None,
            created_by: None,
            steps: vec![
                local_step("first", "one"),
                StepInput {
                    depends_on: vec![DependsOn::Name("first".to_string())],
                    ..local_step("second", "two")
                },
            ],
        })
        .await
        .unwrap();
    engine.schedule(&source_id, "* * * * *", None).await.unwrap();

    // A running clone of the source already exists when the tick fires.
    let instance_id = engine.repo().clone_instance(&source_id, "scheduler").await.unwrap();
    assert_eq!(
        engine.repo().find(&instance_id).await.unwrap().unwrap().status(),
        PipelineStatus::Running
    );

    let executor = ScriptedExecutor::returning(vec![
        ExecutionOutcome::ok("one done"),
        ExecutionOutcome::ok("two done"),
    ]);
    let scheduler = Scheduler::new(engine.clone(), executor);

    let now = Utc.with_ymd_and_hms(2026, 3, 10, 9, 1, 0).unwrap();
    let report = scheduler.tick(now).await.unwrap();
    // The running clone suppresses a new instantiation.
    assert_eq!(report.fired, 0);
    // But the scheduler still advanced the running instance's work.
    assert!(report.dispatched >= 1);
}

#[tokio::test]
async fn test_dispatch_substitutes_parent_outputs() {
    let (engine, _db) = setup().await;
    let source_id = engine
        .create(PipelineInput {
            name: "chain".to_string(),
            trigger_message: String::new(),
            config: None,
            created_by: None,
            steps: vec![
                local_step("fetch", "collect data"),
                StepInput {
                    depends_on: vec![DependsOn::Name("fetch".to_string())],
                    ..local_step("summarize", "Summarize: {{prev_result}}")
                },
            ],
        })
        .await
        .unwrap();
    engine.start(&source_id).await.unwrap();

    let executor = ScriptedExecutor::returning(vec![
        ExecutionOutcome::ok("raw numbers"),
        ExecutionOutcome::ok("summary"),
    ]);
    let scheduler = Scheduler::new(engine.clone(), executor.clone());

    // First tick dispatches fetch; second dispatches summarize with the
    // parent output substituted.
    let t0 = Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap();
    scheduler.tick(t0).await.unwrap();
    let t1 = Utc.with_ymd_and_hms(2026, 3, 10, 9, 1, 0).unwrap();
    scheduler.tick(t1).await.unwrap();

    let prompts = executor.prompts();
    assert_eq!(prompts.len(), 2);
    assert_eq!(prompts[0], "collect data");
    assert_eq!(prompts[1], "Summarize: [fetch]: raw numbers");

    let pipeline = engine.repo().find(&source_id).await.unwrap().unwrap();
    assert_eq!(pipeline.status(), PipelineStatus::Complete);
}

#[tokio::test]
async fn test_failed_dispatch_feeds_retry_path() {
    let (engine, _db) = setup().await;
    let source_id = engine
        .create(PipelineInput {
            name: "flaky".to_string(),
            trigger_message: String::new(),
            config: None,
            created_by: None,
            steps: vec![StepInput {
                max_retries: Some(1),
                ..local_step("only", "try hard")
            }],
        })
        .await
        .unwrap();
    engine.start(&source_id).await.unwrap();

    let executor = ScriptedExecutor::returning(vec![
        ExecutionOutcome::err("first failure"),
        ExecutionOutcome::ok("second try worked"),
    ]);
    let scheduler = Scheduler::new(engine.clone(), executor);

    let t0 = Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap();
    scheduler.tick(t0).await.unwrap();
    let steps = engine.repo().steps_for(&source_id).await.unwrap();
    assert_eq!(steps[0].status(), StepStatus::Pending);
    assert_eq!(steps[0].retry_count, 1);

    let t1 = Utc.with_ymd_and_hms(2026, 3, 10, 9, 1, 0).unwrap();
    scheduler.tick(t1).await.unwrap();
    let pipeline = engine.repo().find(&source_id).await.unwrap().unwrap();
    assert_eq!(pipeline.status(), PipelineStatus::Complete);
}

#[tokio::test]
async fn test_stuck_running_step_is_failed() {
    let (engine, db) = setup().await;
    let source_id = engine
        .create(PipelineInput {
            name: "stuck".to_string(),
            trigger_message: String::new(),
            config: None,
            created_by: None,
            steps: vec![local_step("only", "never returns")],
        })
        .await
        .unwrap();
    engine.start(&source_id).await.unwrap();

    // Simulate an old in-flight dispatch.
    let steps = engine.repo().steps_for(&source_id).await.unwrap();
    let stale_start = Utc::now().timestamp() - 45 * 60;
    sqlx::query("UPDATE pipeline_steps SET status = 'running', started_at = ? WHERE id = ?")
        .bind(stale_start)
        .bind(&steps[0].id)
        .execute(db.pool())
        .await
        .unwrap();

    let scheduler = Scheduler::new(engine.clone(), ScriptedExecutor::always_ok());
    let report = scheduler.tick(Utc::now()).await.unwrap();
    assert_eq!(report.stuck, 1);

    let row = engine.repo().step_by_id(&steps[0].id).await.unwrap().unwrap();
    assert_eq!(row.status(), StepStatus::Failed);
    assert_eq!(
        row.error.as_deref(),
        Some("Step timed out (running > 30 minutes)")
    );
    let pipeline = engine.repo().find(&source_id).await.unwrap().unwrap();
    assert_eq!(pipeline.status(), PipelineStatus::Failed);
}

#[tokio::test]
async fn test_cancelled_pipeline_is_not_dispatched() {
    let (engine, _db) = setup().await;
    let source_id = engine
        .create(PipelineInput {
            name: "doomed".to_string(),
            trigger_message: String::new(),
            config: None,
            created_by: None,
            steps: vec![local_step("only", "work")],
        })
        .await
        .unwrap();
    engine.start(&source_id).await.unwrap();
    engine.cancel(&source_id).await.unwrap();

    let executor = ScriptedExecutor::always_ok();
    let scheduler = Scheduler::new(engine.clone(), executor.clone());
    let report = scheduler.tick(Utc::now()).await.unwrap();

    assert_eq!(report.dispatched, 0);
    assert!(executor.prompts().is_empty());
}
