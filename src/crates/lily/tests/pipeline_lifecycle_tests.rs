//! Pipeline lifecycle integration tests over an in-memory store.

use lily::db::Database;
use lily::models::{PipelineStatus, StepStatus};
use lily::pipeline::{AdvanceInput, DependsOn, PipelineEngine, PipelineInput, StepInput};
use serde_json::json;
use std::sync::Arc;

fn step(name: &str) -> StepInput {
    StepInput {
        name: name.to_string(),
        step_type: None,
        tier: None,
        executor: None,
        prompt: None,
        depends_on: Vec::new(),
        depends_on_all: None,
        max_retries: None,
    }
}

fn step_after(name: &str, parent: &str) -> StepInput {
    let mut s = step(name);
    s.depends_on = vec![DependsOn::Name(parent.to_string())];
    s
}

async fn engine() -> PipelineEngine {
    let db = Arc::new(Database::in_memory().await.unwrap());
    PipelineEngine::new(db)
}

fn linear_input() -> PipelineInput {
    PipelineInput {
        name: "linear".to_string(),
        trigger_message: String::new(),
        config: None,
        created_by: None,
        steps: vec![step("a"), step_after("b", "a"), step_after("c", "b")],
    }
}

async fn step_id(engine: &PipelineEngine, pipeline_id: &str, name: &str) -> String {
    engine
        .repo()
        .steps_for(pipeline_id)
        .await
        .unwrap()
        .into_iter()
        .find(|s| s.name == name)
        .unwrap()
        .id
}

#[tokio::test]
async fn test_linear_pipeline_runs_to_completion() {
    let engine = engine().await;
    let id = engine.create(linear_input()).await.unwrap();
    engine.start(&id).await.unwrap();

    let snapshot = engine.snapshot(&id).await.unwrap();
    assert_eq!(snapshot.pipeline.status, "running");
    assert_eq!(snapshot.ready, vec!["a"]);

    let a = step_id(&engine, &id, "a").await;
    let result = engine
        .advance(&a, AdvanceInput { output: Some("done a".into()), success: true, error: None })
        .await
        .unwrap();
    assert_eq!(result.ready, vec!["b"]);
    assert!(result.skipped.is_empty());
    assert!(!result.pipeline_complete);

    let b = step_id(&engine, &id, "b").await;
    let result = engine
        .advance(&b, AdvanceInput { output: Some("done b".into()), success: true, error: None })
        .await
        .unwrap();
    assert_eq!(result.ready, vec!["c"]);

    let c = step_id(&engine, &id, "c").await;
    let result = engine
        .advance(&c, AdvanceInput { output: Some("done c".into()), success: true, error: None })
        .await
        .unwrap();
    assert!(result.ready.is_empty());
    assert!(result.pipeline_complete);

    let snapshot = engine.snapshot(&id).await.unwrap();
    assert_eq!(snapshot.pipeline.status, "complete");
    assert!(snapshot.pipeline.completed_at.is_some());
    assert!(snapshot
        .steps
        .iter()
        .all(|s| s.status() == StepStatus::Complete));
}

#[tokio::test]
async fn test_conditional_branch_is_skipped() {
    let engine = engine().await;
    let mut decision = step("check");
    decision.step_type = Some("decision".to_string());

    let mut fix = step("fix");
    fix.depends_on = vec![DependsOn::Conditional {
        step: "check".to_string(),
        when: Some(json!({ "output_contains": "build_needed" })),
    }];

    let input = PipelineInput {
        name: "conditional".to_string(),
        trigger_message: String::new(),
        config: None,
        created_by: None,
        steps: vec![decision, fix, step_after("report", "check")],
    };
    let id = engine.create(input).await.unwrap();
    engine.start(&id).await.unwrap();

    let check = step_id(&engine, &id, "check").await;
    let result = engine
        .advance(
            &check,
            AdvanceInput { output: Some("all good".into()), success: true, error: None },
        )
        .await
        .unwrap();

    assert_eq!(result.skipped, vec!["fix"]);
    assert_eq!(result.ready, vec!["report"]);
    assert!(!result.pipeline_complete);

    let report = step_id(&engine, &id, "report").await;
    let result = engine
        .advance(&report, AdvanceInput { output: Some("ok".into()), success: true, error: None })
        .await
        .unwrap();
    // Skipped alongside complete still ends complete.
    assert!(result.pipeline_complete);
}

#[tokio::test]
async fn test_zero_retry_step_fails_pipeline() {
    let engine = engine().await;
    let id = engine
        .create(PipelineInput {
            name: "fragile".to_string(),
            trigger_message: String::new(),
            config: None,
            created_by: None,
            steps: vec![step("only")],
        })
        .await
        .unwrap();
    engine.start(&id).await.unwrap();

    let only = step_id(&engine, &id, "only").await;
    let result = engine
        .advance(
            &only,
            AdvanceInput { output: None, success: false, error: Some("boom".into()) },
        )
        .await
        .unwrap();

    assert!(result.pipeline_failed);
    assert!(!result.retried);
    let snapshot = engine.snapshot(&id).await.unwrap();
    assert_eq!(snapshot.pipeline.status, "failed");
    assert_eq!(snapshot.steps[0].status(), StepStatus::Failed);
}

#[tokio::test]
async fn test_retry_law_exhausts_then_fails() {
    let engine = engine().await;
    let mut retried = step("flaky");
    retried.max_retries = Some(2);
    let id = engine
        .create(PipelineInput {
            name: "retrying".to_string(),
            trigger_message: String::new(),
            config: None,
            created_by: None,
            steps: vec![retried],
        })
        .await
        .unwrap();
    engine.start(&id).await.unwrap();
    let flaky = step_id(&engine, &id, "flaky").await;

    // First two failures go back to pending.
    for attempt in 1..=2 {
        let result = engine
            .advance(
                &flaky,
                AdvanceInput { output: None, success: false, error: Some("boom".into()) },
            )
            .await
            .unwrap();
        assert!(result.retried, "attempt {}", attempt);
        let row = engine.repo().step_by_id(&flaky).await.unwrap().unwrap();
        assert_eq!(row.status(), StepStatus::Pending);
        assert_eq!(row.retry_count, attempt);
    }

    // Third failure exhausts the budget.
    let result = engine
        .advance(
            &flaky,
            AdvanceInput { output: None, success: false, error: Some("boom".into()) },
        )
        .await
        .unwrap();
    assert!(!result.retried);
    assert!(result.pipeline_failed);
    let row = engine.repo().step_by_id(&flaky).await.unwrap().unwrap();
    assert_eq!(row.status(), StepStatus::Failed);
    assert_eq!(row.retry_count, 2);
}

#[tokio::test]
async fn test_cancel_marks_everything_and_ignores_late_results() {
    let engine = engine().await;
    let id = engine.create(linear_input()).await.unwrap();
    engine.start(&id).await.unwrap();
    engine.cancel(&id).await.unwrap();

    let snapshot = engine.snapshot(&id).await.unwrap();
    assert_eq!(snapshot.pipeline.status, "cancelled");
    assert!(snapshot
        .steps
        .iter()
        .all(|s| s.status() == StepStatus::Cancelled));

    // A result arriving after cancellation is ignored.
    let a = step_id(&engine, &id, "a").await;
    engine
        .advance(&a, AdvanceInput { output: Some("late".into()), success: true, error: None })
        .await
        .unwrap();
    let row = engine.repo().step_by_id(&a).await.unwrap().unwrap();
    assert_eq!(row.status(), StepStatus::Cancelled);
    assert!(row.output.is_none());

    // Cancelling twice is a contract error.
    assert!(engine.cancel(&id).await.is_err());
}

#[tokio::test]
async fn test_create_contract_failures_write_nothing() {
    let engine = engine().await;

    // Empty pipeline.
    let empty = PipelineInput {
        name: "empty".to_string(),
        trigger_message: String::new(),
        config: None,
        created_by: None,
        steps: vec![],
    };
    assert!(engine.create(empty).await.is_err());

    // Duplicate step names.
    let duplicate = PipelineInput {
        name: "dup".to_string(),
        trigger_message: String::new(),
        config: None,
        created_by: None,
        steps: vec![step("a"), step("a")],
    };
    assert!(engine.create(duplicate).await.is_err());

    // Unknown dependency.
    let unknown = PipelineInput {
        name: "unknown".to_string(),
        trigger_message: String::new(),
        config: None,
        created_by: None,
        steps: vec![step("a"), step_after("b", "ghost")],
    };
    assert!(engine.create(unknown).await.is_err());

    // Cycle (and no root).
    let cyclic = PipelineInput {
        name: "cyclic".to_string(),
        trigger_message: String::new(),
        config: None,
        created_by: None,
        steps: vec![step_after("a", "b"), step_after("b", "a")],
    };
    assert!(engine.create(cyclic).await.is_err());

    // Decision step whose outgoing edges are all conditional.
    let mut decision = step("choose");
    decision.step_type = Some("decision".to_string());
    let mut child = step("child");
    child.depends_on = vec![DependsOn::Conditional {
        step: "choose".to_string(),
        when: Some(json!({ "output_contains": "x" })),
    }];
    let no_default = PipelineInput {
        name: "no-default".to_string(),
        trigger_message: String::new(),
        config: None,
        created_by: None,
        steps: vec![decision, child],
    };
    assert!(engine.create(no_default).await.is_err());

    // None of the rejected pipelines left rows behind.
    assert!(engine.repo().list_non_terminal().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_start_requires_pending() {
    let engine = engine().await;
    let id = engine.create(linear_input()).await.unwrap();
    engine.start(&id).await.unwrap();
    assert!(engine.start(&id).await.is_err());
    assert!(engine.start("missing-id").await.is_err());
}

#[tokio::test]
async fn test_tick_work_items_carry_parent_context() {
    let engine = engine().await;
    let mut summarize = step_after("summarize", "fetch");
    summarize.prompt = Some("Summarize {{prev_result}}".to_string());
    let id = engine
        .create(PipelineInput {
            name: "ctx".to_string(),
            trigger_message: String::new(),
            config: None,
            created_by: None,
            steps: vec![step("fetch"), summarize],
        })
        .await
        .unwrap();
    engine.start(&id).await.unwrap();

    let fetch = step_id(&engine, &id, "fetch").await;
    engine
        .advance(
            &fetch,
            AdvanceInput { output: Some("raw data".into()), success: true, error: None },
        )
        .await
        .unwrap();

    let work = engine.tick_work_items().await.unwrap();
    assert_eq!(work.items.len(), 1);
    let item = &work.items[0];
    assert_eq!(item.step_name, "summarize");
    assert_eq!(item.parent_context, "[fetch]: raw data");
}

#[tokio::test]
async fn test_schedule_validates_cron_and_pipeline() {
    let engine = engine().await;
    let id = engine.create(linear_input()).await.unwrap();

    assert!(engine.schedule(&id, "0 5 * * *", None).await.is_ok());
    assert!(engine.schedule(&id, "not a cron", None).await.is_err());
    assert!(engine.schedule(&id, "0 5 * *", None).await.is_err());
    assert!(engine
        .schedule(&id, "0 5 * * *", Some("Mars/Olympus"))
        .await
        .is_err());
    assert!(engine
        .schedule("missing", "0 5 * * *", None)
        .await
        .is_err());

    let triggers = engine.triggers().enabled().await.unwrap();
    assert_eq!(triggers.len(), 1);
    assert_eq!(triggers[0].schedule, "0 5 * * *");
    assert!(triggers[0].next_fire.is_some());
}

#[tokio::test]
async fn test_cancel_disables_triggers() {
    let engine = engine().await;
    let id = engine.create(linear_input()).await.unwrap();
    engine.schedule(&id, "0 5 * * *", None).await.unwrap();
    engine.start(&id).await.unwrap();
    engine.cancel(&id).await.unwrap();
    assert!(engine.triggers().enabled().await.unwrap().is_empty());
    assert_eq!(
        engine.repo().find(&id).await.unwrap().unwrap().status(),
        PipelineStatus::Cancelled
    );
}
