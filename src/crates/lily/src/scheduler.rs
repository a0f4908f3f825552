//! Background scheduler tick.
//!
//! Invoked once per minute by the platform's cron facility as a separate
//! process; all coordination with the host adapter goes through the store.
//! One tick fires due triggers, sweeps skippable steps, persists completed
//! pipelines, dispatches ready steps to executors, and fails steps stuck in
//! `running` for more than thirty minutes.

use crate::cron::{parse_timezone, CronExpr};
use crate::error::Result;
use crate::executor::{route_step, StepExecutor};
use crate::models::{PipelineStatus, StepStatus};
use crate::pipeline::{AdvanceInput, PipelineEngine};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Steps running longer than this are treated as stuck.
const STUCK_AFTER: Duration = Duration::minutes(30);

/// Error recorded for a stuck step.
const STUCK_ERROR: &str = "Step timed out (running > 30 minutes)";

/// Cap on upstream error text carried into step errors.
const ERROR_TEXT_MAX: usize = 200;

/// Placeholder substituted with the concatenated parent outputs.
const PREV_RESULT: &str = "{{prev_result}}";
/// Placeholder substituted with the concatenated parent outputs.
const PARENT_OUTPUTS: &str = "{{parent_outputs}}";

/// Counters from one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub fired: usize,
    pub dispatched: usize,
    pub skipped: usize,
    pub completed: usize,
    pub stuck: usize,
}

/// The background scheduler.
pub struct Scheduler {
    engine: PipelineEngine,
    executor: Arc<dyn StepExecutor>,
}

impl Scheduler {
    pub fn new(engine: PipelineEngine, executor: Arc<dyn StepExecutor>) -> Self {
        Self { engine, executor }
    }

    /// Run one tick at `now`.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let mut report = TickReport::default();

        report.fired = self.fire_triggers(now).await?;

        // Pipelines are processed sequentially in created_at order.
        for pipeline in self
            .engine
            .repo()
            .list_by_status(PipelineStatus::Running)
            .await?
        {
            self.process_pipeline(&pipeline.id, &mut report).await?;
        }

        report.stuck = self.fail_stuck_steps(now).await?;

        info!(
            fired = report.fired,
            dispatched = report.dispatched,
            skipped = report.skipped,
            completed = report.completed,
            stuck = report.stuck,
            "scheduler tick finished"
        );
        Ok(report)
    }

    /// Evaluate every enabled trigger against the current minute in the
    /// trigger's timezone. Duplicate firing within one minute is suppressed
    /// via `last_fired`; a non-terminal instance with the same pipeline name
    /// suppresses a new clone.
    async fn fire_triggers(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut fired = 0;

        for trigger in self.engine.triggers().enabled().await? {
            let expr = match CronExpr::parse(&trigger.schedule) {
                Ok(expr) => expr,
                Err(e) => {
                    warn!(trigger_id = %trigger.id, error = %e, "skipping malformed trigger");
                    continue;
                }
            };
            let tz = match parse_timezone(&trigger.timezone) {
                Ok(tz) => tz,
                Err(e) => {
                    warn!(trigger_id = %trigger.id, error = %e, "skipping trigger with bad timezone");
                    continue;
                }
            };

            if !expr.matches(now, tz) {
                continue;
            }
            if let Some(last) = trigger.last_fired {
                if last / 60 == now.timestamp() / 60 {
                    debug!(trigger_id = %trigger.id, "duplicate firing suppressed");
                    continue;
                }
            }

            let Some(source) = self.engine.repo().find(&trigger.pipeline_id).await? else {
                warn!(trigger_id = %trigger.id, "trigger references a missing pipeline");
                continue;
            };
            if self
                .engine
                .repo()
                .find_non_terminal_by_name(&source.name, &source.id)
                .await?
                .is_some()
            {
                debug!(name = %source.name, "instance still active; trigger skipped");
                continue;
            }

            let instance_id = self
                .engine
                .repo()
                .clone_instance(&source.id, "scheduler")
                .await?;
            let next = expr.next_fire(now + Duration::minutes(1), tz);
            self.engine
                .triggers()
                .record_fired(&trigger.id, now.timestamp(), next.map(|t| t.timestamp()))
                .await?;
            info!(trigger_id = %trigger.id, instance = %instance_id, "trigger fired");
            fired += 1;
        }

        Ok(fired)
    }

    /// Sweep, completion-check, and dispatch one running pipeline.
    async fn process_pipeline(&self, pipeline_id: &str, report: &mut TickReport) -> Result<()> {
        // Skip sweep.
        let graph = self.engine.load_graph(pipeline_id).await?;
        let skippable: Vec<String> = graph
            .skip_set()
            .iter()
            .map(|&id| graph.node(id).id.clone())
            .collect();
        if !skippable.is_empty() {
            self.engine.repo().mark_steps_skipped(&skippable).await?;
            report.skipped += skippable.len();
        }

        // Completion check.
        let graph = self.engine.load_graph(pipeline_id).await?;
        match graph.completion() {
            flowgraph::PipelineOutcome::Complete => {
                self.engine
                    .repo()
                    .mark_pipeline_terminal(pipeline_id, PipelineStatus::Complete, None)
                    .await?;
                report.completed += 1;
                return Ok(());
            }
            flowgraph::PipelineOutcome::Failed => {
                self.engine
                    .repo()
                    .mark_pipeline_terminal(
                        pipeline_id,
                        PipelineStatus::Failed,
                        Some("one or more steps failed"),
                    )
                    .await?;
                report.completed += 1;
                return Ok(());
            }
            flowgraph::PipelineOutcome::Running => {}
        }

        // Dispatch ready steps.
        for step_id in graph.ready_set() {
            // Cooperative cancellation: re-check the pipeline before each
            // dispatch.
            let Some(current) = self.engine.repo().find(pipeline_id).await? else {
                return Ok(());
            };
            if current.status() != PipelineStatus::Running {
                return Ok(());
            }

            let node = graph.node(step_id);
            let Some(row) = self.engine.repo().step_by_id(&node.id).await? else {
                continue;
            };
            if row.status() != StepStatus::Pending {
                continue;
            }

            let parent_context = graph
                .parents_of(step_id)
                .iter()
                .filter_map(|&parent| {
                    let parent_node = graph.node(parent);
                    let output = parent_node.output.as_deref()?;
                    Some(format!("[{}]: {}", parent_node.name, output))
                })
                .collect::<Vec<_>>()
                .join("\n\n");

            let prompt = build_prompt(&row.prompt, &parent_context);
            let route = route_step(&row.executor, &row.tier);

            self.engine.repo().mark_step_running(&row.id).await?;
            debug!(step = %row.name, pipeline_id = %pipeline_id, route = ?route, "dispatching step");

            let outcome = self.executor.execute(&route, &prompt).await;
            let advance = AdvanceInput {
                success: outcome.success,
                output: outcome.output,
                error: outcome.error.as_deref().map(truncate_error),
            };
            self.engine.advance(&row.id, advance).await?;
            report.dispatched += 1;
        }

        Ok(())
    }

    /// Fail any step running past the stuck cutoff.
    async fn fail_stuck_steps(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = (now - STUCK_AFTER).timestamp();
        let stuck = self.engine.repo().stuck_steps(cutoff).await?;
        let count = stuck.len();
        for step in stuck {
            warn!(step = %step.name, pipeline_id = %step.pipeline_id, "step stuck; failing");
            self.engine
                .advance(
                    &step.id,
                    AdvanceInput {
                        success: false,
                        output: None,
                        error: Some(STUCK_ERROR.to_string()),
                    },
                )
                .await?;
        }
        Ok(count)
    }
}

/// Substitute parent outputs into the prompt template. Templates without a
/// placeholder get a preamble instead, so upstream results are never lost.
pub fn build_prompt(template: &str, parent_context: &str) -> String {
    let has_placeholder = template.contains(PREV_RESULT) || template.contains(PARENT_OUTPUTS);
    if has_placeholder {
        return template
            .replace(PREV_RESULT, parent_context)
            .replace(PARENT_OUTPUTS, parent_context);
    }
    if parent_context.is_empty() {
        template.to_string()
    } else {
        format!("Previous step outputs:\n\n{}\n\n{}", parent_context, template)
    }
}

fn truncate_error(error: &str) -> String {
    if error.chars().count() <= ERROR_TEXT_MAX {
        error.to_string()
    } else {
        error.chars().take(ERROR_TEXT_MAX).collect()
    }
}
