//! Pipeline engine: create, start, advance, cancel, schedule, tick.
//!
//! Every operation reloads the DAG from the store, asks `flowgraph` the
//! topology question at hand, and persists the answer. The graph itself is
//! never cached; step rows are the single source of truth.

use crate::cron::{parse_timezone, CronExpr};
use crate::db::Database;
use crate::error::{LilyError, Result};
use crate::models::{
    now_ts, EdgeRow, Pipeline, PipelineStatus, StepRow, StepStatus, StepType, TriggerRow,
};
use crate::repositories::{PipelineRepository, TriggerRepository};
use chrono::Utc;
use flowgraph::{EdgeCondition, GraphEdge, PipelineOutcome, StepGraph, StepNode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Step outputs are truncated to this many characters on write.
pub const OUTPUT_MAX: usize = 65_536;

/// Parent context fed into a dispatched prompt is capped per parent.
pub const PARENT_CONTEXT_MAX: usize = 500;

/// Pipeline creation input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineInput {
    pub name: String,
    #[serde(default)]
    pub trigger_message: String,
    #[serde(default)]
    pub config: Option<Value>,
    #[serde(default)]
    pub created_by: Option<String>,
    pub steps: Vec<StepInput>,
}

/// One step in a creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepInput {
    pub name: String,
    #[serde(default)]
    pub step_type: Option<String>,
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub executor: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<DependsOn>,
    #[serde(default)]
    pub depends_on_all: Option<bool>,
    #[serde(default)]
    pub max_retries: Option<i64>,
}

/// A dependency reference: a bare parent name is unconditional, an object
/// carries a condition payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependsOn {
    Name(String),
    Conditional {
        step: String,
        #[serde(default)]
        when: Option<Value>,
    },
}

impl DependsOn {
    fn parent(&self) -> &str {
        match self {
            Self::Name(name) => name,
            Self::Conditional { step, .. } => step,
        }
    }

    fn condition(&self) -> Option<&Value> {
        match self {
            Self::Name(_) => None,
            Self::Conditional { when, .. } => when.as_ref(),
        }
    }
}

/// Result reported for a finished or failed step execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdvanceInput {
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

fn default_true() -> bool {
    true
}

/// What an `advance` call changed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AdvanceResult {
    /// Step names now eligible for dispatch.
    pub ready: Vec<String>,
    /// Step names newly marked skipped by this call.
    pub skipped: Vec<String>,
    pub pipeline_complete: bool,
    pub pipeline_failed: bool,
    /// Whether the step went back to pending for another attempt.
    pub retried: bool,
}

/// Snapshot returned by `status` for one pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSnapshot {
    pub pipeline: Pipeline,
    pub steps: Vec<StepRow>,
    pub ready: Vec<String>,
    pub outcome: String,
}

/// Aggregate counts for the all-pipelines status view.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineAggregate {
    pub pipeline: Pipeline,
    pub total_steps: usize,
    pub complete_steps: usize,
    pub failed_steps: usize,
}

/// A ready step packaged for dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct WorkItem {
    pub pipeline_id: String,
    pub pipeline_name: String,
    pub step_id: String,
    pub step_name: String,
    pub step_type: String,
    pub tier: String,
    pub executor: String,
    pub prompt: String,
    pub parent_context: String,
}

/// Work produced by one synchronous tick.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickWork {
    pub items: Vec<WorkItem>,
    /// Paused steps awaiting external input, as (pipeline id, step name).
    pub paused: Vec<(String, String)>,
}

/// Truncate a step output, marking the cut.
pub fn truncate_output(output: &str) -> String {
    if output.chars().count() <= OUTPUT_MAX {
        output.to_string()
    } else {
        let cut: String = output.chars().take(OUTPUT_MAX - 1).collect();
        format!("{}…", cut)
    }
}

fn truncate_context(text: &str) -> String {
    if text.chars().count() <= PARENT_CONTEXT_MAX {
        text.to_string()
    } else {
        let cut: String = text.chars().take(PARENT_CONTEXT_MAX - 1).collect();
        format!("{}…", cut)
    }
}

/// DAG-based pipeline engine over the shared store.
#[derive(Clone)]
pub struct PipelineEngine {
    pipelines: PipelineRepository,
    triggers: TriggerRepository,
}

impl PipelineEngine {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            pipelines: PipelineRepository::new(db.clone()),
            triggers: TriggerRepository::new(db),
        }
    }

    pub fn repo(&self) -> &PipelineRepository {
        &self.pipelines
    }

    pub fn triggers(&self) -> &TriggerRepository {
        &self.triggers
    }

    /// Create a pipeline from its input. Contract failures return before
    /// anything is written.
    pub async fn create(&self, input: PipelineInput) -> Result<String> {
        if input.name.trim().is_empty() {
            return Err(LilyError::Contract("pipeline name is required".to_string()));
        }
        if input.steps.is_empty() {
            return Err(LilyError::Contract("pipeline has no steps".to_string()));
        }

        let mut names: HashSet<&str> = HashSet::with_capacity(input.steps.len());
        for step in &input.steps {
            if step.name.trim().is_empty() {
                return Err(LilyError::Contract("step name is required".to_string()));
            }
            if !names.insert(step.name.as_str()) {
                return Err(LilyError::Contract(format!(
                    "duplicate step name '{}'",
                    step.name
                )));
            }
        }
        for step in &input.steps {
            for dep in &step.depends_on {
                if !names.contains(dep.parent()) {
                    return Err(LilyError::Contract(format!(
                        "step '{}' depends on unknown step '{}'",
                        step.name,
                        dep.parent()
                    )));
                }
            }
        }

        let mut pipeline = Pipeline::new(
            input.name.trim(),
            input.created_by.as_deref().unwrap_or("user"),
        );
        pipeline.trigger_message = input.trigger_message.clone();
        pipeline.config = input
            .config
            .as_ref()
            .map(|c| serde_json::to_string(c))
            .transpose()?;

        let now = now_ts();
        let mut id_by_name: HashMap<&str, String> = HashMap::with_capacity(input.steps.len());
        for step in &input.steps {
            id_by_name.insert(step.name.as_str(), Uuid::new_v4().to_string());
        }

        let steps: Vec<StepRow> = input
            .steps
            .iter()
            .map(|step| StepRow {
                id: id_by_name[step.name.as_str()].clone(),
                pipeline_id: pipeline.id.clone(),
                name: step.name.clone(),
                step_type: StepType::from(step.step_type.as_deref().unwrap_or("task"))
                    .as_str()
                    .to_string(),
                status: StepStatus::Pending.as_str().to_string(),
                tier: step.tier.clone().unwrap_or_default(),
                executor: step.executor.clone().unwrap_or_default(),
                prompt: step.prompt.clone().unwrap_or_default(),
                depends_on_all: i64::from(step.depends_on_all.unwrap_or(true)),
                retry_count: 0,
                max_retries: step.max_retries.unwrap_or(0),
                created_at: now,
                updated_at: now,
                started_at: None,
                completed_at: None,
                input: None,
                output: None,
                result_summary: None,
                error: None,
            })
            .collect();

        let mut edges = Vec::new();
        for step in &input.steps {
            for dep in &step.depends_on {
                let condition = dep
                    .condition()
                    .filter(|v| !v.is_null())
                    .map(|v| serde_json::to_string(v))
                    .transpose()?;
                edges.push(EdgeRow {
                    id: Uuid::new_v4().to_string(),
                    pipeline_id: pipeline.id.clone(),
                    parent_step_id: id_by_name[dep.parent()].clone(),
                    child_step_id: id_by_name[step.name.as_str()].clone(),
                    condition,
                });
            }
        }

        let graph = build_graph(&steps, &edges);
        let report = graph.validate(None);
        if !report.ok {
            return Err(LilyError::Contract(report.errors.join("; ")));
        }

        self.pipelines.insert_graph(&pipeline, &steps, &edges).await?;
        info!(pipeline_id = %pipeline.id, name = %pipeline.name, steps = steps.len(), "pipeline created");
        Ok(pipeline.id)
    }

    /// Transition pending -> running.
    pub async fn start(&self, id: &str) -> Result<()> {
        let pipeline = self
            .pipelines
            .find(id)
            .await?
            .ok_or_else(|| LilyError::NotFound(format!("pipeline {}", id)))?;
        if pipeline.status() != PipelineStatus::Pending {
            return Err(LilyError::Pipeline(format!(
                "pipeline {} is {}, not pending",
                id, pipeline.status
            )));
        }
        self.pipelines.mark_pipeline_started(id).await
    }

    /// Load the DAG for a pipeline from its rows.
    pub async fn load_graph(&self, pipeline_id: &str) -> Result<StepGraph> {
        let steps = self.pipelines.steps_for(pipeline_id).await?;
        let edges = self.pipelines.edges_for(pipeline_id).await?;
        Ok(build_graph(&steps, &edges))
    }

    /// Snapshot one pipeline: rows, ready set, and outcome.
    pub async fn snapshot(&self, id: &str) -> Result<PipelineSnapshot> {
        let pipeline = self
            .pipelines
            .find(id)
            .await?
            .ok_or_else(|| LilyError::NotFound(format!("pipeline {}", id)))?;
        let steps = self.pipelines.steps_for(id).await?;
        let graph = build_graph(&steps, &self.pipelines.edges_for(id).await?);
        let ready = step_names(&graph, &graph.ready_set());
        let outcome = match graph.completion() {
            PipelineOutcome::Running => "running",
            PipelineOutcome::Complete => "complete",
            PipelineOutcome::Failed => "failed",
        };
        Ok(PipelineSnapshot {
            pipeline,
            steps,
            ready,
            outcome: outcome.to_string(),
        })
    }

    /// Aggregates for every non-terminal pipeline.
    pub async fn overview(&self) -> Result<Vec<PipelineAggregate>> {
        let mut out = Vec::new();
        for pipeline in self.pipelines.list_non_terminal().await? {
            let steps = self.pipelines.steps_for(&pipeline.id).await?;
            out.push(PipelineAggregate {
                total_steps: steps.len(),
                complete_steps: steps
                    .iter()
                    .filter(|s| s.status() == StepStatus::Complete)
                    .count(),
                failed_steps: steps
                    .iter()
                    .filter(|s| s.status() == StepStatus::Failed)
                    .count(),
                pipeline,
            });
        }
        Ok(out)
    }

    /// Record a step result and cascade the consequences: retry or terminal
    /// step status, newly skippable steps, pipeline completion.
    pub async fn advance(&self, step_id: &str, input: AdvanceInput) -> Result<AdvanceResult> {
        let step = self
            .pipelines
            .step_by_id(step_id)
            .await?
            .ok_or_else(|| LilyError::NotFound(format!("step {}", step_id)))?;

        // A result for a step already terminal (e.g. cancelled mid-flight)
        // is ignored; report current state without mutating it.
        if step.is_terminal() {
            return self.post_advance_state(&step.pipeline_id, Vec::new(), false).await;
        }

        let output = input.output.as_deref().map(truncate_output);
        let mut retried = false;

        if input.success {
            self.pipelines
                .mark_step_complete(step_id, output.as_deref())
                .await?;
        } else {
            let error = input.error.as_deref().unwrap_or("step failed");
            if step.retry_count < step.max_retries {
                self.pipelines.mark_step_retry(step_id, error).await?;
                retried = true;
            } else {
                self.pipelines
                    .mark_step_failed(step_id, output.as_deref(), error)
                    .await?;
            }
        }

        // Sweep steps whose join became unsatisfiable.
        let graph = self.load_graph(&step.pipeline_id).await?;
        let skippable: Vec<String> = graph
            .skip_set()
            .iter()
            .map(|&id| graph.node(id).id.clone())
            .collect();
        let skipped_names = step_names_by_row_id(&graph, &skippable);
        self.pipelines.mark_steps_skipped(&skippable).await?;

        self.post_advance_state(&step.pipeline_id, skipped_names, retried)
            .await
    }

    async fn post_advance_state(
        &self,
        pipeline_id: &str,
        skipped: Vec<String>,
        retried: bool,
    ) -> Result<AdvanceResult> {
        let graph = self.load_graph(pipeline_id).await?;
        let ready = step_names(&graph, &graph.ready_set());

        let mut result = AdvanceResult {
            ready,
            skipped,
            retried,
            ..Default::default()
        };

        // A pipeline already terminal (e.g. cancelled) keeps its status; the
        // completion cascade must not resurrect it.
        if let Some(pipeline) = self.pipelines.find(pipeline_id).await? {
            if pipeline.is_terminal() {
                result.pipeline_complete = pipeline.status() == PipelineStatus::Complete;
                result.pipeline_failed = pipeline.status() == PipelineStatus::Failed;
                return Ok(result);
            }
        }

        match graph.completion() {
            PipelineOutcome::Running => {}
            PipelineOutcome::Complete => {
                self.pipelines
                    .mark_pipeline_terminal(pipeline_id, PipelineStatus::Complete, None)
                    .await?;
                result.pipeline_complete = true;
            }
            PipelineOutcome::Failed => {
                self.pipelines
                    .mark_pipeline_terminal(
                        pipeline_id,
                        PipelineStatus::Failed,
                        Some("one or more steps failed"),
                    )
                    .await?;
                result.pipeline_failed = true;
            }
        }
        Ok(result)
    }

    /// Cancel a non-terminal pipeline.
    pub async fn cancel(&self, id: &str) -> Result<()> {
        let pipeline = self
            .pipelines
            .find(id)
            .await?
            .ok_or_else(|| LilyError::NotFound(format!("pipeline {}", id)))?;
        if pipeline.is_terminal() {
            return Err(LilyError::Pipeline(format!(
                "pipeline {} is already {}",
                id, pipeline.status
            )));
        }
        self.pipelines.cancel(id).await
    }

    /// Register a cron trigger for a pipeline. The expression is parsed at
    /// insertion; malformed input never reaches the table.
    pub async fn schedule(
        &self,
        pipeline_id: &str,
        schedule: &str,
        timezone: Option<&str>,
    ) -> Result<String> {
        let expr = CronExpr::parse(schedule)?;
        let tz_name = timezone.unwrap_or("UTC");
        let tz = parse_timezone(tz_name)?;

        self.pipelines
            .find(pipeline_id)
            .await?
            .ok_or_else(|| LilyError::NotFound(format!("pipeline {}", pipeline_id)))?;

        let trigger = TriggerRow {
            id: Uuid::new_v4().to_string(),
            pipeline_id: pipeline_id.to_string(),
            schedule: schedule.trim().to_string(),
            timezone: tz_name.to_string(),
            enabled: 1,
            last_fired: None,
            next_fire: expr.next_fire(Utc::now(), tz).map(|t| t.timestamp()),
        };
        self.triggers.insert(&trigger).await?;
        info!(trigger_id = %trigger.id, pipeline_id = %pipeline_id, schedule = %schedule, "trigger scheduled");
        Ok(trigger.id)
    }

    /// Synchronous tick helper: package every ready step of every running
    /// pipeline as a work item, with parent context from completed parents.
    pub async fn tick_work_items(&self) -> Result<TickWork> {
        let mut work = TickWork::default();

        for pipeline in self.pipelines.list_by_status(PipelineStatus::Running).await? {
            let steps = self.pipelines.steps_for(&pipeline.id).await?;
            let edges = self.pipelines.edges_for(&pipeline.id).await?;
            let graph = build_graph(&steps, &edges);
            let rows_by_id: HashMap<&str, &StepRow> =
                steps.iter().map(|s| (s.id.as_str(), s)).collect();

            for step_id in graph.ready_set() {
                let node = graph.node(step_id);
                let Some(row) = rows_by_id.get(node.id.as_str()) else {
                    continue;
                };

                let parent_context = graph
                    .parents_of(step_id)
                    .iter()
                    .filter_map(|&parent| {
                        let parent_node = graph.node(parent);
                        let parent_row = rows_by_id.get(parent_node.id.as_str())?;
                        if parent_row.status() != StepStatus::Complete {
                            return None;
                        }
                        let text = parent_row
                            .result_summary
                            .clone()
                            .or_else(|| parent_row.output.clone())?;
                        Some(format!("[{}]: {}", parent_node.name, truncate_context(&text)))
                    })
                    .collect::<Vec<_>>()
                    .join("\n\n");

                work.items.push(WorkItem {
                    pipeline_id: pipeline.id.clone(),
                    pipeline_name: pipeline.name.clone(),
                    step_id: row.id.clone(),
                    step_name: row.name.clone(),
                    step_type: row.step_type.clone(),
                    tier: row.tier.clone(),
                    executor: row.executor.clone(),
                    prompt: row.prompt.clone(),
                    parent_context,
                });
            }

            for row in &steps {
                if row.status() == StepStatus::Paused {
                    work.paused.push((pipeline.id.clone(), row.name.clone()));
                }
            }
        }

        Ok(work)
    }
}

/// Map step and edge rows into a `flowgraph` graph.
pub fn build_graph(steps: &[StepRow], edges: &[EdgeRow]) -> StepGraph {
    let nodes: Vec<StepNode> = steps
        .iter()
        .map(|row| StepNode {
            id: row.id.clone(),
            name: row.name.clone(),
            step_type: row.step_type(),
            status: row.status(),
            depends_on_all: row.depends_on_all != 0,
            output: row.output.clone(),
        })
        .collect();

    let graph_edges: Vec<GraphEdge> = edges
        .iter()
        .map(|row| {
            let payload = row
                .condition
                .as_deref()
                .and_then(|raw| serde_json::from_str::<Value>(raw).ok());
            GraphEdge::new(
                row.parent_step_id.clone(),
                row.child_step_id.clone(),
                EdgeCondition::from_json(payload.as_ref()),
            )
        })
        .collect();

    StepGraph::build(nodes, graph_edges)
}

fn step_names(graph: &StepGraph, ids: &[flowgraph::StepId]) -> Vec<String> {
    ids.iter().map(|&id| graph.node(id).name.clone()).collect()
}

fn step_names_by_row_id(graph: &StepGraph, row_ids: &[String]) -> Vec<String> {
    row_ids
        .iter()
        .filter_map(|id| graph.by_id(id).map(|sid| graph.node(sid).name.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_output_marks_the_cut() {
        let long = "y".repeat(OUTPUT_MAX + 100);
        let truncated = truncate_output(&long);
        assert_eq!(truncated.chars().count(), OUTPUT_MAX);
        assert!(truncated.ends_with('…'));
        assert_eq!(truncate_output("short"), "short");
    }

    #[test]
    fn test_depends_on_deserialization() {
        let raw = r#"["build", {"step": "test", "when": {"output_contains": "ok"}}]"#;
        let deps: Vec<DependsOn> = serde_json::from_str(raw).unwrap();
        assert_eq!(deps[0].parent(), "build");
        assert_eq!(deps[1].parent(), "test");
        assert!(deps[0].condition().is_none());
        assert!(deps[1].condition().is_some());
    }

    #[test]
    fn test_advance_input_defaults_to_success() {
        let input: AdvanceInput = serde_json::from_str(r#"{"output": "done"}"#).unwrap();
        assert!(input.success);
    }
}
