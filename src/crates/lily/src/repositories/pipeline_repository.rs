//! Pipeline repository: pipelines, steps, and edges.
//!
//! Multi-row writes (create, clone, cancel, completion cascade) execute
//! inside transactions so a concurrent reader never observes a partially
//! written pipeline.

use crate::db::{sanitize_value, Database};
use crate::error::{LilyError, Result};
use crate::models::{now_ts, EdgeRow, Pipeline, PipelineStatus, StepRow, StepStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Repository for pipeline aggregates.
#[derive(Clone, Debug)]
pub struct PipelineRepository {
    db: Arc<Database>,
}

const PIPELINE_COLUMNS: &str = "id, name, status, created_at, updated_at, started_at, \
                                completed_at, created_by, trigger_message, config, summary, error";

const STEP_COLUMNS: &str = "id, pipeline_id, name, step_type, status, tier, executor, prompt, \
                            depends_on_all, retry_count, max_retries, created_at, updated_at, \
                            started_at, completed_at, input, output, result_summary, error";

impl PipelineRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a pipeline with its steps and edges as one logical unit.
    pub async fn insert_graph(
        &self,
        pipeline: &Pipeline,
        steps: &[StepRow],
        edges: &[EdgeRow],
    ) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;

        sqlx::query(&format!(
            "INSERT INTO pipelines ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            PIPELINE_COLUMNS
        ))
        .bind(&pipeline.id)
        .bind(&pipeline.name)
        .bind(&pipeline.status)
        .bind(pipeline.created_at)
        .bind(pipeline.updated_at)
        .bind(pipeline.started_at)
        .bind(pipeline.completed_at)
        .bind(&pipeline.created_by)
        .bind(sanitize_value(&pipeline.trigger_message))
        .bind(&pipeline.config)
        .bind(&pipeline.summary)
        .bind(&pipeline.error)
        .execute(&mut *tx)
        .await?;

        for step in steps {
            sqlx::query(&format!(
                "INSERT INTO pipeline_steps ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                STEP_COLUMNS
            ))
            .bind(&step.id)
            .bind(&step.pipeline_id)
            .bind(&step.name)
            .bind(&step.step_type)
            .bind(&step.status)
            .bind(&step.tier)
            .bind(&step.executor)
            .bind(sanitize_value(&step.prompt))
            .bind(step.depends_on_all)
            .bind(step.retry_count)
            .bind(step.max_retries)
            .bind(step.created_at)
            .bind(step.updated_at)
            .bind(step.started_at)
            .bind(step.completed_at)
            .bind(&step.input)
            .bind(&step.output)
            .bind(&step.result_summary)
            .bind(&step.error)
            .execute(&mut *tx)
            .await?;
        }

        for edge in edges {
            sqlx::query(
                "INSERT INTO pipeline_edges (id, pipeline_id, parent_step_id, child_step_id, condition)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&edge.id)
            .bind(&edge.pipeline_id)
            .bind(&edge.parent_step_id)
            .bind(&edge.child_step_id)
            .bind(&edge.condition)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn find(&self, id: &str) -> Result<Option<Pipeline>> {
        let row = sqlx::query_as::<_, Pipeline>(&format!(
            "SELECT {} FROM pipelines WHERE id = ?",
            PIPELINE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row)
    }

    /// A non-terminal pipeline instance with the given name, excluding the
    /// source template itself.
    pub async fn find_non_terminal_by_name(
        &self,
        name: &str,
        exclude_id: &str,
    ) -> Result<Option<Pipeline>> {
        let row = sqlx::query_as::<_, Pipeline>(&format!(
            "SELECT {} FROM pipelines
             WHERE name = ? AND id != ? AND status NOT IN ('complete', 'failed', 'cancelled')
             LIMIT 1",
            PIPELINE_COLUMNS
        ))
        .bind(name)
        .bind(exclude_id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row)
    }

    pub async fn list_by_status(&self, status: PipelineStatus) -> Result<Vec<Pipeline>> {
        let rows = sqlx::query_as::<_, Pipeline>(&format!(
            "SELECT {} FROM pipelines WHERE status = ? ORDER BY created_at",
            PIPELINE_COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    pub async fn list_non_terminal(&self) -> Result<Vec<Pipeline>> {
        let rows = sqlx::query_as::<_, Pipeline>(&format!(
            "SELECT {} FROM pipelines
             WHERE status NOT IN ('complete', 'failed', 'cancelled')
             ORDER BY created_at",
            PIPELINE_COLUMNS
        ))
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    pub async fn steps_for(&self, pipeline_id: &str) -> Result<Vec<StepRow>> {
        let rows = sqlx::query_as::<_, StepRow>(&format!(
            "SELECT {} FROM pipeline_steps WHERE pipeline_id = ? ORDER BY created_at, id",
            STEP_COLUMNS
        ))
        .bind(pipeline_id)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    pub async fn edges_for(&self, pipeline_id: &str) -> Result<Vec<EdgeRow>> {
        let rows = sqlx::query_as::<_, EdgeRow>(
            "SELECT id, pipeline_id, parent_step_id, child_step_id, condition
             FROM pipeline_edges WHERE pipeline_id = ?",
        )
        .bind(pipeline_id)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    pub async fn step_by_id(&self, step_id: &str) -> Result<Option<StepRow>> {
        let row = sqlx::query_as::<_, StepRow>(&format!(
            "SELECT {} FROM pipeline_steps WHERE id = ?",
            STEP_COLUMNS
        ))
        .bind(step_id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row)
    }

    pub async fn set_pipeline_status(&self, id: &str, status: PipelineStatus) -> Result<()> {
        sqlx::query("UPDATE pipelines SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now_ts())
            .bind(id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    pub async fn mark_pipeline_started(&self, id: &str) -> Result<()> {
        let now = now_ts();
        sqlx::query(
            "UPDATE pipelines SET status = 'running', started_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Persist a terminal pipeline status with its completion timestamp.
    pub async fn mark_pipeline_terminal(
        &self,
        id: &str,
        status: PipelineStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let now = now_ts();
        sqlx::query(
            "UPDATE pipelines
             SET status = ?, completed_at = ?, updated_at = ?, error = COALESCE(?, error)
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(now)
        .bind(now)
        .bind(error)
        .bind(id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    pub async fn set_step_status(&self, step_id: &str, status: StepStatus) -> Result<()> {
        sqlx::query("UPDATE pipeline_steps SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now_ts())
            .bind(step_id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    pub async fn mark_step_running(&self, step_id: &str) -> Result<()> {
        let now = now_ts();
        sqlx::query(
            "UPDATE pipeline_steps SET status = 'running', started_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(step_id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    pub async fn mark_step_complete(&self, step_id: &str, output: Option<&str>) -> Result<()> {
        let now = now_ts();
        sqlx::query(
            "UPDATE pipeline_steps
             SET status = 'complete', output = ?, error = NULL, completed_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(output)
        .bind(now)
        .bind(now)
        .bind(step_id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    pub async fn mark_step_failed(
        &self,
        step_id: &str,
        output: Option<&str>,
        error: &str,
    ) -> Result<()> {
        let now = now_ts();
        sqlx::query(
            "UPDATE pipeline_steps
             SET status = 'failed', output = COALESCE(?, output), error = ?,
                 completed_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(output)
        .bind(error)
        .bind(now)
        .bind(now)
        .bind(step_id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Reset a failed attempt back to pending with an incremented retry
    /// counter. The counter lives on the row, never in memory.
    pub async fn mark_step_retry(&self, step_id: &str, error: &str) -> Result<()> {
        let now = now_ts();
        sqlx::query(
            "UPDATE pipeline_steps
             SET status = 'pending', retry_count = retry_count + 1, error = ?,
                 started_at = NULL, updated_at = ?
             WHERE id = ?",
        )
        .bind(error)
        .bind(now)
        .bind(step_id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Mark a batch of steps skipped in one transaction.
    pub async fn mark_steps_skipped(&self, step_ids: &[String]) -> Result<()> {
        if step_ids.is_empty() {
            return Ok(());
        }
        let now = now_ts();
        let mut tx = self.db.pool().begin().await?;
        for id in step_ids {
            sqlx::query(
                "UPDATE pipeline_steps
                 SET status = 'skipped', completed_at = ?, updated_at = ?
                 WHERE id = ? AND status = 'pending'",
            )
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Cancel a pipeline: every non-terminal step becomes `cancelled`, the
    /// pipeline becomes `cancelled`, and its triggers are disabled.
    pub async fn cancel(&self, pipeline_id: &str) -> Result<()> {
        let now = now_ts();
        let mut tx = self.db.pool().begin().await?;

        sqlx::query(
            "UPDATE pipeline_steps
             SET status = 'cancelled', completed_at = ?, updated_at = ?
             WHERE pipeline_id = ?
               AND status NOT IN ('complete', 'failed', 'skipped', 'cancelled')",
        )
        .bind(now)
        .bind(now)
        .bind(pipeline_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE pipelines SET status = 'cancelled', completed_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(pipeline_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE pipeline_triggers SET enabled = 0 WHERE pipeline_id = ?")
            .bind(pipeline_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(pipeline_id = %pipeline_id, "pipeline cancelled");
        Ok(())
    }

    /// Clone a source pipeline's steps and edges under fresh ids into a new
    /// instance, transactionally. Step state resets to pending.
    pub async fn clone_instance(
        &self,
        source_id: &str,
        created_by: &str,
    ) -> Result<String> {
        let source = self
            .find(source_id)
            .await?
            .ok_or_else(|| LilyError::NotFound(format!("pipeline {}", source_id)))?;
        let steps = self.steps_for(source_id).await?;
        let edges = self.edges_for(source_id).await?;

        let now = now_ts();
        let new_pipeline_id = Uuid::new_v4().to_string();
        let mut id_map: HashMap<String, String> = HashMap::with_capacity(steps.len());
        for step in &steps {
            id_map.insert(step.id.clone(), Uuid::new_v4().to_string());
        }

        let mut tx = self.db.pool().begin().await?;

        sqlx::query(&format!(
            "INSERT INTO pipelines ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            PIPELINE_COLUMNS
        ))
        .bind(&new_pipeline_id)
        .bind(&source.name)
        .bind(PipelineStatus::Running.as_str())
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(None::<i64>)
        .bind(created_by)
        .bind(&source.trigger_message)
        .bind(&source.config)
        .bind(None::<String>)
        .bind(None::<String>)
        .execute(&mut *tx)
        .await?;

        for step in &steps {
            sqlx::query(&format!(
                "INSERT INTO pipeline_steps ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                STEP_COLUMNS
            ))
            .bind(&id_map[&step.id])
            .bind(&new_pipeline_id)
            .bind(&step.name)
            .bind(&step.step_type)
            .bind(StepStatus::Pending.as_str())
            .bind(&step.tier)
            .bind(&step.executor)
            .bind(&step.prompt)
            .bind(step.depends_on_all)
            .bind(0i64)
            .bind(step.max_retries)
            .bind(now)
            .bind(now)
            .bind(None::<i64>)
            .bind(None::<i64>)
            .bind(None::<String>)
            .bind(None::<String>)
            .bind(None::<String>)
            .bind(None::<String>)
            .execute(&mut *tx)
            .await?;
        }

        for edge in &edges {
            let (Some(parent), Some(child)) = (
                id_map.get(&edge.parent_step_id),
                id_map.get(&edge.child_step_id),
            ) else {
                continue;
            };
            sqlx::query(
                "INSERT INTO pipeline_edges (id, pipeline_id, parent_step_id, child_step_id, condition)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&new_pipeline_id)
            .bind(parent)
            .bind(child)
            .bind(&edge.condition)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(source = %source_id, instance = %new_pipeline_id, "cloned pipeline instance");
        Ok(new_pipeline_id)
    }

    /// Running steps started before `cutoff_ts`, for stuck detection.
    pub async fn stuck_steps(&self, cutoff_ts: i64) -> Result<Vec<StepRow>> {
        let rows = sqlx::query_as::<_, StepRow>(&format!(
            "SELECT {} FROM pipeline_steps
             WHERE status = 'running' AND started_at IS NOT NULL AND started_at < ?",
            STEP_COLUMNS
        ))
        .bind(cutoff_ts)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }
}
