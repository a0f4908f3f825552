//! Trigger repository for cron-scheduled pipeline instantiation

use crate::db::Database;
use crate::error::Result;
use crate::models::TriggerRow;
use std::sync::Arc;

/// Repository for pipeline triggers.
#[derive(Clone, Debug)]
pub struct TriggerRepository {
    db: Arc<Database>,
}

impl TriggerRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn insert(&self, trigger: &TriggerRow) -> Result<()> {
        sqlx::query(
            "INSERT INTO pipeline_triggers
             (id, pipeline_id, schedule, timezone, enabled, last_fired, next_fire)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&trigger.id)
        .bind(&trigger.pipeline_id)
        .bind(&trigger.schedule)
        .bind(&trigger.timezone)
        .bind(trigger.enabled)
        .bind(trigger.last_fired)
        .bind(trigger.next_fire)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    pub async fn enabled(&self) -> Result<Vec<TriggerRow>> {
        let rows = sqlx::query_as::<_, TriggerRow>(
            "SELECT id, pipeline_id, schedule, timezone, enabled, last_fired, next_fire
             FROM pipeline_triggers WHERE enabled = 1",
        )
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    pub async fn record_fired(&self, id: &str, fired_at: i64, next_fire: Option<i64>) -> Result<()> {
        sqlx::query("UPDATE pipeline_triggers SET last_fired = ?, next_fire = ? WHERE id = ?")
            .bind(fired_at)
            .bind(next_fire)
            .bind(id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    pub async fn disable_for_pipeline(&self, pipeline_id: &str) -> Result<()> {
        sqlx::query("UPDATE pipeline_triggers SET enabled = 0 WHERE pipeline_id = ?")
            .bind(pipeline_id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }
}
