//! Security event repository for the audit trail

use crate::db::{sanitize_value, Database};
use crate::error::Result;
use crate::models::SecurityEvent;
use std::sync::Arc;

/// Repository for security audit events.
#[derive(Clone, Debug)]
pub struct SecurityRepository {
    db: Arc<Database>,
}

impl SecurityRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn insert(&self, event: &SecurityEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO security_events
             (id, ts, event_type, source_role, entity, fact_key, fact_value, pattern, snippet)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.id)
        .bind(event.ts)
        .bind(&event.event_type)
        .bind(&event.source_role)
        .bind(event.entity.as_deref().map(sanitize_value))
        .bind(event.fact_key.as_deref().map(sanitize_value))
        .bind(event.fact_value.as_deref().map(sanitize_value))
        .bind(&event.pattern)
        .bind(&event.snippet)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<SecurityEvent>> {
        let rows = sqlx::query_as::<_, SecurityEvent>(
            "SELECT id, ts, event_type, source_role, entity, fact_key, fact_value, pattern, snippet
             FROM security_events
             ORDER BY ts DESC
             LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM security_events")
            .fetch_one(self.db.pool())
            .await?;
        Ok(count)
    }
}
