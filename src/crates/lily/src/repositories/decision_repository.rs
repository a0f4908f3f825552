//! Decision repository for database operations

use crate::db::{sanitize_value, Database};
use crate::error::{LilyError, Result};
use crate::models::{now_ts, Decision, TtlClass};
use std::sync::Arc;
use tracing::debug;

/// Repository for decision (memory fact) rows.
#[derive(Clone, Debug)]
pub struct DecisionRepository {
    db: Arc<Database>,
}

const COLUMNS: &str = "id, session_id, ts, category, description, rationale, classification, \
                       importance, ttl_class, expires_at, last_accessed, entity, fact_key, \
                       fact_value, tags";

impl DecisionRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a decision row; values are sanitized on the way in.
    pub async fn insert(&self, decision: &Decision) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO decisions ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            COLUMNS
        ))
        .bind(&decision.id)
        .bind(&decision.session_id)
        .bind(decision.ts)
        .bind(&decision.category)
        .bind(sanitize_value(&decision.description))
        .bind(sanitize_value(&decision.rationale))
        .bind(&decision.classification)
        .bind(decision.importance)
        .bind(&decision.ttl_class)
        .bind(decision.expires_at)
        .bind(decision.last_accessed)
        .bind(decision.entity.as_deref().map(sanitize_value))
        .bind(decision.fact_key.as_deref().map(sanitize_value))
        .bind(decision.fact_value.as_deref().map(sanitize_value))
        .bind(&decision.tags)
        .execute(self.db.pool())
        .await
        .map_err(|e| LilyError::Store(format!("failed to insert decision: {}", e)))?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Decision>> {
        let row = sqlx::query_as::<_, Decision>(&format!(
            "SELECT {} FROM decisions WHERE id = ?",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row)
    }

    /// Live (non-expired) row matching an (entity, key) pair, most recent
    /// first when duplicates exist.
    pub async fn find_live_fact(&self, entity: &str, key: &str) -> Result<Option<Decision>> {
        let row = sqlx::query_as::<_, Decision>(&format!(
            "SELECT {} FROM decisions
             WHERE entity = ? AND fact_key = ?
               AND (expires_at IS NULL OR expires_at > ?)
             ORDER BY COALESCE(last_accessed, ts) DESC
             LIMIT 1",
            COLUMNS
        ))
        .bind(entity)
        .bind(key)
        .bind(now_ts())
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row)
    }

    /// Update a fact's value in place, refreshing timestamps.
    pub async fn update_fact_value(&self, id: &str, value: &str) -> Result<()> {
        let now = now_ts();
        sqlx::query(
            "UPDATE decisions
             SET fact_value = ?, description = entity || '.' || fact_key || ' = ' || ?,
                 ts = ?, last_accessed = ?
             WHERE id = ?",
        )
        .bind(sanitize_value(value))
        .bind(sanitize_value(value))
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    pub async fn update_importance(&self, id: &str, importance: f64) -> Result<()> {
        sqlx::query("UPDATE decisions SET importance = ? WHERE id = ?")
            .bind(importance)
            .bind(id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM decisions WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Count live rows in a TTL class.
    pub async fn count_live(&self, ttl: TtlClass) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM decisions
             WHERE ttl_class = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(ttl.as_str())
        .bind(now_ts())
        .fetch_one(self.db.pool())
        .await?;
        Ok(count)
    }

    /// The eviction candidate for a class: lowest importance, then lowest
    /// timestamp, among live rows.
    pub async fn eviction_candidate(&self, ttl: TtlClass) -> Result<Option<Decision>> {
        let row = sqlx::query_as::<_, Decision>(&format!(
            "SELECT {} FROM decisions
             WHERE ttl_class = ? AND (expires_at IS NULL OR expires_at > ?)
             ORDER BY importance ASC, ts ASC
             LIMIT 1",
            COLUMNS
        ))
        .bind(ttl.as_str())
        .bind(now_ts())
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row)
    }

    /// Oldest live permanent row, for demotion when the permanent quota is
    /// full.
    pub async fn oldest_permanent(&self) -> Result<Option<Decision>> {
        let row = sqlx::query_as::<_, Decision>(&format!(
            "SELECT {} FROM decisions
             WHERE ttl_class = 'permanent'
             ORDER BY ts ASC
             LIMIT 1",
            COLUMNS
        ))
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row)
    }

    /// Demote a row to `stable` with a fresh 90-day expiry.
    pub async fn demote_to_stable(&self, id: &str) -> Result<()> {
        let expires = TtlClass::Stable.expiry_from(now_ts());
        sqlx::query("UPDATE decisions SET ttl_class = 'stable', expires_at = ? WHERE id = ?")
            .bind(expires)
            .bind(id)
            .execute(self.db.pool())
            .await?;
        debug!(id = %id, "demoted permanent decision to stable");
        Ok(())
    }

    /// Permanent (entity, key) facts ordered by importance, capped.
    pub async fn permanent_facts(&self, limit: i64) -> Result<Vec<Decision>> {
        let rows = sqlx::query_as::<_, Decision>(&format!(
            "SELECT {} FROM decisions
             WHERE ttl_class = 'permanent' AND entity IS NOT NULL AND fact_key IS NOT NULL
             ORDER BY importance DESC
             LIMIT ?",
            COLUMNS
        ))
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    /// Recent high-importance stable/active rows.
    pub async fn recent_important(&self, limit: i64) -> Result<Vec<Decision>> {
        let rows = sqlx::query_as::<_, Decision>(&format!(
            "SELECT {} FROM decisions
             WHERE importance >= 0.7 AND ttl_class IN ('stable', 'active')
               AND (expires_at IS NULL OR expires_at > ?)
             ORDER BY ts DESC
             LIMIT ?",
            COLUMNS
        ))
        .bind(now_ts())
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    /// Full-text search over live rows. `match_expr` is an FTS5 MATCH
    /// expression built from sanitized keywords.
    pub async fn fts_search(&self, match_expr: &str, limit: i64) -> Result<Vec<Decision>> {
        let rows = sqlx::query_as::<_, Decision>(&format!(
            "SELECT {} FROM decisions d
             JOIN decisions_fts ON d.rowid = decisions_fts.rowid
             WHERE decisions_fts MATCH ?
               AND (d.expires_at IS NULL OR d.expires_at > ?)
             ORDER BY decisions_fts.rank
             LIMIT ?",
            columns_prefixed("d")
        ))
        .bind(match_expr)
        .bind(now_ts())
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    /// All live rows for one entity.
    pub async fn by_entity(&self, entity: &str, limit: i64) -> Result<Vec<Decision>> {
        let rows = sqlx::query_as::<_, Decision>(&format!(
            "SELECT {} FROM decisions
             WHERE entity = ? AND (expires_at IS NULL OR expires_at > ?)
             ORDER BY ts DESC
             LIMIT ?",
            COLUMNS
        ))
        .bind(entity)
        .bind(now_ts())
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    /// (entity, key) pairs with more than one live row.
    pub async fn duplicate_fact_groups(&self) -> Result<Vec<(String, String)>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT entity, fact_key FROM decisions
             WHERE entity IS NOT NULL AND fact_key IS NOT NULL
               AND (expires_at IS NULL OR expires_at > ?)
             GROUP BY entity, fact_key
             HAVING COUNT(*) > 1",
        )
        .bind(now_ts())
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    /// Every live row in one (entity, key) group, newest access first.
    pub async fn fact_group(&self, entity: &str, key: &str) -> Result<Vec<Decision>> {
        let rows = sqlx::query_as::<_, Decision>(&format!(
            "SELECT {} FROM decisions
             WHERE entity = ? AND fact_key = ?
               AND (expires_at IS NULL OR expires_at > ?)
             ORDER BY COALESCE(last_accessed, ts) DESC",
            COLUMNS
        ))
        .bind(entity)
        .bind(key)
        .bind(now_ts())
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    /// Touch last-accessed on all permanent rows (pre-compaction keep-alive).
    pub async fn touch_permanent(&self) -> Result<u64> {
        let result = sqlx::query("UPDATE decisions SET last_accessed = ? WHERE ttl_class = 'permanent'")
            .bind(now_ts())
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected())
    }

    /// Drop rows whose expiry has passed.
    pub async fn delete_expired(&self) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM decisions WHERE expires_at IS NOT NULL AND expires_at <= ?")
                .bind(now_ts())
                .execute(self.db.pool())
                .await?;
        Ok(result.rows_affected())
    }

    /// Decisions with no vector row yet, for backfill.
    pub async fn missing_vectors(&self, limit: i64) -> Result<Vec<Decision>> {
        let rows = sqlx::query_as::<_, Decision>(&format!(
            "SELECT {} FROM decisions d
             WHERE NOT EXISTS (SELECT 1 FROM vectors v WHERE v.decision_id = d.id)
               AND (d.expires_at IS NULL OR d.expires_at > ?)
             ORDER BY d.ts DESC
             LIMIT ?",
            columns_prefixed("d")
        ))
        .bind(now_ts())
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    /// Load a batch of decisions by id, preserving no particular order.
    pub async fn by_ids(&self, ids: &[String]) -> Result<Vec<Decision>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(d) = self.find_by_id(id).await? {
                out.push(d);
            }
        }
        Ok(out)
    }
}

fn columns_prefixed(alias: &str) -> String {
    COLUMNS
        .split(", ")
        .map(|c| format!("{}.{}", alias, c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}
