//! Vector repository for the embedding sidecar table

use crate::db::Database;
use crate::error::Result;
use crate::models::{now_ts, VectorRow};
use std::sync::Arc;

/// Repository for vector rows keyed by decision id.
#[derive(Clone, Debug)]
pub struct VectorRepository {
    db: Arc<Database>,
}

impl VectorRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or replace the vector for a decision.
    pub async fn upsert(
        &self,
        decision_id: &str,
        content: &str,
        embedding: &[u8],
        model: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO vectors (decision_id, content, embedding, model, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(decision_id) DO UPDATE SET
                 content = excluded.content,
                 embedding = excluded.embedding,
                 model = excluded.model,
                 created_at = excluded.created_at",
        )
        .bind(decision_id)
        .bind(content)
        .bind(embedding)
        .bind(model)
        .bind(now_ts())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    pub async fn delete_for_decision(&self, decision_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM vectors WHERE decision_id = ?")
            .bind(decision_id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Every vector stored under a model, for the cosine scan.
    pub async fn all_for_model(&self, model: &str) -> Result<Vec<VectorRow>> {
        let rows = sqlx::query_as::<_, VectorRow>(
            "SELECT decision_id, content, embedding, model, created_at
             FROM vectors WHERE model = ?",
        )
        .bind(model)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    pub async fn exists(&self, decision_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vectors WHERE decision_id = ?")
            .bind(decision_id)
            .fetch_one(self.db.pool())
            .await?;
        Ok(count > 0)
    }

    /// Remove vectors whose decision no longer exists.
    pub async fn sweep_orphans(&self) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM vectors
             WHERE NOT EXISTS (SELECT 1 FROM decisions d WHERE d.id = vectors.decision_id)",
        )
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected())
    }
}
