//! Entity repository for the registered-entity table

use crate::db::Database;
use crate::error::Result;
use crate::models::{now_ts, EntityRow};
use std::sync::Arc;

/// Repository for registered entity names.
#[derive(Clone, Debug)]
pub struct EntityRepository {
    db: Arc<Database>,
}

impl EntityRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Register an entity. The name is case-folded; the display name keeps
    /// the original casing. Existing rows are left untouched.
    pub async fn insert(&self, display_name: &str, source: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO entities (name, display_name, source, added_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(display_name.to_lowercase())
        .bind(display_name)
        .bind(source)
        .bind(now_ts())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<EntityRow>> {
        let rows = sqlx::query_as::<_, EntityRow>(
            "SELECT name, display_name, source, added_at FROM entities ORDER BY name",
        )
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    pub async fn names(&self) -> Result<Vec<String>> {
        let rows: Vec<String> = sqlx::query_scalar("SELECT name FROM entities")
            .fetch_all(self.db.pool())
            .await?;
        Ok(rows)
    }
}
