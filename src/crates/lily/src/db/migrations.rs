//! Embedded schema migrations.
//!
//! Each migration is a `(version, description, sql)` triple applied inside a
//! transaction in version order; every application inserts a row into
//! `schema_version`. Running against an up-to-date database is a no-op.

use super::Database;
use crate::error::{LilyError, Result};
use crate::models::now_ts;
use tracing::info;

struct Migration {
    version: i64,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "memory tables: decisions, fts index, vectors, entities, security events",
        sql: r#"
CREATE TABLE IF NOT EXISTS decisions (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL DEFAULT '',
    ts INTEGER NOT NULL,
    category TEXT NOT NULL DEFAULT 'fact',
    description TEXT NOT NULL DEFAULT '',
    rationale TEXT NOT NULL DEFAULT '',
    classification TEXT NOT NULL DEFAULT '',
    importance REAL NOT NULL DEFAULT 0.5,
    ttl_class TEXT NOT NULL DEFAULT 'active',
    expires_at INTEGER,
    last_accessed INTEGER,
    entity TEXT,
    fact_key TEXT,
    fact_value TEXT,
    tags TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS idx_decisions_ttl ON decisions(ttl_class);
CREATE INDEX IF NOT EXISTS idx_decisions_expiry ON decisions(expires_at);
CREATE INDEX IF NOT EXISTS idx_decisions_entity ON decisions(entity);
CREATE INDEX IF NOT EXISTS idx_decisions_entity_key ON decisions(entity, fact_key);
CREATE INDEX IF NOT EXISTS idx_decisions_importance ON decisions(importance DESC);
CREATE INDEX IF NOT EXISTS idx_decisions_ts ON decisions(ts);

CREATE VIRTUAL TABLE IF NOT EXISTS decisions_fts USING fts5(
    description, rationale, entity, fact_key, fact_value, tags,
    content='decisions', content_rowid='rowid'
);

CREATE TRIGGER IF NOT EXISTS decisions_fts_insert AFTER INSERT ON decisions BEGIN
    INSERT INTO decisions_fts(rowid, description, rationale, entity, fact_key, fact_value, tags)
    VALUES (new.rowid, new.description, new.rationale, new.entity, new.fact_key, new.fact_value, new.tags);
END;
CREATE TRIGGER IF NOT EXISTS decisions_fts_delete AFTER DELETE ON decisions BEGIN
    INSERT INTO decisions_fts(decisions_fts, rowid, description, rationale, entity, fact_key, fact_value, tags)
    VALUES ('delete', old.rowid, old.description, old.rationale, old.entity, old.fact_key, old.fact_value, old.tags);
END;
CREATE TRIGGER IF NOT EXISTS decisions_fts_update AFTER UPDATE ON decisions BEGIN
    INSERT INTO decisions_fts(decisions_fts, rowid, description, rationale, entity, fact_key, fact_value, tags)
    VALUES ('delete', old.rowid, old.description, old.rationale, old.entity, old.fact_key, old.fact_value, old.tags);
    INSERT INTO decisions_fts(rowid, description, rationale, entity, fact_key, fact_value, tags)
    VALUES (new.rowid, new.description, new.rationale, new.entity, new.fact_key, new.fact_value, new.tags);
END;

CREATE TABLE IF NOT EXISTS vectors (
    decision_id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    embedding BLOB NOT NULL,
    model TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    FOREIGN KEY (decision_id) REFERENCES decisions(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS entities (
    name TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    source TEXT NOT NULL DEFAULT 'manual',
    added_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS security_events (
    id TEXT PRIMARY KEY,
    ts INTEGER NOT NULL,
    event_type TEXT NOT NULL,
    source_role TEXT NOT NULL DEFAULT '',
    entity TEXT,
    fact_key TEXT,
    fact_value TEXT,
    pattern TEXT,
    snippet TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS idx_security_ts ON security_events(ts);
"#,
    },
    Migration {
        version: 2,
        description: "pipeline tables: pipelines, steps, edges, triggers",
        sql: r#"
CREATE TABLE IF NOT EXISTS pipelines (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    started_at INTEGER,
    completed_at INTEGER,
    created_by TEXT NOT NULL DEFAULT 'user',
    trigger_message TEXT NOT NULL DEFAULT '',
    config TEXT,
    summary TEXT,
    error TEXT
);
CREATE INDEX IF NOT EXISTS idx_pipelines_status ON pipelines(status);

CREATE TABLE IF NOT EXISTS pipeline_steps (
    id TEXT PRIMARY KEY,
    pipeline_id TEXT NOT NULL,
    name TEXT NOT NULL,
    step_type TEXT NOT NULL DEFAULT 'task',
    status TEXT NOT NULL DEFAULT 'pending',
    tier TEXT NOT NULL DEFAULT '',
    executor TEXT NOT NULL DEFAULT '',
    prompt TEXT NOT NULL DEFAULT '',
    depends_on_all INTEGER NOT NULL DEFAULT 1,
    retry_count INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    started_at INTEGER,
    completed_at INTEGER,
    input TEXT,
    output TEXT,
    result_summary TEXT,
    error TEXT,
    UNIQUE (pipeline_id, name),
    FOREIGN KEY (pipeline_id) REFERENCES pipelines(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_steps_pipeline ON pipeline_steps(pipeline_id);
CREATE INDEX IF NOT EXISTS idx_steps_pipeline_status ON pipeline_steps(pipeline_id, status);

CREATE TABLE IF NOT EXISTS pipeline_edges (
    id TEXT PRIMARY KEY,
    pipeline_id TEXT NOT NULL,
    parent_step_id TEXT NOT NULL,
    child_step_id TEXT NOT NULL,
    condition TEXT,
    UNIQUE (pipeline_id, parent_step_id, child_step_id),
    FOREIGN KEY (pipeline_id) REFERENCES pipelines(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_edges_pipeline ON pipeline_edges(pipeline_id);

CREATE TABLE IF NOT EXISTS pipeline_triggers (
    id TEXT PRIMARY KEY,
    pipeline_id TEXT NOT NULL,
    schedule TEXT NOT NULL,
    timezone TEXT NOT NULL DEFAULT 'UTC',
    enabled INTEGER NOT NULL DEFAULT 1,
    last_fired INTEGER,
    next_fire INTEGER,
    FOREIGN KEY (pipeline_id) REFERENCES pipelines(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_triggers_enabled ON pipeline_triggers(enabled);
"#,
    },
];

/// Apply all pending migrations.
pub async fn run(db: &Database) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        )",
    )
    .execute(db.pool())
    .await?;

    let current: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(db.pool())
        .await?;
    let current = current.unwrap_or(0);

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let mut tx = db.pool().begin().await?;

        // SQLite executes one statement per call; split on the blank-free
        // separator semicolons. Trigger bodies keep their internal semicolons
        // because they are split on "END;" boundaries first.
        for statement in split_statements(migration.sql) {
            sqlx::query(&statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    LilyError::Store(format!(
                        "migration {} failed: {}: {}",
                        migration.version, e, statement
                    ))
                })?;
        }

        sqlx::query("INSERT INTO schema_version (version, description, applied_at) VALUES (?, ?, ?)")
            .bind(migration.version)
            .bind(migration.description)
            .bind(now_ts())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(version = migration.version, description = migration.description, "applied migration");
    }

    Ok(())
}

/// Split a migration script into individual statements, keeping
/// `BEGIN..END` trigger bodies intact.
fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_trigger = false;

    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        current.push_str(line);
        current.push('\n');

        let upper = trimmed.to_uppercase();
        if upper.starts_with("CREATE TRIGGER") {
            in_trigger = true;
        }
        if in_trigger {
            if upper == "END;" {
                statements.push(current.trim().to_string());
                current.clear();
                in_trigger = false;
            }
        } else if trimmed.ends_with(';') {
            statements.push(current.trim().to_string());
            current.clear();
        }
    }
    if !current.trim().is_empty() {
        statements.push(current.trim().to_string());
    }
    statements
}
