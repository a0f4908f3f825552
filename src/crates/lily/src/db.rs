//! Database management and path policy
//!
//! Provides the SQLite connection wrapper, the memory-root path policy, and
//! value sanitization. State lives under `<home>/.openclaw/memory/`; any
//! store path resolving outside that root is rejected before a single table
//! is touched. Connections are pooled per absolute path so repeated opens of
//! the same file share one pool.

pub mod migrations;

use crate::error::{LilyError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Busy timeout applied to every connection.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum stored length for a sanitized value.
const MAX_VALUE_LEN: usize = 10_000;

/// Type alias for the database connection pool
pub type DatabasePool = SqlitePool;

/// The root directory all persistent state must live under.
pub fn memory_root() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| LilyError::Config("home directory could not be determined".to_string()))?;
    Ok(home.join(".openclaw").join("memory"))
}

/// Resolve a raw database path against the memory root.
///
/// `~` expands to the home directory and relative paths resolve under the
/// root. The result must stay inside the root after lexical normalization;
/// anything else is a [`LilyError::PathTraversal`].
pub fn resolve_store_path(raw: &str) -> Result<PathBuf> {
    let root = memory_root()?;

    let expanded: PathBuf = if let Some(rest) = raw.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| LilyError::Config("home directory could not be determined".to_string()))?;
        home.join(rest)
    } else if raw == "~" {
        dirs::home_dir()
            .ok_or_else(|| LilyError::Config("home directory could not be determined".to_string()))?
    } else {
        PathBuf::from(raw)
    };

    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        root.join(expanded)
    };

    let normalized = normalize(&absolute);
    if !normalized.starts_with(&root) {
        return Err(LilyError::PathTraversal(format!(
            "{} resolves outside {}",
            raw,
            root.display()
        )));
    }
    Ok(normalized)
}

/// Lexical normalization: resolve `.` and `..` without touching the
/// filesystem, so validation works for paths that do not exist yet.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Strip NUL bytes and cap length before a value reaches the store.
///
/// Parameter binding is the SQL-injection defense; this only removes bytes
/// SQLite text columns cannot hold and bounds pathological inputs.
pub fn sanitize_value(value: &str) -> String {
    let cleaned: String = value.chars().filter(|&c| c != '\0').collect();
    if cleaned.chars().count() <= MAX_VALUE_LEN {
        cleaned
    } else {
        cleaned.chars().take(MAX_VALUE_LEN).collect()
    }
}

fn registry() -> &'static Mutex<HashMap<PathBuf, Database>> {
    static REGISTRY: OnceLock<Mutex<HashMap<PathBuf, Database>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Database connection wrapper
#[derive(Clone, Debug)]
pub struct Database {
    pool: Arc<DatabasePool>,
}

impl Database {
    /// Open (or re-use) the database at a path under the memory root.
    ///
    /// The path is validated first; the connection enables WAL journaling,
    /// foreign keys, and a 5 s busy timeout. One pool exists per absolute
    /// path for the lifetime of the process.
    pub async fn open(raw_path: &str) -> Result<Self> {
        let path = resolve_store_path(raw_path)?;

        let mut reg = registry().lock().await;
        if let Some(existing) = reg.get(&path) {
            debug!(path = %path.display(), "re-using pooled database connection");
            return Ok(existing.clone());
        }

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    LilyError::Store(format!("failed to create database directory: {}", e))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| LilyError::Store(format!("failed to connect to database: {}", e)))?;

        info!(path = %path.display(), "database connection established");

        let db = Self {
            pool: Arc::new(pool),
        };
        reg.insert(path, db.clone());
        Ok(db)
    }

    /// Create an in-memory database with migrations applied. Bypasses the
    /// path policy; intended for tests and ephemeral runs.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| LilyError::Store(format!("failed to open in-memory database: {}", e)))?;

        let db = Self {
            pool: Arc::new(pool),
        };
        db.migrate().await?;
        Ok(db)
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    /// Apply pending migrations in version order, recording each in
    /// `schema_version`.
    pub async fn migrate(&self) -> Result<()> {
        migrations::run(self).await
    }

    /// Execute a statement, logging failure and reporting it as `false`.
    ///
    /// Callers that need the error use the repositories; this is the
    /// fire-and-forget surface where emptiness means "no result".
    pub async fn exec(&self, sql: &str) -> bool {
        match sqlx::query(sql).execute(self.pool.as_ref()).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "store exec failed");
                false
            }
        }
    }

    /// Perform a health check by running a simple query
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(self.pool.as_ref())
            .await
            .map_err(|e| LilyError::Store(format!("health check failed: {}", e)))?;
        Ok(())
    }

    /// Close every pooled connection and clear the registry.
    pub async fn close_all() {
        let mut reg = registry().lock().await;
        for (path, db) in reg.drain() {
            db.pool.close().await;
            info!(path = %path.display(), "database connection closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_outside_root_are_rejected() {
        for bad in ["/etc/passwd", "/tmp/lily.db", "~/elsewhere/lily.db"] {
            let err = resolve_store_path(bad).unwrap_err();
            assert!(matches!(err, LilyError::PathTraversal(_)), "{}", bad);
        }
    }

    #[test]
    fn test_parent_escape_is_rejected() {
        let err = resolve_store_path("subdir/../../outside.db").unwrap_err();
        assert!(matches!(err, LilyError::PathTraversal(_)));
    }

    #[test]
    fn test_paths_under_root_resolve() {
        let root = memory_root().unwrap();
        assert_eq!(resolve_store_path("lily.db").unwrap(), root.join("lily.db"));
        assert_eq!(
            resolve_store_path("~/.openclaw/memory/lily.db").unwrap(),
            root.join("lily.db")
        );
        let abs = root.join("nested/lily.db");
        assert_eq!(
            resolve_store_path(abs.to_str().unwrap()).unwrap(),
            abs
        );
    }

    #[test]
    fn test_sanitize_strips_nul_and_caps() {
        assert_eq!(sanitize_value("a\0b"), "ab");
        let long = "x".repeat(20_000);
        assert_eq!(sanitize_value(&long).chars().count(), 10_000);
        assert_eq!(sanitize_value("plain"), "plain");
    }

    #[tokio::test]
    async fn test_in_memory_database_migrates() {
        let db = Database::in_memory().await.unwrap();
        db.health_check().await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_version")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert!(count >= 2);
    }

    #[tokio::test]
    async fn test_parameter_binding_defeats_injection() {
        let db = Database::in_memory().await.unwrap();
        let hostile = "x' OR '1'='1";

        sqlx::query(
            "INSERT INTO decisions (id, session_id, ts, importance, ttl_class, entity, fact_key, fact_value)
             VALUES ('d1', 's', 0, 0.5, 'active', 'Kevin', 'note', ?)",
        )
        .bind(hostile)
        .execute(db.pool())
        .await
        .unwrap();

        // The hostile string round-trips verbatim.
        let value: String =
            sqlx::query_scalar("SELECT fact_value FROM decisions WHERE id = 'd1'")
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(value, hostile);

        // Querying for an unrelated value finds nothing: the quote did not
        // widen the predicate.
        let rows: Vec<String> =
            sqlx::query_scalar("SELECT id FROM decisions WHERE fact_value = ?")
                .bind("unrelated")
                .fetch_all(db.pool())
                .await
                .unwrap();
        assert!(rows.is_empty());
    }
}
