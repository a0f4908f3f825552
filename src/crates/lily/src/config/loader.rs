//! Configuration loading with environment overrides.

use super::schema::MemoryConfig;
use crate::db::memory_root;
use crate::error::{LilyError, Result};
use tracing::{debug, info};

/// Environment variable overriding the database path.
pub const ENV_DB_PATH: &str = "LILY_DB_PATH";

/// Environment variable overriding the local inference endpoint.
pub const ENV_OLLAMA_URL: &str = "OLLAMA_URL";

/// Load configuration from `<root>/config.toml`, then apply environment
/// overrides. A missing file yields the defaults.
pub fn load_config() -> Result<MemoryConfig> {
    let path = memory_root()?.join("config.toml");

    let mut config = if path.exists() {
        let raw = std::fs::read_to_string(&path)?;
        let parsed: MemoryConfig = toml::from_str(&raw)
            .map_err(|e| LilyError::Config(format!("{}: {}", path.display(), e)))?;
        info!(path = %path.display(), "configuration loaded");
        parsed
    } else {
        debug!(path = %path.display(), "no configuration file; using defaults");
        MemoryConfig::default()
    };

    if let Ok(db_path) = std::env::var(ENV_DB_PATH) {
        config.db_path = db_path;
    }
    if let Ok(url) = std::env::var(ENV_OLLAMA_URL) {
        config.ollama_url = url;
    }

    Ok(config)
}
