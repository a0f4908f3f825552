//! Common configuration structures for inference clients.

use crate::error::{LlmError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Deadline for embedding requests.
pub const EMBED_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for the availability probe.
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(3);

/// Configuration for the local inference server (Ollama wire protocol).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalLlmConfig {
    /// Base URL for the local server, e.g. "http://localhost:11434".
    pub base_url: String,

    /// Default model used when the caller does not route to a specific one.
    pub model: String,
}

impl LocalLlmConfig {
    /// Create a new local inference configuration.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
        }
    }
}

/// Configuration for a remote inference API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteLlmConfig {
    /// API key for authentication.
    pub api_key: String,

    /// Base URL for the API, e.g. "https://generativelanguage.googleapis.com".
    pub base_url: String,

    /// Model name/identifier.
    pub model: String,
}

impl RemoteLlmConfig {
    /// Create a new remote inference configuration.
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    /// Create configuration with the key read from an environment variable.
    pub fn from_env(
        env_var: &str,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let api_key = std::env::var(env_var)
            .map_err(|_| LlmError::ApiKeyNotFound(format!("environment variable {}", env_var)))?;
        Ok(Self::new(api_key, base_url, model))
    }
}
