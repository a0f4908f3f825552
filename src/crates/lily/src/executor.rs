//! Step execution: routing and the inference-backed executor.
//!
//! Tier and executor are free-form routing labels on the step row. The
//! router maps them to a backend; the [`StepExecutor`] trait is the seam the
//! scheduler dispatches through, so tests can substitute a deterministic
//! executor for the HTTP clients.

use async_trait::async_trait;
use llm::{GeminiClient, LlmError, LocalLlmConfig, OllamaClient};
use tracing::warn;

/// Tier prefixes routed to the local endpoint.
const LOCAL_TIER_PREFIXES: &[&str] = &["deepseek", "qwen"];

/// Where a step's prompt goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorRoute {
    /// Local inference endpoint; `None` model means the configured default.
    Local { model: Option<String> },
    /// Remote API.
    Remote { model: String },
}

/// Route a step by its executor and tier labels.
///
/// Local executor or a `deepseek`/`qwen` tier goes to the local endpoint
/// with the tier as model; `gemini-flash` or any `gemini` tier goes to the
/// remote API; anything else falls back to the local default model.
pub fn route_step(executor: &str, tier: &str) -> ExecutorRoute {
    let tier_lower = tier.to_lowercase();

    if executor == "local" || LOCAL_TIER_PREFIXES.iter().any(|p| tier_lower.starts_with(p)) {
        let model = (!tier.is_empty()).then(|| tier.to_string());
        return ExecutorRoute::Local { model };
    }
    if tier_lower == "gemini-flash" || tier_lower.starts_with("gemini") {
        return ExecutorRoute::Remote {
            model: tier.to_string(),
        };
    }
    ExecutorRoute::Local { model: None }
}

/// Result of one dispatch.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl ExecutionOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }
}

/// Dispatch seam between the scheduler and the inference backends.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, route: &ExecutorRoute, prompt: &str) -> ExecutionOutcome;
}

/// Production executor backed by the inference clients.
pub struct LlmExecutor {
    ollama: OllamaClient,
    gemini: Option<GeminiClient>,
}

impl LlmExecutor {
    /// Build from the local endpoint URL and default model. The remote
    /// client is present only when its API key exists in the environment.
    pub fn new(ollama_url: &str, default_model: &str) -> Self {
        let gemini = match GeminiClient::from_env("gemini-flash") {
            Ok(client) => Some(client),
            Err(LlmError::ApiKeyNotFound(_)) => None,
            Err(e) => {
                warn!(error = %e, "remote inference client unavailable");
                None
            }
        };
        Self {
            ollama: OllamaClient::new(LocalLlmConfig::new(ollama_url, default_model)),
            gemini,
        }
    }
}

#[async_trait]
impl StepExecutor for LlmExecutor {
    async fn execute(&self, route: &ExecutorRoute, prompt: &str) -> ExecutionOutcome {
        match route {
            ExecutorRoute::Local { model } => {
                match self.ollama.generate(model.as_deref(), prompt).await {
                    Ok(output) => ExecutionOutcome::ok(output),
                    Err(e) => ExecutionOutcome::err(e.to_string()),
                }
            }
            ExecutorRoute::Remote { model } => {
                let Some(gemini) = &self.gemini else {
                    return ExecutionOutcome::err("remote API key not configured".to_string());
                };
                match gemini.generate(Some(model), prompt).await {
                    Ok(output) => ExecutionOutcome::ok(output),
                    Err(e) => ExecutionOutcome::err(e.to_string()),
                }
            }
        }
    }
}
