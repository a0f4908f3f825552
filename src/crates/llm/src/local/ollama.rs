//! Ollama client implementation.
//!
//! Talks to a local Ollama server over its native HTTP API: `/api/generate`
//! for prompt-in/text-out inference, `/api/embeddings` for embedding vectors,
//! and `/api/tags` as the availability probe.
//!
//! # Example
//!
//! ```rust,ignore
//! use llm::config::LocalLlmConfig;
//! use llm::local::OllamaClient;
//!
//! let client = OllamaClient::new(LocalLlmConfig::new("http://localhost:11434", "qwen2.5"));
//! let text = client.generate(None, "Summarize the build log").await?;
//! let vector = client.embed("Kevin prefers TypeScript").await?;
//! ```

use crate::config::{LocalLlmConfig, EMBED_TIMEOUT, HEALTH_TIMEOUT};
use crate::error::{truncate_for_error, LlmError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Tokens requested per generation call.
const NUM_PREDICT: u32 = 4096;

/// Health probe outcome.
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub available: bool,
    pub reason: Option<String>,
}

/// Ollama client for local inference and embeddings.
#[derive(Clone)]
pub struct OllamaClient {
    config: LocalLlmConfig,
    client: Client,
}

impl OllamaClient {
    /// Create a new Ollama client with the given configuration.
    ///
    /// Generation carries no client-side deadline; embedding and health
    /// requests set per-request timeouts.
    pub fn new(config: LocalLlmConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    /// The configured default model.
    pub fn default_model(&self) -> &str {
        &self.config.model
    }

    /// Probe the server with a short timeout.
    pub async fn health(&self) -> HealthStatus {
        let url = format!("{}/api/tags", self.config.base_url);
        match self.client.get(&url).timeout(HEALTH_TIMEOUT).send().await {
            Ok(response) if response.status().is_success() => HealthStatus {
                available: true,
                reason: None,
            },
            Ok(response) => HealthStatus {
                available: false,
                reason: Some(format!("status {}", response.status())),
            },
            Err(e) => HealthStatus {
                available: false,
                reason: Some(truncate_for_error(&e.to_string())),
            },
        }
    }

    /// Generate a completion for `prompt`, optionally overriding the model.
    pub async fn generate(&self, model: Option<&str>, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.config.base_url);
        let model = model.unwrap_or(&self.config.model);
        debug!(model = %model, "dispatching local generate request");

        let body = GenerateRequest {
            model,
            prompt,
            stream: false,
            options: GenerateOptions {
                num_predict: NUM_PREDICT,
            },
        };

        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::InvalidResponse(format!(
                "generate returned {}: {}",
                status,
                truncate_for_error(&text)
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(truncate_for_error(&e.to_string())))?;
        Ok(parsed.response)
    }

    /// Compute an embedding vector for `text` using the configured model.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.config.base_url);

        let body = EmbeddingRequest {
            model: &self.config.model,
            prompt: text,
        };

        let response = self
            .client
            .post(&url)
            .timeout(EMBED_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout("embedding request exceeded 10s".to_string())
                } else {
                    LlmError::Http(e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::InvalidResponse(format!(
                "embeddings returned {}: {}",
                status,
                truncate_for_error(&text)
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(truncate_for_error(&e.to_string())))?;
        Ok(parsed.embedding)
    }
}

// Ollama API types

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}
