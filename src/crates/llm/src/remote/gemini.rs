//! Google Gemini client implementation.
//!
//! Prompt-in/text-out integration with the Gemini generateContent API. The
//! API key comes from the `GEMINI_API_KEY` environment variable and is passed
//! as a query parameter, never logged.

use crate::config::RemoteLlmConfig;
use crate::error::{truncate_for_error, LlmError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Environment variable holding the Gemini API key.
pub const GEMINI_API_KEY_VAR: &str = "GEMINI_API_KEY";

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Google Gemini API client.
#[derive(Clone)]
pub struct GeminiClient {
    config: RemoteLlmConfig,
    client: Client,
}

impl GeminiClient {
    /// Create a new Gemini client with the given configuration.
    pub fn new(config: RemoteLlmConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    /// Create a client for `model` with the key from `GEMINI_API_KEY`.
    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let config = RemoteLlmConfig::from_env(GEMINI_API_KEY_VAR, DEFAULT_BASE_URL, model)?;
        Ok(Self::new(config))
    }

    /// Generate a completion for `prompt`, optionally overriding the model.
    pub async fn generate(&self, model: Option<&str>, prompt: &str) -> Result<String> {
        let model = model.unwrap_or(&self.config.model);
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.config.base_url, model, self.config.api_key
        );
        debug!(model = %model, "dispatching remote generate request");

        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
        };

        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::InvalidResponse(format!(
                "generateContent returned {}: {}",
                status,
                truncate_for_error(&text)
            )));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(truncate_for_error(&e.to_string())))?;

        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| LlmError::InvalidResponse("response carried no candidates".to_string()))
    }
}

// Gemini API types

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}
