//! Error types for inference and embedding clients.

use thiserror::Error;

/// Result type for LLM operations.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors that can occur when talking to an inference or embedding endpoint.
#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status or an unexpected body.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The service did not answer the health probe.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// API key not present in the environment.
    #[error("API key not found: {0}")]
    ApiKeyNotFound(String),

    /// Request exceeded its deadline.
    #[error("Request timeout: {0}")]
    Timeout(String),
}

impl LlmError {
    /// Check if this error is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Http(_) | LlmError::ServiceUnavailable(_) | LlmError::Timeout(_)
        )
    }
}

/// Cap text quoted inside error messages so upstream failures cannot flood
/// logs or step error columns.
pub(crate) fn truncate_for_error(text: &str) -> String {
    const MAX: usize = 200;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        text.chars().take(MAX).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(LlmError::ServiceUnavailable("down".to_string()).is_retryable());
        assert!(LlmError::Timeout("10s".to_string()).is_retryable());
        assert!(!LlmError::ApiKeyNotFound("GEMINI_API_KEY".to_string()).is_retryable());
        assert!(!LlmError::InvalidResponse("bad json".to_string()).is_retryable());
    }

    #[test]
    fn test_error_text_is_capped() {
        let long = "x".repeat(500);
        assert_eq!(truncate_for_error(&long).len(), 200);
        assert_eq!(truncate_for_error("short"), "short");
    }
}
