//! Error types for Lily
//!
//! Provides a unified error type for all Lily operations.

use std::fmt;

/// Result type alias for Lily operations
pub type Result<T> = std::result::Result<T, LilyError>;

/// Main error type for Lily operations
#[derive(Debug)]
pub enum LilyError {
    /// Configuration error
    Config(String),

    /// Store/database error
    Store(String),

    /// A store path resolved outside the memory root
    PathTraversal(String),

    /// Contract failure on a synchronous API (bad input, no writes done)
    Contract(String),

    /// Pipeline lifecycle error
    Pipeline(String),

    /// Malformed cron expression or timezone
    Cron(String),

    /// Not found error
    NotFound(String),

    /// IO error
    Io(std::io::Error),

    /// Serialization/deserialization error
    Serde(serde_json::Error),

    /// SQL error
    Sqlx(sqlx::Error),

    /// Graph engine error
    Graph(flowgraph::GraphError),

    /// Inference/embedding client error
    Llm(llm::LlmError),

    /// Generic error with message
    Other(String),
}

impl fmt::Display for LilyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "Configuration error: {}", msg),
            Self::Store(msg) => write!(f, "Store error: {}", msg),
            Self::PathTraversal(msg) => write!(f, "Path traversal: {}", msg),
            Self::Contract(msg) => write!(f, "Invalid input: {}", msg),
            Self::Pipeline(msg) => write!(f, "Pipeline error: {}", msg),
            Self::Cron(msg) => write!(f, "Cron error: {}", msg),
            Self::NotFound(msg) => write!(f, "Not found: {}", msg),
            Self::Io(err) => write!(f, "IO error: {}", err),
            Self::Serde(err) => write!(f, "Serialization error: {}", err),
            Self::Sqlx(err) => write!(f, "SQL error: {}", err),
            Self::Graph(err) => write!(f, "Graph error: {}", err),
            Self::Llm(err) => write!(f, "LLM error: {}", err),
            Self::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for LilyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Serde(err) => Some(err),
            Self::Sqlx(err) => Some(err),
            Self::Graph(err) => Some(err),
            Self::Llm(err) => Some(err),
            _ => None,
        }
    }
}

// Conversions from common error types
impl From<std::io::Error> for LilyError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for LilyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serde(err)
    }
}

impl From<sqlx::Error> for LilyError {
    fn from(err: sqlx::Error) -> Self {
        Self::Sqlx(err)
    }
}

impl From<flowgraph::GraphError> for LilyError {
    fn from(err: flowgraph::GraphError) -> Self {
        Self::Graph(err)
    }
}

impl From<llm::LlmError> for LilyError {
    fn from(err: llm::LlmError) -> Self {
        Self::Llm(err)
    }
}

impl From<String> for LilyError {
    fn from(msg: String) -> Self {
        Self::Other(msg)
    }
}

impl From<&str> for LilyError {
    fn from(msg: &str) -> Self {
        Self::Other(msg.to_string())
    }
}
