//! Error types for graph construction and analysis.

use thiserror::Error;

/// Result type for graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors that can occur while building or analyzing a step graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The graph structure violates a validation rule.
    #[error("Graph validation failed: {0}")]
    Validation(String),

    /// A cycle was found; the path lists step names along the cycle.
    #[error("Graph contains a cycle: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    /// A step id or name was referenced but does not exist in the graph.
    #[error("Unknown step: {0}")]
    UnknownStep(String),
}
