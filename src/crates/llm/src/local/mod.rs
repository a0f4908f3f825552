//! Local inference providers.

mod ollama;

pub use ollama::{HealthStatus, OllamaClient};
