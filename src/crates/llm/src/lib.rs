//! # LLM - Inference and Embedding Clients
//!
//! HTTP clients for the external model services lily depends on:
//!
//! - **Local** - an Ollama-style server providing prompt-in/text-out
//!   generation (`/api/generate`) and embedding vectors (`/api/embeddings`)
//! - **Remote** - the Gemini generateContent API
//!
//! All clients are thin: request/response structs mirror the wire format,
//! failures map to [`LlmError`], and any upstream text quoted in an error is
//! truncated to 200 characters. Generation requests carry no client-side
//! deadline (the caller's stuck detection bounds them); embedding requests
//! time out after 10 seconds and health probes after 3.

pub mod config;
pub mod error;

#[cfg(feature = "local")]
pub mod local;

#[cfg(feature = "remote")]
pub mod remote;

pub use config::{LocalLlmConfig, RemoteLlmConfig};
pub use error::{LlmError, Result};

#[cfg(feature = "local")]
pub use local::{HealthStatus, OllamaClient};

#[cfg(feature = "remote")]
pub use remote::GeminiClient;
