//! Configuration management for Lily
//!
//! Configuration lives at `<root>/config.toml` under the memory root; a
//! missing file yields the defaults. Environment variables override a small
//! set of keys: `LILY_DB_PATH`, `OLLAMA_URL`, and the remote API key is read
//! by the inference client itself.

mod loader;
mod schema;

pub use loader::load_config;
pub use schema::{CapturePolicy, MemoryConfig};
