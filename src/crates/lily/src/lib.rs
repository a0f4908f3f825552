//! # Lily - Persistent Memory & Workflow Companion
//!
//! Lily pairs two engines over one SQLite store under
//! `~/.openclaw/memory/`:
//!
//! - a **budget-aware memory engine** that captures facts from conversation
//!   events, stores them under TTL classes with quota eviction, retrieves
//!   them via full-text and vector search, and injects a bounded,
//!   deduplicated context block into the next agent turn
//! - a **DAG pipeline engine** that validates, executes, advances, and
//!   schedules directed acyclic workflows of steps dispatched to local and
//!   remote inference executors
//!
//! The host adapter runs inside the agent host's event loop; the scheduler
//! runs as a separate process driven by cron (`lily tick`). The two share
//! nothing but the store.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use lily::config::load_config;
//! use lily::host::HostAdapter;
//! use lily::memory::ChatMessage;
//!
//! # async fn example() -> lily::Result<()> {
//! let adapter = HostAdapter::initialize(load_config()?).await?;
//!
//! // Before an agent turn: maybe inject remembered context.
//! let prepend = adapter.before_agent_start("what does Kevin prefer").await?;
//!
//! // After the turn: capture new facts.
//! let messages = vec![ChatMessage::user("Kevin prefers TypeScript for new services")];
//! adapter.agent_end("session-1", &messages, None).await?;
//! # Ok(())
//! # }
//! ```

// Core modules
pub mod config;
pub mod cron;
pub mod db;
pub mod embeddings;
pub mod entities;
pub mod executor;
pub mod extraction;
pub mod host;
pub mod memory;
pub mod models;
pub mod pipeline;
pub mod repositories;
pub mod scheduler;
pub mod security;

// Error types and utilities
mod error;

// Re-export key types for convenience
pub use config::{CapturePolicy, MemoryConfig};
pub use db::Database;
pub use error::{LilyError, Result};
pub use host::{HostAdapter, TurnSummary};
pub use memory::{CaptureOutcome, ChatMessage, ContentBlock, MemoryEngine};
pub use models::{Decision, Pipeline, PipelineStatus, StepRow, StepStatus, StepType, TtlClass};
pub use pipeline::{AdvanceInput, AdvanceResult, PipelineEngine, PipelineInput, StepInput};
pub use scheduler::{Scheduler, TickReport};

// Re-export repositories
pub use repositories::{
    DecisionRepository, EntityRepository, PipelineRepository, SecurityRepository,
    TriggerRepository, VectorRepository,
};
