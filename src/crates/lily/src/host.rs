//! Host adapter: event hooks around agent turns.
//!
//! The adapter owns the engines and is the only component the agent host
//! talks to. It injects recalled context before a turn, captures facts after
//! a turn, samples context pressure every tenth turn, nudges when the
//! conversation topic stops moving, and reacts to compaction signals.

pub mod tools;

use crate::config::MemoryConfig;
use crate::db::{memory_root, Database};
use crate::error::Result;
use crate::extraction::topic_signature;
use crate::memory::{
    session_guard, CaptureOutcome, ChatMessage, MemoryEngine, PressureLevel, SAMPLE_INTERVAL,
};
use crate::pipeline::PipelineEngine;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Consecutive identical topic signatures before a nudge fires.
const STUCK_THRESHOLD: u32 = 3;

/// Rough bytes-per-token estimate for pressure sampling.
const BYTES_PER_TOKEN: u64 = 4;

/// Fallback token estimate per message when no byte count is available.
const TOKENS_PER_MESSAGE: u64 = 256;

/// Persisted stuck-detector state.
#[derive(Debug, Default, Serialize, Deserialize)]
struct TopicState {
    signature: Option<String>,
    count: u32,
}

/// File-backed history of recent topic signatures.
pub struct TopicHistory {
    path: PathBuf,
    state: TopicState,
}

impl TopicHistory {
    pub fn load(path: PathBuf) -> Self {
        let state = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        Self { path, state }
    }

    /// Record a signature; returns the consecutive-identical count.
    pub fn observe(&mut self, signature: &str) -> u32 {
        if self.state.signature.as_deref() == Some(signature) {
            self.state.count += 1;
        } else {
            self.state.signature = Some(signature.to_string());
            self.state.count = 1;
        }
        self.persist();
        self.state.count
    }

    pub fn clear(&mut self) {
        self.state = TopicState::default();
        self.persist();
    }

    fn persist(&self) {
        if let Ok(raw) = serde_json::to_string(&self.state) {
            if let Err(e) = std::fs::write(&self.path, raw) {
                warn!(path = %self.path.display(), error = %e, "failed to persist topic history");
            }
        }
    }
}

/// Summary of one agent-end hook.
#[derive(Debug, Clone, Default)]
pub struct TurnSummary {
    pub capture: CaptureOutcome,
    pub pressure: Option<PressureLevel>,
    pub stuck_nudge: Option<String>,
}

/// The adapter registered with the agent host.
pub struct HostAdapter {
    memory: Arc<MemoryEngine>,
    engine: PipelineEngine,
    topic: Mutex<TopicHistory>,
    turns: AtomicU64,
}

impl HostAdapter {
    /// Full service start: open and migrate the store, seed the entity
    /// registry, run the session overflow guard, and optionally consolidate.
    pub async fn initialize(config: MemoryConfig) -> Result<Self> {
        let db = Arc::new(Database::open(&config.db_path).await?);
        db.migrate().await?;

        let root = memory_root()?;
        let manifest = root.join("sessions.json");
        if let Err(e) = session_guard::run(
            &manifest,
            config.session_overflow_threshold,
            config.context_token_cap,
        ) {
            warn!(error = %e, "session overflow guard failed");
        }

        let adapter = Self::with_database(db, config).await?;
        if adapter.memory.config().consolidation {
            adapter.memory.consolidate().await?;
        }
        Ok(adapter)
    }

    /// Build an adapter over an existing database handle. Used by tests and
    /// by `initialize`.
    pub async fn with_database(db: Arc<Database>, config: MemoryConfig) -> Result<Self> {
        let topic_path = if PathBuf::from(&config.topic_history_path).is_absolute() {
            PathBuf::from(&config.topic_history_path)
        } else {
            memory_root()?.join(&config.topic_history_path)
        };

        let memory = Arc::new(MemoryEngine::new(db.clone(), config));
        memory.init().await?;

        Ok(Self {
            memory,
            engine: PipelineEngine::new(db),
            topic: Mutex::new(TopicHistory::load(topic_path)),
            turns: AtomicU64::new(0),
        })
    }

    pub fn memory(&self) -> &MemoryEngine {
        &self.memory
    }

    pub fn pipeline_engine(&self) -> &PipelineEngine {
        &self.engine
    }

    /// Before-agent-start hook: the string to prepend to the turn's context,
    /// if recall produced one that passed the cooldown and pressure gates.
    pub async fn before_agent_start(&self, prompt: &str) -> Result<Option<String>> {
        if !self.memory.config().auto_recall {
            return Ok(None);
        }
        self.memory.build_recall_payload(prompt).await
    }

    /// Agent-end hook: capture, periodic pressure sampling, stuck nudge.
    pub async fn agent_end(
        &self,
        session_id: &str,
        messages: &[ChatMessage],
        approx_bytes: Option<u64>,
    ) -> Result<TurnSummary> {
        let mut summary = TurnSummary::default();
        self.memory.security().reset_blocked_count();

        if self.memory.config().auto_capture {
            summary.capture = self.memory.capture(session_id, messages).await?;
        }
        if summary.capture.blocked > 0 {
            info!(blocked = summary.capture.blocked, "capture blocked candidates this turn");
        }

        let turn = self.turns.fetch_add(1, Ordering::Relaxed) + 1;
        if turn % SAMPLE_INTERVAL == 0 {
            let estimated_tokens = match approx_bytes {
                Some(bytes) => bytes / BYTES_PER_TOKEN,
                None => messages.len() as u64 * TOKENS_PER_MESSAGE,
            };
            let level = self.memory.observe_pressure(estimated_tokens);
            debug!(turn, estimated_tokens, level = ?level, "context pressure sampled");
            summary.pressure = Some(level);
        }

        if self.memory.config().stuck_detection {
            summary.stuck_nudge = self.detect_stuck(messages);
        }

        Ok(summary)
    }

    /// Topic-repetition check over the last assistant text.
    fn detect_stuck(&self, messages: &[ChatMessage]) -> Option<String> {
        let last_assistant = messages
            .iter()
            .rev()
            .find(|m| m.role == "assistant")?
            .text_blocks()
            .last()?
            .to_string();
        let signature = topic_signature(&last_assistant)?;

        let count = self.topic.lock().observe(&signature);
        if count >= STUCK_THRESHOLD {
            Some(format!(
                "The conversation has circled the same topic for {} turns; consider changing approach or asking the user.",
                count
            ))
        } else {
            None
        }
    }

    /// Before-compaction hook: keep permanent rows warm.
    pub async fn before_compaction(&self) -> Result<()> {
        let touched = self.memory.before_compaction().await?;
        debug!(touched, "permanent rows touched before compaction");
        Ok(())
    }

    /// After-compaction hook: clear the cooldown ring, reset pressure, and
    /// forget topic history.
    pub fn after_compaction(&self) {
        self.memory.after_compaction();
        self.topic.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_topic_history_counts_consecutive_repeats() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("topic.json");
        let mut history = TopicHistory::load(path.clone());
        assert_eq!(history.observe("a,b,c"), 1);
        assert_eq!(history.observe("a,b,c"), 2);
        assert_eq!(history.observe("x,y,z"), 1);
        assert_eq!(history.observe("x,y,z"), 2);

        // Persisted state survives a reload.
        let mut reloaded = TopicHistory::load(path);
        assert_eq!(reloaded.observe("x,y,z"), 3);
    }

    #[test]
    fn test_topic_history_clear() {
        let dir = TempDir::new().unwrap();
        let mut history = TopicHistory::load(dir.path().join("topic.json"));
        history.observe("a,b,c");
        history.clear();
        assert_eq!(history.observe("a,b,c"), 1);
    }
}
