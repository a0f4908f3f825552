//! Configuration schema for the memory companion

use serde::{Deserialize, Serialize};

/// Which roles the capture pipeline listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CapturePolicy {
    /// Capture from every role.
    #[default]
    #[serde(rename = "all")]
    All,
    /// Capture only from assistant turns.
    #[serde(rename = "assistant-only")]
    AssistantOnly,
    /// Capture only blocks carrying the trusted-capture marker.
    #[serde(rename = "tagged-only")]
    TaggedOnly,
}

/// Main configuration for the companion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryConfig {
    /// Database path, resolved under the memory root.
    pub db_path: String,

    /// Inject recalled context before agent turns.
    pub auto_recall: bool,

    /// Capture facts after agent turns.
    pub auto_capture: bool,

    /// Upper bound on full-text recall results.
    pub max_recall_results: i64,

    /// Facts stored per capture run.
    pub max_capture_per_turn: usize,

    /// Enable the repeated-topic stuck detector.
    pub stuck_detection: bool,

    /// Enable embedding storage and semantic search.
    pub vector_search: bool,

    /// Local inference/embedding endpoint.
    pub ollama_url: String,

    /// Model used for embeddings.
    pub embedding_model: String,

    /// Minimum cosine similarity for semantic hits.
    pub vector_similarity_threshold: f32,

    /// Sidecar file for the stuck detector's topic history.
    pub topic_history_path: String,

    /// Character budget for one injected context payload.
    pub injection_budget: usize,

    /// Context-window token cap used for pressure and overflow estimates.
    pub context_token_cap: u64,

    /// Capture policy.
    pub capture_policy: CapturePolicy,

    /// Entities writable only by the agent or explicit tool calls.
    pub protected_entities: Vec<String>,

    /// Share of the context cap a session file may reach before rotation.
    pub session_overflow_threshold: f64,

    /// Extra entity names for the extraction allow-list.
    pub entities: Vec<String>,

    /// Run a consolidation pass at service start.
    pub consolidation: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: "lily.db".to_string(),
            auto_recall: true,
            auto_capture: true,
            max_recall_results: 10,
            max_capture_per_turn: 5,
            stuck_detection: true,
            vector_search: true,
            ollama_url: "http://localhost:11434".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            vector_similarity_threshold: 0.5,
            topic_history_path: "topic-history.json".to_string(),
            injection_budget: 4_000,
            context_token_cap: 200_000,
            capture_policy: CapturePolicy::All,
            protected_entities: Vec::new(),
            session_overflow_threshold: 0.8,
            entities: Vec::new(),
            consolidation: true,
        }
    }
}
