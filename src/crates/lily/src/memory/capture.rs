//! The capture pipeline: conversation events to stored facts.
//!
//! Role-tagged text blocks are flattened from the message list, filtered by
//! size and policy, scanned for candidate facts, reviewed by the security
//! gate, and written under a derived TTL class with quota enforcement before
//! every insert.

use crate::config::CapturePolicy;
use crate::extraction::FactCandidate;
use crate::models::TtlClass;
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Blocks shorter than this carry no facts worth keeping.
pub const MIN_BLOCK_LEN: usize = 30;

/// Blocks longer than this are bulk content, not conversation.
pub const MAX_BLOCK_LEN: usize = 5_000;

/// Marker required by the `tagged-only` capture policy.
pub const TRUSTED_CAPTURE_MARKER: &str = "<trusted-capture>";

/// Sentinels identifying our own injected context; never re-captured.
const INJECTION_SENTINELS: &[&str] = &["<lily-memory>", "<relevant-memories>"];

/// A role-tagged message as delivered by the agent host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Vec<ContentBlock>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// Text blocks only; other content kinds are ignored.
    pub fn text_blocks(&self) -> impl Iterator<Item = &str> {
        self.content.iter().filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            ContentBlock::Other => None,
        })
    }
}

/// One content block of a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

/// Outcome of one capture run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureOutcome {
    /// New rows inserted.
    pub stored: usize,
    /// Existing rows updated in place.
    pub updated: usize,
    /// Candidates dropped by the security gate.
    pub blocked: usize,
}

/// Whether a text block may enter extraction at all.
pub fn block_accepted(text: &str, role: &str, policy: CapturePolicy) -> bool {
    let len = text.chars().count();
    if !(MIN_BLOCK_LEN..=MAX_BLOCK_LEN).contains(&len) {
        return false;
    }
    if INJECTION_SENTINELS.iter().any(|s| text.contains(s)) {
        return false;
    }
    match policy {
        CapturePolicy::All => true,
        CapturePolicy::AssistantOnly => role == "assistant",
        CapturePolicy::TaggedOnly => text.contains(TRUSTED_CAPTURE_MARKER),
    }
}

fn status_key_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        RegexBuilder::new(r"^(status|state|progress|phase|task|todo|current|next|working|doing)([_.-].*)?$")
            .case_insensitive(true)
            .build()
            .expect("status key regex")
    })
}

/// Keys describing transient status collapse to the session TTL class.
pub fn is_status_key(key: &str) -> bool {
    status_key_re().is_match(key)
}

/// TTL class and importance for a freshly captured fact.
pub fn derive_ttl(candidate: &FactCandidate, role: &str) -> (TtlClass, f64) {
    let importance = if role == "assistant" { 0.6 } else { 0.5 };
    if is_status_key(&candidate.key) {
        (TtlClass::Session, importance)
    } else {
        (TtlClass::Active, importance)
    }
}
