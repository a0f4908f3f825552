//! Injection defense and the security audit trail.
//!
//! Facts sourced from a user role, or from content bearing untrusted
//! markers, pass through two checks before they may touch the store:
//!
//! 1. **Protected entities** - names whose base is in the protected set may
//!    only be written from agent-originated content or explicit tool calls.
//! 2. **Injection patterns** - a fixed list of named patterns scanned against
//!    both the fact key and the fact value.
//!
//! Every rejection records a security event (snippet capped at 200 chars)
//! and increments the per-turn block counter. A block is not an error to the
//! caller: the fact is silently dropped.

use crate::entities::EntityRegistry;
use crate::error::Result;
use crate::extraction::FactCandidate;
use crate::models::{now_ts, SecurityEvent};
use crate::repositories::SecurityRepository;
use regex::{Regex, RegexBuilder};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::warn;
use uuid::Uuid;

/// Why a fact was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    /// The target entity is protected from untrusted writes.
    ProtectedEntity,
    /// The fact value matched a named injection pattern.
    InjectionPattern(String),
    /// The fact key matched a named injection pattern.
    InjectionPatternKey(String),
}

impl BlockReason {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ProtectedEntity => "protected_entity",
            Self::InjectionPattern(_) => "injection_pattern",
            Self::InjectionPatternKey(_) => "injection_pattern_key",
        }
    }

    pub fn pattern(&self) -> Option<&str> {
        match self {
            Self::ProtectedEntity => None,
            Self::InjectionPattern(name) | Self::InjectionPatternKey(name) => Some(name),
        }
    }
}

/// Outcome of reviewing one candidate fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Blocked(BlockReason),
}

fn pattern(name: &'static str, re: &str) -> (&'static str, Regex) {
    let compiled = RegexBuilder::new(re)
        .case_insensitive(true)
        .build()
        .expect("injection pattern");
    (name, compiled)
}

fn injection_patterns() -> &'static Vec<(&'static str, Regex)> {
    static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            pattern(
                "instruction_override",
                r"\b(ignore|disregard|forget)\s+(all\s+|any\s+)?(previous|prior|above|earlier)\s+(instructions?|prompts?|rules?|context)",
            ),
            pattern(
                "context_override",
                r"\b(new\s+(instructions?|rules?)\s*:|overwrite\s+(memory|context)|clear\s+(your\s+)?memory)",
            ),
            pattern(
                "config_manipulation",
                r"\b(set|change|update|modify|override)\s+(the\s+)?(config(uration)?|settings?|system\s+prompt)",
            ),
            pattern(
                "substitution_attack",
                r"\b(replace|substitute|swap)\s+(all\s+|every\s+)?\w[\w\s]{0,40}\s(with|for)\b",
            ),
            pattern(
                "directive_language",
                r"\b(from\s+now\s+on|you\s+must\s+(always|never)?|always\s+(respond|answer|reply|say)|never\s+(reveal|mention|tell))",
            ),
            pattern(
                "meta_manipulation",
                r"\b(system\s+prompt|developer\s+mode|jailbreak|your\s+(instructions|programming|guidelines))",
            ),
            pattern(
                "destructive_command",
                r"(rm\s+-rf|drop\s+table|delete\s+from\s+\w+|truncate\s+table|mkfs|format\s+c:)",
            ),
            pattern(
                "credential_injection",
                r"\b(api[-_\s]?key|password|passwd|secret|token|credentials?)\b\s*(=|:|\bis\b)|\bexport\s+credentials\b",
            ),
        ]
    })
}

fn untrusted_markers() -> &'static Vec<Regex> {
    static MARKERS: OnceLock<Vec<Regex>> = OnceLock::new();
    MARKERS.get_or_init(|| {
        [
            // HTML tags
            r"<[a-zA-Z!/][^>\n]*>",
            // URLs
            r"https?://",
            // Explicit tagged sections
            r"(?i)(\[(system|assistant|inst)\]|<<sys>>|\[/?inst\])",
            // Email headers
            r"(?im)^(from|to|subject|reply-to|cc):\s",
        ]
        .iter()
        .map(|re| Regex::new(re).expect("untrusted marker"))
        .collect()
    })
}

/// Whether the text carries any untrusted-content marker.
pub fn is_untrusted_content(text: &str) -> bool {
    untrusted_markers().iter().any(|re| re.is_match(text))
}

/// First injection pattern matching `text`, by name.
pub fn match_injection(text: &str) -> Option<&'static str> {
    injection_patterns()
        .iter()
        .find(|(_, re)| re.is_match(text))
        .map(|(name, _)| *name)
}

/// Security gate shared by the capture pipeline and tool handlers.
#[derive(Clone)]
pub struct SecurityGate {
    repo: SecurityRepository,
    registry: EntityRegistry,
    blocked: Arc<AtomicU64>,
}

impl SecurityGate {
    pub fn new(repo: SecurityRepository, registry: EntityRegistry) -> Self {
        Self {
            repo,
            registry,
            blocked: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Review one candidate fact.
    ///
    /// Checks apply when the source role is `user` or the surrounding block
    /// carries untrusted markers; agent-originated trusted content passes.
    pub async fn review(
        &self,
        role: &str,
        block_text: &str,
        candidate: &FactCandidate,
    ) -> Result<Verdict> {
        let untrusted = role == "user" || is_untrusted_content(block_text);
        if !untrusted {
            return Ok(Verdict::Allowed);
        }

        if self.registry.is_protected(&candidate.entity) {
            let reason = BlockReason::ProtectedEntity;
            self.record_block(role, block_text, candidate, &reason).await?;
            return Ok(Verdict::Blocked(reason));
        }

        if let Some(name) = match_injection(&candidate.key) {
            let reason = BlockReason::InjectionPatternKey(name.to_string());
            self.record_block(role, block_text, candidate, &reason).await?;
            return Ok(Verdict::Blocked(reason));
        }

        if let Some(name) = match_injection(&candidate.value) {
            let reason = BlockReason::InjectionPattern(name.to_string());
            self.record_block(role, block_text, candidate, &reason).await?;
            return Ok(Verdict::Blocked(reason));
        }

        Ok(Verdict::Allowed)
    }

    async fn record_block(
        &self,
        role: &str,
        block_text: &str,
        candidate: &FactCandidate,
        reason: &BlockReason,
    ) -> Result<()> {
        self.blocked.fetch_add(1, Ordering::Relaxed);
        warn!(
            entity = %candidate.entity,
            key = %candidate.key,
            reason = reason.event_type(),
            pattern = reason.pattern().unwrap_or(""),
            "blocked fact capture"
        );

        let snippet: String = block_text.chars().take(SecurityEvent::SNIPPET_MAX).collect();
        let event = SecurityEvent {
            id: Uuid::new_v4().to_string(),
            ts: now_ts(),
            event_type: reason.event_type().to_string(),
            source_role: role.to_string(),
            entity: Some(candidate.entity.clone()),
            fact_key: Some(candidate.key.clone()),
            fact_value: Some(candidate.value.clone()),
            pattern: reason.pattern().map(|p| p.to_string()),
            snippet,
        };
        self.repo.insert(&event).await
    }

    /// Recent audit events, newest first.
    pub async fn recent_events(&self, limit: i64) -> Result<Vec<SecurityEvent>> {
        self.repo.recent(limit).await
    }

    /// Blocks recorded since the counter was last reset (per-turn).
    pub fn blocked_count(&self) -> u64 {
        self.blocked.load(Ordering::Relaxed)
    }

    pub fn reset_blocked_count(&self) {
        self.blocked.store(0, Ordering::Relaxed);
    }
}
