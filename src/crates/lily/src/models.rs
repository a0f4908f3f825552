//! Row types shared across the store, engines, and tools.
//!
//! Statuses are persisted as lowercase strings; the enum accessors mirror the
//! step enums in `flowgraph`, which this module re-uses for steps.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub use flowgraph::{StepStatus, StepType};

/// Current Unix timestamp in seconds.
pub fn now_ts() -> i64 {
    Utc::now().timestamp()
}

/// Time-to-live class governing a decision's absolute expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtlClass {
    /// Never expires.
    Permanent,
    /// 90 days.
    Stable,
    /// 14 days.
    Active,
    /// 24 hours.
    Session,
}

impl TtlClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Permanent => "permanent",
            Self::Stable => "stable",
            Self::Active => "active",
            Self::Session => "session",
        }
    }

    /// Lifetime of the class; `None` for permanent rows.
    pub fn lifetime(&self) -> Option<Duration> {
        match self {
            Self::Permanent => None,
            Self::Stable => Some(Duration::days(90)),
            Self::Active => Some(Duration::days(14)),
            Self::Session => Some(Duration::hours(24)),
        }
    }

    /// Absolute expiry for a row created at `ts`; `None` for permanent.
    pub fn expiry_from(&self, ts: i64) -> Option<i64> {
        self.lifetime().map(|d| ts + d.num_seconds())
    }

    /// Live-row cap for the class, where one applies.
    pub fn quota(&self) -> Option<i64> {
        match self {
            Self::Permanent => Some(15),
            Self::Stable => Some(30),
            Self::Active => Some(50),
            Self::Session => None,
        }
    }
}

impl From<&str> for TtlClass {
    fn from(s: &str) -> Self {
        match s {
            "permanent" => Self::Permanent,
            "stable" => Self::Stable,
            "session" => Self::Session,
            _ => Self::Active,
        }
    }
}

impl std::fmt::Display for TtlClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A memory fact: either a free-form description or an (entity, key, value)
/// triple, stored under a TTL class.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Decision {
    pub id: String,
    pub session_id: String,
    pub ts: i64,
    pub category: String,
    pub description: String,
    pub rationale: String,
    pub classification: String,
    pub importance: f64,
    pub ttl_class: String,
    pub expires_at: Option<i64>,
    pub last_accessed: Option<i64>,
    pub entity: Option<String>,
    pub fact_key: Option<String>,
    pub fact_value: Option<String>,
    pub tags: String,
}

impl Decision {
    /// Create a fact row with the given TTL class and importance.
    pub fn fact(
        session_id: impl Into<String>,
        entity: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
        ttl: TtlClass,
        importance: f64,
    ) -> Self {
        let ts = now_ts();
        let entity = entity.into();
        let key = key.into();
        let value = value.into();
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            ts,
            category: "fact".to_string(),
            description: format!("{}.{} = {}", entity, key, value),
            rationale: String::new(),
            classification: String::new(),
            importance,
            ttl_class: ttl.as_str().to_string(),
            expires_at: ttl.expiry_from(ts),
            last_accessed: Some(ts),
            entity: Some(entity),
            fact_key: Some(key),
            fact_value: Some(value),
            tags: String::new(),
        }
    }

    pub fn ttl(&self) -> TtlClass {
        TtlClass::from(self.ttl_class.as_str())
    }

    /// Live means not expired at `now`.
    pub fn is_live(&self, now: i64) -> bool {
        self.expires_at.map(|e| e > now).unwrap_or(true)
    }
}

/// Embedding sidecar for a decision.
#[derive(Debug, Clone, FromRow)]
pub struct VectorRow {
    pub decision_id: String,
    pub content: String,
    pub embedding: Vec<u8>,
    pub model: String,
    pub created_at: i64,
}

/// A registered entity name.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EntityRow {
    pub name: String,
    pub display_name: String,
    pub source: String,
    pub added_at: i64,
}

/// Audit record for a security rejection or notable event.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SecurityEvent {
    pub id: String,
    pub ts: i64,
    pub event_type: String,
    pub source_role: String,
    pub entity: Option<String>,
    pub fact_key: Option<String>,
    pub fact_value: Option<String>,
    pub pattern: Option<String>,
    pub snippet: String,
}

impl SecurityEvent {
    /// Source snippets are capped at 200 characters before storage.
    pub const SNIPPET_MAX: usize = 200;
}

/// Pipeline status enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Pending,
    Running,
    Paused,
    Complete,
    Failed,
    Cancelled,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }
}

impl From<&str> for PipelineStatus {
    fn from(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "paused" => Self::Paused,
            "complete" => Self::Complete,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            _ => Self::Pending,
        }
    }
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persisted pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Pipeline {
    pub id: String,
    pub name: String,
    pub status: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub created_by: String,
    pub trigger_message: String,
    pub config: Option<String>,
    pub summary: Option<String>,
    pub error: Option<String>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, created_by: impl Into<String>) -> Self {
        let now = now_ts();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            status: PipelineStatus::Pending.as_str().to_string(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            created_by: created_by.into(),
            trigger_message: String::new(),
            config: None,
            summary: None,
            error: None,
        }
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus::from(self.status.as_str())
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

/// A persisted pipeline step.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StepRow {
    pub id: String,
    pub pipeline_id: String,
    pub name: String,
    pub step_type: String,
    pub status: String,
    pub tier: String,
    pub executor: String,
    pub prompt: String,
    pub depends_on_all: i64,
    pub retry_count: i64,
    pub max_retries: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub input: Option<String>,
    pub output: Option<String>,
    pub result_summary: Option<String>,
    pub error: Option<String>,
}

impl StepRow {
    pub fn status(&self) -> StepStatus {
        StepStatus::from(self.status.as_str())
    }

    pub fn step_type(&self) -> StepType {
        StepType::from(self.step_type.as_str())
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

/// A persisted parent->child edge with an optional condition payload (JSON).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EdgeRow {
    pub id: String,
    pub pipeline_id: String,
    pub parent_step_id: String,
    pub child_step_id: String,
    pub condition: Option<String>,
}

/// A cron-scheduled instantiation rule for a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TriggerRow {
    pub id: String,
    pub pipeline_id: String,
    pub schedule: String,
    pub timezone: String,
    pub enabled: i64,
    pub last_fired: Option<i64>,
    pub next_fire: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_lifetimes() {
        assert_eq!(TtlClass::Permanent.expiry_from(1000), None);
        assert_eq!(
            TtlClass::Session.expiry_from(1000),
            Some(1000 + 24 * 3600)
        );
        assert_eq!(
            TtlClass::Stable.expiry_from(0),
            Some(90 * 24 * 3600)
        );
    }

    #[test]
    fn test_decision_liveness() {
        let mut d = Decision::fact("s", "Kevin", "prefers", "TypeScript", TtlClass::Active, 0.5);
        assert!(d.is_live(now_ts()));
        d.expires_at = Some(now_ts() - 10);
        assert!(!d.is_live(now_ts()));
        d.expires_at = None;
        assert!(d.is_live(i64::MAX - 1));
    }

    #[test]
    fn test_pipeline_status_round_trip() {
        for s in [
            PipelineStatus::Pending,
            PipelineStatus::Running,
            PipelineStatus::Paused,
            PipelineStatus::Complete,
            PipelineStatus::Failed,
            PipelineStatus::Cancelled,
        ] {
            assert_eq!(PipelineStatus::from(s.as_str()), s);
        }
        assert!(PipelineStatus::Cancelled.is_terminal());
        assert!(!PipelineStatus::Paused.is_terminal());
    }
}
