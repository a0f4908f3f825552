//! Edge condition evaluation.
//!
//! An edge may carry a condition payload that gates whether a completed
//! parent satisfies the edge. Recognized variants are `output_contains`
//! (case-insensitive substring) and `output_match` (case-insensitive regex).
//! Absent payloads are unconditional; unrecognized keys evaluate true so that
//! newer producers do not wedge older consumers. An invalid regex fails
//! closed and evaluates false.

use regex::RegexBuilder;
use serde_json::Value;

/// Condition attached to a parent->child edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeCondition {
    /// No condition; always satisfied.
    Unconditional,
    /// Case-insensitive substring match against the parent's output.
    Contains(String),
    /// Case-insensitive regex test against the parent's output.
    Regex(String),
    /// A condition payload with no recognized key; evaluates true.
    Unknown,
}

impl EdgeCondition {
    /// Parse a condition from its stored JSON payload.
    ///
    /// `None` or JSON `null` means unconditional. An object with
    /// `output_contains` or `output_match` maps to the matching variant;
    /// any other payload is `Unknown`.
    pub fn from_json(payload: Option<&Value>) -> Self {
        let value = match payload {
            None | Some(Value::Null) => return Self::Unconditional,
            Some(v) => v,
        };

        if let Some(obj) = value.as_object() {
            if let Some(s) = obj.get("output_contains").and_then(Value::as_str) {
                return Self::Contains(s.to_string());
            }
            if let Some(r) = obj.get("output_match").and_then(Value::as_str) {
                return Self::Regex(r.to_string());
            }
        }
        Self::Unknown
    }

    /// Serialize back to the stored JSON payload. Unconditional edges store
    /// no payload at all.
    pub fn to_json(&self) -> Option<Value> {
        match self {
            Self::Unconditional | Self::Unknown => None,
            Self::Contains(s) => Some(serde_json::json!({ "output_contains": s })),
            Self::Regex(r) => Some(serde_json::json!({ "output_match": r })),
        }
    }

    /// True when the condition carries no predicate.
    pub fn is_unconditional(&self) -> bool {
        matches!(self, Self::Unconditional)
    }

    /// Evaluate the condition against a parent's output artifact.
    pub fn evaluate(&self, output: Option<&str>) -> bool {
        match self {
            Self::Unconditional | Self::Unknown => true,
            Self::Contains(needle) => output
                .map(|o| o.to_lowercase().contains(&needle.to_lowercase()))
                .unwrap_or(false),
            Self::Regex(pattern) => {
                let compiled = RegexBuilder::new(pattern).case_insensitive(true).build();
                match compiled {
                    Ok(re) => output.map(|o| re.is_match(o)).unwrap_or(false),
                    // Invalid regex fails closed.
                    Err(_) => false,
                }
            }
        }
    }
}
