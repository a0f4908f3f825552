//! Session overflow guard.
//!
//! At service start the sessions manifest is scanned; entries whose session
//! file has grown past the configured share of the context cap get the file
//! renamed aside with an `overflow-<iso>.bak` suffix and their volatile
//! fields removed so the host starts that session fresh. Each rename appends
//! a line to the alert file next to the manifest.

use crate::error::Result;
use chrono::Utc;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Bytes-per-token estimate used for session files.
const BYTES_PER_TOKEN: u64 = 4;

/// Name of the alert file written next to the manifest.
const ALERT_FILE: &str = "overflow-alerts.log";

/// Manifest fields removed when a session is rotated aside.
const VOLATILE_FIELDS: &[&str] = &["sessionFile", "contextTokens"];

/// Files renamed by one guard run.
#[derive(Debug, Clone, Default)]
pub struct SessionGuardReport {
    pub rotated: Vec<String>,
}

/// Scan the manifest and rotate oversized session files aside.
pub fn run(manifest_path: &Path, threshold: f64, context_cap: u64) -> Result<SessionGuardReport> {
    let mut report = SessionGuardReport::default();
    if !manifest_path.exists() {
        return Ok(report);
    }

    let raw = fs::read_to_string(manifest_path)?;
    let mut manifest: Value = match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "sessions manifest is not valid JSON; leaving it alone");
            return Ok(report);
        }
    };

    let limit = (threshold * context_cap as f64) as u64;

    {
        let entries: Vec<&mut Value> = match &mut manifest {
            Value::Object(map) => map.values_mut().collect(),
            Value::Array(items) => items.iter_mut().collect(),
            _ => Vec::new(),
        };

        for entry in entries {
            let Some(obj) = entry.as_object() else {
                continue;
            };
            let has_tokens = obj.contains_key("contextTokens");
            let Some(session_file) = obj.get("sessionFile").and_then(Value::as_str) else {
                continue;
            };
            if !has_tokens {
                continue;
            }

            let Ok(metadata) = fs::metadata(session_file) else {
                continue;
            };
            let estimated_tokens = metadata.len() / BYTES_PER_TOKEN;
            if estimated_tokens <= limit {
                continue;
            }

            let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
            let backup = format!("{}.overflow-{}.bak", session_file, stamp);
            if let Err(e) = fs::rename(session_file, &backup) {
                warn!(file = %session_file, error = %e, "failed to rotate session file");
                continue;
            }
            info!(file = %session_file, backup = %backup, estimated_tokens, "rotated oversized session file");
            report.rotated.push(session_file.to_string());

            let obj = entry.as_object_mut().expect("checked above");
            for field in VOLATILE_FIELDS {
                obj.remove(*field);
            }
        }
    }

    if !report.rotated.is_empty() {
        fs::write(manifest_path, serde_json::to_string_pretty(&manifest)?)?;
        if let Some(dir) = manifest_path.parent() {
            let alert_path = dir.join(ALERT_FILE);
            let mut log = fs::read_to_string(&alert_path).unwrap_or_default();
            for file in &report.rotated {
                log.push_str(&format!("{} rotated {}\n", Utc::now().to_rfc3339(), file));
            }
            fs::write(alert_path, log)?;
        }
    }

    Ok(report)
}
