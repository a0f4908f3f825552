//! Tool handlers.
//!
//! Every tool takes a JSON-object parameter payload and returns
//! `{content: [{type: "text", text}], details?}`. Handlers never propagate
//! errors: failures render as a human-readable error string. Rendered text
//! is hard-capped at 4,000 characters.

use super::HostAdapter;
use crate::extraction::FactCandidate;
use crate::memory::recall::fts_keywords;
use crate::memory::{StoreResult, STORED_VALUE_MAX};
use crate::models::{Decision, TtlClass};
use crate::pipeline::{AdvanceInput, PipelineInput};
use chrono::{TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Hard cap on rendered tool output.
const TOOL_TEXT_MAX: usize = 4_000;

/// Suffix appended when output is cut.
const TRUNCATION_SUFFIX: &str = " …(truncated)";

/// Default / maximum limits for the search tools.
const SEARCH_DEFAULT_LIMIT: i64 = 10;
const SEARCH_MAX_LIMIT: i64 = 100;
const SEMANTIC_DEFAULT_LIMIT: usize = 5;
const SEMANTIC_MAX_LIMIT: usize = 50;

/// One content block of a tool result.
#[derive(Debug, Clone, Serialize)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

/// The payload returned to the host for a tool call.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub content: Vec<ToolContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ToolResult {
    /// Wrap text, applying the hard cap.
    pub fn text(text: impl Into<String>) -> Self {
        let mut text: String = text.into();
        if text.chars().count() > TOOL_TEXT_MAX {
            let keep = TOOL_TEXT_MAX - TRUNCATION_SUFFIX.chars().count();
            text = text.chars().take(keep).collect::<String>() + TRUNCATION_SUFFIX;
        }
        Self {
            content: vec![ToolContent {
                kind: "text".to_string(),
                text,
            }],
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    fn error(message: impl std::fmt::Display) -> Self {
        Self::text(format!("Error: {}", message))
    }
}

fn str_param(params: &Value, key: &str) -> Option<String> {
    params.get(key).and_then(Value::as_str).map(str::to_string)
}

fn require_str(params: &Value, key: &str) -> Result<String, String> {
    str_param(params, key).ok_or_else(|| format!("missing required parameter '{}'", key))
}

fn fact_line(decision: &Decision) -> String {
    let when = Utc
        .timestamp_opt(decision.ts, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d").to_string())
        .unwrap_or_default();
    match (&decision.entity, &decision.fact_key, &decision.fact_value) {
        (Some(entity), Some(key), Some(value)) => format!(
            "- **{}.{}**: {} _({}, {})_",
            entity, key, value, decision.ttl_class, when
        ),
        _ => format!("- {} _({})_", decision.description, when),
    }
}

impl HostAdapter {
    /// Dispatch one tool call by name. Unknown names and all failures come
    /// back as error text, never as `Err`.
    pub async fn handle_tool(&self, name: &str, params: Value) -> ToolResult {
        debug!(tool = %name, "tool call");
        match name {
            "memory_search" => self.tool_memory_search(&params).await,
            "memory_entity" => self.tool_memory_entity(&params).await,
            "memory_store" => self.tool_memory_store(&params).await,
            "memory_semantic_search" => self.tool_semantic_search(&params).await,
            "memory_add_entity" => self.tool_add_entity(&params).await,
            "memory_security_log" => self.tool_security_log(&params).await,
            "pipeline_create" => self.tool_pipeline_create(params).await,
            "pipeline_start" => self.tool_pipeline_start(&params).await,
            "pipeline_status" => self.tool_pipeline_status(&params).await,
            "pipeline_advance" => self.tool_pipeline_advance(&params).await,
            "pipeline_cancel" => self.tool_pipeline_cancel(&params).await,
            "pipeline_schedule" => self.tool_pipeline_schedule(&params).await,
            "pipeline_tick" => self.tool_pipeline_tick().await,
            other => ToolResult::error(format!("unknown tool '{}'", other)),
        }
    }

    async fn tool_memory_search(&self, params: &Value) -> ToolResult {
        let query = match require_str(params, "query") {
            Ok(q) => q,
            Err(e) => return ToolResult::error(e),
        };
        let limit = params
            .get("limit")
            .and_then(Value::as_i64)
            .unwrap_or(SEARCH_DEFAULT_LIMIT)
            .clamp(1, SEARCH_MAX_LIMIT);

        let Some(expr) = fts_keywords(&query) else {
            return ToolResult::text("No searchable keywords in query.");
        };
        match self.memory().decisions().fts_search(&expr, limit).await {
            Ok(rows) if rows.is_empty() => ToolResult::text("No matching memories."),
            Ok(rows) => {
                let lines: Vec<String> = rows.iter().map(fact_line).collect();
                ToolResult::text(format!("## Memories\n{}", lines.join("\n")))
            }
            Err(e) => ToolResult::error(e),
        }
    }

    async fn tool_memory_entity(&self, params: &Value) -> ToolResult {
        let entity = match require_str(params, "entity") {
            Ok(e) => e,
            Err(e) => return ToolResult::error(e),
        };
        match self.memory().decisions().by_entity(&entity, 50).await {
            Ok(rows) if rows.is_empty() => {
                ToolResult::text(format!("No memories for entity '{}'.", entity))
            }
            Ok(rows) => {
                let lines: Vec<String> = rows.iter().map(fact_line).collect();
                ToolResult::text(format!("## {}\n{}", entity, lines.join("\n")))
            }
            Err(e) => ToolResult::error(e),
        }
    }

    async fn tool_memory_store(&self, params: &Value) -> ToolResult {
        let entity = match require_str(params, "entity") {
            Ok(v) => v,
            Err(e) => return ToolResult::error(e),
        };
        let key = match require_str(params, "key") {
            Ok(v) => v,
            Err(e) => return ToolResult::error(e),
        };
        let value = match require_str(params, "value") {
            Ok(v) => v,
            Err(e) => return ToolResult::error(e),
        };

        let value: String = value.chars().take(STORED_VALUE_MAX).collect();
        let requested_ttl = str_param(params, "ttl")
            .map(|t| TtlClass::from(t.as_str()))
            .unwrap_or(TtlClass::Active);

        let candidate = FactCandidate {
            entity,
            key,
            value,
        };
        // Explicit tool calls are trusted: no security review, protected
        // entities included.
        match self
            .memory()
            .write_fact("tool", &candidate, "tool", Some(requested_ttl))
            .await
        {
            Ok(StoreResult::Inserted { id, ttl }) => ToolResult::text(format!(
                "Stored {}.{} ({} TTL).",
                candidate.entity, candidate.key, ttl
            ))
            .with_details(serde_json::json!({ "id": id })),
            Ok(StoreResult::Updated { id }) => ToolResult::text(format!(
                "Updated {}.{}.",
                candidate.entity, candidate.key
            ))
            .with_details(serde_json::json!({ "id": id })),
            Ok(StoreResult::Blocked) => ToolResult::text("Fact was not stored."),
            Err(e) => ToolResult::error(e),
        }
    }

    async fn tool_semantic_search(&self, params: &Value) -> ToolResult {
        let query = match require_str(params, "query") {
            Ok(q) => q,
            Err(e) => return ToolResult::error(e),
        };
        let Some(embeddings) = self.memory().embeddings() else {
            return ToolResult::text("Vector search is disabled.");
        };
        let limit = params
            .get("limit")
            .and_then(Value::as_u64)
            .map(|l| l as usize)
            .unwrap_or(SEMANTIC_DEFAULT_LIMIT)
            .clamp(1, SEMANTIC_MAX_LIMIT);
        let threshold = params
            .get("threshold")
            .and_then(Value::as_f64)
            .map(|t| t as f32)
            .unwrap_or(self.memory().config().vector_similarity_threshold);

        let hits = embeddings.search(&query, limit, threshold).await;
        if hits.is_empty() {
            return ToolResult::text("No semantic matches.");
        }
        let lines: Vec<String> = hits
            .iter()
            .map(|h| format!("- ({:.2}) {}", h.similarity, h.content))
            .collect();
        ToolResult::text(format!("## Semantic Matches\n{}", lines.join("\n")))
    }

    async fn tool_add_entity(&self, params: &Value) -> ToolResult {
        let name = match require_str(params, "name") {
            Ok(n) => n,
            Err(e) => return ToolResult::error(e),
        };
        self.memory().registry().add(&name);
        match self.memory().entities().insert(&name, "tool").await {
            Ok(()) => ToolResult::text(format!("Entity '{}' registered.", name)),
            Err(e) => ToolResult::error(e),
        }
    }

    async fn tool_security_log(&self, params: &Value) -> ToolResult {
        let limit = params.get("limit").and_then(Value::as_i64).unwrap_or(20);
        match self.memory().security().recent_events(limit).await {
            Ok(events) if events.is_empty() => ToolResult::text("No security events."),
            Ok(events) => {
                let lines: Vec<String> = events
                    .iter()
                    .map(|e| {
                        format!(
                            "- [{}] {} entity={} pattern={}",
                            e.ts,
                            e.event_type,
                            e.entity.as_deref().unwrap_or("-"),
                            e.pattern.as_deref().unwrap_or("-"),
                        )
                    })
                    .collect();
                ToolResult::text(format!("## Security Events\n{}", lines.join("\n")))
            }
            Err(e) => ToolResult::error(e),
        }
    }

    async fn tool_pipeline_create(&self, params: Value) -> ToolResult {
        let input: PipelineInput = match serde_json::from_value(params) {
            Ok(input) => input,
            Err(e) => return ToolResult::error(format!("invalid pipeline input: {}", e)),
        };
        match self.pipeline_engine().create(input).await {
            Ok(id) => ToolResult::text(format!("Pipeline created: {}", id))
                .with_details(serde_json::json!({ "pipeline_id": id })),
            Err(e) => ToolResult::error(e),
        }
    }

    async fn tool_pipeline_start(&self, params: &Value) -> ToolResult {
        let id = match require_str(params, "pipeline_id") {
            Ok(id) => id,
            Err(e) => return ToolResult::error(e),
        };
        match self.pipeline_engine().start(&id).await {
            Ok(()) => ToolResult::text(format!("Pipeline {} started.", id)),
            Err(e) => ToolResult::error(e),
        }
    }

    async fn tool_pipeline_status(&self, params: &Value) -> ToolResult {
        match str_param(params, "pipeline_id") {
            Some(id) => match self.pipeline_engine().snapshot(&id).await {
                Ok(snapshot) => {
                    let steps: Vec<String> = snapshot
                        .steps
                        .iter()
                        .map(|s| format!("- {} [{}]", s.name, s.status))
                        .collect();
                    ToolResult::text(format!(
                        "## {} ({})\n{}\nReady: {}",
                        snapshot.pipeline.name,
                        snapshot.pipeline.status,
                        steps.join("\n"),
                        if snapshot.ready.is_empty() {
                            "none".to_string()
                        } else {
                            snapshot.ready.join(", ")
                        },
                    ))
                    .with_details(serde_json::json!({ "outcome": snapshot.outcome }))
                }
                Err(e) => ToolResult::error(e),
            },
            None => match self.pipeline_engine().overview().await {
                Ok(aggregates) if aggregates.is_empty() => {
                    ToolResult::text("No active pipelines.")
                }
                Ok(aggregates) => {
                    let lines: Vec<String> = aggregates
                        .iter()
                        .map(|a| {
                            format!(
                                "- {} [{}] {}/{} steps complete",
                                a.pipeline.name,
                                a.pipeline.status,
                                a.complete_steps,
                                a.total_steps
                            )
                        })
                        .collect();
                    ToolResult::text(format!("## Active Pipelines\n{}", lines.join("\n")))
                }
                Err(e) => ToolResult::error(e),
            },
        }
    }

    async fn tool_pipeline_advance(&self, params: &Value) -> ToolResult {
        let step_id = match require_str(params, "step_id") {
            Ok(id) => id,
            Err(e) => return ToolResult::error(e),
        };
        let input = AdvanceInput {
            output: str_param(params, "output"),
            success: params.get("success").and_then(Value::as_bool).unwrap_or(true),
            error: str_param(params, "error"),
        };
        match self.pipeline_engine().advance(&step_id, input).await {
            Ok(result) => {
                let status = if result.pipeline_complete {
                    "pipeline complete"
                } else if result.pipeline_failed {
                    "pipeline failed"
                } else if result.retried {
                    "step queued for retry"
                } else {
                    "pipeline running"
                };
                ToolResult::text(format!(
                    "Advanced: {}. Ready: [{}]. Skipped: [{}].",
                    status,
                    result.ready.join(", "),
                    result.skipped.join(", "),
                ))
                .with_details(serde_json::to_value(&result).unwrap_or(Value::Null))
            }
            Err(e) => ToolResult::error(e),
        }
    }

    async fn tool_pipeline_cancel(&self, params: &Value) -> ToolResult {
        let id = match require_str(params, "pipeline_id") {
            Ok(id) => id,
            Err(e) => return ToolResult::error(e),
        };
        match self.pipeline_engine().cancel(&id).await {
            Ok(()) => ToolResult::text(format!("Pipeline {} cancelled.", id)),
            Err(e) => ToolResult::error(e),
        }
    }

    async fn tool_pipeline_schedule(&self, params: &Value) -> ToolResult {
        let pipeline_id = match require_str(params, "pipeline_id") {
            Ok(id) => id,
            Err(e) => return ToolResult::error(e),
        };
        let schedule = match require_str(params, "schedule") {
            Ok(s) => s,
            Err(e) => return ToolResult::error(e),
        };
        let timezone = str_param(params, "timezone");
        match self
            .pipeline_engine()
            .schedule(&pipeline_id, &schedule, timezone.as_deref())
            .await
        {
            Ok(trigger_id) => ToolResult::text(format!(
                "Trigger {} registered for pipeline {}.",
                trigger_id, pipeline_id
            )),
            Err(e) => ToolResult::error(e),
        }
    }

    async fn tool_pipeline_tick(&self) -> ToolResult {
        match self.pipeline_engine().tick_work_items().await {
            Ok(work) if work.items.is_empty() && work.paused.is_empty() => {
                ToolResult::text("No ready steps.")
            }
            Ok(work) => {
                let mut lines: Vec<String> = work
                    .items
                    .iter()
                    .map(|item| {
                        format!(
                            "- {} / {} (tier: {}, executor: {})",
                            item.pipeline_name,
                            item.step_name,
                            if item.tier.is_empty() { "-" } else { &item.tier },
                            if item.executor.is_empty() { "-" } else { &item.executor },
                        )
                    })
                    .collect();
                for (pipeline_id, step) in &work.paused {
                    lines.push(format!("- paused: {} / {}", pipeline_id, step));
                }
                ToolResult::text(format!("## Ready Work\n{}", lines.join("\n")))
                    .with_details(serde_json::to_value(&work).unwrap_or(Value::Null))
            }
            Err(e) => ToolResult::error(e),
        }
    }
}
