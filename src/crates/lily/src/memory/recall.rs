//! Budgeted context composition.
//!
//! A pure allocator over pre-fetched candidate pools: the engine queries the
//! store and the vector sidecar, then this module decides what fits. The
//! budget is a character ceiling subdivided by section weights (permanent
//! 0.30, full-text 0.30, recent 0.20, vector 0.20); sections fill in that
//! priority order and an underfilled section donates its slack to the ones
//! after it. The assembled markdown is wrapped in `<lily-memory>` tags.

use crate::embeddings::SemanticHit;
use crate::models::Decision;
use std::collections::HashSet;

/// Opening sentinel for injected context.
pub const WRAP_OPEN: &str = "<lily-memory>\n";
/// Closing sentinel for injected context.
pub const WRAP_CLOSE: &str = "</lily-memory>";

/// Per-line character cap inside sections.
const LINE_MAX: usize = 150;

/// Minimum leftover budget for the full-text and vector sections to run.
const SECTION_MIN_REMAINING: usize = 100;

/// Minimum prompt length for keyword search.
const MIN_PROMPT_LEN: usize = 5;

/// Maximum keywords fed to the full-text query.
const MAX_KEYWORDS: usize = 8;

/// Cumulative share of the budget after each section, in fill order.
const CUMULATIVE_WEIGHTS: [f64; 4] = [0.30, 0.60, 0.80, 1.0];

/// Pre-fetched candidate pools, one per section.
#[derive(Debug, Default)]
pub struct RecallPools {
    pub permanent: Vec<Decision>,
    pub fts: Vec<Decision>,
    pub recent: Vec<Decision>,
    pub vector: Vec<SemanticHit>,
}

/// Derive an FTS keyword expression from a prompt: strip punctuation, keep
/// tokens of three or more characters, take the first eight, join with OR.
pub fn fts_keywords(prompt: &str) -> Option<String> {
    if prompt.chars().count() < MIN_PROMPT_LEN {
        return None;
    }
    let cleaned: String = prompt
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let keywords: Vec<&str> = cleaned
        .split_whitespace()
        .filter(|t| t.chars().count() >= 3)
        .take(MAX_KEYWORDS)
        .collect();
    if keywords.is_empty() {
        None
    } else {
        Some(keywords.join(" OR "))
    }
}

fn truncate_line(line: &str) -> String {
    if line.chars().count() <= LINE_MAX {
        line.to_string()
    } else {
        let cut: String = line.chars().take(LINE_MAX - 1).collect();
        format!("{}…", cut)
    }
}

fn fact_line(decision: &Decision) -> String {
    match (&decision.entity, &decision.fact_key, &decision.fact_value) {
        (Some(entity), Some(key), Some(value)) => {
            truncate_line(&format!("- {}.{}: {}", entity, key, value))
        }
        _ => truncate_line(&format!("- {}", decision.description)),
    }
}

/// Append a section if its header and at least one line fit under `target`
/// total characters. Returns the rendered line count.
fn append_section(body: &mut String, header: &str, lines: &[String], target: usize) -> usize {
    if lines.is_empty() {
        return 0;
    }
    let first_cost = body.len() + header.len() + lines[0].len() + 1;
    if first_cost > target {
        return 0;
    }
    body.push_str(header);
    let mut appended = 0;
    for line in lines {
        if body.len() + line.len() + 1 > target {
            break;
        }
        body.push_str(line);
        body.push('\n');
        appended += 1;
    }
    appended
}

/// Compose the injection payload. Returns `None` when nothing fits or the
/// pools are empty.
pub fn compose_context(prompt: &str, pools: &RecallPools, budget: usize) -> Option<String> {
    let overhead = WRAP_OPEN.len() + WRAP_CLOSE.len();
    if budget <= overhead {
        return None;
    }
    let content_budget = budget - overhead;
    let target = |i: usize| (content_budget as f64 * CUMULATIVE_WEIGHTS[i]).floor() as usize;

    let mut body = String::new();

    // Permanent facts, importance order.
    let permanent_lines: Vec<String> = pools.permanent.iter().map(fact_line).collect();
    append_section(&mut body, "## Key Facts\n", &permanent_lines, target(0));

    // Full-text matches. Every id the full-text query surfaced is excluded
    // from the vector section, rendered or not.
    let fts_ids: HashSet<&str> = pools.fts.iter().map(|d| d.id.as_str()).collect();
    let fts_eligible = prompt.chars().count() >= MIN_PROMPT_LEN
        && content_budget.saturating_sub(body.len()) > SECTION_MIN_REMAINING;
    if fts_eligible {
        let fts_lines: Vec<String> = pools.fts.iter().map(fact_line).collect();
        append_section(&mut body, "## Related Memories\n", &fts_lines, target(1));
    }

    // Recent high-importance rows.
    let recent_lines: Vec<String> = pools.recent.iter().map(fact_line).collect();
    append_section(&mut body, "## Recent Notes\n", &recent_lines, target(2));

    // Vector matches, deduplicated against the full-text section.
    if content_budget.saturating_sub(body.len()) > SECTION_MIN_REMAINING {
        let vector_lines: Vec<String> = pools
            .vector
            .iter()
            .filter(|hit| !fts_ids.contains(hit.decision_id.as_str()))
            .map(|hit| truncate_line(&format!("- ({:.2}) {}", hit.similarity, hit.content)))
            .collect();
        append_section(&mut body, "## Semantic Matches\n", &vector_lines, target(3));
    }

    if body.is_empty() {
        return None;
    }
    Some(format!("{}{}{}", WRAP_OPEN, body, WRAP_CLOSE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TtlClass;
    use proptest::prelude::*;

    fn fact(id: &str, entity: &str, key: &str, value: &str, importance: f64) -> Decision {
        let mut d = Decision::fact("s", entity, key, value, TtlClass::Permanent, importance);
        d.id = id.to_string();
        d
    }

    fn hit(id: &str, similarity: f32, content: &str) -> SemanticHit {
        SemanticHit {
            decision_id: id.to_string(),
            similarity,
            content: content.to_string(),
        }
    }

    fn sample_pools() -> RecallPools {
        RecallPools {
            permanent: vec![
                fact("p1", "Kevin", "prefers", "TypeScript for new services", 0.9),
                fact("p2", "project", "language", "rust", 0.8),
            ],
            fts: vec![fact("f1", "Kevin", "editor", "helix", 0.6)],
            recent: vec![fact("r1", "deploy", "window", "fridays", 0.75)],
            vector: vec![hit("v1", 0.83, "Kevin mentors the platform team")],
        }
    }

    #[test]
    fn test_sections_render_in_priority_order() {
        let payload =
            compose_context("what does Kevin prefer", &sample_pools(), 4000).unwrap();
        let facts = payload.find("## Key Facts").unwrap();
        let related = payload.find("## Related Memories").unwrap();
        let recent = payload.find("## Recent Notes").unwrap();
        let semantic = payload.find("## Semantic Matches").unwrap();
        assert!(facts < related && related < recent && recent < semantic);
        assert!(payload.starts_with(WRAP_OPEN));
        assert!(payload.ends_with(WRAP_CLOSE));
    }

    #[test]
    fn test_fts_ids_never_reappear_in_vector_section() {
        let mut pools = sample_pools();
        pools.vector.push(hit("f1", 0.99, "duplicate of the fts row"));
        let payload = compose_context("what does Kevin prefer", &pools, 4000).unwrap();
        assert!(!payload.contains("duplicate of the fts row"));
        assert!(payload.contains("Kevin mentors the platform team"));
    }

    #[test]
    fn test_short_prompt_skips_fts() {
        let payload = compose_context("hi", &sample_pools(), 4000).unwrap();
        assert!(!payload.contains("## Related Memories"));
        assert!(payload.contains("## Key Facts"));
    }

    #[test]
    fn test_empty_pools_yield_nothing() {
        assert_eq!(compose_context("anything", &RecallPools::default(), 4000), None);
    }

    #[test]
    fn test_tiny_budget_yields_nothing() {
        assert_eq!(compose_context("anything", &sample_pools(), 10), None);
    }

    #[test]
    fn test_lines_are_truncated() {
        let pools = RecallPools {
            permanent: vec![fact("p1", "Kevin", "bio", &"x".repeat(500), 0.9)],
            ..Default::default()
        };
        let payload = compose_context("prompt text", &pools, 4000).unwrap();
        let line = payload.lines().find(|l| l.starts_with("- ")).unwrap();
        assert!(line.chars().count() <= LINE_MAX);
    }

    #[test]
    fn test_keywords_derivation() {
        assert_eq!(fts_keywords("hi"), None);
        assert_eq!(
            fts_keywords("what language does Kevin like?").as_deref(),
            Some("what OR language OR does OR Kevin OR like")
        );
        let many = fts_keywords("one two three four five six seven eight nine ten alpha beta")
            .unwrap();
        assert_eq!(many.matches(" OR ").count(), MAX_KEYWORDS - 1);
    }

    proptest! {
        /// The payload never exceeds the budget, for any budget.
        #[test]
        fn prop_payload_respects_budget(budget in 0usize..6000) {
            let pools = sample_pools();
            if let Some(payload) = compose_context("what does Kevin prefer", &pools, budget) {
                prop_assert!(payload.len() <= budget);
            }
        }

        /// Growing the budget never loses the wrapper structure.
        #[test]
        fn prop_payload_is_wrapped(budget in 100usize..6000) {
            let pools = sample_pools();
            if let Some(payload) = compose_context("what does Kevin prefer", &pools, budget) {
                prop_assert!(payload.starts_with(WRAP_OPEN));
                prop_assert!(payload.ends_with(WRAP_CLOSE));
            }
        }
    }
}
