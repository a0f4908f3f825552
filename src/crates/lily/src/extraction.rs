//! Heuristic fact extraction and topic signatures.
//!
//! Free-form text is scanned line by line for two shapes:
//!
//! - dotted assignments: `Entity.key = value` (also `:`)
//! - relational statements: `Entity prefers value`, `Entity is value`, ...
//!
//! Candidate entities must pass the acceptance rules: 2-60 characters, and
//! either the lowercased base (before any dot) is in the runtime allow-list
//! or the name begins with an uppercase letter followed by a lowercase one.
//! Known stopwords, pronouns, and common verbs are rejected even when they
//! carry proper casing.

use crate::entities::EntityRegistry;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

/// Values longer than this are dropped at the extraction layer.
const MAX_VALUE_LEN: usize = 200;

/// Minimum text length for a topic signature.
const MIN_TOPIC_LEN: usize = 30;

/// A candidate (entity, key, value) fact parsed from text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactCandidate {
    pub entity: String,
    pub key: String,
    pub value: String,
}

fn assignment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*([A-Za-z][A-Za-z0-9_-]{0,59})\.([A-Za-z_][A-Za-z0-9_.-]{0,59})\s*[:=]\s*(\S.*)$")
            .expect("assignment regex")
    })
}

fn relation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b([A-Za-z][A-Za-z0-9_-]{0,59})\s+(prefers|likes|dislikes|uses|wants|needs|owns|runs|manages|works on|lives in)\s+([^.!?\n]{1,300})",
        )
        .expect("relation regex")
    })
}

fn reject_words() -> &'static HashSet<&'static str> {
    static WORDS: OnceLock<HashSet<&'static str>> = OnceLock::new();
    WORDS.get_or_init(|| {
        [
            "the", "this", "that", "these", "those", "there", "here", "it", "its", "he", "she",
            "they", "them", "we", "you", "your", "our", "his", "her", "who", "what", "when",
            "where", "why", "how", "which", "yes", "no", "not", "and", "but", "also", "just",
            "very", "really", "please", "thanks", "now", "then", "today", "tomorrow",
            "yesterday", "someone", "anyone", "everyone", "nobody", "something", "anything",
            "everything", "nothing", "make", "made", "get", "got", "let", "see", "say", "said",
            "go", "went", "come", "came", "take", "took", "give", "gave", "think", "thought",
            "know", "knew", "maybe", "sure", "okay",
        ]
        .into_iter()
        .collect()
    })
}

fn stopwords() -> &'static HashSet<&'static str> {
    static WORDS: OnceLock<HashSet<&'static str>> = OnceLock::new();
    WORDS.get_or_init(|| {
        [
            "the", "this", "that", "these", "those", "with", "from", "have", "has", "had",
            "will", "would", "could", "should", "about", "they", "them", "then", "than",
            "when", "what", "where", "which", "there", "here", "been", "being", "because",
            "into", "over", "under", "after", "before", "some", "most", "more", "very",
            "just", "like", "also", "only", "your", "ours", "their", "were", "does", "doing",
            "each", "such", "much", "many", "need", "needs",
        ]
        .into_iter()
        .collect()
    })
}

/// Acceptance rules for a candidate entity name.
pub fn accept_entity(name: &str, registry: &EntityRegistry) -> bool {
    let len = name.chars().count();
    if !(2..=60).contains(&len) {
        return false;
    }
    let base = name.split('.').next().unwrap_or(name);
    if reject_words().contains(base.to_lowercase().as_str()) {
        return false;
    }
    if registry.contains(base) {
        return true;
    }
    // Proper-noun shape: uppercase letter followed by a lowercase letter.
    let mut chars = name.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some(first), Some(second)) if first.is_uppercase() && second.is_lowercase()
    )
}

/// Extract candidate facts from a block of text.
pub fn extract_facts(text: &str, registry: &EntityRegistry) -> Vec<FactCandidate> {
    let mut out = Vec::new();
    let mut seen: HashSet<(String, String)> = HashSet::new();

    for line in text.lines() {
        if let Some(caps) = assignment_re().captures(line) {
            let entity = caps[1].to_string();
            let key = caps[2].trim_end_matches('.').to_string();
            let value = caps[3].trim().to_string();
            push_candidate(&mut out, &mut seen, registry, entity, key, value);
            continue;
        }

        for caps in relation_re().captures_iter(line) {
            let entity = caps[1].to_string();
            let key = caps[2].to_lowercase().replace(' ', "_");
            let value = caps[3].trim().trim_end_matches(',').to_string();
            push_candidate(&mut out, &mut seen, registry, entity, key, value);
        }
    }
    out
}

fn push_candidate(
    out: &mut Vec<FactCandidate>,
    seen: &mut HashSet<(String, String)>,
    registry: &EntityRegistry,
    entity: String,
    key: String,
    value: String,
) {
    if value.is_empty() || value.chars().count() > MAX_VALUE_LEN {
        return;
    }
    if key.is_empty() || !accept_entity(&entity, registry) {
        return;
    }
    let dedup_key = (entity.to_lowercase(), key.to_lowercase());
    if seen.insert(dedup_key) {
        out.push(FactCandidate { entity, key, value });
    }
}

/// Five highest-frequency meaningful tokens, sorted lexicographically and
/// joined with commas. Returns `None` for inputs under 30 characters.
pub fn topic_signature(text: &str) -> Option<String> {
    if text.chars().count() < MIN_TOPIC_LEN {
        return None;
    }

    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let mut freq: HashMap<&str, usize> = HashMap::new();
    for token in cleaned.split_whitespace() {
        if token.chars().count() <= 3 || stopwords().contains(token) {
            continue;
        }
        *freq.entry(token).or_insert(0) += 1;
    }
    if freq.is_empty() {
        return None;
    }

    let mut tokens: Vec<(&str, usize)> = freq.into_iter().collect();
    // Highest frequency first; ties resolve alphabetically so the signature
    // is deterministic.
    tokens.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    let mut top: Vec<&str> = tokens.into_iter().take(5).map(|(t, _)| t).collect();
    top.sort_unstable();
    Some(top.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> EntityRegistry {
        EntityRegistry::new(&[], &[])
    }

    #[test]
    fn test_relation_extraction() {
        let facts = extract_facts("Kevin prefers TypeScript for new services", &registry());
        assert_eq!(
            facts,
            vec![FactCandidate {
                entity: "Kevin".to_string(),
                key: "prefers".to_string(),
                value: "TypeScript for new services".to_string(),
            }]
        );
    }

    #[test]
    fn test_assignment_extraction() {
        let facts = extract_facts("config.system = dark mode enabled", &registry());
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].entity, "config");
        assert_eq!(facts[0].key, "system");
        assert_eq!(facts[0].value, "dark mode enabled");
    }

    #[test]
    fn test_pronouns_are_rejected_despite_casing() {
        assert!(extract_facts("They prefers coffee", &registry()).is_empty());
        assert!(extract_facts("This is fine", &registry()).is_empty());
    }

    #[test]
    fn test_lowercase_unknown_entity_is_rejected() {
        assert!(extract_facts("somebody prefers tea", &registry()).is_empty());
    }

    #[test]
    fn test_allow_listed_lowercase_entity_is_accepted() {
        let facts = extract_facts("project.language = rust", &registry());
        assert_eq!(facts.len(), 1);
    }

    #[test]
    fn test_entity_length_bounds() {
        let reg = registry();
        assert!(!accept_entity("K", &reg));
        let long = "A".to_string() + &"b".repeat(60);
        assert!(!accept_entity(&long, &reg));
        assert!(accept_entity("Kevin", &reg));
    }

    #[test]
    fn test_oversize_values_are_dropped() {
        let text = format!("Kevin prefers {}", "x".repeat(250));
        assert!(extract_facts(&text, &registry()).is_empty());
    }

    #[test]
    fn test_topic_signature_short_input_absent() {
        assert_eq!(topic_signature("too short"), None);
    }

    #[test]
    fn test_topic_signature_is_sorted_and_capped() {
        let text = "deploy deploy deploy pipeline pipeline schedule trigger worker worker worker cache";
        let sig = topic_signature(text).unwrap();
        let parts: Vec<&str> = sig.split(',').collect();
        assert_eq!(parts.len(), 5);
        let mut sorted = parts.clone();
        sorted.sort_unstable();
        assert_eq!(parts, sorted);
        assert!(parts.contains(&"deploy"));
        assert!(parts.contains(&"worker"));
    }

    #[test]
    fn test_topic_signature_drops_short_tokens_and_stopwords() {
        let sig = topic_signature("the cat ran far away from the dog with the bone").unwrap();
        assert!(!sig.contains("the"));
        assert!(!sig.contains("cat"));
        assert!(!sig.contains("with"));
    }

    #[test]
    fn test_identical_text_gives_identical_signature() {
        let text = "investigating the flaky pipeline scheduler timeout issue again today";
        assert_eq!(topic_signature(text), topic_signature(text));
    }
}
