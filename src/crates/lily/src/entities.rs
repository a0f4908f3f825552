//! Runtime entity registry.
//!
//! Entity names accepted by the extractor come from three sources merged at
//! service start: built-in defaults, the `entities` configuration list, and
//! rows already persisted in the store. A protected subset may only be
//! written from agent-originated content or explicit tool calls.

use crate::error::Result;
use crate::repositories::EntityRepository;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Entities always present in the allow-list.
const DEFAULT_ENTITIES: &[&str] = &[
    "config", "system", "note", "project", "user", "team", "service", "deploy",
];

/// Entities writable only from agent-originated content or tool calls.
pub const DEFAULT_PROTECTED: &[&str] = &["config", "system", "note"];

/// Process-wide entity allow-list with a protected subset.
#[derive(Clone)]
pub struct EntityRegistry {
    allowed: Arc<RwLock<HashSet<String>>>,
    protected: Arc<HashSet<String>>,
}

impl EntityRegistry {
    /// Build a registry from configuration; call [`EntityRegistry::seed_from_store`]
    /// afterwards to merge persisted names.
    pub fn new(configured: &[String], protected: &[String]) -> Self {
        let mut allowed: HashSet<String> =
            DEFAULT_ENTITIES.iter().map(|s| s.to_string()).collect();
        allowed.extend(configured.iter().map(|s| s.to_lowercase()));

        let protected: HashSet<String> = if protected.is_empty() {
            DEFAULT_PROTECTED.iter().map(|s| s.to_string()).collect()
        } else {
            protected.iter().map(|s| s.to_lowercase()).collect()
        };

        Self {
            allowed: Arc::new(RwLock::new(allowed)),
            protected: Arc::new(protected),
        }
    }

    /// Merge entity names persisted in the store.
    pub async fn seed_from_store(&self, repo: &EntityRepository) -> Result<()> {
        let names = repo.names().await?;
        let mut allowed = self.allowed.write();
        for name in names {
            allowed.insert(name.to_lowercase());
        }
        debug!(count = allowed.len(), "entity registry seeded");
        Ok(())
    }

    /// Whether the case-folded name is in the allow-list.
    pub fn contains(&self, name: &str) -> bool {
        self.allowed.read().contains(&name.to_lowercase())
    }

    /// Add a name to the runtime set (store persistence is the caller's job).
    pub fn add(&self, name: &str) {
        self.allowed.write().insert(name.to_lowercase());
    }

    /// Whether the entity's base (the segment before any dot) is protected.
    pub fn is_protected(&self, name: &str) -> bool {
        let base = name.split('.').next().unwrap_or(name).to_lowercase();
        self.protected.contains(&base)
    }

    pub fn len(&self) -> usize {
        self.allowed.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.read().is_empty()
    }
}
