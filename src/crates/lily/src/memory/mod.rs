//! The memory engine.
//!
//! Owns the capture pipeline, consolidation, TTL and quota enforcement,
//! retrieval, and budgeted context composition. One instance lives in the
//! host adapter; the scheduler process never touches it.

pub mod capture;
pub mod consolidate;
pub mod cooldown;
pub mod pressure;
pub mod recall;
pub mod session_guard;

pub use capture::{CaptureOutcome, ChatMessage, ContentBlock};
pub use consolidate::ConsolidationReport;
pub use pressure::{PressureLevel, SAMPLE_INTERVAL};
pub use recall::{RecallPools, WRAP_CLOSE, WRAP_OPEN};

use crate::config::MemoryConfig;
use crate::db::Database;
use crate::embeddings::EmbeddingService;
use crate::entities::EntityRegistry;
use crate::error::Result;
use crate::extraction::{extract_facts, FactCandidate};
use crate::models::{Decision, TtlClass};
use crate::repositories::{
    DecisionRepository, EntityRepository, SecurityRepository, VectorRepository,
};
use crate::security::{SecurityGate, Verdict};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Values stored through the tool surface are capped at this length.
pub const STORED_VALUE_MAX: usize = 200;

/// Cap applied to the permanent fact pool during recall.
const PERMANENT_POOL_LIMIT: i64 = 15;

/// Cap applied to the recent pool during recall.
const RECENT_POOL_LIMIT: i64 = 5;

/// Default and ceiling for semantic search during recall.
const VECTOR_POOL_LIMIT: usize = 5;

/// How a fact write landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreResult {
    Inserted { id: String, ttl: TtlClass },
    Updated { id: String },
    Blocked,
}

/// Budget-aware memory engine shared by the host adapter's hooks and tools.
pub struct MemoryEngine {
    decisions: DecisionRepository,
    vectors: VectorRepository,
    entities: EntityRepository,
    registry: EntityRegistry,
    security: SecurityGate,
    embeddings: Option<EmbeddingService>,
    config: MemoryConfig,
    cooldown: Mutex<cooldown::CooldownRing>,
    pressure: Mutex<pressure::PressureState>,
}

impl MemoryEngine {
    pub fn new(db: Arc<Database>, config: MemoryConfig) -> Self {
        let decisions = DecisionRepository::new(db.clone());
        let vectors = VectorRepository::new(db.clone());
        let entities = EntityRepository::new(db.clone());
        let registry = EntityRegistry::new(&config.entities, &config.protected_entities);
        let security = SecurityGate::new(SecurityRepository::new(db), registry.clone());
        let embeddings = config.vector_search.then(|| {
            EmbeddingService::new(
                &config.ollama_url,
                &config.embedding_model,
                vectors.clone(),
                decisions.clone(),
            )
        });

        Self {
            decisions,
            vectors,
            entities,
            registry,
            security,
            embeddings,
            config,
            cooldown: Mutex::new(cooldown::CooldownRing::new()),
            pressure: Mutex::new(pressure::PressureState::new()),
        }
    }

    /// Seed the runtime entity set from the store. Called once at start.
    pub async fn init(&self) -> Result<()> {
        self.registry.seed_from_store(&self.entities).await
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn security(&self) -> &SecurityGate {
        &self.security
    }

    pub fn decisions(&self) -> &DecisionRepository {
        &self.decisions
    }

    pub fn entities(&self) -> &EntityRepository {
        &self.entities
    }

    pub fn embeddings(&self) -> Option<&EmbeddingService> {
        self.embeddings.as_ref()
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Run capture over a message list.
    pub async fn capture(
        &self,
        session_id: &str,
        messages: &[ChatMessage],
    ) -> Result<CaptureOutcome> {
        let mut outcome = CaptureOutcome::default();
        let cap = self.config.max_capture_per_turn;

        'messages: for message in messages {
            for block in message.text_blocks() {
                if !capture::block_accepted(block, &message.role, self.config.capture_policy) {
                    continue;
                }

                for candidate in extract_facts(block, &self.registry) {
                    if outcome.stored + outcome.updated >= cap {
                        break 'messages;
                    }

                    match self.security.review(&message.role, block, &candidate).await? {
                        Verdict::Blocked(_) => {
                            outcome.blocked += 1;
                            continue;
                        }
                        Verdict::Allowed => {}
                    }

                    match self
                        .write_fact(session_id, &candidate, &message.role, None)
                        .await?
                    {
                        StoreResult::Inserted { .. } => outcome.stored += 1,
                        StoreResult::Updated { .. } => outcome.updated += 1,
                        StoreResult::Blocked => outcome.blocked += 1,
                    }
                }
            }
        }

        debug!(
            stored = outcome.stored,
            updated = outcome.updated,
            blocked = outcome.blocked,
            "capture pass finished"
        );
        Ok(outcome)
    }

    /// Write one fact: update-in-place on an (entity, key) collision among
    /// live rows, otherwise insert with quota enforcement. `requested_ttl`
    /// comes from the tool surface; capture passes `None` and derives it.
    pub async fn write_fact(
        &self,
        session_id: &str,
        candidate: &FactCandidate,
        role: &str,
        requested_ttl: Option<TtlClass>,
    ) -> Result<StoreResult> {
        if let Some(existing) = self
            .decisions
            .find_live_fact(&candidate.entity, &candidate.key)
            .await?
        {
            self.decisions
                .update_fact_value(&existing.id, &candidate.value)
                .await?;
            self.refresh_vector(&existing.id, candidate).await;
            return Ok(StoreResult::Updated { id: existing.id });
        }

        let (derived_ttl, importance) = capture::derive_ttl(candidate, role);
        let ttl = match requested_ttl {
            // Status keys collapse to session even when a longer TTL was
            // requested explicitly.
            Some(_) if capture::is_status_key(&candidate.key) => TtlClass::Session,
            Some(requested) => requested,
            None => derived_ttl,
        };

        self.enforce_quota(ttl).await?;

        let decision = Decision::fact(
            session_id,
            candidate.entity.clone(),
            candidate.key.clone(),
            candidate.value.clone(),
            ttl,
            importance,
        );
        let id = decision.id.clone();
        self.decisions.insert(&decision).await?;
        self.refresh_vector(&id, candidate).await;

        Ok(StoreResult::Inserted { id, ttl })
    }

    async fn refresh_vector(&self, decision_id: &str, candidate: &FactCandidate) {
        if let Some(embeddings) = &self.embeddings {
            let text = format!(
                "{}.{} = {}",
                candidate.entity, candidate.key, candidate.value
            );
            embeddings.store(decision_id, &text).await;
        }
    }

    /// Quota enforcement before an insert into `ttl`.
    ///
    /// Active and stable classes evict their lowest-importance (then oldest)
    /// live row, cascading its vector. A full permanent class demotes its
    /// oldest row to stable with a fresh 90-day expiry instead of refusing.
    async fn enforce_quota(&self, ttl: TtlClass) -> Result<()> {
        let Some(quota) = ttl.quota() else {
            return Ok(());
        };

        if ttl == TtlClass::Permanent {
            while self.decisions.count_live(ttl).await? >= quota {
                let Some(oldest) = self.decisions.oldest_permanent().await? else {
                    break;
                };
                self.decisions.demote_to_stable(&oldest.id).await?;
            }
            return Ok(());
        }

        while self.decisions.count_live(ttl).await? >= quota {
            let Some(victim) = self.decisions.eviction_candidate(ttl).await? else {
                break;
            };
            self.vectors.delete_for_decision(&victim.id).await?;
            self.decisions.delete(&victim.id).await?;
            debug!(id = %victim.id, class = %ttl, "evicted decision for quota");
        }
        Ok(())
    }

    /// Build the context payload for the next agent turn, applying pressure
    /// gating and the injection cooldown. `None` means nothing is injected.
    pub async fn build_recall_payload(&self, prompt: &str) -> Result<Option<String>> {
        let budget = self
            .pressure
            .lock()
            .effective_budget(self.config.injection_budget);
        if budget == 0 {
            debug!("recall suppressed by context pressure");
            return Ok(None);
        }

        let pools = self.fetch_pools(prompt).await;
        let Some(payload) = recall::compose_context(prompt, &pools, budget) else {
            return Ok(None);
        };

        if self.cooldown.lock().check_and_record(&payload) {
            debug!("recall suppressed by injection cooldown");
            return Ok(None);
        }
        Ok(Some(payload))
    }

    /// Fetch the candidate pools; store failures degrade to empty pools.
    async fn fetch_pools(&self, prompt: &str) -> RecallPools {
        let permanent = self
            .decisions
            .permanent_facts(PERMANENT_POOL_LIMIT)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "permanent pool query failed");
                Vec::new()
            });

        let fts = match recall::fts_keywords(prompt) {
            Some(expr) => {
                let limit = self.config.max_recall_results.min(10);
                self.decisions
                    .fts_search(&expr, limit)
                    .await
                    .unwrap_or_else(|e| {
                        warn!(error = %e, "full-text pool query failed");
                        Vec::new()
                    })
            }
            None => Vec::new(),
        };

        let recent = self
            .decisions
            .recent_important(RECENT_POOL_LIMIT)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "recent pool query failed");
                Vec::new()
            });

        let vector = match &self.embeddings {
            Some(embeddings) => {
                embeddings
                    .search(
                        prompt,
                        VECTOR_POOL_LIMIT,
                        self.config.vector_similarity_threshold,
                    )
                    .await
            }
            None => Vec::new(),
        };

        RecallPools {
            permanent,
            fts,
            recent,
            vector,
        }
    }

    /// Run one consolidation pass.
    pub async fn consolidate(&self) -> Result<ConsolidationReport> {
        consolidate::consolidate(&self.decisions, &self.vectors).await
    }

    /// Feed one context-pressure sample.
    pub fn observe_pressure(&self, estimated_tokens: u64) -> PressureLevel {
        self.pressure
            .lock()
            .observe(estimated_tokens, self.config.context_token_cap)
    }

    /// Pre-compaction: keep permanent rows warm.
    pub async fn before_compaction(&self) -> Result<u64> {
        self.decisions.touch_permanent().await
    }

    /// Post-compaction: clear the cooldown ring and reset pressure.
    pub fn after_compaction(&self) {
        self.cooldown.lock().clear();
        self.pressure.lock().reset();
    }
}
