//! Consolidation: deduplicate facts and sweep debris.
//!
//! Live rows sharing an (entity, key) pair collapse to the one with the
//! latest access, which gains a small importance boost. Vectors belonging to
//! removed rows go with them, expired rows are dropped, and any remaining
//! orphan vectors are swept.

use crate::error::Result;
use crate::repositories::{DecisionRepository, VectorRepository};
use tracing::{debug, info};

/// Importance boost applied to the surviving row.
const SURVIVOR_BOOST: f64 = 0.05;

/// Importance ceiling after boosting.
const IMPORTANCE_CAP: f64 = 0.95;

/// Counters from one consolidation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsolidationReport {
    pub groups: usize,
    pub removed: usize,
    pub expired: usize,
    pub orphan_vectors: usize,
}

/// Run one consolidation pass.
pub async fn consolidate(
    decisions: &DecisionRepository,
    vectors: &VectorRepository,
) -> Result<ConsolidationReport> {
    let mut report = ConsolidationReport::default();

    for (entity, key) in decisions.duplicate_fact_groups().await? {
        let group = decisions.fact_group(&entity, &key).await?;
        let Some((survivor, duplicates)) = group.split_first() else {
            continue;
        };
        report.groups += 1;

        let boosted = (survivor.importance + SURVIVOR_BOOST).min(IMPORTANCE_CAP);
        decisions.update_importance(&survivor.id, boosted).await?;

        for duplicate in duplicates {
            vectors.delete_for_decision(&duplicate.id).await?;
            decisions.delete(&duplicate.id).await?;
            report.removed += 1;
        }
        debug!(entity = %entity, key = %key, removed = duplicates.len(), "consolidated fact group");
    }

    report.expired = decisions.delete_expired().await? as usize;
    report.orphan_vectors = vectors.sweep_orphans().await? as usize;

    info!(
        groups = report.groups,
        removed = report.removed,
        expired = report.expired,
        orphans = report.orphan_vectors,
        "consolidation pass finished"
    );
    Ok(report)
}
