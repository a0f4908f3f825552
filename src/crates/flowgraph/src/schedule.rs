//! Ready-set, skip-set, and completion analysis.
//!
//! A pending step becomes *ready* when its join condition over completed
//! parents is satisfied, and *skippable* when all parents are terminal and
//! the join can no longer be satisfied. The two sets are disjoint by
//! construction.

use crate::graph::{StepGraph, StepId, StepStatus};

/// Pipeline-level outcome derived from step statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// At least one step is non-terminal.
    Running,
    /// Every step is terminal and none failed.
    Complete,
    /// Every step is terminal and at least one failed.
    Failed,
}

impl StepGraph {
    /// Whether the `(parent, child)` edge is satisfied: the parent completed
    /// and its condition holds against the parent's output.
    fn edge_satisfied(&self, parent: StepId, child: StepId) -> bool {
        let parent_node = self.node(parent);
        parent_node.status == StepStatus::Complete
            && self
                .condition(parent, child)
                .evaluate(parent_node.output.as_deref())
    }

    /// Steps currently eligible for dispatch.
    ///
    /// A step is ready iff it is pending and either a root, or its join is
    /// satisfied: AND-joins need every parent complete with its edge
    /// condition true; OR-joins need at least one.
    pub fn ready_set(&self) -> Vec<StepId> {
        (0..self.len())
            .map(StepId)
            .filter(|&id| self.is_ready(id))
            .collect()
    }

    fn is_ready(&self, id: StepId) -> bool {
        let node = self.node(id);
        if node.status != StepStatus::Pending {
            return false;
        }
        let parents = self.parents_of(id);
        if parents.is_empty() {
            return true;
        }
        if node.depends_on_all {
            parents.iter().all(|&p| self.edge_satisfied(p, id))
        } else {
            parents.iter().any(|&p| self.edge_satisfied(p, id))
        }
    }

    /// Pending steps whose join can never be satisfied.
    ///
    /// All parents must already be terminal. An AND-join is dead when any
    /// parent is non-complete or any edge condition is false; an OR-join is
    /// dead when no completed parent satisfies its condition.
    pub fn skip_set(&self) -> Vec<StepId> {
        (0..self.len())
            .map(StepId)
            .filter(|&id| self.is_skippable(id))
            .collect()
    }

    fn is_skippable(&self, id: StepId) -> bool {
        let node = self.node(id);
        if node.status != StepStatus::Pending {
            return false;
        }
        let parents = self.parents_of(id);
        if parents.is_empty() || !parents.iter().all(|&p| self.node(p).status.is_terminal()) {
            return false;
        }
        if node.depends_on_all {
            parents.iter().any(|&p| !self.edge_satisfied(p, id))
        } else {
            !parents.iter().any(|&p| self.edge_satisfied(p, id))
        }
    }

    /// Pipeline status from step statuses: running until every step is
    /// terminal, then failed if any step failed, otherwise complete.
    pub fn completion(&self) -> PipelineOutcome {
        if self.nodes().iter().any(|n| !n.status.is_terminal()) {
            return PipelineOutcome::Running;
        }
        if self
            .nodes()
            .iter()
            .any(|n| n.status == StepStatus::Failed)
        {
            PipelineOutcome::Failed
        } else {
            PipelineOutcome::Complete
        }
    }
}
