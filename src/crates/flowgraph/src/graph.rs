//! Core graph data structures.
//!
//! A [`StepGraph`] is built from flat step and edge lists loaded from the
//! store. Steps live in a flat `Vec` addressed by [`StepId`] indices, with
//! adjacency kept as index vectors rather than pointer-based nodes; the graph
//! is cheap to rebuild and is rebuilt for every engine operation.

use crate::condition::EdgeCondition;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Index of a step inside a [`StepGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepId(pub usize);

/// Step type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    /// A unit of work dispatched to an executor.
    Task,
    /// A branching point; must keep at least one unconditional outgoing edge.
    Decision,
    /// A notification step.
    Notify,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Decision => "decision",
            Self::Notify => "notify",
        }
    }
}

impl From<&str> for StepType {
    fn from(s: &str) -> Self {
        match s {
            "decision" => Self::Decision,
            "notify" => Self::Notify,
            _ => Self::Task,
        }
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Step status enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Waiting for parents to finish.
    Pending,
    /// Eligible for dispatch.
    Ready,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Complete,
    /// Exhausted its retries.
    Failed,
    /// Short-circuited; its branch can never be satisfied.
    Skipped,
    /// Cancelled along with its pipeline.
    Cancelled,
    /// Waiting on external input.
    Paused,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
            Self::Paused => "paused",
        }
    }

    /// Terminal statuses can never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete | Self::Failed | Self::Skipped | Self::Cancelled
        )
    }
}

impl From<&str> for StepStatus {
    fn from(s: &str) -> Self {
        match s {
            "ready" => Self::Ready,
            "running" => Self::Running,
            "complete" => Self::Complete,
            "failed" => Self::Failed,
            "skipped" => Self::Skipped,
            "cancelled" => Self::Cancelled,
            "paused" => Self::Paused,
            _ => Self::Pending,
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A step as the graph sees it. The engine maps its step rows into these.
#[derive(Debug, Clone)]
pub struct StepNode {
    /// Opaque step id (the row id).
    pub id: String,
    /// Step name, unique within its pipeline.
    pub name: String,
    pub step_type: StepType,
    pub status: StepStatus,
    /// AND-join when true: all parents must satisfy their edges.
    /// OR-join when false: one satisfied parent suffices.
    pub depends_on_all: bool,
    /// Output artifact of a completed step, input to condition evaluation.
    pub output: Option<String>,
}

impl StepNode {
    /// Create a pending AND-join node with no output.
    pub fn new(id: impl Into<String>, name: impl Into<String>, step_type: StepType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            step_type,
            status: StepStatus::Pending,
            depends_on_all: true,
            output: None,
        }
    }

    pub fn with_status(mut self, status: StepStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn or_join(mut self) -> Self {
        self.depends_on_all = false;
        self
    }
}

/// An edge as loaded from the store: parent and child step ids plus an
/// optional condition.
#[derive(Debug, Clone)]
pub struct GraphEdge {
    pub parent_id: String,
    pub child_id: String,
    pub condition: EdgeCondition,
}

impl GraphEdge {
    pub fn new(
        parent_id: impl Into<String>,
        child_id: impl Into<String>,
        condition: EdgeCondition,
    ) -> Self {
        Self {
            parent_id: parent_id.into(),
            child_id: child_id.into(),
            condition,
        }
    }
}

/// The built graph: flat step table, name and id indexes, adjacency lists,
/// per-edge conditions, and the root set.
#[derive(Debug, Clone)]
pub struct StepGraph {
    pub(crate) nodes: Vec<StepNode>,
    pub(crate) index_by_id: HashMap<String, StepId>,
    pub(crate) index_by_name: HashMap<String, StepId>,
    pub(crate) children: Vec<Vec<StepId>>,
    pub(crate) parents: Vec<Vec<StepId>>,
    pub(crate) conditions: HashMap<(StepId, StepId), EdgeCondition>,
    pub(crate) roots: Vec<StepId>,
    /// Edges whose endpoints were not found among the steps. Build keeps the
    /// graph total; validation reports these.
    pub(crate) dangling_edges: Vec<(String, String)>,
}

impl StepGraph {
    /// Build a graph from step and edge lists.
    ///
    /// Edges referencing unknown step ids are recorded as dangling rather
    /// than dropped silently; `validate` flags them.
    pub fn build(steps: Vec<StepNode>, edges: Vec<GraphEdge>) -> Self {
        let mut index_by_id = HashMap::with_capacity(steps.len());
        let mut index_by_name = HashMap::with_capacity(steps.len());
        for (i, step) in steps.iter().enumerate() {
            index_by_id.insert(step.id.clone(), StepId(i));
            index_by_name.insert(step.name.clone(), StepId(i));
        }

        let mut children = vec![Vec::new(); steps.len()];
        let mut parents = vec![Vec::new(); steps.len()];
        let mut conditions = HashMap::new();
        let mut dangling_edges = Vec::new();

        for edge in edges {
            match (
                index_by_id.get(&edge.parent_id).copied(),
                index_by_id.get(&edge.child_id).copied(),
            ) {
                (Some(p), Some(c)) => {
                    children[p.0].push(c);
                    parents[c.0].push(p);
                    conditions.insert((p, c), edge.condition);
                }
                _ => dangling_edges.push((edge.parent_id, edge.child_id)),
            }
        }

        let roots = (0..steps.len())
            .filter(|&i| parents[i].is_empty())
            .map(StepId)
            .collect();

        Self {
            nodes: steps,
            index_by_id,
            index_by_name,
            children,
            parents,
            conditions,
            roots,
            dangling_edges,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: StepId) -> &StepNode {
        &self.nodes[id.0]
    }

    pub fn nodes(&self) -> &[StepNode] {
        &self.nodes
    }

    pub fn roots(&self) -> &[StepId] {
        &self.roots
    }

    pub fn children_of(&self, id: StepId) -> &[StepId] {
        &self.children[id.0]
    }

    pub fn parents_of(&self, id: StepId) -> &[StepId] {
        &self.parents[id.0]
    }

    /// Look up a step by its opaque id.
    pub fn by_id(&self, id: &str) -> Option<StepId> {
        self.index_by_id.get(id).copied()
    }

    /// Look up a step by name.
    pub fn by_name(&self, name: &str) -> Option<StepId> {
        self.index_by_name.get(name).copied()
    }

    /// Condition on the `(parent, child)` edge; unconditional when the edge
    /// exists without a payload.
    pub fn condition(&self, parent: StepId, child: StepId) -> &EdgeCondition {
        self.conditions
            .get(&(parent, child))
            .unwrap_or(&EdgeCondition::Unconditional)
    }

    /// Steps with no outgoing edges.
    pub fn leaves(&self) -> Vec<StepId> {
        (0..self.nodes.len())
            .filter(|&i| self.children[i].is_empty())
            .map(StepId)
            .collect()
    }
}
