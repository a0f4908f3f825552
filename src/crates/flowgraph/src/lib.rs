//! # Flowgraph - Pipeline DAG Engine
//!
//! Pure in-memory directed-acyclic-graph reasoning for pipeline steps.
//! This crate has zero database access and zero async: callers load step and
//! edge rows from wherever they live, build a [`StepGraph`], and ask topology
//! questions against it. The graph is short-lived and rebuilt per operation.
//!
//! ## Responsibilities
//!
//! - **Build** - index steps by id and name, compute adjacency and roots
//! - **Validate** - structural rules for newly created pipelines
//! - **Analyze** - cycle detection, topological sort, ready/skip sets,
//!   completion status
//! - **Conditions** - evaluate edge conditions against parent outputs
//!
//! ## Example
//!
//! ```rust
//! use flowgraph::{EdgeCondition, GraphEdge, StepGraph, StepNode, StepType};
//!
//! let steps = vec![
//!     StepNode::new("a", "fetch", StepType::Task),
//!     StepNode::new("b", "summarize", StepType::Task),
//! ];
//! let edges = vec![GraphEdge::new("a", "b", EdgeCondition::Unconditional)];
//!
//! let graph = StepGraph::build(steps, edges);
//! assert!(graph.validate(None).ok);
//! assert_eq!(graph.ready_set().len(), 1); // only the root is ready
//! ```

pub mod condition;
pub mod error;
pub mod graph;
pub mod schedule;
pub mod validate;

pub use condition::EdgeCondition;
pub use error::{GraphError, Result};
pub use graph::{GraphEdge, StepGraph, StepId, StepNode, StepStatus, StepType};
pub use schedule::PipelineOutcome;
pub use validate::ValidationReport;
