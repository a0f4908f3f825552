//! Structural validation, cycle detection, and topological sort.

use crate::graph::{StepGraph, StepId, StepType};
use std::collections::VecDeque;

/// Default ceiling on pipeline size.
pub const DEFAULT_MAX_STEPS: usize = 50;

/// Result of validating a graph: an ok flag plus every rule violation found.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub ok: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            ok: errors.is_empty(),
            errors,
        }
    }
}

impl StepGraph {
    /// Validate the graph structure for pipeline creation.
    ///
    /// Rules: at least one step; step count within `max_steps` (default 50);
    /// at least one root and one leaf; acyclic; all steps reachable from a
    /// root; decision steps with children keep at least one unconditional
    /// outgoing edge; every edge references existing steps.
    pub fn validate(&self, max_steps: Option<usize>) -> ValidationReport {
        let mut errors = Vec::new();
        let max_steps = max_steps.unwrap_or(DEFAULT_MAX_STEPS);

        if self.is_empty() {
            errors.push("pipeline has no steps".to_string());
            return ValidationReport::from_errors(errors);
        }
        if self.len() > max_steps {
            errors.push(format!(
                "pipeline has {} steps; maximum is {}",
                self.len(),
                max_steps
            ));
        }

        for (parent, child) in &self.dangling_edges {
            errors.push(format!(
                "edge references unknown step: {} -> {}",
                parent, child
            ));
        }

        if self.roots.is_empty() {
            errors.push("pipeline has no root step (every step has a parent)".to_string());
        }
        if self.leaves().is_empty() {
            errors.push("pipeline has no leaf step (every step has a child)".to_string());
        }

        if let Some(path) = self.find_cycle() {
            errors.push(format!("cycle detected: {}", path.join(" -> ")));
        } else if !self.roots.is_empty() {
            // Reachability only makes sense on an acyclic graph with roots.
            let reachable = self.reachable_from_roots();
            for (i, node) in self.nodes.iter().enumerate() {
                if !reachable[i] {
                    errors.push(format!("step '{}' is unreachable from any root", node.name));
                }
            }
        }

        for (i, node) in self.nodes.iter().enumerate() {
            if node.step_type == StepType::Decision && !self.children[i].is_empty() {
                let has_default = self.children[i].iter().any(|&child| {
                    self.condition(StepId(i), child).is_unconditional()
                });
                if !has_default {
                    errors.push(format!(
                        "decision step '{}' has no unconditional outgoing edge (default path)",
                        node.name
                    ));
                }
            }
        }

        ValidationReport::from_errors(errors)
    }

    /// DFS three-coloring cycle detection.
    ///
    /// Returns the step names along the first back-edge's cycle, or `None`
    /// when the graph is acyclic.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut color = vec![Color::White; self.len()];

        // Iterative DFS; the stack holds (node, next-child-index) frames and
        // doubles as the gray path.
        for start in 0..self.len() {
            if color[start] != Color::White {
                continue;
            }
            let mut stack: Vec<(StepId, usize)> = vec![(StepId(start), 0)];
            color[start] = Color::Gray;

            while let Some(&(node, next)) = stack.last() {
                if next < self.children[node.0].len() {
                    let child = self.children[node.0][next];
                    stack.last_mut().expect("stack is non-empty").1 += 1;
                    match color[child.0] {
                        Color::White => {
                            color[child.0] = Color::Gray;
                            stack.push((child, 0));
                        }
                        Color::Gray => {
                            // Back edge: slice the gray path from the
                            // revisited node and close the loop.
                            let from =
                                stack.iter().position(|&(s, _)| s == child).unwrap_or(0);
                            let mut path: Vec<String> = stack[from..]
                                .iter()
                                .map(|&(s, _)| self.nodes[s.0].name.clone())
                                .collect();
                            path.push(self.nodes[child.0].name.clone());
                            return Some(path);
                        }
                        Color::Black => {}
                    }
                } else {
                    color[node.0] = Color::Black;
                    stack.pop();
                }
            }
        }
        None
    }

    /// Kahn's algorithm. Returns `None` when the graph has a cycle.
    pub fn topo_sort(&self) -> Option<Vec<StepId>> {
        let mut in_degree: Vec<usize> = self.parents.iter().map(Vec::len).collect();
        let mut queue: VecDeque<StepId> = (0..self.len())
            .filter(|&i| in_degree[i] == 0)
            .map(StepId)
            .collect();

        let mut order = Vec::with_capacity(self.len());
        while let Some(node) = queue.pop_front() {
            order.push(node);
            for &child in &self.children[node.0] {
                in_degree[child.0] -= 1;
                if in_degree[child.0] == 0 {
                    queue.push_back(child);
                }
            }
        }

        if order.len() == self.len() {
            Some(order)
        } else {
            None
        }
    }

    fn reachable_from_roots(&self) -> Vec<bool> {
        let mut seen = vec![false; self.len()];
        let mut queue: VecDeque<StepId> = self.roots.iter().copied().collect();
        for &root in &self.roots {
            seen[root.0] = true;
        }
        while let Some(node) = queue.pop_front() {
            for &child in &self.children[node.0] {
                if !seen[child.0] {
                    seen[child.0] = true;
                    queue.push_back(child);
                }
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::EdgeCondition;
    use crate::graph::{GraphEdge, StepNode};
    use proptest::prelude::*;

    fn node(id: &str, name: &str) -> StepNode {
        StepNode::new(id, name, StepType::Task)
    }

    fn edge(parent: &str, child: &str) -> GraphEdge {
        GraphEdge::new(parent, child, EdgeCondition::Unconditional)
    }

    #[test]
    fn test_empty_graph_fails_validation() {
        let g = StepGraph::build(vec![], vec![]);
        let report = g.validate(None);
        assert!(!report.ok);
        assert!(report.errors[0].contains("no steps"));
    }

    #[test]
    fn test_linear_graph_validates() {
        let g = StepGraph::build(
            vec![node("a", "a"), node("b", "b")],
            vec![edge("a", "b")],
        );
        assert!(g.validate(None).ok);
    }

    #[test]
    fn test_max_steps_enforced() {
        let steps: Vec<StepNode> = (0..3)
            .map(|i| node(&format!("s{}", i), &format!("step{}", i)))
            .collect();
        let edges = vec![edge("s0", "s1"), edge("s1", "s2")];
        let g = StepGraph::build(steps, edges);
        let report = g.validate(Some(2));
        assert!(!report.ok);
        assert!(report.errors.iter().any(|e| e.contains("maximum")));
    }

    #[test]
    fn test_cycle_is_detected_with_witness() {
        let g = StepGraph::build(
            vec![node("a", "a"), node("b", "b"), node("c", "c")],
            vec![edge("a", "b"), edge("b", "c"), edge("c", "b")],
        );
        let path = g.find_cycle().expect("cycle expected");
        // The witness starts and ends on the revisited node.
        assert_eq!(path.first(), path.last());
        assert!(g.topo_sort().is_none());
        assert!(!g.validate(None).ok);
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let g = StepGraph::build(vec![node("a", "a")], vec![edge("a", "a")]);
        assert!(g.find_cycle().is_some());
    }

    #[test]
    fn test_topo_sort_respects_edges() {
        let g = StepGraph::build(
            vec![node("a", "a"), node("b", "b"), node("c", "c"), node("d", "d")],
            vec![edge("a", "b"), edge("a", "c"), edge("b", "d"), edge("c", "d")],
        );
        let order = g.topo_sort().expect("acyclic");
        let pos = |name: &str| {
            let id = g.by_name(name).unwrap();
            order.iter().position(|&s| s == id).unwrap()
        };
        assert!(pos("a") < pos("b"));
        assert!(pos("a") < pos("c"));
        assert!(pos("b") < pos("d"));
        assert!(pos("c") < pos("d"));
    }

    #[test]
    fn test_decision_without_default_edge_fails() {
        let mut decision = node("a", "choose");
        decision.step_type = StepType::Decision;
        let g = StepGraph::build(
            vec![decision, node("b", "b"), node("c", "end")],
            vec![
                GraphEdge::new(
                    "a",
                    "b",
                    EdgeCondition::Contains("build_needed".to_string()),
                ),
                edge("b", "c"),
            ],
        );
        let report = g.validate(None);
        assert!(!report.ok);
        assert!(report.errors.iter().any(|e| e.contains("default path")));
    }

    #[test]
    fn test_decision_with_default_edge_passes() {
        let mut decision = node("a", "choose");
        decision.step_type = StepType::Decision;
        let g = StepGraph::build(
            vec![decision, node("b", "b"), node("c", "c")],
            vec![
                GraphEdge::new("a", "b", EdgeCondition::Contains("x".to_string())),
                edge("a", "c"),
            ],
        );
        assert!(g.validate(None).ok);
    }

    #[test]
    fn test_second_component_with_own_root_is_reachable() {
        let g = StepGraph::build(
            vec![node("a", "a"), node("b", "b"), node("x", "x"), node("y", "y")],
            vec![edge("a", "b"), edge("x", "y")],
        );
        assert!(g.validate(None).ok);
    }

    proptest! {
        /// Any forward-edge graph (parent index < child index) is acyclic:
        /// cycle detection finds nothing and the topological sort is a
        /// permutation respecting every edge.
        #[test]
        fn prop_forward_edges_are_acyclic(n in 2usize..12, edges in proptest::collection::vec((0usize..12, 0usize..12), 0..30)) {
            let steps: Vec<StepNode> = (0..n)
                .map(|i| StepNode::new(format!("id{}", i), format!("n{}", i), StepType::Task))
                .collect();
            let edge_list: Vec<GraphEdge> = edges
                .into_iter()
                .filter(|(a, b)| *a < *b && *b < n)
                .map(|(a, b)| GraphEdge::new(format!("id{}", a), format!("id{}", b), EdgeCondition::Unconditional))
                .collect();
            let g = StepGraph::build(steps, edge_list);

            prop_assert!(g.find_cycle().is_none());
            let order = g.topo_sort().expect("forward-edge graph must sort");
            prop_assert_eq!(order.len(), n);
            let mut position = vec![0usize; n];
            for (idx, step) in order.iter().enumerate() {
                position[step.0] = idx;
            }
            for i in 0..n {
                for &child in g.children_of(StepId(i)) {
                    prop_assert!(position[i] < position[child.0]);
                }
            }
        }

        /// Adding a back edge to a chain always produces a detectable cycle.
        #[test]
        fn prop_back_edge_creates_cycle(n in 2usize..10, back in 0usize..8) {
            let steps: Vec<StepNode> = (0..n)
                .map(|i| StepNode::new(format!("id{}", i), format!("n{}", i), StepType::Task))
                .collect();
            let mut edge_list: Vec<GraphEdge> = (0..n - 1)
                .map(|i| GraphEdge::new(format!("id{}", i), format!("id{}", i + 1), EdgeCondition::Unconditional))
                .collect();
            let target = back % (n - 1);
            edge_list.push(GraphEdge::new(
                format!("id{}", n - 1),
                format!("id{}", target),
                EdgeCondition::Unconditional,
            ));
            let g = StepGraph::build(steps, edge_list);

            prop_assert!(g.find_cycle().is_some());
            prop_assert!(g.topo_sort().is_none());
        }
    }
}
