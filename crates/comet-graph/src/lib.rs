//! Dependency graph used to order addon activation and deactivation.
//!
//! Nodes are addon ids. Edges point from a node that must be handled first
//! to a node that must be handled after it, so `topo()` yields a valid
//! processing order. Output is deterministic: ties are broken by the order
//! in which nodes were first added.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("dependency cycle between addons: {}", nodes.join(", "))]
    Cycle { nodes: Vec<String> },
}

/// Directed graph over string ids with insertion-ordered, duplicate-free
/// edges.
#[derive(Debug, Default)]
pub struct DepGraph {
    nodes: Vec<String>,
    index: HashMap<String, usize>,
    edges: Vec<Vec<usize>>,
}

impl DepGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node if it is not already present. Returns its index.
    pub fn add_node(&mut self, id: &str) -> usize {
        if let Some(&idx) = self.index.get(id) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(id.to_string());
        self.index.insert(id.to_string(), idx);
        self.edges.push(Vec::new());
        idx
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Add an edge `from -> to`, creating missing endpoints. `from` sorts
    /// before `to` in `topo()`. Returns false when the edge already existed.
    pub fn add_edge(&mut self, from: &str, to: &str) -> bool {
        let from_idx = self.add_node(from);
        let to_idx = self.add_node(to);
        if self.edges[from_idx].contains(&to_idx) {
            return false;
        }
        self.edges[from_idx].push(to_idx);
        true
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Topological order via Kahn's algorithm.
    ///
    /// Every node appears exactly once. When the graph contains a cycle the
    /// error lists the nodes that could not be ordered.
    pub fn topo(&self) -> Result<Vec<String>, GraphError> {
        let mut indegree = vec![0usize; self.nodes.len()];
        for targets in &self.edges {
            for &to in targets {
                indegree[to] += 1;
            }
        }

        // Min-heap over node indices keeps ties in insertion order.
        let mut ready: BinaryHeap<Reverse<usize>> = indegree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut ordered = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(idx)) = ready.pop() {
            ordered.push(self.nodes[idx].clone());
            for &to in &self.edges[idx] {
                indegree[to] -= 1;
                if indegree[to] == 0 {
                    ready.push(Reverse(to));
                }
            }
        }

        if ordered.len() != self.nodes.len() {
            let emitted: HashSet<&str> = ordered.iter().map(String::as_str).collect();
            let nodes = self
                .nodes
                .iter()
                .filter(|id| !emitted.contains(id.as_str()))
                .cloned()
                .collect();
            return Err(GraphError::Cycle { nodes });
        }
        Ok(ordered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topo_orders_dependencies_first() {
        let mut graph = DepGraph::new();
        graph.add_edge("base", "middle");
        graph.add_edge("middle", "top");
        graph.add_edge("base", "top");

        let order = graph.topo().expect("graph is acyclic");
        assert_eq!(order, vec!["base", "middle", "top"]);
    }

    #[test]
    fn test_topo_is_deterministic_on_ties() {
        let mut graph = DepGraph::new();
        graph.add_node("c");
        graph.add_node("a");
        graph.add_node("b");

        let order = graph.topo().expect("no edges, no cycle");
        // Insertion order, not alphabetical.
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_duplicate_edges_collapse() {
        let mut graph = DepGraph::new();
        assert!(graph.add_edge("a", "b"));
        assert!(!graph.add_edge("a", "b"));
        assert_eq!(graph.len(), 2);

        let order = graph.topo().expect("acyclic");
        assert_eq!(order, vec!["a", "b"]);
    }

    #[test]
    fn test_add_node_is_idempotent() {
        let mut graph = DepGraph::new();
        let first = graph.add_node("a");
        let second = graph.add_node("a");
        assert_eq!(first, second);
        assert_eq!(graph.len(), 1);
        assert!(graph.has_node("a"));
        assert!(!graph.has_node("b"));
    }

    #[test]
    fn test_cycle_reports_members() {
        let mut graph = DepGraph::new();
        graph.add_edge("root", "a");
        graph.add_edge("a", "b");
        graph.add_edge("b", "a");

        let err = graph.topo().expect_err("a <-> b is a cycle");
        let GraphError::Cycle { nodes } = err;
        assert_eq!(nodes, vec!["a", "b"]);
    }

    #[test]
    fn test_empty_graph() {
        let graph = DepGraph::new();
        assert!(graph.is_empty());
        assert_eq!(graph.topo().expect("empty is fine"), Vec::<String>::new());
    }
}
