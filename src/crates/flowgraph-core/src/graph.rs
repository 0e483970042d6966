//! Workflow graph: validation, deterministic scheduling, terminal queries
//!
//! Builds an adjacency view over the payload's nodes and edges, validates
//! structural invariants (existing endpoints, unique ids), and produces a
//! deterministic linear execution order via Kahn's algorithm.
//!
//! # Determinism
//!
//! The ready queue is seeded from all in-degree-0 nodes sorted
//! lexicographically by id, and every batch of nodes that becomes ready
//! within one step is appended in id order. This tie-break is load-bearing:
//! it guarantees context nodes with smaller ids run before other roots of
//! equal depth, which downstream state reads rely on.
//!
//! # Deferred nodes
//!
//! A node is *deferred* when it has at least one outgoing edge and every
//! successor is a guard node (`retry`, `timeout`, `try_catch`, `parallel`,
//! `join`, `cache`, `for_each`, `while_loop`) or itself deferred. Deferred
//! nodes are skipped by the root execution loop; the guard executes its
//! deferred predecessor chain on demand — per attempt, per iteration, per
//! branch, or on cache miss.

use crate::error::{EngineError, Result};
use crate::payload::{Edge, NodeType, Payload};
use std::collections::{HashMap, HashSet, VecDeque};

/// Adjacency view over a validated workflow payload.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    /// Node ids in payload insertion order
    node_ids: Vec<String>,
    /// Edges in payload insertion order
    edges: Vec<Edge>,
    /// Incoming edge indices per node, in edge insertion order
    incoming: HashMap<String, Vec<usize>>,
    /// Outgoing edge indices per node, in edge insertion order
    outgoing: HashMap<String, Vec<usize>>,
}

impl WorkflowGraph {
    /// Build and validate the graph: every edge endpoint must exist and
    /// node ids must be unique. Cycle detection happens in
    /// [`topological_order`](Self::topological_order).
    pub fn from_payload(payload: &Payload) -> Result<Self> {
        let mut node_ids = Vec::with_capacity(payload.nodes.len());
        let mut seen = HashSet::new();
        for node in &payload.nodes {
            if !seen.insert(node.id.clone()) {
                return Err(EngineError::missing_field(
                    &node.id,
                    "duplicate node id in payload",
                ));
            }
            node_ids.push(node.id.clone());
        }

        let mut incoming: HashMap<String, Vec<usize>> = HashMap::new();
        let mut outgoing: HashMap<String, Vec<usize>> = HashMap::new();
        for id in &node_ids {
            incoming.insert(id.clone(), Vec::new());
            outgoing.insert(id.clone(), Vec::new());
        }

        for (idx, edge) in payload.edges.iter().enumerate() {
            if !seen.contains(&edge.source) {
                return Err(EngineError::missing_field(
                    &edge.id,
                    format!("edge source '{}' does not exist", edge.source),
                ));
            }
            if !seen.contains(&edge.target) {
                return Err(EngineError::missing_field(
                    &edge.id,
                    format!("edge target '{}' does not exist", edge.target),
                ));
            }
            outgoing.get_mut(&edge.source).unwrap().push(idx);
            incoming.get_mut(&edge.target).unwrap().push(idx);
        }

        Ok(Self {
            node_ids,
            edges: payload.edges.clone(),
            incoming,
            outgoing,
        })
    }

    pub fn node_count(&self) -> usize {
        self.node_ids.len()
    }

    pub fn node_ids(&self) -> &[String] {
        &self.node_ids
    }

    /// Source node ids feeding `id`, in edge insertion order.
    ///
    /// The position in this list is the input ordinal the executors use.
    pub fn predecessors(&self, id: &str) -> Vec<&str> {
        self.incoming
            .get(id)
            .map(|idxs| idxs.iter().map(|&i| self.edges[i].source.as_str()).collect())
            .unwrap_or_default()
    }

    /// Target node ids fed by `id`, in edge insertion order.
    pub fn successors(&self, id: &str) -> Vec<&str> {
        self.outgoing
            .get(id)
            .map(|idxs| idxs.iter().map(|&i| self.edges[i].target.as_str()).collect())
            .unwrap_or_default()
    }

    /// Nodes with no outgoing edges, sorted by id.
    pub fn terminals(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self
            .node_ids
            .iter()
            .filter(|id| self.outgoing.get(*id).map(Vec::is_empty).unwrap_or(true))
            .map(String::as_str)
            .collect();
        out.sort_unstable();
        out
    }

    /// Kahn's algorithm with a lexicographic tie-break.
    ///
    /// Returns `CycleDetected` when the produced order is shorter than the
    /// node count.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let mut in_degree: HashMap<&str, usize> = self
            .node_ids
            .iter()
            .map(|id| (id.as_str(), self.incoming[id].len()))
            .collect();

        let mut roots: Vec<&str> = in_degree
            .iter()
            .filter(|&(_, &deg)| deg == 0)
            .map(|(&id, _)| id)
            .collect();
        roots.sort_unstable();

        let mut queue: VecDeque<&str> = roots.into_iter().collect();
        let mut order = Vec::with_capacity(self.node_ids.len());

        while let Some(id) = queue.pop_front() {
            order.push(id.to_string());

            // Collect neighbours that become ready in this step, then
            // append them in id order so the schedule stays deterministic.
            let mut batch = Vec::new();
            for next in self.successors(id) {
                let deg = in_degree.get_mut(next).unwrap();
                *deg -= 1;
                if *deg == 0 {
                    batch.push(next);
                }
            }
            batch.sort_unstable();
            batch.dedup();
            queue.extend(batch);
        }

        if order.len() != self.node_ids.len() {
            return Err(EngineError::CycleDetected);
        }
        Ok(order)
    }

    /// Compute the deferred-node set given each node's resolved type.
    ///
    /// Processed in reverse topological order so that "successor is
    /// deferred" is already known when a node is examined.
    pub fn deferred_set(&self, types: &HashMap<String, NodeType>) -> Result<HashSet<String>> {
        let order = self.topological_order()?;
        let mut deferred: HashSet<String> = HashSet::new();

        for id in order.iter().rev() {
            let succs = self.successors(id);
            if succs.is_empty() {
                continue;
            }
            let all_guarded = succs.iter().all(|s| {
                deferred.contains(*s)
                    || types.get(*s).map(NodeType::is_guard).unwrap_or(false)
            });
            if all_guarded {
                deferred.insert(id.clone());
            }
        }
        Ok(deferred)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Node;
    use serde_json::json;

    fn payload(nodes: &[&str], edges: &[(&str, &str)]) -> Payload {
        Payload {
            nodes: nodes
                .iter()
                .map(|id| Node {
                    id: id.to_string(),
                    node_type: None,
                    data: serde_json::from_value(json!({"value": 1})).unwrap(),
                })
                .collect(),
            edges: edges
                .iter()
                .enumerate()
                .map(|(i, (s, t))| Edge {
                    id: format!("e{}", i),
                    source: s.to_string(),
                    target: t.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_topological_order_respects_edges() {
        let graph =
            WorkflowGraph::from_payload(&payload(&["1", "2", "3"], &[("1", "3"), ("2", "3")]))
                .unwrap();
        let order = graph.topological_order().unwrap();
        assert_eq!(order, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_roots_sorted_lexicographically() {
        // "b" and "a" are both roots; "a" must run first regardless of
        // payload order.
        let graph = WorkflowGraph::from_payload(&payload(&["b", "a", "z"], &[("b", "z")])).unwrap();
        let order = graph.topological_order().unwrap();
        assert_eq!(order, vec!["a", "b", "z"]);
    }

    #[test]
    fn test_cycle_detected() {
        let graph =
            WorkflowGraph::from_payload(&payload(&["1", "2"], &[("1", "2"), ("2", "1")])).unwrap();
        assert!(matches!(
            graph.topological_order(),
            Err(EngineError::CycleDetected)
        ));
    }

    #[test]
    fn test_edge_to_missing_node_rejected() {
        let result = WorkflowGraph::from_payload(&payload(&["1"], &[("1", "ghost")]));
        assert!(matches!(result, Err(EngineError::MissingField { .. })));
    }

    #[test]
    fn test_duplicate_node_id_rejected() {
        let result = WorkflowGraph::from_payload(&payload(&["1", "1"], &[]));
        assert!(matches!(result, Err(EngineError::MissingField { .. })));
    }

    #[test]
    fn test_predecessor_order_is_edge_insertion_order() {
        let graph =
            WorkflowGraph::from_payload(&payload(&["a", "b", "c"], &[("b", "c"), ("a", "c")]))
                .unwrap();
        // "b" comes first because its edge was inserted first.
        assert_eq!(graph.predecessors("c"), vec!["b", "a"]);
    }

    #[test]
    fn test_terminals_sorted() {
        let graph =
            WorkflowGraph::from_payload(&payload(&["z", "m", "a"], &[("a", "m"), ("a", "z")]))
                .unwrap();
        assert_eq!(graph.terminals(), vec!["m", "z"]);
    }

    #[test]
    fn test_deferred_set_transitive() {
        // a -> b -> retry: both a and b feed (transitively) only the guard.
        let graph =
            WorkflowGraph::from_payload(&payload(&["a", "b", "r"], &[("a", "b"), ("b", "r")]))
                .unwrap();
        let mut types = HashMap::new();
        types.insert("a".to_string(), NodeType::Number);
        types.insert("b".to_string(), NodeType::Operation);
        types.insert("r".to_string(), NodeType::Retry);
        let deferred = graph.deferred_set(&types).unwrap();
        assert!(deferred.contains("a"));
        assert!(deferred.contains("b"));
        assert!(!deferred.contains("r"));
    }

    #[test]
    fn test_shared_predecessor_not_deferred() {
        // a feeds both the guard and a plain node; it must run eagerly.
        let graph = WorkflowGraph::from_payload(&payload(
            &["a", "r", "v"],
            &[("a", "r"), ("a", "v")],
        ))
        .unwrap();
        let mut types = HashMap::new();
        types.insert("a".to_string(), NodeType::Number);
        types.insert("r".to_string(), NodeType::Retry);
        types.insert("v".to_string(), NodeType::Visualization);
        let deferred = graph.deferred_set(&types).unwrap();
        assert!(!deferred.contains("a"));
    }
}
