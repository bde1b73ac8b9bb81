//! Graph validation and adjacency. Run validation before executing a graph.
//!
//! Rules enforced by [`validate_graph`]:
//! 1. Node IDs must be unique within the graph.
//! 2. Every edge must reference valid node IDs (both `source` and `target`).
//! 3. Trigger nodes of known types and all action nodes must carry
//!    well-formed metadata.
//!
//! Cycles are *not* rejected here: the executor bounds traversal depth
//! instead. [`is_acyclic`] is available for tooling that wants to warn.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::GraphError;
use crate::models::{NodeRole, WorkflowGraph};

/// Validate node IDs, edge endpoints and node metadata.
///
/// # Errors
/// - [`GraphError::DuplicateNodeId`] if two nodes share an ID.
/// - [`GraphError::UnknownNodeReference`] if an edge references a missing node.
/// - [`GraphError::InvalidMetadata`] if a node's parameters don't parse.
pub fn validate_graph(graph: &WorkflowGraph) -> Result<(), GraphError> {
    // -----------------------------------------------------------------------
    // 1. Ensure node IDs are unique
    // -----------------------------------------------------------------------
    let mut seen_ids: HashSet<&str> = HashSet::new();
    for node in &graph.nodes {
        if !seen_ids.insert(node.id.as_str()) {
            return Err(GraphError::DuplicateNodeId(node.id.clone()));
        }
    }

    // -----------------------------------------------------------------------
    // 2. Validate edge endpoints
    // -----------------------------------------------------------------------
    for edge in &graph.edges {
        for (node_id, side) in [(&edge.source, "source"), (&edge.target, "target")] {
            if !seen_ids.contains(node_id.as_str()) {
                return Err(GraphError::UnknownNodeReference {
                    edge_id: edge.id.clone(),
                    node_id: node_id.clone(),
                    side,
                });
            }
        }
    }

    // -----------------------------------------------------------------------
    // 3. Node metadata
    // -----------------------------------------------------------------------
    for node in &graph.nodes {
        match node.role {
            NodeRole::Trigger => {
                node.trigger_spec()?;
            }
            NodeRole::Action => {
                node.order_request()?;
            }
        }
    }

    Ok(())
}

/// Outgoing-edge lookup, preserving edge order per source node.
#[derive(Debug, Default)]
pub struct Adjacency<'a> {
    successors: HashMap<&'a str, Vec<&'a str>>,
}

impl<'a> Adjacency<'a> {
    pub fn new(graph: &'a WorkflowGraph) -> Self {
        let mut successors: HashMap<&'a str, Vec<&'a str>> = HashMap::new();
        for edge in &graph.edges {
            successors
                .entry(edge.source.as_str())
                .or_default()
                .push(edge.target.as_str());
        }
        Self { successors }
    }

    /// Targets of every edge leaving `node_id`, one entry per edge.
    pub fn successors(&self, node_id: &str) -> &[&'a str] {
        self.successors
            .get(node_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// IDs of every node reachable from `start` (excluding `start` itself unless
/// it lies on a cycle), in breadth-first discovery order.
pub fn reachable_from<'a>(graph: &'a WorkflowGraph, start: &str) -> Vec<&'a str> {
    let adjacency = Adjacency::new(graph);
    let mut seen: HashSet<&'a str> = HashSet::new();
    let mut order = Vec::new();
    let mut queue: VecDeque<&'a str> = adjacency.successors(start).iter().copied().collect();

    while let Some(id) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        order.push(id);
        queue.extend(adjacency.successors(id).iter().copied());
    }

    order
}

/// `true` when the graph has no directed cycle (Kahn's algorithm).
pub fn is_acyclic(graph: &WorkflowGraph) -> bool {
    let adjacency = Adjacency::new(graph);
    let mut in_degree: HashMap<&str, usize> =
        graph.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
    for edge in &graph.edges {
        *in_degree.entry(edge.target.as_str()).or_insert(0) += 1;
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut visited = 0usize;

    while let Some(id) = queue.pop_front() {
        visited += 1;
        for next in adjacency.successors(id) {
            if let Some(deg) = in_degree.get_mut(next) {
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(*next);
                }
            }
        }
    }

    visited == in_degree.len()
}
