//! Workflow execution engine.
//!
//! `DagExecutor` runs the action subgraph reachable from a fired trigger:
//! 1. Validates the graph (IDs, edge endpoints, node metadata).
//! 2. From the current node, follows every outgoing edge concurrently.
//! 3. Dispatches each action node through the `ConnectorRegistry`, and only
//!    once that dispatch has succeeded expands the node's own successors.
//! 4. A failed dispatch ends its branch; sibling branches carry on.
//! 5. Every visit is recorded in the `ExecutionReport`.
//!
//! Each branch carries the path that led to it. Reaching a node already on
//! that path ends the branch with `CycleDetected`, so a looping graph costs
//! one extra visit per branch. `ExecutorConfig::max_depth` caps path length
//! as a backstop.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{join_all, BoxFuture, FutureExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use connectors::ConnectorRegistry;

use crate::dag::{validate_graph, Adjacency};
use crate::error::GraphError;
use crate::models::{NodeRole, WorkflowGraph, WorkflowNode};
use crate::report::{DispatchError, ExecutionReport, NodeOutcome};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Deepest node, counted in edges from the start node, that may be
    /// visited on a single path.
    pub max_depth: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { max_depth: 64 }
    }
}

// ---------------------------------------------------------------------------
// Per-run traversal state
// ---------------------------------------------------------------------------

struct Traversal<'a> {
    nodes: HashMap<&'a str, &'a WorkflowNode>,
    adjacency: Adjacency<'a>,
    cancel: &'a CancellationToken,
}

// ---------------------------------------------------------------------------
// DagExecutor
// ---------------------------------------------------------------------------

/// Stateless orchestrator that runs a single workflow execution.
///
/// Construct one executor per process and call [`DagExecutor::execute`]
/// for every claimed run.
#[derive(Debug)]
pub struct DagExecutor {
    registry: Arc<ConnectorRegistry>,
    config: ExecutorConfig,
}

impl DagExecutor {
    /// Create a new executor.
    pub fn new(registry: Arc<ConnectorRegistry>, config: ExecutorConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Execute every action reachable from `start_node_id`.
    ///
    /// Cancelling `cancel` stops further expansion; orders already sent are
    /// not recalled.
    ///
    /// # Errors
    /// Returns `GraphError` if the graph is malformed or the start node is
    /// missing. Dispatch failures are not errors: they are folded into the
    /// returned report.
    #[instrument(skip(self, graph, cancel), fields(workflow_id = %graph.id))]
    pub async fn execute(
        &self,
        graph: &WorkflowGraph,
        start_node_id: &str,
        execution_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport, GraphError> {
        validate_graph(graph)?;
        if graph.node(start_node_id).is_none() {
            return Err(GraphError::UnknownStartNode(start_node_id.to_owned()));
        }

        let traversal = Traversal {
            nodes: graph.nodes.iter().map(|n| (n.id.as_str(), n)).collect(),
            adjacency: Adjacency::new(graph),
            cancel,
        };

        let per_node = self
            .expand(&traversal, start_node_id, vec![start_node_id])
            .await;
        let report = ExecutionReport::new(execution_id, graph.id, per_node);

        info!(
            status = %report.overall_status,
            visited = report.per_node.len(),
            failed = report.failures().count(),
            "execution finished"
        );
        Ok(report)
    }

    /// Run every branch leaving `current` concurrently and concatenate their
    /// outcomes in edge order. `path` ends with `current`.
    fn expand<'a>(
        &'a self,
        traversal: &'a Traversal<'a>,
        current: &'a str,
        path: Vec<&'a str>,
    ) -> BoxFuture<'a, Vec<NodeOutcome>> {
        async move {
            let branches = traversal
                .adjacency
                .successors(current)
                .iter()
                .map(|&target| self.run_branch(traversal, target, path.clone()));

            join_all(branches).await.into_iter().flatten().collect()
        }
        .boxed()
    }

    /// Visit `node_id`, then (if the visit didn't fail) everything below it.
    async fn run_branch<'a>(
        &'a self,
        traversal: &'a Traversal<'a>,
        node_id: &'a str,
        mut path: Vec<&'a str>,
    ) -> Vec<NodeOutcome> {
        let Some(node) = traversal.nodes.get(node_id).copied() else {
            // validate_graph guarantees every edge target resolves.
            return Vec::new();
        };

        // Edges from the start node lead to depth 1.
        let depth = path.len();
        if path.contains(&node_id) {
            warn!(node_id, depth, "branch revisits a node on its own path");
            return vec![NodeOutcome::failed(
                node,
                DispatchError::CycleDetected { node_id: node_id.to_owned(), depth },
            )];
        }
        if depth > self.config.max_depth {
            warn!(node_id, depth, max_depth = self.config.max_depth, "traversal depth exceeded");
            return vec![NodeOutcome::failed(
                node,
                DispatchError::DepthExceeded { depth, max_depth: self.config.max_depth },
            )];
        }

        if traversal.cancel.is_cancelled() {
            debug!(node_id, "execution cancelled; not dispatching");
            return vec![NodeOutcome::failed(node, DispatchError::Cancelled)];
        }

        let outcome = match node.role {
            NodeRole::Trigger => {
                debug!(node_id, "passing through inert trigger");
                NodeOutcome::skipped(node)
            }
            NodeRole::Action => self.dispatch(node).await,
        };

        let failed = outcome.is_failure();
        let mut outcomes = vec![outcome];
        if !failed {
            path.push(node_id);
            outcomes.extend(self.expand(traversal, node_id, path).await);
        }
        outcomes
    }

    // -----------------------------------------------------------------------
    // Internal: place one action node's order.
    // -----------------------------------------------------------------------

    async fn dispatch(&self, node: &WorkflowNode) -> NodeOutcome {
        let order = match node.order_request() {
            Ok(order) => order,
            Err(err) => return NodeOutcome::failed(node, DispatchError::InvalidNode(err.to_string())),
        };

        let connector = match self.registry.get(&node.node_type) {
            Ok(connector) => connector,
            Err(err) => {
                warn!(node_id = %node.id, node_type = %node.node_type, "no connector for node type");
                return NodeOutcome::failed(node, err.into());
            }
        };

        debug!(
            node_id = %node.id,
            node_type = %node.node_type,
            side = %order.side,
            symbol = %order.symbol,
            quantity = order.quantity,
            "dispatching order"
        );

        match connector.submit_order(&order, &node.credentials).await {
            Ok(result) => {
                info!(node_id = %node.id, order_id = %result.order_id, "order accepted");
                NodeOutcome::succeeded(node, result)
            }
            Err(err) => {
                warn!(node_id = %node.id, error = %err, "order failed");
                NodeOutcome::failed(node, err.into())
            }
        }
    }
}
