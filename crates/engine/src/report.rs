//! Per-execution report handed to observability consumers and persisted
//! alongside the execution record.

use connectors::{ConnectorError, OrderResult};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{ExecutionStatus, WorkflowNode};

/// Why a node on a branch did not complete.
#[derive(Debug, Error, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum DispatchError {
    /// The connector refused or failed the order.
    #[error(transparent)]
    Connector(#[from] ConnectorError),

    /// The branch reached a node that is already on its own path.
    #[error("node '{node_id}' revisited at depth {depth}; graph contains a cycle")]
    CycleDetected { node_id: String, depth: usize },

    /// The path grew past `ExecutorConfig::max_depth` without revisiting a node.
    #[error("traversal depth {depth} exceeds maximum of {max_depth}")]
    DepthExceeded { depth: usize, max_depth: usize },

    /// The node's parameters could not be turned into an order.
    #[error("invalid node: {0}")]
    InvalidNode(String),

    /// The execution was cancelled before this node was dispatched.
    #[error("execution cancelled")]
    Cancelled,
}

/// Result of visiting one node along one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Success,
    Failure,
    /// A trigger-role node reached mid-graph; passed through, never dispatched.
    Skipped,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Skipped => "skipped",
        }
    }
}

/// Outcome of one node visit. A node reached by several paths appears once
/// per path.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeOutcome {
    pub node_id: String,
    pub node_type: String,
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<DispatchError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<OrderResult>,
}

impl NodeOutcome {
    pub fn succeeded(node: &WorkflowNode, order: OrderResult) -> Self {
        Self {
            node_id: node.id.clone(),
            node_type: node.node_type.clone(),
            status: NodeStatus::Success,
            error: None,
            order: Some(order),
        }
    }

    pub fn failed(node: &WorkflowNode, error: DispatchError) -> Self {
        Self {
            node_id: node.id.clone(),
            node_type: node.node_type.clone(),
            status: NodeStatus::Failure,
            error: Some(error),
            order: None,
        }
    }

    pub fn skipped(node: &WorkflowNode) -> Self {
        Self {
            node_id: node.id.clone(),
            node_type: node.node_type.clone(),
            status: NodeStatus::Skipped,
            error: None,
            order: None,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status == NodeStatus::Failure
    }
}

/// Aggregate result of one execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub overall_status: ExecutionStatus,
    /// Depth-first order: each edge's target, then its descendants, with
    /// siblings in edge order.
    pub per_node: Vec<NodeOutcome>,
}

impl ExecutionReport {
    /// `Success` iff no visited node failed.
    pub fn new(execution_id: Uuid, workflow_id: Uuid, per_node: Vec<NodeOutcome>) -> Self {
        let overall_status = if per_node.iter().any(NodeOutcome::is_failure) {
            ExecutionStatus::Failure
        } else {
            ExecutionStatus::Success
        };
        Self {
            execution_id,
            workflow_id,
            overall_status,
            per_node,
        }
    }

    /// Every visit of `node_id`, in report order.
    pub fn outcomes_for<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a NodeOutcome> + 'a {
        self.per_node.iter().filter(move |o| o.node_id == node_id)
    }

    pub fn failures(&self) -> impl Iterator<Item = &NodeOutcome> {
        self.per_node.iter().filter(|o| o.is_failure())
    }
}
