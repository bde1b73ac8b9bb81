//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a workflow graph looks like
//! in memory.  The node and edge layout matches the JSON written by the
//! authoring client, so a graph can be read straight out of the `definition`
//! column of the `workflows` table.

use chrono::{DateTime, Utc};
use connectors::{Credentials, OrderRequest, Side};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::GraphError;

pub use db::ExecutionStatus;

/// Graph-local node identifier.
pub type NodeId = String;

/// Node `type` of interval triggers.
pub const TIMER_TRIGGER: &str = "timer";
/// Node `type` of price-threshold triggers.
pub const PRICE_TRIGGER: &str = "price-trigger";

// ---------------------------------------------------------------------------
// WorkflowNode
// ---------------------------------------------------------------------------

/// Whether a node starts runs or places orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeRole {
    #[serde(alias = "trigger")]
    Trigger,
    #[serde(alias = "action")]
    Action,
}

/// Canvas coordinates. Ignored by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A single step in the workflow graph.
///
/// Serialises flat. Deserialises from either the flat form or the authoring
/// client's form, which nests `kind` and `metadata` under `data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawNode")]
pub struct WorkflowNode {
    /// Unique identifier within this graph (referenced by edges).
    pub id: NodeId,
    pub role: NodeRole,
    /// Trigger or exchange discriminator, e.g. `timer` or `lighter`.
    #[serde(rename = "type")]
    pub node_type: String,
    /// Trigger parameters or trade parameters, depending on `role`.
    pub metadata: Value,
    pub credentials: Credentials,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

/// Wire form of a node before the `data` envelope is flattened.
#[derive(Deserialize)]
struct RawNode {
    id: NodeId,
    #[serde(default, alias = "kind")]
    role: Option<NodeRole>,
    #[serde(rename = "type")]
    node_type: String,
    #[serde(default)]
    metadata: Option<Value>,
    #[serde(default)]
    credentials: Credentials,
    #[serde(default)]
    position: Option<Position>,
    #[serde(default)]
    data: Option<RawNodeData>,
}

#[derive(Deserialize)]
struct RawNodeData {
    #[serde(default, alias = "role")]
    kind: Option<NodeRole>,
    #[serde(default)]
    metadata: Option<Value>,
}

impl TryFrom<RawNode> for WorkflowNode {
    type Error = String;

    fn try_from(raw: RawNode) -> Result<Self, Self::Error> {
        let (data_kind, data_metadata) = match raw.data {
            Some(data) => (data.kind, data.metadata),
            None => (None, None),
        };
        let role = raw
            .role
            .or(data_kind)
            .ok_or_else(|| format!("node '{}' has no `role` or `data.kind`", raw.id))?;

        Ok(Self {
            id: raw.id,
            role,
            node_type: raw.node_type,
            metadata: raw.metadata.or(data_metadata).unwrap_or(Value::Null),
            credentials: raw.credentials,
            position: raw.position,
        })
    }
}

/// Metadata of a `timer` trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerMetadata {
    #[serde(alias = "time")]
    pub interval_seconds: u64,
}

/// Metadata of a `price-trigger` trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceTriggerMetadata {
    pub asset: String,
    #[serde(alias = "price")]
    pub target_price: f64,
}

/// Metadata of an action node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeMetadata {
    #[serde(alias = "type")]
    pub side: Side,
    pub symbol: String,
    #[serde(alias = "qty")]
    pub quantity: f64,
}

/// Parsed parameters of a trigger node whose type the engine understands.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerSpec {
    Timer(TimerMetadata),
    Price(PriceTriggerMetadata),
}

impl WorkflowNode {
    pub fn is_trigger(&self) -> bool {
        self.role == NodeRole::Trigger
    }

    /// Parse this node's trigger parameters.
    ///
    /// Returns `Ok(None)` for trigger types with no known parameters.
    pub fn trigger_spec(&self) -> Result<Option<TriggerSpec>, GraphError> {
        match self.node_type.as_str() {
            TIMER_TRIGGER => {
                let meta: TimerMetadata = self.parse_metadata()?;
                if meta.interval_seconds == 0 {
                    return Err(self.invalid("intervalSeconds must be positive"));
                }
                Ok(Some(TriggerSpec::Timer(meta)))
            }
            PRICE_TRIGGER => {
                let meta: PriceTriggerMetadata = self.parse_metadata()?;
                if meta.asset.trim().is_empty() {
                    return Err(self.invalid("asset must not be empty"));
                }
                if !is_positive(meta.target_price) {
                    return Err(self.invalid("targetPrice must be positive"));
                }
                Ok(Some(TriggerSpec::Price(meta)))
            }
            _ => Ok(None),
        }
    }

    /// Parse this node's trade parameters into the order a connector places.
    pub fn order_request(&self) -> Result<OrderRequest, GraphError> {
        let meta: TradeMetadata = self.parse_metadata()?;
        if meta.symbol.trim().is_empty() {
            return Err(self.invalid("symbol must not be empty"));
        }
        if !is_positive(meta.quantity) {
            return Err(self.invalid("quantity must be positive"));
        }
        Ok(OrderRequest {
            side: meta.side,
            symbol: meta.symbol,
            quantity: meta.quantity,
        })
    }

    fn parse_metadata<T: serde::de::DeserializeOwned>(&self) -> Result<T, GraphError> {
        serde_json::from_value(self.metadata.clone()).map_err(|e| self.invalid(e.to_string()))
    }

    fn invalid(&self, message: impl Into<String>) -> GraphError {
        GraphError::InvalidMetadata {
            node_id: self.id.clone(),
            message: message.into(),
        }
    }
}

fn is_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

// ---------------------------------------------------------------------------
// WorkflowEdge
// ---------------------------------------------------------------------------

/// Directed edge from one node to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowEdge {
    #[serde(default)]
    pub id: String,
    pub source: NodeId,
    pub target: NodeId,
}

impl WorkflowEdge {
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        let (source, target) = (source.into(), target.into());
        Self {
            id: format!("{source}->{target}"),
            source,
            target,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowGraph
// ---------------------------------------------------------------------------

/// Nodes and edges exactly as stored in the `definition` column.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDefinition {
    pub nodes: Vec<WorkflowNode>,
    #[serde(default, alias = "edge")]
    pub edges: Vec<WorkflowEdge>,
}

/// Immutable snapshot of a workflow, consumed once per execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowGraph {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default, alias = "userId")]
    pub owner_id: Uuid,
    #[serde(default)]
    pub name: String,
    pub nodes: Vec<WorkflowNode>,
    /// Insertion order carries no meaning beyond report ordering.
    #[serde(default, alias = "edge")]
    pub edges: Vec<WorkflowEdge>,
}

impl WorkflowGraph {
    /// Convenience constructor for testing.
    pub fn new(
        name: impl Into<String>,
        nodes: Vec<WorkflowNode>,
        edges: Vec<WorkflowEdge>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: Uuid::nil(),
            name: name.into(),
            nodes,
            edges,
        }
    }

    /// Assemble a graph from a stored row's columns.
    pub fn from_definition(id: Uuid, owner_id: Uuid, name: String, definition: GraphDefinition) -> Self {
        Self {
            id,
            owner_id,
            name,
            nodes: definition.nodes,
            edges: definition.edges,
        }
    }

    pub fn definition(&self) -> GraphDefinition {
        GraphDefinition {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
        }
    }

    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The designated trigger: the first trigger-role node in node order.
    ///
    /// Any further trigger-role nodes are inert pass-throughs.
    pub fn trigger(&self) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.is_trigger())
    }
}

// ---------------------------------------------------------------------------
// ExecutionRecord
// ---------------------------------------------------------------------------

/// One attempt to run a workflow's action subgraph.
///
/// Created `Pending` by a successful claim and moved exactly once to
/// `Success` or `Failure`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    pub fn pending(workflow_id: Uuid, start_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            status: ExecutionStatus::Pending,
            start_time,
            end_time: None,
        }
    }
}

impl TryFrom<db::models::WorkflowExecutionRow> for ExecutionRecord {
    type Error = db::DbError;

    fn try_from(row: db::models::WorkflowExecutionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            status: row.execution_status()?,
            id: row.id,
            workflow_id: row.workflow_id,
            start_time: row.started_at,
            end_time: row.finished_at,
        })
    }
}
