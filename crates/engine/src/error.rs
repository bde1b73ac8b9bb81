//! Engine-level error types.

use thiserror::Error;
use uuid::Uuid;

/// A graph that cannot be executed. Detected before any order is placed.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GraphError {
    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// An edge references a node ID that doesn't exist in the graph.
    #[error("edge '{edge_id}' references unknown node '{node_id}' ({side} side)")]
    UnknownNodeReference {
        edge_id: String,
        node_id: String,
        side: &'static str,
    },

    /// The graph has no trigger-role node to start from.
    #[error("workflow graph has no trigger node")]
    NoTrigger,

    /// Execution was asked to start from a node the graph doesn't contain.
    #[error("start node '{0}' not found")]
    UnknownStartNode(String),

    /// A node's metadata doesn't match what its role and type require.
    #[error("node '{node_id}' has invalid metadata: {message}")]
    InvalidMetadata {
        node_id: String,
        message: String,
    },
}

/// Errors produced by a [`WorkflowStore`](crate::store::WorkflowStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another runner already owns this workflow's pending execution.
    #[error("workflow {workflow_id} already has a pending execution")]
    AlreadyPending { workflow_id: Uuid },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    /// A terminal update was attempted on a record that is no longer pending,
    /// or with a non-terminal status.
    #[error("execution {execution_id} cannot move to '{status}'")]
    InvalidTransition {
        execution_id: Uuid,
        status: db::ExecutionStatus,
    },

    /// A stored definition could not be decoded into a graph.
    #[error("workflow {workflow_id} has an unreadable definition: {source}")]
    InvalidDefinition {
        workflow_id: Uuid,
        #[source]
        source: serde_json::Error,
    },

    /// Persistence error from the db crate.
    #[error("database error: {0}")]
    Database(#[from] db::DbError),
}
