//! Row structs that map 1-to-1 onto database tables.
//!
//! These are *persistence* models and carry no domain behaviour.
//! Domain types live in the `engine` crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::DbError;

// ---------------------------------------------------------------------------
// workflows
// ---------------------------------------------------------------------------

/// A persisted workflow definition row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowRow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    /// Full JSON graph (nodes and edges).
    pub definition: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// workflow_executions
// ---------------------------------------------------------------------------

/// Possible statuses for a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Success,
    Failure,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// A persisted workflow execution row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowExecutionRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkflowExecutionRow {
    /// The `status` column parsed into an [`ExecutionStatus`].
    pub fn execution_status(&self) -> Result<ExecutionStatus, DbError> {
        self.status
            .parse()
            .map_err(|message| DbError::Decode { column: "status", message })
    }
}

// ---------------------------------------------------------------------------
// node_executions
// ---------------------------------------------------------------------------

/// A persisted per-node outcome row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NodeExecutionRow {
    pub id: Uuid,
    pub execution_id: Uuid,
    /// Position in the execution report.
    pub ordinal: i32,
    pub node_id: String,
    pub status: String,
    pub error: Option<String>,
    pub output: Option<serde_json::Value>,
    pub recorded_at: DateTime<Utc>,
}

/// Input for [`insert_node_executions`](crate::repository::executions::insert_node_executions).
#[derive(Debug, Clone)]
pub struct NewNodeExecution {
    pub node_id: String,
    pub status: String,
    pub error: Option<String>,
    pub output: Option<serde_json::Value>,
}
