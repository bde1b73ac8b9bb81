//! The Workflow Store seam.
//!
//! The scheduler and the launched runs talk to persistence only through
//! [`WorkflowStore`]. Two implementations ship with the engine:
//! - [`PgWorkflowStore`] backed by the `db` crate (Postgres).
//! - [`InMemoryWorkflowStore`] for tests and one-shot runs.
//!
//! `claim_execution` must be atomic in every implementation: two callers
//! racing for the same workflow can never both receive a pending record.

mod memory;
mod postgres;

pub use memory::InMemoryWorkflowStore;
pub use postgres::PgWorkflowStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{ExecutionRecord, ExecutionStatus, WorkflowGraph};
use crate::report::NodeOutcome;

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Every workflow currently persisted.
    async fn list_workflows(&self) -> Result<Vec<WorkflowGraph>, StoreError>;

    /// The most recently started execution of `workflow_id`.
    async fn get_last_execution(
        &self,
        workflow_id: Uuid,
    ) -> Result<Option<ExecutionRecord>, StoreError>;

    /// Create a `Pending` execution, or fail with
    /// [`StoreError::AlreadyPending`] if one already exists.
    async fn claim_execution(&self, workflow_id: Uuid) -> Result<ExecutionRecord, StoreError>;

    /// Move a pending execution to a terminal status.
    async fn complete_execution(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        end_time: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Persist the per-node report of an execution.
    async fn record_node_outcomes(
        &self,
        execution_id: Uuid,
        outcomes: &[NodeOutcome],
    ) -> Result<(), StoreError>;

    /// All executions of `workflow_id`, newest first.
    async fn list_executions(&self, workflow_id: Uuid) -> Result<Vec<ExecutionRecord>, StoreError>;
}
