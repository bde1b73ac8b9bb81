use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use db::models::{NewNodeExecution, NodeExecutionRow};
use db::repository::{executions as exec_repo, workflows as workflow_repo};
use db::{DbError, DbPool};

use super::WorkflowStore;
use crate::error::StoreError;
use crate::models::{ExecutionRecord, ExecutionStatus, GraphDefinition, WorkflowGraph};
use crate::report::NodeOutcome;

/// [`WorkflowStore`] over the `db` crate's Postgres repositories.
///
/// Claim exclusivity is enforced by the partial unique index on
/// `workflow_executions(workflow_id) WHERE status = 'pending'`, so any number
/// of scheduler processes may share one database.
#[derive(Debug, Clone)]
pub struct PgWorkflowStore {
    pool: DbPool,
}

impl PgWorkflowStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Load one workflow by ID.
    pub async fn get_workflow(&self, workflow_id: Uuid) -> Result<WorkflowGraph, StoreError> {
        let row = workflow_repo::get_workflow(&self.pool, workflow_id)
            .await
            .map_err(|err| match err {
                DbError::NotFound => StoreError::NotFound { entity: "workflow", id: workflow_id },
                other => other.into(),
            })?;
        decode_row(row)
    }

    /// Persisted per-node outcomes of one execution, in report order.
    pub async fn node_executions(&self, execution_id: Uuid) -> Result<Vec<NodeExecutionRow>, StoreError> {
        Ok(exec_repo::list_node_executions(&self.pool, execution_id).await?)
    }

    /// Store `graph` as a new workflow row.
    pub async fn insert_workflow(&self, graph: &WorkflowGraph) -> Result<(), StoreError> {
        let definition = serde_json::to_value(graph.definition()).map_err(|source| {
            StoreError::InvalidDefinition { workflow_id: graph.id, source }
        })?;
        workflow_repo::create_workflow(&self.pool, graph.id, graph.owner_id, &graph.name, definition)
            .await?;
        Ok(())
    }
}

fn decode_row(row: db::models::WorkflowRow) -> Result<WorkflowGraph, StoreError> {
    let definition: GraphDefinition = serde_json::from_value(row.definition)
        .map_err(|source| StoreError::InvalidDefinition { workflow_id: row.id, source })?;
    Ok(WorkflowGraph::from_definition(row.id, row.owner_id, row.name, definition))
}

#[async_trait]
impl WorkflowStore for PgWorkflowStore {
    async fn list_workflows(&self) -> Result<Vec<WorkflowGraph>, StoreError> {
        let rows = workflow_repo::list_workflows(&self.pool).await?;

        // One unreadable definition must not hide every other workflow.
        let graphs = rows
            .into_iter()
            .filter_map(|row| match decode_row(row) {
                Ok(graph) => Some(graph),
                Err(err) => {
                    warn!(error = %err, "skipping workflow");
                    None
                }
            })
            .collect();
        Ok(graphs)
    }

    async fn get_last_execution(
        &self,
        workflow_id: Uuid,
    ) -> Result<Option<ExecutionRecord>, StoreError> {
        let row = exec_repo::latest_execution(&self.pool, workflow_id).await?;
        Ok(row.map(ExecutionRecord::try_from).transpose()?)
    }

    async fn claim_execution(&self, workflow_id: Uuid) -> Result<ExecutionRecord, StoreError> {
        let row = exec_repo::claim_execution(&self.pool, workflow_id, Utc::now())
            .await?
            .ok_or(StoreError::AlreadyPending { workflow_id })?;
        Ok(ExecutionRecord::try_from(row)?)
    }

    async fn complete_execution(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        end_time: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if !status.is_terminal() {
            return Err(StoreError::InvalidTransition { execution_id, status });
        }
        exec_repo::complete_execution(&self.pool, execution_id, status, end_time)
            .await
            .map_err(|err| match err {
                DbError::NotFound => StoreError::InvalidTransition { execution_id, status },
                other => other.into(),
            })
    }

    async fn record_node_outcomes(
        &self,
        execution_id: Uuid,
        outcomes: &[NodeOutcome],
    ) -> Result<(), StoreError> {
        let rows: Vec<NewNodeExecution> = outcomes
            .iter()
            .map(|outcome| NewNodeExecution {
                node_id: outcome.node_id.clone(),
                status: outcome.status.as_str().to_owned(),
                error: outcome.error.as_ref().map(ToString::to_string),
                output: outcome
                    .order
                    .as_ref()
                    .and_then(|order| serde_json::to_value(order).ok()),
            })
            .collect();
        exec_repo::insert_node_executions(&self.pool, execution_id, &rows).await?;
        Ok(())
    }

    async fn list_executions(&self, workflow_id: Uuid) -> Result<Vec<ExecutionRecord>, StoreError> {
        exec_repo::list_executions(&self.pool, workflow_id)
            .await?
            .into_iter()
            .map(|row| ExecutionRecord::try_from(row).map_err(StoreError::from))
            .collect()
    }
}
