//! Execution and node-execution repository functions.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    DbError,
    models::{ExecutionStatus, NewNodeExecution, NodeExecutionRow, WorkflowExecutionRow},
};

// ---------------------------------------------------------------------------
// workflow_executions
// ---------------------------------------------------------------------------

/// Atomically create a `pending` execution for `workflow_id`.
///
/// Relies on the partial unique index `workflow_executions_one_pending`:
/// the insert is skipped when a pending row already exists, in which case
/// `None` is returned. There is no separate read, so concurrent schedulers
/// cannot both win.
pub async fn claim_execution(
    pool: &PgPool,
    workflow_id: Uuid,
    started_at: DateTime<Utc>,
) -> Result<Option<WorkflowExecutionRow>, DbError> {
    let row = sqlx::query_as::<_, WorkflowExecutionRow>(
        r#"
        INSERT INTO workflow_executions (id, workflow_id, status, started_at)
        VALUES ($1, $2, 'pending', $3)
        ON CONFLICT (workflow_id) WHERE status = 'pending' DO NOTHING
        RETURNING id, workflow_id, status, started_at, finished_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(workflow_id)
    .bind(started_at)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// The most recently started execution of `workflow_id`, if any.
pub async fn latest_execution(
    pool: &PgPool,
    workflow_id: Uuid,
) -> Result<Option<WorkflowExecutionRow>, DbError> {
    let row = sqlx::query_as::<_, WorkflowExecutionRow>(
        r#"
        SELECT id, workflow_id, status, started_at, finished_at
        FROM workflow_executions
        WHERE workflow_id = $1
        ORDER BY started_at DESC
        LIMIT 1
        "#,
    )
    .bind(workflow_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Move a pending execution to its terminal `status`.
///
/// Only rows still in `pending` are touched; returns `DbError::NotFound`
/// otherwise so a second completion is visible to the caller.
pub async fn complete_execution(
    pool: &PgPool,
    execution_id: Uuid,
    status: ExecutionStatus,
    finished_at: DateTime<Utc>,
) -> Result<(), DbError> {
    let result = sqlx::query(
        r#"
        UPDATE workflow_executions
        SET status = $1, finished_at = $2
        WHERE id = $3 AND status = 'pending'
        "#,
    )
    .bind(status.as_str())
    .bind(finished_at)
    .bind(execution_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}

/// All executions of `workflow_id`, newest first.
pub async fn list_executions(
    pool: &PgPool,
    workflow_id: Uuid,
) -> Result<Vec<WorkflowExecutionRow>, DbError> {
    let rows = sqlx::query_as::<_, WorkflowExecutionRow>(
        r#"
        SELECT id, workflow_id, status, started_at, finished_at
        FROM workflow_executions
        WHERE workflow_id = $1
        ORDER BY started_at DESC
        "#,
    )
    .bind(workflow_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

// ---------------------------------------------------------------------------
// node_executions
// ---------------------------------------------------------------------------

/// Insert the per-node outcomes of one execution in a single transaction.
///
/// Slice order is kept in the `ordinal` column.
pub async fn insert_node_executions(
    pool: &PgPool,
    execution_id: Uuid,
    nodes: &[NewNodeExecution],
) -> Result<(), DbError> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;

    for (ordinal, node) in (0_i32..).zip(nodes) {
        sqlx::query(
            r#"
            INSERT INTO node_executions
                (id, execution_id, ordinal, node_id, status, error, output, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(execution_id)
        .bind(ordinal)
        .bind(&node.node_id)
        .bind(&node.status)
        .bind(&node.error)
        .bind(&node.output)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Per-node outcomes of one execution, in report order.
pub async fn list_node_executions(
    pool: &PgPool,
    execution_id: Uuid,
) -> Result<Vec<NodeExecutionRow>, DbError> {
    let rows = sqlx::query_as::<_, NodeExecutionRow>(
        r#"
        SELECT id, execution_id, ordinal, node_id, status, error, output, recorded_at
        FROM node_executions
        WHERE execution_id = $1
        ORDER BY ordinal ASC
        "#,
    )
    .bind(execution_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
