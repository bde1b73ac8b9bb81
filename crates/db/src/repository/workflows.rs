//! Workflow read operations.
//!
//! Authoring lives in another service; the engine only needs to read graphs
//! back, plus an insert used to seed a database from a graph file.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbError, models::WorkflowRow};

/// Insert a workflow row.
///
/// `definition` must be a JSON object produced by serialising the domain
/// `WorkflowGraph` type from the `engine` crate.
pub async fn create_workflow(
    pool: &PgPool,
    id: Uuid,
    owner_id: Uuid,
    name: &str,
    definition: serde_json::Value,
) -> Result<WorkflowRow, DbError> {
    let row = sqlx::query_as::<_, WorkflowRow>(
        r#"
        INSERT INTO workflows (id, owner_id, name, definition, created_at)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, owner_id, name, definition, created_at
        "#,
    )
    .bind(id)
    .bind(owner_id)
    .bind(name)
    .bind(definition)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Fetch a single workflow by its primary key.
pub async fn get_workflow(pool: &PgPool, id: Uuid) -> Result<WorkflowRow, DbError> {
    let row = sqlx::query_as::<_, WorkflowRow>(
        r#"SELECT id, owner_id, name, definition, created_at FROM workflows WHERE id = $1"#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Return all workflows ordered by creation time (oldest first).
pub async fn list_workflows(pool: &PgPool) -> Result<Vec<WorkflowRow>, DbError> {
    let rows = sqlx::query_as::<_, WorkflowRow>(
        r#"SELECT id, owner_id, name, definition, created_at FROM workflows ORDER BY created_at ASC"#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
