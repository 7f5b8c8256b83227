//! Import run queries

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use crate::types::{ImportRun, ImportStatus};

/// Insert a new run in `pending` state
pub async fn insert_run(pool: &PgPool, run: &ImportRun) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO imports (id, user_id, import_type, file_name, status, processed_rows, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#
    )
    .bind(run.id)
    .bind(run.actor_id)
    .bind(&run.import_type)
    .bind(&run.file_name)
    .bind(run.status.as_str())
    .bind(run.processed_rows)
    .bind(run.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Set the final status of a run that is still pending
pub async fn finalize_run(
    pool: &PgPool,
    run_id: Uuid,
    status: ImportStatus,
    processed_rows: i32,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE imports
        SET status = $2, processed_rows = $3, finished_at = NOW()
        WHERE id = $1 AND status = 'pending'
        "#
    )
    .bind(run_id)
    .bind(status.as_str())
    .bind(processed_rows)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// List runs, newest first. `owner = None` lists every actor's runs.
pub async fn list_runs(
    pool: &PgPool,
    owner: Option<Uuid>,
    import_type: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<(Vec<ImportRun>, i64)> {
    let runs = sqlx::query_as::<_, ImportRun>(
        r#"
        SELECT id, user_id, import_type, file_name, status, processed_rows, created_at, finished_at
        FROM imports
        WHERE ($1::uuid IS NULL OR user_id = $1)
          AND ($2::text IS NULL OR import_type = $2)
        ORDER BY created_at DESC
        LIMIT $3 OFFSET $4
        "#
    )
    .bind(owner)
    .bind(import_type)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let total: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM imports
        WHERE ($1::uuid IS NULL OR user_id = $1)
          AND ($2::text IS NULL OR import_type = $2)
        "#
    )
    .bind(owner)
    .bind(import_type)
    .fetch_one(pool)
    .await?;

    Ok((runs, total))
}

