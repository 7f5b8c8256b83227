//! Import log queries (row validation failures)

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use crate::types::ImportLogEntry;

pub async fn insert_import_log(pool: &PgPool, entry: &ImportLogEntry) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO import_logs
            (id, import_id, user_id, import_type, row_number, "column", invalid_value, validation_message, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#
    )
    .bind(entry.id)
    .bind(entry.import_run_id)
    .bind(entry.actor_id)
    .bind(&entry.import_type)
    .bind(entry.row_number)
    .bind(&entry.column)
    .bind(&entry.invalid_value)
    .bind(&entry.message)
    .bind(entry.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Log entries by run and/or import type, in row order
pub async fn list_import_logs(
    pool: &PgPool,
    owner: Option<Uuid>,
    import_run_id: Option<Uuid>,
    import_type: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<(Vec<ImportLogEntry>, i64)> {
    let entries = sqlx::query_as::<_, ImportLogEntry>(
        r#"
        SELECT id, import_id, user_id, import_type, row_number, "column", invalid_value,
               validation_message, created_at
        FROM import_logs
        WHERE ($1::uuid IS NULL OR user_id = $1)
          AND ($2::uuid IS NULL OR import_id = $2)
          AND ($3::text IS NULL OR import_type = $3)
        ORDER BY created_at DESC, row_number ASC
        LIMIT $4 OFFSET $5
        "#
    )
    .bind(owner)
    .bind(import_run_id)
    .bind(import_type)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let total: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM import_logs
        WHERE ($1::uuid IS NULL OR user_id = $1)
          AND ($2::uuid IS NULL OR import_id = $2)
          AND ($3::text IS NULL OR import_type = $3)
        "#
    )
    .bind(owner)
    .bind(import_run_id)
    .bind(import_type)
    .fetch_one(pool)
    .await?;

    Ok((entries, total))
}
