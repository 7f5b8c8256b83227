//! Audit log queries (field changes made by imports)

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use crate::types::AuditLogEntry;

pub async fn insert_audit(pool: &PgPool, entry: &AuditLogEntry) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO audit_logs
            (id, import_id, model_id, model, "row", "column", old_value, new_value, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#
    )
    .bind(entry.id)
    .bind(entry.import_run_id)
    .bind(entry.target_entity_id)
    .bind(&entry.entity_type)
    .bind(entry.row_number)
    .bind(&entry.column)
    .bind(&entry.old_value)
    .bind(&entry.new_value)
    .bind(entry.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Audit entries for a run and/or a target entity. `owner` restricts to
/// runs started by that actor.
pub async fn list_audits(
    pool: &PgPool,
    owner: Option<Uuid>,
    import_run_id: Option<Uuid>,
    entity_type: Option<&str>,
    entity_id: Option<Uuid>,
) -> Result<Vec<AuditLogEntry>> {
    let entries = sqlx::query_as::<_, AuditLogEntry>(
        r#"
        SELECT a.id, a.import_id, a.model_id, a.model, a."row", a."column",
               a.old_value, a.new_value, a.created_at
        FROM audit_logs a
        JOIN imports i ON i.id = a.import_id
        WHERE ($1::uuid IS NULL OR i.user_id = $1)
          AND ($2::uuid IS NULL OR a.import_id = $2)
          AND ($3::text IS NULL OR a.model = $3)
          AND ($4::uuid IS NULL OR a.model_id = $4)
        ORDER BY a.created_at ASC, a."row" ASC
        "#
    )
    .bind(owner)
    .bind(import_run_id)
    .bind(entity_type)
    .bind(entity_id)
    .fetch_all(pool)
    .await?;

    Ok(entries)
}
