//! Dynamic queries over configured target tables.
//!
//! Table and column names come from the validated schema registry and are
//! always safe identifiers; values are bound as text and cast per column.

use anyhow::Result;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::services::upsert::UpsertResult;
use crate::services::validator::MatchValues;
use crate::types::{EntityModel, FieldType, FieldValues};

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier)
}

/// `"a"::text IS NOT DISTINCT FROM $n AND ...`, numbering from `first`
fn match_clause<'a>(columns: impl Iterator<Item = &'a String>, first: usize) -> String {
    columns
        .enumerate()
        .map(|(i, column)| format!("{}::text IS NOT DISTINCT FROM ${}", quote(column), first + i))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Whether `table.column` holds `value` (`exists:` rule)
pub async fn value_exists(pool: &PgPool, table: &str, column: &str, value: &str) -> Result<bool> {
    let sql = format!(
        "SELECT EXISTS (SELECT 1 FROM {} WHERE {}::text = $1)",
        quote(table),
        quote(column)
    );
    let exists: bool = sqlx::query_scalar(&sql).bind(value).fetch_one(pool).await?;
    Ok(exists)
}

/// Whether another record already holds `value` (`unique:` rule). The
/// record identified by `except` does not count.
pub async fn value_taken(
    pool: &PgPool,
    table: &str,
    column: &str,
    value: &str,
    except: &MatchValues,
) -> Result<bool> {
    let mut sql = format!(
        "SELECT EXISTS (SELECT 1 FROM {} WHERE {}::text = $1",
        quote(table),
        quote(column)
    );
    if !except.is_empty() {
        let clause = match_clause(except.iter().map(|(c, _)| c), 2);
        sql.push_str(&format!(" AND NOT ({})", clause));
    }
    sql.push(')');

    let mut query = sqlx::query_scalar::<_, bool>(&sql).bind(value);
    for (_, v) in except {
        query = query.bind(v.clone());
    }
    Ok(query.fetch_one(pool).await?)
}

fn row_values(row: &PgRow, model: &EntityModel) -> Result<FieldValues> {
    let mut values = FieldValues::new();
    for (column, _) in &model.columns {
        let value: Option<String> = row.try_get(column.as_str())?;
        values.insert(column.clone(), value);
    }
    Ok(values)
}

fn cast(model: &EntityModel, column: &str) -> &'static str {
    model.column_type(column).unwrap_or(FieldType::String).sql_cast()
}

/// Update the record matching every `matched` column, or create one.
///
/// Runs in one transaction holding an advisory lock on the match key, so
/// concurrent imports of the same key cannot both insert.
pub async fn upsert_entity(
    pool: &PgPool,
    model: &EntityModel,
    matched: &FieldValues,
    payload: &FieldValues,
) -> Result<UpsertResult> {
    let table = &model.target.table;
    let mut tx = pool.begin().await?;

    let lock_key = format!("{}:{:?}", table, matched);
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(&lock_key)
        .execute(&mut *tx)
        .await?;

    let selected = model
        .columns
        .iter()
        .map(|(c, _)| format!("{}::text AS {}", quote(c), quote(c)))
        .collect::<Vec<_>>()
        .join(", ");
    let mut select_sql = format!("SELECT id, {} FROM {}", selected, quote(table));
    if !matched.is_empty() {
        select_sql.push_str(&format!(" WHERE {}", match_clause(matched.keys(), 1)));
    }
    select_sql.push_str(" LIMIT 1 FOR UPDATE");

    let mut select = sqlx::query(&select_sql);
    for value in matched.values() {
        select = select.bind(value.clone());
    }
    let existing = select.fetch_optional(&mut *tx).await?;

    let result = match existing {
        Some(row) => {
            let id: Uuid = row.try_get("id")?;
            let previous = row_values(&row, model)?;

            if !payload.is_empty() {
                let assignments = payload
                    .keys()
                    .enumerate()
                    .map(|(i, c)| format!("{} = ${}::{}", quote(c), i + 2, cast(model, c)))
                    .collect::<Vec<_>>()
                    .join(", ");
                let update_sql = format!(
                    "UPDATE {} SET {}, updated_at = NOW() WHERE id = $1",
                    quote(table),
                    assignments
                );

                let mut update = sqlx::query(&update_sql).bind(id);
                for value in payload.values() {
                    update = update.bind(value.clone());
                }
                update.execute(&mut *tx).await?;
            }

            UpsertResult {
                id,
                previous: Some(previous),
            }
        }
        None => {
            let id = Uuid::new_v4();
            let fields: Vec<(&String, &Option<String>)> = matched.iter().chain(payload.iter()).collect();

            let columns = fields
                .iter()
                .map(|(c, _)| quote(c))
                .collect::<Vec<_>>()
                .join(", ");
            let placeholders = fields
                .iter()
                .enumerate()
                .map(|(i, (c, _))| format!("${}::{}", i + 2, cast(model, c)))
                .collect::<Vec<_>>()
                .join(", ");
            let insert_sql = if fields.is_empty() {
                format!("INSERT INTO {} (id) VALUES ($1)", quote(table))
            } else {
                format!(
                    "INSERT INTO {} (id, {}) VALUES ($1, {})",
                    quote(table),
                    columns,
                    placeholders
                )
            };

            let mut insert = sqlx::query(&insert_sql).bind(id);
            for (_, value) in &fields {
                insert = insert.bind((*value).clone());
            }
            insert.execute(&mut *tx).await?;

            UpsertResult { id, previous: None }
        }
    };

    tx.commit().await?;
    Ok(result)
}

/// Link records to the actor through the model's link table
pub async fn attach_to_actor(
    pool: &PgPool,
    model: &EntityModel,
    actor_id: Uuid,
    ids: &[Uuid],
    import_type: &str,
) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }

    let sql = format!(
        "INSERT INTO {} (user_id, {}, type) SELECT $1, unnest($2::uuid[]), $3",
        quote(&model.target.link_table),
        quote(&model.target.link_column)
    );
    sqlx::query(&sql)
        .bind(actor_id)
        .bind(ids)
        .bind(import_type)
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_clause_numbers_placeholders() {
        let columns = vec!["so_num".to_string(), "sku".to_string()];
        assert_eq!(
            match_clause(columns.iter(), 2),
            r#""so_num"::text IS NOT DISTINCT FROM $2 AND "sku"::text IS NOT DISTINCT FROM $3"#
        );
    }
}
