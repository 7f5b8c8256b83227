//! Database module

pub mod queries;
pub mod store;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(std::time::Duration::from_secs(10))
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Run database migrations.
///
/// Stored checksums are first re-synced with the embedded migrations so a
/// line-ending change in a checked-out file does not block startup.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    let migrator = sqlx::migrate!("./migrations");

    if migrations_table_exists(pool).await? {
        sync_migration_checksums(pool, &migrator).await?;
    }
    migrator.run(pool).await?;

    info!("Database migrations complete ({} embedded)", migrator.iter().count());
    Ok(())
}

async fn migrations_table_exists(pool: &PgPool) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = '_sqlx_migrations')"
    )
    .fetch_one(pool)
    .await?;

    Ok(exists)
}

async fn sync_migration_checksums(pool: &PgPool, migrator: &sqlx::migrate::Migrator) -> Result<()> {
    for migration in migrator.iter().filter(|m| !m.migration_type.is_down_migration()) {
        let result = sqlx::query(
            "UPDATE _sqlx_migrations SET checksum = $1 WHERE version = $2 AND checksum <> $1"
        )
        .bind(&migration.checksum[..])
        .bind(migration.version)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            warn!(
                "Migration {} ({}) had a stale checksum, updated",
                migration.version, migration.description
            );
        }
    }

    Ok(())
}
