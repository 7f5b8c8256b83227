//! PostgreSQL implementations of the pipeline's storage traits

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::queries;
use crate::services::recorder::LogRecorder;
use crate::services::run_tracker::RunRepository;
use crate::services::schema::SchemaRegistry;
use crate::services::upsert::{EntityRepository, ModelRegistry, UpsertResult};
use crate::services::validator::{MatchValues, ReferenceLookup};
use crate::types::{AuditLogEntry, EntityModel, FieldValues, ImportLogEntry, ImportRun, ImportStatus};

/// Runs, import logs, audit logs and reference lookups
#[derive(Clone)]
pub struct PgImportStore {
    pool: PgPool,
}

impl PgImportStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunRepository for PgImportStore {
    async fn insert_run(&self, run: &ImportRun) -> Result<()> {
        queries::import_run::insert_run(&self.pool, run).await
    }

    async fn finalize_run(&self, run_id: Uuid, status: ImportStatus, processed_rows: i32) -> Result<bool> {
        queries::import_run::finalize_run(&self.pool, run_id, status, processed_rows).await
    }
}

#[async_trait]
impl LogRecorder for PgImportStore {
    async fn record_import_log(&self, entry: &ImportLogEntry) -> Result<()> {
        queries::import_log::insert_import_log(&self.pool, entry).await
    }

    async fn record_audit(&self, entry: &AuditLogEntry) -> Result<()> {
        queries::audit_log::insert_audit(&self.pool, entry).await
    }
}

#[async_trait]
impl ReferenceLookup for PgImportStore {
    async fn exists(&self, table: &str, column: &str, value: &str) -> Result<bool> {
        queries::entity::value_exists(&self.pool, table, column, value).await
    }

    async fn is_taken(&self, table: &str, column: &str, value: &str, except: &MatchValues) -> Result<bool> {
        queries::entity::value_taken(&self.pool, table, column, value, except).await
    }
}

/// One configured target table
pub struct PgEntityRepository {
    model: EntityModel,
    pool: PgPool,
}

impl PgEntityRepository {
    pub fn new(model: EntityModel, pool: PgPool) -> Self {
        Self { model, pool }
    }

    /// One repository per target table in the registry
    pub fn registry(schemas: &SchemaRegistry, pool: &PgPool) -> Result<ModelRegistry> {
        let models = schemas.entity_models()?;
        Ok(ModelRegistry::build(models, |model| {
            std::sync::Arc::new(Self::new(model, pool.clone())) as std::sync::Arc<dyn EntityRepository>
        }))
    }
}

#[async_trait]
impl EntityRepository for PgEntityRepository {
    fn model(&self) -> &EntityModel {
        &self.model
    }

    async fn upsert(&self, matched: &FieldValues, payload: &FieldValues) -> Result<UpsertResult> {
        queries::entity::upsert_entity(&self.pool, &self.model, matched, payload).await
    }

    async fn attach_to_actor(&self, actor_id: Uuid, ids: &[Uuid], import_type: &str) -> Result<()> {
        queries::entity::attach_to_actor(&self.pool, &self.model, actor_id, ids, import_type).await
    }
}
