//! In-memory fakes of the storage and notification traits (tests only)

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::services::notifier::{EventSink, ImportEvent};
use crate::services::recorder::LogRecorder;
use crate::services::run_tracker::RunRepository;
use crate::services::schema::SchemaRegistry;
use crate::services::upsert::{EntityRepository, ModelRegistry, UpsertResult};
use crate::services::validator::{MatchValues, ReferenceLookup};
use crate::types::{AuditLogEntry, EntityModel, FieldValues, ImportLogEntry, ImportRun, ImportStatus};

#[derive(Default)]
struct State {
    runs: Vec<ImportRun>,
    logs: Vec<ImportLogEntry>,
    audits: Vec<AuditLogEntry>,
    products: Vec<String>,
    entities: HashMap<String, Vec<(Uuid, FieldValues)>>,
    links: HashMap<String, Vec<(Uuid, Uuid, String)>>,
    /// Entity writes left before every further write fails
    writes_before_failure: Option<usize>,
}

/// Shared in-memory database; clones see the same data
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn with_products(skus: &[&str]) -> Self {
        let store = Self::default();
        store.state.lock().products = skus.iter().map(|s| s.to_string()).collect();
        store
    }

    pub fn seed_entity(&self, table: &str, values: &[(&str, &str)]) -> Uuid {
        let id = Uuid::new_v4();
        let record = values
            .iter()
            .map(|(k, v)| (k.to_string(), Some(v.to_string())))
            .collect();
        self.state
            .lock()
            .entities
            .entry(table.to_string())
            .or_default()
            .push((id, record));
        id
    }

    pub fn model_registry(&self, schemas: &SchemaRegistry) -> ModelRegistry {
        let models = schemas.entity_models().unwrap_or_default();
        ModelRegistry::build(models, |model| {
            Arc::new(MemoryEntityRepository::new(model, self.clone())) as Arc<dyn EntityRepository>
        })
    }

    pub fn fail_entity_writes(&self, fail: bool) {
        self.state.lock().writes_before_failure = fail.then_some(0);
    }

    /// Let `count` entity writes through, then fail the rest
    pub fn fail_entity_writes_after(&self, count: usize) {
        self.state.lock().writes_before_failure = Some(count);
    }

    pub fn run(&self, id: Uuid) -> Option<ImportRun> {
        self.state.lock().runs.iter().find(|r| r.id == id).cloned()
    }

    pub fn run_count(&self) -> usize {
        self.state.lock().runs.len()
    }

    pub fn import_logs(&self) -> Vec<ImportLogEntry> {
        self.state.lock().logs.clone()
    }

    pub fn audits(&self) -> Vec<AuditLogEntry> {
        self.state.lock().audits.clone()
    }

    pub fn entity_count(&self, table: &str) -> usize {
        self.state.lock().entities.get(table).map_or(0, Vec::len)
    }

    /// (actor, record id, import type) rows of a link table
    pub fn links(&self, link_table: &str) -> Vec<(Uuid, Uuid, String)> {
        self.state.lock().links.get(link_table).cloned().unwrap_or_default()
    }
}

fn matches_all(record: &FieldValues, pairs: &[(String, Option<String>)]) -> bool {
    pairs
        .iter()
        .all(|(column, value)| record.get(column).cloned().flatten() == *value)
}

#[async_trait]
impl RunRepository for MemoryStore {
    async fn insert_run(&self, run: &ImportRun) -> Result<()> {
        self.state.lock().runs.push(run.clone());
        Ok(())
    }

    async fn finalize_run(&self, run_id: Uuid, status: ImportStatus, processed_rows: i32) -> Result<bool> {
        let mut state = self.state.lock();
        match state
            .runs
            .iter_mut()
            .find(|r| r.id == run_id && r.status == ImportStatus::Pending)
        {
            Some(run) => {
                run.status = status;
                run.processed_rows = processed_rows;
                run.finished_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl LogRecorder for MemoryStore {
    async fn record_import_log(&self, entry: &ImportLogEntry) -> Result<()> {
        self.state.lock().logs.push(entry.clone());
        Ok(())
    }

    async fn record_audit(&self, entry: &AuditLogEntry) -> Result<()> {
        self.state.lock().audits.push(entry.clone());
        Ok(())
    }
}

#[async_trait]
impl ReferenceLookup for MemoryStore {
    async fn exists(&self, table: &str, column: &str, value: &str) -> Result<bool> {
        let state = self.state.lock();
        if table == "products" && column == "sku" {
            return Ok(state.products.iter().any(|p| p == value));
        }
        Ok(state.entities.get(table).is_some_and(|records| {
            records
                .iter()
                .any(|(_, r)| r.get(column).cloned().flatten().as_deref() == Some(value))
        }))
    }

    async fn is_taken(&self, table: &str, column: &str, value: &str, except: &MatchValues) -> Result<bool> {
        let state = self.state.lock();
        Ok(state.entities.get(table).is_some_and(|records| {
            records.iter().any(|(_, r)| {
                r.get(column).cloned().flatten().as_deref() == Some(value)
                    && (except.is_empty() || !matches_all(r, except))
            })
        }))
    }
}

/// [`EntityRepository`] over a [`MemoryStore`] table
pub struct MemoryEntityRepository {
    model: EntityModel,
    store: MemoryStore,
}

impl MemoryEntityRepository {
    pub fn new(model: EntityModel, store: MemoryStore) -> Self {
        Self { model, store }
    }
}

#[async_trait]
impl EntityRepository for MemoryEntityRepository {
    fn model(&self) -> &EntityModel {
        &self.model
    }

    async fn upsert(&self, matched: &FieldValues, payload: &FieldValues) -> Result<UpsertResult> {
        let mut state = self.store.state.lock();
        match state.writes_before_failure {
            Some(0) => anyhow::bail!("connection reset by peer"),
            Some(left) => state.writes_before_failure = Some(left - 1),
            None => {}
        }

        let pairs: Vec<(String, Option<String>)> =
            matched.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let records = state.entities.entry(self.model.target.table.clone()).or_default();

        if let Some((id, record)) = records.iter_mut().find(|(_, r)| matches_all(r, &pairs)) {
            let previous = record.clone();
            record.extend(payload.iter().map(|(k, v)| (k.clone(), v.clone())));
            return Ok(UpsertResult {
                id: *id,
                previous: Some(previous),
            });
        }

        let id = Uuid::new_v4();
        let mut record = matched.clone();
        record.extend(payload.iter().map(|(k, v)| (k.clone(), v.clone())));
        records.push((id, record));
        Ok(UpsertResult { id, previous: None })
    }

    async fn attach_to_actor(&self, actor_id: Uuid, ids: &[Uuid], import_type: &str) -> Result<()> {
        let mut state = self.store.state.lock();
        let links = state.links.entry(self.model.target.link_table.clone()).or_default();
        links.extend(ids.iter().map(|id| (actor_id, *id, import_type.to_string())));
        Ok(())
    }
}

/// Records every published event
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<ImportEvent>>,
}

impl CollectingSink {
    pub fn events(&self) -> Vec<ImportEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl EventSink for CollectingSink {
    async fn publish(&self, event: &ImportEvent) -> Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Write `contents` to a fresh file under the system temp dir
pub fn write_temp_file(extension: &str, contents: &str) -> String {
    let path = std::env::temp_dir().join(format!("dataport-test-{}.{}", Uuid::new_v4(), extension));
    std::fs::write(&path, contents).unwrap();
    path.display().to_string()
}
