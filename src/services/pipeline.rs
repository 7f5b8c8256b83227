//! The import pipeline: one uploaded file, start to finish
//!
//! header check -> run created -> per row: coerce, validate, log or upsert
//! -> attach records to the actor -> final status -> completion event.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ImportError;
use crate::services::normalizer::{check_required_headers, ColumnNormalizer};
use crate::services::notifier::{EventSink, ImportEvent};
use crate::services::recorder::LogRecorder;
use crate::services::run_tracker::RunTracker;
use crate::services::schema::SchemaRegistry;
use crate::services::spreadsheet::{duplicate_keys, Sheet};
use crate::services::upsert::{match_values, resolve_numeric_fields, ModelRegistry, UpsertEngine};
use crate::services::validator::{ReferenceLookup, RowValidator};
use crate::types::{ImportLogEntry, ImportStatus, QueuedImportJob, SchemaConfig};

/// Outcome of a completed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: Uuid,
    pub status: ImportStatus,
    pub processed_rows: u32,
    pub failed_rows: u32,
    /// Rows skipped because every cell was empty
    pub blank_rows: u32,
}

/// A run-level failure, with the run it interrupted if one was started
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RunFailure {
    pub run_id: Option<Uuid>,
    #[source]
    pub error: ImportError,
}

impl RunFailure {
    fn before_run(error: impl Into<ImportError>) -> Self {
        Self {
            run_id: None,
            error: error.into(),
        }
    }
}

#[derive(Default)]
struct RowTally {
    processed: u32,
    failed: u32,
    blank: u32,
    ids: Vec<Uuid>,
}

#[derive(Clone)]
pub struct ImportPipeline {
    schemas: Arc<SchemaRegistry>,
    models: ModelRegistry,
    tracker: RunTracker,
    recorder: Arc<dyn LogRecorder>,
    lookup: Arc<dyn ReferenceLookup>,
    events: Arc<dyn EventSink>,
}

impl ImportPipeline {
    pub fn new(
        schemas: Arc<SchemaRegistry>,
        models: ModelRegistry,
        tracker: RunTracker,
        recorder: Arc<dyn LogRecorder>,
        lookup: Arc<dyn ReferenceLookup>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            schemas,
            models,
            tracker,
            recorder,
            lookup,
            events,
        }
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    /// Process one queued file.
    ///
    /// The temp file is removed only when the run completes; on any error
    /// it stays in place for a redelivery.
    pub async fn run(&self, job: &QueuedImportJob) -> Result<RunReport, RunFailure> {
        let schema = self
            .schemas
            .resolve(&job.import_type)
            .ok_or_else(|| RunFailure::before_run(ImportError::UnknownImportType(job.import_type.clone())))?;
        let repository = self.models.resolve(&schema.target).map_err(RunFailure::before_run)?;
        debug!(
            "Job {}: {} file '{}' into {}",
            job.id,
            schema.import_type,
            schema.slot,
            repository.model().target.table
        );

        let path = PathBuf::from(&job.temp_path);
        let sheet = tokio::task::spawn_blocking(move || Sheet::open(&path))
            .await
            .map_err(|e| RunFailure::before_run(anyhow::anyhow!("Spreadsheet reader panicked: {}", e)))?
            .map_err(RunFailure::before_run)?;

        let headers = ColumnNormalizer::for_schema(schema).normalize(&sheet.headers());
        for key in duplicate_keys(&headers) {
            warn!("Job {}: column '{}' appears more than once, last one wins", job.id, key);
        }
        check_required_headers(schema, &headers).map_err(RunFailure::before_run)?;

        let run = self
            .tracker
            .start(job.actor_id, &job.import_type, &job.file_name)
            .await
            .map_err(RunFailure::before_run)?;

        let engine = UpsertEngine::new(schema, repository, self.recorder.as_ref());
        let mut tally = RowTally::default();
        let outcome = async {
            self.process_rows(job, run.id, schema, &sheet, &headers, &engine, &mut tally)
                .await?;
            self.tracker
                .attach(engine.repository().as_ref(), job.actor_id, &dedup(&tally.ids), &job.import_type)
                .await?;
            let status = self
                .tracker
                .finish(run.id, tally.processed, tally.failed > 0)
                .await?;
            Ok::<_, ImportError>(status)
        }
        .await;

        let status = match outcome {
            Ok(status) => status,
            Err(error) => {
                if let Err(e) = self.tracker.abort(run.id, tally.processed).await {
                    warn!("Could not mark run {} as failed: {:#}", run.id, e);
                }
                return Err(RunFailure {
                    run_id: Some(run.id),
                    error,
                });
            }
        };

        if let Err(e) = tokio::fs::remove_file(&job.temp_path).await {
            warn!("Could not delete temp file {}: {}", job.temp_path, e);
        }

        let event = ImportEvent::Completed {
            run_id: run.id,
            actor_id: job.actor_id,
            import_type: job.import_type.clone(),
            status,
            message: status.toast(),
        };
        if let Err(e) = self.events.publish(&event).await {
            warn!("Could not publish completion of run {}: {:#}", run.id, e);
        }

        info!(
            "Import run {} ({}): {} imported, {} rejected, {} blank",
            run.id, status, tally.processed, tally.failed, tally.blank
        );

        Ok(RunReport {
            run_id: run.id,
            status,
            processed_rows: tally.processed,
            failed_rows: tally.failed,
            blank_rows: tally.blank,
        })
    }

    async fn process_rows(
        &self,
        job: &QueuedImportJob,
        run_id: Uuid,
        schema: &SchemaConfig,
        sheet: &Sheet,
        headers: &[String],
        engine: &UpsertEngine<'_>,
        tally: &mut RowTally,
    ) -> Result<(), ImportError> {
        let validator = RowValidator::new(schema, self.lookup.as_ref());

        for index in 0..sheet.data_row_count() {
            let row_number = i32::try_from(index + 2).unwrap_or(i32::MAX);
            let record = sheet.record(index, headers, schema);
            if record.is_blank() {
                tally.blank += 1;
                continue;
            }

            let (record, coercion_failures) = resolve_numeric_fields(record, schema, sheet);
            let except = match_values(schema, &record);
            let outcome = validator.validate(&record, &except, &coercion_failures).await?;

            if !outcome.is_valid() {
                debug!("Run {} row {}: {} validation errors", run_id, row_number, outcome.message_count());
                tally.failed += 1;
                for field in outcome.errors() {
                    for message in &field.messages {
                        let entry = ImportLogEntry {
                            id: Uuid::new_v4(),
                            import_run_id: Some(run_id),
                            actor_id: job.actor_id,
                            import_type: job.import_type.clone(),
                            row_number,
                            column: field.column.clone(),
                            invalid_value: field.value.clone(),
                            message: message.clone(),
                            created_at: Utc::now(),
                        };
                        self.recorder.record_import_log(&entry).await?;
                    }
                }
                continue;
            }

            let id = engine.apply(&record, run_id, row_number).await?;
            tally.ids.push(id);
            tally.processed += 1;
        }

        Ok(())
    }
}

/// Ids in first-seen order without repeats
fn dedup(ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}
