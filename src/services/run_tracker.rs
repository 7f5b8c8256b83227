//! Import run lifecycle: pending -> success | errors | failed

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use crate::services::upsert::EntityRepository;
use crate::types::{ImportRun, ImportStatus};

#[async_trait]
pub trait RunRepository: Send + Sync {
    async fn insert_run(&self, run: &ImportRun) -> Result<()>;

    /// Set the final status of a pending run. Returns `false` when the run
    /// was already finalized.
    async fn finalize_run(&self, run_id: Uuid, status: ImportStatus, processed_rows: i32) -> Result<bool>;
}

#[derive(Clone)]
pub struct RunTracker {
    runs: Arc<dyn RunRepository>,
}

impl RunTracker {
    pub fn new(runs: Arc<dyn RunRepository>) -> Self {
        Self { runs }
    }

    pub async fn start(&self, actor_id: Uuid, import_type: &str, file_name: &str) -> Result<ImportRun> {
        let run = ImportRun::new(actor_id, import_type, file_name);
        self.runs.insert_run(&run).await?;
        info!("Import run {} started ({}, {})", run.id, import_type, file_name);
        Ok(run)
    }

    /// Compute and persist the final status
    pub async fn finish(&self, run_id: Uuid, processed_rows: u32, has_errors: bool) -> Result<ImportStatus> {
        let status = ImportStatus::compute(processed_rows, has_errors);
        let updated = self
            .runs
            .finalize_run(run_id, status, i32::try_from(processed_rows).unwrap_or(i32::MAX))
            .await?;
        if !updated {
            warn!("Import run {} was already finalized", run_id);
        }
        info!("Import run {} finished: {} ({} rows)", run_id, status, processed_rows);
        Ok(status)
    }

    /// Mark a run interrupted by a run-level error as failed
    pub async fn abort(&self, run_id: Uuid, processed_rows: u32) -> Result<()> {
        let updated = self
            .runs
            .finalize_run(
                run_id,
                ImportStatus::Failed,
                i32::try_from(processed_rows).unwrap_or(i32::MAX),
            )
            .await?;
        if updated {
            warn!("Import run {} aborted after {} rows", run_id, processed_rows);
        }
        Ok(())
    }

    /// Associate the imported records with the actor
    pub async fn attach(
        &self,
        repository: &dyn EntityRepository,
        actor_id: Uuid,
        ids: &[Uuid],
        import_type: &str,
    ) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        repository.attach_to_actor(actor_id, ids, import_type).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::MemoryStore;

    #[tokio::test]
    async fn test_status_set_exactly_once() {
        let store = MemoryStore::default();
        let tracker = RunTracker::new(Arc::new(store.clone()));

        let run = tracker.start(Uuid::new_v4(), "orders", "orders.csv").await.unwrap();
        assert_eq!(store.run(run.id).unwrap().status, ImportStatus::Pending);

        let status = tracker.finish(run.id, 3, true).await.unwrap();
        assert_eq!(status, ImportStatus::Errors);

        tracker.abort(run.id, 3).await.unwrap();
        let stored = store.run(run.id).unwrap();
        assert_eq!(stored.status, ImportStatus::Errors);
        assert_eq!(stored.processed_rows, 3);
        assert!(stored.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_abort_marks_failed() {
        let store = MemoryStore::default();
        let tracker = RunTracker::new(Arc::new(store.clone()));

        let run = tracker.start(Uuid::new_v4(), "items", "items.xlsx").await.unwrap();
        tracker.abort(run.id, 1).await.unwrap();
        assert_eq!(store.run(run.id).unwrap().status, ImportStatus::Failed);
    }

    #[tokio::test]
    async fn test_zero_rows_is_failed() {
        let store = MemoryStore::default();
        let tracker = RunTracker::new(Arc::new(store.clone()));

        let run = tracker.start(Uuid::new_v4(), "orders", "empty.csv").await.unwrap();
        assert_eq!(tracker.finish(run.id, 0, false).await.unwrap(), ImportStatus::Failed);
    }
}
