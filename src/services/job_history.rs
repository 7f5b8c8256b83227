//! Import job history
//!
//! Stores recent job outcomes in memory with file-backed persistence
//! so history survives worker restarts.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;
use chrono::{DateTime, Utc};

use crate::types::QueuedImportJob;

const MAX_HISTORY_SIZE: usize = 100;
const HISTORY_FILE_NAME: &str = "import-history.json";

/// Job entry in history
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobHistoryEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub import_type: String,
    pub file_name: String,
    /// `completed` or `failed`
    pub status: String,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<serde_json::Value>,
}

/// Response for listing job history
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobHistoryResponse {
    pub jobs: Vec<JobHistoryEntry>,
    pub total: usize,
}

/// Job history storage backed by an in-memory deque + JSON file on disk.
pub struct JobHistoryService {
    history: Arc<RwLock<VecDeque<JobHistoryEntry>>>,
    path: Option<PathBuf>,
}

impl JobHistoryService {
    pub fn new() -> Self {
        let logs_dir = std::env::var("LOGS_DIR").unwrap_or_else(|_| "../logs".to_string());
        let path = PathBuf::from(logs_dir).join(HISTORY_FILE_NAME);

        let mut deque = VecDeque::with_capacity(MAX_HISTORY_SIZE);
        if let Some(loaded) = Self::load_from_disk(&path) {
            deque.extend(loaded.into_iter().take(MAX_HISTORY_SIZE));
            info!("Loaded {} import history entries from disk", deque.len());
        }
        Self {
            history: Arc::new(RwLock::new(deque)),
            path: Some(path),
        }
    }

    /// Record a job whose run completed, with its run report
    pub fn record_completed(
        &self,
        job: &QueuedImportJob,
        attempts: u32,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        report: Option<serde_json::Value>,
    ) {
        self.add_entry(Self::entry(job, "completed", attempts, Some(run_id), started_at, None, report));
    }

    /// Record a job that will not be retried again
    pub fn record_failed(
        &self,
        job: &QueuedImportJob,
        attempts: u32,
        run_id: Option<Uuid>,
        started_at: DateTime<Utc>,
        error: String,
    ) {
        self.add_entry(Self::entry(job, "failed", attempts, run_id, started_at, Some(error), None));
    }

    fn entry(
        job: &QueuedImportJob,
        status: &str,
        attempts: u32,
        run_id: Option<Uuid>,
        started_at: DateTime<Utc>,
        error: Option<String>,
        report: Option<serde_json::Value>,
    ) -> JobHistoryEntry {
        let completed_at = Utc::now();
        let duration_ms = (completed_at - started_at).num_milliseconds().max(0) as u64;

        JobHistoryEntry {
            id: job.id,
            user_id: job.actor_id,
            import_type: job.import_type.clone(),
            file_name: job.file_name.clone(),
            status: status.to_string(),
            attempts,
            run_id,
            started_at,
            completed_at,
            duration_ms,
            error,
            report,
        }
    }

    fn add_entry(&self, entry: JobHistoryEntry) {
        let mut history = self.history.write();

        if history.len() >= MAX_HISTORY_SIZE {
            history.pop_back();
        }

        history.push_front(entry);

        if let Some(path) = &self.path {
            Self::save_to_disk(path, &history);
        }
    }

    /// Get recent job history (all users, admin only)
    pub fn get_recent(&self, limit: usize) -> JobHistoryResponse {
        let history = self.history.read();
        let jobs: Vec<JobHistoryEntry> = history
            .iter()
            .take(limit)
            .cloned()
            .collect();
        let total = history.len();

        JobHistoryResponse { jobs, total }
    }

    /// Get recent job history filtered by user (multi-tenant safe)
    pub fn get_recent_for_user(&self, user_id: Uuid, limit: usize) -> JobHistoryResponse {
        let history = self.history.read();
        let jobs: Vec<JobHistoryEntry> = history
            .iter()
            .filter(|j| j.user_id == user_id)
            .take(limit)
            .cloned()
            .collect();
        let total = jobs.len();

        JobHistoryResponse { jobs, total }
    }

    fn load_from_disk(path: &PathBuf) -> Option<Vec<JobHistoryEntry>> {
        if !path.exists() {
            return None;
        }
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<Vec<JobHistoryEntry>>(&content) {
                Ok(entries) => Some(entries),
                Err(e) => {
                    warn!("Failed to parse import history file: {}", e);
                    None
                }
            },
            Err(e) => {
                warn!("Failed to read import history file: {}", e);
                None
            }
        }
    }

    fn save_to_disk(path: &PathBuf, history: &VecDeque<JobHistoryEntry>) {
        if let Some(dir) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(dir) {
                warn!("Failed to create import history directory: {}", e);
                return;
            }
        }
        let entries: Vec<&JobHistoryEntry> = history.iter().collect();
        match serde_json::to_string_pretty(&entries) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    warn!("Failed to write import history file: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialize import history: {}", e),
        }
    }
}

impl Default for JobHistoryService {
    fn default() -> Self {
        Self::new()
    }
}

// Global instance for easy access
lazy_static::lazy_static! {
    pub static ref JOB_HISTORY: JobHistoryService = JobHistoryService::new();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_service() -> JobHistoryService {
        JobHistoryService {
            history: Arc::new(RwLock::new(VecDeque::with_capacity(MAX_HISTORY_SIZE))),
            path: None,
        }
    }

    fn job(user_id: Uuid) -> QueuedImportJob {
        QueuedImportJob::new(user_id, "orders", "orders.csv", "/tmp/orders.csv")
    }

    #[test]
    fn test_record_completed_job() {
        let service = fresh_service();
        let user_id = Uuid::new_v4();
        let job = job(user_id);
        let run_id = Uuid::new_v4();
        let started_at = Utc::now() - chrono::Duration::seconds(5);

        service.record_completed(&job, 1, run_id, started_at, Some(serde_json::json!({"processedRows": 3})));

        let history = service.get_recent(10);
        assert_eq!(history.jobs.len(), 1);
        assert_eq!(history.jobs[0].id, job.id);
        assert_eq!(history.jobs[0].status, "completed");
        assert_eq!(history.jobs[0].run_id, Some(run_id));
        assert!(history.jobs[0].duration_ms >= 5000);
    }

    #[test]
    fn test_record_failed_job() {
        let service = fresh_service();
        let job = job(Uuid::new_v4());

        service.record_failed(&job, 3, None, Utc::now(), "Missing required column: sku".to_string());

        let history = service.get_recent(10);
        assert_eq!(history.jobs[0].status, "failed");
        assert_eq!(history.jobs[0].attempts, 3);
        assert_eq!(history.jobs[0].error.as_deref(), Some("Missing required column: sku"));
    }

    #[test]
    fn test_history_limit() {
        let service = fresh_service();
        let user_id = Uuid::new_v4();

        for _ in 0..150 {
            service.record_failed(&job(user_id), 1, None, Utc::now(), "x".to_string());
        }

        let history = service.get_recent(200);
        assert_eq!(history.jobs.len(), MAX_HISTORY_SIZE);
    }

    #[test]
    fn test_get_recent_for_user_isolates_users() {
        let service = fresh_service();
        let user_a = Uuid::new_v4();
        let user_b = Uuid::new_v4();

        service.record_completed(&job(user_a), 1, Uuid::new_v4(), Utc::now(), None);
        service.record_failed(&job(user_b), 3, None, Utc::now(), "x".to_string());
        service.record_completed(&job(user_a), 2, Uuid::new_v4(), Utc::now(), None);

        let history_a = service.get_recent_for_user(user_a, 50);
        assert_eq!(history_a.jobs.len(), 2);
        assert!(history_a.jobs.iter().all(|j| j.user_id == user_a));
    }
}
