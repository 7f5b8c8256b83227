//! Import log and audit log sink

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{AuditLogEntry, ImportLogEntry};

/// Append-only sink; each entry is written as soon as it is produced.
#[async_trait]
pub trait LogRecorder: Send + Sync {
    async fn record_import_log(&self, entry: &ImportLogEntry) -> Result<()>;

    async fn record_audit(&self, entry: &AuditLogEntry) -> Result<()>;
}
