//! Import completion and failure notifications
//!
//! The pipeline publishes domain events to an [`EventSink`]. The
//! [`NotificationHub`] fans them out to independent subscribers: the realtime
//! broadcaster (dashboard toasts) and the failure mailer.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::defaults::{BROADCAST_EVENT, BROADCAST_SUBJECT};
use crate::services::email_sender::EmailSender;
use crate::services::email_templates::ImportFailedEmail;
use crate::types::{
    BroadcastEnvelope, DataImportPayload, ImportStatus, QueuedImportJob, ToastMessage,
};

// ==========================================================================
// Events
// ==========================================================================

#[derive(Debug, Clone)]
pub enum ImportEvent {
    /// The run went through every row and has a final status
    Completed {
        run_id: Uuid,
        actor_id: Uuid,
        import_type: String,
        status: ImportStatus,
        message: ToastMessage,
    },
    /// The run could not be completed
    Failed(ImportFailure),
}

#[derive(Debug, Clone)]
pub struct ImportFailure {
    pub job_id: Uuid,
    /// `None` when the job failed before a run was created
    pub run_id: Option<Uuid>,
    pub actor_id: Uuid,
    pub actor_email: Option<String>,
    pub actor_name: Option<String>,
    pub import_type: String,
    pub file_name: String,
    pub error: String,
}

impl ImportFailure {
    pub fn from_job(job: &QueuedImportJob, run_id: Option<Uuid>, error: impl Into<String>) -> Self {
        Self {
            job_id: job.id,
            run_id,
            actor_id: job.actor_id,
            actor_email: job.actor_email.clone(),
            actor_name: job.actor_name.clone(),
            import_type: job.import_type.clone(),
            file_name: job.file_name.clone(),
            error: error.into(),
        }
    }
}

impl ImportEvent {
    /// One-line description for logs
    pub fn summary(&self) -> String {
        match self {
            ImportEvent::Completed {
                run_id,
                actor_id,
                import_type,
                status,
                ..
            } => format!("{} run {} by {} finished: {}", import_type, run_id, actor_id, status),
            ImportEvent::Failed(failure) => match failure.run_id {
                Some(run_id) => format!(
                    "{} job {} (run {}) by {} failed",
                    failure.import_type, failure.job_id, run_id, failure.actor_id
                ),
                None => format!(
                    "{} job {} by {} failed before a run started",
                    failure.import_type, failure.job_id, failure.actor_id
                ),
            },
        }
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: &ImportEvent) -> Result<()>;
}

// ==========================================================================
// Fan-out
// ==========================================================================

/// Delivers each event to every subscriber. A failing subscriber is logged
/// and does not stop the others.
#[derive(Clone, Default)]
pub struct NotificationHub {
    subscribers: Vec<Arc<dyn EventSink>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.subscribers.push(sink);
        self
    }
}

#[async_trait]
impl EventSink for NotificationHub {
    async fn publish(&self, event: &ImportEvent) -> Result<()> {
        for subscriber in &self.subscribers {
            if let Err(e) = subscriber.publish(event).await {
                error!("Notification subscriber failed: {:#}", e);
            }
        }
        Ok(())
    }
}

// ==========================================================================
// Realtime broadcast
// ==========================================================================

/// Publishes completion toasts on the `data-import` subject
pub struct RealtimeBroadcaster {
    client: async_nats::Client,
}

impl RealtimeBroadcaster {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }
}

/// Toast for an event; failures always show the danger toast
pub fn toast_for(event: &ImportEvent) -> ToastMessage {
    match event {
        ImportEvent::Completed { message, .. } => message.clone(),
        ImportEvent::Failed(_) => ImportStatus::Failed.toast(),
    }
}

pub fn broadcast_envelope(message: ToastMessage) -> BroadcastEnvelope<DataImportPayload> {
    BroadcastEnvelope {
        event: BROADCAST_EVENT.to_string(),
        data: DataImportPayload { message },
    }
}

#[async_trait]
impl EventSink for RealtimeBroadcaster {
    async fn publish(&self, event: &ImportEvent) -> Result<()> {
        let envelope = broadcast_envelope(toast_for(event));
        let payload = serde_json::to_vec(&envelope)?;
        self.client
            .publish(BROADCAST_SUBJECT, payload.into())
            .await
            .context("Failed to publish import notification")?;
        debug!("Broadcast '{}' on {} ({})", envelope.data.message.text, BROADCAST_SUBJECT, event.summary());
        Ok(())
    }
}

// ==========================================================================
// Failure e-mail
// ==========================================================================

/// E-mails the actor when an import fails, retrying with back-off
pub struct FailureMailer {
    sender: Arc<dyn EmailSender>,
    max_attempts: u32,
    base_delay: Duration,
}

impl FailureMailer {
    pub fn new(sender: Arc<dyn EmailSender>) -> Self {
        Self {
            sender,
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }

    #[cfg(test)]
    pub fn with_retry(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.base_delay = base_delay;
        self
    }
}

#[async_trait]
impl EventSink for FailureMailer {
    async fn publish(&self, event: &ImportEvent) -> Result<()> {
        let failure = match event {
            ImportEvent::Failed(failure) => failure,
            ImportEvent::Completed { .. } => return Ok(()),
        };

        let Some(to) = failure.actor_email.as_deref() else {
            warn!("Import job {} failed but actor {} has no e-mail", failure.job_id, failure.actor_id);
            return Ok(());
        };

        let message = ImportFailedEmail {
            to,
            username: failure.actor_name.as_deref().unwrap_or(to),
            import_type: &failure.import_type,
            file_name: &failure.file_name,
            error_message: &failure.error,
        }
        .render();

        let mut attempt = 1;
        loop {
            match self.sender.send(message.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.max_attempts => {
                    warn!("Failure e-mail attempt {}/{} failed: {:#}", attempt, self.max_attempts, e);
                    tokio::time::sleep(self.base_delay * 2u32.saturating_pow(attempt - 1)).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e.context(format!(
                        "Failure e-mail for job {} not delivered after {} attempts",
                        failure.job_id, attempt
                    )));
                }
            }
        }
    }
}
