//! Import JetStream processor
//!
//! Each uploaded file is one message on a work-queue stream. Jobs run in
//! parallel on a bounded pool of workers; a job that fails on storage I/O is
//! NAK'ed with a back-off delay and redelivered until the attempt limit.
//!
//! ## Streams
//! - `DATAPORT_IMPORT_JOBS` - one message per uploaded file

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_nats::jetstream::{self, AckKind, Context as JsContext};
use async_nats::Client;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::defaults::retry_delay;
use crate::error::ImportError;
use crate::services::job_history::JOB_HISTORY;
use crate::services::notifier::{EventSink, ImportEvent, ImportFailure};
use crate::services::pipeline::ImportPipeline;
use crate::types::QueuedImportJob;

// Stream and consumer names
const STREAM_NAME: &str = "DATAPORT_IMPORT_JOBS";
const CONSUMER_NAME: &str = "import_workers";
const SUBJECT: &str = "dataport.jobs.import";

/// A run may take a while on large workbooks before it is acked
const ACK_WAIT: Duration = Duration::from_secs(600);

/// Running jobs report progress well inside `ACK_WAIT` so the server does
/// not redeliver them to another worker
const PROGRESS_INTERVAL: Duration = Duration::from_secs(150);

/// What to do with a message whose run failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureAction {
    /// Redeliver after the delay
    Retry(Duration),
    /// Remove from the queue and notify the actor
    GiveUp,
}

/// Drive `work` to completion, calling `beat` every `every` while it runs
async fn with_heartbeat<T, W, B, BF>(work: W, every: Duration, mut beat: B) -> T
where
    W: Future<Output = T>,
    B: FnMut() -> BF,
    BF: Future<Output = ()>,
{
    tokio::pin!(work);
    let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + every, every);

    loop {
        tokio::select! {
            result = &mut work => return result,
            _ = ticks.tick() => beat().await,
        }
    }
}

fn failure_action(error: &ImportError, attempt: u32, max_attempts: u32) -> FailureAction {
    if error.is_retryable() && attempt < max_attempts {
        FailureAction::Retry(retry_delay(attempt))
    } else {
        FailureAction::GiveUp
    }
}

/// Import job processor with JetStream integration
pub struct ImportProcessor {
    js: JsContext,
    pipeline: ImportPipeline,
    events: Arc<dyn EventSink>,
    max_attempts: u32,
    workers: usize,
}

impl ImportProcessor {
    /// Create a new import processor, initializing the JetStream stream
    pub async fn new(
        client: Client,
        pipeline: ImportPipeline,
        events: Arc<dyn EventSink>,
        max_attempts: u32,
        workers: usize,
    ) -> Result<Self> {
        let js = jetstream::new(client);

        let stream_config = jetstream::stream::Config {
            name: STREAM_NAME.to_string(),
            subjects: vec![SUBJECT.to_string()],
            max_messages: 1_000,
            retention: jetstream::stream::RetentionPolicy::WorkQueue,
            ..Default::default()
        };
        js.get_or_create_stream(stream_config).await?;
        info!("JetStream import stream '{}' ready", STREAM_NAME);

        Ok(Self {
            js,
            pipeline,
            events,
            max_attempts: max_attempts.max(1),
            workers: workers.max(1),
        })
    }

    pub fn pipeline(&self) -> &ImportPipeline {
        &self.pipeline
    }

    /// Submit an import job to the queue
    pub async fn submit_job(&self, job: &QueuedImportJob) -> Result<Uuid> {
        let payload = serde_json::to_vec(job)?;
        self.js.publish(SUBJECT, payload.into()).await?.await?;

        info!(
            "Import job {} submitted: {} from {}",
            job.id, job.import_type, job.file_name
        );
        Ok(job.id)
    }

    /// Start processing import jobs from the queue
    pub async fn start_processing(self: Arc<Self>) -> Result<()> {
        let stream = self.js.get_stream(STREAM_NAME).await?;

        let consumer_config = jetstream::consumer::pull::Config {
            durable_name: Some(CONSUMER_NAME.to_string()),
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            ack_wait: ACK_WAIT,
            max_deliver: i64::from(self.max_attempts),
            filter_subject: SUBJECT.to_string(),
            ..Default::default()
        };

        let consumer = stream.get_or_create_consumer(CONSUMER_NAME, consumer_config).await?;
        info!(
            "JetStream import consumer '{}' ready ({} workers)",
            CONSUMER_NAME, self.workers
        );

        let slots = Arc::new(Semaphore::new(self.workers));
        let mut messages = consumer.messages().await?;

        while let Some(msg) = messages.next().await {
            match msg {
                Ok(msg) => {
                    let permit = Arc::clone(&slots).acquire_owned().await?;
                    let processor = Arc::clone(&self);

                    tokio::spawn(async move {
                        let _permit = permit;
                        if let Err(e) = processor.process_job(msg).await {
                            error!("Failed to process import job: {:#}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Error receiving import message: {}", e);
                }
            }
        }

        Ok(())
    }

    /// Process a single import job
    async fn process_job(&self, msg: jetstream::Message) -> Result<()> {
        let job: QueuedImportJob = match serde_json::from_slice(&msg.payload) {
            Ok(job) => job,
            Err(e) => {
                // Malformed payloads never become valid on redelivery
                if let Err(ack_err) = msg.ack_with(AckKind::Term).await {
                    error!("Failed to terminate malformed import job: {:?}", ack_err);
                }
                return Err(e.into());
            }
        };
        let attempt = msg
            .info()
            .map(|i| u32::try_from(i.delivered).unwrap_or(u32::MAX))
            .unwrap_or(1)
            .max(1);
        let started_at = Utc::now();

        info!(
            "Processing import job {} ({}, attempt {}/{})",
            job.id, job.file_name, attempt, self.max_attempts
        );

        let (delivery, job_id) = (&msg, job.id);
        let outcome = with_heartbeat(self.pipeline.run(&job), PROGRESS_INTERVAL, || async move {
            if let Err(e) = delivery.ack_with(AckKind::Progress).await {
                warn!("Failed to extend ack deadline of import job {}: {:?}", job_id, e);
            }
        })
        .await;

        match outcome {
            Ok(report) => {
                if let Err(e) = msg.ack().await {
                    error!("Failed to ack import job {}: {:?}", job.id, e);
                }
                JOB_HISTORY.record_completed(
                    &job,
                    attempt,
                    report.run_id,
                    started_at,
                    serde_json::to_value(&report).ok(),
                );
            }
            Err(failure) => match failure_action(&failure.error, attempt, self.max_attempts) {
                FailureAction::Retry(delay) => {
                    warn!(
                        "Import job {} failed (attempt {}), retrying in {}s: {}",
                        job.id,
                        attempt,
                        delay.as_secs(),
                        failure.error
                    );
                    if let Err(e) = msg.ack_with(AckKind::Nak(Some(delay))).await {
                        error!("Failed to nak import job {}: {:?}", job.id, e);
                    }
                }
                FailureAction::GiveUp => {
                    error!(
                        "Import job {} failed after {} attempt(s) [{}]: {}",
                        job.id,
                        attempt,
                        failure.error.code(),
                        failure.error
                    );
                    if let Err(e) = msg.ack_with(AckKind::Term).await {
                        error!("Failed to terminate import job {}: {:?}", job.id, e);
                    }

                    let message = failure.error.to_string();
                    JOB_HISTORY.record_failed(&job, attempt, failure.run_id, started_at, message.clone());

                    let event = ImportEvent::Failed(ImportFailure::from_job(&job, failure.run_id, message));
                    if let Err(e) = self.events.publish(&event).await {
                        warn!("Could not publish failure of job {}: {:#}", job.id, e);
                    }
                }
            },
        }

        Ok(())
    }
}

// ==========================================================================
// Tests
// ==========================================================================
