//! NATS message handlers

pub mod audit;
pub mod import;
pub mod ping;

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subject};
use serde::Serialize;
use sqlx::PgPool;
use tokio::select;
use tracing::{error, info, warn};

use crate::auth::{self, AuthInfo, CapabilityCheck, ClaimsCapabilities};
use crate::config::Config;
use crate::db::store::{PgEntityRepository, PgImportStore};
use crate::services::email_sender;
use crate::services::import_processor::ImportProcessor;
use crate::services::notifier::{EventSink, FailureMailer, NotificationHub, RealtimeBroadcaster};
use crate::services::pipeline::ImportPipeline;
use crate::services::run_tracker::RunTracker;
use crate::services::schema::SchemaRegistry;
use crate::types::{ErrorResponse, Request};

/// Serialize and publish a reply
pub(crate) async fn respond<T: Serialize>(client: &Client, reply: Subject, body: &T) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    if let Err(e) = client.publish(reply, payload.into()).await {
        warn!("Failed to publish reply: {}", e);
    }
    Ok(())
}

/// Authenticate a request, or build its UNAUTHORIZED reply
pub(crate) fn authorize<T>(request: &Request<T>, jwt_secret: &str) -> Result<AuthInfo, ErrorResponse> {
    auth::extract_auth(request, jwt_secret)
        .map_err(|e| ErrorResponse::new(request.id, "UNAUTHORIZED", e.to_string()))
}

/// Wire the import pipeline to Postgres and NATS
async fn build_processor(
    client: &Client,
    pool: &PgPool,
    config: &Config,
    schemas: Arc<SchemaRegistry>,
) -> Result<Arc<ImportProcessor>> {
    let store = PgImportStore::new(pool.clone());
    let models = PgEntityRepository::registry(&schemas, pool)?;

    let email = email_sender::from_config(config);
    let events: Arc<dyn EventSink> = Arc::new(
        NotificationHub::new()
            .subscribe(Arc::new(RealtimeBroadcaster::new(client.clone())))
            .subscribe(Arc::new(FailureMailer::new(email))),
    );

    let pipeline = ImportPipeline::new(
        schemas,
        models,
        RunTracker::new(Arc::new(store.clone())),
        Arc::new(store.clone()),
        Arc::new(store),
        events.clone(),
    );

    let processor = ImportProcessor::new(
        client.clone(),
        pipeline,
        events,
        config.import_max_attempts,
        config.import_workers,
    )
    .await?;

    Ok(Arc::new(processor))
}

/// Start all message handlers
pub async fn start_handlers(
    client: Client,
    pool: PgPool,
    config: &Config,
    schemas: Arc<SchemaRegistry>,
) -> Result<()> {
    info!("Starting message handlers...");

    let capabilities: Arc<dyn CapabilityCheck> = Arc::new(ClaimsCapabilities);
    let processor = build_processor(&client, &pool, config, schemas).await?;

    // Subscribe to all subjects
    let ping_sub = client.subscribe("dataport.ping").await?;
    let submit_sub = client.subscribe("dataport.import.submit").await?;
    let runs_sub = client.subscribe("dataport.import.runs.list").await?;
    let logs_sub = client.subscribe("dataport.import.logs.list").await?;
    let audits_sub = client.subscribe("dataport.import.audits.list").await?;
    let history_sub = client.subscribe("dataport.import.jobs.history").await?;

    info!("Subscribed to NATS subjects");

    let worker_processor = Arc::clone(&processor);
    let worker_handle = tokio::spawn(async move { worker_processor.start_processing().await });

    let ping_handle = tokio::spawn(ping::handle_ping(client.clone(), ping_sub));

    let submit_handle = tokio::spawn(import::handle_submit(
        client.clone(),
        submit_sub,
        processor,
        capabilities.clone(),
        config.jwt_secret.clone(),
        config.temp_upload_dir(),
    ));

    let runs_handle = tokio::spawn(audit::handle_list_runs(
        client.clone(),
        runs_sub,
        pool.clone(),
        capabilities.clone(),
        config.jwt_secret.clone(),
    ));

    let logs_handle = tokio::spawn(audit::handle_list_logs(
        client.clone(),
        logs_sub,
        pool.clone(),
        capabilities.clone(),
        config.jwt_secret.clone(),
    ));

    let audits_handle = tokio::spawn(audit::handle_list_audits(
        client.clone(),
        audits_sub,
        pool,
        capabilities.clone(),
        config.jwt_secret.clone(),
    ));

    let history_handle = tokio::spawn(audit::handle_job_history(
        client,
        history_sub,
        capabilities,
        config.jwt_secret.clone(),
    ));

    info!("All handlers started");

    // Wait for any handler to finish (which would indicate an error)
    select! {
        result = worker_handle => {
            error!("Import worker finished: {:?}", result);
        }
        result = ping_handle => {
            error!("Ping handler finished: {:?}", result);
        }
        result = submit_handle => {
            error!("Import submit handler finished: {:?}", result);
        }
        result = runs_handle => {
            error!("Import runs handler finished: {:?}", result);
        }
        result = logs_handle => {
            error!("Import logs handler finished: {:?}", result);
        }
        result = audits_handle => {
            error!("Audit logs handler finished: {:?}", result);
        }
        result = history_handle => {
            error!("Job history handler finished: {:?}", result);
        }
    }

    Ok(())
}
