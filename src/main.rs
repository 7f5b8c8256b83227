//! Dataport Worker - background spreadsheet import service
//!
//! Accepts uploads over NATS, queues one JetStream job per file and runs
//! each file through the import pipeline.

mod auth;
mod cli;
mod config;
mod db;
mod defaults;
mod error;
mod handlers;
mod services;
mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};
use crate::services::schema::SchemaRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs directory - use LOGS_DIR env var or default to ../logs (relative to worker)
    let logs_dir = std::env::var("LOGS_DIR")
        .unwrap_or_else(|_| "../logs".to_string());
    std::fs::create_dir_all(&logs_dir).ok();

    // File appender for persistent logs (daily rotation)
    let file_appender = RollingFileAppender::new(
        Rotation::DAILY,
        &logs_dir,
        "worker.log",
    );
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Initialize logging - both stdout and file
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,dataport_worker=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())  // stdout
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))  // file
        .init();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve().await,
        Command::Migrate => migrate().await,
        Command::CheckSchema { path } => check_schema(path),
    }
}

async fn serve() -> Result<()> {
    info!("Starting Dataport Worker...");

    let config = config::Config::from_env()?;
    info!("Configuration loaded");

    let schemas = Arc::new(SchemaRegistry::load(config.import_schema_path.as_deref())?);
    info!("Import schema loaded: {} slot(s)", schemas.iter().count());

    let pool = db::create_pool(&config.database_url).await?;
    info!("Connected to PostgreSQL");

    db::run_migrations(&pool).await?;

    // Connect to NATS (supports optional NATS_USER/NATS_PASSWORD auth).
    let nats_client = match (std::env::var("NATS_USER"), std::env::var("NATS_PASSWORD")) {
        (Ok(user), Ok(password)) if !user.is_empty() => {
            async_nats::ConnectOptions::new()
                .user_and_password(user, password)
                .connect(&config.nats_url)
                .await?
        }
        _ => async_nats::connect(&config.nats_url).await?,
    };
    info!("Connected to NATS at {}", config.nats_url);

    let handler_result = handlers::start_handlers(nats_client, pool, &config, schemas).await;

    if let Err(e) = handler_result {
        error!("Handler error: {:#}", e);
        return Err(e);
    }

    Ok(())
}

async fn migrate() -> Result<()> {
    let config = config::Config::from_env()?;
    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await
}

fn check_schema(path: Option<PathBuf>) -> Result<()> {
    dotenvy::dotenv().ok();
    let path = path.or_else(|| {
        std::env::var("IMPORT_SCHEMA_PATH")
            .ok()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    });

    let registry = SchemaRegistry::load(path.as_deref())?;
    match &path {
        Some(p) => println!("Schema {} is valid", p.display()),
        None => println!("Embedded schema is valid"),
    }
    for (import_type, label, slots) in registry.import_types() {
        println!("  {} ({})", import_type, label);
        for schema in slots.iter().filter_map(|key| registry.resolve(key)) {
            println!(
                "    {} \"{}\" -> {} ({} fields)",
                schema.slot,
                schema.label,
                schema.target.table,
                schema.fields.len()
            );
        }
    }

    Ok(())
}
