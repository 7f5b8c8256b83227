//! CLI argument parsing for the dataport-worker binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "dataport-worker", about = "Dataport spreadsheet import worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the worker server (default if no subcommand given)
    Serve,
    /// Run database migrations and exit
    Migrate,
    /// Load and validate an import schema file, then print its import types
    CheckSchema {
        /// Schema file; defaults to IMPORT_SCHEMA_PATH or the embedded schema
        #[arg(long)]
        path: Option<PathBuf>,
    },
}
