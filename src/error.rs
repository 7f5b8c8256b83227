//! Run-level error taxonomy for the import pipeline
//!
//! Field-level problems never surface here: they are collected by the row
//! validator and written to the import log. Everything in [`ImportError`]
//! ends the run.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    /// A column required by the schema is absent from the header row.
    #[error("Missing required column: {0}")]
    MissingHeader(String),

    #[error("Unknown import type: {0}")]
    UnknownImportType(String),

    #[error("No repository registered for model '{0}'")]
    UnknownModel(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedFile(String),

    #[error("Failed to parse spreadsheet: {0}")]
    Parse(String),

    #[error("Spreadsheet contains no rows")]
    EmptyFile,

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database or sink failure while the run was in progress.
    #[error("Storage error: {0:#}")]
    Storage(anyhow::Error),
}

impl ImportError {
    /// Whether another delivery of the same job may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ImportError::Io(_) | ImportError::Storage(_))
    }

    /// Short machine-readable code used in job history and NATS replies.
    pub fn code(&self) -> &'static str {
        match self {
            ImportError::MissingHeader(_) => "MISSING_HEADER",
            ImportError::UnknownImportType(_) => "UNKNOWN_TYPE",
            ImportError::UnknownModel(_) => "UNKNOWN_MODEL",
            ImportError::UnsupportedFile(_) => "UNSUPPORTED_FILE",
            ImportError::Parse(_) | ImportError::EmptyFile => "PARSE_ERROR",
            ImportError::Io(_) => "IO_ERROR",
            ImportError::Storage(_) => "STORAGE_ERROR",
        }
    }
}

impl From<anyhow::Error> for ImportError {
    fn from(e: anyhow::Error) -> Self {
        ImportError::Storage(e)
    }
}
