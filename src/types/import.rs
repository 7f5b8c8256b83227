//! Import run, log and audit types

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use thiserror::Error;
use uuid::Uuid;

/// Column key -> cell value; `None` for empty cells
pub type FieldValues = BTreeMap<String, Option<String>>;

// =============================================================================
// STATUS & TOASTS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    Pending,
    Success,
    Errors,
    Failed,
}

impl ImportStatus {
    /// Final status of a run.
    ///
    /// `failed` when nothing was imported, `errors` when some rows were
    /// rejected, otherwise `success`.
    pub fn compute(processed_rows: u32, has_errors: bool) -> Self {
        if processed_rows == 0 {
            ImportStatus::Failed
        } else if has_errors {
            ImportStatus::Errors
        } else {
            ImportStatus::Success
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Pending => "pending",
            ImportStatus::Success => "success",
            ImportStatus::Errors => "errors",
            ImportStatus::Failed => "failed",
        }
    }

    /// Completion message shown to the user
    pub fn toast(&self) -> ToastMessage {
        let (theme, text) = match self {
            ImportStatus::Pending => (
                Theme::Info,
                "Import is in progress. You will be notified when it is complete.",
            ),
            ImportStatus::Success => (Theme::Success, "Import Process Finished Successfully!"),
            ImportStatus::Errors => (
                Theme::Warning,
                "Import Process Finished but some errors occurred!",
            ),
            ImportStatus::Failed => (Theme::Danger, "Import Process Failed!"),
        };
        ToastMessage {
            theme,
            text: text.to_string(),
        }
    }
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown import status '{0}'")]
pub struct UnknownStatus(String);

impl FromStr for ImportStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ImportStatus::Pending),
            "success" => Ok(ImportStatus::Success),
            "errors" => Ok(ImportStatus::Errors),
            "failed" => Ok(ImportStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Toast theme understood by the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Success,
    Warning,
    Danger,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToastMessage {
    pub theme: Theme,
    pub text: String,
}

// =============================================================================
// PERSISTED RECORDS
// =============================================================================

/// One pipeline execution over one uploaded file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRun {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub import_type: String,
    pub file_name: String,
    pub status: ImportStatus,
    pub processed_rows: i32,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ImportRun {
    pub fn new(actor_id: Uuid, import_type: &str, file_name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor_id,
            import_type: import_type.to_string(),
            file_name: file_name.to_string(),
            status: ImportStatus::Pending,
            processed_rows: 0,
            created_at: Utc::now(),
            finished_at: None,
        }
    }
}

impl<'r> FromRow<'r, PgRow> for ImportRun {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        let status: String = row.try_get("status")?;
        Ok(Self {
            id: row.try_get("id")?,
            actor_id: row.try_get("user_id")?,
            import_type: row.try_get("import_type")?,
            file_name: row.try_get("file_name")?,
            status: status.parse().map_err(|e| sqlx::Error::ColumnDecode {
                index: "status".to_string(),
                source: Box::new(e),
            })?,
            processed_rows: row.try_get("processed_rows")?,
            created_at: row.try_get("created_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }
}

/// A single failed (field, rule) pair for one spreadsheet row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ImportLogEntry {
    pub id: Uuid,
    #[sqlx(rename = "import_id")]
    pub import_run_id: Option<Uuid>,
    #[sqlx(rename = "user_id")]
    pub actor_id: Uuid,
    pub import_type: String,
    /// Data row index + 2 (1-based, header row excluded)
    pub row_number: i32,
    pub column: String,
    pub invalid_value: Option<String>,
    #[sqlx(rename = "validation_message")]
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Before/after value of a field changed by an import
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: Uuid,
    #[sqlx(rename = "import_id")]
    pub import_run_id: Uuid,
    #[sqlx(rename = "model_id")]
    pub target_entity_id: Uuid,
    #[sqlx(rename = "model")]
    pub entity_type: String,
    #[sqlx(rename = "row")]
    pub row_number: i32,
    pub column: String,
    pub old_value: String,
    pub new_value: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// ROW RECORD
// =============================================================================

/// One spreadsheet row keyed by canonical column key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowRecord {
    values: FieldValues,
}

impl RowRecord {
    /// Pair headers with cells positionally. Blank cells become `None`,
    /// a later duplicate header overwrites an earlier one.
    pub fn from_cells(headers: &[String], cells: &[Option<String>]) -> Self {
        let mut values = FieldValues::new();
        for (idx, header) in headers.iter().enumerate() {
            let value = cells
                .get(idx)
                .and_then(|c| c.as_deref())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string);
            values.insert(header.clone(), value);
        }
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(|v| v.as_deref())
    }

    pub fn set(&mut self, key: &str, value: Option<String>) {
        self.values.insert(key.to_string(), value);
    }

    pub fn is_blank(&self) -> bool {
        self.values.values().all(|v| v.is_none())
    }

    pub fn values(&self) -> &FieldValues {
        &self.values
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RowRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let values = iter
            .into_iter()
            .map(|(k, v)| {
                let v: String = v.into();
                (k.into(), if v.is_empty() { None } else { Some(v) })
            })
            .collect();
        Self { values }
    }
}
