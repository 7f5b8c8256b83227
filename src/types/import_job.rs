//! Import job types for JetStream-based async processing

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Theme, ToastMessage};

// ==========================================================================
// Submission
// ==========================================================================

/// A file attached to an import submission
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    /// Original file name, including extension
    pub name: String,
    /// File bytes, base64 encoded
    pub content: String,
}

/// `dataport.import.submit` payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSubmitRequest {
    /// Schema key, e.g. `orders` or `clients_and_sales.clients`
    #[serde(rename = "type", default)]
    pub import_type: String,
    #[serde(default)]
    pub files: Vec<UploadedFile>,
}

/// Immediate acknowledgement of a submission
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSubmitResponse {
    pub theme: Theme,
    pub message: String,
    pub job_ids: Vec<Uuid>,
}

// ==========================================================================
// Queue
// ==========================================================================

/// A queued import job in JetStream; one per uploaded file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedImportJob {
    pub id: Uuid,
    pub actor_id: Uuid,
    /// Recipient of the failure e-mail
    #[serde(default)]
    pub actor_email: Option<String>,
    #[serde(default)]
    pub actor_name: Option<String>,
    pub import_type: String,
    /// Name the user uploaded the file under
    pub file_name: String,
    /// Where the upload was stored until processing completes
    pub temp_path: String,
    pub submitted_at: DateTime<Utc>,
}

impl QueuedImportJob {
    pub fn new(actor_id: Uuid, import_type: &str, file_name: &str, temp_path: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor_id,
            actor_email: None,
            actor_name: None,
            import_type: import_type.to_string(),
            file_name: file_name.to_string(),
            temp_path: temp_path.to_string(),
            submitted_at: Utc::now(),
        }
    }

    /// Contact details used by the failure e-mail
    pub fn with_contact(mut self, email: &str, name: Option<&str>) -> Self {
        self.actor_email = Some(email.to_string());
        self.actor_name = name.map(str::to_string);
        self
    }
}

// ==========================================================================
// Realtime broadcast
// ==========================================================================

/// Payload of the `DataImport` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataImportPayload {
    pub message: ToastMessage,
}

/// Envelope published on the `data-import` channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastEnvelope<T> {
    pub event: String,
    pub data: T,
}

// ==========================================================================
// Audit queries
// ==========================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRunsRequest {
    #[serde(default)]
    pub import_type: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

/// Import log lookup, either by run or by import type
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportLogQuery {
    #[serde(default)]
    pub import_run_id: Option<Uuid>,
    #[serde(default)]
    pub import_type: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

/// Audit lookup, either by run or by target entity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogQuery {
    #[serde(default)]
    pub import_run_id: Option<Uuid>,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub entity_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobHistoryRequest {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_request_reads_type_field() {
        let json = r#"{"type":"orders","files":[{"name":"a.csv","content":"YQ=="}]}"#;
        let request: ImportSubmitRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.import_type, "orders");
        assert_eq!(request.files.len(), 1);
        assert_eq!(request.files[0].name, "a.csv");
    }

    #[test]
    fn test_submit_request_missing_fields_default_empty() {
        let request: ImportSubmitRequest = serde_json::from_str("{}").unwrap();
        assert!(request.import_type.is_empty());
        assert!(request.files.is_empty());
    }

    #[test]
    fn test_queued_job_creates_with_uuid() {
        let job = QueuedImportJob::new(Uuid::nil(), "orders", "orders.csv", "/tmp/x.csv")
            .with_contact("ana@example.com", None);
        assert!(!job.id.is_nil());
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains("tempPath"));
        assert!(json.contains("actorId"));
        assert_eq!(job.actor_email.as_deref(), Some("ana@example.com"));
    }

    #[test]
    fn test_broadcast_envelope_shape() {
        let envelope = BroadcastEnvelope {
            event: "DataImport".to_string(),
            data: DataImportPayload {
                message: ToastMessage {
                    theme: Theme::Success,
                    text: "done".to_string(),
                },
            },
        };
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["event"], "DataImport");
        assert_eq!(value["data"]["message"]["theme"], "success");
        assert_eq!(value["data"]["message"]["text"], "done");
    }

    #[test]
    fn test_query_limit_defaults() {
        let query: ImportLogQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.limit, 50);
        assert!(query.import_run_id.is_none());
    }
}
