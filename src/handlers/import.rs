//! Import submission handler
//!
//! Validates the upload, stages each file under the temp upload dir and
//! queues one JetStream job per file. The reply is sent before any row is
//! read.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_nats::{Client, Subscriber};
use base64::Engine;
use futures::StreamExt;
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::{AuthInfo, CapabilityCheck};
use crate::defaults::{ALLOWED_EXTENSIONS, IMPORT_CAPABILITY, SUBMITTED_MESSAGE};
use crate::handlers::{authorize, respond};
use crate::services::import_processor::ImportProcessor;
use crate::services::schema::SchemaRegistry;
use crate::types::{
    ErrorResponse, ImportSubmitRequest, ImportSubmitResponse, QueuedImportJob, Request,
    SuccessResponse, Theme,
};

/// Why a submission was turned away
#[derive(Debug)]
pub struct Rejection {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl Rejection {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    fn into_response(self, request_id: Uuid) -> ErrorResponse {
        let response = ErrorResponse::new(request_id, self.code, self.message);
        match self.details {
            Some(details) => response.with_details(details),
            None => response,
        }
    }
}

/// An accepted file, decoded and ready to stage
#[derive(Debug)]
pub struct DecodedUpload {
    pub name: String,
    pub extension: String,
    pub bytes: Vec<u8>,
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// A validated submission: the trimmed import type and its decoded files
#[derive(Debug)]
pub struct Submission {
    pub import_type: String,
    pub uploads: Vec<DecodedUpload>,
}

/// Check capabilities and request shape, then decode every file.
///
/// Field problems are reported together, keyed like form fields
/// (`type`, `files`, `files.1`).
pub fn check_submission(
    schemas: &SchemaRegistry,
    capabilities: &dyn CapabilityCheck,
    actor: &AuthInfo,
    request: &ImportSubmitRequest,
) -> Result<Submission, Rejection> {
    if !capabilities.can_perform(actor, IMPORT_CAPABILITY) {
        return Err(Rejection::new("FORBIDDEN", "You are not allowed to import data"));
    }

    let import_type = request.import_type.trim();
    let mut problems = serde_json::Map::new();
    if import_type.is_empty() {
        problems.insert("type".into(), json!(["The type field is required."]));
    }
    if request.files.is_empty() {
        problems.insert("files".into(), json!(["The files field is required."]));
    }

    let mut uploads = Vec::with_capacity(request.files.len());
    for (idx, file) in request.files.iter().enumerate() {
        let field = format!("files.{}", idx);
        let extension = match extension_of(&file.name) {
            Some(ext) if ALLOWED_EXTENSIONS.contains(&ext.as_str()) => ext,
            _ => {
                problems.insert(
                    field.clone(),
                    json!([format!("The {} must be a file of type: {}.", field, ALLOWED_EXTENSIONS.join(", "))]),
                );
                continue;
            }
        };
        match base64::engine::general_purpose::STANDARD.decode(file.content.trim()) {
            Ok(bytes) if !bytes.is_empty() => uploads.push(DecodedUpload {
                name: file.name.clone(),
                extension,
                bytes,
            }),
            Ok(_) => {
                problems.insert(field.clone(), json!([format!("The {} must be a file.", field)]));
            }
            Err(_) => {
                problems.insert(field.clone(), json!([format!("The {} failed to upload.", field)]));
            }
        }
    }

    if !problems.is_empty() {
        return Err(Rejection {
            code: "VALIDATION_ERROR",
            message: "The given data was invalid.".to_string(),
            details: Some(serde_json::Value::Object(problems)),
        });
    }

    let schema = schemas
        .resolve(import_type)
        .ok_or_else(|| Rejection::new("UNKNOWN_TYPE", format!("Unknown import type: {}", import_type)))?;

    if let Some(permission) = &schema.permission {
        if !capabilities.can_perform(actor, permission) {
            return Err(Rejection::new(
                "FORBIDDEN",
                format!("You are not allowed to import {}", schema.label),
            ));
        }
    }

    Ok(Submission {
        import_type: import_type.to_string(),
        uploads,
    })
}

/// Write each upload to `<temp_dir>/<uuid>.<ext>` and build its job
pub async fn stage_uploads(
    temp_dir: &Path,
    actor: &AuthInfo,
    import_type: &str,
    uploads: Vec<DecodedUpload>,
) -> Result<Vec<QueuedImportJob>> {
    tokio::fs::create_dir_all(temp_dir)
        .await
        .with_context(|| format!("Failed to create upload dir {}", temp_dir.display()))?;

    let mut jobs = Vec::with_capacity(uploads.len());
    for upload in uploads {
        let path = temp_dir.join(format!("{}.{}", Uuid::new_v4(), upload.extension));
        tokio::fs::write(&path, &upload.bytes)
            .await
            .with_context(|| format!("Failed to stage {}", upload.name))?;

        let job = QueuedImportJob::new(actor.user_id, import_type, &upload.name, &path.to_string_lossy())
            .with_contact(&actor.email, actor.name.as_deref());
        jobs.push(job);
    }

    Ok(jobs)
}

/// Handle dataport.import.submit messages
pub async fn handle_submit(
    client: Client,
    mut subscriber: Subscriber,
    processor: Arc<ImportProcessor>,
    capabilities: Arc<dyn CapabilityCheck>,
    jwt_secret: String,
    temp_dir: PathBuf,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received import.submit message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<ImportSubmitRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse import submit request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                respond(&client, reply, &error).await?;
                continue;
            }
        };

        let actor = match authorize(&request, &jwt_secret) {
            Ok(actor) => actor,
            Err(error) => {
                respond(&client, reply, &error).await?;
                continue;
            }
        };

        let Submission { import_type, uploads } = match check_submission(
            processor.pipeline().schemas(),
            capabilities.as_ref(),
            &actor,
            &request.payload,
        ) {
            Ok(submission) => submission,
            Err(rejection) => {
                debug!("Import submission rejected: {} {}", rejection.code, rejection.message);
                respond(&client, reply, &rejection.into_response(request.id)).await?;
                continue;
            }
        };

        let submitted = async {
            let jobs = stage_uploads(&temp_dir, &actor, &import_type, uploads).await?;
            let mut job_ids = Vec::with_capacity(jobs.len());
            for job in &jobs {
                job_ids.push(processor.submit_job(job).await?);
            }
            Ok::<_, anyhow::Error>(job_ids)
        }
        .await;

        match submitted {
            Ok(job_ids) => {
                info!(
                    "Queued {} {} import job(s) for user {}",
                    job_ids.len(),
                    import_type,
                    actor.user_id
                );
                let response = SuccessResponse::new(
                    request.id,
                    ImportSubmitResponse {
                        theme: Theme::Success,
                        message: SUBMITTED_MESSAGE.to_string(),
                        job_ids,
                    },
                );
                respond(&client, reply, &response).await?;
            }
            Err(e) => {
                error!("Failed to submit import: {:#}", e);
                let error = ErrorResponse::new(request.id, "SUBMIT_ERROR", format!("{:#}", e));
                respond(&client, reply, &error).await?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ClaimsCapabilities;
    use crate::types::UploadedFile;

    fn actor(role: &str, permissions: &[&str]) -> AuthInfo {
        AuthInfo {
            user_id: Uuid::new_v4(),
            email: "ana@example.com".to_string(),
            name: Some("Ana".to_string()),
            role: role.to_string(),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
        }
    }

    fn file(name: &str, contents: &str) -> UploadedFile {
        UploadedFile {
            name: name.to_string(),
            content: base64::engine::general_purpose::STANDARD.encode(contents),
        }
    }

    fn request(import_type: &str, files: Vec<UploadedFile>) -> ImportSubmitRequest {
        ImportSubmitRequest {
            import_type: import_type.to_string(),
            files,
        }
    }

    fn schemas() -> SchemaRegistry {
        SchemaRegistry::load(None).unwrap()
    }

    #[test]
    fn test_accepts_csv_and_uppercase_xlsx() {
        let submission = check_submission(
            &schemas(),
            &ClaimsCapabilities,
            &actor("admin", &[]),
            &request("orders", vec![file("a.csv", "x"), file("B.XLSX", "y")]),
        )
        .unwrap();

        let uploads = &submission.uploads;
        assert_eq!(uploads.len(), 2);
        assert_eq!(uploads[1].extension, "xlsx");
        assert_eq!(uploads[0].bytes, b"x");
    }

    #[test]
    fn test_rejects_disallowed_extension() {
        let rejection = check_submission(
            &schemas(),
            &ClaimsCapabilities,
            &actor("admin", &[]),
            &request("orders", vec![file("a.csv", "x"), file("notes.txt", "y")]),
        )
        .unwrap_err();

        assert_eq!(rejection.code, "VALIDATION_ERROR");
        let details = rejection.details.unwrap();
        assert!(details.get("files.1").is_some());
        assert!(details.get("files.0").is_none());
    }

    #[test]
    fn test_type_and_files_are_required() {
        let rejection = check_submission(
            &schemas(),
            &ClaimsCapabilities,
            &actor("admin", &[]),
            &request("", vec![]),
        )
        .unwrap_err();

        let details = rejection.details.unwrap();
        assert_eq!(details["type"][0], "The type field is required.");
        assert_eq!(details["files"][0], "The files field is required.");
    }

    #[test]
    fn test_requires_import_capability() {
        let rejection = check_submission(
            &schemas(),
            &ClaimsCapabilities,
            &actor("user", &[]),
            &request("orders", vec![file("a.csv", "x")]),
        )
        .unwrap_err();
        assert_eq!(rejection.code, "FORBIDDEN");
    }

    #[test]
    fn test_import_type_is_trimmed_before_lookup() {
        let submission = check_submission(
            &schemas(),
            &ClaimsCapabilities,
            &actor("admin", &[]),
            &request("  clients_and_sales.sales \n", vec![file("s.csv", "x")]),
        )
        .unwrap();
        assert_eq!(submission.import_type, "clients_and_sales.sales");

        let blank = check_submission(
            &schemas(),
            &ClaimsCapabilities,
            &actor("admin", &[]),
            &request("   ", vec![file("s.csv", "x")]),
        )
        .unwrap_err();
        assert_eq!(blank.code, "VALIDATION_ERROR");
    }

    #[test]
    fn test_unknown_type() {
        let rejection = check_submission(
            &schemas(),
            &ClaimsCapabilities,
            &actor("admin", &[]),
            &request("invoices", vec![file("a.csv", "x")]),
        )
        .unwrap_err();
        assert_eq!(rejection.code, "UNKNOWN_TYPE");
    }

    #[test]
    fn test_schema_permission_is_checked() {
        let registry = schemas();
        let (key, permission) = registry
            .iter()
            .find_map(|s| s.permission.clone().map(|p| (s.key.clone(), p)))
            .expect("default schema declares a permission");

        let without = check_submission(
            &registry,
            &ClaimsCapabilities,
            &actor("user", &[IMPORT_CAPABILITY]),
            &request(&key, vec![file("a.csv", "x")]),
        );
        assert_eq!(without.unwrap_err().code, "FORBIDDEN");

        let with = check_submission(
            &registry,
            &ClaimsCapabilities,
            &actor("user", &[IMPORT_CAPABILITY, permission.as_str()]),
            &request(&key, vec![file("a.csv", "x")]),
        );
        assert!(with.is_ok());
    }

    #[tokio::test]
    async fn test_stage_uploads_writes_temp_files() {
        let dir = std::env::temp_dir().join(format!("dataport-stage-{}", Uuid::new_v4()));
        let actor = actor("admin", &[]);
        let uploads = vec![DecodedUpload {
            name: "orders.csv".to_string(),
            extension: "csv".to_string(),
            bytes: b"SKU\nABC\n".to_vec(),
        }];

        let jobs = stage_uploads(&dir, &actor, "orders", uploads).await.unwrap();

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].file_name, "orders.csv");
        assert_eq!(jobs[0].actor_email.as_deref(), Some("ana@example.com"));
        assert!(jobs[0].temp_path.ends_with(".csv"));
        assert_eq!(std::fs::read(&jobs[0].temp_path).unwrap(), b"SKU\nABC\n");
        std::fs::remove_dir_all(&dir).ok();
    }
}
