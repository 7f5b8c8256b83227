//! Read-only import audit handlers: runs, row logs, field audits, job history

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use sqlx::PgPool;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::auth::{AuthInfo, CapabilityCheck};
use crate::db::queries;
use crate::defaults::IMPORT_CAPABILITY;
use crate::handlers::{authorize, respond};
use crate::services::job_history::JOB_HISTORY;
use crate::types::{
    AuditLogQuery, ErrorResponse, ImportLogQuery, JobHistoryRequest, ListResponse,
    ListRunsRequest, Request, SuccessResponse,
};

const MAX_PAGE_SIZE: i64 = 500;

/// Admins see every actor's imports; everyone else only their own
fn owner_scope(actor: &AuthInfo) -> Option<Uuid> {
    if actor.role == "admin" {
        None
    } else {
        Some(actor.user_id)
    }
}

fn page(limit: i64, offset: i64) -> (i64, i64) {
    (limit.clamp(1, MAX_PAGE_SIZE), offset.max(0))
}

/// Parse, authenticate and capability-check one request. `None` means an
/// error reply has already been sent.
async fn accept<T: DeserializeOwned>(
    client: &Client,
    reply: async_nats::Subject,
    payload: &[u8],
    jwt_secret: &str,
    capabilities: &dyn CapabilityCheck,
) -> Result<Option<(Request<T>, AuthInfo)>> {
    let request: Request<T> = match serde_json::from_slice(payload) {
        Ok(req) => req,
        Err(e) => {
            error!("Failed to parse request: {}", e);
            let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
            respond(client, reply, &error).await?;
            return Ok(None);
        }
    };

    let actor = match authorize(&request, jwt_secret) {
        Ok(actor) => actor,
        Err(error) => {
            respond(client, reply, &error).await?;
            return Ok(None);
        }
    };

    if !capabilities.can_perform(&actor, IMPORT_CAPABILITY) {
        let error = ErrorResponse::new(request.id, "FORBIDDEN", "You are not allowed to view imports");
        respond(client, reply, &error).await?;
        return Ok(None);
    }

    Ok(Some((request, actor)))
}

/// Handle dataport.import.runs.list messages
pub async fn handle_list_runs(
    client: Client,
    mut subscriber: Subscriber,
    pool: PgPool,
    capabilities: Arc<dyn CapabilityCheck>,
    jwt_secret: String,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received import.runs.list message");

        let Some(reply) = msg.reply.clone() else {
            warn!("Message without reply subject");
            continue;
        };
        let Some((request, actor)) =
            accept::<ListRunsRequest>(&client, reply.clone(), &msg.payload, &jwt_secret, capabilities.as_ref()).await?
        else {
            continue;
        };

        let (limit, offset) = page(request.payload.limit, request.payload.offset);
        let result = queries::import_run::list_runs(
            &pool,
            owner_scope(&actor),
            request.payload.import_type.as_deref(),
            limit,
            offset,
        )
        .await;

        match result {
            Ok((items, total)) => {
                let response = SuccessResponse::new(request.id, ListResponse { items, total, limit, offset });
                respond(&client, reply, &response).await?;
            }
            Err(e) => {
                error!("Failed to list import runs: {}", e);
                let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                respond(&client, reply, &error).await?;
            }
        }
    }

    Ok(())
}

/// Handle dataport.import.logs.list messages
pub async fn handle_list_logs(
    client: Client,
    mut subscriber: Subscriber,
    pool: PgPool,
    capabilities: Arc<dyn CapabilityCheck>,
    jwt_secret: String,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received import.logs.list message");

        let Some(reply) = msg.reply.clone() else {
            warn!("Message without reply subject");
            continue;
        };
        let Some((request, actor)) =
            accept::<ImportLogQuery>(&client, reply.clone(), &msg.payload, &jwt_secret, capabilities.as_ref()).await?
        else {
            continue;
        };

        let query = &request.payload;
        if query.import_run_id.is_none() && query.import_type.is_none() {
            let error = ErrorResponse::new(request.id, "INVALID_REQUEST", "importRunId or importType is required");
            respond(&client, reply, &error).await?;
            continue;
        }

        let (limit, offset) = page(query.limit, query.offset);
        let result = queries::import_log::list_import_logs(
            &pool,
            owner_scope(&actor),
            query.import_run_id,
            query.import_type.as_deref(),
            limit,
            offset,
        )
        .await;

        match result {
            Ok((items, total)) => {
                let response = SuccessResponse::new(request.id, ListResponse { items, total, limit, offset });
                respond(&client, reply, &response).await?;
            }
            Err(e) => {
                error!("Failed to list import logs: {}", e);
                let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                respond(&client, reply, &error).await?;
            }
        }
    }

    Ok(())
}

/// Handle dataport.import.audits.list messages
pub async fn handle_list_audits(
    client: Client,
    mut subscriber: Subscriber,
    pool: PgPool,
    capabilities: Arc<dyn CapabilityCheck>,
    jwt_secret: String,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received import.audits.list message");

        let Some(reply) = msg.reply.clone() else {
            warn!("Message without reply subject");
            continue;
        };
        let Some((request, actor)) =
            accept::<AuditLogQuery>(&client, reply.clone(), &msg.payload, &jwt_secret, capabilities.as_ref()).await?
        else {
            continue;
        };

        let query = &request.payload;
        let by_entity = query.entity_type.is_some() && query.entity_id.is_some();
        if query.import_run_id.is_none() && !by_entity {
            let error = ErrorResponse::new(
                request.id,
                "INVALID_REQUEST",
                "importRunId or entityType with entityId is required",
            );
            respond(&client, reply, &error).await?;
            continue;
        }

        let result = queries::audit_log::list_audits(
            &pool,
            owner_scope(&actor),
            query.import_run_id,
            query.entity_type.as_deref(),
            query.entity_id,
        )
        .await;

        match result {
            Ok(items) => {
                let total = items.len() as i64;
                let response = SuccessResponse::new(
                    request.id,
                    ListResponse { items, total, limit: total, offset: 0 },
                );
                respond(&client, reply, &response).await?;
            }
            Err(e) => {
                error!("Failed to list audit logs: {}", e);
                let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                respond(&client, reply, &error).await?;
            }
        }
    }

    Ok(())
}

/// Handle dataport.import.jobs.history messages
pub async fn handle_job_history(
    client: Client,
    mut subscriber: Subscriber,
    capabilities: Arc<dyn CapabilityCheck>,
    jwt_secret: String,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received import.jobs.history message");

        let Some(reply) = msg.reply.clone() else {
            warn!("Message without reply subject");
            continue;
        };
        let Some((request, actor)) =
            accept::<JobHistoryRequest>(&client, reply.clone(), &msg.payload, &jwt_secret, capabilities.as_ref()).await?
        else {
            continue;
        };

        let (limit, _) = page(request.payload.limit, 0);
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        let history = match owner_scope(&actor) {
            None => JOB_HISTORY.get_recent(limit),
            Some(user_id) => JOB_HISTORY.get_recent_for_user(user_id, limit),
        };

        respond(&client, reply, &SuccessResponse::new(request.id, history)).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(role: &str) -> AuthInfo {
        AuthInfo {
            user_id: Uuid::new_v4(),
            email: "ana@example.com".to_string(),
            name: None,
            role: role.to_string(),
            permissions: vec![],
        }
    }

    #[test]
    fn test_admin_sees_everything() {
        assert_eq!(owner_scope(&actor("admin")), None);
        let user = actor("user");
        assert_eq!(owner_scope(&user), Some(user.user_id));
    }

    #[test]
    fn test_page_is_clamped() {
        assert_eq!(page(0, -3), (1, 0));
        assert_eq!(page(10_000, 20), (MAX_PAGE_SIZE, 20));
        assert_eq!(page(50, 0), (50, 0));
    }
}
