//! Axum server and routes.

use axum::{
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use logbook_delivery::Dispatch;
use logbook_types::{AuditEntry, AuditListOptions, AuditLog, DocumentError};
use logbook_workflow::{ApprovalReceipt, DocumentStatus, WorkflowEngine, WorkflowError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
    pub audit_log: Arc<dyn AuditLog>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/report/approve", get(handle_approve))
        .route("/api/report/send_back", get(handle_send_back))
        .route("/api/report/:report_id/timeline", get(handle_timeline))
        .route("/api/audit/list", get(handle_audit_list))
        .route("/health", get(handle_health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Body of every action endpoint.
#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
}

type ActionReply = (StatusCode, Json<ActionResponse>);

fn reply(status: StatusCode, message: impl Into<String>) -> ActionReply {
    (
        status,
        Json(ActionResponse {
            success: status.is_success(),
            message: message.into(),
        }),
    )
}

/// Map a workflow error to a status and a message fit for an end user.
/// Storage and delivery faults are logged and reported generically.
fn error_reply(e: WorkflowError) -> ActionReply {
    match e {
        WorkflowError::Transition(t) => reply(StatusCode::BAD_REQUEST, t.to_string()),
        WorkflowError::NotFound(what) => reply(StatusCode::NOT_FOUND, format!("{} not found", what)),
        WorkflowError::Document(d) => {
            tracing::error!(error = %d, "document error");
            reply(StatusCode::INTERNAL_SERVER_ERROR, document_message(&d))
        }
        WorkflowError::Store(_) | WorkflowError::Delivery(_) => {
            tracing::error!(error = %e, "request failed");
            reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error, please try again later",
            )
        }
    }
}

/// Malformed query strings and path segments get the same JSON body as every other failure.
fn rejected(body: String) -> ActionReply {
    tracing::debug!(reason = %body, "request rejected");
    reply(StatusCode::BAD_REQUEST, body)
}

fn document_message(e: &DocumentError) -> &'static str {
    match e {
        DocumentError::Template(_) => "the report template is unavailable",
        DocumentError::AssemblyFailed(_) => "the report spreadsheet could not be assembled",
        DocumentError::ConversionFailed(_) => "the spreadsheet could not be converted to PDF",
        DocumentError::Overlay(_) => "the signature block could not be added to the PDF",
    }
}

fn approval_message(report_id: i64, receipt: &ApprovalReceipt) -> ActionReply {
    match &receipt.document {
        DocumentStatus::AlreadyGenerated(_) => reply(
            StatusCode::OK,
            format!("Additional approval recorded for report #{}", report_id),
        ),
        DocumentStatus::Failed(e) => {
            tracing::error!(report_id, error = %e, "approved without final document");
            reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!(
                    "Report #{} approved, but {}; approve again to retry",
                    report_id,
                    document_message(e)
                ),
            )
        }
        DocumentStatus::Generated(_) => {
            let all_sent = receipt
                .deliveries
                .iter()
                .all(|(_, d)| matches!(d, Dispatch::Sent | Dispatch::Duplicate));
            let offline = receipt
                .deliveries
                .iter()
                .any(|(_, d)| matches!(d, Dispatch::Queued));
            let message = if all_sent {
                format!("Report #{} approved and the final PDF emailed", report_id)
            } else if offline {
                format!(
                    "Report #{} approved; offline mode, email queued for later",
                    report_id
                )
            } else {
                format!(
                    "Report #{} approved; email could not be sent now and will be retried",
                    report_id
                )
            };
            reply(StatusCode::OK, message)
        }
    }
}

/// `admin_id` is accepted for links generated by older mail templates.
#[derive(Debug, Deserialize)]
pub struct ApproveQuery {
    pub report_id: Option<i64>,
    #[serde(alias = "admin_id")]
    pub approver_id: Option<String>,
}

async fn handle_approve(
    State(state): State<Arc<AppState>>,
    q: Result<Query<ApproveQuery>, QueryRejection>,
) -> ActionReply {
    let Query(q) = match q {
        Ok(q) => q,
        Err(rejection) => return rejected(rejection.body_text()),
    };
    let (Some(report_id), Some(approver_id)) = (q.report_id, q.approver_id) else {
        return reply(StatusCode::BAD_REQUEST, "Missing report_id or approver_id");
    };
    match state.engine.approve(report_id, &approver_id).await {
        Ok(receipt) => approval_message(report_id, &receipt),
        Err(e) => error_reply(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct SendBackQuery {
    pub report_id: Option<i64>,
    #[serde(alias = "admin_id")]
    pub approver_id: Option<String>,
    pub comments: Option<String>,
}

async fn handle_send_back(
    State(state): State<Arc<AppState>>,
    q: Result<Query<SendBackQuery>, QueryRejection>,
) -> ActionReply {
    let Query(q) = match q {
        Ok(q) => q,
        Err(rejection) => return rejected(rejection.body_text()),
    };
    let (Some(report_id), Some(approver_id)) = (q.report_id, q.approver_id) else {
        return reply(StatusCode::BAD_REQUEST, "Missing report_id or approver_id");
    };
    let comments = q.comments.unwrap_or_default();
    match state.engine.reject(report_id, &approver_id, &comments).await {
        Ok(_) => reply(
            StatusCode::OK,
            format!("Report #{} sent back for revision", report_id),
        ),
        Err(e) => error_reply(e),
    }
}

#[derive(Debug, Serialize)]
pub struct TimelineResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<AuditEntry>>,
}

fn timeline_error(e: WorkflowError) -> (StatusCode, Json<TimelineResponse>) {
    listing_failure(error_reply(e))
}

fn listing_failure((status, Json(body)): ActionReply) -> (StatusCode, Json<TimelineResponse>) {
    (
        status,
        Json(TimelineResponse {
            success: false,
            message: body.message,
            data: None,
        }),
    )
}

async fn handle_timeline(
    State(state): State<Arc<AppState>>,
    report_id: Result<Path<i64>, PathRejection>,
) -> (StatusCode, Json<TimelineResponse>) {
    let Path(report_id) = match report_id {
        Ok(p) => p,
        Err(rejection) => return listing_failure(rejected(rejection.body_text())),
    };
    match state.engine.timeline(report_id).await {
        Ok(entries) => (
            StatusCode::OK,
            Json(TimelineResponse {
                success: true,
                message: "Success".to_string(),
                data: Some(entries),
            }),
        ),
        Err(e) => timeline_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct AuditListQuery {
    pub report_id: Option<i64>,
    pub actor_id: Option<String>,
    /// RFC 3339.
    pub since: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

async fn handle_audit_list(
    State(state): State<Arc<AppState>>,
    q: Result<Query<AuditListQuery>, QueryRejection>,
) -> (StatusCode, Json<TimelineResponse>) {
    let Query(q) = match q {
        Ok(q) => q,
        Err(rejection) => return listing_failure(rejected(rejection.body_text())),
    };
    let since = match q.since.as_deref().map(str::parse::<DateTime<Utc>>).transpose() {
        Ok(since) => since,
        Err(_) => {
            return listing_failure(reply(
                StatusCode::BAD_REQUEST,
                "since must be an RFC 3339 timestamp",
            ))
        }
    };
    let opts = AuditListOptions {
        report_id: q.report_id,
        actor_id: q.actor_id,
        since,
        limit: q.limit,
        offset: q.offset,
    };
    match state.audit_log.list(&opts).await {
        Ok(entries) => (
            StatusCode::OK,
            Json(TimelineResponse {
                success: true,
                message: "Success".to_string(),
                data: Some(entries),
            }),
        ),
        Err(e) => timeline_error(e.into()),
    }
}

async fn handle_health() -> &'static str {
    "ok"
}
