pub mod alerts;
pub mod ingest;
pub mod pagination;
pub mod remediation;
pub mod rules;

use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use oxheal_remediation::RemediationError;
use oxheal_storage::StorageError;
use serde::Serialize;
use serde_json::Value;

/// Unified response envelope.
#[derive(Serialize)]
pub struct ApiResponse<T>
where
    T: Serialize,
{
    /// 0 on success.
    pub err_code: i32,
    pub err_msg: String,
    pub trace_id: String,
    pub data: Option<T>,
}

#[derive(Serialize)]
pub struct PaginatedData<T>
where
    T: Serialize,
{
    pub items: Vec<T>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

pub fn success_response<T>(status: StatusCode, trace_id: &str, data: T) -> Response
where
    T: Serialize,
{
    (
        status,
        Json(ApiResponse {
            err_code: 0,
            err_msg: "success".to_string(),
            trace_id: trace_id.to_string(),
            data: Some(data),
        }),
    )
        .into_response()
}

pub fn success_paginated_response<T>(
    status: StatusCode,
    trace_id: &str,
    items: Vec<T>,
    total: usize,
    limit: usize,
    offset: usize,
) -> Response
where
    T: Serialize,
{
    success_response(
        status,
        trace_id,
        PaginatedData {
            items,
            total,
            limit,
            offset,
        },
    )
}

fn to_custom_error_code(code: &str) -> i32 {
    match code {
        "bad_request" => 1001,
        "not_found" => 1004,
        "conflict" => 1005,
        "gate_blocked" => 1201,
        "circuit_open" => 1202,
        "invalid_transition" => 1203,
        "storage_error" => 1501,
        "internal_error" => 1500,
        // Unmapped codes still produce a valid envelope.
        _ => 1999,
    }
}

pub fn error_response(status: StatusCode, trace_id: &str, code: &str, msg: &str) -> Response {
    (
        status,
        Json(ApiResponse::<Value> {
            err_code: to_custom_error_code(code),
            err_msg: msg.to_string(),
            trace_id: trace_id.to_string(),
            data: None,
        }),
    )
        .into_response()
}

pub fn bad_request(trace_id: &str, msg: &str) -> Response {
    error_response(StatusCode::BAD_REQUEST, trace_id, "bad_request", msg)
}

pub fn not_found(trace_id: &str, entity: &str, id: &str) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        trace_id,
        "not_found",
        &format!("{entity} '{id}' not found"),
    )
}

/// Unwraps a JSON body or answers with a `bad_request` envelope.
pub fn json_body<T>(trace_id: &str, body: Result<Json<T>, JsonRejection>) -> Result<T, Response> {
    body.map(|Json(v)| v)
        // Malformed JSON gets the envelope instead of axum's plain-text rejection.
        .map_err(|e| bad_request(trace_id, &e.body_text()))
}

pub fn storage_error_response(trace_id: &str, err: &StorageError) -> Response {
    match err {
        StorageError::NotFound { entity, id } => not_found(trace_id, entity, id),
        StorageError::ActiveTask { .. }
        | StorageError::Duplicate { .. }
        | StorageError::InvalidState { .. } => {
            error_response(StatusCode::CONFLICT, trace_id, "conflict", &err.to_string())
        }
        StorageError::Validation(e) => bad_request(trace_id, &e.to_string()),
        _ => {
            // Details stay in the log; clients get a generic message.
            tracing::error!(trace_id = %trace_id, error = %err, "Storage failure");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                trace_id,
                "storage_error",
                "Database error",
            )
        }
    }
}

pub fn remediation_error_response(trace_id: &str, err: &RemediationError) -> Response {
    let msg = err.to_string();
    match err {
        RemediationError::Conflict { .. } | RemediationError::AlertResolved { .. } => {
            error_response(StatusCode::CONFLICT, trace_id, "conflict", &msg)
        }
        RemediationError::NotFound { entity, id } => not_found(trace_id, entity, id),
        RemediationError::InvalidTransition(_) => {
            error_response(StatusCode::CONFLICT, trace_id, "invalid_transition", &msg)
        }
        RemediationError::GateBlocked { .. } => {
            error_response(StatusCode::CONFLICT, trace_id, "gate_blocked", &msg)
        }
        RemediationError::CircuitOpen { .. } => {
            error_response(StatusCode::CONFLICT, trace_id, "circuit_open", &msg)
        }
        RemediationError::Config(_) => bad_request(trace_id, &msg),
        // Same mapping as the storage-backed handlers.
        RemediationError::Storage(e) => storage_error_response(trace_id, e),
        RemediationError::ExecutionFailure(_) | RemediationError::DiagnosisUnavailable(_) => {
            tracing::error!(trace_id = %trace_id, error = %err, "Remediation failure");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                trace_id,
                "internal_error",
                &msg,
            )
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    version: String,
    uptime_secs: i64,
    open_alerts: usize,
    remediations_in_flight: usize,
    notifications_dropped: u64,
    storage_status: String,
}

async fn health(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> Response {
    let uptime = (Utc::now() - state.start_time).num_seconds();
    let (open_alerts, storage_status) = match state.store.list_open() {
        // Listing open alerts doubles as the storage liveness check.
        Ok(open) => (open.len(), "ok"),
        Err(e) => {
            tracing::error!(error = %e, "Health check storage query failed");
            (0, "error")
        }
    };
    success_response(
        StatusCode::OK,
        &trace_id,
        HealthResponse {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: uptime,
            open_alerts,
            remediations_in_flight: state.orchestrator.in_flight(),
            notifications_dropped: state.notifications.dropped(),
            storage_status: storage_status.to_string(),
        },
    )
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/health", get(health))
        .merge(ingest::routes())
        .merge(alerts::routes())
        .merge(remediation::routes())
        .merge(rules::routes())
}
