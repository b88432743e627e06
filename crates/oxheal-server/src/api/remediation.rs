use crate::api::pagination::deserialize_optional_u64;
use crate::api::pagination::PaginationParams;
use crate::api::{
    bad_request, json_body, not_found, remediation_error_response, storage_error_response,
    success_paginated_response, success_response,
};
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use oxheal_common::remediation::RemediationStatus;
use oxheal_common::types::RiskLevel;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
struct ListTasksParams {
    #[serde(default)]
    status: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_u64")]
    limit: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_optional_u64")]
    offset: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct DecisionRequest {
    operator: String,
    #[serde(default)]
    comment: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CancelRequest {
    operator: String,
}

#[derive(Serialize)]
struct RunbookSummary {
    name: String,
    kind: &'static str,
    priority: i32,
    risk_level: RiskLevel,
    metrics: Vec<String>,
    log_keywords: Vec<String>,
    hosts: String,
}

async fn list_tasks(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(params): Query<ListTasksParams>,
) -> Response {
    let status = match params.status.as_deref() {
        None | Some("all") => None,
        Some(s) => match s.parse::<RemediationStatus>() {
            Ok(status) => Some(status),
            Err(e) => return bad_request(&trace_id, &e),
        },
    };
    let pagination = PaginationParams {
        limit: params.limit,
        offset: params.offset,
    };
    // Paged in memory so total counts every match.
    match state.store.list_tasks(status, usize::MAX) {
        Ok(tasks) => {
            let (items, total) = pagination.page(tasks);
            success_paginated_response(
                StatusCode::OK,
                &trace_id,
                items,
                total,
                pagination.limit(),
                pagination.offset(),
            )
        }
        Err(e) => storage_error_response(&trace_id, &e),
    }
}

async fn get_task(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.store.get_task(&id) {
        Ok(Some(task)) => success_response(StatusCode::OK, &trace_id, task),
        Ok(None) => not_found(&trace_id, "remediation_task", &id),
        Err(e) => storage_error_response(&trace_id, &e),
    }
}

async fn task_audit(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.store.get_task(&id) {
        // An unknown task is 404, not an empty trail.
        Ok(Some(_)) => {}
        Ok(None) => return not_found(&trace_id, "remediation_task", &id),
        Err(e) => return storage_error_response(&trace_id, &e),
    }
    match state.store.audit_trail(&id) {
        Ok(trail) => success_response(StatusCode::OK, &trace_id, trail),
        Err(e) => storage_error_response(&trace_id, &e),
    }
}

async fn approve_task(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<DecisionRequest>, JsonRejection>,
) -> Response {
    let req = match json_body(&trace_id, body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    if req.operator.trim().is_empty() {
        return bad_request(&trace_id, "operator is required");
    }
    match state.orchestrator.approve(&id, &req.operator, req.comment) {
        Ok(task) => success_response(StatusCode::OK, &trace_id, task),
        Err(e) => remediation_error_response(&trace_id, &e),
    }
}

async fn reject_task(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<DecisionRequest>, JsonRejection>,
) -> Response {
    let req = match json_body(&trace_id, body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    if req.operator.trim().is_empty() {
        return bad_request(&trace_id, "operator is required");
    }
    match state.orchestrator.reject(&id, &req.operator, req.comment) {
        Ok(task) => success_response(StatusCode::OK, &trace_id, task),
        Err(e) => remediation_error_response(&trace_id, &e),
    }
}

async fn cancel_task(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<CancelRequest>, JsonRejection>,
) -> Response {
    let req = match json_body(&trace_id, body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    if req.operator.trim().is_empty() {
        return bad_request(&trace_id, "operator is required");
    }
    match state.orchestrator.cancel(&id, &req.operator).await {
        Ok(task) => success_response(StatusCode::OK, &trace_id, task),
        Err(e) => remediation_error_response(&trace_id, &e),
    }
}

async fn list_runbooks(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> Response {
    let registry = state.orchestrator.registry();
    let items: Vec<RunbookSummary> = registry
        .names()
        .iter()
        .filter_map(|name| registry.get(name))
        .map(|rb| RunbookSummary {
            name: rb.name.clone(),
            kind: rb.action.kind(),
            priority: rb.priority,
            risk_level: rb.risk(),
            metrics: rb.metrics.clone(),
            log_keywords: rb.log_keywords.clone(),
            hosts: rb.hosts.clone(),
        })
        .collect();
    success_response(StatusCode::OK, &trace_id, items)
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/tasks", get(list_tasks))
        .route("/v1/tasks/{id}", get(get_task))
        .route("/v1/tasks/{id}/audit", get(task_audit))
        .route("/v1/tasks/{id}/approve", post(approve_task))
        .route("/v1/tasks/{id}/reject", post(reject_task))
        .route("/v1/tasks/{id}/cancel", post(cancel_task))
        .route("/v1/runbooks", get(list_runbooks))
}
