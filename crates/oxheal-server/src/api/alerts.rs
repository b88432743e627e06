use crate::api::pagination::deserialize_optional_u64;
use crate::api::pagination::PaginationParams;
use crate::api::{
    bad_request, error_response, json_body, not_found, remediation_error_response,
    storage_error_response, success_paginated_response, success_response,
};
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use oxheal_alert::dedup::DedupOutcome;
use oxheal_alert::grouping::group_alerts;
use oxheal_common::alert::AlertStatus;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ListAlertsParams {
    /// `open` (default), `firing`, `acknowledged`, `resolved` or `all`.
    #[serde(default)]
    status: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_u64")]
    limit: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_optional_u64")]
    offset: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct OperatorRequest {
    operator: String,
}

#[derive(Debug, Default, Deserialize)]
struct ResolveRequest {
    #[serde(default)]
    operator: Option<String>,
}

async fn list_alerts(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(params): Query<ListAlertsParams>,
) -> Response {
    let pagination = PaginationParams {
        limit: params.limit,
        offset: params.offset,
    };
    let status = params.status.as_deref().unwrap_or("open");
    let alerts = match status {
        // "open" spans firing and acknowledged.
        "open" => state.store.list_open(),
        "all" => state.store.list_alerts(None, usize::MAX),
        other => match other.parse::<AlertStatus>() {
            Ok(s) => state.store.list_alerts(Some(s), usize::MAX),
            Err(e) => return bad_request(&trace_id, &e),
        },
    };
    match alerts {
        Ok(alerts) => {
            let (items, total) = pagination.page(alerts);
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

async fn list_groups(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> Response {
    let window = oxheal_common::rule::window(state.config.evaluator.group_window_secs);
    match state.store.list_open() {
        Ok(open) => success_response(StatusCode::OK, &trace_id, group_alerts(&open, window)),
        Err(e) => storage_error_response(&trace_id, &e),
    }
}

async fn get_alert(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.store.get_alert(&id) {
        Ok(Some(alert)) => success_response(StatusCode::OK, &trace_id, alert),
        Ok(None) => not_found(&trace_id, "alert", &id),
        Err(e) => storage_error_response(&trace_id, &e),
    }
}

async fn acknowledge_alert(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<OperatorRequest>, JsonRejection>,
) -> Response {
    let req = match json_body(&trace_id, body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    if req.operator.trim().is_empty() {
        return bad_request(&trace_id, "operator is required");
    }
    match state.store.acknowledge(&id, &req.operator, Utc::now()) {
        Ok(alert) => {
            tracing::info!(alert_id = %id, operator = %req.operator, "Alert acknowledged");
            success_response(StatusCode::OK, &trace_id, alert)
        }
        Err(e) => storage_error_response(&trace_id, &e),
    }
}

/// Manual resolution. Goes through the deduplicator so the resolve
/// notification obeys the same gate as condition recovery.
async fn resolve_alert(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<ResolveRequest>, JsonRejection>,
) -> Response {
    // The body is optional here; a bad one is ignored.
    let operator = body.ok().and_then(|Json(r)| r.operator);
    let alert = match state.store.get_alert(&id) {
        Ok(Some(alert)) => alert,
        Ok(None) => return not_found(&trace_id, "alert", &id),
        Err(e) => return storage_error_response(&trace_id, &e),
    };
    let now = Utc::now();
    let resolved = match state.store.get_rule(&alert.rule_id) {
        // Through dedup so the resolve notification still goes out.
        Ok(Some(rule)) => state.dedup.resolve(&rule, &id, now).map(|outcome| match outcome {
            DedupOutcome::Resolved { alert, .. } => Some(alert),
            _ => None,
        }),
        // Orphaned alert: close it without notifying.
        Ok(None) => state.store.resolve(&id, now),
        Err(e) => return storage_error_response(&trace_id, &e),
    };
    match resolved {
        Ok(Some(alert)) => {
            tracing::info!(
                alert_id = %id,
                operator = operator.as_deref().unwrap_or("-"),
                "Alert resolved manually"
            );
            success_response(StatusCode::OK, &trace_id, alert)
        }
        Ok(None) => error_response(
            StatusCode::CONFLICT,
            &trace_id,
            "conflict",
            &format!("alert '{id}' is already resolved"),
        ),
        Err(e) => storage_error_response(&trace_id, &e),
    }
}

async fn reset_escalation(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.escalation.reset(&id, Utc::now()) {
        Ok(alert) => success_response(StatusCode::OK, &trace_id, alert),
        Err(e) => storage_error_response(&trace_id, &e),
    }
}

async fn trigger_remediation(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<OperatorRequest>, JsonRejection>,
) -> Response {
    let req = match json_body(&trace_id, body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    if req.operator.trim().is_empty() {
        return bad_request(&trace_id, "operator is required");
    }
    match state.orchestrator.trigger_manual(&id, &req.operator).await {
        Ok(task) => success_response(StatusCode::CREATED, &trace_id, task),
        Err(e) => remediation_error_response(&trace_id, &e),
    }
}

async fn alert_tasks(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.store.get_alert(&id) {
        Ok(Some(_)) => {}
        Ok(None) => return not_found(&trace_id, "alert", &id),
        Err(e) => return storage_error_response(&trace_id, &e),
    }
    match state.store.tasks_for_alert(&id) {
        Ok(tasks) => success_response(StatusCode::OK, &trace_id, tasks),
        Err(e) => storage_error_response(&trace_id, &e),
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/alerts", get(list_alerts))
        .route("/v1/alerts/groups", get(list_groups))
        .route("/v1/alerts/{id}", get(get_alert))
        .route("/v1/alerts/{id}/acknowledge", post(acknowledge_alert))
        .route("/v1/alerts/{id}/resolve", post(resolve_alert))
        .route("/v1/alerts/{id}/escalation/reset", post(reset_escalation))
        .route("/v1/alerts/{id}/remediate", post(trigger_remediation))
        .route("/v1/alerts/{id}/tasks", get(alert_tasks))
}
