use crate::api::{json_body, not_found, storage_error_response, success_response};
use crate::config::RuleDefinition;
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::Utc;
use oxheal_common::alert::{EscalationLevel, EscalationPolicy};
use oxheal_common::id::next_id;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct EnabledRequest {
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct PolicyRequest {
    #[serde(default)]
    oncall_group: Option<String>,
    levels: Vec<EscalationLevel>,
}

/// Pushes rule changes to the evaluator's log-rule snapshot. Metric rules
/// are re-read on every tick anyway.
fn refresh(state: &AppState) {
    if let Err(e) = state.evaluator.refresh_rules() {
        tracing::error!(error = %e, "Failed to refresh evaluator rules");
    }
}

async fn list_rules(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> Response {
    match state.store.list_rules() {
        Ok(rules) => success_response(StatusCode::OK, &trace_id, rules),
        Err(e) => storage_error_response(&trace_id, &e),
    }
}

async fn get_rule(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.store.get_rule(&id) {
        Ok(Some(rule)) => success_response(StatusCode::OK, &trace_id, rule),
        Ok(None) => not_found(&trace_id, "alert_rule", &id),
        Err(e) => storage_error_response(&trace_id, &e),
    }
}

async fn create_rule(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    body: Result<Json<RuleDefinition>, JsonRejection>,
) -> Response {
    let def = match json_body(&trace_id, body) {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    let rule = def.into_rule(next_id(), Utc::now());
    match state.store.insert_rule(&rule) {
        Ok(()) => {
            tracing::info!(rule_id = %rule.id, name = %rule.name, "Alert rule created");
            refresh(&state);
            success_response(StatusCode::CREATED, &trace_id, rule)
        }
        Err(e) => storage_error_response(&trace_id, &e),
    }
}

async fn update_rule(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<RuleDefinition>, JsonRejection>,
) -> Response {
    let def = match json_body(&trace_id, body) {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    // Builtin flag and creation time are restored from the stored row.
    let rule = def.into_rule(id, Utc::now());
    match state.store.update_rule(&rule) {
        Ok(updated) => {
            tracing::info!(rule_id = %updated.id, "Alert rule updated");
            refresh(&state);
            success_response(StatusCode::OK, &trace_id, updated)
        }
        Err(e) => storage_error_response(&trace_id, &e),
    }
}

/// The only change builtin rules accept.
async fn set_rule_enabled(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<EnabledRequest>, JsonRejection>,
) -> Response {
    let req = match json_body(&trace_id, body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let mut rule = match state.store.get_rule(&id) {
        Ok(Some(rule)) => rule,
        Ok(None) => return not_found(&trace_id, "alert_rule", &id),
        Err(e) => return storage_error_response(&trace_id, &e),
    };
    // Read-modify-write; a concurrent edit of the same rule can be lost.
    rule.enabled = req.enabled;
    rule.updated_at = Utc::now();
    match state.store.update_rule(&rule) {
        Ok(updated) => {
            tracing::info!(rule_id = %id, enabled = req.enabled, "Alert rule toggled");
            refresh(&state);
            success_response(StatusCode::OK, &trace_id, updated)
        }
        Err(e) => storage_error_response(&trace_id, &e),
    }
}

async fn delete_rule(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.store.delete_rule(&id) {
        Ok(()) => {
            tracing::info!(rule_id = %id, "Alert rule deleted");
            refresh(&state);
            success_response(StatusCode::OK, &trace_id, serde_json::json!({ "id": id }))
        }
        Err(e) => storage_error_response(&trace_id, &e),
    }
}

async fn get_policy(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.store.get_policy(&id) {
        Ok(Some(policy)) => success_response(StatusCode::OK, &trace_id, policy),
        Ok(None) => not_found(&trace_id, "escalation_policy", &id),
        Err(e) => storage_error_response(&trace_id, &e),
    }
}

/// Binds or replaces the escalation policy of a rule.
async fn put_policy(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<PolicyRequest>, JsonRejection>,
) -> Response {
    let req = match json_body(&trace_id, body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let policy = EscalationPolicy {
        rule_id: id,
        oncall_group: req.oncall_group,
        levels: req.levels,
    };
    match state.store.put_policy(&policy) {
        Ok(()) => {
            tracing::info!(
                rule_id = %policy.rule_id,
                levels = policy.levels.len(),
                "Escalation policy bound"
            );
            success_response(StatusCode::OK, &trace_id, policy)
        }
        Err(e) => storage_error_response(&trace_id, &e),
    }
}

async fn delete_policy(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.store.delete_policy(&id) {
        Ok(true) => success_response(
            StatusCode::OK,
            &trace_id,
            serde_json::json!({ "rule_id": id }),
        ),
        Ok(false) => not_found(&trace_id, "escalation_policy", &id),
        Err(e) => storage_error_response(&trace_id, &e),
    }
}

async fn list_policies(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> Response {
    match state.store.list_policies() {
        Ok(policies) => success_response(StatusCode::OK, &trace_id, policies),
        Err(e) => storage_error_response(&trace_id, &e),
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/rules", get(list_rules).post(create_rule))
        .route(
            "/v1/rules/{id}",
            get(get_rule).put(update_rule).delete(delete_rule),
        )
        .route("/v1/rules/{id}/enabled", put(set_rule_enabled))
        .route(
            "/v1/rules/{id}/escalation-policy",
            get(get_policy).put(put_policy).delete(delete_policy),
        )
        .route("/v1/escalation-policies", get(list_policies))
}
