mod common;

use axum::http::StatusCode;
use common::{
    assert_err_envelope, assert_ok_envelope, build_test_context, create_metric_rule, post_metric,
    request_json, request_raw,
};
use oxheal_server::rule_seed;
use serde_json::json;

#[tokio::test]
async fn health_reports_engine_state_with_trace_id() {
    let ctx = build_test_context().unwrap();
    let (status, body, trace_id) = request_json(&ctx.app, "GET", "/v1/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_ok_envelope(&body);
    let trace_id = trace_id.expect("x-trace-id header");
    assert_eq!(trace_id.len(), 16);
    assert_eq!(body["trace_id"], trace_id);
    assert_eq!(body["data"]["open_alerts"], 0);
    assert_eq!(body["data"]["remediations_in_flight"], 0);
    assert_eq!(body["data"]["storage_status"], "ok");
}

#[tokio::test]
async fn malformed_body_is_bad_request() {
    let ctx = build_test_context().unwrap();
    let (status, body) = request_raw(&ctx.app, "POST", "/v1/rules", "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_err_envelope(&body, 1001);

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/rules",
        Some(json!({"name": "bad regex", "rule_type": "log_keyword", "pattern": "(unclosed"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_err_envelope(&body, 1001);
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let ctx = build_test_context().unwrap();
    for uri in [
        "/v1/alerts/404",
        "/v1/tasks/404",
        "/v1/tasks/404/audit",
        "/v1/rules/404",
        "/v1/rules/404/escalation-policy",
    ] {
        let (status, body, _) = request_json(&ctx.app, "GET", uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert_err_envelope(&body, 1004);
    }

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/alerts/404/remediate",
        Some(json!({"operator": "alice"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_err_envelope(&body, 1004);
}

#[tokio::test]
async fn rule_crud_and_builtin_protection() {
    let ctx = build_test_context().unwrap();
    let seeded = rule_seed::init_default_rules(ctx.state.store.as_ref()).unwrap();
    assert!(seeded > 0);

    let id = create_metric_rule(&ctx.app, "Queue depth", "queue_depth", 1000.0).await;

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/rules",
        Some(json!({"name": "Queue depth", "rule_type": "metric", "metric": "q",
                    "operator": "gt", "threshold": 1.0})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_err_envelope(&body, 1005);

    // A window no clock can add must be refused before it reaches the evaluator.
    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/rules",
        Some(json!({"name": "Forever", "rule_type": "metric", "metric": "q",
                    "operator": "gt", "threshold": 1.0, "duration_secs": 9_999_999_999_999u64})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_err_envelope(&body, 1001);
    assert!(body["err_msg"].as_str().unwrap().contains("duration_secs"), "{body}");

    let (status, body, _) = request_json(
        &ctx.app,
        "PUT",
        &format!("/v1/rules/{id}"),
        Some(json!({"name": "Queue depth", "rule_type": "metric", "metric": "queue_depth",
                    "operator": "greater_than", "threshold": 500.0, "severity": "info"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["condition"]["threshold"], 500.0);
    assert_eq!(body["data"]["severity"], "info");

    let (_, body, _) = request_json(&ctx.app, "GET", "/v1/rules", None).await;
    let rules = body["data"].as_array().unwrap();
    assert_eq!(rules.len(), seeded + 1);
    let builtin_id = rules
        .iter()
        .find(|r| r["is_builtin"] == true)
        .and_then(|r| r["id"].as_str())
        .unwrap()
        .to_string();

    let (status, body, _) =
        request_json(&ctx.app, "DELETE", &format!("/v1/rules/{builtin_id}"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_err_envelope(&body, 1001);

    let (status, body, _) = request_json(
        &ctx.app,
        "PUT",
        // Toggling is the one edit a builtin accepts.
        &format!("/v1/rules/{builtin_id}/enabled"),
        Some(json!({"enabled": false})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["enabled"], false);
    assert_eq!(body["data"]["is_builtin"], true);

    let (status, _, _) = request_json(&ctx.app, "DELETE", &format!("/v1/rules/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, _) = request_json(&ctx.app, "GET", &format!("/v1/rules/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn escalation_policy_binding() {
    let ctx = build_test_context().unwrap();
    let id = create_metric_rule(&ctx.app, "Load", "load_1m", 8.0).await;
    let uri = format!("/v1/rules/{id}/escalation-policy");

    let (status, body, _) = request_json(
        &ctx.app,
        "PUT",
        &uri,
        Some(json!({"oncall_group": "sre", "levels": [
            {"level": 2, "delay_minutes": 30, "severity": "critical"},
            {"level": 1, "delay_minutes": 15, "severity": "warning"}
        ]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_err_envelope(&body, 1001);

    let (status, body, _) = request_json(
        &ctx.app,
        "PUT",
        &uri,
        Some(json!({"oncall_group": "sre", "levels": [
            {"level": 1, "delay_minutes": 15, "severity": "warning"},
            {"level": 2, "delay_minutes": 30, "severity": "critical"}
        ]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (_, body, _) = request_json(&ctx.app, "GET", &uri, None).await;
    assert_eq!(body["data"]["levels"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"]["oncall_group"], "sre");

    let (_, body, _) = request_json(&ctx.app, "GET", "/v1/escalation-policies", None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, _, _) = request_json(&ctx.app, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, _) = request_json(&ctx.app, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body, _) = request_json(
        &ctx.app,
        "PUT",
        "/v1/rules/missing/escalation-policy",
        Some(json!({"levels": [{"level": 1, "delay_minutes": 5, "severity": "info"}]})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_err_envelope(&body, 1004);
}

#[tokio::test]
async fn log_ingest_opens_then_repeats_an_alert() {
    let ctx = build_test_context().unwrap();
    let (status, _, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/rules",
        Some(json!({"name": "Payment failures", "rule_type": "log_keyword",
                    "pattern": "payment (failed|declined)", "service": "billing",
                    "severity": "critical", "cooldown_secs": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/logs",
        Some(json!({"lines": [
            {"target_id": "web-01", "service": "billing", "level": "error",
             "message": "Payment FAILED for order 42"},
            // Wrong service.
            {"target_id": "web-01", "service": "checkout", "message": "payment failed"},
            {"target_id": "web-01", "service": "billing", "message": "payment declined"}
        ]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["accepted"], 3);
    assert_eq!(body["data"]["opened"], 1);
    assert_eq!(body["data"]["repeated"], 1);

    let (_, body, _) = request_json(&ctx.app, "GET", "/v1/alerts", None).await;
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["items"][0]["target_id"], "web-01");
    assert_eq!(body["data"]["items"][0]["status"], "firing");
}

#[tokio::test]
async fn metric_ingest_rejects_incomplete_samples() {
    let ctx = build_test_context().unwrap();
    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/metrics",
        Some(json!({"samples": [
            {"target_id": "db-01", "metric": "db_connections_percent", "value": 40.0,
             "source": "db_metric"},
            // No target.
            {"target_id": "", "metric": "cpu_percent", "value": 10.0}
        ]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["accepted"], 1);
    assert_eq!(body["data"]["rejected"], 1);
}

#[tokio::test]
async fn acknowledge_resolve_and_groups() {
    let ctx = build_test_context().unwrap();
    create_metric_rule(&ctx.app, "CPU", "cpu_percent", 90.0).await;
    create_metric_rule(&ctx.app, "Memory", "memory_percent", 90.0).await;
    post_metric(&ctx.app, "web-01", "cpu_percent", 97.0).await;
    post_metric(&ctx.app, "web-01", "memory_percent", 93.0).await;

    let report = ctx.state.evaluator.tick(chrono::Utc::now()).await.unwrap();
    assert_eq!(report.opened, 2);

    let (_, body, _) = request_json(&ctx.app, "GET", "/v1/alerts/groups", None).await;
    let groups = body["data"].as_array().unwrap();
    // Same target inside the window: one group.
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0]["target_id"], "web-01");

    let (_, body, _) = request_json(&ctx.app, "GET", "/v1/alerts?limit=1", None).await;
    assert_eq!(body["data"]["total"], 2);
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 1);
    let alert_id = body["data"]["items"][0]["id"].as_str().unwrap().to_string();

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        &format!("/v1/alerts/{alert_id}/acknowledge"),
        Some(json!({"operator": "alice"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "acknowledged");
    assert_eq!(body["data"]["acknowledged_by"], "alice");

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        &format!("/v1/alerts/{alert_id}/resolve"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "resolved");

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        &format!("/v1/alerts/{alert_id}/resolve"),
        Some(json!({"operator": "alice"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_err_envelope(&body, 1005);

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        &format!("/v1/alerts/{alert_id}/acknowledge"),
        Some(json!({"operator": "bob"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_err_envelope(&body, 1005);

    let (_, body, _) = request_json(&ctx.app, "GET", "/v1/alerts?status=resolved", None).await;
    assert_eq!(body["data"]["total"], 1);
    let (status, body, _) = request_json(&ctx.app, "GET", "/v1/alerts?status=bogus", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_err_envelope(&body, 1001);
}

#[tokio::test]
async fn manual_remediation_approval_flow() {
    let ctx = build_test_context().unwrap();
    create_metric_rule(&ctx.app, "CPU", "cpu_percent", 90.0).await;
    post_metric(&ctx.app, "web-01", "cpu_percent", 99.0).await;
    ctx.state.evaluator.tick(chrono::Utc::now()).await.unwrap();

    let (_, body, _) = request_json(&ctx.app, "GET", "/v1/alerts", None).await;
    let alert_id = body["data"]["items"][0]["id"].as_str().unwrap().to_string();
    let remediate = format!("/v1/alerts/{alert_id}/remediate");

    let (status, body, _) =
        request_json(&ctx.app, "POST", &remediate, Some(json!({"operator": "alice"}))).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["status"], "pending_approval");
    assert_eq!(body["data"]["runbook_name"], "service_restart");
    assert_eq!(
        body["data"]["blocked_reason"],
        "risk_level medium requires approval"
    );
    let task_id = body["data"]["id"].as_str().unwrap().to_string();

    // One open task per alert.
    let (status, body, _) =
        request_json(&ctx.app, "POST", &remediate, Some(json!({"operator": "bob"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_err_envelope(&body, 1005);

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        &format!("/v1/tasks/{task_id}/reject"),
        Some(json!({"operator": "carol", "comment": "maintenance window"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "rejected");

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        &format!("/v1/tasks/{task_id}/approve"),
        Some(json!({"operator": "carol"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    // Rejected is terminal.
    assert_err_envelope(&body, 1203);

    let (status, body, _) =
        request_json(&ctx.app, "GET", &format!("/v1/tasks/{task_id}/audit"), None).await;
    assert_eq!(status, StatusCode::OK);
    let trail = body["data"].as_array().unwrap();
    assert!(trail.len() >= 2);
    assert_eq!(trail.last().unwrap()["to_status"], "rejected");

    let (_, body, _) = request_json(&ctx.app, "GET", "/v1/tasks?status=rejected", None).await;
    assert_eq!(body["data"]["total"], 1);
    let (_, body, _) =
        request_json(&ctx.app, "GET", &format!("/v1/alerts/{alert_id}/tasks"), None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert!(ctx.executor.commands().is_empty());
}

#[tokio::test]
async fn runbooks_are_listed_with_risk() {
    let ctx = build_test_context().unwrap();
    let (status, body, _) = request_json(&ctx.app, "GET", "/v1/runbooks", None).await;
    assert_eq!(status, StatusCode::OK);
    let runbooks = body["data"].as_array().unwrap();
    let restart = runbooks
        .iter()
        .find(|r| r["name"] == "service_restart")
        .unwrap();
    assert_eq!(restart["risk_level"], "medium");
    assert_eq!(restart["hosts"], "*");
    let cleanup = runbooks.iter().find(|r| r["name"] == "disk_cleanup").unwrap();
    assert_eq!(cleanup["risk_level"], "low");
}
