mod common;

use axum::http::StatusCode;
use chrono::{Duration, NaiveDate, Utc};
use common::{
    build_test_context, build_test_context_full, build_test_context_with, create_metric_rule,
    post_metric, post_metric_at, request_json, HangingDiagnoser,
};
use oxheal_common::alert::OnCallSchedule;
use serde_json::{json, Value};
use std::sync::Arc;

async fn wait_for_task(app: &axum::Router, alert_id: &str) -> Value {
    // Long enough to outlast a diagnosis timeout.
    for _ in 0..150 {
        let (_, body, _) =
            request_json(app, "GET", &format!("/v1/alerts/{alert_id}/tasks"), None).await;
        if let Some(task) = body["data"].as_array().and_then(|t| t.first()) {
            if task["status"] != "pending" {
                return task.clone();
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("no remediation task for alert {alert_id}");
}

#[tokio::test]
async fn alert_to_auto_remediation_to_resolution() {
    let ctx = build_test_context_with(|_| {}).unwrap();
    create_metric_rule(&ctx.app, "CPU", "cpu_percent", 90.0).await;
    post_metric(&ctx.app, "web-01", "cpu_percent", 97.0).await;

    let report = ctx.state.evaluator.tick(Utc::now()).await.unwrap();
    assert_eq!(report.opened, 1);
    let (_, body, _) = request_json(&ctx.app, "GET", "/v1/alerts", None).await;
    let alert_id = body["data"]["items"][0]["id"].as_str().unwrap().to_string();

    let task = wait_for_task(&ctx.app, &alert_id).await;
    assert_eq!(task["status"], "pending_approval");
    assert_eq!(task["triggered_by"], "auto");
    assert_eq!(task["blocked_reason"], "risk_level medium requires approval");
    let task_id = task["id"].as_str().unwrap().to_string();

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        &format!("/v1/tasks/{task_id}/approve"),
        Some(json!({"operator": "alice", "comment": "go"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["approved_by"], "alice");

    let mut final_status = Value::Null;
    for _ in 0..200 {
        post_metric_at(
            &ctx.app,
            "web-01",
            "cpu_percent",
            40.0,
            Utc::now() + Duration::seconds(5),
        )
        .await;
        let (_, body, _) = request_json(&ctx.app, "GET", &format!("/v1/tasks/{task_id}"), None).await;
        let status = &body["data"]["status"];
        if status == "success" || status == "failed" {
            final_status = body["data"].clone();
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(final_status["status"], "success", "{final_status}");
    assert_eq!(final_status["verification_passed"], true);
    assert!(ctx
        .executor
        .commands()
        .iter()
        .any(|c| c.starts_with("systemctl restart")));

    let (_, body, _) =
        request_json(&ctx.app, "GET", &format!("/v1/tasks/{task_id}/audit"), None).await;
    let statuses: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|r| r["to_status"].as_str())
        .collect();
    assert_eq!(
        statuses,
        vec!["pending", "pending_approval", "approved", "executing", "success"]
    );

    // A successful remediation leaves the alert to the evaluator.
    let (_, body, _) = request_json(&ctx.app, "GET", &format!("/v1/alerts/{alert_id}"), None).await;
    assert_eq!(body["data"]["status"], "firing");

    let report = ctx
        .state
        .evaluator
        .tick(Utc::now() + Duration::seconds(10))
        .await
        .unwrap();
    assert_eq!(report.resolved, 1);
    let (_, body, _) = request_json(&ctx.app, "GET", &format!("/v1/alerts/{alert_id}"), None).await;
    assert_eq!(body["data"]["status"], "resolved");

    let (_, body, _) = request_json(&ctx.app, "GET", "/v1/health", None).await;
    assert_eq!(body["data"]["open_alerts"], 0);
}

#[tokio::test]
async fn sustained_cpu_through_timed_out_diagnosis_to_resolution() {
    let ctx = build_test_context_full(Arc::new(HangingDiagnoser), |_| {}).unwrap();
    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/rules",
        Some(json!({"name": "CPU sustained", "rule_type": "metric", "metric": "cpu_percent",
                    "operator": "greater_than", "threshold": 90.0, "duration_secs": 300,
                    "severity": "critical", "cooldown_secs": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    // 95% observed across 310 seconds of evaluator time.
    let t0 = Utc::now();
    post_metric_at(&ctx.app, "web-01", "cpu_percent", 95.0, t0).await;
    for secs in [0, 60, 120, 180, 240, 299] {
        let report = ctx.state.evaluator.tick(t0 + Duration::seconds(secs)).await.unwrap();
        assert_eq!(report.opened, 0, "opened early at {secs}s");
    }
    let report = ctx.state.evaluator.tick(t0 + Duration::seconds(310)).await.unwrap();
    assert_eq!(report.opened, 1);

    let (_, body, _) = request_json(&ctx.app, "GET", "/v1/alerts", None).await;
    let alert = &body["data"]["items"][0];
    assert_eq!(alert["severity"], "critical");
    assert_eq!(alert["status"], "firing");
    let alert_id = alert["id"].as_str().unwrap().to_string();

    let task = wait_for_task(&ctx.app, &alert_id).await;
    assert_eq!(task["runbook_name"], "service_restart");
    assert_eq!(task["risk_level"], "medium");
    assert_eq!(task["status"], "pending_approval");
    assert_eq!(task["blocked_reason"], "risk_level medium requires approval");
    assert!(task["diagnosis"]["root_cause"].is_null(), "{task}");
    assert!(task["diagnosis"]["suggested_runbook"].is_null(), "{task}");
    assert!(ctx.executor.commands().is_empty());
    let task_id = task["id"].as_str().unwrap().to_string();

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        &format!("/v1/tasks/{task_id}/approve"),
        Some(json!({"operator": "alice"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    // Recovery to 70% lands under the 80% verification target.
    let mut finished = Value::Null;
    for _ in 0..200 {
        post_metric_at(&ctx.app, "web-01", "cpu_percent", 70.0, Utc::now() + Duration::seconds(5))
            .await;
        let (_, body, _) = request_json(&ctx.app, "GET", &format!("/v1/tasks/{task_id}"), None).await;
        let status = &body["data"]["status"];
        if status == "success" || status == "failed" {
            finished = body["data"].clone();
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(finished["status"], "success", "{finished}");
    assert_eq!(finished["verification_passed"], true);
    assert!(ctx
        .executor
        .commands()
        .iter()
        .any(|c| c.starts_with("systemctl restart")));

    // Clearing is held for the rule duration as well.
    let report = ctx.state.evaluator.tick(t0 + Duration::seconds(400)).await.unwrap();
    assert_eq!(report.resolved, 0);
    let (_, body, _) = request_json(&ctx.app, "GET", &format!("/v1/alerts/{alert_id}"), None).await;
    assert_eq!(body["data"]["status"], "firing");
    let report = ctx.state.evaluator.tick(t0 + Duration::seconds(700)).await.unwrap();
    assert_eq!(report.resolved, 1);
    let (_, body, _) = request_json(&ctx.app, "GET", &format!("/v1/alerts/{alert_id}"), None).await;
    assert_eq!(body["data"]["status"], "resolved");
}

#[tokio::test]
async fn escalation_reaches_oncall_and_resets() {
    let ctx = build_test_context_with(|config| {
        config.remediation.auto_trigger = false;
        config.oncall = vec![OnCallSchedule {
            group_id: "sre".into(),
            user: "bob".into(),
            start: NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2999, 12, 31).unwrap(),
        }];
    })
    .unwrap();
    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        "/v1/rules",
        Some(json!({"name": "Disk", "rule_type": "metric", "metric": "disk_used_percent",
                    "operator": "greater_than", "threshold": 85.0, "severity": "warning"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let rule_id = body["data"]["id"].as_str().unwrap().to_string();
    let (status, _, _) = request_json(
        &ctx.app,
        "PUT",
        &format!("/v1/rules/{rule_id}/escalation-policy"),
        Some(json!({"oncall_group": "sre", "levels": [
            {"level": 1, "delay_minutes": 15, "severity": "critical"}
        ]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    post_metric(&ctx.app, "db-01", "disk_used_percent", 91.0).await;
    let now = Utc::now();
    ctx.state.evaluator.tick(now).await.unwrap();

    assert!(ctx.state.escalation.tick(now).await.unwrap().is_empty());
    let events = ctx
        .state
        .escalation
        .tick(now + Duration::minutes(16))
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].level, 1);
    assert_eq!(events[0].oncall_user.as_deref(), Some("bob"));

    let alert_id = events[0].alert.id.clone();
    let (_, body, _) = request_json(&ctx.app, "GET", &format!("/v1/alerts/{alert_id}"), None).await;
    assert_eq!(body["data"]["escalation_level"], 1);
    assert_eq!(body["data"]["severity"], "critical");

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        &format!("/v1/alerts/{alert_id}/escalation/reset"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["escalation_level"], 0);
    assert_eq!(body["data"]["severity"], "warning");
}

#[tokio::test]
async fn low_risk_runbook_runs_without_approval() {
    let ctx = build_test_context().unwrap();
    create_metric_rule(&ctx.app, "Memory", "memory_percent", 90.0).await;
    post_metric(&ctx.app, "web-02", "memory_percent", 95.0).await;
    ctx.state.evaluator.tick(Utc::now()).await.unwrap();
    let (_, body, _) = request_json(&ctx.app, "GET", "/v1/alerts", None).await;
    let alert_id = body["data"]["items"][0]["id"].as_str().unwrap().to_string();

    let (status, body, _) = request_json(
        &ctx.app,
        "POST",
        &format!("/v1/alerts/{alert_id}/remediate"),
        Some(json!({"operator": "alice"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["runbook_name"], "cache_drop");
    assert_ne!(body["data"]["status"], "pending_approval");
    assert_eq!(body["data"]["risk_level"], "low");
    assert_eq!(body["data"]["triggered_by"], "manual");
    assert!(body["data"]["approved_by"].is_null());
}
