#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use oxheal_ai::{AlertContext, Diagnoser, NoopDiagnoser};
use oxheal_common::remediation::{CommandResult, Diagnosis};
use oxheal_notify::NotificationReceiver;
use oxheal_remediation::CommandExecutor;
use oxheal_server::app;
use oxheal_server::config::ServerConfig;
use oxheal_server::state::AppState;
use oxheal_storage::sqlite::SqliteStore;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::util::ServiceExt;

/// Records every command and reports success.
#[derive(Default)]
pub struct RecordingExecutor {
    pub calls: Mutex<Vec<(String, String)>>,
}

impl RecordingExecutor {
    pub fn commands(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, c)| c.clone())
            .collect()
    }
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn run(&self, host: &str, command: &str) -> oxheal_remediation::Result<CommandResult> {
        self.calls
            .lock()
            .unwrap()
            .push((host.to_string(), command.to_string()));
        Ok(CommandResult {
            host: host.to_string(),
            command: command.to_string(),
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 1,
            dry_run: false,
        })
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// A diagnosis provider that never answers.
pub struct HangingDiagnoser;

#[async_trait]
impl Diagnoser for HangingDiagnoser {
    fn provider(&self) -> &str {
        "hanging"
    }

    fn model_name(&self) -> &str {
        "hanging"
    }

    async fn diagnose(
        &self,
        _context: &AlertContext,
        _timeout: std::time::Duration,
    ) -> anyhow::Result<Diagnosis> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Ok(Diagnosis::default())
    }
}

pub struct TestContext {
    pub temp_dir: TempDir,
    pub state: AppState,
    pub app: axum::Router,
    pub executor: Arc<RecordingExecutor>,
    pub notifications: NotificationReceiver,
}

/// Context with manual remediation only.
pub fn build_test_context() -> Result<TestContext> {
    build_test_context_with(|config| config.remediation.auto_trigger = false)
}

pub fn build_test_context_with(tweak: impl FnOnce(&mut ServerConfig)) -> Result<TestContext> {
    build_test_context_full(Arc::new(NoopDiagnoser), tweak)
}

pub fn build_test_context_full(
    diagnoser: Arc<dyn Diagnoser>,
    tweak: impl FnOnce(&mut ServerConfig),
) -> Result<TestContext> {
    oxheal_common::id::init(1, 1);

    let temp_dir = tempfile::tempdir()?;
    let mut config = ServerConfig {
        data_dir: temp_dir.path().to_string_lossy().to_string(),
        ..ServerConfig::default()
    };
    // Verification must settle within a test's patience.
    config.remediation.verification.window_secs = 5;
    config.remediation.verification.poll_interval_ms = 20;
    config.remediation.diagnosis_timeout_secs = 1;
    tweak(&mut config);

    let store = Arc::new(SqliteStore::open(&config.database_path())?);
    let executor = Arc::new(RecordingExecutor::default());
    let (state, notifications) =
        AppState::build(config, store, diagnoser, executor.clone())?;
    let app = app::build_http_app(state.clone());

    Ok(TestContext {
        temp_dir,
        state,
        app,
        executor,
        notifications,
    })
}

pub async fn request_json(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value, Option<String>) {
    let mut builder = Request::builder().method(method).uri(uri);
    builder = builder.header("Content-Type", "application/json");

    let req_body = body.unwrap_or(Value::Null).to_string();
    let req = builder
        .body(Body::from(req_body))
        .expect("request should build");

    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");

    let status = resp.status();
    let trace_id = resp
        .headers()
        .get("x-trace-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice::<Value>(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
    };

    (status, json, trace_id)
}

pub async fn request_raw(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: &str,
) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build");
    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");
    let json = serde_json::from_slice::<Value>(&bytes).unwrap_or(Value::Null);
    (status, json)
}

pub fn assert_ok_envelope(json: &Value) {
    assert_eq!(json["err_code"], 0);
    assert!(json["err_msg"].is_string());
    assert!(json.get("trace_id").is_some());
}

pub fn assert_err_envelope(json: &Value, err_code: i32) {
    assert_eq!(json["err_code"], err_code);
    assert!(json["err_msg"].is_string());
    assert!(json.get("trace_id").is_some());
    assert!(json.get("data").is_some());
    assert!(json["data"].is_null());
}

pub fn decode_data<T: DeserializeOwned>(json: &Value) -> T {
    serde_json::from_value(json["data"].clone()).expect("data should decode")
}

/// Creates a `metric > threshold` rule through the API and returns its id.
pub async fn create_metric_rule(
    app: &axum::Router,
    name: &str,
    metric: &str,
    threshold: f64,
) -> String {
    let (status, body, _) = request_json(
        app,
        "POST",
        "/v1/rules",
        Some(serde_json::json!({
            "name": name,
            "rule_type": "metric",
            "metric": metric,
            "operator": "greater_than",
            "threshold": threshold,
            "duration_secs": 0,
            "severity": "critical",
            "cooldown_secs": 0
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["data"]["id"]
        .as_str()
        .expect("rule id should be present")
        .to_string()
}

pub async fn post_metric(app: &axum::Router, target: &str, metric: &str, value: f64) {
    post_metric_at(app, target, metric, value, chrono::Utc::now()).await;
}

pub async fn post_metric_at(
    app: &axum::Router,
    target: &str,
    metric: &str,
    value: f64,
    at: chrono::DateTime<chrono::Utc>,
) {
    let (status, body, _) = request_json(
        app,
        "POST",
        "/v1/metrics",
        Some(serde_json::json!({
            "samples": [{"target_id": target, "metric": metric, "value": value, "timestamp": at}]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["accepted"], 1);
}
