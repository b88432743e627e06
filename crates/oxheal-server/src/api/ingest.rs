use crate::api::{json_body, storage_error_response, success_response};
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use oxheal_alert::dedup::DedupOutcome;
use oxheal_common::types::{LogLine, MetricSample};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleSource {
    #[default]
    Metric,
    DbMetric,
}

#[derive(Debug, Deserialize)]
pub struct IngestSample {
    pub target_id: String,
    pub metric: String,
    pub value: f64,
    /// Defaults to the receive time.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source: SampleSource,
}

#[derive(Debug, Deserialize)]
pub struct MetricBatch {
    pub samples: Vec<IngestSample>,
}

#[derive(Debug, Deserialize)]
pub struct IngestLogLine {
    pub target_id: String,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    pub message: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct LogBatch {
    pub lines: Vec<IngestLogLine>,
}

#[derive(Serialize)]
struct MetricIngestResponse {
    accepted: usize,
    rejected: usize,
}

#[derive(Serialize)]
struct LogIngestResponse {
    accepted: usize,
    opened: usize,
    repeated: usize,
}

/// Feeds samples into the metric caches consulted by the evaluator and by
/// remediation verification. Non-finite values are dropped.
async fn ingest_metrics(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    body: Result<Json<MetricBatch>, JsonRejection>,
) -> Response {
    let batch = match json_body(&trace_id, body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let now = Utc::now();
    let mut accepted = 0;
    let mut rejected = 0;
    for s in batch.samples {
        // Bad samples are counted, not fatal to the batch.
        if !s.value.is_finite() || s.target_id.is_empty() || s.metric.is_empty() {
            rejected += 1;
            continue;
        }
        let sample = MetricSample {
            target_id: s.target_id,
            metric: s.metric,
            value: s.value,
            timestamp: s.timestamp.unwrap_or(now),
        };
        match s.source {
            SampleSource::Metric => state.metrics.record(sample),
            SampleSource::DbMetric => state.db_metrics.record(sample),
        }
        accepted += 1;
    }
    if rejected > 0 {
        tracing::warn!(accepted, rejected, "Metric samples rejected");
    }
    success_response(
        StatusCode::OK,
        &trace_id,
        MetricIngestResponse { accepted, rejected },
    )
}

/// Matches lines against log rules, then publishes them on the log bus for
/// any other subscriber.
async fn ingest_logs(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    body: Result<Json<LogBatch>, JsonRejection>,
) -> Response {
    let batch = match json_body(&trace_id, body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let now = Utc::now();
    let mut response = LogIngestResponse {
        accepted: 0,
        opened: 0,
        repeated: 0,
    };
    for l in batch.lines {
        let line = LogLine {
            target_id: l.target_id,
            service: l.service,
            level: l.level,
            message: l.message,
            timestamp: l.timestamp.unwrap_or(now),
        };
        // Matched at receive time; the line's own timestamp may be old.
        let outcomes = match state.evaluator.handle_log_line(&line, now) {
            Ok(outcomes) => outcomes,
            // Lines before this one were already recorded.
            Err(e) => return storage_error_response(&trace_id, &e),
        };
        for outcome in &outcomes {
            match outcome {
                DedupOutcome::Opened { .. } => response.opened += 1,
                DedupOutcome::Repeated { .. } => response.repeated += 1,
                _ => {}
            }
        }
        state.log_bus.publish(line);
        response.accepted += 1;
    }
    success_response(StatusCode::OK, &trace_id, response)
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/metrics", post(ingest_metrics))
        .route("/v1/logs", post(ingest_logs))
}
