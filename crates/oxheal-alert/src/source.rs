use crate::window::SlidingWindow;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use oxheal_common::types::{LogLine, MetricSample};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    /// The source did not answer within the evaluation timeout.
    #[error("Source: {source_name} timed out after {timeout_ms}ms")]
    Timeout {
        source_name: &'static str,
        timeout_ms: u64,
    },

    #[error("Source: {0} unavailable")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, SourceError>;

/// A store of sampled values, queried by the rule evaluator.
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Most recent sample of `metric` on `target_id`, if any.
    async fn latest_value(&self, target_id: &str, metric: &str) -> Result<Option<MetricSample>>;

    /// Samples within the trailing `window`, oldest first.
    async fn series(
        &self,
        target_id: &str,
        metric: &str,
        window: Duration,
    ) -> Result<Vec<MetricSample>>;

    /// Target ids this source currently knows about.
    async fn targets(&self) -> Result<Vec<String>>;

    fn name(&self) -> &'static str;
}

/// In-memory metric source fed by the ingest API.
///
/// A latest sample older than `max_age` is reported as missing, so a target
/// that stopped reporting neither fires nor resolves.
pub struct MetricCache {
    name: &'static str,
    retention_secs: u64,
    max_age: Duration,
    series: Mutex<HashMap<(String, String), SlidingWindow>>,
}

impl MetricCache {
    pub fn new(name: &'static str, retention_secs: u64, max_age_secs: u64) -> Self {
        Self {
            name,
            retention_secs,
            max_age: oxheal_common::rule::window(max_age_secs),
            series: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(String, String), SlidingWindow>> {
        self.series
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, sample: MetricSample) {
        let key = (sample.target_id.clone(), sample.metric.clone());
        self.lock()
            .entry(key)
            .or_insert_with(|| SlidingWindow::new(self.retention_secs))
            .push(sample);
    }

    pub fn record_all(&self, samples: impl IntoIterator<Item = MetricSample>) -> usize {
        let mut count = 0;
        for sample in samples {
            self.record(sample);
            count += 1;
        }
        count
    }

    fn latest_at(&self, target_id: &str, metric: &str, now: DateTime<Utc>) -> Option<MetricSample> {
        let series = self.lock();
        let sample = series
            .get(&(target_id.to_string(), metric.to_string()))?
            .latest()?;
        // A silent target must not keep a stale value firing.
        if now - sample.timestamp > self.max_age {
            return None;
        }
        Some(sample.clone())
    }
}

#[async_trait]
impl MetricSource for MetricCache {
    async fn latest_value(&self, target_id: &str, metric: &str) -> Result<Option<MetricSample>> {
        Ok(self.latest_at(target_id, metric, Utc::now()))
    }

    async fn series(
        &self,
        target_id: &str,
        metric: &str,
        window: Duration,
    ) -> Result<Vec<MetricSample>> {
        let since = Utc::now() - window;
        Ok(self
            .lock()
            .get(&(target_id.to_string(), metric.to_string()))
            .map(|w| w.since(since))
            .unwrap_or_default())
    }

    async fn targets(&self) -> Result<Vec<String>> {
        // Sorted and unique across metrics.
        let targets: BTreeSet<String> = self.lock().keys().map(|(t, _)| t.clone()).collect();
        Ok(targets.into_iter().collect())
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// Fan-out of ingested log lines to any number of subscribers.
#[derive(Clone)]
pub struct LogBus {
    tx: broadcast::Sender<LogLine>,
}

impl LogBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns the number of subscribers that received the line.
    pub fn publish(&self, line: LogLine) -> usize {
        // No subscribers is not an error for a publisher.
        self.tx.send(line).unwrap_or(0)
    }

    /// Runs `callback` for every published line accepted by `predicate`
    /// until the bus is dropped. Lagging subscribers skip lost lines.
    pub fn subscribe_logs<P, C>(&self, predicate: P, callback: C) -> JoinHandle<()>
    where
        P: Fn(&LogLine) -> bool + Send + Sync + 'static,
        C: Fn(LogLine) + Send + Sync + 'static,
    {
        let mut rx = self.tx.subscribe();
        let callback = Arc::new(callback);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(line) => {
                        if predicate(&line) {
                            callback(line);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Log subscriber lagged, lines dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
