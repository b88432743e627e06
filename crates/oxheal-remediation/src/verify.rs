use crate::executor::CommandExecutor;
use crate::runbook::{Runbook, RunbookContext};
use chrono::{DateTime, Utc};
use oxheal_alert::source::MetricSource;
use oxheal_common::remediation::CommandResult;
use oxheal_common::rule::RuleCondition;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// How long the metric gets to recover after execution.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Margin past the threshold a value must reach to count as recovered,
    /// e.g. `cpu > 90` with 10 recovers below 80.
    #[serde(default = "default_hysteresis")]
    pub hysteresis: f64,
}

fn default_window_secs() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_hysteresis() -> f64 {
    10.0
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            hysteresis: default_hysteresis(),
        }
    }
}

/// Decides whether an executed runbook fixed the problem.
///
/// In order of preference: the runbook's `verify_command`, recovery of the
/// triggering metric within the window, and for log alerts the commands'
/// own success.
pub struct Verifier {
    metrics: Arc<dyn MetricSource>,
    db_metrics: Arc<dyn MetricSource>,
    config: VerificationConfig,
}

impl Verifier {
    pub fn new(
        metrics: Arc<dyn MetricSource>,
        db_metrics: Arc<dyn MetricSource>,
        config: VerificationConfig,
    ) -> Self {
        Self {
            metrics,
            db_metrics,
            config,
        }
    }

    pub async fn verify(
        &self,
        ctx: &RunbookContext,
        runbook: &Runbook,
        executor: &dyn CommandExecutor,
        executed_at: DateTime<Utc>,
        results: &mut Vec<CommandResult>,
    ) -> bool {
        if let Some(command) = &runbook.verify_command {
            return match executor.run(&ctx.host, command).await {
                Ok(result) => {
                    let passed = result.success();
                    results.push(result);
                    passed
                }
                Err(e) => {
                    tracing::warn!(host = %ctx.host, error = %e, "Verify command failed to run");
                    false
                }
            };
        }

        // Rule deleted since the alert opened; nothing to measure against.
        let Some(rule) = &ctx.rule else {
            return true;
        };
        let (source, metric, operator, threshold) = match &rule.condition {
            RuleCondition::Metric {
                metric,
                operator,
                threshold,
            } => (&self.metrics, metric, *operator, *threshold),
            RuleCondition::DbMetric {
                metric,
                operator,
                threshold,
            } => (&self.db_metrics, metric, *operator, *threshold),
            // Log alerts have no metric; the commands' own success stands.
            RuleCondition::LogKeyword { .. } => return true,
        };

        // Require a margin past the threshold so a value hovering at it does not pass.
        let target = if operator.is_upper_bound() {
            threshold - self.config.hysteresis
        } else {
            threshold + self.config.hysteresis
        };
        let recovered = |v: f64| {
            if operator.is_upper_bound() {
                v < target
            } else {
                v > target
            }
        };

        let deadline = tokio::time::Instant::now() + Duration::from_secs(self.config.window_secs);
        let poll = Duration::from_millis(self.config.poll_interval_ms.max(10));
        loop {
            match source.latest_value(&ctx.host, metric).await {
                // Only samples taken after execution count.
                Ok(Some(sample)) if sample.timestamp >= executed_at && recovered(sample.value) => {
                    tracing::info!(
                        host = %ctx.host,
                        metric = %metric,
                        value = sample.value,
                        target,
                        "Metric recovered"
                    );
                    return true;
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(host = %ctx.host, error = %e, "Verification sample failed"),
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(host = %ctx.host, metric = %metric, target, "Metric did not recover");
                return false;
            }
            // tokio time, so paused-clock tests run instantly.
            tokio::time::sleep(poll).await;
        }
    }
}
