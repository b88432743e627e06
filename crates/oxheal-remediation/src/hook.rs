use crate::error::RemediationError;
use crate::orchestrator::Orchestrator;
use oxheal_alert::AlertHook;
use oxheal_common::alert::Alert;
use oxheal_common::rule::AlertRule;
use oxheal_common::types::Severity;
use std::sync::Arc;

/// Starts automatic remediation for newly opened alerts at or above
/// `min_severity`. The trigger runs on its own tokio task.
pub struct AutoTrigger {
    orchestrator: Arc<Orchestrator>,
    min_severity: Severity,
}

impl AutoTrigger {
    pub fn new(orchestrator: Arc<Orchestrator>, min_severity: Severity) -> Self {
        Self {
            orchestrator,
            min_severity,
        }
    }
}

impl AlertHook for AutoTrigger {
    fn alert_opened(&self, alert: &Alert, rule: &AlertRule) {
        if alert.severity < self.min_severity {
            tracing::debug!(alert_id = %alert.id, severity = %alert.severity, "Below auto-remediation severity");
            return;
        }
        let orchestrator = Arc::clone(&self.orchestrator);
        let alert_id = alert.id.clone();
        let rule_id = rule.id.clone();
        tokio::spawn(async move {
            match orchestrator.trigger_auto(&alert_id).await {
                Ok(task) => tracing::info!(
                    alert_id = %alert_id,
                    rule_id = %rule_id,
                    task_id = %task.id,
                    status = %task.status,
                    "Automatic remediation started"
                ),
                Err(RemediationError::Conflict { task_id, .. }) => tracing::debug!(
                    alert_id = %alert_id,
                    task_id = %task_id,
                    "Remediation already in flight"
                ),
                Err(e) => tracing::error!(
                    alert_id = %alert_id,
                    error = %e,
                    "Automatic remediation failed to start"
                ),
            }
        });
    }
}
