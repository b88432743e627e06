use crate::error::{RemediationError, Result};
use crate::executor::CommandExecutor;
use crate::registry::RunbookRegistry;
use crate::runbook::{default_runbooks, Runbook, RunbookContext};
use crate::safety::{
    CircuitBreakerConfig, CommandPolicyConfig, GateInput, GateVerdict, Permit, RateLimitConfig,
    RiskConfig, SafetyGates, SafetyKey,
};
use crate::verify::{VerificationConfig, Verifier};
use chrono::{Duration as ChronoDuration, Utc};
use oxheal_ai::{AlertContext, Diagnoser};
use oxheal_alert::source::MetricSource;
use oxheal_common::alert::Alert;
use oxheal_common::remediation::{
    Actor, AuditRecord, Diagnosis, InvalidTransition, RemediationStatus, RemediationTask,
    TriggeredBy,
};
use oxheal_common::rule::{AlertRule, RuleCondition};
use oxheal_common::types::Severity;
use oxheal_notify::{Notification, NotificationKind, NotificationQueue};
use oxheal_storage::Store;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

pub const NO_MATCHING_RUNBOOK: &str = "no matching runbook";
pub const CANCELLED_BY_OPERATOR: &str = "cancelled by operator";
pub const CANCELLED_DURING_EXECUTION: &str = "cancelled during execution";
pub const VERIFICATION_FAILED: &str = "verification failed";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationConfig {
    /// Start remediation automatically when an alert opens.
    #[serde(default = "default_auto_trigger")]
    pub auto_trigger: bool,
    #[serde(default = "default_auto_min_severity")]
    pub auto_min_severity: Severity,
    #[serde(default = "default_diagnosis_timeout_secs")]
    pub diagnosis_timeout_secs: u64,
    /// Bound on one detached execution, verification included.
    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,
    #[serde(default = "default_rollback_on_failure")]
    pub rollback_on_failure: bool,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub command_policy: CommandPolicyConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default = "default_runbooks")]
    pub runbooks: Vec<Runbook>,
}

fn default_auto_trigger() -> bool {
    true
}

fn default_auto_min_severity() -> Severity {
    Severity::Warning
}

fn default_diagnosis_timeout_secs() -> u64 {
    10
}

fn default_execution_timeout_secs() -> u64 {
    600
}

fn default_rollback_on_failure() -> bool {
    true
}

fn default_locale() -> String {
    "en".to_string()
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            auto_trigger: default_auto_trigger(),
            auto_min_severity: default_auto_min_severity(),
            diagnosis_timeout_secs: default_diagnosis_timeout_secs(),
            execution_timeout_secs: default_execution_timeout_secs(),
            rollback_on_failure: default_rollback_on_failure(),
            locale: default_locale(),
            rate_limit: RateLimitConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            risk: RiskConfig::default(),
            command_policy: CommandPolicyConfig::default(),
            verification: VerificationConfig::default(),
            runbooks: default_runbooks(),
        }
    }
}

/// External collaborators of the orchestrator.
pub struct Collaborators {
    pub store: Arc<dyn Store>,
    pub diagnoser: Arc<dyn Diagnoser>,
    pub executor: Arc<dyn CommandExecutor>,
    pub metrics: Arc<dyn MetricSource>,
    pub db_metrics: Arc<dyn MetricSource>,
    pub notifications: NotificationQueue,
}

struct Running {
    handle: JoinHandle<()>,
    key: SafetyKey,
    permit: Permit,
}

/// Drives remediation tasks through
/// `pending -> [pending_approval -> approved | rejected] -> executing -> success | failed`.
///
/// Execution runs as a detached tokio task. Every transition is persisted
/// together with an audit record; the store refuses a transition whose
/// starting status has changed underneath, so concurrent operators cannot
/// both win.
pub struct Orchestrator {
    store: Arc<dyn Store>,
    registry: RunbookRegistry,
    gates: SafetyGates,
    diagnoser: Arc<dyn Diagnoser>,
    executor: Arc<dyn CommandExecutor>,
    metrics: Arc<dyn MetricSource>,
    db_metrics: Arc<dyn MetricSource>,
    verifier: Verifier,
    notifications: NotificationQueue,
    diagnosis_timeout: Duration,
    execution_timeout: Duration,
    rollback_on_failure: bool,
    locale: String,
    running: Mutex<HashMap<String, Running>>,
}

impl Orchestrator {
    pub fn new(config: &RemediationConfig, deps: Collaborators) -> Result<Arc<Self>> {
        let registry = RunbookRegistry::from_runbooks(config.runbooks.clone())?;
        let gates = SafetyGates::new(
            &config.command_policy,
            &config.risk,
            &config.rate_limit,
            &config.circuit_breaker,
        )?;
        // Verify commands do not depend on the alert, so a denied one can
        // never run and is refused up front.
        for runbook in config.runbooks.iter() {
            if let Some(command) = &runbook.verify_command {
                gates.commands.check(command).map_err(|reason| {
                    RemediationError::Config(format!("runbook '{}': {reason}", runbook.name))
                })?;
            }
        }
        let verifier = Verifier::new(
            Arc::clone(&deps.metrics),
            Arc::clone(&deps.db_metrics),
            config.verification.clone(),
        );
        tracing::info!(
            runbooks = registry.len(),
            executor = deps.executor.name(),
            diagnoser = deps.diagnoser.provider(),
            "Remediation orchestrator ready"
        );
        Ok(Arc::new(Self {
            store: deps.store,
            registry,
            gates,
            diagnoser: deps.diagnoser,
            executor: deps.executor,
            metrics: deps.metrics,
            db_metrics: deps.db_metrics,
            verifier,
            notifications: deps.notifications,
            diagnosis_timeout: Duration::from_secs(config.diagnosis_timeout_secs),
            execution_timeout: Duration::from_secs(config.execution_timeout_secs.max(1)),
            rollback_on_failure: config.rollback_on_failure,
            locale: config.locale.clone(),
            running: Mutex::new(HashMap::new()),
        }))
    }

    pub fn registry(&self) -> &RunbookRegistry {
        &self.registry
    }

    pub fn gates(&self) -> &SafetyGates {
        &self.gates
    }

    fn running(&self) -> MutexGuard<'_, HashMap<String, Running>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn trigger_auto(self: &Arc<Self>, alert_id: &str) -> Result<RemediationTask> {
        self.trigger(alert_id, TriggeredBy::Auto, Actor::System)
            .await
    }

    pub async fn trigger_manual(
        self: &Arc<Self>,
        alert_id: &str,
        operator: &str,
    ) -> Result<RemediationTask> {
        self.trigger(
            alert_id,
            TriggeredBy::Manual,
            Actor::Operator(operator.to_string()),
        )
        .await
    }

    async fn trigger(
        self: &Arc<Self>,
        alert_id: &str,
        triggered_by: TriggeredBy,
        actor: Actor,
    ) -> Result<RemediationTask> {
        let alert = self.load_alert(alert_id)?;
        if !alert.status.is_open() {
            return Err(RemediationError::AlertResolved {
                alert_id: alert.id,
            });
        }
        let rule = self.store.get_rule(&alert.rule_id)?;

        let mut task = RemediationTask::new(
            oxheal_common::id::next_id(),
            &alert.id,
            &alert.target_id,
            triggered_by,
        );
        // One open task per alert; the store refuses a second.
        let created = self.audit(&task, None, &actor, None);
        self.store.create_task_if_idle(&task, &created)?;
        tracing::info!(
            task_id = %task.id,
            alert_id = %alert.id,
            host = %task.host,
            triggered_by = ?triggered_by,
            "Remediation task created"
        );

        // Never fails: a slow or broken provider yields an empty diagnosis.
        task.diagnosis = self.diagnose(&alert, rule.as_ref()).await;
        let ctx = RunbookContext::new(&alert, rule.as_ref(), task.diagnosis.clone());

        // Nothing applicable is terminal, not an approval case.
        let Some(runbook) = self.registry.select(&ctx) else {
            task.blocked_reason = Some(NO_MATCHING_RUNBOOK.to_string());
            self.transition(&mut task, RemediationStatus::Failed, &Actor::System, None)?;
            self.notify_finished(&alert, &task);
            return Ok(task);
        };
        task.runbook_name = Some(runbook.name.clone());

        let key = SafetyKey::new(&task.host, &runbook.name);
        // Police everything the host may see, rollback and verify included.
        let commands = runbook.gated_commands(&ctx);
        let verdict = self.gates.evaluate(GateInput {
            key: &key,
            runbook,
            commands: &commands,
            diagnosis: &task.diagnosis,
            concurrent_hosts: self.concurrent_hosts(&runbook.name),
            now: Utc::now(),
        });

        match verdict {
            GateVerdict::Forbidden { risk, reason } => {
                task.risk_level = Some(risk);
                task.blocked_reason = Some(reason);
                self.transition(&mut task, RemediationStatus::Failed, &Actor::System, None)?;
                self.notify_finished(&alert, &task);
                Ok(task)
            }
            GateVerdict::NeedsApproval { risk, reason } => {
                task.risk_level = Some(risk);
                task.blocked_reason = Some(reason.clone());
                self.transition(
                    &mut task,
                    RemediationStatus::PendingApproval,
                    &Actor::System,
                    None,
                )?;
                tracing::info!(task_id = %task.id, reason = %reason, "Remediation awaits approval");
                self.notify(
                    &alert,
                    &task,
                    NotificationKind::ApprovalRequired,
                    format!(
                        "Remediation '{}' on {} awaits approval: {reason}",
                        runbook.name, task.host
                    ),
                );
                Ok(task)
            }
            // The breaker permit is held until the run reports back.
            GateVerdict::Pass { risk, permit } => {
                task.risk_level = Some(risk);
                let approved = self.transition(
                    &mut task,
                    RemediationStatus::Approved,
                    &Actor::System,
                    Some("all safety gates passed".to_string()),
                );
                if let Err(e) = approved {
                    self.gates.breaker.release(&key, permit);
                    return Err(e);
                }
                self.start_execution(task, runbook.clone(), ctx, key, permit)
            }
        }
    }

    /// Approves a task waiting in `pending_approval` and starts it. The
    /// circuit breaker and rate limiter are consulted again; when they
    /// refuse, the task stays where it is.
    pub fn approve(
        self: &Arc<Self>,
        task_id: &str,
        operator: &str,
        comment: Option<String>,
    ) -> Result<RemediationTask> {
        let mut task = self.load_task(task_id)?;
        if task.status != RemediationStatus::PendingApproval {
            return Err(RemediationError::InvalidTransition(InvalidTransition {
                from: task.status,
                to: RemediationStatus::Approved,
            }));
        }
        let runbook = task
            .runbook_name
            .as_deref()
            .and_then(|name| self.registry.get(name))
            .cloned()
            .ok_or_else(|| RemediationError::NotFound {
                entity: "runbook",
                id: task.runbook_name.clone().unwrap_or_default(),
            })?;
        let alert = self.load_alert(&task.alert_id)?;
        if !alert.status.is_open() {
            return Err(RemediationError::AlertResolved {
                alert_id: alert.id,
            });
        }

        let key = SafetyKey::new(&task.host, &runbook.name);
        // Approval bypasses risk, not the breaker or the rate limit.
        let permit = match self.gates.admit_approved(&task.id, &key, Utc::now()) {
            Ok(permit) => permit,
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %e, "Approval refused by safety gate");
                return Err(e);
            }
        };

        let actor = Actor::Operator(operator.to_string());
        task.approved_by = Some(operator.to_string());
        task.approved_at = Some(Utc::now());
        task.blocked_reason = None;
        if let Err(e) = self.transition(&mut task, RemediationStatus::Approved, &actor, comment) {
            self.gates.breaker.release(&key, permit);
            return Err(e);
        }

        let rule = self.store.get_rule(&alert.rule_id)?;
        let ctx = RunbookContext::new(&alert, rule.as_ref(), task.diagnosis.clone());
        self.start_execution(task, runbook, ctx, key, permit)
    }

    pub fn reject(
        &self,
        task_id: &str,
        operator: &str,
        comment: Option<String>,
    ) -> Result<RemediationTask> {
        let mut task = self.load_task(task_id)?;
        if task.status != RemediationStatus::PendingApproval {
            return Err(RemediationError::InvalidTransition(InvalidTransition {
                from: task.status,
                to: RemediationStatus::Rejected,
            }));
        }
        let actor = Actor::Operator(operator.to_string());
        self.transition(&mut task, RemediationStatus::Rejected, &actor, comment)?;
        if let Ok(alert) = self.load_alert(&task.alert_id) {
            self.notify_finished(&alert, &task);
        }
        Ok(task)
    }

    /// Cancels a task. Before execution this is clean (`rejected`); once
    /// executing the detached run is aborted at its next await point and the
    /// task is marked `failed`. Commands already sent are not undone.
    pub async fn cancel(&self, task_id: &str, operator: &str) -> Result<RemediationTask> {
        let actor = Actor::Operator(operator.to_string());
        // Take the entry first so the run cannot record an outcome of its own.
        let running = self.running().remove(task_id);

        if let Some(run) = running {
            run.handle.abort();
            // Cancelled or finished; either way it no longer writes.
            let _ = run.handle.await;
            self.gates.breaker.release(&run.key, run.permit);
            tracing::warn!(task_id = %task_id, "Remediation execution aborted");
        }

        let mut task = self.load_task(task_id)?;
        let next = match task.status {
            RemediationStatus::Pending
            | RemediationStatus::PendingApproval
            | RemediationStatus::Approved => {
                task.blocked_reason = Some(CANCELLED_BY_OPERATOR.to_string());
                RemediationStatus::Rejected
            }
            RemediationStatus::Executing => {
                task.blocked_reason = Some(CANCELLED_DURING_EXECUTION.to_string());
                RemediationStatus::Failed
            }
            status => {
                return Err(RemediationError::InvalidTransition(InvalidTransition {
                    from: status,
                    to: RemediationStatus::Rejected,
                }))
            }
        };
        self.transition(&mut task, next, &actor, None)?;
        if let Ok(alert) = self.load_alert(&task.alert_id) {
            self.notify_finished(&alert, &task);
        }
        Ok(task)
    }

    /// Fails tasks left `approved` or `executing` by a previous process.
    pub fn recover_interrupted(&self) -> Result<usize> {
        let in_flight: HashSet<String> = self.running().keys().cloned().collect();
        let mut recovered = 0;
        for status in [RemediationStatus::Approved, RemediationStatus::Executing] {
            for mut task in self.store.list_tasks(Some(status), usize::MAX)? {
                // Still ours, not a leftover.
                if in_flight.contains(&task.id) {
                    continue;
                }
                task.blocked_reason = Some("interrupted by restart".to_string());
                self.transition(&mut task, RemediationStatus::Failed, &Actor::System, None)?;
                recovered += 1;
            }
        }
        if recovered > 0 {
            tracing::warn!(count = recovered, "Failed remediation tasks interrupted by restart");
        }
        Ok(recovered)
    }

    /// Number of tasks currently executing.
    pub fn in_flight(&self) -> usize {
        self.running().len()
    }

    fn concurrent_hosts(&self, runbook: &str) -> usize {
        self.running()
            .values()
            .filter(|r| r.key.runbook == runbook)
            .map(|r| r.key.host.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    fn start_execution(
        self: &Arc<Self>,
        mut task: RemediationTask,
        runbook: Runbook,
        ctx: RunbookContext,
        key: SafetyKey,
        permit: Permit,
    ) -> Result<RemediationTask> {
        if let Err(e) = self.transition(&mut task, RemediationStatus::Executing, &Actor::System, None)
        {
            self.gates.breaker.release(&key, permit);
            return Err(e);
        }
        let snapshot = task.clone();
        let task_id = task.id.clone();

        // Registered under the lock so the run cannot finish before it is tracked.
        let mut running = self.running();
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            this.run_detached(task, runbook, ctx).await;
        });
        running.insert(
            task_id,
            Running {
                handle,
                key,
                permit,
            },
        );
        Ok(snapshot)
    }

    async fn run_detached(
        self: Arc<Self>,
        mut task: RemediationTask,
        runbook: Runbook,
        ctx: RunbookContext,
    ) {
        let result = match tokio::time::timeout(
            self.execution_timeout,
            self.execute(&mut task, &runbook, &ctx),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(format!(
                "execution timed out after {}s",
                self.execution_timeout.as_secs()
            )),
        };

        // Verification failures roll back too.
        if result.is_err() && self.rollback_on_failure {
            let rollback = runbook.rollback(&ctx, self.executor.as_ref()).await;
            if let Some(failure) = &rollback.failure {
                tracing::error!(task_id = %task.id, error = %failure, "Rollback failed");
            }
            task.command_results.extend(rollback.results);
        }

        // From here on nothing awaits, so a concurrent cancel either
        // removed the entry already or cannot interrupt the write.
        let Some(Running { key, permit, .. }) = self.running().remove(&task.id) else {
            return;
        };

        let next = match &result {
            Ok(()) => {
                self.gates.breaker.record_success(&key, permit);
                RemediationStatus::Success
            }
            Err(reason) => {
                self.gates.breaker.record_failure(&key, permit, Utc::now());
                task.blocked_reason = Some(reason.clone());
                RemediationStatus::Failed
            }
        };

        if let Err(e) = self.transition(&mut task, next, &Actor::System, None) {
            tracing::error!(task_id = %task.id, error = %e, "Failed to record remediation outcome");
            return;
        }
        match self.load_alert(&task.alert_id) {
            Ok(alert) => self.notify_finished(&alert, &task),
            Err(e) => tracing::warn!(task_id = %task.id, error = %e, "Alert gone, no notification"),
        }
    }

    async fn execute(
        &self,
        task: &mut RemediationTask,
        runbook: &Runbook,
        ctx: &RunbookContext,
    ) -> std::result::Result<(), String> {
        let executed_at = Utc::now();
        tracing::info!(
            task_id = %task.id,
            runbook = %runbook.name,
            host = %ctx.host,
            dry_run = self.executor.dry_run(),
            "Executing runbook"
        );
        // Stops at the first failing command.
        let outcome = runbook.execute(ctx, self.executor.as_ref()).await;
        task.command_results.extend(outcome.results);
        if let Some(failure) = outcome.failure {
            let err = RemediationError::ExecutionFailure(failure);
            tracing::warn!(task_id = %task.id, error = %err, "Runbook command failed");
            return Err(err.to_string());
        }

        let passed = self
            .verifier
            .verify(
                ctx,
                runbook,
                self.executor.as_ref(),
                executed_at,
                &mut task.command_results,
            )
            .await;
        task.verification_passed = Some(passed);
        if passed {
            Ok(())
        } else {
            Err(VERIFICATION_FAILED.to_string())
        }
    }

    async fn diagnose(&self, alert: &Alert, rule: Option<&AlertRule>) -> Diagnosis {
        let context = self.alert_context(alert, rule).await;
        let attempt = tokio::time::timeout(
            self.diagnosis_timeout,
            self.diagnoser.diagnose(&context, self.diagnosis_timeout),
        )
        .await;
        let err = match attempt {
            Ok(Ok(diagnosis)) => return diagnosis,
            Ok(Err(e)) => RemediationError::DiagnosisUnavailable(e.to_string()),
            Err(_) => RemediationError::DiagnosisUnavailable(format!(
                "timed out after {}ms",
                self.diagnosis_timeout.as_millis()
            )),
        };
        tracing::warn!(alert_id = %alert.id, error = %err, "Continuing without diagnosis");
        Diagnosis::default()
    }

    async fn alert_context(&self, alert: &Alert, rule: Option<&AlertRule>) -> AlertContext {
        let condition = rule.map(|r| &r.condition);
        let (metric, operator, threshold) = match condition.and_then(|c| c.threshold()) {
            Some((metric, op, threshold)) => (
                Some(metric.to_string()),
                Some(op.symbol().to_string()),
                Some(threshold),
            ),
            None => (None, None, None),
        };

        let mut recent_values = Vec::new();
        if let Some(metric) = &metric {
            let source = match condition {
                Some(RuleCondition::DbMetric { .. }) => &self.db_metrics,
                _ => &self.metrics,
            };
            // History is best effort; the diagnosis still runs without it.
            if let Ok(Ok(samples)) = tokio::time::timeout(
                self.diagnosis_timeout,
                source.series(&alert.target_id, metric, ChronoDuration::minutes(15)),
            )
            .await
            {
                recent_values = samples.iter().map(|s| s.value).collect();
            }
        }

        // Log alerts carry the offending line as their message.
        let log_line = match condition {
            Some(RuleCondition::LogKeyword { .. }) => Some(alert.message.clone()),
            _ => None,
        };

        AlertContext {
            alert_id: alert.id.clone(),
            rule_name: alert.rule_name.clone(),
            target_id: alert.target_id.clone(),
            severity: alert.severity,
            message: alert.message.clone(),
            metric,
            operator,
            threshold,
            value: alert.value,
            recent_values,
            log_line,
            runbooks: self.registry.names(),
            locale: self.locale.clone(),
        }
    }

    fn transition(
        &self,
        task: &mut RemediationTask,
        next: RemediationStatus,
        actor: &Actor,
        comment: Option<String>,
    ) -> Result<()> {
        // State machine first; nothing is written for an illegal move.
        let from = task.transition(next, Utc::now())?;
        let audit = self.audit(task, Some(from), actor, comment);
        self.store.record_transition(task, &audit)?;
        tracing::info!(
            task_id = %task.id,
            alert_id = %task.alert_id,
            from = %from,
            to = %next,
            actor = %actor,
            "Remediation transition"
        );
        Ok(())
    }

    fn audit(
        &self,
        task: &RemediationTask,
        from: Option<RemediationStatus>,
        actor: &Actor,
        comment: Option<String>,
    ) -> AuditRecord {
        // Full snapshot so the audit trail replays without the task table.
        let mut payload = serde_json::to_value(task)
            .unwrap_or_else(|e| serde_json::json!({ "snapshot_error": e.to_string() }));
        if let serde_json::Value::Object(map) = &mut payload {
            map.insert(
                "dry_run".to_string(),
                serde_json::Value::Bool(self.executor.dry_run()),
            );
        }
        AuditRecord {
            id: oxheal_common::id::next_id(),
            task_id: task.id.clone(),
            alert_id: task.alert_id.clone(),
            from_status: from,
            to_status: task.status,
            actor: actor.clone(),
            comment,
            payload,
            recorded_at: task.updated_at,
        }
    }

    fn load_task(&self, task_id: &str) -> Result<RemediationTask> {
        self.store
            .get_task(task_id)?
            .ok_or_else(|| RemediationError::NotFound {
                entity: "remediation_task",
                id: task_id.to_string(),
            })
    }

    fn load_alert(&self, alert_id: &str) -> Result<Alert> {
        self.store
            .get_alert(alert_id)?
            .ok_or_else(|| RemediationError::NotFound {
                entity: "alert",
                id: alert_id.to_string(),
            })
    }

    fn notify_finished(&self, alert: &Alert, task: &RemediationTask) {
        let mut message = format!(
            "Remediation '{}' on {} finished: {}",
            task.runbook_name.as_deref().unwrap_or("-"),
            task.host,
            task.status
        );
        if let Some(reason) = &task.blocked_reason {
            message.push_str(&format!(" ({reason})"));
        }
        self.notify(alert, task, NotificationKind::RemediationFinished, message);
    }

    fn notify(
        &self,
        alert: &Alert,
        task: &RemediationTask,
        kind: NotificationKind,
        message: String,
    ) {
        let notification = Notification::new(
            kind,
            &alert.id,
            &alert.rule_id,
            &alert.target_id,
            alert.severity,
            message,
        )
        .with_task(&task.id);
        // Non-blocking; a full queue drops and counts.
        self.notifications.enqueue(notification);
    }
}
