//! Persistence for alerts, dedup records, rules, escalation policies,
//! remediation tasks and the append-only audit trail.
//!
//! Every store is a trait so the engine can run against the SQLite
//! implementation ([`sqlite::SqliteStore`]) in production and the
//! in-memory one ([`memory::MemoryStore`]) in tests or when embedded.

pub mod error;
pub mod memory;
pub mod sqlite;

#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use oxheal_common::alert::{Alert, AlertStatus, DedupRecord, EscalationPolicy};
use oxheal_common::remediation::{AuditRecord, RemediationStatus, RemediationTask};
use oxheal_common::rule::AlertRule;
use oxheal_common::types::Severity;

pub use error::{Result, StorageError};

/// Outcome of recording a fire occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct FireOutcome {
    pub alert: Alert,
    pub record: DedupRecord,
    /// True when this occurrence opened a new alert.
    pub created: bool,
}

/// Escalation compare-and-set parameters.
#[derive(Debug, Clone)]
pub struct EscalationStep {
    /// Level the caller observed; the write is skipped if it moved.
    pub expected_level: u32,
    pub severity: Severity,
    pub at: DateTime<Utc>,
    pub next_escalation_at: Option<DateTime<Utc>>,
}

/// Alert and dedup-record persistence.
///
/// Implementations must be safe to share across threads because the rule
/// evaluator, the escalation engine and the HTTP API all write concurrently.
pub trait AlertStore: Send + Sync {
    /// Atomically creates the dedup record and a firing alert, or bumps the
    /// existing record when an alert for the same `(rule_id, target_id)` is
    /// already open. `candidate` is the alert to insert when none exists.
    fn upsert_firing(&self, candidate: Alert) -> Result<FireOutcome>;

    /// Resolves an open alert and drops its dedup record. Returns `None`
    /// when the alert was already resolved.
    fn resolve(&self, alert_id: &str, at: DateTime<Utc>) -> Result<Option<Alert>>;

    fn acknowledge(&self, alert_id: &str, user: &str, at: DateTime<Utc>) -> Result<Alert>;

    /// Applies one escalation level if the alert is still firing at
    /// `step.expected_level`. Returns `None` when another writer won.
    fn escalate(&self, alert_id: &str, step: &EscalationStep) -> Result<Option<Alert>>;

    /// Operator reset: level back to zero, severity back to `severity` and
    /// the escalation clock restarted at `at`.
    fn reset_escalation(
        &self,
        alert_id: &str,
        severity: Severity,
        next_escalation_at: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    ) -> Result<Alert>;

    fn mark_notified(&self, fingerprint: &str, at: DateTime<Utc>) -> Result<()>;

    fn get_alert(&self, alert_id: &str) -> Result<Option<Alert>>;

    fn find_open(&self, rule_id: &str, target_id: &str) -> Result<Option<Alert>>;

    fn dedup_record(&self, fingerprint: &str) -> Result<Option<DedupRecord>>;

    /// Alerts ordered by `triggered_at` descending.
    fn list_alerts(&self, status: Option<AlertStatus>, limit: usize) -> Result<Vec<Alert>>;

    fn list_open(&self) -> Result<Vec<Alert>> {
        let mut open = self.list_alerts(Some(AlertStatus::Firing), usize::MAX)?;
        open.extend(self.list_alerts(Some(AlertStatus::Acknowledged), usize::MAX)?);
        // Two queries, so restore the newest-first order.
        open.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at));
        Ok(open)
    }
}

/// Remediation tasks and their audit trail. Each write pairs the task row
/// with the audit record describing the transition.
pub trait RemediationStore: Send + Sync {
    /// Inserts `task` unless a non-terminal task exists for the same alert,
    /// in which case [`StorageError::ActiveTask`] is returned.
    fn create_task_if_idle(&self, task: &RemediationTask, audit: &AuditRecord) -> Result<()>;

    /// Stores `task` and appends `audit`. When `audit.from_status` is set
    /// the write only applies if the stored task is still in that status;
    /// otherwise [`StorageError::InvalidState`] is returned.
    fn record_transition(&self, task: &RemediationTask, audit: &AuditRecord) -> Result<()>;

    fn get_task(&self, task_id: &str) -> Result<Option<RemediationTask>>;

    fn active_task_for_alert(&self, alert_id: &str) -> Result<Option<RemediationTask>>;

    fn tasks_for_alert(&self, alert_id: &str) -> Result<Vec<RemediationTask>>;

    fn list_tasks(&self, status: Option<RemediationStatus>, limit: usize)
        -> Result<Vec<RemediationTask>>;

    /// Audit records of one task in insertion order.
    fn audit_trail(&self, task_id: &str) -> Result<Vec<AuditRecord>>;
}

/// Alert rules and the escalation policies bound to them.
pub trait RuleStore: Send + Sync {
    fn list_rules(&self) -> Result<Vec<AlertRule>>;

    fn enabled_rules(&self) -> Result<Vec<AlertRule>> {
        Ok(self
            .list_rules()?
            .into_iter()
            .filter(|r| r.enabled)
            .collect())
    }

    fn get_rule(&self, rule_id: &str) -> Result<Option<AlertRule>>;

    fn get_rule_by_name(&self, name: &str) -> Result<Option<AlertRule>>;

    /// Inserts a validated rule; names are unique.
    fn insert_rule(&self, rule: &AlertRule) -> Result<()>;

    fn update_rule(&self, rule: &AlertRule) -> Result<AlertRule>;

    /// Builtin rules are rejected with a validation error.
    fn delete_rule(&self, rule_id: &str) -> Result<()>;

    fn put_policy(&self, policy: &EscalationPolicy) -> Result<()>;

    fn get_policy(&self, rule_id: &str) -> Result<Option<EscalationPolicy>>;

    fn delete_policy(&self, rule_id: &str) -> Result<bool>;

    fn list_policies(&self) -> Result<Vec<EscalationPolicy>>;
}

/// Everything the engine persists.
pub trait Store: AlertStore + RemediationStore + RuleStore {}

impl<T: AlertStore + RemediationStore + RuleStore> Store for T {}

fn not_found(entity: &'static str, id: &str) -> StorageError {
    StorageError::NotFound {
        entity,
        id: id.to_string(),
    }
}

fn stale_transition(task_id: &str, current: &str) -> StorageError {
    StorageError::InvalidState {
        entity: "remediation_task",
        id: task_id.to_string(),
        reason: format!("status changed concurrently, now {current}"),
    }
}

/// Applies an update to a stored rule, enforcing builtin immutability.
fn merge_rule_update(existing: &AlertRule, update: &AlertRule) -> Result<AlertRule> {
    existing.check_update(update)?;
    let mut merged = update.clone();
    merged.id = existing.id.clone();
    // Callers cannot promote or demote a rule.
    merged.is_builtin = existing.is_builtin;
    merged.created_at = existing.created_at;
    Ok(merged)
}

fn ensure_deletable(rule: &AlertRule) -> Result<()> {
    if rule.is_builtin {
        return Err(oxheal_common::ValidationError::BuiltinRule(rule.name.clone()).into());
    }
    Ok(())
}

fn acknowledge_alert(alert: &mut Alert, user: &str, at: DateTime<Utc>) -> Result<()> {
    match alert.status {
        AlertStatus::Firing => {
            alert.status = AlertStatus::Acknowledged;
            alert.acknowledged_at = Some(at);
            alert.acknowledged_by = Some(user.to_string());
            alert.updated_at = at;
            Ok(())
        }
        // Idempotent; the first acknowledger is kept.
        AlertStatus::Acknowledged => Ok(()),
        AlertStatus::Resolved => Err(StorageError::InvalidState {
            entity: "alert",
            id: alert.id.clone(),
            reason: "alert is already resolved".to_string(),
        }),
    }
}

fn new_dedup_record(alert: &Alert) -> DedupRecord {
    DedupRecord {
        fingerprint: alert.fingerprint.clone(),
        alert_id: alert.id.clone(),
        rule_id: alert.rule_id.clone(),
        target_id: alert.target_id.clone(),
        first_seen: alert.triggered_at,
        last_seen: alert.triggered_at,
        occurrence_count: 1,
        last_notified_at: None,
    }
}

/// Folds a repeat occurrence into the open alert and its record.
fn absorb_occurrence(alert: &mut Alert, record: &mut DedupRecord, candidate: &Alert) {
    record.occurrence_count += 1;
    // Late samples must not move last_seen backwards.
    record.last_seen = record.last_seen.max(candidate.triggered_at);
    if candidate.value.is_some() {
        alert.value = candidate.value;
    }
    alert.updated_at = candidate.triggered_at;
}
