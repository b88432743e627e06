use crate::{
    absorb_occurrence, acknowledge_alert, ensure_deletable, merge_rule_update, new_dedup_record,
    not_found, stale_transition, AlertStore, EscalationStep, FireOutcome, RemediationStore, Result,
    RuleStore, StorageError,
};
use chrono::{DateTime, Utc};
use oxheal_common::alert::{Alert, AlertStatus, DedupRecord, EscalationPolicy};
use oxheal_common::remediation::{AuditRecord, RemediationStatus, RemediationTask};
use oxheal_common::rule::AlertRule;
use oxheal_common::types::Severity;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Inner {
    alerts: HashMap<String, Alert>,
    dedup: HashMap<String, DedupRecord>,
    rules: Vec<AlertRule>,
    policies: HashMap<String, EscalationPolicy>,
    tasks: Vec<RemediationTask>,
    audit: Vec<AuditRecord>,
}

impl Inner {
    fn open_alert_mut(&mut self, rule_id: &str, target_id: &str) -> Option<&mut Alert> {
        self.alerts
            .values_mut()
            .find(|a| a.status.is_open() && a.rule_id == rule_id && a.target_id == target_id)
    }

    fn alert_mut(&mut self, alert_id: &str) -> Result<&mut Alert> {
        self.alerts
            .get_mut(alert_id)
            .ok_or_else(|| not_found("alert", alert_id))
    }
}

/// Store backed by process memory. Every operation runs under one lock, so
/// the multi-step writes are trivially atomic.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AlertStore for MemoryStore {
    fn upsert_firing(&self, candidate: Alert) -> Result<FireOutcome> {
        let mut inner = self.lock();
        let existing = inner
            .open_alert_mut(&candidate.rule_id, &candidate.target_id)
            // Cloned out so `inner` can be borrowed again below.
            .map(|a| a.clone());
        if let Some(mut alert) = existing {
            let fingerprint = alert.fingerprint.clone();
            let mut record = inner
                .dedup
                .remove(&fingerprint)
                .unwrap_or_else(|| new_dedup_record(&alert));
            absorb_occurrence(&mut alert, &mut record, &candidate);
            inner.alerts.insert(alert.id.clone(), alert.clone());
            inner.dedup.insert(fingerprint, record.clone());
            return Ok(FireOutcome {
                alert,
                record,
                created: false,
            });
        }

        let record = new_dedup_record(&candidate);
        // Overwrites any stale record left by an unclean resolve.
        inner.dedup.insert(record.fingerprint.clone(), record.clone());
        inner.alerts.insert(candidate.id.clone(), candidate.clone());
        Ok(FireOutcome {
            alert: candidate,
            record,
            created: true,
        })
    }

    fn resolve(&self, alert_id: &str, at: DateTime<Utc>) -> Result<Option<Alert>> {
        let mut inner = self.lock();
        let alert = inner.alert_mut(alert_id)?;
        if !alert.status.is_open() {
            return Ok(None);
        }
        alert.status = AlertStatus::Resolved;
        alert.resolved_at = Some(at);
        alert.next_escalation_at = None;
        alert.updated_at = at;
        let resolved = alert.clone();
        // Same key lifecycle as the SQLite store.
        inner.dedup.remove(&resolved.fingerprint);
        Ok(Some(resolved))
    }

    fn acknowledge(&self, alert_id: &str, user: &str, at: DateTime<Utc>) -> Result<Alert> {
        let mut inner = self.lock();
        let alert = inner.alert_mut(alert_id)?;
        acknowledge_alert(alert, user, at)?;
        Ok(alert.clone())
    }

    fn escalate(&self, alert_id: &str, step: &EscalationStep) -> Result<Option<Alert>> {
        let mut inner = self.lock();
        let alert = inner.alert_mut(alert_id)?;
        if alert.status != AlertStatus::Firing || alert.escalation_level != step.expected_level {
            return Ok(None);
        }
        alert.escalation_level += 1;
        alert.severity = step.severity;
        alert.last_escalated_at = Some(step.at);
        alert.next_escalation_at = step.next_escalation_at;
        alert.updated_at = step.at;
        Ok(Some(alert.clone()))
    }

    fn reset_escalation(
        &self,
        alert_id: &str,
        severity: Severity,
        next_escalation_at: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    ) -> Result<Alert> {
        let mut inner = self.lock();
        let alert = inner.alert_mut(alert_id)?;
        if !alert.status.is_open() {
            return Err(StorageError::InvalidState {
                entity: "alert",
                id: alert_id.to_string(),
                reason: "alert is already resolved".to_string(),
            });
        }
        alert.escalation_level = 0;
        alert.severity = severity;
        // Delays count from the reset, not from the original trigger.
        alert.last_escalated_at = Some(at);
        alert.next_escalation_at = next_escalation_at;
        alert.updated_at = at;
        Ok(alert.clone())
    }

    fn mark_notified(&self, fingerprint: &str, at: DateTime<Utc>) -> Result<()> {
        if let Some(record) = self.lock().dedup.get_mut(fingerprint) {
            record.last_notified_at = Some(at);
        }
        Ok(())
    }

    fn get_alert(&self, alert_id: &str) -> Result<Option<Alert>> {
        Ok(self.lock().alerts.get(alert_id).cloned())
    }

    fn find_open(&self, rule_id: &str, target_id: &str) -> Result<Option<Alert>> {
        Ok(self
            .lock()
            .open_alert_mut(rule_id, target_id)
            .map(|a| a.clone()))
    }

    fn dedup_record(&self, fingerprint: &str) -> Result<Option<DedupRecord>> {
        Ok(self.lock().dedup.get(fingerprint).cloned())
    }

    fn list_alerts(&self, status: Option<AlertStatus>, limit: usize) -> Result<Vec<Alert>> {
        let inner = self.lock();
        let mut alerts: Vec<Alert> = inner
            .alerts
            .values()
            .filter(|a| status.map_or(true, |s| a.status == s))
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at));
        alerts.truncate(limit);
        Ok(alerts)
    }
}

impl RemediationStore for MemoryStore {
    fn create_task_if_idle(&self, task: &RemediationTask, audit: &AuditRecord) -> Result<()> {
        let mut inner = self.lock();
        if let Some(active) = inner
            .tasks
            .iter()
            .find(|t| t.alert_id == task.alert_id && !t.status.is_terminal())
        {
            return Err(StorageError::ActiveTask {
                alert_id: task.alert_id.clone(),
                task_id: active.id.clone(),
            });
        }
        inner.tasks.push(task.clone());
        inner.audit.push(audit.clone());
        Ok(())
    }

    fn record_transition(&self, task: &RemediationTask, audit: &AuditRecord) -> Result<()> {
        let mut inner = self.lock();
        let slot = inner
            .tasks
            .iter_mut()
            .find(|t| t.id == task.id)
            .ok_or_else(|| not_found("remediation_task", &task.id))?;
        if let Some(from) = audit.from_status {
            if slot.status != from {
                return Err(stale_transition(&task.id, slot.status.as_str()));
            }
        }
        *slot = task.clone();
        inner.audit.push(audit.clone());
        Ok(())
    }

    fn get_task(&self, task_id: &str) -> Result<Option<RemediationTask>> {
        Ok(self.lock().tasks.iter().find(|t| t.id == task_id).cloned())
    }

    fn active_task_for_alert(&self, alert_id: &str) -> Result<Option<RemediationTask>> {
        Ok(self
            .lock()
            .tasks
            .iter()
            .find(|t| t.alert_id == alert_id && !t.status.is_terminal())
            .cloned())
    }

    fn tasks_for_alert(&self, alert_id: &str) -> Result<Vec<RemediationTask>> {
        let mut tasks: Vec<RemediationTask> = self
            .lock()
            .tasks
            .iter()
            .filter(|t| t.alert_id == alert_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    fn list_tasks(
        &self,
        status: Option<RemediationStatus>,
        limit: usize,
    ) -> Result<Vec<RemediationTask>> {
        let mut tasks: Vec<RemediationTask> = self
            .lock()
            .tasks
            .iter()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks.truncate(limit);
        Ok(tasks)
    }

    fn audit_trail(&self, task_id: &str) -> Result<Vec<AuditRecord>> {
        Ok(self
            .lock()
            .audit
            .iter()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect())
    }
}

impl RuleStore for MemoryStore {
    fn list_rules(&self) -> Result<Vec<AlertRule>> {
        Ok(self.lock().rules.clone())
    }

    fn get_rule(&self, rule_id: &str) -> Result<Option<AlertRule>> {
        Ok(self.lock().rules.iter().find(|r| r.id == rule_id).cloned())
    }

    fn get_rule_by_name(&self, name: &str) -> Result<Option<AlertRule>> {
        Ok(self.lock().rules.iter().find(|r| r.name == name).cloned())
    }

    fn insert_rule(&self, rule: &AlertRule) -> Result<()> {
        rule.validate()?;
        let mut inner = self.lock();
        if inner.rules.iter().any(|r| r.name == rule.name || r.id == rule.id) {
            return Err(StorageError::Duplicate {
                entity: "alert_rule",
                name: rule.name.clone(),
            });
        }
        inner.rules.push(rule.clone());
        Ok(())
    }

    fn update_rule(&self, rule: &AlertRule) -> Result<AlertRule> {
        let mut inner = self.lock();
        if inner
            .rules
            .iter()
            .any(|r| r.name == rule.name && r.id != rule.id)
        {
            return Err(StorageError::Duplicate {
                entity: "alert_rule",
                name: rule.name.clone(),
            });
        }
        let slot = inner
            .rules
            .iter_mut()
            .find(|r| r.id == rule.id)
            .ok_or_else(|| not_found("alert_rule", &rule.id))?;
        let merged = merge_rule_update(slot, rule)?;
        *slot = merged.clone();
        Ok(merged)
    }

    fn delete_rule(&self, rule_id: &str) -> Result<()> {
        let mut inner = self.lock();
        let idx = inner
            .rules
            .iter()
            .position(|r| r.id == rule_id)
            .ok_or_else(|| not_found("alert_rule", rule_id))?;
        ensure_deletable(&inner.rules[idx])?;
        // `remove`, not `swap_remove`: list order is creation order.
        inner.rules.remove(idx);
        // Mirrors ON DELETE CASCADE.
        inner.policies.remove(rule_id);
        Ok(())
    }

    fn put_policy(&self, policy: &EscalationPolicy) -> Result<()> {
        policy.validate()?;
        let mut inner = self.lock();
        if !inner.rules.iter().any(|r| r.id == policy.rule_id) {
            return Err(not_found("alert_rule", &policy.rule_id));
        }
        inner
            .policies
            .insert(policy.rule_id.clone(), policy.clone());
        Ok(())
    }

    fn get_policy(&self, rule_id: &str) -> Result<Option<EscalationPolicy>> {
        Ok(self.lock().policies.get(rule_id).cloned())
    }

    fn delete_policy(&self, rule_id: &str) -> Result<bool> {
        Ok(self.lock().policies.remove(rule_id).is_some())
    }

    fn list_policies(&self) -> Result<Vec<EscalationPolicy>> {
        let mut policies: Vec<EscalationPolicy> = self.lock().policies.values().cloned().collect();
        policies.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));
        Ok(policies)
    }
}
