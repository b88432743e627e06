use crate::gate::{self, Transition};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use oxheal_common::alert::{Alert, AlertStatus, EscalationPolicy, OnCallSchedule};
use oxheal_notify::{Notification, NotificationKind, NotificationQueue};
use oxheal_storage::{EscalationStep, Result, StorageError, Store};
use std::collections::HashMap;
use std::sync::Arc;

/// Answers who is on call for a group on a given day.
#[async_trait]
pub trait OnCallLookup: Send + Sync {
    async fn current_on_call(&self, group_id: &str, date: NaiveDate) -> Option<String>;
}

/// On-call rota loaded from configuration. The first covering entry wins.
pub struct StaticOnCallSchedule {
    entries: Vec<OnCallSchedule>,
}

impl StaticOnCallSchedule {
    pub fn new(entries: Vec<OnCallSchedule>) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl OnCallLookup for StaticOnCallSchedule {
    async fn current_on_call(&self, group_id: &str, date: NaiveDate) -> Option<String> {
        self.entries
            .iter()
            .find(|e| e.covers(group_id, date))
            .map(|e| e.user.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EscalationEvent {
    pub alert: Alert,
    pub level: u32,
    pub oncall_user: Option<String>,
}

/// Raises severity of firing alerts that stay unresolved past their
/// policy's delays. Runs on its own tick, independent of evaluation.
pub struct EscalationEngine {
    store: Arc<dyn Store>,
    oncall: Arc<dyn OnCallLookup>,
    queue: NotificationQueue,
}

impl EscalationEngine {
    pub fn new(
        store: Arc<dyn Store>,
        oncall: Arc<dyn OnCallLookup>,
        queue: NotificationQueue,
    ) -> Self {
        Self {
            store,
            oncall,
            queue,
        }
    }

    /// Applies at most one level per alert per tick. Acknowledged alerts
    /// are owned by a human and are left alone.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<EscalationEvent>> {
        let firing = self.store.list_alerts(Some(AlertStatus::Firing), usize::MAX)?;
        let mut policies: HashMap<String, Option<EscalationPolicy>> = HashMap::new();
        let mut events = Vec::new();

        for alert in firing {
            // One policy lookup per rule per tick.
            if !policies.contains_key(&alert.rule_id) {
                let policy = self.store.get_policy(&alert.rule_id)?;
                policies.insert(alert.rule_id.clone(), policy);
            }
            let Some(Some(policy)) = policies.get(&alert.rule_id) else {
                continue;
            };
            match self.escalate_one(&alert, policy, now).await {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                // One bad alert must not starve the rest.
                Err(e) => {
                    tracing::error!(alert_id = %alert.id, error = %e, "Escalation failed");
                }
            }
        }
        Ok(events)
    }

    async fn escalate_one(
        &self,
        alert: &Alert,
        policy: &EscalationPolicy,
        now: DateTime<Utc>,
    ) -> Result<Option<EscalationEvent>> {
        let Some(level) = policy.next_level(alert.escalation_level) else {
            return Ok(None);
        };
        // Delays are relative to the previous level, or to a reset.
        let since = alert.last_escalated_at.unwrap_or(alert.triggered_at);
        if now - since < level.delay() {
            return Ok(None);
        }

        let step = EscalationStep {
            expected_level: alert.escalation_level,
            severity: level.severity,
            at: now,
            next_escalation_at: policy.next_escalation_at(alert.escalation_level + 1, now),
        };
        let Some(updated) = self.store.escalate(&alert.id, &step)? else {
            tracing::debug!(alert_id = %alert.id, "Escalation skipped, alert changed concurrently");
            return Ok(None);
        };

        let oncall_user = match &policy.oncall_group {
            Some(group) => self.oncall.current_on_call(group, now.date_naive()).await,
            None => None,
        };
        tracing::warn!(
            alert_id = %updated.id,
            level = level.level,
            severity = %updated.severity,
            oncall = oncall_user.as_deref().unwrap_or("-"),
            "Alert escalated"
        );

        let notify = match self.store.get_rule(&updated.rule_id)? {
            Some(rule) => gate::check(&rule, Transition::Escalate, None, now).should_notify(),
            // Rule deleted under a live alert; still tell someone.
            None => true,
        };
        if notify {
            self.queue.enqueue(
                Notification::new(
                    NotificationKind::Escalated,
                    &updated.id,
                    &updated.rule_id,
                    &updated.target_id,
                    updated.severity,
                    format!(
                        "{} on {} escalated to level {}",
                        updated.rule_name, updated.target_id, level.level
                    ),
                )
                .with_oncall(oncall_user.clone()),
            );
        }

        Ok(Some(EscalationEvent {
            level: level.level,
            alert: updated,
            oncall_user,
        }))
    }

    /// Operator reset: back to level zero and the rule's own severity, with
    /// the escalation clock restarted.
    pub fn reset(&self, alert_id: &str, now: DateTime<Utc>) -> Result<Alert> {
        let alert = self
            .store
            .get_alert(alert_id)?
            .ok_or_else(|| StorageError::NotFound {
                entity: "alert",
                id: alert_id.to_string(),
            })?;
        let rule = self.store.get_rule(&alert.rule_id)?;
        let severity = rule.as_ref().map_or(alert.severity, |r| r.severity);
        let next = self
            .store
            .get_policy(&alert.rule_id)?
            .and_then(|p| p.next_escalation_at(0, now));
        let reset = self.store.reset_escalation(alert_id, severity, next, now)?;
        tracing::info!(alert_id = %alert_id, "Escalation reset");
        Ok(reset)
    }
}
