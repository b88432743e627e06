use crate::gate::{self, GateDecision, Transition};
use crate::AlertHook;
use chrono::{DateTime, Utc};
use oxheal_common::alert::{Alert, AlertOccurrence, AlertStatus, OccurrenceKind};
use oxheal_common::fingerprint::fingerprint;
use oxheal_common::rule::{AlertRule, RuleCondition};
use oxheal_notify::{Notification, NotificationKind, NotificationQueue};
use oxheal_storage::{Result, Store};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum DedupOutcome {
    Opened { alert: Alert, decision: GateDecision },
    Repeated {
        alert: Alert,
        occurrence_count: u64,
        decision: GateDecision,
    },
    Resolved { alert: Alert, decision: GateDecision },
    /// A resolve occurrence with no open alert.
    Ignored,
}

/// Collapses occurrences into one visible alert per `(rule, target)` and
/// enqueues the notifications the gate lets through.
pub struct Deduplicator {
    store: Arc<dyn Store>,
    queue: NotificationQueue,
    hooks: Vec<Arc<dyn AlertHook>>,
}

impl Deduplicator {
    pub fn new(store: Arc<dyn Store>, queue: NotificationQueue) -> Self {
        Self {
            store,
            queue,
            hooks: Vec::new(),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn AlertHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn record(&self, rule: &AlertRule, occurrence: &AlertOccurrence) -> Result<DedupOutcome> {
        match occurrence.kind {
            OccurrenceKind::Fire => self.record_fire(rule, occurrence),
            OccurrenceKind::Resolve => {
                match self.store.find_open(&rule.id, &occurrence.target_id)? {
                    Some(alert) => self.resolve(rule, &alert.id, occurrence.observed_at),
                    None => Ok(DedupOutcome::Ignored),
                }
            }
        }
    }

    fn record_fire(&self, rule: &AlertRule, occurrence: &AlertOccurrence) -> Result<DedupOutcome> {
        let now = occurrence.observed_at;
        // Built up front; the store discards it when an alert is already open.
        let candidate = self.candidate(rule, occurrence)?;
        let outcome = self.store.upsert_firing(candidate)?;

        let transition = if outcome.created {
            Transition::FirstFire
        } else {
            Transition::Refire
        };
        let decision = gate::check(rule, transition, outcome.record.last_notified_at, now);
        if decision.should_notify() {
            let kind = if outcome.created {
                NotificationKind::Firing
            } else {
                NotificationKind::Refiring
            };
            self.notify(kind, &outcome.alert, occurrence_message(rule, occurrence));
            // Cooldown counts from the last delivered message, not the last sample.
            self.store.mark_notified(&outcome.record.fingerprint, now)?;
        } else {
            tracing::debug!(
                rule_id = %rule.id,
                target_id = %occurrence.target_id,
                decision = ?decision,
                "Notification suppressed"
            );
        }

        if outcome.created {
            tracing::info!(
                alert_id = %outcome.alert.id,
                rule_id = %rule.id,
                target_id = %occurrence.target_id,
                severity = %outcome.alert.severity,
                "Alert opened"
            );
            // Hooks run inline and must not block; remediation spawns its own task.
            for hook in &self.hooks {
                hook.alert_opened(&outcome.alert, rule);
            }
            Ok(DedupOutcome::Opened {
                alert: outcome.alert,
                decision,
            })
        } else {
            Ok(DedupOutcome::Repeated {
                alert: outcome.alert,
                occurrence_count: outcome.record.occurrence_count,
                decision,
            })
        }
    }

    /// Resolves an open alert, by condition recovery or operator action.
    pub fn resolve(
        &self,
        rule: &AlertRule,
        alert_id: &str,
        at: DateTime<Utc>,
    ) -> Result<DedupOutcome> {
        let Some(alert) = self.store.resolve(alert_id, at)? else {
            return Ok(DedupOutcome::Ignored);
        };
        // Resolves ignore cooldown but still respect silence windows.
        let decision = gate::check(rule, Transition::Resolve, None, at);
        if decision.should_notify() {
            self.notify(
                NotificationKind::Resolved,
                &alert,
                format!("{} on {} resolved", rule.name, alert.target_id),
            );
        }
        tracing::info!(
            alert_id = %alert.id,
            rule_id = %rule.id,
            target_id = %alert.target_id,
            "Alert resolved"
        );
        Ok(DedupOutcome::Resolved { alert, decision })
    }

    fn candidate(&self, rule: &AlertRule, occurrence: &AlertOccurrence) -> Result<Alert> {
        let now = occurrence.observed_at;
        let next_escalation_at = self
            .store
            .get_policy(&rule.id)?
            // The first level is scheduled at creation; the engine only follows the schedule.
            .and_then(|p| p.next_escalation_at(0, now));
        Ok(Alert {
            id: oxheal_common::id::next_id(),
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            target_id: occurrence.target_id.clone(),
            fingerprint: fingerprint(&rule.id, &occurrence.target_id, rule.severity),
            status: AlertStatus::Firing,
            severity: rule.severity,
            message: occurrence_message(rule, occurrence),
            value: occurrence.value,
            escalation_level: 0,
            last_escalated_at: None,
            next_escalation_at,
            triggered_at: now,
            resolved_at: None,
            acknowledged_at: None,
            acknowledged_by: None,
            updated_at: now,
        })
    }

    fn notify(&self, kind: NotificationKind, alert: &Alert, message: String) {
        self.queue.enqueue(Notification::new(
            kind,
            &alert.id,
            &alert.rule_id,
            &alert.target_id,
            alert.severity,
            message,
        ));
    }
}

fn occurrence_message(rule: &AlertRule, occurrence: &AlertOccurrence) -> String {
    match (&rule.condition, occurrence.value, &occurrence.log_line) {
        (RuleCondition::LogKeyword { .. }, _, Some(line)) => {
            format!("{} on {}: {}", rule.name, occurrence.target_id, line)
        }
        (cond, Some(value), _) => match cond.threshold() {
            Some((metric, op, threshold)) => format!(
                "{} on {}: {metric} = {value:.2} ({op} {threshold})",
                rule.name, occurrence.target_id
            ),
            None => format!("{} on {}: {value:.2}", rule.name, occurrence.target_id),
        },
        _ => format!("{} on {}", rule.name, occurrence.target_id),
    }
}
