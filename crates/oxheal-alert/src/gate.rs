use chrono::{DateTime, Utc};
use oxheal_common::rule::AlertRule;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    FirstFire,
    Refire,
    Escalate,
    Resolve,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Notify,
    SuppressedSilence,
    SuppressedCooldown,
}

impl GateDecision {
    pub fn should_notify(&self) -> bool {
        matches!(self, Self::Notify)
    }
}

/// Decides whether a transition produces a notification. Alert state is
/// never affected by the answer.
///
/// The silence window applies to every transition; the cooldown only
/// throttles re-notification of an alert that is already firing.
pub fn check(
    rule: &AlertRule,
    transition: Transition,
    last_notified_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> GateDecision {
    if rule.silence.is_some_and(|w| w.is_active(now)) {
        return GateDecision::SuppressedSilence;
    }
    if transition == Transition::Refire {
        if let Some(last) = last_notified_at {
            // Strictly inside the cooldown; the boundary instant notifies.
            if last + rule.cooldown() > now {
                return GateDecision::SuppressedCooldown;
            }
        }
    }
    GateDecision::Notify
}
