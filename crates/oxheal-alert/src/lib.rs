//! Alert lifecycle: rule evaluation, deduplication, the cooldown/silence
//! gate, time-based escalation and best-effort grouping.
//!
//! Data flows one way. The [`evaluator::RuleEvaluator`] turns source
//! samples and log lines into occurrences, the [`dedup::Deduplicator`]
//! folds them into one visible alert per `(rule, target)` and the
//! [`escalation::EscalationEngine`] raises what stays unresolved.

pub mod dedup;
pub mod escalation;
pub mod evaluator;
pub mod gate;
pub mod grouping;
pub mod source;
pub mod timer;
pub mod window;


use oxheal_common::alert::Alert;
use oxheal_common::rule::AlertRule;

/// Observer notified when an occurrence opens a new alert. Used to start
/// automatic remediation. Implementations must not block.
pub trait AlertHook: Send + Sync {
    fn alert_opened(&self, alert: &Alert, rule: &AlertRule);
}
