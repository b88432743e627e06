use crate::error::ValidationError;
use crate::types::Severity;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Firing,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Firing => "firing",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, Self::Resolved)
    }
}

impl std::str::FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "firing" => Ok(Self::Firing),
            "acknowledged" => Ok(Self::Acknowledged),
            "resolved" => Ok(Self::Resolved),
            _ => Err(format!("unknown alert status: {s}")),
        }
    }
}

/// The visible alert entity. At most one open alert exists per
/// `(rule_id, target_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub target_id: String,
    pub fingerprint: String,
    pub status: AlertStatus,
    pub severity: Severity,
    pub message: String,
    /// Last sampled value, absent for log alerts.
    pub value: Option<f64>,
    pub escalation_level: u32,
    pub last_escalated_at: Option<DateTime<Utc>>,
    pub next_escalation_at: Option<DateTime<Utc>>,
    pub triggered_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Bookkeeping for an active fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupRecord {
    pub fingerprint: String,
    pub alert_id: String,
    pub rule_id: String,
    pub target_id: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub occurrence_count: u64,
    pub last_notified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OccurrenceKind {
    Fire,
    Resolve,
}

/// Ephemeral output of rule evaluation, consumed by the deduplicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertOccurrence {
    pub rule_id: String,
    pub target_id: String,
    pub kind: OccurrenceKind,
    pub value: Option<f64>,
    pub log_line: Option<String>,
    pub observed_at: DateTime<Utc>,
}

/// Best-effort cluster of correlated open alerts. Holds ids and counts only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertGroup {
    pub key: String,
    pub target_id: String,
    pub alert_ids: Vec<String>,
    pub count: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub highest_severity: Severity,
    pub first_triggered_at: DateTime<Utc>,
    pub last_triggered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationLevel {
    pub level: u32,
    pub delay_minutes: u64,
    pub severity: Severity,
}

impl EscalationLevel {
    pub fn delay(&self) -> Duration {
        crate::rule::window(self.delay_minutes.saturating_mul(60))
    }
}

/// Escalation levels bound to one alert rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    pub rule_id: String,
    #[serde(default)]
    pub oncall_group: Option<String>,
    pub levels: Vec<EscalationLevel>,
}

impl EscalationPolicy {
    /// The level an alert currently at `escalation_level` would move to.
    pub fn next_level(&self, escalation_level: u32) -> Option<&EscalationLevel> {
        // Positional: level numbers are labels, not indices.
        self.levels.get(escalation_level as usize)
    }

    pub fn next_escalation_at(
        &self,
        escalation_level: u32,
        since: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        self.next_level(escalation_level)
            .map(|lvl| since + lvl.delay())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.levels.is_empty() {
            return Err(ValidationError::MissingField { field: "levels" });
        }
        let max_minutes = crate::rule::MAX_WINDOW_SECS / 60;
        if let Some(level) = self.levels.iter().find(|l| l.delay_minutes > max_minutes) {
            return Err(ValidationError::InvalidField {
                field: "delay_minutes",
                reason: format!(
                    "level {} waits {} minutes, more than {max_minutes}",
                    level.level, level.delay_minutes
                ),
            });
        }
        // Positional lookup needs strictly increasing labels.
        for (idx, pair) in self.levels.windows(2).enumerate() {
            if pair[1].level <= pair[0].level {
                return Err(ValidationError::InvalidField {
                    field: "levels",
                    reason: format!("level at position {} is not increasing", idx + 1),
                });
            }
        }
        Ok(())
    }
}

/// One on-call assignment. Both dates are inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnCallSchedule {
    pub group_id: String,
    pub user: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl OnCallSchedule {
    pub fn covers(&self, group_id: &str, date: NaiveDate) -> bool {
        self.group_id == group_id && self.start <= date && date <= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(levels: &[(u32, u64)]) -> EscalationPolicy {
        EscalationPolicy {
            rule_id: "r".into(),
            oncall_group: None,
            levels: levels
                .iter()
                .map(|(level, delay)| EscalationLevel {
                    level: *level,
                    delay_minutes: *delay,
                    severity: Severity::Critical,
                })
                .collect(),
        }
    }

    #[test]
    fn next_level_is_positional() {
        let p = policy(&[(1, 15), (2, 30)]);
        assert_eq!(p.next_level(0).map(|l| l.level), Some(1));
        assert_eq!(p.next_level(1).map(|l| l.level), Some(2));
        assert!(p.next_level(2).is_none());
    }

    #[test]
    fn delay_is_bounded() {
        let max = crate::rule::MAX_WINDOW_SECS / 60;
        assert!(policy(&[(1, max)]).validate().is_ok());
        assert!(matches!(
            policy(&[(1, 15), (2, u64::MAX)]).validate(),
            Err(ValidationError::InvalidField { field: "delay_minutes", .. })
        ));
        let huge = EscalationLevel {
            level: 1,
            delay_minutes: u64::MAX,
            severity: Severity::Critical,
        };
        assert_eq!(huge.delay(), Duration::seconds(crate::rule::MAX_WINDOW_SECS as i64));
    }

    #[test]
    fn levels_must_increase() {
        assert!(policy(&[(1, 15), (2, 30)]).validate().is_ok());
        assert!(policy(&[(2, 15), (1, 30)]).validate().is_err());
        assert!(policy(&[]).validate().is_err());
    }
}
