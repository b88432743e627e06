use crate::error::ValidationError;
use crate::types::{CompareOp, LogLine, Severity};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// Longest accepted `duration_secs`, `cooldown_secs` or escalation delay.
pub const MAX_WINDOW_SECS: u64 = 366 * 24 * 60 * 60;

fn keyword_regex(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

/// Seconds as a chrono duration. Values past [`MAX_WINDOW_SECS`] are
/// clamped; rows written before the bound existed may still carry them.
pub fn window(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_WINDOW_SECS) as i64)
}

fn check_window(field: &'static str, secs: u64) -> Result<(), ValidationError> {
    if secs > MAX_WINDOW_SECS {
        return Err(ValidationError::InvalidField {
            field,
            reason: format!("{secs}s exceeds the maximum of {MAX_WINDOW_SECS}s"),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Metric,
    LogKeyword,
    DbMetric,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Metric => "metric",
            Self::LogKeyword => "log_keyword",
            Self::DbMetric => "db_metric",
        }
    }
}

impl std::fmt::Display for RuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition payload of a rule, tagged by `rule_type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule_type", rename_all = "snake_case")]
pub enum RuleCondition {
    Metric {
        metric: String,
        operator: CompareOp,
        threshold: f64,
    },
    LogKeyword {
        /// Case-insensitive regular expression matched against the message.
        pattern: String,
        #[serde(default)]
        level: Option<String>,
        #[serde(default)]
        service: Option<String>,
    },
    DbMetric {
        metric: String,
        operator: CompareOp,
        threshold: f64,
    },
}

impl RuleCondition {
    pub fn rule_type(&self) -> RuleType {
        match self {
            Self::Metric { .. } => RuleType::Metric,
            Self::LogKeyword { .. } => RuleType::LogKeyword,
            Self::DbMetric { .. } => RuleType::DbMetric,
        }
    }

    /// Metric name, operator and threshold for threshold-style conditions.
    pub fn threshold(&self) -> Option<(&str, CompareOp, f64)> {
        match self {
            Self::Metric {
                metric,
                operator,
                threshold,
            }
            | Self::DbMetric {
                metric,
                operator,
                threshold,
            } => Some((metric.as_str(), *operator, *threshold)),
            Self::LogKeyword { .. } => None,
        }
    }
}

/// Time-of-day range during which notifications are suppressed.
///
/// A window whose `start` is after its `end` wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SilenceWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl SilenceWindow {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        let current = now.time();
        if self.start <= self.end {
            current >= self.start && current <= self.end
        } else {
            // Wraps past midnight, e.g. 22:00-06:00.
            current >= self.start || current <= self.end
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub condition: RuleCondition,
    #[serde(default)]
    pub duration_secs: u64,
    pub severity: Severity,
    #[serde(default)]
    pub cooldown_secs: u64,
    #[serde(default)]
    pub silence: Option<SilenceWindow>,
    /// Glob over target ids (e.g. `"prod-*"`); `"*"` matches everything.
    #[serde(default = "default_target_pattern")]
    pub target_pattern: String,
    #[serde(default)]
    pub is_builtin: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_target_pattern() -> String {
    "*".to_string()
}

fn default_enabled() -> bool {
    true
}

impl AlertRule {
    pub fn rule_type(&self) -> RuleType {
        self.condition.rule_type()
    }

    pub fn applies_to(&self, target_id: &str) -> bool {
        self.target_pattern == "*" || glob_match::glob_match(&self.target_pattern, target_id)
    }

    pub fn duration(&self) -> Duration {
        window(self.duration_secs)
    }

    pub fn cooldown(&self) -> Duration {
        window(self.cooldown_secs)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField { field: "name" });
        }
        if self.target_pattern.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "target_pattern",
            });
        }
        match &self.condition {
            RuleCondition::Metric {
                metric, threshold, ..
            }
            | RuleCondition::DbMetric {
                metric, threshold, ..
            } => {
                if metric.trim().is_empty() {
                    return Err(ValidationError::MissingField { field: "metric" });
                }
                // NaN never compares true, so such a rule could never fire.
                if !threshold.is_finite() {
                    return Err(ValidationError::InvalidField {
                        field: "threshold",
                        reason: format!("{threshold} is not a finite number"),
                    });
                }
            }
            RuleCondition::LogKeyword { pattern, .. } => {
                if pattern.trim().is_empty() {
                    return Err(ValidationError::MissingField { field: "pattern" });
                }
                if let Err(e) = keyword_regex(pattern) {
                    return Err(ValidationError::InvalidField {
                        field: "pattern",
                        reason: e.to_string(),
                    });
                }
            }
        }
        check_window("duration_secs", self.duration_secs)?;
        check_window("cooldown_secs", self.cooldown_secs)?;
        if let Some(window) = &self.silence {
            if window.start == window.end {
                return Err(ValidationError::InvalidField {
                    field: "silence",
                    reason: "start and end must differ".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Validates `updated` as a replacement for this rule. Builtin rules only
    /// accept an `enabled` toggle.
    pub fn check_update(&self, updated: &AlertRule) -> Result<(), ValidationError> {
        if self.is_builtin {
            // Overlay what may differ; any remaining difference is a forbidden edit.
            let mut candidate = updated.clone();
            candidate.id = self.id.clone();
            candidate.enabled = self.enabled;
            candidate.is_builtin = true;
            candidate.created_at = self.created_at;
            candidate.updated_at = self.updated_at;
            if candidate != *self {
                return Err(ValidationError::BuiltinRule(self.name.clone()));
            }
        }
        updated.validate()
    }
}

/// A log rule with its keyword pattern compiled once, for matching
/// ingested lines.
#[derive(Debug, Clone)]
pub struct LogMatcher {
    pub rule: AlertRule,
    keyword: Regex,
}

impl LogMatcher {
    /// `Ok(None)` for rules that are not log rules.
    pub fn new(rule: AlertRule) -> Result<Option<Self>, ValidationError> {
        let RuleCondition::LogKeyword { pattern, .. } = &rule.condition else {
            return Ok(None);
        };
        let keyword = keyword_regex(pattern).map_err(|e| ValidationError::InvalidField {
            field: "pattern",
            reason: e.to_string(),
        })?;
        Ok(Some(Self { rule, keyword }))
    }

    /// Whether `line` passes the rule's scope, level, service and keyword
    /// filters. Level compares case-insensitively, service exactly.
    pub fn matches(&self, line: &LogLine) -> bool {
        let RuleCondition::LogKeyword { level, service, .. } = &self.rule.condition else {
            return false;
        };
        if !self.rule.applies_to(&line.target_id) {
            return false;
        }
        if let Some(level) = level {
            match &line.level {
                Some(l) if l.eq_ignore_ascii_case(level) => {}
                _ => return false,
            }
        }
        // Service names are exact.
        if let Some(service) = service {
            if line.service.as_deref() != Some(service.as_str()) {
                return false;
            }
        }
        self.keyword.is_match(&line.message)
    }
}
