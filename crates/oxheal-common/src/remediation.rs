use crate::types::RiskLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationStatus {
    Pending,
    PendingApproval,
    Approved,
    Executing,
    Success,
    Failed,
    Rejected,
}

impl RemediationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::PendingApproval => "pending_approval",
            Self::Approved => "approved",
            Self::Executing => "executing",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Rejected)
    }

    /// Legal edges of the remediation state machine.
    pub fn can_transition_to(&self, next: RemediationStatus) -> bool {
        use RemediationStatus::*;
        matches!(
            (self, next),
            // Pending -> Approved is the system approving a task that passed every gate.
            (Pending, PendingApproval | Approved | Executing | Failed | Rejected)
                | (PendingApproval, Approved | Rejected | Failed)
                | (Approved, Executing | Failed | Rejected)
                | (Executing, Success | Failed)
        )
    }
}

impl std::fmt::Display for RemediationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RemediationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "pending_approval" => Ok(Self::PendingApproval),
            "approved" => Ok(Self::Approved),
            "executing" => Ok(Self::Executing),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "rejected" => Ok(Self::Rejected),
            _ => Err(format!("unknown remediation status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggeredBy {
    Auto,
    Manual,
}

/// Snapshot of what the diagnosis service proposed. Empty when the service
/// was unavailable or timed out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub root_cause: Option<String>,
    pub confidence: f64,
    pub risk_hint: Option<RiskLevel>,
    pub suggested_runbook: Option<String>,
    pub provider: Option<String>,
}

impl Diagnosis {
    pub fn is_empty(&self) -> bool {
        self.root_cause.is_none() && self.risk_hint.is_none() && self.suggested_runbook.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub host: String,
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    #[serde(default)]
    pub dry_run: bool,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationTask {
    pub id: String,
    pub alert_id: String,
    pub host: String,
    pub status: RemediationStatus,
    pub risk_level: Option<RiskLevel>,
    pub runbook_name: Option<String>,
    pub diagnosis: Diagnosis,
    pub command_results: Vec<CommandResult>,
    pub verification_passed: Option<bool>,
    pub blocked_reason: Option<String>,
    pub triggered_by: TriggeredBy,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RemediationTask {
    pub fn new(id: String, alert_id: &str, host: &str, triggered_by: TriggeredBy) -> Self {
        let now = Utc::now();
        Self {
            id,
            alert_id: alert_id.to_string(),
            host: host.to_string(),
            status: RemediationStatus::Pending,
            risk_level: None,
            runbook_name: None,
            diagnosis: Diagnosis::default(),
            command_results: Vec::new(),
            verification_passed: None,
            blocked_reason: None,
            triggered_by,
            approved_by: None,
            approved_at: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves the task along a legal edge and stamps the timing fields.
    /// Returns the previous status.
    pub fn transition(
        &mut self,
        next: RemediationStatus,
        now: DateTime<Utc>,
    ) -> Result<RemediationStatus, InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        let previous = self.status;
        self.status = next;
        self.updated_at = now;
        if next == RemediationStatus::Executing {
            self.started_at = Some(now);
        }
        // Failed straight from Pending never started, so started_at stays empty.
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(previous)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal remediation transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: RemediationStatus,
    pub to: RemediationStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum Actor {
    System,
    Operator(String),
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => f.write_str("system"),
            Self::Operator(name) => write!(f, "operator:{name}"),
        }
    }
}

/// Append-only audit entry written on every remediation transition.
/// `payload` holds the full task snapshot after the transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub task_id: String,
    pub alert_id: String,
    pub from_status: Option<RemediationStatus>,
    pub to_status: RemediationStatus,
    pub actor: Actor,
    pub comment: Option<String>,
    pub payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_have_no_exits() {
        for terminal in [
            RemediationStatus::Success,
            RemediationStatus::Failed,
            RemediationStatus::Rejected,
        ] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(RemediationStatus::Executing));
            assert!(!terminal.can_transition_to(RemediationStatus::Pending));
        }
    }

    #[test]
    fn transition_stamps_timestamps() {
        let mut task = RemediationTask::new("t1".into(), "a1", "web-01", TriggeredBy::Auto);
        let now = Utc::now();
        task.transition(RemediationStatus::Approved, now).unwrap();
        task.transition(RemediationStatus::Executing, now).unwrap();
        assert_eq!(task.started_at, Some(now));
        task.transition(RemediationStatus::Success, now).unwrap();
        assert_eq!(task.completed_at, Some(now));

        let err = task
            .transition(RemediationStatus::Executing, now)
            .unwrap_err();
        assert_eq!(err.from, RemediationStatus::Success);
    }

    #[test]
    fn rejected_only_before_execution() {
        assert!(RemediationStatus::PendingApproval.can_transition_to(RemediationStatus::Rejected));
        assert!(!RemediationStatus::Executing.can_transition_to(RemediationStatus::Rejected));
    }
}
