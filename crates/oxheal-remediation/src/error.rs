use oxheal_common::remediation::InvalidTransition;
use oxheal_storage::StorageError;

/// Errors surfaced by the remediation orchestrator.
///
/// # Examples
///
/// ```
/// use oxheal_remediation::RemediationError;
///
/// let err = RemediationError::Conflict {
///     alert_id: "42".into(),
///     task_id: "7".into(),
/// };
/// assert!(err.to_string().contains("already in flight"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum RemediationError {
    /// A non-terminal task already exists for the alert. Not queued.
    #[error("Remediation: task {task_id} already in flight for alert {alert_id}")]
    Conflict { alert_id: String, task_id: String },

    #[error("Remediation: {entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// Remediation is only started for open alerts.
    #[error("Remediation: alert {alert_id} is already resolved")]
    AlertResolved { alert_id: String },

    #[error("Remediation: {0}")]
    InvalidTransition(#[from] InvalidTransition),

    /// A safety gate refused the request; the task keeps its status.
    #[error("Remediation: blocked by safety gate: {reason}")]
    GateBlocked { task_id: String, reason: String },

    /// The circuit breaker for `(host, runbook)` is open.
    #[error("Remediation: circuit open for {host}/{runbook}")]
    CircuitOpen { host: String, runbook: String },

    #[error("Remediation: execution failed: {0}")]
    ExecutionFailure(String),

    /// Never fatal; the orchestrator continues with an empty diagnosis.
    #[error("Remediation: diagnosis unavailable: {0}")]
    DiagnosisUnavailable(String),

    #[error("Remediation: invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for RemediationError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ActiveTask { alert_id, task_id } => Self::Conflict { alert_id, task_id },
            StorageError::NotFound { entity, id } => Self::NotFound { entity, id },
            other => Self::Storage(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, RemediationError>;
