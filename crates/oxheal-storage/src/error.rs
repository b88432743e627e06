use oxheal_common::ValidationError;

/// Errors that can occur within the storage layer.
///
/// # Examples
///
/// ```rust
/// use oxheal_storage::error::StorageError;
///
/// let err = StorageError::NotFound {
///     entity: "alert",
///     id: "42".to_string(),
/// };
/// assert!(err.to_string().contains("alert"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A required record was not found.
    #[error("Storage: {entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// A non-terminal remediation task already exists for the alert.
    #[error("Storage: alert {alert_id} already has an active remediation task ({task_id})")]
    ActiveTask { alert_id: String, task_id: String },

    /// The record exists but is in a state that forbids the operation.
    #[error("Storage: {entity} {id} cannot be changed: {reason}")]
    InvalidState {
        entity: &'static str,
        id: String,
        reason: String,
    },

    /// A unique name was already taken.
    #[error("Storage: {entity} named '{name}' already exists")]
    Duplicate { entity: &'static str, name: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// An underlying SQLite error.
    #[error("Storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failure of a body column.
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage: {0}")]
    Other(String),
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
