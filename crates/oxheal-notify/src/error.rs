/// Errors that can occur within the notification subsystem.
///
/// # Examples
///
/// ```rust
/// use oxheal_notify::error::NotifyError;
///
/// let err = NotifyError::InvalidConfig("webhook url is empty".to_string());
/// assert!(err.to_string().contains("webhook url"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Channel configuration is missing a required field or contains an invalid value.
    #[error("Notify: invalid channel configuration: {0}")]
    InvalidConfig(String),

    /// No dispatcher is registered for the channel kind.
    #[error("Notify: no dispatcher for channel kind '{0}'")]
    UnknownChannelKind(String),

    /// An HTTP request to an external notification endpoint failed.
    #[error("Notify: HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Notify: JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// The external endpoint returned a non-success response.
    #[error("Notify: API error from {service}: status={status}, body={body}")]
    ApiError {
        service: String,
        status: u16,
        body: String,
    },
}

/// Convenience `Result` alias for notification operations.
pub type Result<T> = std::result::Result<T, NotifyError>;
