/// A rule, policy or schedule was rejected at write time.
///
/// # Examples
///
/// ```
/// use oxheal_common::ValidationError;
///
/// let err = ValidationError::InvalidField {
///     field: "threshold",
///     reason: "must be finite".to_string(),
/// };
/// assert!(err.to_string().contains("threshold"));
/// ```
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("validation: field '{field}' is required")]
    MissingField { field: &'static str },

    #[error("validation: field '{field}' is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("validation: builtin rule '{0}' cannot be modified or deleted")]
    BuiltinRule(String),
}
