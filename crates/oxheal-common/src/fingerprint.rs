use crate::types::Severity;
use sha2::{Digest, Sha256};

/// Stable identity of a recurring condition.
///
/// Fields are NUL-separated so that `("a", "bc")` and `("ab", "c")` never
/// hash to the same value.
///
/// # Examples
///
/// ```
/// use oxheal_common::fingerprint::fingerprint;
/// use oxheal_common::types::Severity;
///
/// let a = fingerprint("cpu-high", "web-01", Severity::Critical);
/// let b = fingerprint("cpu-high", "web-01", Severity::Critical);
/// assert_eq!(a, b);
/// assert_eq!(a.len(), 64);
/// assert_ne!(a, fingerprint("cpu-high", "web-02", Severity::Critical));
/// ```
pub fn fingerprint(rule_id: &str, target_id: &str, severity: Severity) -> String {
    let mut hasher = Sha256::new();
    // NUL-separated so ("ab", "c") and ("a", "bc") differ.
    hasher.update(rule_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(target_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(severity.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separator_prevents_concatenation_collisions() {
        assert_ne!(
            fingerprint("a", "bc", Severity::Info),
            fingerprint("ab", "c", Severity::Info)
        );
    }

    #[test]
    fn severity_is_part_of_identity() {
        assert_ne!(
            fingerprint("r", "t", Severity::Warning),
            fingerprint("r", "t", Severity::Critical)
        );
    }
}
