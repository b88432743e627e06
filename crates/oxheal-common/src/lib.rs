//! Shared data model for the oxheal alerting and remediation engine.
//!
//! Everything that crosses a crate boundary lives here: alert rules and
//! their conditions, the visible [`alert::Alert`] entity with its dedup
//! bookkeeping, escalation policies, remediation tasks and audit records.

pub mod alert;
pub mod error;
pub mod fingerprint;
pub mod id;
pub mod remediation;
pub mod rule;
pub mod types;

pub use error::ValidationError;
