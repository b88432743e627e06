//! Root-cause diagnosis for alerts.
//!
//! The remediation orchestrator asks a [`Diagnoser`] for a root cause, a
//! confidence, a risk hint and optionally a runbook suggestion. Answers
//! are advisory: a missing or slow answer degrades to an empty
//! [`Diagnosis`](oxheal_common::remediation::Diagnosis).

pub mod diagnoser;
pub mod models;
pub mod prompt;
pub mod providers;

pub use diagnoser::{parse_diagnosis, AlertContext, Diagnoser, NoopDiagnoser};
pub use providers::openai::ChatDiagnoser;
