//! Auto-remediation: runbooks, safety gates, command executors and the
//! orchestrator that ties them to alerts.

pub mod error;
pub mod executor;
pub mod hook;
pub mod orchestrator;
pub mod registry;
pub mod runbook;
pub mod safety;
pub mod verify;


pub use error::{RemediationError, Result};
pub use executor::{build_executor, CommandExecutor, ExecutorConfig, ExecutorMode};
pub use hook::AutoTrigger;
pub use orchestrator::{Collaborators, Orchestrator, RemediationConfig};
pub use registry::RunbookRegistry;
pub use runbook::{Runbook, RunbookAction, RunbookContext};
