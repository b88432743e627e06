use crate::error::{RemediationError, Result};
use crate::runbook::{Runbook, RunbookContext};

/// Runbooks in registration order, looked up by name.
#[derive(Debug, Clone, Default)]
pub struct RunbookRegistry {
    runbooks: Vec<Runbook>,
}

impl RunbookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_runbooks(runbooks: Vec<Runbook>) -> Result<Self> {
        let mut registry = Self::new();
        for runbook in runbooks {
            registry.register(runbook)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, runbook: Runbook) -> Result<()> {
        runbook.validate().map_err(RemediationError::Config)?;
        if self.get(&runbook.name).is_some() {
            return Err(RemediationError::Config(format!(
                "duplicate runbook name '{}'",
                runbook.name
            )));
        }
        self.runbooks.push(runbook);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Runbook> {
        self.runbooks.iter().find(|r| r.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.runbooks.iter().map(|r| r.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.runbooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runbooks.is_empty()
    }

    /// Runbooks whose `check` passes, best first: higher priority, then
    /// earlier registration.
    pub fn candidates(&self, ctx: &RunbookContext) -> Vec<&Runbook> {
        let mut matching: Vec<&Runbook> = self.runbooks.iter().filter(|r| r.check(ctx)).collect();
        // Stable sort keeps registration order among equal priorities.
        matching.sort_by(|a, b| b.priority.cmp(&a.priority));
        matching
    }

    /// The runbook to run for `ctx`. A runbook suggested by the diagnosis
    /// wins only if its own `check` passes.
    pub fn select(&self, ctx: &RunbookContext) -> Option<&Runbook> {
        let candidates = self.candidates(ctx);
        if let Some(suggested) = ctx.diagnosis.suggested_runbook.as_deref() {
            if let Some(found) = candidates.iter().find(|r| r.name == suggested) {
                return Some(*found);
            }
            tracing::debug!(
                alert_id = %ctx.alert_id,
                suggested = %suggested,
                "Suggested runbook does not apply, using priority order"
            );
        }
        candidates.into_iter().next()
    }
}
