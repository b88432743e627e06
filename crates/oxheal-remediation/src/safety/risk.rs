use crate::runbook::Runbook;
use oxheal_common::remediation::Diagnosis;
use oxheal_common::types::RiskLevel;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Highest risk that runs without approval.
    #[serde(default = "default_auto_approve_max")]
    pub auto_approve_max: RiskLevel,
    /// Concurrent executions of one runbook (across hosts) at which the
    /// risk is raised one level. 0 disables the check.
    #[serde(default = "default_blast_radius_threshold")]
    pub blast_radius_threshold: usize,
    /// Runbooks that never need approval for their risk alone.
    #[serde(default)]
    pub auto_approve_runbooks: Vec<String>,
}

fn default_auto_approve_max() -> RiskLevel {
    RiskLevel::Low
}

fn default_blast_radius_threshold() -> usize {
    3
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            auto_approve_max: default_auto_approve_max(),
            blast_radius_threshold: default_blast_radius_threshold(),
            auto_approve_runbooks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub requires_approval: bool,
    pub reason: Option<String>,
}

pub struct RiskAssessor {
    config: RiskConfig,
}

impl RiskAssessor {
    pub fn new(config: &RiskConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Risk of running `runbook` now. The diagnosis can only raise the
    /// runbook's own level, never lower it.
    pub fn assess(
        &self,
        runbook: &Runbook,
        diagnosis: &Diagnosis,
        concurrent_hosts: usize,
    ) -> RiskAssessment {
        let mut level = runbook.risk();
        if let Some(hint) = diagnosis.risk_hint {
            level = level.max(hint);
        }

        let wide = self.config.blast_radius_threshold > 0
            && concurrent_hosts >= self.config.blast_radius_threshold;
        // A wide rollout is riskier than the runbook alone.
        if wide {
            level = level.raised();
        }

        let exempt = self
            .config
            .auto_approve_runbooks
            .iter()
            .any(|name| name == &runbook.name);
        // Exemption covers the runbook's own risk, never a wide rollout.
        let requires_approval = level > self.config.auto_approve_max && (!exempt || wide);
        let reason = requires_approval.then(|| {
            if wide {
                format!(
                    "risk_level {level} requires approval (blast radius {concurrent_hosts} hosts)"
                )
            } else {
                format!("risk_level {level} requires approval")
            }
        });

        RiskAssessment {
            level,
            requires_approval,
            reason,
        }
    }
}
