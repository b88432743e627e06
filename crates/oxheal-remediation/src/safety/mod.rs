//! Safety gates consulted before any runbook executes.

pub mod circuit_breaker;
pub mod command_policy;
pub mod rate_limiter;
pub mod risk;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, Permit};
pub use command_policy::{CommandPolicy, CommandPolicyConfig};
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use risk::{RiskAssessment, RiskAssessor, RiskConfig};

use crate::error::{RemediationError, Result};
use crate::runbook::Runbook;
use chrono::{DateTime, Utc};
use oxheal_common::remediation::Diagnosis;
use oxheal_common::types::RiskLevel;

pub const RATE_LIMIT_EXCEEDED: &str = "rate limit exceeded";
pub const CIRCUIT_OPEN: &str = "circuit breaker open";

/// Safety state is tracked per host and runbook.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SafetyKey {
    pub host: String,
    pub runbook: String,
}

impl SafetyKey {
    pub fn new(host: &str, runbook: &str) -> Self {
        Self {
            host: host.to_string(),
            runbook: runbook.to_string(),
        }
    }
}

impl std::fmt::Display for SafetyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.host, self.runbook)
    }
}

pub struct GateInput<'a> {
    pub key: &'a SafetyKey,
    pub runbook: &'a Runbook,
    pub commands: &'a [String],
    pub diagnosis: &'a Diagnosis,
    /// Hosts currently executing the same runbook.
    pub concurrent_hosts: usize,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateVerdict {
    /// Every gate passed; rate-limit slot and breaker permit are taken.
    Pass { risk: RiskLevel, permit: Permit },
    /// At least one overridable gate refused; an operator may approve.
    NeedsApproval { risk: RiskLevel, reason: String },
    /// The command policy refused; approval cannot override this.
    Forbidden { risk: RiskLevel, reason: String },
}

/// The four gates, in evaluation order: command policy, risk, rate limit,
/// circuit breaker.
pub struct SafetyGates {
    pub commands: CommandPolicy,
    pub risk: RiskAssessor,
    pub rate_limiter: RateLimiter,
    pub breaker: CircuitBreaker,
}

impl SafetyGates {
    pub fn new(
        command_policy: &CommandPolicyConfig,
        risk: &RiskConfig,
        rate_limit: &RateLimitConfig,
        circuit_breaker: &CircuitBreakerConfig,
    ) -> Result<Self> {
        Ok(Self {
            commands: CommandPolicy::new(command_policy)
                .map_err(|e| RemediationError::Config(format!("command policy: {e}")))?,
            risk: RiskAssessor::new(risk),
            rate_limiter: RateLimiter::new(rate_limit),
            breaker: CircuitBreaker::new(circuit_breaker),
        })
    }

    pub fn evaluate(&self, input: GateInput<'_>) -> GateVerdict {
        // Risk is computed first so even a refusal reports it.
        let assessment = self
            .risk
            .assess(input.runbook, input.diagnosis, input.concurrent_hosts);
        let risk = assessment.level;

        // Hard stop; nothing below can turn this into an approval.
        if let Err(reason) = self.commands.check_all(input.commands) {
            return GateVerdict::Forbidden { risk, reason };
        }

        let mut reasons = Vec::new();
        if let Some(reason) = assessment.reason {
            reasons.push(reason);
        }
        // Peek only; slots are taken in `admit`.
        if !self.rate_limiter.would_allow(input.key, input.now) {
            reasons.push(RATE_LIMIT_EXCEEDED.to_string());
        }
        if !self.breaker.would_allow(input.key, input.now) {
            reasons.push(CIRCUIT_OPEN.to_string());
        }
        if !reasons.is_empty() {
            return GateVerdict::NeedsApproval {
                risk,
                reason: reasons.join("; "),
            };
        }

        // Another task may have raced us between the checks and here.
        match self.admit(input.key, input.now) {
            Ok(permit) => GateVerdict::Pass { risk, permit },
            Err(reason) => GateVerdict::NeedsApproval {
                risk,
                reason: reason.to_string(),
            },
        }
    }

    /// Re-checks breaker and rate limiter for an approved task.
    pub fn admit_approved(
        &self,
        task_id: &str,
        key: &SafetyKey,
        now: DateTime<Utc>,
    ) -> Result<Permit> {
        self.admit(key, now).map_err(|reason| match reason {
            CIRCUIT_OPEN => RemediationError::CircuitOpen {
                host: key.host.clone(),
                runbook: key.runbook.clone(),
            },
            other => RemediationError::GateBlocked {
                task_id: task_id.to_string(),
                reason: other.to_string(),
            },
        })
    }

    fn admit(&self, key: &SafetyKey, now: DateTime<Utc>) -> std::result::Result<Permit, &'static str> {
        // Breaker first, so a rate refusal can hand the trial back.
        let permit = self.breaker.acquire(key, now).ok_or(CIRCUIT_OPEN)?;
        if !self.rate_limiter.try_acquire(key, now) {
            self.breaker.release(key, permit);
            return Err(RATE_LIMIT_EXCEEDED);
        }
        Ok(permit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runbook::tests::metric_context;
    use crate::runbook::RunbookAction;

    fn gates(max_per_hour: u32) -> SafetyGates {
        SafetyGates::new(
            &CommandPolicyConfig::default(),
            &RiskConfig::default(),
            &RateLimitConfig { max_per_hour },
            &CircuitBreakerConfig {
                failure_threshold: 1,
                cooldown_secs: 600,
            },
        )
        .unwrap()
    }

    fn evaluate(gates: &SafetyGates, runbook: &Runbook, now: DateTime<Utc>) -> GateVerdict {
        let ctx = metric_context("memory_percent", "web-01");
        let key = SafetyKey::new(&ctx.host, &runbook.name);
        let commands = runbook.gated_commands(&ctx);
        gates.evaluate(GateInput {
            key: &key,
            runbook,
            commands: &commands,
            diagnosis: &ctx.diagnosis,
            concurrent_hosts: 0,
            now,
        })
    }

    #[test]
    fn low_risk_passes_until_rate_limited() {
        let gates = gates(1);
        let rb = Runbook::new("cache_drop", 0, RunbookAction::CacheDrop);
        let now = Utc::now();
        assert!(matches!(evaluate(&gates, &rb, now), GateVerdict::Pass { permit: Permit::Normal, .. }));
        assert_eq!(
            evaluate(&gates, &rb, now),
            GateVerdict::NeedsApproval {
                risk: RiskLevel::Low,
                reason: RATE_LIMIT_EXCEEDED.to_string()
            }
        );
    }

    #[test]
    fn open_breaker_routes_to_approval_and_refuses_approve() {
        let gates = gates(10);
        let rb = Runbook::new("cache_drop", 0, RunbookAction::CacheDrop);
        let key = SafetyKey::new("web-01", "cache_drop");
        let now = Utc::now();
        gates.breaker.record_failure(&key, Permit::Normal, now);

        match evaluate(&gates, &rb, now) {
            GateVerdict::NeedsApproval { reason, .. } => assert_eq!(reason, CIRCUIT_OPEN),
            other => panic!("unexpected verdict {other:?}"),
        }
        assert!(matches!(
            gates.admit_approved("t1", &key, now),
            Err(RemediationError::CircuitOpen { .. })
        ));
    }

    #[test]
    fn command_violation_is_forbidden() {
        let gates = gates(10);
        let rb = Runbook::new(
            "cleanup",
            0,
            RunbookAction::DiskCleanup {
                paths: vec!["/tmp".into()],
                older_than_days: 1,
            },
        );
        let gates = SafetyGates {
            commands: CommandPolicy::new(&CommandPolicyConfig {
                allow: vec![],
                deny: vec![r"-delete".into()],
            })
            .unwrap(),
            ..gates
        };
        assert!(matches!(
            evaluate(&gates, &rb, Utc::now()),
            GateVerdict::Forbidden { .. }
        ));
    }

    #[test]
    fn verify_and_rollback_commands_are_policed() {
        let gates = gates(10);
        let mut rb = Runbook::new("cache_drop", 0, RunbookAction::CacheDrop);
        rb.verify_command = Some("reboot".into());
        match evaluate(&gates, &rb, Utc::now()) {
            GateVerdict::Forbidden { reason, .. } => assert!(reason.contains("`reboot`"), "{reason}"),
            other => panic!("unexpected verdict {other:?}"),
        }

        let restart = Runbook::new(
            "service_restart",
            0,
            RunbookAction::ServiceRestart {
                service: "app".into(),
            },
        );
        let gates = SafetyGates {
            commands: CommandPolicy::new(&CommandPolicyConfig {
                allow: vec![],
                deny: vec![r"^systemctl start".into()],
            })
            .unwrap(),
            ..gates
        };
        match evaluate(&gates, &restart, Utc::now()) {
            GateVerdict::Forbidden { reason, .. } => {
                assert!(reason.contains("systemctl start 'app'"), "{reason}")
            }
            other => panic!("unexpected verdict {other:?}"),
        }
    }
}
