use super::SafetyKey;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Time the circuit stays open before one trial is let through.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_cooldown_secs() -> u64 {
    900
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Admission granted by [`CircuitBreaker::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    Normal,
    /// The single half-open trial; its outcome closes or reopens the circuit.
    Trial,
}

#[derive(Debug)]
struct Slot {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<DateTime<Utc>>,
    trial_in_flight: bool,
}

impl Default for Slot {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_in_flight: false,
        }
    }
}

/// Per-`(host, runbook)` circuit breaker.
///
/// `failure_threshold` consecutive failures open the circuit. After the
/// cooldown exactly one trial is admitted; its success closes the circuit,
/// its failure reopens it for another cooldown.
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    slots: RwLock<HashMap<SafetyKey, Arc<Mutex<Slot>>>>,
}

impl CircuitBreaker {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            cooldown: oxheal_common::rule::window(config.cooldown_secs),
            slots: RwLock::new(HashMap::new()),
        }
    }

    fn slot(&self, key: &SafetyKey) -> Arc<Mutex<Slot>> {
        if let Some(slot) = self
            .slots
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
        {
            return Arc::clone(slot);
        }
        let mut slots = self
            .slots
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(slots.entry(key.clone()).or_default())
    }

    fn cooled_down(&self, slot: &Slot, now: DateTime<Utc>) -> bool {
        slot.opened_at
            .map_or(true, |opened| now - opened >= self.cooldown)
    }

    /// Effective state; an open circuit past its cooldown reads as half-open.
    pub fn state(&self, key: &SafetyKey, now: DateTime<Utc>) -> CircuitState {
        let slot = self.slot(key);
        let slot = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match slot.state {
            CircuitState::Open if self.cooled_down(&slot, now) => CircuitState::HalfOpen,
            state => state,
        }
    }

    /// Whether [`acquire`](Self::acquire) would currently succeed.
    pub fn would_allow(&self, key: &SafetyKey, now: DateTime<Utc>) -> bool {
        let slot = self.slot(key);
        let slot = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match slot.state {
            CircuitState::Closed => true,
            CircuitState::Open => self.cooled_down(&slot, now),
            CircuitState::HalfOpen => !slot.trial_in_flight,
        }
    }

    pub fn acquire(&self, key: &SafetyKey, now: DateTime<Utc>) -> Option<Permit> {
        let slot = self.slot(key);
        let mut slot = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match slot.state {
            CircuitState::Closed => Some(Permit::Normal),
            CircuitState::Open if self.cooled_down(&slot, now) => {
                slot.state = CircuitState::HalfOpen;
                slot.trial_in_flight = true;
                tracing::info!(host = %key.host, runbook = %key.runbook, "Circuit half-open, admitting trial");
                Some(Permit::Trial)
            }
            CircuitState::Open => None,
            CircuitState::HalfOpen if slot.trial_in_flight => None,
            CircuitState::HalfOpen => {
                slot.trial_in_flight = true;
                Some(Permit::Trial)
            }
        }
    }

    /// Records a successful run. Only the half-open trial can close a
    /// circuit; a normal permit issued before the circuit opened just
    /// resets the failure streak while it is still closed.
    pub fn record_success(&self, key: &SafetyKey, permit: Permit) {
        let slot = self.slot(key);
        let mut slot = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match (permit, slot.state) {
            (Permit::Trial, _) => {
                tracing::info!(host = %key.host, runbook = %key.runbook, "Circuit closed");
                *slot = Slot::default();
            }
            (Permit::Normal, CircuitState::Closed) => slot.consecutive_failures = 0,
            (Permit::Normal, state) => {
                tracing::debug!(
                    host = %key.host,
                    runbook = %key.runbook,
                    state = %state,
                    "Late success ignored by open circuit"
                );
            }
        }
    }

    pub fn record_failure(&self, key: &SafetyKey, permit: Permit, now: DateTime<Utc>) {
        let slot = self.slot(key);
        let mut slot = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.consecutive_failures += 1;
        let reopen = match (permit, slot.state) {
            (Permit::Trial, _) => true,
            (Permit::Normal, CircuitState::Closed) => {
                slot.consecutive_failures >= self.failure_threshold
            }
            // A stale failure must not restart the cooldown or drop a trial in flight.
            (Permit::Normal, _) => false,
        };
        if reopen {
            slot.state = CircuitState::Open;
            slot.opened_at = Some(now);
            slot.trial_in_flight = false;
            tracing::warn!(
                host = %key.host,
                runbook = %key.runbook,
                failures = slot.consecutive_failures,
                "Circuit opened"
            );
        }
    }

    /// Returns an unused permit, e.g. when the task was cancelled before an
    /// outcome was known.
    pub fn release(&self, key: &SafetyKey, permit: Permit) {
        if permit == Permit::Trial {
            let slot = self.slot(key);
            let mut slot = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            slot.trial_in_flight = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(&CircuitBreakerConfig {
            failure_threshold: 2,
            cooldown_secs: 600,
        })
    }

    #[test]
    fn opens_after_consecutive_failures() {
        let cb = breaker();
        let key = SafetyKey::new("web-01", "cache_drop");
        let t0 = Utc::now();

        cb.record_failure(&key, Permit::Normal, t0);
        assert_eq!(cb.state(&key, t0), CircuitState::Closed);
        cb.record_success(&key, Permit::Normal);
        cb.record_failure(&key, Permit::Normal, t0);
        assert_eq!(cb.state(&key, t0), CircuitState::Closed);
        cb.record_failure(&key, Permit::Normal, t0);
        assert_eq!(cb.state(&key, t0), CircuitState::Open);
        assert_eq!(cb.acquire(&key, t0 + Duration::minutes(5)), None);
        assert!(!cb.would_allow(&key, t0 + Duration::minutes(5)));
    }

    #[test]
    fn exactly_one_half_open_trial() {
        let cb = breaker();
        let key = SafetyKey::new("web-01", "cache_drop");
        let t0 = Utc::now();
        cb.record_failure(&key, Permit::Normal, t0);
        cb.record_failure(&key, Permit::Normal, t0);

        let later = t0 + Duration::minutes(11);
        assert_eq!(cb.state(&key, later), CircuitState::HalfOpen);
        assert_eq!(cb.acquire(&key, later), Some(Permit::Trial));
        assert_eq!(cb.acquire(&key, later), None);

        // Failed trial reopens for a full cooldown.
        cb.record_failure(&key, Permit::Trial, later);
        assert_eq!(cb.state(&key, later + Duration::minutes(5)), CircuitState::Open);

        let again = later + Duration::minutes(11);
        assert_eq!(cb.acquire(&key, again), Some(Permit::Trial));
        cb.record_success(&key, Permit::Trial);
        assert_eq!(cb.state(&key, again), CircuitState::Closed);
        assert_eq!(cb.acquire(&key, again), Some(Permit::Normal));
    }

    #[test]
    fn released_trial_can_be_retaken() {
        let cb = breaker();
        let key = SafetyKey::new("web-01", "cache_drop");
        let t0 = Utc::now();
        cb.record_failure(&key, Permit::Normal, t0);
        cb.record_failure(&key, Permit::Normal, t0);
        let later = t0 + Duration::minutes(11);
        let permit = cb.acquire(&key, later).unwrap();
        cb.release(&key, permit);
        assert_eq!(cb.acquire(&key, later), Some(Permit::Trial));
    }

    #[test]
    fn late_normal_success_does_not_close_open_circuit() {
        let cb = CircuitBreaker::new(&CircuitBreakerConfig {
            failure_threshold: 1,
            cooldown_secs: 600,
        });
        let key = SafetyKey::new("web-01", "cache_drop");
        let t0 = Utc::now();

        // Two runs admitted while closed.
        let a = cb.acquire(&key, t0).unwrap();
        let b = cb.acquire(&key, t0).unwrap();
        assert_eq!((a, b), (Permit::Normal, Permit::Normal));

        cb.record_failure(&key, a, t0);
        assert_eq!(cb.state(&key, t0), CircuitState::Open);
        cb.record_success(&key, b);
        assert_eq!(cb.state(&key, t0), CircuitState::Open);
        assert_eq!(cb.acquire(&key, t0 + Duration::minutes(5)), None);
    }

    #[test]
    fn late_normal_failure_keeps_trial_in_flight() {
        let cb = breaker();
        let key = SafetyKey::new("web-01", "cache_drop");
        let t0 = Utc::now();
        let stale = cb.acquire(&key, t0).unwrap();
        cb.record_failure(&key, Permit::Normal, t0);
        cb.record_failure(&key, Permit::Normal, t0);

        let later = t0 + Duration::minutes(11);
        assert_eq!(cb.acquire(&key, later), Some(Permit::Trial));
        cb.record_failure(&key, stale, later);
        assert_eq!(cb.state(&key, later), CircuitState::HalfOpen);
        assert_eq!(cb.acquire(&key, later), None);

        cb.record_success(&key, Permit::Trial);
        assert_eq!(cb.state(&key, later), CircuitState::Closed);
    }
}
