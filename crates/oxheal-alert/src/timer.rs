use chrono::{DateTime, Duration, Utc};

/// Per `(rule, target)` condition tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionTimer {
    BelowThreshold,
    /// The condition has held since `since` but not yet long enough.
    Pending { since: DateTime<Utc> },
    /// Firing. `clear_since` is when the condition last started being false.
    Firing { clear_since: Option<DateTime<Utc>> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// The condition has held for the full duration: open an alert.
    Fire,
    /// Still firing; counts as a repeat occurrence.
    Sustain,
    /// The condition has been false for the full duration.
    Resolve,
}

impl ConditionTimer {
    /// Feeds one observation. Any observation that breaks a pending or
    /// clearing streak restarts it.
    pub fn observe(
        &mut self,
        holds: bool,
        now: DateTime<Utc>,
        duration: Duration,
    ) -> Option<TimerEvent> {
        match (*self, holds) {
            (Self::BelowThreshold, true) => {
                // Zero duration fires on the first breaching sample.
                if duration <= Duration::zero() {
                    *self = Self::Firing { clear_since: None };
                    Some(TimerEvent::Fire)
                } else {
                    *self = Self::Pending { since: now };
                    None
                }
            }
            (Self::BelowThreshold, false) => None,
            (Self::Pending { since }, true) => {
                if now - since >= duration {
                    *self = Self::Firing { clear_since: None };
                    Some(TimerEvent::Fire)
                } else {
                    None
                }
            }
            (Self::Pending { .. }, false) => {
                *self = Self::BelowThreshold;
                None
            }
            (Self::Firing { .. }, true) => {
                *self = Self::Firing { clear_since: None };
                Some(TimerEvent::Sustain)
            }
            (Self::Firing { clear_since }, false) => {
                // First clear sample starts the clearing streak.
                let clear_since = clear_since.unwrap_or(now);
                if now - clear_since >= duration {
                    *self = Self::BelowThreshold;
                    Some(TimerEvent::Resolve)
                } else {
                    *self = Self::Firing {
                        clear_since: Some(clear_since),
                    };
                    None
                }
            }
        }
    }

    pub fn is_firing(&self) -> bool {
        matches!(self, Self::Firing { .. })
    }
}
