use super::SafetyKey;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Executions allowed per `(host, runbook)` in a sliding hour. 0 disables the limit.
    #[serde(default = "default_max_per_hour")]
    pub max_per_hour: u32,
}

fn default_max_per_hour() -> u32 {
    3
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_hour: default_max_per_hour(),
        }
    }
}

type Bucket = Arc<Mutex<VecDeque<DateTime<Utc>>>>;

/// Sliding-window execution counter, one lock per `(host, runbook)`.
pub struct RateLimiter {
    max_per_window: u32,
    window: Duration,
    buckets: RwLock<HashMap<SafetyKey, Bucket>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self::with_window(config.max_per_hour, Duration::hours(1))
    }

    pub fn with_window(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    fn bucket(&self, key: &SafetyKey) -> Bucket {
        // Fast path under the read lock; most keys already exist.
        if let Some(bucket) = self
            .buckets
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
        {
            return Arc::clone(bucket);
        }
        let mut buckets = self
            .buckets
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(buckets.entry(key.clone()).or_default())
    }

    fn evict(&self, stamps: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>) {
        while stamps.front().is_some_and(|t| now - *t >= self.window) {
            stamps.pop_front();
        }
    }

    /// Executions still allowed for `key` in the current window.
    pub fn remaining(&self, key: &SafetyKey, now: DateTime<Utc>) -> u32 {
        if self.max_per_window == 0 {
            return u32::MAX;
        }
        let bucket = self.bucket(key);
        let mut stamps = bucket.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.evict(&mut stamps, now);
        self.max_per_window
            .saturating_sub(stamps.len() as u32)
    }

    pub fn would_allow(&self, key: &SafetyKey, now: DateTime<Utc>) -> bool {
        self.remaining(key, now) > 0
    }

    /// Counts one execution if the window has room.
    pub fn try_acquire(&self, key: &SafetyKey, now: DateTime<Utc>) -> bool {
        if self.max_per_window == 0 {
            return true;
        }
        let bucket = self.bucket(key);
        let mut stamps = bucket.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.evict(&mut stamps, now);
        if stamps.len() as u32 >= self.max_per_window {
            return false;
        }
        // Counted at admission, so cancelled runs still use a slot.
        stamps.push_back(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_the_n_plus_first_within_the_window() {
        let limiter = RateLimiter::new(&RateLimitConfig { max_per_hour: 2 });
        let key = SafetyKey::new("web-01", "service_restart");
        let other = SafetyKey::new("web-02", "service_restart");
        let t0 = Utc::now();

        assert!(limiter.try_acquire(&key, t0));
        assert!(limiter.try_acquire(&key, t0 + Duration::minutes(10)));
        assert!(!limiter.would_allow(&key, t0 + Duration::minutes(20)));
        assert!(!limiter.try_acquire(&key, t0 + Duration::minutes(20)));
        // Keys are independent.
        assert!(limiter.try_acquire(&other, t0 + Duration::minutes(20)));
        // The first stamp leaves the window after an hour.
        assert!(limiter.try_acquire(&key, t0 + Duration::minutes(61)));
        assert_eq!(limiter.remaining(&key, t0 + Duration::minutes(61)), 0);
    }

    #[test]
    fn zero_disables_limit() {
        let limiter = RateLimiter::new(&RateLimitConfig { max_per_hour: 0 });
        let key = SafetyKey::new("h", "r");
        for _ in 0..100 {
            assert!(limiter.try_acquire(&key, Utc::now()));
        }
    }
}
