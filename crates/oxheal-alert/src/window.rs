use chrono::{DateTime, Duration, Utc};
use oxheal_common::types::MetricSample;
use std::collections::VecDeque;

/// Time-bounded buffer of samples for one `(target, metric)` series.
pub struct SlidingWindow {
    span: Duration,
    data: VecDeque<MetricSample>,
}

impl SlidingWindow {
    pub fn new(window_secs: u64) -> Self {
        Self {
            span: oxheal_common::rule::window(window_secs),
            data: VecDeque::new(),
        }
    }

    /// Inserts keeping timestamp order; late samples are placed, not appended.
    pub fn push(&mut self, sample: MetricSample) {
        let at = self
            .data
            .iter()
            .rposition(|s| s.timestamp <= sample.timestamp)
            .map_or(0, |i| i + 1);
        self.data.insert(at, sample);
        if let Some(newest) = self.data.back().map(|s| s.timestamp) {
            self.evict(newest);
        }
    }

    pub fn evict(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.span;
        while let Some(front) = self.data.front() {
            if front.timestamp < cutoff {
                self.data.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn latest(&self) -> Option<&MetricSample> {
        self.data.back()
    }

    /// Samples not older than `since`, oldest first.
    pub fn since(&self, since: DateTime<Utc>) -> Vec<MetricSample> {
        self.data
            .iter()
            .filter(|s| s.timestamp >= since)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
