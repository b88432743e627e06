use crate::dedup::{DedupOutcome, Deduplicator};
use crate::source::{MetricSource, SourceError};
use crate::timer::{ConditionTimer, TimerEvent};
use chrono::{DateTime, Utc};
use oxheal_common::alert::{AlertOccurrence, OccurrenceKind};
use oxheal_common::rule::{AlertRule, LogMatcher, RuleCondition};
use oxheal_common::types::LogLine;
use oxheal_storage::Store;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

type TimerKey = (String, String);

/// Counts from one evaluation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub evaluated: usize,
    pub opened: usize,
    pub repeated: usize,
    pub resolved: usize,
    pub skipped: usize,
}

impl TickReport {
    fn absorb(&mut self, outcome: &DedupOutcome) {
        match outcome {
            DedupOutcome::Opened { .. } => self.opened += 1,
            DedupOutcome::Repeated { .. } => self.repeated += 1,
            DedupOutcome::Resolved { .. } => self.resolved += 1,
            DedupOutcome::Ignored => {}
        }
    }
}

/// Samples metric and db-metric sources against enabled rules on a fixed
/// tick and matches ingested log lines as they arrive.
pub struct RuleEvaluator {
    store: Arc<dyn Store>,
    metrics: Arc<dyn MetricSource>,
    db_metrics: Arc<dyn MetricSource>,
    dedup: Arc<Deduplicator>,
    source_timeout: std::time::Duration,
    timers: Mutex<HashMap<TimerKey, ConditionTimer>>,
    log_rules: RwLock<Arc<Vec<LogMatcher>>>,
}

impl RuleEvaluator {
    pub fn new(
        store: Arc<dyn Store>,
        metrics: Arc<dyn MetricSource>,
        db_metrics: Arc<dyn MetricSource>,
        dedup: Arc<Deduplicator>,
        source_timeout: std::time::Duration,
    ) -> Self {
        Self {
            store,
            metrics,
            db_metrics,
            dedup,
            source_timeout,
            timers: Mutex::new(HashMap::new()),
            log_rules: RwLock::new(Arc::new(Vec::new())),
        }
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<TimerKey, ConditionTimer>> {
        self.timers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reloads the rule cache used for log matching. Keyword patterns are
    /// compiled here, not per ingested line.
    pub fn refresh_rules(&self) -> oxheal_storage::Result<Vec<AlertRule>> {
        let rules = self.store.enabled_rules()?;
        let mut matchers = Vec::new();
        for rule in &rules {
            match LogMatcher::new(rule.clone()) {
                Ok(Some(matcher)) => matchers.push(matcher),
                Ok(None) => {}
                // Validated on write; only rows from older versions get here.
                Err(e) => tracing::warn!(rule_id = %rule.id, error = %e, "Skipping log rule"),
            }
        }
        *self
            .log_rules
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(matchers);
        Ok(rules)
    }

    /// One evaluation pass. Source failures skip the affected rule or
    /// target for this tick without touching its timer.
    pub async fn tick(&self, now: DateTime<Utc>) -> oxheal_storage::Result<TickReport> {
        let rules = self.refresh_rules()?;
        let mut report = TickReport::default();
        let mut live: HashSet<TimerKey> = HashSet::new();

        for rule in &rules {
            match &rule.condition {
                RuleCondition::Metric { .. } => {
                    self.evaluate_threshold(rule, self.metrics.as_ref(), now, &mut report, &mut live)
                        .await?;
                }
                RuleCondition::DbMetric { .. } => {
                    self.evaluate_threshold(
                        rule,
                        self.db_metrics.as_ref(),
                        now,
                        &mut report,
                        &mut live,
                    )
                    .await?;
                }
                RuleCondition::LogKeyword { .. } => {
                    self.resolve_quiet_log_alerts(rule, now, &mut report)?;
                }
            }
        }

        // Timers of disabled or deleted rules would otherwise linger forever.
        self.timers().retain(|key, _| live.contains(key));
        Ok(report)
    }

    async fn evaluate_threshold(
        &self,
        rule: &AlertRule,
        source: &dyn MetricSource,
        now: DateTime<Utc>,
        report: &mut TickReport,
        live: &mut HashSet<TimerKey>,
    ) -> oxheal_storage::Result<()> {
        let Some((metric, operator, threshold)) = rule.condition.threshold() else {
            return Ok(());
        };

        let targets = match self.with_timeout(source.name(), source.targets()).await {
            Ok(targets) => targets,
            Err(e) => {
                tracing::warn!(rule_id = %rule.id, error = %e, "Skipping rule this tick");
                report.skipped += 1;
                // Keep timers of this rule; nothing was observed.
                let timers = self.timers();
                live.extend(timers.keys().filter(|(r, _)| r == &rule.id).cloned());
                return Ok(());
            }
        };

        let duration = rule.duration();
        for target in targets.iter().filter(|t| rule.applies_to(t)) {
            let key = (rule.id.clone(), target.clone());
            live.insert(key.clone());

            let sample = match self
                .with_timeout(source.name(), source.latest_value(target, metric))
                .await
            {
                Ok(Some(sample)) => sample,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(
                        rule_id = %rule.id,
                        target_id = %target,
                        error = %e,
                        "Source error, target skipped"
                    );
                    report.skipped += 1;
                    continue;
                }
            };
            report.evaluated += 1;

            // Timer state lives here, the alert row only tracks what fired.
            let holds = operator.check(sample.value, threshold);
            let event = {
                let seeded = self.seed_timer(&key)?;
                let mut timers = self.timers();
                timers
                    .entry(key)
                    .or_insert(seeded)
                    .observe(holds, now, duration)
            };
            // Sustain refreshes last_seen so dedup and escalation see a live alert.
            let kind = match event {
                Some(TimerEvent::Fire | TimerEvent::Sustain) => OccurrenceKind::Fire,
                Some(TimerEvent::Resolve) => OccurrenceKind::Resolve,
                None => continue,
            };
            let occurrence = AlertOccurrence {
                rule_id: rule.id.clone(),
                target_id: target.clone(),
                kind,
                value: Some(sample.value),
                log_line: None,
                observed_at: now,
            };
            let outcome = self.dedup.record(rule, &occurrence)?;
            report.absorb(&outcome);
        }
        Ok(())
    }

    /// Initial timer for a key seen for the first time. An alert left open
    /// by a previous run starts out firing so that it can still resolve.
    fn seed_timer(&self, key: &TimerKey) -> oxheal_storage::Result<ConditionTimer> {
        if self.timers().contains_key(key) {
            return Ok(ConditionTimer::BelowThreshold);
        }
        Ok(match self.store.find_open(&key.0, &key.1)? {
            Some(_) => ConditionTimer::Firing { clear_since: None },
            None => ConditionTimer::BelowThreshold,
        })
    }

    fn resolve_quiet_log_alerts(
        &self,
        rule: &AlertRule,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> oxheal_storage::Result<()> {
        // Without a quiet period a log alert stays open until resolved by hand.
        if rule.duration_secs == 0 {
            return Ok(());
        }
        let quiet = rule.duration();
        for alert in self.store.list_open()? {
            if alert.rule_id != rule.id {
                continue;
            }
            let last_seen = self
                .store
                .dedup_record(&alert.fingerprint)?
                // No record means an unclean resolve; fall back to the row.
                .map_or(alert.updated_at, |r| r.last_seen);
            if now - last_seen >= quiet {
                let outcome = self.dedup.resolve(rule, &alert.id, now)?;
                report.absorb(&outcome);
            }
        }
        Ok(())
    }

    /// Matches one ingested log line against the cached log rules.
    pub fn handle_log_line(
        &self,
        line: &LogLine,
        now: DateTime<Utc>,
    ) -> oxheal_storage::Result<Vec<DedupOutcome>> {
        // Snapshot so a concurrent refresh never waits on dedup writes.
        let matchers = Arc::clone(
            &self
                .log_rules
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        let mut outcomes = Vec::new();
        for rule in matchers.iter().filter(|m| m.matches(line)).map(|m| &m.rule) {
            let occurrence = AlertOccurrence {
                rule_id: rule.id.clone(),
                target_id: line.target_id.clone(),
                kind: OccurrenceKind::Fire,
                value: None,
                log_line: Some(line.message.clone()),
                observed_at: now,
            };
            outcomes.push(self.dedup.record(rule, &occurrence)?);
        }
        Ok(outcomes)
    }

    async fn with_timeout<T>(
        &self,
        source_name: &'static str,
        fut: impl std::future::Future<Output = Result<T, SourceError>>,
    ) -> Result<T, SourceError> {
        match tokio::time::timeout(self.source_timeout, fut).await {
            Ok(result) => result,
            // A hung source costs one tick, not the loop.
            Err(_) => Err(SourceError::Timeout {
                source_name,
                timeout_ms: self.source_timeout.as_millis() as u64,
            }),
        }
    }
}
