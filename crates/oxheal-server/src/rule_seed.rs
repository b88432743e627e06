use crate::config::RulesSeedFile;
use anyhow::Context;
use chrono::Utc;
use oxheal_common::rule::{AlertRule, RuleCondition};
use oxheal_common::types::{CompareOp, Severity};
use oxheal_storage::Store;
use std::collections::HashSet;
use std::path::Path;

/// Builtin rule definitions seeded on first startup.
struct RuleDef {
    name: &'static str,
    kind: DefKind,
    duration_secs: u64,
    severity: Severity,
    cooldown_secs: u64,
}

enum DefKind {
    Metric(&'static str, CompareOp, f64),
    DbMetric(&'static str, CompareOp, f64),
    LogKeyword(&'static str),
}

const DEFAULT_RULES: &[RuleDef] = &[
    // ---- Host ----
    RuleDef {
        name: "High CPU usage",
        kind: DefKind::Metric("cpu_percent", CompareOp::GreaterThan, 90.0),
        duration_secs: 300,
        severity: Severity::Critical,
        cooldown_secs: 600,
    },
    RuleDef {
        name: "High memory usage",
        kind: DefKind::Metric("memory_percent", CompareOp::GreaterThan, 90.0),
        duration_secs: 300,
        severity: Severity::Critical,
        cooldown_secs: 600,
    },
    RuleDef {
        name: "Disk nearly full",
        kind: DefKind::Metric("disk_used_percent", CompareOp::GreaterThan, 85.0),
        duration_secs: 0,
        severity: Severity::Warning,
        cooldown_secs: 1800,
    },
    // ---- Database ----
    RuleDef {
        name: "Database connections saturated",
        kind: DefKind::DbMetric("db_connections_percent", CompareOp::GreaterThan, 90.0),
        duration_secs: 120,
        severity: Severity::Critical,
        cooldown_secs: 600,
    },
    RuleDef {
        name: "Slow queries",
        kind: DefKind::DbMetric("db_slow_queries", CompareOp::GreaterThan, 50.0),
        duration_secs: 300,
        severity: Severity::Warning,
        cooldown_secs: 900,
    },
    // ---- Logs ----
    RuleDef {
        name: "Out of memory",
        kind: DefKind::LogKeyword(r"out of memory|oom-killer"),
        duration_secs: 600,
        severity: Severity::Critical,
        cooldown_secs: 300,
    },
];

impl RuleDef {
    fn condition(&self) -> RuleCondition {
        match self.kind {
            DefKind::Metric(metric, operator, threshold) => RuleCondition::Metric {
                metric: metric.to_string(),
                operator,
                threshold,
            },
            DefKind::DbMetric(metric, operator, threshold) => RuleCondition::DbMetric {
                metric: metric.to_string(),
                operator,
                threshold,
            },
            DefKind::LogKeyword(pattern) => RuleCondition::LogKeyword {
                pattern: pattern.to_string(),
                level: None,
                service: None,
            },
        }
    }
}

/// Seeds the builtin rules unless any of them is already present.
pub fn init_default_rules(store: &dyn Store) -> anyhow::Result<usize> {
    let existing: HashSet<String> = store
        .list_rules()
        .context("Failed to list alert rules")?
        .into_iter()
        .map(|r| r.name)
        .collect();
    // Any builtin present means a prior seed ran; user edits win.
    if DEFAULT_RULES.iter().any(|def| existing.contains(def.name)) {
        tracing::debug!(
            existing = existing.len(),
            "Builtin alert rules already exist, skipping seed initialization"
        );
        return Ok(0);
    }

    let now = Utc::now();
    let mut inserted = 0usize;
    for def in DEFAULT_RULES {
        let rule = AlertRule {
            id: oxheal_common::id::next_id(),
            name: def.name.to_string(),
            condition: def.condition(),
            duration_secs: def.duration_secs,
            severity: def.severity,
            cooldown_secs: def.cooldown_secs,
            silence: None,
            target_pattern: "*".to_string(),
            is_builtin: true,
            enabled: true,
            created_at: now,
            updated_at: now,
        };
        match store.insert_rule(&rule) {
            Ok(()) => {
                inserted += 1;
                tracing::info!(name = %def.name, rule_type = %rule.rule_type(), "Seeded alert rule");
            }
            Err(e) => {
                tracing::warn!(name = %def.name, error = %e, "Failed to seed alert rule");
            }
        }
    }

    tracing::info!(
        inserted,
        total = DEFAULT_RULES.len(),
        "Default alert rules initialized"
    );
    Ok(inserted)
}

/// Imports user rules from a JSON seed file, skipping names that already
/// exist. Returns `(created, skipped)`.
pub fn init_rules_from_seed(store: &dyn Store, seed_path: &Path) -> anyhow::Result<(u32, u32)> {
    let content = std::fs::read_to_string(seed_path)
        .with_context(|| format!("Failed to read seed file '{}'", seed_path.display()))?;
    let seed: RulesSeedFile = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse seed file '{}'", seed_path.display()))?;

    let mut existing_names: HashSet<String> = store
        .list_rules()
        .context("Failed to list alert rules")?
        .into_iter()
        .map(|r| r.name)
        .collect();

    let mut created = 0u32;
    let mut skipped = 0u32;
    for def in seed.rules {
        if existing_names.contains(&def.name) {
            tracing::warn!(name = %def.name, "Alert rule already exists, skipping");
            skipped += 1;
            continue;
        }
        let name = def.name.clone();
        let rule = def.into_rule(oxheal_common::id::next_id(), Utc::now());
        match store.insert_rule(&rule) {
            Ok(()) => {
                tracing::info!(name = %name, id = %rule.id, "Alert rule created");
                existing_names.insert(name);
                created += 1;
            }
            Err(e) => {
                tracing::error!(name = %name, error = %e, "Failed to create alert rule");
            }
        }
    }

    tracing::info!(created, skipped, "init-rules completed");
    Ok((created, skipped))
}
