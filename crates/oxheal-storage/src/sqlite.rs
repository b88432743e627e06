use crate::{
    absorb_occurrence, acknowledge_alert, ensure_deletable, merge_rule_update, new_dedup_record,
    not_found, stale_transition, AlertStore, EscalationStep, FireOutcome, RemediationStore, Result,
    RuleStore, StorageError,
};
use chrono::{DateTime, Utc};
use oxheal_common::alert::{Alert, AlertStatus, DedupRecord, EscalationPolicy};
use oxheal_common::remediation::{AuditRecord, RemediationStatus, RemediationTask};
use oxheal_common::rule::AlertRule;
use oxheal_common::types::Severity;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

// Entities are stored as a JSON `body` next to the columns that are
// filtered or constrained on. The partial unique indexes enforce one open
// alert per (rule, target) and one active task per alert.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS alerts (
    id TEXT PRIMARY KEY,
    rule_id TEXT NOT NULL,
    target_id TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    status TEXT NOT NULL,
    triggered_at INTEGER NOT NULL,
    body TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_alerts_open
    ON alerts(rule_id, target_id) WHERE status != 'resolved';
CREATE INDEX IF NOT EXISTS idx_alerts_status_time ON alerts(status, triggered_at);

CREATE TABLE IF NOT EXISTS dedup_records (
    fingerprint TEXT PRIMARY KEY,
    alert_id TEXT NOT NULL UNIQUE,
    rule_id TEXT NOT NULL,
    target_id TEXT NOT NULL,
    first_seen INTEGER NOT NULL,
    last_seen INTEGER NOT NULL,
    occurrence_count INTEGER NOT NULL,
    last_notified_at INTEGER
);

CREATE TABLE IF NOT EXISTS alert_rules (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    is_builtin INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    body TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS escalation_policies (
    rule_id TEXT PRIMARY KEY REFERENCES alert_rules(id) ON DELETE CASCADE,
    body TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS remediation_tasks (
    id TEXT PRIMARY KEY,
    alert_id TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    body TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_active
    ON remediation_tasks(alert_id) WHERE status NOT IN ('success', 'failed', 'rejected');
CREATE INDEX IF NOT EXISTS idx_tasks_alert ON remediation_tasks(alert_id, created_at);

CREATE TABLE IF NOT EXISTS remediation_audit (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    task_id TEXT NOT NULL,
    alert_id TEXT NOT NULL,
    to_status TEXT NOT NULL,
    recorded_at INTEGER NOT NULL,
    body TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_task ON remediation_audit(task_id, seq);
";

/// Single-file SQLite store in WAL mode.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::Other(format!("create {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)?;
        // WAL lets API reads proceed while the evaluator writes.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = Self::init(conn)?;
        tracing::info!(path = %path.display(), "Opened oxheal database");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        // Foreign keys are off per connection by default in SQLite.
        conn.execute_batch("PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the connection, recovering from a poisoned Mutex if necessary.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn encode<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T> {
    Ok(serde_json::from_str(body)?)
}

fn millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    // Out-of-range values only come from a hand-edited file.
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn query_bodies<T: DeserializeOwned>(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<T>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(params, |row| row.get::<_, String>(0))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(decode(&row?)?);
    }
    Ok(out)
}

fn query_body<T: DeserializeOwned>(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Option<T>> {
    let body: Option<String> = conn
        .query_row(sql, params, |row| row.get(0))
        .optional()?;
    body.map(|b| decode(&b)).transpose()
}

fn load_alert(conn: &Connection, alert_id: &str) -> Result<Option<Alert>> {
    query_body(conn, "SELECT body FROM alerts WHERE id = ?1", params![alert_id])
}

fn require_alert(conn: &Connection, alert_id: &str) -> Result<Alert> {
    load_alert(conn, alert_id)?.ok_or_else(|| not_found("alert", alert_id))
}

fn insert_alert(conn: &Connection, alert: &Alert) -> Result<()> {
    conn.execute(
        "INSERT INTO alerts (id, rule_id, target_id, fingerprint, status, triggered_at, body)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            &alert.id,
            &alert.rule_id,
            &alert.target_id,
            &alert.fingerprint,
            alert.status.as_str(),
            millis(alert.triggered_at),
            encode(alert)?,
        ],
    )?;
    Ok(())
}

fn save_alert(conn: &Connection, alert: &Alert) -> Result<()> {
    conn.execute(
        "UPDATE alerts SET status = ?2, body = ?3 WHERE id = ?1",
        params![&alert.id, alert.status.as_str(), encode(alert)?],
    )?;
    Ok(())
}

fn load_dedup(conn: &Connection, fingerprint: &str) -> Result<Option<DedupRecord>> {
    let record = conn
        .query_row(
            "SELECT fingerprint, alert_id, rule_id, target_id, first_seen, last_seen,
                    occurrence_count, last_notified_at
             FROM dedup_records WHERE fingerprint = ?1",
            params![fingerprint],
            |row| {
                Ok(DedupRecord {
                    fingerprint: row.get(0)?,
                    alert_id: row.get(1)?,
                    rule_id: row.get(2)?,
                    target_id: row.get(3)?,
                    first_seen: from_millis(row.get(4)?),
                    last_seen: from_millis(row.get(5)?),
                    // SQLite has no unsigned integers.
                    occurrence_count: row.get::<_, i64>(6)?.max(0) as u64,
                    last_notified_at: row.get::<_, Option<i64>>(7)?.map(from_millis),
                })
            },
        )
        .optional()?;
    Ok(record)
}

fn save_dedup(conn: &Connection, record: &DedupRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO dedup_records
            (fingerprint, alert_id, rule_id, target_id, first_seen, last_seen,
             occurrence_count, last_notified_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         // first_seen and the owning alert never change once written.
         ON CONFLICT(fingerprint) DO UPDATE SET
            last_seen = excluded.last_seen,
            occurrence_count = excluded.occurrence_count,
            last_notified_at = excluded.last_notified_at",
        params![
            &record.fingerprint,
            &record.alert_id,
            &record.rule_id,
            &record.target_id,
            millis(record.first_seen),
            millis(record.last_seen),
            record.occurrence_count as i64,
            record.last_notified_at.map(millis),
        ],
    )?;
    Ok(())
}

fn load_task(conn: &Connection, task_id: &str) -> Result<Option<RemediationTask>> {
    query_body(
        conn,
        "SELECT body FROM remediation_tasks WHERE id = ?1",
        params![task_id],
    )
}

fn append_audit(conn: &Connection, audit: &AuditRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO remediation_audit (id, task_id, alert_id, to_status, recorded_at, body)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            &audit.id,
            &audit.task_id,
            &audit.alert_id,
            audit.to_status.as_str(),
            millis(audit.recorded_at),
            encode(audit)?,
        ],
    )?;
    Ok(())
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

impl AlertStore for SqliteStore {
    fn upsert_firing(&self, candidate: Alert) -> Result<FireOutcome> {
        let mut conn = self.lock();
        // IMMEDIATE takes the write lock before the read, so two firings
        // cannot both insert.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let open: Option<Alert> = query_body(
            &tx,
            "SELECT body FROM alerts
             WHERE rule_id = ?1 AND target_id = ?2 AND status != 'resolved'",
            params![&candidate.rule_id, &candidate.target_id],
        )?;

        let outcome = match open {
            Some(mut alert) => {
                let mut record = load_dedup(&tx, &alert.fingerprint)?
                    .unwrap_or_else(|| new_dedup_record(&alert));
                absorb_occurrence(&mut alert, &mut record, &candidate);
                save_alert(&tx, &alert)?;
                save_dedup(&tx, &record)?;
                FireOutcome {
                    alert,
                    record,
                    created: false,
                }
            }
            None => {
                let record = new_dedup_record(&candidate);
                insert_alert(&tx, &candidate)?;
                // A stale record for this fingerprint belongs to an alert that
                // was resolved without cleanup; replace it.
                tx.execute(
                    "DELETE FROM dedup_records WHERE fingerprint = ?1",
                    params![&record.fingerprint],
                )?;
                save_dedup(&tx, &record)?;
                FireOutcome {
                    alert: candidate,
                    record,
                    created: true,
                }
            }
        };
        tx.commit()?;
        Ok(outcome)
    }

    fn resolve(&self, alert_id: &str, at: DateTime<Utc>) -> Result<Option<Alert>> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut alert = require_alert(&tx, alert_id)?;
        if !alert.status.is_open() {
            return Ok(None);
        }
        // Resolution clears the dedup key; a new firing starts a new alert.
        alert.status = AlertStatus::Resolved;
        alert.resolved_at = Some(at);
        alert.next_escalation_at = None;
        alert.updated_at = at;
        save_alert(&tx, &alert)?;
        tx.execute(
            "DELETE FROM dedup_records WHERE alert_id = ?1",
            params![alert_id],
        )?;
        tx.commit()?;
        Ok(Some(alert))
    }

    fn acknowledge(&self, alert_id: &str, user: &str, at: DateTime<Utc>) -> Result<Alert> {
        let conn = self.lock();
        let mut alert = require_alert(&conn, alert_id)?;
        acknowledge_alert(&mut alert, user, at)?;
        save_alert(&conn, &alert)?;
        Ok(alert)
    }

    fn escalate(&self, alert_id: &str, step: &EscalationStep) -> Result<Option<Alert>> {
        let conn = self.lock();
        let mut alert = require_alert(&conn, alert_id)?;
        // Someone acknowledged or escalated in between.
        if alert.status != AlertStatus::Firing || alert.escalation_level != step.expected_level {
            return Ok(None);
        }
        alert.escalation_level += 1;
        alert.severity = step.severity;
        alert.last_escalated_at = Some(step.at);
        alert.next_escalation_at = step.next_escalation_at;
        alert.updated_at = step.at;
        save_alert(&conn, &alert)?;
        Ok(Some(alert))
    }

    fn reset_escalation(
        &self,
        alert_id: &str,
        severity: Severity,
        next_escalation_at: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    ) -> Result<Alert> {
        let conn = self.lock();
        let mut alert = require_alert(&conn, alert_id)?;
        if !alert.status.is_open() {
            return Err(StorageError::InvalidState {
                entity: "alert",
                id: alert_id.to_string(),
                reason: "alert is already resolved".to_string(),
            });
        }
        alert.escalation_level = 0;
        alert.severity = severity;
        // Delays count from the reset, not from the original trigger.
        alert.last_escalated_at = Some(at);
        alert.next_escalation_at = next_escalation_at;
        alert.updated_at = at;
        save_alert(&conn, &alert)?;
        Ok(alert)
    }

    fn mark_notified(&self, fingerprint: &str, at: DateTime<Utc>) -> Result<()> {
        self.lock().execute(
            "UPDATE dedup_records SET last_notified_at = ?2 WHERE fingerprint = ?1",
            params![fingerprint, millis(at)],
        )?;
        Ok(())
    }

    fn get_alert(&self, alert_id: &str) -> Result<Option<Alert>> {
        load_alert(&self.lock(), alert_id)
    }

    fn find_open(&self, rule_id: &str, target_id: &str) -> Result<Option<Alert>> {
        query_body(
            &self.lock(),
            "SELECT body FROM alerts
             WHERE rule_id = ?1 AND target_id = ?2 AND status != 'resolved'",
            params![rule_id, target_id],
        )
    }

    fn dedup_record(&self, fingerprint: &str) -> Result<Option<DedupRecord>> {
        load_dedup(&self.lock(), fingerprint)
    }

    fn list_alerts(&self, status: Option<AlertStatus>, limit: usize) -> Result<Vec<Alert>> {
        // usize::MAX means unbounded.
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let conn = self.lock();
        match status {
            Some(status) => query_bodies(
                &conn,
                "SELECT body FROM alerts WHERE status = ?1 ORDER BY triggered_at DESC LIMIT ?2",
                params![status.as_str(), limit],
            ),
            None => query_bodies(
                &conn,
                "SELECT body FROM alerts ORDER BY triggered_at DESC LIMIT ?1",
                params![limit],
            ),
        }
    }
}

impl RemediationStore for SqliteStore {
    fn create_task_if_idle(&self, task: &RemediationTask, audit: &AuditRecord) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let active: Option<String> = tx
            .query_row(
                "SELECT id FROM remediation_tasks
                 WHERE alert_id = ?1 AND status NOT IN ('success', 'failed', 'rejected')",
                params![&task.alert_id],
                |row| row.get(0),
            )
            .optional()?;
        // Checked explicitly for a useful error; the partial index is the real guard.
        if let Some(task_id) = active {
            return Err(StorageError::ActiveTask {
                alert_id: task.alert_id.clone(),
                task_id,
            });
        }
        tx.execute(
            "INSERT INTO remediation_tasks (id, alert_id, status, created_at, body)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &task.id,
                &task.alert_id,
                task.status.as_str(),
                millis(task.created_at),
                encode(task)?,
            ],
        )
        .map_err(|e| {
            // Lost a race with another writer.
            if is_unique_violation(&e) {
                StorageError::ActiveTask {
                    alert_id: task.alert_id.clone(),
                    task_id: String::new(),
                }
            } else {
                e.into()
            }
        })?;
        append_audit(&tx, audit)?;
        tx.commit()?;
        Ok(())
    }

    fn record_transition(&self, task: &RemediationTask, audit: &AuditRecord) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let body = encode(task)?;
        let changed = match audit.from_status {
            // Compare-and-set on the previous status.
            Some(from) => tx.execute(
                "UPDATE remediation_tasks SET status = ?2, body = ?3 WHERE id = ?1 AND status = ?4",
                params![&task.id, task.status.as_str(), body, from.as_str()],
            )?,
            None => tx.execute(
                "UPDATE remediation_tasks SET status = ?2, body = ?3 WHERE id = ?1",
                params![&task.id, task.status.as_str(), body],
            )?,
        };
        // Distinguish a vanished task from a stale one.
        if changed == 0 {
            let current: Option<String> = tx
                .query_row(
                    "SELECT status FROM remediation_tasks WHERE id = ?1",
                    params![&task.id],
                    |row| row.get(0),
                )
                .optional()?;
            return Err(match current {
                None => not_found("remediation_task", &task.id),
                Some(status) => stale_transition(&task.id, &status),
            });
        }
        append_audit(&tx, audit)?;
        tx.commit()?;
        Ok(())
    }

    fn get_task(&self, task_id: &str) -> Result<Option<RemediationTask>> {
        load_task(&self.lock(), task_id)
    }

    fn active_task_for_alert(&self, alert_id: &str) -> Result<Option<RemediationTask>> {
        query_body(
            &self.lock(),
            "SELECT body FROM remediation_tasks
             WHERE alert_id = ?1 AND status NOT IN ('success', 'failed', 'rejected')",
            params![alert_id],
        )
    }

    fn tasks_for_alert(&self, alert_id: &str) -> Result<Vec<RemediationTask>> {
        query_bodies(
            &self.lock(),
            "SELECT body FROM remediation_tasks WHERE alert_id = ?1 ORDER BY created_at DESC",
            params![alert_id],
        )
    }

    fn list_tasks(
        &self,
        status: Option<RemediationStatus>,
        limit: usize,
    ) -> Result<Vec<RemediationTask>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let conn = self.lock();
        match status {
            Some(status) => query_bodies(
                &conn,
                "SELECT body FROM remediation_tasks WHERE status = ?1
                 ORDER BY created_at DESC LIMIT ?2",
                params![status.as_str(), limit],
            ),
            None => query_bodies(
                &conn,
                "SELECT body FROM remediation_tasks ORDER BY created_at DESC LIMIT ?1",
                params![limit],
            ),
        }
    }

    fn audit_trail(&self, task_id: &str) -> Result<Vec<AuditRecord>> {
        query_bodies(
            &self.lock(),
            "SELECT body FROM remediation_audit WHERE task_id = ?1 ORDER BY seq ASC",
            params![task_id],
        )
    }
}

impl RuleStore for SqliteStore {
    fn list_rules(&self) -> Result<Vec<AlertRule>> {
        query_bodies(
            &self.lock(),
            "SELECT body FROM alert_rules ORDER BY created_at ASC, id ASC",
            [],
        )
    }

    fn get_rule(&self, rule_id: &str) -> Result<Option<AlertRule>> {
        query_body(
            &self.lock(),
            "SELECT body FROM alert_rules WHERE id = ?1",
            params![rule_id],
        )
    }

    fn get_rule_by_name(&self, name: &str) -> Result<Option<AlertRule>> {
        query_body(
            &self.lock(),
            "SELECT body FROM alert_rules WHERE name = ?1",
            params![name],
        )
    }

    fn insert_rule(&self, rule: &AlertRule) -> Result<()> {
        rule.validate()?;
        self.lock()
            .execute(
                "INSERT INTO alert_rules (id, name, is_builtin, created_at, body)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    &rule.id,
                    &rule.name,
                    rule.is_builtin,
                    millis(rule.created_at),
                    encode(rule)?,
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StorageError::Duplicate {
                        entity: "alert_rule",
                        name: rule.name.clone(),
                    }
                } else {
                    e.into()
                }
            })?;
        Ok(())
    }

    fn update_rule(&self, rule: &AlertRule) -> Result<AlertRule> {
        let conn = self.lock();
        let existing: AlertRule = query_body(
            &conn,
            "SELECT body FROM alert_rules WHERE id = ?1",
            params![&rule.id],
        )?
        .ok_or_else(|| not_found("alert_rule", &rule.id))?;
        // Keeps built-in flags and creation time, then validates.
        let merged = merge_rule_update(&existing, rule)?;
        conn.execute(
            "UPDATE alert_rules SET name = ?2, body = ?3 WHERE id = ?1",
            params![&merged.id, &merged.name, encode(&merged)?],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                StorageError::Duplicate {
                    entity: "alert_rule",
                    name: merged.name.clone(),
                }
            } else {
                e.into()
            }
        })?;
        Ok(merged)
    }

    fn delete_rule(&self, rule_id: &str) -> Result<()> {
        let conn = self.lock();
        let rule: AlertRule = query_body(
            &conn,
            "SELECT body FROM alert_rules WHERE id = ?1",
            params![rule_id],
        )?
        .ok_or_else(|| not_found("alert_rule", rule_id))?;
        // Built-in rules can be disabled, never deleted.
        ensure_deletable(&rule)?;
        conn.execute("DELETE FROM alert_rules WHERE id = ?1", params![rule_id])?;
        Ok(())
    }

    fn put_policy(&self, policy: &EscalationPolicy) -> Result<()> {
        policy.validate()?;
        let conn = self.lock();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM alert_rules WHERE id = ?1)",
            params![&policy.rule_id],
            |row| row.get(0),
        )?;
        // Checked here for a 404 instead of a foreign key failure.
        if !exists {
            return Err(not_found("alert_rule", &policy.rule_id));
        }
        conn.execute(
            "INSERT INTO escalation_policies (rule_id, body) VALUES (?1, ?2)
             ON CONFLICT(rule_id) DO UPDATE SET body = excluded.body",
            params![&policy.rule_id, encode(policy)?],
        )?;
        Ok(())
    }

    fn get_policy(&self, rule_id: &str) -> Result<Option<EscalationPolicy>> {
        query_body(
            &self.lock(),
            "SELECT body FROM escalation_policies WHERE rule_id = ?1",
            params![rule_id],
        )
    }

    fn delete_policy(&self, rule_id: &str) -> Result<bool> {
        let changed = self.lock().execute(
            "DELETE FROM escalation_policies WHERE rule_id = ?1",
            params![rule_id],
        )?;
        Ok(changed > 0)
    }

    fn list_policies(&self) -> Result<Vec<EscalationPolicy>> {
        query_bodies(
            &self.lock(),
            "SELECT body FROM escalation_policies ORDER BY rule_id ASC",
            [],
        )
    }
}
