use crate::memory::MemoryStore;
use crate::sqlite::SqliteStore;
use crate::{AlertStore, EscalationStep, Store, StorageError};
use chrono::{Duration, Utc};
use oxheal_common::alert::{Alert, AlertStatus, EscalationLevel, EscalationPolicy};
use oxheal_common::remediation::{
    Actor, AuditRecord, RemediationStatus, RemediationTask, TriggeredBy,
};
use oxheal_common::rule::{AlertRule, RuleCondition};
use oxheal_common::types::{CompareOp, Severity};
use oxheal_common::ValidationError;
use tempfile::TempDir;

fn sqlite() -> (TempDir, SqliteStore) {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(&dir.path().join("oxheal.db")).unwrap();
    (dir, store)
}

/// Runs `check` against both implementations.
fn each_store(check: impl Fn(&dyn Store)) {
    check(&MemoryStore::new());
    let (_dir, store) = sqlite();
    check(&store);
}

fn rule(id: &str, name: &str) -> AlertRule {
    let now = Utc::now();
    AlertRule {
        id: id.into(),
        name: name.into(),
        condition: RuleCondition::Metric {
            metric: "cpu_percent".into(),
            operator: CompareOp::GreaterThan,
            threshold: 90.0,
        },
        duration_secs: 300,
        severity: Severity::Critical,
        cooldown_secs: 300,
        silence: None,
        target_pattern: "*".into(),
        is_builtin: false,
        enabled: true,
        created_at: now,
        updated_at: now,
    }
}

fn candidate(rule_id: &str, target: &str, value: f64) -> Alert {
    let now = Utc::now();
    Alert {
        id: oxheal_common::id::next_id(),
        rule_id: rule_id.into(),
        rule_name: "cpu".into(),
        target_id: target.into(),
        fingerprint: oxheal_common::fingerprint::fingerprint(rule_id, target, Severity::Critical),
        status: AlertStatus::Firing,
        severity: Severity::Critical,
        message: format!("cpu_percent = {value}"),
        value: Some(value),
        escalation_level: 0,
        last_escalated_at: None,
        next_escalation_at: None,
        triggered_at: now,
        resolved_at: None,
        acknowledged_at: None,
        acknowledged_by: None,
        updated_at: now,
    }
}

fn audit(task: &RemediationTask, from: Option<RemediationStatus>) -> AuditRecord {
    AuditRecord {
        id: oxheal_common::id::next_id(),
        task_id: task.id.clone(),
        alert_id: task.alert_id.clone(),
        from_status: from,
        to_status: task.status,
        actor: Actor::System,
        comment: None,
        payload: serde_json::to_value(task).unwrap(),
        recorded_at: Utc::now(),
    }
}

#[test]
fn repeated_fire_keeps_one_alert() {
    each_store(|store| {
        let first = store.upsert_firing(candidate("r1", "web-01", 95.0)).unwrap();
        assert!(first.created);
        for v in 0..9 {
            let again = store
                .upsert_firing(candidate("r1", "web-01", 96.0 + v as f64))
                .unwrap();
            assert!(!again.created);
            assert_eq!(again.alert.id, first.alert.id);
        }
        let record = store.dedup_record(&first.alert.fingerprint).unwrap().unwrap();
        assert_eq!(record.occurrence_count, 10);
        assert_eq!(store.list_open().unwrap().len(), 1);
        let alert = store.get_alert(&first.alert.id).unwrap().unwrap();
        // The alert carries the latest observed value.
        assert_eq!(alert.value, Some(104.0));
    });
}

#[test]
fn resolve_drops_dedup_record_and_allows_new_alert() {
    each_store(|store| {
        let first = store.upsert_firing(candidate("r1", "web-01", 95.0)).unwrap();
        let resolved = store.resolve(&first.alert.id, Utc::now()).unwrap().unwrap();
        assert_eq!(resolved.status, AlertStatus::Resolved);
        assert!(resolved.resolved_at.is_some());
        assert!(store.dedup_record(&first.alert.fingerprint).unwrap().is_none());
        assert!(store.resolve(&first.alert.id, Utc::now()).unwrap().is_none());

        // Same fingerprint, fresh alert.
        let second = store.upsert_firing(candidate("r1", "web-01", 97.0)).unwrap();
        assert!(second.created);
        assert_ne!(second.alert.id, first.alert.id);
    });
}

#[test]
fn escalation_is_compare_and_set() {
    each_store(|store| {
        let fired = store.upsert_firing(candidate("r1", "web-01", 95.0)).unwrap();
        let step = EscalationStep {
            expected_level: 0,
            severity: Severity::Critical,
            at: Utc::now(),
            next_escalation_at: None,
        };
        let escalated = store.escalate(&fired.alert.id, &step).unwrap().unwrap();
        assert_eq!(escalated.escalation_level, 1);
        // A second writer with the stale level loses.
        assert!(store.escalate(&fired.alert.id, &step).unwrap().is_none());

        let reset = store
            .reset_escalation(&fired.alert.id, Severity::Warning, None, Utc::now())
            .unwrap();
        assert_eq!(reset.escalation_level, 0);
        assert_eq!(reset.severity, Severity::Warning);
    });
}

#[test]
fn acknowledged_alerts_are_not_escalated() {
    each_store(|store| {
        let fired = store.upsert_firing(candidate("r1", "db-01", 95.0)).unwrap();
        let acked = store
            .acknowledge(&fired.alert.id, "alice", Utc::now())
            .unwrap();
        assert_eq!(acked.acknowledged_by.as_deref(), Some("alice"));
        let step = EscalationStep {
            expected_level: 0,
            severity: Severity::Critical,
            at: Utc::now(),
            next_escalation_at: None,
        };
        assert!(store.escalate(&fired.alert.id, &step).unwrap().is_none());

        store.resolve(&fired.alert.id, Utc::now()).unwrap();
        assert!(matches!(
            store.acknowledge(&fired.alert.id, "bob", Utc::now()),
            Err(StorageError::InvalidState { .. })
        ));
    });
}

#[test]
fn one_active_task_per_alert() {
    each_store(|store| {
        let mut task = RemediationTask::new("t1".into(), "a1", "web-01", TriggeredBy::Auto);
        store.create_task_if_idle(&task, &audit(&task, None)).unwrap();

        let dup = RemediationTask::new("t2".into(), "a1", "web-01", TriggeredBy::Manual);
        match store.create_task_if_idle(&dup, &audit(&dup, None)) {
            Err(StorageError::ActiveTask { task_id, .. }) => assert_eq!(task_id, "t1"),
            other => panic!("expected ActiveTask, got {other:?}"),
        }

        task.transition(RemediationStatus::Rejected, Utc::now())
            .unwrap();
        store
            .record_transition(&task, &audit(&task, Some(RemediationStatus::Pending)))
            .unwrap();
        // A terminal task no longer blocks the alert.
        store.create_task_if_idle(&dup, &audit(&dup, None)).unwrap();

        let trail = store.audit_trail("t1").unwrap();
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[1].to_status, RemediationStatus::Rejected);
        assert_eq!(store.tasks_for_alert("a1").unwrap().len(), 2);
        assert_eq!(
            store.active_task_for_alert("a1").unwrap().map(|t| t.id),
            Some("t2".to_string())
        );
    });
}

#[test]
fn stale_transitions_are_refused() {
    each_store(|store| {
        let task = RemediationTask::new("t1".into(), "a1", "web-01", TriggeredBy::Auto);
        store.create_task_if_idle(&task, &audit(&task, None)).unwrap();

        let mut approved = task.clone();
        approved
            .transition(RemediationStatus::PendingApproval, Utc::now())
            .unwrap();
        store
            .record_transition(&approved, &audit(&approved, Some(RemediationStatus::Pending)))
            .unwrap();

        // A second writer still believing the task is pending loses.
        let mut rejected = task.clone();
        rejected
            .transition(RemediationStatus::Rejected, Utc::now())
            .unwrap();
        assert!(matches!(
            store.record_transition(&rejected, &audit(&rejected, Some(RemediationStatus::Pending))),
            Err(StorageError::InvalidState { .. })
        ));
        assert_eq!(
            store.get_task("t1").unwrap().map(|t| t.status),
            Some(RemediationStatus::PendingApproval)
        );
        assert_eq!(store.audit_trail("t1").unwrap().len(), 2);
    });
}

#[test]
fn builtin_rules_cannot_be_deleted() {
    each_store(|store| {
        let mut builtin = rule("b1", "High CPU");
        builtin.is_builtin = true;
        store.insert_rule(&builtin).unwrap();
        store.insert_rule(&rule("c1", "Custom")).unwrap();

        assert!(matches!(
            store.delete_rule("b1"),
            Err(StorageError::Validation(ValidationError::BuiltinRule(_)))
        ));
        store.delete_rule("c1").unwrap();

        let mut disabled = builtin.clone();
        disabled.enabled = false;
        let updated = store.update_rule(&disabled).unwrap();
        assert!(!updated.enabled);
        assert!(updated.is_builtin);
        assert!(store.enabled_rules().unwrap().is_empty());
    });
}

#[test]
fn rule_names_are_unique() {
    each_store(|store| {
        store.insert_rule(&rule("r1", "High CPU")).unwrap();
        assert!(matches!(
            store.insert_rule(&rule("r2", "High CPU")),
            Err(StorageError::Duplicate { .. })
        ));
    });
}

#[test]
fn policy_requires_rule_and_follows_its_deletion() {
    each_store(|store| {
        let policy = EscalationPolicy {
            rule_id: "r1".into(),
            oncall_group: Some("sre".into()),
            levels: vec![EscalationLevel {
                level: 1,
                delay_minutes: 15,
                severity: Severity::Critical,
            }],
        };
        assert!(matches!(
            store.put_policy(&policy),
            Err(StorageError::NotFound { .. })
        ));
        store.insert_rule(&rule("r1", "High CPU")).unwrap();
        store.put_policy(&policy).unwrap();
        assert_eq!(store.get_policy("r1").unwrap(), Some(policy));

        store.delete_rule("r1").unwrap();
        assert!(store.get_policy("r1").unwrap().is_none());
    });
}

#[test]
fn sqlite_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("oxheal.db");
    let alert_id = {
        let store = SqliteStore::open(&path).unwrap();
        let fired = store.upsert_firing(candidate("r1", "web-01", 95.0)).unwrap();
        store
            .mark_notified(&fired.alert.fingerprint, Utc::now() - Duration::seconds(5))
            .unwrap();
        fired.alert.id
    };

    let store = SqliteStore::open(&path).unwrap();
    let alert = store.get_alert(&alert_id).unwrap().unwrap();
    let record = store.dedup_record(&alert.fingerprint).unwrap().unwrap();
    assert!(record.last_notified_at.is_some());
    assert!(!store.upsert_firing(candidate("r1", "web-01", 99.0)).unwrap().created);
}
