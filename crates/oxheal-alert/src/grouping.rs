use chrono::Duration;
use oxheal_common::alert::{Alert, AlertGroup};
use std::collections::{BTreeMap, HashMap};

/// Clusters open alerts of the same target whose trigger times fall within
/// `window` of the cluster's first alert. Only clusters of two or more
/// alerts are returned. Read-only: alerts are never modified.
pub fn group_alerts(alerts: &[Alert], window: Duration) -> Vec<AlertGroup> {
    let mut by_target: HashMap<&str, Vec<&Alert>> = HashMap::new();
    for alert in alerts.iter().filter(|a| a.status.is_open()) {
        by_target.entry(&alert.target_id).or_default().push(alert);
    }

    let mut groups = Vec::new();
    for (target, mut members) in by_target {
        members.sort_by_key(|a| a.triggered_at);
        let mut cluster: Vec<&Alert> = Vec::new();
        for alert in members {
            // Anchored on the first member so a steady trickle cannot chain forever.
            let starts_new = cluster
                .first()
                .is_some_and(|first| alert.triggered_at - first.triggered_at > window);
            if starts_new {
                push_group(&mut groups, target, &cluster);
                cluster.clear();
            }
            cluster.push(alert);
        }
        push_group(&mut groups, target, &cluster);
    }

    groups.sort_by(|a, b| b.last_triggered_at.cmp(&a.last_triggered_at));
    groups
}

fn push_group(groups: &mut Vec<AlertGroup>, target: &str, cluster: &[&Alert]) {
    let (Some(first), Some(last)) = (cluster.first(), cluster.last()) else {
        return;
    };
    if cluster.len() < 2 {
        return;
    }
    let mut by_severity = BTreeMap::new();
    for alert in cluster {
        *by_severity.entry(alert.severity).or_insert(0) += 1;
    }
    let highest_severity = cluster
        .iter()
        .map(|a| a.severity)
        .max()
        .unwrap_or(first.severity);
    groups.push(AlertGroup {
        // Stable while the cluster's first alert stays open.
        key: format!("{target}:{}", first.triggered_at.timestamp_millis()),
        target_id: target.to_string(),
        alert_ids: cluster.iter().map(|a| a.id.clone()).collect(),
        count: cluster.len(),
        by_severity,
        highest_severity,
        first_triggered_at: first.triggered_at,
        last_triggered_at: last.triggered_at,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use oxheal_common::alert::AlertStatus;
    use oxheal_common::types::Severity;

    fn alert(id: &str, target: &str, mins: i64, severity: Severity) -> Alert {
        let t = Utc::now() + Duration::minutes(mins);
        Alert {
            id: id.into(),
            rule_id: format!("rule-{id}"),
            rule_name: id.into(),
            target_id: target.into(),
            fingerprint: id.into(),
            status: AlertStatus::Firing,
            severity,
            message: String::new(),
            value: None,
            escalation_level: 0,
            last_escalated_at: None,
            next_escalation_at: None,
            triggered_at: t,
            resolved_at: None,
            acknowledged_at: None,
            acknowledged_by: None,
            updated_at: t,
        }
    }

    #[test]
    fn clusters_by_target_and_window() {
        let mut resolved = alert("x", "web-01", 1, Severity::Critical);
        resolved.status = AlertStatus::Resolved;
        let alerts = vec![
            alert("a", "web-01", 0, Severity::Warning),
            alert("b", "web-01", 2, Severity::Critical),
            alert("c", "web-01", 30, Severity::Warning),
            alert("d", "db-01", 0, Severity::Info),
            resolved,
        ];
        let groups = group_alerts(&alerts, Duration::minutes(5));
        assert_eq!(groups.len(), 1);
        let g = &groups[0];
        assert_eq!(g.alert_ids, vec!["a", "b"]);
        assert_eq!(g.highest_severity, Severity::Critical);
        assert_eq!(g.by_severity.get(&Severity::Warning), Some(&1));
    }
}
