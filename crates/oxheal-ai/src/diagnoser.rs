use anyhow::Result;
use async_trait::async_trait;
use oxheal_common::remediation::Diagnosis;
use oxheal_common::types::{RiskLevel, Severity};
use serde::Serialize;
use std::time::Duration;

/// What the diagnoser gets to see about an alert.
#[derive(Debug, Clone, Serialize)]
pub struct AlertContext {
    pub alert_id: String,
    pub rule_name: String,
    pub target_id: String,
    pub severity: Severity,
    pub message: String,
    pub metric: Option<String>,
    pub operator: Option<String>,
    pub threshold: Option<f64>,
    pub value: Option<f64>,
    /// Oldest first.
    pub recent_values: Vec<f64>,
    pub log_line: Option<String>,
    /// Runbook names the diagnoser may pick from.
    pub runbooks: Vec<String>,
    pub locale: String,
}

/// Root-cause diagnosis collaborator.
///
/// Implementations must honour `timeout`; callers treat an error as
/// "diagnosis unavailable" and carry on with an empty [`Diagnosis`].
#[async_trait]
pub trait Diagnoser: Send + Sync {
    fn provider(&self) -> &str;

    fn model_name(&self) -> &str;

    async fn diagnose(&self, context: &AlertContext, timeout: Duration) -> Result<Diagnosis>;
}

/// Used when no AI provider is configured.
pub struct NoopDiagnoser;

#[async_trait]
impl Diagnoser for NoopDiagnoser {
    fn provider(&self) -> &str {
        "none"
    }

    fn model_name(&self) -> &str {
        "none"
    }

    async fn diagnose(&self, _context: &AlertContext, _timeout: Duration) -> Result<Diagnosis> {
        Ok(Diagnosis::default())
    }
}

/// Parses the tagged answer lines of a diagnosis reply.
///
/// Recognised tags are `ROOT_CAUSE:`, `CONFIDENCE:`, `RISK_LEVEL:` and
/// `RUNBOOK:`, case-insensitive, optionally wrapped in markdown emphasis.
/// Without a `ROOT_CAUSE:` line the first untagged line is used.
pub fn parse_diagnosis(content: &str, provider: &str) -> Diagnosis {
    let mut diagnosis = Diagnosis {
        provider: Some(provider.to_string()),
        ..Diagnosis::default()
    };
    let mut fallback_cause: Option<String> = None;

    for raw in content.lines() {
        // Models like to bold the tags.
        let line = raw.trim().trim_matches('*').trim();
        if line.is_empty() {
            continue;
        }
        let Some((tag, value)) = line.split_once(':') else {
            // Markdown headings are never the cause.
            if fallback_cause.is_none() && !line.starts_with('#') {
                fallback_cause = Some(line.to_string());
            }
            continue;
        };
        let value = value.trim().trim_matches('*').trim();
        match tag.trim().to_ascii_uppercase().as_str() {
            "ROOT_CAUSE" if !value.is_empty() => diagnosis.root_cause = Some(value.to_string()),
            "CONFIDENCE" => diagnosis.confidence = parse_confidence(value),
            "RISK_LEVEL" => diagnosis.risk_hint = value.to_ascii_lowercase().parse::<RiskLevel>().ok(),
            // "none" means the model found nothing that fits.
            "RUNBOOK" => {
                let name = value.trim_matches('`');
                if !name.is_empty() && !name.eq_ignore_ascii_case("none") {
                    diagnosis.suggested_runbook = Some(name.to_string());
                }
            }
            _ => {
                if fallback_cause.is_none() {
                    fallback_cause = Some(line.to_string());
                }
            }
        }
    }

    // An untagged reply still says something useful.
    if diagnosis.root_cause.is_none() {
        diagnosis.root_cause = fallback_cause;
    }
    diagnosis
}

/// Accepts `0.8`, `80%` and `80`; clamps into `[0, 1]`.
fn parse_confidence(value: &str) -> f64 {
    let (number, percent) = match value.strip_suffix('%') {
        Some(n) => (n.trim(), true),
        None => (value, false),
    };
    let Ok(parsed) = number.parse::<f64>() else {
        return 0.0;
    };
    // A bare number above one is a percentage.
    let scaled = if percent || parsed > 1.0 {
        parsed / 100.0
    } else {
        parsed
    };
    if scaled.is_finite() {
        scaled.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_lines() {
        let reply = "\
ROOT_CAUSE: nginx worker stuck in a reload loop
CONFIDENCE: 0.82
RISK_LEVEL: medium
RUNBOOK: service_restart";
        let d = parse_diagnosis(reply, "openai");
        assert_eq!(d.root_cause.as_deref(), Some("nginx worker stuck in a reload loop"));
        assert!((d.confidence - 0.82).abs() < 1e-9);
        assert_eq!(d.risk_hint, Some(RiskLevel::Medium));
        assert_eq!(d.suggested_runbook.as_deref(), Some("service_restart"));
        assert_eq!(d.provider.as_deref(), Some("openai"));
    }

    #[test]
    fn tolerates_markdown_and_percentages() {
        let reply = "## Diagnosis\n**ROOT_CAUSE:** disk full on /var\n**CONFIDENCE:** 75%\nrisk_level: HIGH\nRUNBOOK: none";
        let d = parse_diagnosis(reply, "x");
        assert_eq!(d.root_cause.as_deref(), Some("disk full on /var"));
        assert!((d.confidence - 0.75).abs() < 1e-9);
        assert_eq!(d.risk_hint, Some(RiskLevel::High));
        assert_eq!(d.suggested_runbook, None);
    }

    #[test]
    fn untagged_reply_falls_back_to_first_line() {
        let d = parse_diagnosis("Memory leak in the API process\nrestart it", "x");
        assert_eq!(d.root_cause.as_deref(), Some("Memory leak in the API process"));
        assert_eq!(d.confidence, 0.0);
        assert_eq!(d.risk_hint, None);
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(parse_confidence("250"), 1.0);
        assert_eq!(parse_confidence("-3"), 0.0);
        assert_eq!(parse_confidence("abc"), 0.0);
    }

    #[tokio::test]
    async fn noop_returns_empty_diagnosis() {
        let ctx = AlertContext {
            alert_id: "a".into(),
            rule_name: "r".into(),
            target_id: "h".into(),
            severity: Severity::Warning,
            message: String::new(),
            metric: None,
            operator: None,
            threshold: None,
            value: None,
            recent_values: vec![],
            log_line: None,
            runbooks: vec![],
            locale: "en".into(),
        };
        let d = NoopDiagnoser
            .diagnose(&ctx, Duration::from_millis(10))
            .await
            .unwrap();
        assert!(d.is_empty());
    }
}
