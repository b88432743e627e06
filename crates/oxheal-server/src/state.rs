use crate::config::{AiConfig, ServerConfig};
use chrono::{DateTime, Utc};
use oxheal_ai::{ChatDiagnoser, Diagnoser, NoopDiagnoser};
use oxheal_alert::dedup::Deduplicator;
use oxheal_alert::escalation::{EscalationEngine, StaticOnCallSchedule};
use oxheal_alert::evaluator::RuleEvaluator;
use oxheal_alert::source::{LogBus, MetricCache};
use oxheal_notify::channels::{LogDispatcher, WebhookDispatcher};
use oxheal_notify::{NotificationQueue, NotificationReceiver, NotificationWorker};
use oxheal_remediation::{AutoTrigger, CommandExecutor, Collaborators, Orchestrator};
use oxheal_storage::Store;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub metrics: Arc<MetricCache>,
    pub db_metrics: Arc<MetricCache>,
    pub log_bus: LogBus,
    pub dedup: Arc<Deduplicator>,
    pub evaluator: Arc<RuleEvaluator>,
    pub escalation: Arc<EscalationEngine>,
    pub orchestrator: Arc<Orchestrator>,
    pub notifications: NotificationQueue,
    pub start_time: DateTime<Utc>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Wires the engine around `store`. The returned receiver must be handed
    /// to a [`NotificationWorker`]; until then notifications accumulate in
    /// the bounded queue.
    pub fn build(
        config: ServerConfig,
        store: Arc<dyn Store>,
        diagnoser: Arc<dyn Diagnoser>,
        executor: Arc<dyn CommandExecutor>,
    ) -> anyhow::Result<(Self, NotificationReceiver)> {
        let eval = &config.evaluator;
        let metrics = Arc::new(MetricCache::new(
            "metrics",
            eval.metric_retention_secs,
            eval.metric_max_age_secs,
        ));
        let db_metrics = Arc::new(MetricCache::new(
            "db_metrics",
            eval.metric_retention_secs,
            eval.metric_max_age_secs,
        ));
        // One queue shared by dedup, escalation and remediation.
        let (notifications, rx) = NotificationQueue::bounded(config.notification.queue_capacity);

        let orchestrator = Orchestrator::new(
            &config.remediation,
            Collaborators {
                store: store.clone(),
                diagnoser,
                executor,
                metrics: metrics.clone(),
                db_metrics: db_metrics.clone(),
                notifications: notifications.clone(),
            },
        )?;

        let mut dedup = Deduplicator::new(store.clone(), notifications.clone());
        // Without the hook remediation is manual only.
        if config.remediation.auto_trigger {
            dedup = dedup.with_hook(Arc::new(AutoTrigger::new(
                orchestrator.clone(),
                config.remediation.auto_min_severity,
            )));
        } else {
            tracing::info!("Automatic remediation disabled");
        }
        let dedup = Arc::new(dedup);

        let evaluator = Arc::new(RuleEvaluator::new(
            store.clone(),
            metrics.clone(),
            db_metrics.clone(),
            dedup.clone(),
            Duration::from_millis(eval.source_timeout_ms.max(1)),
        ));
        // Log matching works before the first tick.
        evaluator.refresh_rules()?;

        let escalation = Arc::new(EscalationEngine::new(
            store.clone(),
            Arc::new(StaticOnCallSchedule::new(config.oncall.clone())),
            notifications.clone(),
        ));

        let state = Self {
            store,
            metrics,
            db_metrics,
            log_bus: LogBus::new(eval.log_bus_capacity),
            dedup,
            evaluator,
            escalation,
            orchestrator,
            notifications,
            start_time: Utc::now(),
            config: Arc::new(config),
        };
        Ok((state, rx))
    }
}

/// Diagnoser selected by the `[ai]` section.
pub fn build_diagnoser(config: &AiConfig) -> anyhow::Result<Arc<dyn Diagnoser>> {
    if !config.enabled {
        tracing::info!("AI diagnosis disabled");
        return Ok(Arc::new(NoopDiagnoser));
    }
    let api_key = config
        .api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("[ai] is enabled but api_key is not set"))?;
    let diagnoser = ChatDiagnoser::new(
        api_key,
        config.model.clone(),
        config.base_url.clone(),
        config.max_tokens,
        config.temperature,
    )?;
    tracing::info!(model = diagnoser.model_name(), "AI diagnosis enabled");
    Ok(Arc::new(diagnoser))
}

/// Notification worker for the configured channels.
pub fn build_notification_worker(config: &ServerConfig) -> anyhow::Result<NotificationWorker> {
    let webhook = WebhookDispatcher::new(Duration::from_secs(
        config.notification.webhook_timeout_secs.max(1),
    ))?;
    Ok(
        NotificationWorker::new(config.notification.channels.clone())
            .register(Arc::new(LogDispatcher))
            .register(Arc::new(webhook)),
    )
}
