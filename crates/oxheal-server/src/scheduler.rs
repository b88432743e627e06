use crate::state::AppState;
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Runs rule evaluation on a fixed tick. A failing tick is logged and the
/// loop carries on.
pub fn spawn_evaluation(state: &AppState) -> JoinHandle<()> {
    let evaluator = state.evaluator.clone();
    let period = Duration::from_secs(state.config.evaluator.tick_secs.max(1));
    tokio::spawn(async move {
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            // Each pass runs as its own task so a panic costs one tick, not the loop.
            let pass = evaluator.clone();
            match tokio::spawn(async move { pass.tick(Utc::now()).await }).await {
                Ok(Ok(report)) => {
                    if report.opened + report.resolved > 0 || report.skipped > 0 {
                        tracing::info!(
                            evaluated = report.evaluated,
                            opened = report.opened,
                            repeated = report.repeated,
                            resolved = report.resolved,
                            skipped = report.skipped,
                            "Evaluation tick"
                        );
                    } else {
                        tracing::debug!(evaluated = report.evaluated, "Evaluation tick");
                    }
                }
                Ok(Err(e)) => tracing::error!(error = %e, "Evaluation tick failed"),
                Err(e) => tracing::error!(error = %e, "Evaluation tick panicked"),
            }
        }
    })
}

/// Runs the escalation engine on its own tick, independent of evaluation.
pub fn spawn_escalation(state: &AppState) -> JoinHandle<()> {
    let escalation = state.escalation.clone();
    let period = Duration::from_secs(state.config.escalation.tick_secs.max(1));
    tokio::spawn(async move {
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            let pass = escalation.clone();
            match tokio::spawn(async move { pass.tick(Utc::now()).await }).await {
                Ok(Ok(events)) if !events.is_empty() => {
                    tracing::info!(escalated = events.len(), "Escalation tick");
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "Escalation tick failed"),
                Err(e) => tracing::error!(error = %e, "Escalation tick panicked"),
            }
        }
    })
}
