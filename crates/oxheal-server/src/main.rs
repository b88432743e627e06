use anyhow::Result;
use oxheal_remediation::build_executor;
use oxheal_server::app;
use oxheal_server::config::ServerConfig;
use oxheal_server::rule_seed;
use oxheal_server::scheduler;
use oxheal_server::state::{self, AppState};
use oxheal_storage::sqlite::SqliteStore;
use oxheal_storage::Store;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  oxheal-server [config.toml]                          Start the server");
    eprintln!("  oxheal-server init-rules <config.toml> <seed.json>   Initialize alert rules from seed file");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("oxheal=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("init-rules") => {
            let config_path = args.get(2).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("init-rules requires <config.toml> and <seed.json> arguments")
            })?;
            let seed_path = args.get(3).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("init-rules requires <seed.json> argument")
            })?;
            run_init_rules(config_path, seed_path)
        }
        Some("--help" | "-h") => {
            print_usage();
            Ok(())
        }
        _ => {
            let config_path = args
                .get(1)
                .map(|s| s.as_str())
                .unwrap_or("config/server.toml");
            run_server(config_path).await
        }
    }
}

fn open_store(config: &ServerConfig) -> Result<Arc<dyn Store>> {
    let path = config.database_path();
    let store = SqliteStore::open(&path)
        .map_err(|e| anyhow::anyhow!("Failed to open database '{}': {}", path.display(), e))?;
    Ok(Arc::new(store))
}

/// Initialize alert rules from a JSON seed file.
fn run_init_rules(config_path: &str, seed_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    oxheal_common::id::init(config.machine_id, 1);
    let store = open_store(&config)?;
    rule_seed::init_rules_from_seed(store.as_ref(), Path::new(seed_path))?;
    Ok(())
}

async fn run_server(config_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    oxheal_common::id::init(config.machine_id, 1);

    tracing::info!(
        http_port = config.http_port,
        data_dir = %config.data_dir,
        executor = ?config.executor.mode,
        ai = config.ai.enabled,
        "oxheal-server starting"
    );

    let store = open_store(&config)?;
    // Non-fatal: the API still works and rules can be added later.
    if let Err(e) = rule_seed::init_default_rules(store.as_ref()) {
        tracing::error!(error = %e, "Failed to initialize default alert rules");
    }

    let diagnoser = state::build_diagnoser(&config.ai)?;
    let executor = build_executor(&config.executor);
    let worker = state::build_notification_worker(&config)?;
    let http_port = config.http_port;
    let (state, notification_rx) = AppState::build(config, store, diagnoser, executor)?;

    // Tasks caught mid-run by the last shutdown cannot be resumed.
    state.orchestrator.recover_interrupted()?;

    let notify_handle = tokio::spawn(worker.run(notification_rx));
    let evaluation_handle = scheduler::spawn_evaluation(&state);
    let escalation_handle = scheduler::spawn_escalation(&state);

    let http_addr: SocketAddr = format!("0.0.0.0:{http_port}").parse()?;
    let app = app::build_http_app(state.clone());
    let http_listener = tokio::net::TcpListener::bind(http_addr).await?;
    let http_server = axum::serve(http_listener, app);

    tracing::info!(http = %http_addr, "Server started");

    tokio::select! {
        result = http_server.with_graceful_shutdown(async { signal::ctrl_c().await.ok(); }) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server error");
            }
        }
        _ = signal::ctrl_c() => {
            tracing::info!("Shutting down gracefully");
        }
    }

    // Background loops hold no state worth flushing.
    evaluation_handle.abort();
    escalation_handle.abort();
    notify_handle.abort();
    tracing::info!("Server stopped");
    Ok(())
}
