use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use cronx_core::config::CronxConfig;
use cronx_scheduler::{HttpExecutor, SchedulerService, SqliteStore};
use tracing::{info, warn};

mod app;
mod http;

#[derive(Parser)]
#[command(name = "cronx-daemon", version, about = "Cron-driven HTTP job scheduler")]
struct Cli {
    /// Path to cronx.toml (falls back to CRONX_CONFIG, then ~/.cronx/cronx.toml)
    #[arg(long, short)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cronx_daemon=info,cronx_scheduler=info,tower_http=debug".into()
            }),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.or_else(|| std::env::var("CRONX_CONFIG").ok());
    let config = CronxConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!(code = e.code(), "Config load failed ({}), using defaults", e);
        CronxConfig::default()
    });

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    let store = SqliteStore::new(db)?;
    info!("database migrations complete");

    let scheduler = SchedulerService::new(
        Arc::new(store.clone()),
        HttpExecutor::new(&config.scheduler),
        &config.scheduler,
    );
    let scheduled = scheduler.start().await;
    info!(scheduled, "scheduler running");

    let addr: SocketAddr = format!("{}:{}", config.api.bind, config.api.port).parse()?;
    let state = Arc::new(app::AppState::new(Arc::clone(&scheduler), store));
    let router = app::build_router(state);

    info!("cronx daemon listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown().await;
    info!("cronx daemon stopped");
    Ok(())
}

/// Resolves on ctrl-c or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
