use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod api;
mod app_state;
mod config;
mod db;
mod middleware;
mod services;
mod utils;

use crate::app_state::AppState;
use crate::config::Config;
use crate::db::memory::MemoryStore;
use crate::db::pool::get_db_pool;
use crate::db::postgres::PgStore;
use crate::db::store::Store;
use crate::services::sweeper::spawn_expiry_sweeper;

/// Logs to stdout and to a daily rolling file. The guard must live as long
/// as the process or buffered file lines are lost.
fn init_tracing(config: &Config) -> anyhow::Result<WorkerGuard> {
    std::fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("Failed to create log directory {}", config.log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "app.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(true))
        .with(fmt::layer().with_ansi(false).with_writer(non_blocking))
        .init();

    Ok(guard)
}

async fn open_store(config: &Config) -> anyhow::Result<(Arc<dyn Store>, Option<PgPool>)> {
    match &config.database_url {
        Some(url) => {
            let pool = get_db_pool(url)
                .await
                .context("Failed to connect to the database")?;
            info!("Using PostgreSQL store");
            Ok((Arc::new(PgStore::new(pool.clone())), Some(pool)))
        }
        None => {
            warn!("DATABASE_URL not set; using the in-memory store, data is lost on restart");
            Ok((Arc::new(MemoryStore::new()), None))
        }
    }
}

async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {e}");
    }
    info!("Received Ctrl+C, shutting down...");
    // Receivers may already be gone.
    let _ = shutdown_tx.send(());
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let config = Config::from_env()?;
    Config::init(config);
    let config = Config::get();

    let _log_guard = init_tracing(&config)?;

    let (store, pool) = open_store(&config).await?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let sweeper = config
        .sweep_interval
        .map(|every| spawn_expiry_sweeper(store.clone(), every, shutdown_tx.subscribe()));
    if sweeper.is_none() {
        info!("Expiry sweeper disabled");
    }
    if config.auth_disabled {
        warn!("AUTH_DISABLED is set; every route is open");
    }

    let app = api::app_router(AppState::new(store, config.clone()));

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("Server running at http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx.clone()))
        .await
        .context("Server encountered an error")?;

    if let Some(sweeper) = sweeper {
        if let Err(e) = sweeper.await {
            error!("Expiry sweeper panicked: {e}");
        }
    }
    if let Some(pool) = pool {
        info!("🛠️ Closing database pool...");
        pool.close().await;
    }
    info!("Shutdown complete.");
    Ok(())
}
