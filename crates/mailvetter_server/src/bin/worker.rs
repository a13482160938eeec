//! Mailvetter queue worker
//!
//! Dequeues verification tasks, runs the pipeline under a per-job
//! deadline, and persists results. Pool size auto-tunes to the proxy
//! configuration unless WORKER_CONCURRENCY overrides it.

use std::sync::Arc;
use std::time::Duration;

use mailvetter_core::{cache, EngineConfig, ProxyPool, Verifier};
use mailvetter_server::{
    config::AppConfig,
    queue::QueueClient,
    store,
    worker::{self, WorkerContext},
};
use tokio::signal;
use tokio::sync::watch;
use tracing::info;

/// Grace period for in-flight jobs after the shutdown signal
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mailvetter_server::init_tracing();
    info!("starting Mailvetter worker");

    let config = AppConfig::load()?;
    config.require_db()?;

    let queue = QueueClient::connect(&config.redis_addr).await?;
    let db = store::connect(&config.db_url).await?;

    let proxies = Arc::new(
        ProxyPool::new(
            &config.proxies(),
            config.proxy_concurrency,
            config.smtp_proxy(),
        )
        .await?,
    );
    let concurrency = config.worker_pool_size(proxies.capacity());
    if config.worker_concurrency > 0 {
        info!("WORKER_CONCURRENCY explicitly set to {concurrency}");
    } else {
        info!("auto-tuned worker concurrency to {concurrency}");
    }

    let engine_config = EngineConfig {
        hibp_api_key: config.hibp_key(),
        ..EngineConfig::default()
    };
    let verifier = Arc::new(Verifier::new(engine_config, proxies)?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = tokio::spawn(cache::run_sweeper(verifier.cache(), shutdown_rx.clone()));

    let context = WorkerContext {
        verifier,
        db,
        queue,
    };
    let pool = tokio::spawn(worker::run_pool(context, concurrency, shutdown_rx));

    wait_for_shutdown().await;
    info!("shutdown signal received, draining in-flight jobs");
    let _ = shutdown_tx.send(true);

    if tokio::time::timeout(DRAIN_TIMEOUT, pool).await.is_err() {
        info!("drain timeout reached with jobs still in flight");
    }
    let _ = sweeper.await;

    info!("worker shut down cleanly");
    Ok(())
}

/// Blocks until SIGINT or SIGTERM
async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
