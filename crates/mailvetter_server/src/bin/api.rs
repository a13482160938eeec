//! Mailvetter HTTP API server
//!
//! Serves single verifications inline and accepts bulk CSV uploads that
//! are fanned out to the worker pool through the Redis queue.

use std::sync::Arc;

use anyhow::Context;
use mailvetter_core::{cache, EngineConfig, ProxyPool, Verifier};
use mailvetter_server::{config::AppConfig, queue::QueueClient, routes, store, AppState};
use tokio::signal;
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mailvetter_server::init_tracing();

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
    if proxies.enabled() {
        info!(
            "proxy rotation enabled ({} proxies, {} concurrent HTTP slots, smtp_proxy={})",
            proxies.proxies().len(),
            proxies.capacity(),
            proxies.smtp_proxy_enabled()
        );
    } else {
        info!("no proxies configured, running with direct connections");
    }

    let engine_config = EngineConfig {
        hibp_api_key: config.hibp_key(),
        ..EngineConfig::default()
    };
    let verifier = Arc::new(Verifier::new(engine_config, proxies)?);

    // background cache eviction, stopped on shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = tokio::spawn(cache::run_sweeper(verifier.cache(), shutdown_rx));

    let state = Arc::new(AppState {
        config: Arc::new(config.clone()),
        verifier,
        db,
        queue,
    });
    let app = routes::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.http_listen)
        .await
        .with_context(|| format!("binding {}", config.http_listen))?;
    info!("Mailvetter API listening on {}", config.http_listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("draining complete, stopping background tasks");
    let _ = shutdown_tx.send(true);
    let _ = sweeper.await;

    info!("server shut down cleanly");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
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
        _ = ctrl_c => info!("received Ctrl+C, starting graceful shutdown"),
        _ = terminate => info!("received SIGTERM, starting graceful shutdown"),
    }
}
