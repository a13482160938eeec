//! Mailvetter server library
//!
//! Shared plumbing for the two binaries: the HTTP API (`mailvetter-api`)
//! and the queue worker (`mailvetter-worker`). Both consume the
//! verification engine from `mailvetter_core`; this crate adds the
//! collaborators around it — configuration, bearer auth, the Redis task
//! queue, the Postgres store, CSV ingest, and the worker pool.

pub mod auth;
pub mod config;
pub mod ingest;
pub mod queue;
pub mod routes;
pub mod store;
pub mod worker;

use std::sync::Arc;

use mailvetter_core::Verifier;
use sqlx::PgPool;

use crate::config::AppConfig;
use crate::queue::QueueClient;

/// Shared state for the HTTP API
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub verifier: Arc<Verifier>,
    pub db: PgPool,
    pub queue: QueueClient,
}

/// Initialize tracing for a binary: env-filtered, human-readable output
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,mailvetter_core=debug".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
