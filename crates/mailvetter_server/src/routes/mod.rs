//! HTTP routes
//!
//! - `verify`: single-address verification, run inline
//! - `upload`: bulk CSV ingest creating a job and queueing tasks
//! - `status`: job progress lookup
//! - `results`: paged result retrieval
//! - `info`: unauthenticated capability banner

pub mod info;
pub mod results;
pub mod status;
pub mod upload;
pub mod verify;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{auth, AppState};

/// Upload payload ceiling
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Build the application router. Every data-bearing endpoint sits behind
/// the bearer-token middleware; only `/info` is public.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/verify", get(verify::verify_handler))
        .route("/upload", post(upload::upload_handler))
        .route("/status", get(status::status_handler))
        .route("/results", get(results::results_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ))
        .route("/info", get(info::info_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
