//! Single-address verification endpoint

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use mailvetter_core::heuristics::split_address;
use mailvetter_core::pipeline::TIMEOUT_ERROR;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    pub email: String,
}

/// GET /verify?email=addr
///
/// Runs the full pipeline inline and returns the `ValidationResult` as
/// JSON. A pipeline deadline expiry still returns the partial result body,
/// just under a 504 so callers can tell the verdict is incomplete.
#[instrument(skip(state), fields(email = %query.email))]
pub async fn verify_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<VerifyQuery>,
) -> Response {
    let email = query.email.trim();
    if split_address(email).is_none() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "malformed email" })),
        )
            .into_response();
    }

    let result = state.verifier.verify(email).await;
    info!(
        score = result.score,
        status = ?result.status,
        duration_ms = result.duration_ms,
        "verification finished"
    );

    if result.error.as_deref() == Some(TIMEOUT_ERROR) {
        return (StatusCode::GATEWAY_TIMEOUT, Json(result)).into_response();
    }
    (StatusCode::OK, Json(result)).into_response()
}
