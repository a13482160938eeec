//! Job progress endpoint

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::{store, AppState};

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub id: String,
}

/// GET /status?id=jobid
pub async fn status_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatusQuery>,
) -> Response {
    if query.id.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "missing 'id' parameter" })),
        )
            .into_response();
    }

    match store::fetch_job(&state.db, &query.id).await {
        Ok(Some(job)) => (StatusCode::OK, Json(job)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "job not found" })),
        )
            .into_response(),
        Err(e) => {
            error!("status lookup failed for {}: {e}", query.id);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "failed to fetch job" })),
            )
                .into_response()
        }
    }
}
