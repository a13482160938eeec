//! Bulk CSV upload endpoint

use std::sync::Arc;

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::{ingest, store, AppState};

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub job_id: String,
    pub total_rows: usize,
    pub message: String,
}

/// POST /upload (multipart, field name `file`)
///
/// Parses the email column, creates the job row, then enqueues every
/// address for the worker pool.
pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Response {
    let mut payload: Option<Vec<u8>> = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() == Some("file") {
                    match field.bytes().await {
                        Ok(bytes) => payload = Some(bytes.to_vec()),
                        Err(_) => {
                            return (
                                StatusCode::BAD_REQUEST,
                                Json(json!({ "error": "file too large or malformed" })),
                            )
                                .into_response();
                        }
                    }
                }
            }
            Ok(None) => break,
            Err(_) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": "malformed multipart body" })),
                )
                    .into_response();
            }
        }
    }

    let Some(payload) = payload else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "missing 'file' parameter" })),
        )
            .into_response();
    };

    let emails = match ingest::parse_email_column(&payload) {
        Ok(emails) => emails,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("invalid CSV format: {e}") })),
            )
                .into_response();
        }
    };

    let job_id = Uuid::new_v4().to_string();

    if let Err(e) = store::create_job(&state.db, &job_id, emails.len() as i32).await {
        error!("failed to create job {job_id}: {e}");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "failed to create job" })),
        )
            .into_response();
    }

    if let Err(e) = state.queue.enqueue_batch(&job_id, &emails).await {
        error!("failed to enqueue job {job_id}: {e}");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "failed to queue tasks" })),
        )
            .into_response();
    }

    info!(job_id, total_rows = emails.len(), "upload accepted");
    (
        StatusCode::OK,
        Json(UploadResponse {
            job_id,
            total_rows: emails.len(),
            message: "Job created and queued. Processing started.".to_string(),
        }),
    )
        .into_response()
}
