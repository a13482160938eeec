//! Paged results endpoint

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use crate::{
    store::{self, ResultRow},
    AppState,
};

const DEFAULT_PAGE_SIZE: i64 = 500;
const MAX_PAGE_SIZE: i64 = 2000;

#[derive(Debug, Deserialize)]
pub struct ResultsQuery {
    pub id: String,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

/// A page of results plus the metadata a client needs to paginate
/// without a separate count query
#[derive(Debug, Serialize)]
pub struct ResultsPage {
    pub job_id: String,
    pub page: i64,
    pub page_size: i64,
    pub total_count: i64,
    pub has_more: bool,
    pub results: Vec<ResultRow>,
}

/// GET /results?id=jobid&page=1&page_size=500
///
/// `page` is 1-based; `page_size` is clamped to `[1, 2000]`. The query is
/// resolved entirely through the `(job_id, id)` composite index, so server
/// memory stays constant regardless of job size.
pub async fn results_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ResultsQuery>,
) -> Response {
    if query.id.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "missing 'id' parameter" })),
        )
            .into_response();
    }

    let page = query.page.filter(|p| *p > 0).unwrap_or(1);
    let page_size = query
        .page_size
        .filter(|ps| *ps > 0)
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .min(MAX_PAGE_SIZE);
    let offset = (page - 1) * page_size;

    // the job row carries total_count, saving a COUNT(*) over results
    let total_count = match store::fetch_job(&state.db, &query.id).await {
        Ok(Some(job)) => i64::from(job.total_count),
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "job not found" })),
            )
                .into_response();
        }
        Err(e) => {
            error!("results lookup failed for {}: {e}", query.id);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "failed to fetch results" })),
            )
                .into_response();
        }
    };

    let results = match store::fetch_results_page(&state.db, &query.id, page_size, offset).await {
        Ok(rows) => rows,
        Err(e) => {
            error!("results page fetch failed for {}: {e}", query.id);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "failed to fetch results" })),
            )
                .into_response();
        }
    };

    let has_more = offset + (results.len() as i64) < total_count;
    (
        StatusCode::OK,
        Json(ResultsPage {
            job_id: query.id,
            page,
            page_size,
            total_count,
            has_more,
            results,
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clamp(page_size: Option<i64>) -> i64 {
        page_size
            .filter(|ps| *ps > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .min(MAX_PAGE_SIZE)
    }

    #[test]
    fn page_size_clamps_to_bounds() {
        assert_eq!(clamp(None), 500);
        assert_eq!(clamp(Some(0)), 500);
        assert_eq!(clamp(Some(-5)), 500);
        assert_eq!(clamp(Some(1)), 1);
        assert_eq!(clamp(Some(2000)), 2000);
        assert_eq!(clamp(Some(99999)), 2000);
    }
}
