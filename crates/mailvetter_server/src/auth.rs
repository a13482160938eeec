//! Static bearer-token authentication for the HTTP API
//!
//! A single shared secret protects every data-bearing endpoint. The token
//! comparison is constant-time: every byte of both inputs is examined
//! before the verdict, so response latency carries no information about
//! how many leading characters of a guess were correct.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::AppState;

/// Constant-time equality for same-length secrets; length mismatches are
/// rejected up front (the length of the real key is not secret).
pub fn token_matches(candidate: &[u8], expected: &[u8]) -> bool {
    if candidate.len() != expected.len() {
        return false;
    }
    candidate.ct_eq(expected).into()
}

/// Middleware validating `Authorization: Bearer <token>`.
///
/// An empty `API_SECRET_KEY` locks the server down with a 500 rather than
/// a 401, making a missing deployment secret immediately obvious as a
/// server misconfiguration instead of a bad client token.
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let expected = state.config.api_secret_key.as_bytes();
    if expected.is_empty() {
        warn!("API_SECRET_KEY is not set, refusing request");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "server configuration error: API_SECRET_KEY not set" })),
        )
            .into_response();
    }

    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(str::trim)
        .unwrap_or_default();

    if !token_matches(token.as_bytes(), expected) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "unauthorized: invalid or missing API key" })),
        )
            .into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_tokens_pass() {
        assert!(token_matches(b"sekrit-token", b"sekrit-token"));
    }

    #[test]
    fn mismatched_tokens_fail() {
        assert!(!token_matches(b"sekrit-token", b"sekrit-tokem"));
        assert!(!token_matches(b"", b"sekrit-token"));
        assert!(!token_matches(b"sekrit", b"sekrit-token"));
    }
}
