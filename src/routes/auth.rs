//! Shared-key authorization for the internal endpoints.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use tracing::warn;

use crate::delivery::INTERNAL_KEY_HEADER;
use crate::protocol::ErrorOut;
use crate::state::AppState;

fn keys_match(provided: &[u8], expected: &[u8]) -> bool {
    provided.len() == expected.len()
        && provided.iter().zip(expected).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
}

/// Rejects the request with 403 unless `X-Internal-API-Key` carries the configured key.
pub async fn require_internal_key(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let rejection = match req.headers().get(INTERNAL_KEY_HEADER) {
        Some(key) if keys_match(key.as_bytes(), state.settings.internal_api_key.as_bytes()) => None,
        Some(_) => Some("Invalid internal API key"),
        None => Some("Missing internal API key"),
    };
    match rejection {
        None => next.run(req).await,
        Some(detail) => {
            warn!(target: "forge_ai", path = %req.uri().path(), %detail, "Rejected internal request");
            (StatusCode::FORBIDDEN, Json(ErrorOut::new(detail))).into_response()
        }
    }
}
