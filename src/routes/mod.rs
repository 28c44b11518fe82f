//! Router assembly: HTTP endpoints, internal-key guard, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    http::HeaderValue,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{warn, Level};

use crate::state::AppState;

pub mod auth;
pub mod http;

/// Build the application router with:
/// - `/health`, open
/// - generation, verification, hints and review behind `X-Internal-API-Key`
/// - CORS from `CORS_ORIGINS` (any origin when unset)
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    let internal = Router::new()
        .route("/internal/generate-level", post(http::http_generate_level))
        .route("/internal/verify", post(http::http_verify))
        .route("/hints", post(http::http_hints))
        .route("/analyze", post(http::http_analyze))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_internal_key));

    let cors = cors_layer(&state.settings.cors_origins);

    Router::new()
        .route("/health", get(http::http_health))
        .merge(internal)
        .with_state(state)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return base.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(target: "forge_ai", origin = %o, "Ignoring unparsable CORS origin");
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(allowed))
}
