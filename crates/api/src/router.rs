//! Shared application router builder.
//!
//! Provides [`build_app_router`] so both the production binary (`main.rs`)
//! and integration tests (`tests/common/mod.rs`) use the exact same middleware
//! stack.

use std::time::Duration;

use axum::http::{HeaderName, StatusCode};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::config::ServerConfig;
use crate::handlers::fallback;
use crate::middleware::cors::build_cors_layer;
use crate::middleware::headers::response_headers;
use crate::middleware::security::{cors_guard, security_pipeline};
use crate::routes;
use crate::state::AppState;

/// Build the full application [`Router`]: every API route plus the
/// fallbacks, wrapped in [`with_middleware`].
///
/// Unmatched paths and methods fall back to handlers that answer in the
/// uniform error shape, so they also pass through the security pipeline.
pub fn build_app_router(state: AppState, config: &ServerConfig) -> Router {
    let routes = Router::new()
        .nest("/api", routes::api_routes())
        .method_not_allowed_fallback(fallback::method_not_allowed)
        .fallback(fallback::not_found);
    with_middleware(routes, state, config)
}

/// Wrap `routes` in the production middleware stack.
///
/// The stack is applied bottom-up:
///
/// 1. Set request ID on incoming requests
/// 2. Structured request/response tracing
/// 3. Propagate request ID to response
/// 4. Security, cache and timing headers on every response
/// 5. Panic recovery (catch panics, return 500)
/// 6. CORS guard (foreign origins refused and audited)
/// 7. CORS headers and preflight answers
/// 8. Request timeout
/// 9. Security pipeline (traversal, throttling, input, auth, CSRF, audit)
/// 10. Streaming body limit
pub fn with_middleware(routes: Router<AppState>, state: AppState, config: &ServerConfig) -> Router {
    let request_id_header = HeaderName::from_static("x-request-id");

    routes
        // -- Middleware stack (applied bottom-up) --
        // Bodies without a Content-Length are cut off while streaming.
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        // Security pipeline.
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            security_pipeline,
        ))
        // Request timeout.
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_secs),
        ))
        // CORS.
        .layer(build_cors_layer(config))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            cors_guard,
        ))
        // Panic recovery: catch panics and return 500 JSON.
        .layer(CatchPanicLayer::new())
        // Response headers.
        .layer(axum::middleware::from_fn(response_headers))
        // Propagate request ID to response.
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        // Structured request/response tracing.
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        // Set request ID on incoming requests.
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        // Shared state.
        .with_state(state)
}
