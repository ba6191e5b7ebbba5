//! Route definitions for the `/otp` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::otp;
use crate::state::AppState;

/// Routes mounted at `/otp`.
///
/// ```text
/// POST /generate  -> generate
/// POST /verify    -> verify
/// GET  /status    -> status
/// GET  /metrics   -> metrics
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/generate", post(otp::generate))
        .route("/verify", post(otp::verify))
        .route("/status", get(otp::status))
        .route("/metrics", get(otp::metrics))
}
