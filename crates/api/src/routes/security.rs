//! Route definitions for the `/security` resource.

use axum::routing::get;
use axum::Router;

use crate::handlers::security;
use crate::state::AppState;

/// Routes mounted at `/security`.
///
/// ```text
/// GET /status  -> status
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/status", get(security::status))
}
