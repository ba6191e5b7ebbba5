//! Route definitions for the `/session` resource.

use axum::routing::post;
use axum::Router;

use crate::handlers::session;
use crate::state::AppState;

/// Routes mounted at `/session`.
///
/// ```text
/// POST /logout  -> logout (requires auth)
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/logout", post(session::logout))
}
