//! Route definitions for the `/payment` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::payment;
use crate::state::AppState;

/// Routes mounted at `/payment`.
///
/// ```text
/// POST /create-intent  -> create_intent (requires auth)
/// POST /confirm        -> confirm (requires auth)
/// GET  /methods        -> methods
/// GET  /metrics        -> metrics
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/create-intent", post(payment::create_intent))
        .route("/confirm", post(payment::confirm))
        .route("/methods", get(payment::methods))
        .route("/metrics", get(payment::metrics))
}
