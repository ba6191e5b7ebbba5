//! Route definitions for the `/eligibility` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::eligibility;
use crate::state::AppState;

/// Routes mounted at `/eligibility`.
///
/// ```text
/// POST /calculate            -> calculate (requires auth)
/// POST /referral             -> referral (requires auth)
/// GET  /insurance-providers  -> insurance_providers
/// GET  /metrics              -> metrics
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/calculate", post(eligibility::calculate))
        .route("/referral", post(eligibility::referral))
        .route("/insurance-providers", get(eligibility::insurance_providers))
        .route("/metrics", get(eligibility::metrics))
}
