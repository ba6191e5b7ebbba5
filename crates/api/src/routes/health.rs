use axum::extract::State;
use axum::http::StatusCode;
use axum::{routing::get, Json, Router};
use medintake_core::types::Timestamp;
use serde::Serialize;

use crate::state::AppState;

/// Reachability of the external collaborators.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentHealth {
    pub code_delivery: bool,
    pub payment_processor: bool,
}

/// Health check response payload.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `healthy` or `unhealthy`.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    pub timestamp: Timestamp,
    pub components: ComponentHealth,
    pub active_sessions: usize,
    pub audit_entries: usize,
}

/// GET /health -- returns service and collaborator health. 503 when any
/// collaborator check fails.
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let code_delivery = state.codes.delivery().health().await;
    let payment_processor = state.payments.processor().health().await;
    let healthy = code_delivery && payment_processor;

    if !healthy {
        tracing::warn!(code_delivery, payment_processor, "Health check failed");
    }

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if healthy { "healthy" } else { "unhealthy" },
            version: env!("CARGO_PKG_VERSION"),
            timestamp: state.clock.now(),
            components: ComponentHealth {
                code_delivery,
                payment_processor,
            },
            active_sessions: state.sessions.active_count(),
            audit_entries: state.audit.len(),
        }),
    )
}

/// Routes mounted at `/health`.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
