//! Handlers for the `/security` resource.

use axum::extract::State;
use axum::Json;
use chrono::Duration;
use medintake_core::audit::action_types;
use medintake_core::types::Timestamp;
use serde::Serialize;

use crate::response::DataResponse;
use crate::state::AppState;

/// Security counters over the last hour.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityStatus {
    pub generated_at: Timestamp,
    pub window_minutes: i64,
    pub audit_events: u64,
    pub requests_processed: u64,
    pub blocked: u64,
    pub failures: u64,
    pub rate_limit_hits: u64,
    pub cors_blocked: u64,
    pub csrf_failures: u64,
    pub authentication_failures: u64,
    pub validation_failures: u64,
    pub middleware_errors: u64,
    pub active_sessions: usize,
    pub blocked_keys: usize,
}

const WINDOW_MINUTES: i64 = 60;

/// GET /api/security/status
pub async fn status(State(state): State<AppState>) -> Json<DataResponse<SecurityStatus>> {
    let now = state.clock.now();
    let summary = state.audit.summary(now - Duration::minutes(WINDOW_MINUTES));

    Json(DataResponse {
        data: SecurityStatus {
            generated_at: now,
            window_minutes: WINDOW_MINUTES,
            audit_events: summary.total,
            requests_processed: summary.action(action_types::REQUEST_PROCESSED),
            blocked: summary.blocked,
            failures: summary.failure,
            rate_limit_hits: summary.action(action_types::RATE_LIMIT_EXCEEDED)
                + summary.action(action_types::OTP_RATE_LIMITED),
            cors_blocked: summary.action(action_types::CORS_BLOCKED),
            csrf_failures: summary.action(action_types::CSRF_VALIDATION_FAILED),
            authentication_failures: summary.action(action_types::AUTHENTICATION_FAILED),
            validation_failures: summary.action(action_types::REQUEST_VALIDATION_FAILED),
            middleware_errors: summary.action(action_types::MIDDLEWARE_ERROR),
            active_sessions: state.sessions.active_count(),
            blocked_keys: state.rate_limiter.blocked_keys(),
        },
    })
}
