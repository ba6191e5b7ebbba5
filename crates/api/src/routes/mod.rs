pub mod eligibility;
pub mod health;
pub mod otp;
pub mod payment;
pub mod security;
pub mod session;

use axum::Router;

use crate::state::AppState;

/// Build the `/api` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /health                            component health (public)
///
/// /security/status                   security counters, last hour (public)
///
/// /otp/generate                      issue a code (POST)
/// /otp/verify                        verify a code, open a session (POST)
/// /otp/status                        issuance allowance (GET)
/// /otp/metrics                       code metrics (GET)
///
/// /payment/create-intent             create or replay an intent (POST, auth)
/// /payment/confirm                   charge an intent (POST, auth)
/// /payment/methods                   supported rails (GET)
/// /payment/metrics                   intent metrics (GET)
///
/// /eligibility/calculate             score and pathway (POST, auth)
/// /eligibility/referral              GP referral document (POST, auth)
/// /eligibility/insurance-providers   insurer table (GET)
/// /eligibility/metrics               pathway/urgency distribution (GET)
///
/// /session/logout                    invalidate the session (POST, auth)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .nest("/security", security::router())
        .nest("/otp", otp::router())
        .nest("/payment", payment::router())
        .nest("/eligibility", eligibility::router())
        .nest("/session", session::router())
}
