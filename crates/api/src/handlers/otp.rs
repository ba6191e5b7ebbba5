//! Handlers for the `/otp` resource (verification code issue and verify).

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use medintake_core::otp::CodeMetrics;
use medintake_core::rate_limit::RateLimitStatus;
use medintake_core::types::{CodePurpose, ContactMethod, Timestamp};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::extract::{ApiJson, ApiQuery};
use crate::middleware::auth::{csrf_token, session_cookie};
use crate::middleware::client::Client;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Request body for `POST /api/otp/generate`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GenerateCodeRequest {
    pub contact_method: ContactMethod,
    pub contact_value: String,
    pub purpose: CodePurpose,
}

/// Request body for `POST /api/otp/verify`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VerifyCodeRequest {
    pub contact_method: ContactMethod,
    pub contact_value: String,
    pub code: String,
    pub purpose: CodePurpose,
}

impl std::fmt::Debug for VerifyCodeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifyCodeRequest")
            .field("contact_method", &self.contact_method)
            .field("purpose", &self.purpose)
            .field("code", &"***")
            .finish_non_exhaustive()
    }
}

/// Query for `GET /api/otp/status`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    pub contact_value: String,
    /// Inferred from the value when absent.
    pub contact_method: Option<ContactMethod>,
    #[serde(default = "default_purpose")]
    pub purpose: CodePurpose,
}

fn default_purpose() -> CodePurpose {
    CodePurpose::ContactVerification
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateCodeResponse {
    pub success: bool,
    pub message: &'static str,
    pub expires_at: Timestamp,
    pub attempts_remaining: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyCodeResponse {
    pub success: bool,
    pub session_token: String,
    pub csrf_token: String,
    pub user_id: String,
    pub expires_at: Timestamp,
    pub attempts_remaining: u32,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/otp/generate
///
/// Issue a one-time code to an email address or Swiss phone number.
pub async fn generate(
    State(state): State<AppState>,
    Client(client): Client,
    ApiJson(input): ApiJson<GenerateCodeRequest>,
) -> AppResult<Json<DataResponse<GenerateCodeResponse>>> {
    let issued = state
        .codes
        .issue(input.contact_method, &input.contact_value, input.purpose, &client)
        .await?;

    Ok(Json(DataResponse {
        data: GenerateCodeResponse {
            success: true,
            message: "Verification code sent",
            expires_at: issued.expires_at,
            attempts_remaining: issued.attempts_remaining,
        },
    }))
}

/// POST /api/otp/verify
///
/// Check a code. On success opens a session, returns its token with the
/// matching CSRF token and sets the signed session cookie.
pub async fn verify(
    State(state): State<AppState>,
    Client(client): Client,
    jar: CookieJar,
    ApiJson(input): ApiJson<VerifyCodeRequest>,
) -> AppResult<impl IntoResponse> {
    // 1. Verify and consume the code.
    let verified = state
        .codes
        .verify(
            input.contact_method,
            &input.contact_value,
            &input.code,
            input.purpose,
            &client,
        )
        .await?;

    // 2. Derive the transport artefacts for the new session.
    let secret = &state.config.session_secret;
    let token = verified.session.token;
    let session = verified.session.session;
    let max_age = state.sessions.policy().ttl.num_seconds();
    let cookie = session_cookie(&token, secret, max_age);

    tracing::info!(
        user_id = %session.user_id,
        session_id = %session.session_id,
        "Session opened after code verification"
    );

    Ok((
        jar.add(cookie),
        Json(DataResponse {
            data: VerifyCodeResponse {
                success: true,
                csrf_token: csrf_token(secret, &token),
                session_token: token,
                user_id: session.user_id,
                expires_at: session.expires_at,
                attempts_remaining: verified.attempts_remaining,
            },
        }),
    ))
}

/// GET /api/otp/status
///
/// Issuance allowance left for a contact from the calling client.
pub async fn status(
    State(state): State<AppState>,
    Client(client): Client,
    ApiQuery(query): ApiQuery<StatusQuery>,
) -> AppResult<Json<DataResponse<RateLimitStatus>>> {
    let method = query.contact_method.unwrap_or_else(|| {
        if query.contact_value.contains('@') {
            ContactMethod::Email
        } else {
            ContactMethod::Phone
        }
    });
    let status = state
        .codes
        .issuance_status(method, &query.contact_value, query.purpose, &client)?;
    Ok(Json(DataResponse { data: status }))
}

/// GET /api/otp/metrics
pub async fn metrics(State(state): State<AppState>) -> Json<DataResponse<CodeMetrics>> {
    Json(DataResponse {
        data: state.codes.metrics(),
    })
}
