//! Handlers for the `/session` resource.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use medintake_core::audit::{action_types, resources, AuditEvent, AuditResult, SecurityLevel};
use serde::Serialize;
use serde_json::json;

use crate::error::AppResult;
use crate::middleware::auth::{clear_session_cookie, AuthSession};
use crate::middleware::client::Client;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutResponse {
    pub success: bool,
}

/// POST /api/session/logout
///
/// Invalidate the presenting session and clear the cookie.
pub async fn logout(
    State(state): State<AppState>,
    auth: AuthSession,
    Client(client): Client,
    jar: CookieJar,
) -> AppResult<impl IntoResponse> {
    let removed = state.sessions.invalidate(&auth.token);

    state.audit.record(
        AuditEvent::new(
            action_types::SESSION_INVALIDATED,
            resources::SESSION_STORE,
            AuditResult::Success,
        )
        .with_actor(&auth.session.user_id)
        .with_client(&client)
        .with_level(SecurityLevel::Confidential)
        .with_details(json!({
            "sessionId": auth.session.session_id,
            "removed": removed,
        })),
    );

    Ok((
        jar.add(clear_session_cookie()),
        Json(DataResponse {
            data: LogoutResponse { success: true },
        }),
    ))
}
