//! Session token transport: headers, the signed cookie and CSRF tokens.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use medintake_core::error::CoreError;
use medintake_core::session::Session;
use medintake_core::tokens::{sign, verify_signature};

use crate::error::AppError;
use crate::state::AppState;

pub const SESSION_COOKIE: &str = "medintake_session";
pub const SESSION_TOKEN_HEADER: &str = "x-session-token";
pub const CSRF_HEADER: &str = "x-csrf-token";

/// What the request offered as a session credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresentedToken {
    Token(String),
    /// Only a cookie was offered and its signature did not verify.
    BadSignature,
    Missing,
}

/// Read the session token from `Authorization: Bearer`, `X-Session-Token`
/// or the signed cookie, in that order.
pub fn presented_token(headers: &HeaderMap, secret: &str) -> PresentedToken {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return PresentedToken::Token(token.to_string());
    }

    let header = headers
        .get(SESSION_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = header {
        return PresentedToken::Token(token.to_string());
    }

    let jar = CookieJar::from_headers(headers);
    match jar.get(SESSION_COOKIE).map(Cookie::value) {
        None => PresentedToken::Missing,
        Some(value) => match value.rsplit_once('.') {
            Some((token, signature)) if verify_signature(secret.as_bytes(), token, signature) => {
                PresentedToken::Token(token.to_string())
            }
            _ => PresentedToken::BadSignature,
        },
    }
}

fn base_cookie(value: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, value))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .build()
}

/// Session cookie carrying `token.signature`.
pub fn session_cookie(token: &str, secret: &str, max_age_secs: i64) -> Cookie<'static> {
    let signature = sign(secret.as_bytes(), token);
    let mut cookie = base_cookie(format!("{token}.{signature}"));
    cookie.set_max_age(time::Duration::seconds(max_age_secs));
    cookie
}

/// Removal cookie for the session cookie. Emitted even when the request
/// authenticated by header, so a stale browser cookie is always cleared.
pub fn clear_session_cookie() -> Cookie<'static> {
    let mut cookie = base_cookie(String::new());
    cookie.make_removal();
    cookie
}

/// CSRF token bound to one session token.
pub fn csrf_token(secret: &str, session_token: &str) -> String {
    sign(secret.as_bytes(), &format!("csrf:{session_token}"))
}

/// Constant-time check of a presented CSRF token.
pub fn csrf_token_valid(secret: &str, session_token: &str, presented: &str) -> bool {
    verify_signature(
        secret.as_bytes(),
        &format!("csrf:{session_token}"),
        presented,
    )
}

/// The session validated by the security pipeline.
///
/// Only present on protected paths; use it as an extractor in handlers that
/// need the caller's identity:
///
/// ```ignore
/// async fn handler(auth: AuthSession) -> AppResult<Json<()>> {
///     tracing::info!(user_id = %auth.session.user_id, "handling request");
///     Ok(Json(()))
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub session: Session,
    /// Cleartext token as presented, needed for logout.
    pub token: String,
}

impl FromRequestParts<AppState> for AuthSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<AuthSession>().cloned().ok_or_else(|| {
            AppError::Core(CoreError::Unauthorized("No validated session".into()))
        })
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    const SECRET: &str = "test-secret";

    fn with(name: &'static str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn bearer_wins_over_other_sources() {
        let mut headers = with("authorization", "Bearer abc");
        headers.insert(SESSION_TOKEN_HEADER, HeaderValue::from_static("def"));
        assert_eq!(
            presented_token(&headers, SECRET),
            PresentedToken::Token("abc".into())
        );
    }

    #[test]
    fn session_header_is_accepted() {
        let headers = with(SESSION_TOKEN_HEADER, "def");
        assert_eq!(
            presented_token(&headers, SECRET),
            PresentedToken::Token("def".into())
        );
    }

    #[test]
    fn signed_cookie_round_trips() {
        let cookie = session_cookie("tok123", SECRET, 86_400);
        let headers = with(
            "cookie",
            &format!("theme=dark; {}", cookie.stripped()),
        );
        assert_eq!(
            presented_token(&headers, SECRET),
            PresentedToken::Token("tok123".into())
        );
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Strict));
        assert_eq!(cookie.max_age(), Some(time::Duration::seconds(86_400)));
    }

    #[test]
    fn session_cookie_is_found_among_repeated_headers() {
        let mut headers = HeaderMap::new();
        headers.append("cookie", HeaderValue::from_static("theme=dark"));
        let cookie = session_cookie("tok456", SECRET, 60);
        headers.append(
            "cookie",
            HeaderValue::from_str(&cookie.stripped().to_string()).unwrap(),
        );
        assert_eq!(
            presented_token(&headers, SECRET),
            PresentedToken::Token("tok456".into())
        );
    }

    #[test]
    fn removal_cookie_expires_immediately() {
        let cookie = clear_session_cookie();
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.max_age(), Some(time::Duration::ZERO));
        assert_eq!(cookie.path(), Some("/"));
    }

    #[test]
    fn tampered_cookie_is_reported() {
        let headers = with("cookie", &format!("{SESSION_COOKIE}=tok123.deadbeef"));
        assert_eq!(presented_token(&headers, SECRET), PresentedToken::BadSignature);

        let unsigned = with("cookie", &format!("{SESSION_COOKIE}=tok123"));
        assert_eq!(presented_token(&unsigned, SECRET), PresentedToken::BadSignature);
    }

    #[test]
    fn nothing_presented() {
        assert_eq!(presented_token(&HeaderMap::new(), SECRET), PresentedToken::Missing);
    }

    #[test]
    fn csrf_token_is_bound_to_session() {
        let token = csrf_token(SECRET, "session-a");
        assert!(csrf_token_valid(SECRET, "session-a", &token));
        assert!(!csrf_token_valid(SECRET, "session-b", &token));
        assert!(!csrf_token_valid("other", "session-a", &token));
        assert!(!csrf_token_valid(SECRET, "session-a", "not-hex"));
    }
}
