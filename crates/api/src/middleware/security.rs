//! The request security pipeline.
//!
//! [`cors_guard`] runs ahead of the CORS layer and refuses foreign origins.
//! [`security_pipeline`] then runs its stages in a fixed order, and any of
//! them may answer the request itself:
//!
//! 1. Path traversal check
//! 2. Endpoint rate limit per (client IP, path)
//! 3. Body size, content type, JSON depth and sanitisation
//! 4. Session authentication on protected paths
//! 5. CSRF check on state-changing methods
//! 6. The wrapped handler
//! 7. Cardholder-data scrubbing on payment responses
//!
//! Every early exit is audited as `blocked` and the handler path as
//! `request_processed`. A panic anywhere below the pipeline is caught,
//! audited as `middleware_error` and answered with a generic 500.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures::FutureExt;
use medintake_core::audit::{
    action_types, resources, scrub_cardholder_data, AuditEvent, AuditResult, SecurityLevel,
};
use medintake_core::error::CoreError;
use medintake_core::rate_limit::RateLimitStatus;
use medintake_core::sanitize::has_path_traversal;
use medintake_core::types::ClientContext;
use serde_json::{json, Value};

use super::auth::{self, AuthSession, PresentedToken, CSRF_HEADER};
use super::headers::is_payment_path;
use super::{client, cors, headers, input, rate_limit};
use crate::error::{apply_retry_after, AppError};
use crate::state::AppState;

/// Read-only paths under protected prefixes that stay public.
const PUBLIC_PATHS: &[&str] = &["/api/payment/methods", "/api/eligibility/insurance-providers"];

/// Facts gathered on the way in that shape the response on the way out.
#[derive(Debug, Default)]
struct Annotations {
    rate_limit: Option<RateLimitStatus>,
}

/// Refuse cross-origin requests the allow-list does not cover. Allowed
/// preflights go on to the CORS layer and are answered with 204.
pub async fn cors_guard(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let decision = cors::evaluate(
        request.method(),
        request.headers(),
        &state.config.cors_origins,
    );
    match decision {
        cors::CorsDecision::SameOrigin | cors::CorsDecision::Allowed => next.run(request).await,
        cors::CorsDecision::Preflight => {
            let mut response = next.run(request).await;
            if response.status() == StatusCode::OK {
                *response.status_mut() = StatusCode::NO_CONTENT;
            }
            response
        }
        cors::CorsDecision::Denied(reason) => {
            let client = client::resolve(
                request.headers(),
                request.extensions(),
                state.config.trust_proxy_headers,
            );
            deny(
                &state,
                &client,
                action_types::CORS_BLOCKED,
                json!({
                    "reason": &reason,
                    "method": request.method().as_str(),
                    "path": request.uri().path(),
                }),
                AppError::CorsBlocked(reason),
            )
        }
    }
}

pub async fn security_pipeline(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let client = client::resolve(
        request.headers(),
        request.extensions(),
        state.config.trust_proxy_headers,
    );
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let mut notes = Annotations::default();

    let outcome = AssertUnwindSafe(run(&state, &client, &mut notes, request, next))
        .catch_unwind()
        .await;

    let mut response = match outcome {
        Ok(response) => response,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            state.audit.record(
                AuditEvent::new(
                    action_types::MIDDLEWARE_ERROR,
                    resources::SECURITY_MIDDLEWARE,
                    AuditResult::Failure,
                )
                .with_client(&client)
                .with_level(SecurityLevel::Confidential)
                .with_details(json!({
                    "method": method.as_str(),
                    "path": path,
                    "error": message,
                })),
            );
            AppError::InternalError(format!("panic while serving {method} {path}: {message}"))
                .into_response()
        }
    };

    if let Some(status) = &notes.rate_limit {
        headers::apply_rate_limit(response.headers_mut(), status);
    }
    apply_retry_after(&mut response, state.clock.now());
    response
}

async fn run(
    state: &AppState,
    client: &ClientContext,
    notes: &mut Annotations,
    request: Request,
    next: Next,
) -> Response {
    let config = &state.config;
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    // 1. Path traversal.
    if has_path_traversal(&path) {
        return deny(
            state,
            client,
            action_types::REQUEST_VALIDATION_FAILED,
            json!({ "reason": "path_traversal", "method": method.as_str(), "path": path }),
            CoreError::Validation("Invalid request path".into()).into(),
        );
    }

    // 2. Endpoint rate limit.
    let limit = rate_limit::limit_for(&path);
    let status = state
        .rate_limiter
        .hit(&rate_limit::key(&client.ip_address, &path), limit);
    notes.rate_limit = Some(status);
    if status.blocked {
        return deny(
            state,
            client,
            action_types::RATE_LIMIT_EXCEEDED,
            json!({ "path": path, "limit": limit, "resetAt": status.reset_at }),
            CoreError::RateLimited {
                message: "Too many requests. Please try again later.".into(),
                retry_at: Some(status.reset_at),
            }
            .into(),
        );
    }

    // 3. Structural input validation and sanitisation.
    let (mut parts, body) = request.into_parts();
    let body = if input::carries_body(&method) {
        let checked = match input::check_declared_length(&parts, config.max_body_bytes) {
            Ok(()) => input::validate_body(&mut parts, body, config.max_body_bytes).await,
            Err(rejection) => Err(rejection),
        };
        match checked {
            Ok((body, cleaned)) => {
                if cleaned > 0 {
                    tracing::warn!(
                        path = %path,
                        ip = %client.ip_address,
                        cleaned,
                        "Stripped injection payloads from request body"
                    );
                }
                body
            }
            Err(rejection) => {
                return deny(
                    state,
                    client,
                    action_types::REQUEST_VALIDATION_FAILED,
                    json!({ "reason": rejection.reason(), "method": method.as_str(), "path": path }),
                    CoreError::Validation(rejection.to_string()).into(),
                );
            }
        }
    } else {
        body
    };
    let mut request = Request::from_parts(parts, body);

    // 4. Authentication.
    let mut session_token = None;
    if requires_session(state, &path) {
        let token = match auth::presented_token(request.headers(), &config.session_secret) {
            PresentedToken::Token(token) => token,
            PresentedToken::Missing => {
                return deny_auth(state, client, &path, "missing_token");
            }
            PresentedToken::BadSignature => {
                return deny_auth(state, client, &path, "bad_signature");
            }
        };
        match state.sessions.validate(&token, &client.ip_address) {
            Ok(session) => {
                request.extensions_mut().insert(AuthSession {
                    session,
                    token: token.clone(),
                });
                session_token = Some(token);
            }
            Err(rejection) => {
                return deny_auth(state, client, &path, rejection.as_str());
            }
        }
    }

    // 5. CSRF.
    if is_state_changing(&method) {
        let presented = request
            .headers()
            .get(CSRF_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim);
        let passed = match &session_token {
            Some(token) => presented
                .is_some_and(|p| auth::csrf_token_valid(&config.session_secret, token, p)),
            None => presented.is_some() || request.headers().contains_key("x-requested-with"),
        };
        if !passed {
            let reason = if session_token.is_some() {
                "invalid_session_csrf_token"
            } else {
                "missing_custom_header"
            };
            return deny(
                state,
                client,
                action_types::CSRF_VALIDATION_FAILED,
                json!({ "reason": reason, "method": method.as_str(), "path": path }),
                AppError::CsrfFailed("Missing or invalid CSRF token".into()),
            );
        }
    }

    // 6. Handler.
    let actor = request
        .extensions()
        .get::<AuthSession>()
        .map(|auth| auth.session.user_id.clone());
    request.extensions_mut().insert(client.clone());
    let mut response = next.run(request).await;

    // 7. Post-processing.
    if is_payment_path(&path) {
        response = scrub_response(response).await;
    }

    let status = response.status();
    let mut event = AuditEvent::new(
        action_types::REQUEST_PROCESSED,
        resources::SECURITY_MIDDLEWARE,
        if status.is_server_error() {
            AuditResult::Failure
        } else {
            AuditResult::Success
        },
    )
    .with_client(client)
    .with_level(level_for(&path))
    .with_details(json!({
        "method": method.as_str(),
        "path": path,
        "statusCode": status.as_u16(),
    }));
    if let Some(actor) = actor {
        event = event.with_actor(actor);
    }
    state.audit.record(event);

    response
}

fn deny(
    state: &AppState,
    client: &ClientContext,
    action: &'static str,
    details: Value,
    error: AppError,
) -> Response {
    state.audit.record(
        AuditEvent::new(action, resources::SECURITY_MIDDLEWARE, AuditResult::Blocked)
            .with_client(client)
            .with_level(SecurityLevel::Confidential)
            .with_details(details),
    );
    error.into_response()
}

fn deny_auth(state: &AppState, client: &ClientContext, path: &str, reason: &str) -> Response {
    deny(
        state,
        client,
        action_types::AUTHENTICATION_FAILED,
        json!({ "reason": reason, "path": path }),
        CoreError::Unauthorized(reason.to_string()).into(),
    )
}

fn requires_session(state: &AppState, path: &str) -> bool {
    state.config.is_protected(path)
        && !PUBLIC_PATHS.contains(&path.trim_end_matches('/'))
        && !path.trim_end_matches('/').ends_with("/metrics")
}

fn is_state_changing(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

fn level_for(path: &str) -> SecurityLevel {
    if path.starts_with("/api/payment") || path.starts_with("/api/eligibility") {
        SecurityLevel::Restricted
    } else {
        SecurityLevel::Internal
    }
}

/// Remove cardholder fields from a JSON response body.
async fn scrub_response(response: Response) -> Response {
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));
    if !is_json {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return AppError::InternalError(format!("failed to buffer response body: {e}"))
                .into_response();
        }
    };
    let Ok(value) = serde_json::from_slice::<Value>(&bytes) else {
        return Response::from_parts(parts, Body::from(bytes));
    };
    let scrubbed = scrub_cardholder_data(&value);
    if scrubbed == value {
        return Response::from_parts(parts, Body::from(bytes));
    }
    match serde_json::to_vec(&scrubbed) {
        Ok(rewritten) => {
            parts.headers.remove(CONTENT_LENGTH);
            Response::from_parts(parts, Body::from(rewritten))
        }
        Err(e) => AppError::InternalError(format!("failed to encode scrubbed body: {e}"))
            .into_response(),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
