use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use medintake_core::error::CoreError;
use medintake_core::types::Timestamp;
use serde_json::{json, Value};

/// Application-level error type for HTTP handlers and the security pipeline.
///
/// Wraps [`CoreError`] for domain errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce the uniform
/// `{"error": {"code", "message", "details"?}}` body.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `medintake_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Origin, method or header refused by the CORS policy.
    #[error("CORS policy violation: {0}")]
    CorsBlocked(String),

    /// Missing or mismatched CSRF token.
    #[error("CSRF validation failed: {0}")]
    CsrfFailed(String),

    /// No route matches the request path.
    #[error("No route for {0}")]
    RouteNotFound(String),

    /// The path exists but not for this method. The router adds `Allow`.
    #[error("Method {0} not allowed")]
    MethodNotAllowed(String),

    /// A collaborator needed to serve the request is down.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Core(CoreError::Validation(rejection.body_text()))
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Core(CoreError::Validation(rejection.body_text()))
    }
}

const INTERNAL_MESSAGE: &str = "An internal error occurred";

/// When a rate-limited caller may retry. Carried in the response extensions
/// until [`apply_retry_after`] turns it into a header against the service
/// clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAt(pub Timestamp);

/// Seconds until `retry_at`, never less than one.
pub fn retry_after_secs(retry_at: Timestamp, now: Timestamp) -> i64 {
    (retry_at - now).num_seconds().max(1)
}

/// Set `Retry-After` from a [`RetryAt`] extension, if the response has one.
pub fn apply_retry_after(response: &mut Response, now: Timestamp) {
    let Some(RetryAt(at)) = response.extensions().get::<RetryAt>().copied() else {
        return;
    };
    if let Ok(value) = HeaderValue::from_str(&retry_after_secs(at, now).to_string()) {
        response.headers_mut().insert(RETRY_AFTER, value);
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut retry_at: Option<Timestamp> = None;
        let mut details: Option<Value> = None;

        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::InvalidFields(violations) => {
                    details = Some(json!({ "fields": violations }));
                    (
                        StatusCode::BAD_REQUEST,
                        "VALIDATION_ERROR",
                        core.to_string(),
                    )
                }
                CoreError::InvalidCode { attempts_remaining } => {
                    details = Some(json!({ "attemptsRemaining": attempts_remaining }));
                    (StatusCode::BAD_REQUEST, "INVALID_CODE", core.to_string())
                }
                CoreError::InvalidPaymentMethod(_) => (
                    StatusCode::BAD_REQUEST,
                    "INVALID_PAYMENT_METHOD",
                    core.to_string(),
                ),
                CoreError::InvalidCard(errors) => {
                    details = Some(json!({ "errors": errors }));
                    (StatusCode::BAD_REQUEST, "INVALID_CARD", core.to_string())
                }
                CoreError::PaymentDeclined(_) => {
                    (StatusCode::BAD_REQUEST, "PAYMENT_DECLINED", core.to_string())
                }
                CoreError::IdempotencyConflict => (
                    StatusCode::BAD_REQUEST,
                    "IDEMPOTENCY_CONFLICT",
                    core.to_string(),
                ),
                CoreError::RateLimited {
                    message,
                    retry_at: at,
                } => {
                    retry_at = *at;
                    if let Some(at) = at {
                        details = Some(json!({ "resetAt": at }));
                    }
                    (
                        StatusCode::TOO_MANY_REQUESTS,
                        "RATE_LIMIT_EXCEEDED",
                        message.clone(),
                    )
                }
                CoreError::AttemptsExceeded { .. } => (
                    StatusCode::TOO_MANY_REQUESTS,
                    "ATTEMPTS_EXCEEDED",
                    core.to_string(),
                ),
                // The specific reason stays in the audit trail.
                CoreError::Unauthorized(_) => (
                    StatusCode::UNAUTHORIZED,
                    "UNAUTHORIZED",
                    "Authentication required".to_string(),
                ),
                CoreError::ConsentRequired(msg) => {
                    (StatusCode::FORBIDDEN, "CONSENT_REQUIRED", msg.clone())
                }
                CoreError::FraudBlocked { .. } => (
                    StatusCode::FORBIDDEN,
                    "FRAUD_BLOCKED",
                    "The request was declined by our risk checks".to_string(),
                ),
                CoreError::NotFound { entity, .. } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} not found"),
                ),
                CoreError::Expired { .. } => {
                    (StatusCode::NOT_FOUND, "EXPIRED", core.to_string())
                }
                CoreError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
                CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal core error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        INTERNAL_MESSAGE.to_string(),
                    )
                }
            },

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::CorsBlocked(msg) => (StatusCode::FORBIDDEN, "CORS_BLOCKED", msg.clone()),
            AppError::CsrfFailed(msg) => (StatusCode::FORBIDDEN, "CSRF_ERROR", msg.clone()),
            AppError::RouteNotFound(path) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("No route for {path}"),
            ),
            AppError::MethodNotAllowed(method) => (
                StatusCode::METHOD_NOT_ALLOWED,
                "METHOD_NOT_ALLOWED",
                format!("Method {method} not allowed"),
            ),
            AppError::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                msg.clone(),
            ),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    INTERNAL_MESSAGE.to_string(),
                )
            }
        };

        let mut error = json!({
            "code": code,
            "message": message,
        });
        if let Some(details) = details {
            error["details"] = details;
        }

        let mut response = (status, axum::Json(json!({ "error": error }))).into_response();
        if let Some(at) = retry_at {
            response.extensions_mut().insert(RetryAt(at));
        }
        response
    }
}
