//! Tests for `AppError` -> HTTP response mapping.
//!
//! These tests verify that each `AppError` variant produces the correct HTTP
//! status code, error code, and message. They do NOT need an HTTP server --
//! they call `IntoResponse` directly on `AppError` values.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::{Duration, TimeZone, Utc};
use http_body_util::BodyExt;
use medintake_api::error::{apply_retry_after, retry_after_secs, AppError, RetryAt};
use medintake_core::error::{CoreError, FieldViolation};

/// Helper: convert an `AppError` into its status, headers and parsed JSON body.
async fn error_to_response(
    err: AppError,
) -> (StatusCode, axum::http::HeaderMap, serde_json::Value) {
    response_parts(err.into_response()).await
}

async fn response_parts(
    response: axum::response::Response,
) -> (StatusCode, axum::http::HeaderMap, serde_json::Value) {
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    (status, headers, json)
}

// ---------------------------------------------------------------------------
// Test: CoreError::Validation maps to 400 with VALIDATION_ERROR code
// ---------------------------------------------------------------------------

#[tokio::test]
async fn validation_error_returns_400() {
    let err = AppError::Core(CoreError::Validation("Invalid email format".into()));

    let (status, _, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(json["error"]["message"], "Invalid email format");
    assert!(json["error"].get("details").is_none());
}

// ---------------------------------------------------------------------------
// Test: field violations are listed under details.fields
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_fields_list_each_violation() {
    let err = AppError::Core(CoreError::InvalidFields(vec![FieldViolation::new(
        "billingAddress.postalCode",
        "Postal code does not match canton",
    )]));

    let (status, _, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "VALIDATION_ERROR");
    let fields = json["error"]["details"]["fields"].as_array().unwrap();
    assert_eq!(fields.len(), 1);
    assert_eq!(fields[0]["field"], "billingAddress.postalCode");
}

// ---------------------------------------------------------------------------
// Test: a wrong code reports the guesses left
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_code_reports_attempts_remaining() {
    let err = AppError::Core(CoreError::InvalidCode {
        attempts_remaining: 3,
    });

    let (status, _, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "INVALID_CODE");
    assert_eq!(json["error"]["details"]["attemptsRemaining"], 3);
}

// ---------------------------------------------------------------------------
// Test: rate limiting maps to 429 and carries the reset instant
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rate_limited_returns_429_with_retry_at() {
    let reset_at = Utc::now() + Duration::minutes(10);
    let err = AppError::Core(CoreError::RateLimited {
        message: "Too many requests".into(),
        retry_at: Some(reset_at),
    });

    let response = err.into_response();
    assert_eq!(response.extensions().get::<RetryAt>(), Some(&RetryAt(reset_at)));
    let (status, _, json) = response_parts(response).await;

    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json["error"]["code"], "RATE_LIMIT_EXCEEDED");
    assert!(json["error"]["details"]["resetAt"].is_string());
}

// ---------------------------------------------------------------------------
// Test: Retry-After is measured against the supplied clock reading
// ---------------------------------------------------------------------------

#[tokio::test]
async fn retry_after_uses_the_given_now() {
    let now = Utc.with_ymd_and_hms(2026, 6, 15, 9, 0, 0).unwrap();
    let err = AppError::Core(CoreError::RateLimited {
        message: "Too many requests".into(),
        retry_at: Some(now + Duration::minutes(10)),
    });

    let mut response = err.into_response();
    assert!(!response.headers().contains_key("retry-after"));
    apply_retry_after(&mut response, now);

    assert_eq!(response.headers()["retry-after"], "600");
}

// ---------------------------------------------------------------------------
// Test: a reset time in the past still yields a positive Retry-After
// ---------------------------------------------------------------------------

#[tokio::test]
async fn retry_after_is_at_least_one_second() {
    let now = Utc.with_ymd_and_hms(2026, 6, 15, 9, 0, 0).unwrap();
    assert_eq!(retry_after_secs(now - Duration::minutes(1), now), 1);
    assert_eq!(retry_after_secs(now, now), 1);
    assert_eq!(retry_after_secs(now + Duration::seconds(42), now), 42);
}

// ---------------------------------------------------------------------------
// Test: exhausted attempts map to 429 without Retry-After
// ---------------------------------------------------------------------------

#[tokio::test]
async fn attempts_exceeded_returns_429() {
    let err = AppError::Core(CoreError::AttemptsExceeded {
        entity: "Verification code",
    });

    let (status, headers, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json["error"]["code"], "ATTEMPTS_EXCEEDED");
    assert!(!headers.contains_key("retry-after"));
}

// ---------------------------------------------------------------------------
// Test: authentication failures hide the reason
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unauthorized_returns_401_with_generic_message() {
    let err = AppError::Core(CoreError::Unauthorized("ip_mismatch".into()));

    let (status, _, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"]["code"], "UNAUTHORIZED");
    assert_eq!(json["error"]["message"], "Authentication required");
}

// ---------------------------------------------------------------------------
// Test: fraud blocks map to 403 without exposing the score
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fraud_blocked_returns_403_without_score() {
    let err = AppError::Core(CoreError::FraudBlocked { score: 85 });

    let (status, _, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["error"]["code"], "FRAUD_BLOCKED");
    assert!(!json.to_string().contains("85"));
}

// ---------------------------------------------------------------------------
// Test: consent, CORS and CSRF refusals are 403s with distinct codes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn policy_refusals_return_403() {
    let cases = [
        (
            AppError::Core(CoreError::ConsentRequired("Consent is required".into())),
            "CONSENT_REQUIRED",
        ),
        (AppError::CorsBlocked("Origin not allowed".into()), "CORS_BLOCKED"),
        (AppError::CsrfFailed("Missing token".into()), "CSRF_ERROR"),
        (
            AppError::Core(CoreError::Forbidden("Not your intent".into())),
            "FORBIDDEN",
        ),
    ];

    for (err, code) in cases {
        let (status, _, json) = error_to_response(err).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{code}");
        assert_eq!(json["error"]["code"], code);
    }
}

// ---------------------------------------------------------------------------
// Test: expired and missing records map to 404
// ---------------------------------------------------------------------------

#[tokio::test]
async fn not_found_and_expired_return_404() {
    let (status, _, json) = error_to_response(AppError::Core(CoreError::NotFound {
        entity: "Payment intent",
        id: "pi_missing".into(),
    }))
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "NOT_FOUND");
    assert_eq!(json["error"]["message"], "Payment intent not found");

    let (status, _, json) = error_to_response(AppError::Core(CoreError::Expired {
        entity: "Payment intent",
    }))
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "EXPIRED");
}

// ---------------------------------------------------------------------------
// Test: payment-specific 400s keep their own codes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn payment_errors_return_400_with_specific_codes() {
    let (_, _, json) =
        error_to_response(AppError::Core(CoreError::InvalidCard(vec![
            "Invalid card number".into(),
        ])))
        .await;
    assert_eq!(json["error"]["code"], "INVALID_CARD");
    assert_eq!(json["error"]["details"]["errors"][0], "Invalid card number");

    let (status, _, json) =
        error_to_response(AppError::Core(CoreError::IdempotencyConflict)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "IDEMPOTENCY_CONFLICT");

    let (_, _, json) = error_to_response(AppError::Core(CoreError::PaymentDeclined(
        "insufficient funds".into(),
    )))
    .await;
    assert_eq!(json["error"]["code"], "PAYMENT_DECLINED");
}

// ---------------------------------------------------------------------------
// Test: AppError::InternalError maps to 500 and sanitizes the message
// ---------------------------------------------------------------------------

#[tokio::test]
async fn internal_error_returns_500_and_sanitizes_message() {
    let err = AppError::InternalError("session secret leaked in stack trace".into());

    let (status, _, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"]["code"], "INTERNAL_ERROR");
    assert_eq!(json["error"]["message"], "An internal error occurred");
    assert!(!json.to_string().contains("secret"));
}

// ---------------------------------------------------------------------------
// Test: core internal errors are sanitized the same way
// ---------------------------------------------------------------------------

#[tokio::test]
async fn core_internal_error_is_sanitized() {
    let err = AppError::Core(CoreError::Internal("Code delivery failed: smtp".into()));

    let (status, _, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"]["message"], "An internal error occurred");
}
