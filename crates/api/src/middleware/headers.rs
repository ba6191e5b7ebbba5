//! Response headers: the security baseline on every response, cache and
//! PCI markers on payment paths, and the rate-limit headers set by the
//! pipeline.

use std::time::{Duration, Instant};

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;

use axum::http::header::{
    CACHE_CONTROL, CONTENT_SECURITY_POLICY, EXPIRES, PRAGMA, REFERRER_POLICY,
    STRICT_TRANSPORT_SECURITY, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS, X_XSS_PROTECTION,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use medintake_core::rate_limit::RateLimitStatus;

pub const API_VERSION: &str = "1.0";

const CONTENT_SECURITY_POLICY_VALUE: &str = "default-src 'self'; \
script-src 'self' 'unsafe-inline' https://js.stripe.com; \
style-src 'self' 'unsafe-inline'; \
img-src 'self' data: https:; \
connect-src 'self' https://api.stripe.com";

static X_API_VERSION: HeaderName = HeaderName::from_static("x-api-version");
static X_RESPONSE_TIME: HeaderName = HeaderName::from_static("x-response-time");
static X_PCI_COMPLIANT: HeaderName = HeaderName::from_static("x-pci-compliant");
static X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
static X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
static X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Baseline headers on every response.
pub fn apply_security(headers: &mut HeaderMap) {
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(X_XSS_PROTECTION, HeaderValue::from_static("1; mode=block"));
    headers.insert(
        STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=31536000; includeSubDomains; preload"),
    );
    headers.insert(
        CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(CONTENT_SECURITY_POLICY_VALUE),
    );
    headers.insert(
        REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(X_API_VERSION.clone(), HeaderValue::from_static(API_VERSION));
}

/// No caching and the PCI marker on payment paths.
pub fn apply_payment(headers: &mut HeaderMap) {
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("no-store, no-cache, must-revalidate, proxy-revalidate"),
    );
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(EXPIRES, HeaderValue::from_static("0"));
    headers.insert(X_PCI_COMPLIANT.clone(), HeaderValue::from_static("1"));
}

pub fn apply_rate_limit(headers: &mut HeaderMap, status: &RateLimitStatus) {
    let pairs = [
        (&X_RATELIMIT_LIMIT, status.limit.to_string()),
        (&X_RATELIMIT_REMAINING, status.attempts_remaining.to_string()),
        (&X_RATELIMIT_RESET, status.reset_at.timestamp().to_string()),
    ];
    for (name, value) in pairs {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name.clone(), value);
        }
    }
}

/// Outermost header layer, so timeouts and refusals get the baseline too.
pub async fn response_headers(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let payment = is_payment_path(request.uri().path());

    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    apply_security(headers);
    if payment {
        apply_payment(headers);
    }
    apply_response_time(headers, started.elapsed());
    response
}

pub fn is_payment_path(path: &str) -> bool {
    path.starts_with("/api/payment")
}

pub fn apply_response_time(headers: &mut HeaderMap, elapsed: Duration) {
    let value = format!("{:.3}ms", elapsed.as_secs_f64() * 1000.0);
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_RESPONSE_TIME.clone(), value);
    }
}
