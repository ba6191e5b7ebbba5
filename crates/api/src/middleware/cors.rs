//! Origin allow-list with `*.` subdomain wildcards.
//!
//! [`build_cors_layer`] emits the `Access-Control-*` headers. Refusals are
//! decided by [`evaluate`] ahead of the layer, so they short-circuit with
//! the uniform error body and land in the audit trail.

use std::sync::Arc;
use std::time::Duration;

use axum::http::header::{
    ACCESS_CONTROL_REQUEST_HEADERS, ACCESS_CONTROL_REQUEST_METHOD, AUTHORIZATION, CONTENT_TYPE,
    ORIGIN, RETRY_AFTER,
};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::config::ServerConfig;

pub const ALLOWED_METHODS: [Method; 5] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::OPTIONS,
];
pub const ALLOWED_HEADERS: [HeaderName; 5] = [
    CONTENT_TYPE,
    AUTHORIZATION,
    HeaderName::from_static("x-requested-with"),
    HeaderName::from_static("x-session-token"),
    HeaderName::from_static("x-csrf-token"),
];
const MAX_AGE: Duration = Duration::from_secs(86_400);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsDecision {
    /// No `Origin` header: a same-origin or non-browser request.
    SameOrigin,
    /// Cross-origin request from an allowed origin.
    Allowed,
    /// Allowed preflight; the CORS layer answers it.
    Preflight,
    Denied(String),
}

pub fn evaluate(method: &Method, headers: &HeaderMap, allowed_origins: &[String]) -> CorsDecision {
    let Some(origin) = headers.get(ORIGIN) else {
        return CorsDecision::SameOrigin;
    };
    let Ok(origin) = origin.to_str() else {
        return CorsDecision::Denied("Malformed Origin header".into());
    };
    if !origin_allowed(origin, allowed_origins) {
        return CorsDecision::Denied(format!("Origin {origin} is not allowed"));
    }

    let requested_method = headers
        .get(ACCESS_CONTROL_REQUEST_METHOD)
        .and_then(|v| v.to_str().ok());
    let Some(requested_method) = requested_method.filter(|_| method == Method::OPTIONS) else {
        return CorsDecision::Allowed;
    };

    if !ALLOWED_METHODS
        .iter()
        .any(|m| m.as_str().eq_ignore_ascii_case(requested_method.trim()))
    {
        return CorsDecision::Denied(format!("Method {requested_method} is not allowed"));
    }

    let requested_headers = headers
        .get(ACCESS_CONTROL_REQUEST_HEADERS)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    for header in requested_headers
        .split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
    {
        if !ALLOWED_HEADERS
            .iter()
            .any(|a| a.as_str().eq_ignore_ascii_case(header))
        {
            return CorsDecision::Denied(format!("Header {header} is not allowed"));
        }
    }

    CorsDecision::Preflight
}

/// Exact match, or `scheme://*.domain` matching any subdomain of `domain`.
pub fn origin_allowed(origin: &str, allowed: &[String]) -> bool {
    allowed.iter().any(|pattern| {
        if pattern == "*" || pattern.eq_ignore_ascii_case(origin) {
            return true;
        }
        let Some((scheme, host_pattern)) = pattern.split_once("://") else {
            return false;
        };
        let Some(domain) = host_pattern.strip_prefix("*.") else {
            return false;
        };
        let Some(rest) = origin.strip_prefix(scheme).and_then(|r| r.strip_prefix("://")) else {
            return false;
        };
        rest.len() > domain.len() + 1
            && rest.to_ascii_lowercase().ends_with(&format!(".{}", domain.to_ascii_lowercase()))
    })
}

/// Build the CORS middleware layer from the configured allow-list.
///
/// The origin is matched with [`origin_allowed`] so wildcard subdomain
/// patterns work alongside exact origins.
pub fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    let origins = Arc::new(config.cors_origins.clone());

    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _parts: &Parts| {
                origin
                    .to_str()
                    .is_ok_and(|origin| origin_allowed(origin, &origins))
            },
        ))
        .allow_methods(ALLOWED_METHODS)
        .allow_headers(ALLOWED_HEADERS)
        .expose_headers([
            RETRY_AFTER,
            HeaderName::from_static("x-request-id"),
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderName::from_static("x-ratelimit-reset"),
        ])
        .allow_credentials(true)
        .max_age(MAX_AGE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origins() -> Vec<String> {
        vec![
            "https://skiin.ch".into(),
            "https://*.skiin.ch".into(),
            "http://localhost:3000".into(),
        ]
    }

    fn request_headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (k, v) in pairs {
            headers.insert(*k, HeaderValue::from_static(v));
        }
        headers
    }

    #[test]
    fn wildcard_matches_subdomains_only() {
        let allowed = origins();
        assert!(origin_allowed("https://app.skiin.ch", &allowed));
        assert!(origin_allowed("https://a.b.skiin.ch", &allowed));
        assert!(origin_allowed("https://skiin.ch", &allowed));
        assert!(!origin_allowed("https://evilskiin.ch", &allowed));
        assert!(!origin_allowed("http://app.skiin.ch", &allowed));
        assert!(!origin_allowed("https://skiin.ch.evil.com", &allowed));
    }

    #[test]
    fn missing_origin_is_same_origin() {
        let decision = evaluate(&Method::POST, &HeaderMap::new(), &origins());
        assert_eq!(decision, CorsDecision::SameOrigin);
    }

    #[test]
    fn allowed_preflight() {
        let headers = request_headers(&[
            ("origin", "http://localhost:3000"),
            ("access-control-request-method", "POST"),
            ("access-control-request-headers", "Content-Type, X-CSRF-Token"),
        ]);
        assert_eq!(
            evaluate(&Method::OPTIONS, &headers, &origins()),
            CorsDecision::Preflight
        );
    }

    #[test]
    fn plain_cross_origin_request_is_allowed() {
        let headers = request_headers(&[("origin", "https://app.skiin.ch")]);
        assert_eq!(
            evaluate(&Method::GET, &headers, &origins()),
            CorsDecision::Allowed
        );
    }

    #[test]
    fn preflight_with_unknown_header_is_denied() {
        let headers = request_headers(&[
            ("origin", "http://localhost:3000"),
            ("access-control-request-method", "POST"),
            ("access-control-request-headers", "X-Debug"),
        ]);
        assert!(matches!(
            evaluate(&Method::OPTIONS, &headers, &origins()),
            CorsDecision::Denied(_)
        ));
    }

    #[test]
    fn preflight_with_patch_is_denied() {
        let headers = request_headers(&[
            ("origin", "https://skiin.ch"),
            ("access-control-request-method", "PATCH"),
        ]);
        assert!(matches!(
            evaluate(&Method::OPTIONS, &headers, &origins()),
            CorsDecision::Denied(_)
        ));
    }

    #[test]
    fn foreign_origin_is_denied() {
        let headers = request_headers(&[("origin", "https://evil.example")]);
        assert!(matches!(
            evaluate(&Method::GET, &headers, &origins()),
            CorsDecision::Denied(_)
        ));
    }
}
