//! Structural request checks and body sanitisation.

use axum::body::{Body, Bytes};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::request::Parts;
use axum::http::{HeaderValue, Method};
use medintake_core::sanitize::{json_depth, sanitize_json, MAX_JSON_DEPTH};

const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "application/json",
    "application/x-www-form-urlencoded",
    "multipart/form-data",
];

/// Why a request body was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputRejection {
    #[error("Request body exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("Content type {0} is not accepted")]
    UnsupportedContentType(String),
    #[error("Request body is not valid JSON")]
    MalformedJson,
    #[error("JSON nesting deeper than {} levels", MAX_JSON_DEPTH)]
    TooDeep,
}

impl InputRejection {
    pub fn reason(&self) -> &'static str {
        match self {
            InputRejection::TooLarge { .. } => "body_too_large",
            InputRejection::UnsupportedContentType(_) => "content_type",
            InputRejection::MalformedJson => "malformed_json",
            InputRejection::TooDeep => "json_depth",
        }
    }
}

pub fn carries_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// Reject on a declared `Content-Length` above the cap before reading.
pub fn check_declared_length(parts: &Parts, limit: usize) -> Result<(), InputRejection> {
    let declared = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    match declared {
        Some(len) if len > limit => Err(InputRejection::TooLarge { limit }),
        _ => Ok(()),
    }
}

/// Read the body (bounded), enforce content type and JSON structure, and
/// strip injection payloads from JSON strings. Returns the body to forward
/// and how many strings were cleaned.
pub async fn validate_body(
    parts: &mut Parts,
    body: Body,
    limit: usize,
) -> Result<(Body, usize), InputRejection> {
    let bytes = axum::body::to_bytes(body, limit)
        .await
        .map_err(|_| InputRejection::TooLarge { limit })?;
    if bytes.is_empty() {
        return Ok((Body::empty(), 0));
    }

    let content_type = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if !ALLOWED_CONTENT_TYPES.contains(&mime.as_str()) {
        let shown = if mime.is_empty() { "(none)".to_string() } else { mime };
        return Err(InputRejection::UnsupportedContentType(shown));
    }
    if mime != "application/json" {
        return Ok((Body::from(bytes), 0));
    }

    let mut value: serde_json::Value =
        serde_json::from_slice(&bytes).map_err(|_| InputRejection::MalformedJson)?;
    if json_depth(&value) > MAX_JSON_DEPTH {
        return Err(InputRejection::TooDeep);
    }

    let cleaned = sanitize_json(&mut value);
    if cleaned == 0 {
        return Ok((Body::from(bytes), 0));
    }

    let rewritten = Bytes::from(
        serde_json::to_vec(&value).map_err(|_| InputRejection::MalformedJson)?,
    );
    parts
        .headers
        .insert(CONTENT_LENGTH, HeaderValue::from(rewritten.len()));
    Ok((Body::from(rewritten), cleaned))
}
