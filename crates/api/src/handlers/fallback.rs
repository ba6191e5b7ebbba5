//! Router fallbacks that keep unmatched requests in the uniform error shape.

use axum::http::{Method, Uri};

use crate::error::AppError;

/// Any path without a route.
pub async fn not_found(uri: Uri) -> AppError {
    AppError::RouteNotFound(uri.path().to_string())
}

/// A known path requested with a method it does not serve. The router adds
/// the `Allow` header.
pub async fn method_not_allowed(method: Method) -> AppError {
    AppError::MethodNotAllowed(method.to_string())
}
