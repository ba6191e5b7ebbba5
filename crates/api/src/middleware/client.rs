//! Client origin (IP and user agent) of an inbound request.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::header::USER_AGENT;
use axum::http::request::Parts;
use axum::http::{Extensions, HeaderMap};
use medintake_core::types::ClientContext;

use crate::error::AppError;
use crate::state::AppState;

/// Resolve the client context. Forwarding headers are only honoured when the
/// deployment sits behind a trusted proxy.
pub fn resolve(headers: &HeaderMap, extensions: &Extensions, trust_proxy: bool) -> ClientContext {
    let forwarded = trust_proxy
        .then(|| forwarded_ip(headers))
        .flatten();
    let ip = forwarded
        .or_else(|| {
            extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string());

    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|ua| ua.chars().take(512).collect::<String>())
        .unwrap_or_else(|| "unknown".to_string());

    ClientContext::new(ip, user_agent)
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    let first_forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    first_forwarded.or_else(real_ip).map(str::to_string)
}

/// The client context the security pipeline attached to the request.
///
/// ```ignore
/// async fn handler(Client(client): Client) -> AppResult<Json<()>> {
///     tracing::debug!(ip = %client.ip_address, "handling request");
///     Ok(Json(()))
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Client(pub ClientContext);

impl FromRequestParts<AppState> for Client {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let context = match parts.extensions.get::<ClientContext>() {
            Some(context) => context.clone(),
            None => resolve(
                &parts.headers,
                &parts.extensions,
                state.config.trust_proxy_headers,
            ),
        };
        Ok(Client(context))
    }
}
