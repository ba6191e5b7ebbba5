//! The security pipeline and the pieces it is built from.
//!
//! - [`security::security_pipeline`] -- The ordered request gate wrapped
//!   around every route.
//! - [`auth::AuthSession`] -- Extracts the session the pipeline validated.
//! - [`client::Client`] -- Extracts the caller's IP and user agent.

pub mod auth;
pub mod client;
pub mod cors;
pub mod headers;
pub mod input;
pub mod rate_limit;
pub mod security;
