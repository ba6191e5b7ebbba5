//! Domain logic for the medical-monitoring intake service.
//!
//! Nothing in this crate knows about HTTP. The api crate wires these
//! services into an axum router and maps [`error::CoreError`] to responses.

pub mod audit;
pub mod clock;
pub mod contact;
pub mod eligibility;
pub mod error;
pub mod hashing;
pub mod otp;
pub mod payment;
pub mod rate_limit;
pub mod reference;
pub mod sanitize;
pub mod session;
pub mod store;
pub mod tokens;
pub mod types;
