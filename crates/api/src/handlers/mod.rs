pub mod eligibility;
pub mod fallback;
pub mod otp;
pub mod payment;
pub mod security;
pub mod session;
