use std::str::FromStr;

use medintake_core::eligibility::scoring::EligibilityPolicy;
use medintake_core::otp::CodePolicy;
use medintake_core::payment::fraud::FraudPolicy;
use medintake_core::payment::PaymentPolicy;
use medintake_core::rate_limit::RateLimitPolicy;
use medintake_core::session::SessionPolicy;
use medintake_core::tokens::random_hex;

/// Origins allowed when `CORS_ORIGINS` is not set.
pub const DEFAULT_CORS_ORIGINS: &str = "https://skiin.ch,https://www.skiin.ch,https://*.skiin.ch,\
http://localhost:8080,http://localhost:8081,http://localhost:3000";

/// Path prefixes that require a valid session when `PROTECTED_PREFIXES` is
/// not set.
pub const DEFAULT_PROTECTED_PREFIXES: &str =
    "/api/eligibility/,/api/payment/,/api/user/,/api/session/";

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins. Entries may use a `*.` subdomain wildcard.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Largest accepted request body (default: 1 MiB).
    pub max_body_bytes: usize,
    /// Key for session cookie signatures and CSRF tokens.
    pub session_secret: String,
    /// Take the client IP from `X-Forwarded-For` / `X-Real-IP`.
    pub trust_proxy_headers: bool,
    /// Paths under these prefixes require a session.
    pub protected_prefixes: Vec<String>,
    /// Reject sessions presented from another IP than they were issued to.
    pub session_bind_ip: bool,
    /// Argon2id memory cost for verification code hashes.
    pub otp_hash_memory_kib: u32,
    /// Argon2id time cost for verification code hashes.
    pub otp_hash_iterations: u32,
    pub otp_max_attempts: u32,
    pub fraud_block_threshold: u8,
    pub payment_max_attempts: u32,
    pub eligibility_referral_threshold: u8,
    /// Audit ring size.
    pub audit_capacity: usize,
    /// Interval of the expired-record sweep in seconds.
    pub sweep_interval_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default                         |
    /// |----------------------------------|---------------------------------|
    /// | `HOST`                           | `0.0.0.0`                       |
    /// | `PORT`                           | `3000`                          |
    /// | `CORS_ORIGINS`                   | skiin.ch origins + localhost    |
    /// | `REQUEST_TIMEOUT_SECS`           | `30`                            |
    /// | `MAX_BODY_BYTES`                 | `1048576`                       |
    /// | `SESSION_SECRET`                 | random per process              |
    /// | `TRUST_PROXY_HEADERS`            | `false`                         |
    /// | `PROTECTED_PREFIXES`             | eligibility, payment, user, session |
    /// | `SESSION_BIND_IP`                | `true`                          |
    /// | `OTP_HASH_MEMORY_KIB`            | `19456`                         |
    /// | `OTP_HASH_ITERATIONS`            | `2`                             |
    /// | `OTP_MAX_ATTEMPTS`               | `5`                             |
    /// | `FRAUD_BLOCK_THRESHOLD`          | `75`                            |
    /// | `PAYMENT_MAX_ATTEMPTS`           | `3`                             |
    /// | `ELIGIBILITY_REFERRAL_THRESHOLD` | `60`                            |
    /// | `AUDIT_CAPACITY`                 | `10000`                         |
    /// | `SWEEP_INTERVAL_SECS`            | `60`                            |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins = list_from_env("CORS_ORIGINS", DEFAULT_CORS_ORIGINS);
        let protected_prefixes = list_from_env("PROTECTED_PREFIXES", DEFAULT_PROTECTED_PREFIXES);

        let session_secret = match std::env::var("SESSION_SECRET") {
            Ok(secret) if !secret.trim().is_empty() => secret,
            _ => {
                tracing::warn!(
                    "SESSION_SECRET not set; using a random secret, sessions will not survive a restart"
                );
                random_hex(32)
            }
        };

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs: parse_env("REQUEST_TIMEOUT_SECS", 30),
            max_body_bytes: parse_env("MAX_BODY_BYTES", 1024 * 1024),
            session_secret,
            trust_proxy_headers: parse_env("TRUST_PROXY_HEADERS", false),
            protected_prefixes,
            session_bind_ip: parse_env("SESSION_BIND_IP", true),
            otp_hash_memory_kib: parse_env("OTP_HASH_MEMORY_KIB", 19_456),
            otp_hash_iterations: parse_env("OTP_HASH_ITERATIONS", 2),
            otp_max_attempts: parse_env("OTP_MAX_ATTEMPTS", 5),
            fraud_block_threshold: parse_env("FRAUD_BLOCK_THRESHOLD", 75),
            payment_max_attempts: parse_env("PAYMENT_MAX_ATTEMPTS", 3),
            eligibility_referral_threshold: parse_env("ELIGIBILITY_REFERRAL_THRESHOLD", 60),
            audit_capacity: parse_env("AUDIT_CAPACITY", 10_000),
            sweep_interval_secs: parse_env("SWEEP_INTERVAL_SECS", 60),
        }
    }

    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy::default()
    }

    pub fn session_policy(&self) -> SessionPolicy {
        SessionPolicy {
            bind_ip: self.session_bind_ip,
            ..SessionPolicy::default()
        }
    }

    pub fn code_policy(&self) -> CodePolicy {
        CodePolicy {
            max_attempts: self.otp_max_attempts,
            hash_memory_kib: self.otp_hash_memory_kib,
            hash_iterations: self.otp_hash_iterations,
            ..CodePolicy::default()
        }
    }

    pub fn payment_policy(&self) -> PaymentPolicy {
        PaymentPolicy {
            max_confirm_attempts: self.payment_max_attempts,
            ..PaymentPolicy::default()
        }
    }

    pub fn fraud_policy(&self) -> FraudPolicy {
        FraudPolicy {
            block_threshold: self.fraud_block_threshold,
            ..FraudPolicy::default()
        }
    }

    pub fn eligibility_policy(&self) -> EligibilityPolicy {
        EligibilityPolicy {
            referral_threshold: self.eligibility_referral_threshold,
            ..EligibilityPolicy::default()
        }
    }

    /// Whether `path` sits under one of the protected prefixes.
    pub fn is_protected(&self, path: &str) -> bool {
        self.protected_prefixes.iter().any(|p| path.starts_with(p.as_str()))
    }
}

fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a valid {}", std::any::type_name::<T>())),
        Err(_) => default,
    }
}

fn list_from_env(key: &str, default: &str) -> Vec<String> {
    std::env::var(key)
        .unwrap_or_else(|_| default.into())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
