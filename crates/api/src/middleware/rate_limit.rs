//! Per-endpoint request ceilings, counted per (client IP, path).

/// Requests per window for paths without their own entry.
pub const DEFAULT_ENDPOINT_LIMIT: u32 = 1000;

const ENDPOINT_LIMITS: &[(&str, u32)] = &[
    ("/api/otp/generate", 5),
    ("/api/otp/verify", 10),
    ("/api/payment/create-intent", 10),
    ("/api/payment/confirm", 3),
    ("/api/eligibility/calculate", 20),
];

pub fn limit_for(path: &str) -> u32 {
    let path = path.trim_end_matches('/');
    ENDPOINT_LIMITS
        .iter()
        .find(|(p, _)| *p == path)
        .map(|(_, limit)| *limit)
        .unwrap_or(DEFAULT_ENDPOINT_LIMIT)
}

/// Limiter key; the prefix keeps it apart from code-issuance keys.
pub fn key(ip: &str, path: &str) -> String {
    format!("endpoint:{ip}:{}", path.trim_end_matches('/'))
}
