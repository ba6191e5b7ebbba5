//! Random identifier generation and HMAC signing utilities.
//!
//! All randomness comes from `rand::rng()`, the thread-local CSPRNG reseeded
//! from the operating system.

use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;

use crate::hashing::{hex_decode, hex_encode};

type HmacSha256 = Hmac<Sha256>;

// ---------------------------------------------------------------------------
// Random values
// ---------------------------------------------------------------------------

/// `len` random bytes rendered as `2 * len` hex characters.
pub fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rng().fill(bytes.as_mut_slice());
    hex_encode(bytes)
}

/// Random lowercase alphanumeric string.
pub fn random_lower_alphanumeric(len: usize) -> String {
    rand::rng()
        .sample_iter(&rand::distr::Alphanumeric)
        .take(len)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

/// Random uppercase alphanumeric string.
pub fn random_upper_alphanumeric(len: usize) -> String {
    rand::rng()
        .sample_iter(&rand::distr::Alphanumeric)
        .take(len)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect()
}

/// Uniformly random zero-padded decimal string of exactly `digits` digits.
pub fn random_digits(digits: u32) -> String {
    let upper = 10u64.pow(digits);
    let value = rand::rng().random_range(0..upper);
    format!("{value:0width$}", width = digits as usize)
}

// ---------------------------------------------------------------------------
// HMAC
// ---------------------------------------------------------------------------

/// HMAC-SHA256 of `payload` under `secret`, hex-encoded.
pub fn sign(secret: &[u8], payload: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    hex_encode(mac.finalize().into_bytes())
}

/// Constant-time check of a hex signature produced by [`sign`].
pub fn verify_signature(secret: &[u8], payload: &str, signature_hex: &str) -> bool {
    let Some(expected) = hex_decode(signature_hex) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    mac.verify_slice(&expected).is_ok()
}
