//! Argon2id hashing for verification codes.
//!
//! Six-digit codes have a tiny keyspace, so the at-rest hash must be slow
//! and salted. Hashes use the PHC string format, which embeds the salt and
//! cost parameters, so verification does not depend on current settings.
//! Salts come from the same thread-local CSPRNG as the codes.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::Rng;

use crate::error::{CoreError, CoreResult};

/// Salt length in bytes (the PHC recommended 16).
const SALT_LEN: usize = 16;

#[derive(Debug, Clone)]
pub struct CodeHasher {
    params: Params,
}

impl CodeHasher {
    /// `memory_kib` and `iterations` are the Argon2id memory and time costs.
    pub fn new(memory_kib: u32, iterations: u32) -> CoreResult<Self> {
        let params = Params::new(memory_kib, iterations, 1, None)
            .map_err(|e| CoreError::Internal(format!("Invalid Argon2 parameters: {e}")))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    pub fn hash(&self, code: &str) -> CoreResult<String> {
        let mut salt_bytes = [0u8; SALT_LEN];
        rand::rng().fill(&mut salt_bytes);
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| CoreError::Internal(format!("Salt encoding failed: {e}")))?;
        self.argon2()
            .hash_password(code.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| CoreError::Internal(format!("Code hashing failed: {e}")))
    }

    /// Returns `Ok(false)` on a mismatch and `Err` only for a corrupt hash.
    pub fn verify(&self, code: &str, hash: &str) -> CoreResult<bool> {
        let parsed = PasswordHash::new(hash)
            .map_err(|e| CoreError::Internal(format!("Stored code hash is corrupt: {e}")))?;
        match self.argon2().verify_password(code.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(CoreError::Internal(format!("Code verification failed: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> CodeHasher {
        CodeHasher::new(Params::MIN_M_COST, 1).unwrap()
    }

    #[test]
    fn hash_and_verify() {
        let hasher = fast();
        let hash = hasher.hash("042917").unwrap();
        assert!(hash.starts_with("$argon2id$"), "expected argon2id PHC prefix");
        assert!(!hash.contains("042917"));
        assert!(hasher.verify("042917", &hash).unwrap());
    }

    #[test]
    fn wrong_code_fails() {
        let hasher = fast();
        let hash = hasher.hash("111111").unwrap();
        assert!(!hasher.verify("111112", &hash).unwrap());
    }

    #[test]
    fn same_code_hashes_differently() {
        let hasher = fast();
        assert_ne!(hasher.hash("123456").unwrap(), hasher.hash("123456").unwrap());
    }

    #[test]
    fn corrupt_hash_is_an_error() {
        assert!(fast().verify("123456", "not-a-phc-string").is_err());
    }

    #[test]
    fn rejects_impossible_parameters() {
        assert!(CodeHasher::new(0, 0).is_err());
    }
}
