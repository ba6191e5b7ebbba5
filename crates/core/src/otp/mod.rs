//! One-time verification codes proving control of an email address or phone.
//!
//! Codes are six random digits, hashed with Argon2id before they touch the
//! code table, and never logged. Two independent limits apply:
//!
//! - issuance is gated by the [`RateLimiter`] per (contact, client IP), so a
//!   caller cannot spray codes at a mailbox or enumerate contacts;
//! - each issued code tolerates a fixed number of verification guesses, after
//!   which it is destroyed.
//!
//! A successful verification consumes the code and opens a [`Session`](crate::session::Session).

pub mod delivery;
pub mod hasher;

use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use serde_json::json;

use crate::audit::{action_types, resources, AuditEvent, AuditLog, AuditResult, SecurityLevel};
use crate::clock::SharedClock;
use crate::contact::{mask_contact, normalize_contact};
use crate::error::{CoreError, CoreResult};
use crate::hashing::sha256_hex;
use crate::rate_limit::{RateLimitStatus, RateLimiter};
use crate::session::{IssuedSession, SessionStore};
use crate::store::{Expiring, KeyValueStore, MemoryStore};
use crate::tokens::random_digits;
use crate::types::{ClientContext, CodePurpose, ContactMethod, Timestamp};

use delivery::{CodeDelivery, CodeMessage};
use hasher::CodeHasher;

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CodePolicy {
    pub code_length: u32,
    pub expiry: Duration,
    pub medical_expiry: Duration,
    /// Verification guesses allowed per issued code.
    pub max_attempts: u32,
    /// Argon2id memory cost in KiB.
    pub hash_memory_kib: u32,
    /// Argon2id time cost.
    pub hash_iterations: u32,
}

impl Default for CodePolicy {
    fn default() -> Self {
        Self {
            code_length: 6,
            expiry: Duration::minutes(10),
            medical_expiry: Duration::minutes(5),
            max_attempts: 5,
            hash_memory_kib: 19_456,
            hash_iterations: 2,
        }
    }
}

impl CodePolicy {
    pub fn expiry_for(&self, purpose: CodePurpose) -> Duration {
        if purpose.is_medical() {
            self.medical_expiry
        } else {
            self.expiry
        }
    }
}

// ---------------------------------------------------------------------------
// Records and results
// ---------------------------------------------------------------------------

/// A live code. Only the hash is held.
#[derive(Debug, Clone)]
pub struct VerificationCode {
    pub code_hash: String,
    pub contact_value: String,
    pub contact_method: ContactMethod,
    pub purpose: CodePurpose,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    pub attempts: u32,
}

impl Expiring for VerificationCode {
    fn expires_at(&self) -> Option<Timestamp> {
        Some(self.expires_at)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedCode {
    pub expires_at: Timestamp,
    /// Issuances left for this contact and client before the limiter blocks.
    pub attempts_remaining: u32,
}

#[derive(Debug, Clone)]
pub struct VerifiedCode {
    pub session: IssuedSession,
    /// Guesses that were still available on the consumed code.
    pub attempts_remaining: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeMetrics {
    pub active_codes: usize,
    pub issued_last_hour: u64,
    pub verified_last_hour: u64,
    pub failed_last_hour: u64,
    pub rate_limited_last_hour: u64,
}

/// What the atomic attempt-increment step decided.
enum AttemptOutcome {
    Missing,
    Expired,
    Exhausted { attempts: u32 },
    Compare { code_hash: String, attempts: u32 },
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct CodeVerificationService {
    codes: Arc<dyn KeyValueStore<VerificationCode>>,
    rate_limiter: Arc<RateLimiter>,
    sessions: Arc<SessionStore>,
    audit: Arc<AuditLog>,
    delivery: Arc<dyn CodeDelivery>,
    hasher: CodeHasher,
    policy: CodePolicy,
    clock: SharedClock,
}

impl CodeVerificationService {
    pub fn new(
        policy: CodePolicy,
        rate_limiter: Arc<RateLimiter>,
        sessions: Arc<SessionStore>,
        audit: Arc<AuditLog>,
        delivery: Arc<dyn CodeDelivery>,
        clock: SharedClock,
    ) -> CoreResult<Self> {
        let hasher = CodeHasher::new(policy.hash_memory_kib, policy.hash_iterations)?;
        Ok(Self {
            codes: Arc::new(MemoryStore::new()),
            rate_limiter,
            sessions,
            audit,
            delivery,
            hasher,
            policy,
            clock,
        })
    }

    /// Replace the code table backend.
    pub fn with_store(mut self, codes: Arc<dyn KeyValueStore<VerificationCode>>) -> Self {
        self.codes = codes;
        self
    }

    pub fn policy(&self) -> &CodePolicy {
        &self.policy
    }

    pub fn delivery(&self) -> &Arc<dyn CodeDelivery> {
        &self.delivery
    }

    // -----------------------------------------------------------------------
    // Issuance
    // -----------------------------------------------------------------------

    pub async fn issue(
        &self,
        method: ContactMethod,
        contact_value: &str,
        purpose: CodePurpose,
        client: &ClientContext,
    ) -> CoreResult<IssuedCode> {
        // 1. Validate and normalise the contact.
        let contact = match normalize_contact(method, contact_value) {
            Ok(c) => c,
            Err(e) => {
                self.audit_code(
                    action_types::OTP_GENERATION_FAILED,
                    AuditResult::Failure,
                    client,
                    json!({
                        "reason": "invalid_contact",
                        "contactMethod": method.as_str(),
                        "contact": mask_contact(contact_value),
                        "purpose": purpose.as_str(),
                    }),
                );
                return Err(e);
            }
        };
        let masked = mask_contact(&contact);

        // 2. Gate issuance per (contact, client IP). The slot is taken now
        // and handed back if the code never reaches the gateway.
        let limit_key = issuance_key(&contact, &client.ip_address);
        let status = self.rate_limiter.reserve(&limit_key, purpose);
        if status.blocked {
            self.audit_code(
                action_types::OTP_RATE_LIMITED,
                AuditResult::Blocked,
                client,
                json!({
                    "contact": masked,
                    "purpose": purpose.as_str(),
                    "resetAt": status.reset_at,
                }),
            );
            return Err(CoreError::RateLimited {
                message: "Too many verification codes requested. Try again later.".into(),
                retry_at: Some(status.reset_at),
            });
        }

        // 3. Generate and hash off the async runtime, outside any lock.
        let code = random_digits(self.policy.code_length);
        let code_hash = match self.hash_code(code.clone()).await {
            Ok(hash) => hash,
            Err(e) => {
                self.rate_limiter.refund(&limit_key);
                return Err(e);
            }
        };

        // 4. Replace any previous live code for this (contact, purpose).
        let now = self.clock.now();
        let expires_at = now + self.policy.expiry_for(purpose);
        let key = code_key(&contact, purpose);
        self.codes.set(
            &key,
            VerificationCode {
                code_hash: code_hash.clone(),
                contact_value: contact.clone(),
                contact_method: method,
                purpose,
                created_at: now,
                expires_at,
                attempts: 0,
            },
        );

        // 5. Hand off to the gateway.
        let message = CodeMessage {
            method,
            contact: &contact,
            code: &code,
            purpose,
            expires_at,
        };
        if let Err(e) = self.delivery.deliver(message).await {
            self.remove_if_current(&key, &code_hash);
            self.rate_limiter.refund(&limit_key);
            self.audit_code(
                action_types::OTP_GENERATION_FAILED,
                AuditResult::Failure,
                client,
                json!({
                    "reason": "delivery_failed",
                    "contact": masked,
                    "purpose": purpose.as_str(),
                    "error": e.to_string(),
                }),
            );
            return Err(CoreError::Internal(format!("Code delivery failed: {e}")));
        }

        self.audit_code(
            action_types::OTP_GENERATED,
            AuditResult::Success,
            client,
            json!({
                "contact": masked,
                "contactMethod": method.as_str(),
                "purpose": purpose.as_str(),
                "expiresAt": expires_at,
            }),
        );

        Ok(IssuedCode {
            expires_at,
            attempts_remaining: status.attempts_remaining,
        })
    }

    // -----------------------------------------------------------------------
    // Verification
    // -----------------------------------------------------------------------

    pub async fn verify(
        &self,
        method: ContactMethod,
        contact_value: &str,
        code: &str,
        purpose: CodePurpose,
        client: &ClientContext,
    ) -> CoreResult<VerifiedCode> {
        let contact = match normalize_contact(method, contact_value) {
            Ok(c) => c,
            Err(e) => {
                let masked = mask_contact(contact_value);
                self.audit_verification_failure(client, &masked, purpose, "invalid_contact", None);
                return Err(e);
            }
        };
        let masked = mask_contact(&contact);
        if code.len() != self.policy.code_length as usize || !code.bytes().all(|b| b.is_ascii_digit())
        {
            self.audit_verification_failure(client, &masked, purpose, "malformed_code", None);
            return Err(CoreError::Validation(format!(
                "Verification code must be exactly {} digits",
                self.policy.code_length
            )));
        }

        let key = code_key(&contact, purpose);
        let max_attempts = self.policy.max_attempts;

        // 1. Atomically bump the attempt counter (or discard a dead code).
        match self.register_attempt(&key, max_attempts) {
            AttemptOutcome::Missing => {
                self.audit_verification_failure(client, &masked, purpose, "not_found", None);
                Err(CoreError::not_found("verification code", masked))
            }
            AttemptOutcome::Expired => {
                self.audit_verification_failure(client, &masked, purpose, "expired", None);
                Err(CoreError::Expired {
                    entity: "verification code",
                })
            }
            AttemptOutcome::Exhausted { attempts } => {
                self.audit_code(
                    action_types::OTP_ATTEMPTS_EXCEEDED,
                    AuditResult::Blocked,
                    client,
                    json!({
                        "contact": masked,
                        "purpose": purpose.as_str(),
                        "attempts": attempts,
                    }),
                );
                Err(CoreError::RateLimited {
                    message: "Too many verification attempts. Request a new code.".into(),
                    retry_at: None,
                })
            }
            AttemptOutcome::Compare {
                code_hash,
                attempts,
            } => {
                let attempts_remaining = max_attempts.saturating_sub(attempts);

                // 2. Compare outside the table lock.
                if !self.verify_code(code.to_string(), code_hash.clone()).await? {
                    self.audit_verification_failure(
                        client,
                        &masked,
                        purpose,
                        "invalid_code",
                        Some(attempts),
                    );
                    return Err(CoreError::InvalidCode { attempts_remaining });
                }

                // 3. Consume. Only the caller that removes this exact code wins.
                if !self.remove_if_current(&key, &code_hash) {
                    self.audit_verification_failure(client, &masked, purpose, "already_used", None);
                    return Err(CoreError::not_found("verification code", masked));
                }

                // 4. Lift any issuance block and open a session.
                self.rate_limiter
                    .record(&issuance_key(&contact, &client.ip_address), true);
                let user_id = pseudonymous_user_id(&contact);
                let session =
                    self.sessions
                        .create(&user_id, &client.ip_address, &client.user_agent);

                self.audit.record(
                    AuditEvent::new(
                        action_types::SESSION_CREATED,
                        resources::SESSION_STORE,
                        AuditResult::Success,
                    )
                    .with_actor(&user_id)
                    .with_client(client)
                    .with_level(SecurityLevel::Confidential)
                    .with_details(json!({
                        "sessionId": session.session.session_id,
                        "expiresAt": session.session.expires_at,
                    })),
                );
                self.audit.record(
                    AuditEvent::new(
                        action_types::OTP_VERIFIED,
                        resources::OTP_SERVICE,
                        AuditResult::Success,
                    )
                    .with_actor(&user_id)
                    .with_client(client)
                    .with_level(SecurityLevel::Confidential)
                    .with_details(json!({
                        "contact": masked,
                        "purpose": purpose.as_str(),
                        "attempts": attempts,
                    })),
                );

                Ok(VerifiedCode {
                    session,
                    attempts_remaining,
                })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Status and housekeeping
    // -----------------------------------------------------------------------

    /// Issuance allowance for a contact from one client.
    pub fn issuance_status(
        &self,
        method: ContactMethod,
        contact_value: &str,
        purpose: CodePurpose,
        client: &ClientContext,
    ) -> CoreResult<RateLimitStatus> {
        let contact = normalize_contact(method, contact_value)?;
        Ok(self
            .rate_limiter
            .check(&issuance_key(&contact, &client.ip_address), purpose))
    }

    pub fn sweep(&self) -> usize {
        self.codes.sweep_expired(self.clock.now())
    }

    pub fn metrics(&self) -> CodeMetrics {
        let now = self.clock.now();
        let summary = self.audit.summary(now - Duration::hours(1));
        CodeMetrics {
            active_codes: self
                .codes
                .values()
                .iter()
                .filter(|c| !c.is_expired(now))
                .count(),
            issued_last_hour: summary.action(action_types::OTP_GENERATED),
            verified_last_hour: summary.action(action_types::OTP_VERIFIED),
            failed_last_hour: summary.action(action_types::OTP_VERIFICATION_FAILED),
            rate_limited_last_hour: summary.action(action_types::OTP_RATE_LIMITED)
                + summary.action(action_types::OTP_ATTEMPTS_EXCEEDED),
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn register_attempt(&self, key: &str, max_attempts: u32) -> AttemptOutcome {
        let now = self.clock.now();
        let mut outcome = AttemptOutcome::Missing;
        self.codes.update(key, &mut |slot| {
            let Some(record) = slot.as_mut() else {
                outcome = AttemptOutcome::Missing;
                return;
            };
            if record.is_expired(now) {
                *slot = None;
                outcome = AttemptOutcome::Expired;
                return;
            }
            record.attempts += 1;
            if record.attempts > max_attempts {
                let attempts = record.attempts;
                *slot = None;
                outcome = AttemptOutcome::Exhausted { attempts };
                return;
            }
            outcome = AttemptOutcome::Compare {
                code_hash: record.code_hash.clone(),
                attempts: record.attempts,
            };
        });
        outcome
    }

    /// Remove `key` only if it still holds the code identified by `code_hash`.
    fn remove_if_current(&self, key: &str, code_hash: &str) -> bool {
        let mut removed = false;
        self.codes.update(key, &mut |slot| {
            if slot.as_ref().is_some_and(|c| c.code_hash == code_hash) {
                *slot = None;
                removed = true;
            }
        });
        removed
    }

    async fn hash_code(&self, code: String) -> CoreResult<String> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&code))
            .await
            .map_err(|e| CoreError::Internal(format!("Hashing task failed: {e}")))?
    }

    async fn verify_code(&self, code: String, code_hash: String) -> CoreResult<bool> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&code, &code_hash))
            .await
            .map_err(|e| CoreError::Internal(format!("Verification task failed: {e}")))?
    }

    fn audit_code(
        &self,
        action: &'static str,
        result: AuditResult,
        client: &ClientContext,
        details: serde_json::Value,
    ) {
        self.audit.record(
            AuditEvent::new(action, resources::OTP_SERVICE, result)
                .with_client(client)
                .with_level(SecurityLevel::Confidential)
                .with_details(details),
        );
    }

    fn audit_verification_failure(
        &self,
        client: &ClientContext,
        masked: &str,
        purpose: CodePurpose,
        reason: &str,
        attempts: Option<u32>,
    ) {
        self.audit_code(
            action_types::OTP_VERIFICATION_FAILED,
            AuditResult::Failure,
            client,
            json!({
                "reason": reason,
                "contact": masked,
                "purpose": purpose.as_str(),
                "attempts": attempts,
            }),
        );
    }
}

fn code_key(contact: &str, purpose: CodePurpose) -> String {
    format!("{contact}:{}", purpose.as_str())
}

fn issuance_key(contact: &str, ip: &str) -> String {
    format!("otp_issue:{contact}:{ip}")
}

/// Stable identifier derived from the contact so sessions never carry it in
/// cleartext.
pub fn pseudonymous_user_id(contact: &str) -> String {
    format!("usr_{}", &sha256_hex(contact.as_bytes())[..24])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
