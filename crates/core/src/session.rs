//! Opaque bearer-token sessions bound to their originating IP.
//!
//! The token is 256 bits from the CSPRNG, handed to the client once, and
//! stored only as its SHA-256 digest.

use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::hashing::sha256_hex;
use crate::store::{Expiring, KeyValueStore, MemoryStore};
use crate::tokens::random_hex;
use crate::types::Timestamp;

/// Bytes of entropy in a session token.
pub const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub ttl: Duration,
    /// Reject a token presented from a different IP than it was issued to.
    pub bind_ip: bool,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::hours(24),
            bind_ip: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: Uuid,
    pub user_id: String,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    pub ip_address: String,
    pub user_agent: String,
}

impl Expiring for Session {
    fn expires_at(&self) -> Option<Timestamp> {
        Some(self.expires_at)
    }
}

/// A freshly created session and the only copy of its cleartext token.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub session: Session,
}

/// Why a token was refused. Callers surface all three as one uniform
/// "unauthorized" and record the specific reason in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionRejection {
    #[error("session not found")]
    NotFound,
    #[error("session expired")]
    Expired,
    #[error("session presented from a different IP address")]
    IpMismatch,
}

impl SessionRejection {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionRejection::NotFound => "not_found",
            SessionRejection::Expired => "expired",
            SessionRejection::IpMismatch => "ip_mismatch",
        }
    }
}

pub struct SessionStore {
    store: Arc<dyn KeyValueStore<Session>>,
    policy: SessionPolicy,
    clock: SharedClock,
}

impl SessionStore {
    pub fn new(policy: SessionPolicy, clock: SharedClock) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), policy, clock)
    }

    pub fn with_store(
        store: Arc<dyn KeyValueStore<Session>>,
        policy: SessionPolicy,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    pub fn create(&self, user_id: &str, ip: &str, user_agent: &str) -> IssuedSession {
        let now = self.clock.now();
        let token = random_hex(TOKEN_BYTES);
        let session = Session {
            session_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            created_at: now,
            expires_at: now + self.policy.ttl,
            ip_address: ip.to_string(),
            user_agent: user_agent.to_string(),
        };
        self.store.set(&token_key(&token), session.clone());
        IssuedSession { token, session }
    }

    /// Look up a token. An expired session is evicted on the way out.
    pub fn validate(&self, token: &str, ip: &str) -> Result<Session, SessionRejection> {
        let now = self.clock.now();
        let key = token_key(token);
        let mut outcome = Err(SessionRejection::NotFound);

        self.store.update(&key, &mut |slot| {
            outcome = match slot.as_ref() {
                None => Err(SessionRejection::NotFound),
                Some(session) if session.is_expired(now) => Err(SessionRejection::Expired),
                Some(session) if self.policy.bind_ip && session.ip_address != ip => {
                    Err(SessionRejection::IpMismatch)
                }
                Some(session) => Ok(session.clone()),
            };
            if matches!(outcome, Err(SessionRejection::Expired)) {
                *slot = None;
            }
        });

        outcome
    }

    /// Destroy a session. Returns whether one existed.
    pub fn invalidate(&self, token: &str) -> bool {
        self.store.delete(&token_key(token)).is_some()
    }

    pub fn sweep(&self) -> usize {
        self.store.sweep_expired(self.clock.now())
    }

    pub fn active_count(&self) -> usize {
        let now = self.clock.now();
        self.store
            .values()
            .iter()
            .filter(|s| !s.is_expired(now))
            .count()
    }
}

fn token_key(token: &str) -> String {
    sha256_hex(token.as_bytes())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;

    use super::*;
    use crate::clock::{Clock, ManualClock};

    fn store(policy: SessionPolicy) -> (SessionStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        (SessionStore::new(policy, clock.clone()), clock)
    }

    #[test]
    fn token_has_256_bits() {
        let (sessions, _) = store(SessionPolicy::default());
        let issued = sessions.create("usr_1", "10.0.0.1", "ua");
        assert_eq!(issued.token.len(), TOKEN_BYTES * 2);
        assert!(issued.token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn valid_token_from_same_ip_is_accepted() {
        let (sessions, clock) = store(SessionPolicy::default());
        let issued = sessions.create("usr_1", "10.0.0.1", "ua");
        let session = sessions.validate(&issued.token, "10.0.0.1").unwrap();
        assert_eq!(session.user_id, "usr_1");
        assert_eq!(session.expires_at, clock.now() + Duration::hours(24));
    }

    #[test]
    fn rejection_reasons_are_distinct() {
        let (sessions, clock) = store(SessionPolicy::default());
        let issued = sessions.create("usr_1", "10.0.0.1", "ua");

        assert_matches!(
            sessions.validate("deadbeef", "10.0.0.1"),
            Err(SessionRejection::NotFound)
        );
        assert_matches!(
            sessions.validate(&issued.token, "10.0.0.2"),
            Err(SessionRejection::IpMismatch)
        );

        clock.advance(Duration::hours(24));
        assert_matches!(
            sessions.validate(&issued.token, "10.0.0.1"),
            Err(SessionRejection::Expired)
        );
        // Evicted on expiry.
        assert_matches!(
            sessions.validate(&issued.token, "10.0.0.1"),
            Err(SessionRejection::NotFound)
        );
    }

    #[test]
    fn ip_binding_can_be_disabled() {
        let (sessions, _) = store(SessionPolicy {
            bind_ip: false,
            ..SessionPolicy::default()
        });
        let issued = sessions.create("usr_1", "10.0.0.1", "ua");
        assert!(sessions.validate(&issued.token, "192.168.1.1").is_ok());
    }

    #[test]
    fn invalidate_destroys_session() {
        let (sessions, _) = store(SessionPolicy::default());
        let issued = sessions.create("usr_1", "10.0.0.1", "ua");
        assert!(sessions.invalidate(&issued.token));
        assert!(!sessions.invalidate(&issued.token));
        assert_matches!(
            sessions.validate(&issued.token, "10.0.0.1"),
            Err(SessionRejection::NotFound)
        );
    }

    #[test]
    fn sweep_and_active_count() {
        let (sessions, clock) = store(SessionPolicy::default());
        sessions.create("a", "ip", "ua");
        clock.advance(Duration::hours(12));
        sessions.create("b", "ip", "ua");
        assert_eq!(sessions.active_count(), 2);

        clock.advance(Duration::hours(13));
        assert_eq!(sessions.active_count(), 1);
        assert_eq!(sessions.sweep(), 1);
    }
}
