//! Sliding-window rate limiter with a hard block list.
//!
//! Each key (an identity string such as `ip`, `contact:ip` or `ip:path`)
//! keeps the timestamped attempts that fall inside the rolling window. Once
//! the counted attempts reach the ceiling the key is blocked for a fixed
//! duration, independent of the window; while blocked, checks return
//! immediately without looking at the window.

use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;

use crate::clock::SharedClock;
use crate::store::{Expiring, KeyValueStore, MemoryStore};
use crate::types::{CodePurpose, Timestamp};

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    /// Rolling window over which attempts are counted.
    pub window: Duration,
    /// How long a key stays blocked once it hits its ceiling.
    pub block_duration: Duration,
    /// Failed attempts permitted per window for ordinary purposes.
    pub default_ceiling: u32,
    /// Failed attempts permitted per window for medical access.
    pub medical_ceiling: u32,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            window: Duration::minutes(60),
            block_duration: Duration::minutes(10),
            default_ceiling: 5,
            medical_ceiling: 3,
        }
    }
}

impl RateLimitPolicy {
    pub fn ceiling_for(&self, purpose: CodePurpose) -> u32 {
        if purpose.is_medical() {
            self.medical_ceiling
        } else {
            self.default_ceiling
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    pub at: Timestamp,
    pub success: bool,
}

#[derive(Debug, Clone)]
pub struct RateLimitRecord {
    pub attempts: Vec<Attempt>,
    pub blocked: bool,
    pub block_expiry: Option<Timestamp>,
    /// When the record stops carrying any information (last attempt has left
    /// the window and no block is active).
    stale_after: Timestamp,
}

impl RateLimitRecord {
    fn new(now: Timestamp, window: Duration) -> Self {
        Self {
            attempts: Vec::new(),
            blocked: false,
            block_expiry: None,
            stale_after: now + window,
        }
    }

    fn purge(&mut self, now: Timestamp, window: Duration) {
        // An attempt exactly one window old no longer counts.
        self.attempts.retain(|a| now - a.at < window);
    }

    fn failed_count(&self) -> u32 {
        self.attempts.iter().filter(|a| !a.success).count() as u32
    }

    fn touch(&mut self, now: Timestamp, window: Duration) {
        let last = self.attempts.iter().map(|a| a.at).max().unwrap_or(now);
        let mut stale = last + window;
        if let Some(expiry) = self.block_expiry {
            stale = stale.max(expiry);
        }
        self.stale_after = stale;
    }

    /// Lift an elapsed block. Keeps the invariant that `blocked` implies a
    /// future `block_expiry`.
    fn release_elapsed_block(&mut self, now: Timestamp) {
        if self.blocked && self.block_expiry.is_none_or(|exp| exp <= now) {
            self.blocked = false;
            self.block_expiry = None;
        }
    }
}

impl Expiring for RateLimitRecord {
    fn expires_at(&self) -> Option<Timestamp> {
        Some(self.stale_after)
    }
}

/// Outcome of a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatus {
    pub blocked: bool,
    pub attempts_remaining: u32,
    /// When the block lifts, or when the oldest counted attempt leaves the
    /// window.
    pub reset_at: Timestamp,
    pub limit: u32,
}

// ---------------------------------------------------------------------------
// Limiter
// ---------------------------------------------------------------------------

pub struct RateLimiter {
    store: Arc<dyn KeyValueStore<RateLimitRecord>>,
    policy: RateLimitPolicy,
    clock: SharedClock,
}

enum Counting {
    /// Only failed outcomes count toward the ceiling.
    Failures,
    /// Every request counts, and this one is recorded.
    Requests,
    /// Only failed outcomes count, and this call is recorded as one.
    Reservation,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy, clock: SharedClock) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), policy, clock)
    }

    pub fn with_store(
        store: Arc<dyn KeyValueStore<RateLimitRecord>>,
        policy: RateLimitPolicy,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Evaluate failed attempts for `key` against the purpose's ceiling.
    pub fn check(&self, key: &str, purpose: CodePurpose) -> RateLimitStatus {
        self.evaluate(key, self.policy.ceiling_for(purpose), Counting::Failures)
    }

    /// Record the outcome of an attempt. A success lifts any active block
    /// but leaves the failure history in place.
    pub fn record(&self, key: &str, success: bool) {
        let now = self.clock.now();
        let window = self.policy.window;
        self.store.update(key, &mut |slot| {
            let record = slot.get_or_insert_with(|| RateLimitRecord::new(now, window));
            record.purge(now, window);
            record.attempts.push(Attempt { at: now, success });
            if success {
                record.blocked = false;
                record.block_expiry = None;
            }
            record.touch(now, window);
        });
    }

    /// Check the purpose's ceiling and, when the key is not blocked, count
    /// this call as a failed attempt in the same step. Concurrent callers
    /// cannot all slip past the ceiling between a check and a record.
    pub fn reserve(&self, key: &str, purpose: CodePurpose) -> RateLimitStatus {
        self.evaluate(key, self.policy.ceiling_for(purpose), Counting::Reservation)
    }

    /// Give back the most recent reservation on `key`, for work that never
    /// completed.
    pub fn refund(&self, key: &str) {
        let now = self.clock.now();
        let window = self.policy.window;
        self.store.update(key, &mut |slot| {
            let Some(record) = slot.as_mut() else {
                return;
            };
            if let Some(pos) = record.attempts.iter().rposition(|a| !a.success) {
                record.attempts.remove(pos);
            }
            record.touch(now, window);
        });
    }

    /// Count this request against `limit` and record it, atomically. Used
    /// for per-endpoint request throttling where every call counts.
    pub fn hit(&self, key: &str, limit: u32) -> RateLimitStatus {
        self.evaluate(key, limit, Counting::Requests)
    }

    /// Drop records that no longer carry a window or block.
    pub fn sweep(&self) -> usize {
        self.store.sweep_expired(self.clock.now())
    }

    pub fn tracked_keys(&self) -> usize {
        self.store.len()
    }

    /// Number of keys currently under an active block.
    pub fn blocked_keys(&self) -> usize {
        let now = self.clock.now();
        self.store
            .values()
            .iter()
            .filter(|r| r.blocked && r.block_expiry.is_some_and(|exp| exp > now))
            .count()
    }

    fn evaluate(&self, key: &str, ceiling: u32, counting: Counting) -> RateLimitStatus {
        let now = self.clock.now();
        let window = self.policy.window;
        let block_duration = self.policy.block_duration;
        let mut status = None;

        self.store.update(key, &mut |slot| {
            let record = slot.get_or_insert_with(|| RateLimitRecord::new(now, window));

            record.release_elapsed_block(now);
            if record.blocked {
                status = Some(RateLimitStatus {
                    blocked: true,
                    attempts_remaining: 0,
                    reset_at: record.block_expiry.unwrap_or(now + block_duration),
                    limit: ceiling,
                });
                return;
            }

            record.purge(now, window);
            let counted = match counting {
                Counting::Failures | Counting::Reservation => record.failed_count(),
                Counting::Requests => record.attempts.len() as u32,
            };

            if counted >= ceiling {
                let expiry = now + block_duration;
                record.blocked = true;
                record.block_expiry = Some(expiry);
                record.touch(now, window);
                status = Some(RateLimitStatus {
                    blocked: true,
                    attempts_remaining: 0,
                    reset_at: expiry,
                    limit: ceiling,
                });
                return;
            }

            let used = match counting {
                Counting::Failures => counted,
                Counting::Requests => {
                    record.attempts.push(Attempt {
                        at: now,
                        success: true,
                    });
                    counted + 1
                }
                Counting::Reservation => {
                    record.attempts.push(Attempt {
                        at: now,
                        success: false,
                    });
                    counted + 1
                }
            };
            record.touch(now, window);

            let oldest = record.attempts.iter().map(|a| a.at).min().unwrap_or(now);
            status = Some(RateLimitStatus {
                blocked: false,
                attempts_remaining: ceiling.saturating_sub(used),
                reset_at: oldest + window,
                limit: ceiling,
            });
        });

        status.unwrap_or(RateLimitStatus {
            blocked: false,
            attempts_remaining: ceiling,
            reset_at: now + window,
            limit: ceiling,
        })
    }
}
