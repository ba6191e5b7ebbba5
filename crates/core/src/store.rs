//! Storage contract for the shared mutable tables (rate limits, sessions,
//! verification codes, payment intents).
//!
//! Services only talk to [`KeyValueStore`], so a networked key-value backend
//! can replace [`MemoryStore`] without touching business logic. The in-memory
//! backend stripes keys across independently locked shards: two requests for
//! different keys rarely contend, and every read-modify-write on one key runs
//! under that key's shard lock via [`KeyValueStore::update`].

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard};

use crate::types::Timestamp;

/// Records that carry their own expiry for [`KeyValueStore::sweep_expired`].
pub trait Expiring {
    /// Instant after which the record is dead. `None` never expires.
    fn expires_at(&self) -> Option<Timestamp>;

    fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at().is_some_and(|at| now >= at)
    }
}

pub trait KeyValueStore<V>: Send + Sync {
    fn get(&self, key: &str) -> Option<V>;

    fn set(&self, key: &str, value: V);

    fn delete(&self, key: &str) -> Option<V>;

    /// Atomic read-modify-write of one slot. Setting the slot to `None`
    /// deletes the key.
    fn update(&self, key: &str, f: &mut dyn FnMut(&mut Option<V>));

    /// Drop every record whose expiry has passed. Returns how many went.
    fn sweep_expired(&self, now: Timestamp) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all live values (for metrics, not for hot paths).
    fn values(&self) -> Vec<V>;
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

const DEFAULT_SHARDS: usize = 16;

pub struct MemoryStore<V> {
    shards: Vec<Mutex<HashMap<String, V>>>,
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }
}

impl<V> MemoryStore<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shards(count: usize) -> Self {
        let count = count.max(1);
        Self {
            shards: (0..count).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, key: &str) -> MutexGuard<'_, HashMap<String, V>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.shards.len();
        lock(&self.shards[index])
    }
}

/// A panicking writer never leaves a half-applied record behind (every
/// mutation is a single insert/remove), so a poisoned shard is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl<V> KeyValueStore<V> for MemoryStore<V>
where
    V: Clone + Expiring + Send + Sync,
{
    fn get(&self, key: &str) -> Option<V> {
        self.shard(key).get(key).cloned()
    }

    fn set(&self, key: &str, value: V) {
        self.shard(key).insert(key.to_string(), value);
    }

    fn delete(&self, key: &str) -> Option<V> {
        self.shard(key).remove(key)
    }

    fn update(&self, key: &str, f: &mut dyn FnMut(&mut Option<V>)) {
        let mut shard = self.shard(key);
        let mut slot = shard.remove(key);
        f(&mut slot);
        if let Some(value) = slot {
            shard.insert(key.to_string(), value);
        }
    }

    fn sweep_expired(&self, now: Timestamp) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                let mut map = lock(shard);
                let before = map.len();
                map.retain(|_, v| !v.is_expired(now));
                before - map.len()
            })
            .sum()
    }

    fn len(&self) -> usize {
        self.shards.iter().map(|s| lock(s).len()).sum()
    }

    fn values(&self) -> Vec<V> {
        self.shards
            .iter()
            .flat_map(|s| lock(s).values().cloned().collect::<Vec<_>>())
            .collect()
    }
}
