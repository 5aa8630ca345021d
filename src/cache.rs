//! Small expiring key-value cache.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::clock::Clock;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

/// A map whose entries vanish `ttl` after they were first written.
///
/// Updates keep the original expiry; an expired entry is treated as absent
/// and replaced on the next write.
pub struct TtlCache<K, V> {
    entries: Mutex<HashMap<K, Entry<V>>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Read-modify-write of one entry under the cache lock.
    pub fn update(&self, key: K, f: impl FnOnce(Option<&V>) -> V) -> V {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let live = entries.get(&key).filter(|e| e.expires_at > now);
        let expires_at = live.map_or(now + self.ttl, |e| e.expires_at);
        let value = f(live.map(|e| &e.value));
        entries.insert(
            key,
            Entry {
                value: value.clone(),
                expires_at,
            },
        );
        value
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.lock().remove(key).map(|e| e.value)
    }
}
