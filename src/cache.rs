//! In-memory TTL cache.
//!
//! Entries expire on a monotonic clock and are evicted lazily on the first
//! read after expiry; there is no background sweeper.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry<T> {
    value: T,
    expires_at: Instant,
}

/// String-keyed store with per-entry TTL. All operations are serialized on an
/// internal mutex.
pub struct Cache<T> {
    entries: Mutex<HashMap<String, Entry<T>>>,
}

impl<T: Clone> Cache<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the value stored under `key` if it has not expired. An expired
    /// entry is removed before returning `None`.
    pub fn get(&self, key: &str) -> Option<T> {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        match entries.get(key) {
            Some(entry) if Instant::now() < entry.expires_at => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Stores `value` under `key`, overwriting any previous entry. A zero
    /// `ttl` produces an entry that is already expired and never observable.
    pub fn set(&self, key: impl Into<String>, value: T, ttl: Duration) {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        entries.insert(
            key.into(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Removes all entries.
    pub fn clear(&self) {
        self.entries.lock().expect("cache mutex poisoned").clear();
    }
}

impl<T: Clone> Default for Cache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_value_within_ttl() {
        let cache = Cache::new();
        cache.set("k", 1u32, Duration::from_secs(60));
        assert_eq!(cache.get("k"), Some(1));
    }

    #[test]
    fn get_misses_after_expiry_and_evicts() {
        let cache = Cache::new();
        cache.set("k", 1u32, Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("k"), None);
        // Entry was evicted, not merely hidden.
        assert!(cache.entries.lock().unwrap().is_empty());
    }

    #[test]
    fn zero_ttl_is_never_observable() {
        let cache = Cache::new();
        cache.set("k", 1u32, Duration::ZERO);
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn set_overwrites() {
        let cache = Cache::new();
        cache.set("k", 1u32, Duration::from_secs(60));
        cache.set("k", 2u32, Duration::from_secs(60));
        assert_eq!(cache.get("k"), Some(2));
    }

    #[test]
    fn clear_removes_everything() {
        let cache = Cache::new();
        cache.set("a", 1u32, Duration::from_secs(60));
        cache.set("b", 2u32, Duration::from_secs(60));
        cache.clear();
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), None);
    }
}
