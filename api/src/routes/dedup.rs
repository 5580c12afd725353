//! Bounded LRU of recent webhook delivery ids.
//!
//! This is the fast path of the at-least-once → at-most-once bridge; the
//! trigger-event table is the durable backstop. Capacity 10 000, entries
//! expire after one hour.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

const CAPACITY: usize = 10_000;
const TTL_MS: i64 = 60 * 60 * 1000;

/// Thread-safe delivery-id cache.
pub struct DeliveryCache {
    inner: Mutex<LruCache<String, i64>>,
    ttl_ms: i64,
}

impl Default for DeliveryCache {
    fn default() -> Self {
        Self::with_ttl(TTL_MS)
    }
}

impl DeliveryCache {
    pub fn with_ttl(ttl_ms: i64) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(
                NonZeroUsize::new(CAPACITY).expect("nonzero capacity"),
            )),
            ttl_ms,
        }
    }

    /// Returns `true` when the id was already seen inside the TTL; always
    /// records the id as fresh.
    pub fn seen_or_insert(&self, delivery_id: &str) -> bool {
        let now = chrono::Utc::now().timestamp_millis();
        let mut cache = self.inner.lock().unwrap();
        let seen = matches!(cache.get(delivery_id), Some(at) if now - at <= self.ttl_ms);
        cache.put(delivery_id.to_string(), now);
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_sighting_is_a_duplicate() {
        let cache = DeliveryCache::default();
        assert!(!cache.seen_or_insert("X"));
        assert!(cache.seen_or_insert("X"));
        assert!(!cache.seen_or_insert("Y"));
    }

    #[test]
    fn expired_entries_do_not_count() {
        let cache = DeliveryCache::with_ttl(0);
        assert!(!cache.seen_or_insert("X"));
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(!cache.seen_or_insert("X"));
    }
}
