use cachefabric_core::{fingerprint, CacheValue};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
struct Entry {
    value: CacheValue,
    expires_at: Instant,
    fingerprint: u64,
}

/// Bounded key/value map with TTL expiry and unchanged-value detection.
///
/// All operations are thread-safe. Critical sections are short and contain
/// no I/O; eviction work is bounded by the capacity.
pub struct LocalCache {
    capacity: usize,
    default_ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl LocalCache {
    /// Creates a cache bounded to `capacity` entries, with `default_ttl`
    /// applied to puts that do not carry their own TTL.
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            default_ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the value for `key` if present and unexpired.
    ///
    /// Expired entries are evicted lazily on access.
    pub fn get(&self, key: &str) -> Option<CacheValue> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Inserts or replaces `key`. When the insert pushes the map over
    /// capacity, the oldest ~10% of entries by expiry are evicted.
    pub fn put(&self, key: impl Into<String>, value: CacheValue, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let entry = Entry {
            fingerprint: fingerprint(&value),
            value,
            expires_at: Instant::now() + ttl,
        };

        let mut entries = self.entries.lock().unwrap();
        entries.insert(key.into(), entry);
        if entries.len() > self.capacity {
            Self::evict_oldest(&mut entries, self.capacity);
        }
    }

    /// Removes `key` unconditionally.
    pub fn delete(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }

    /// Returns true iff an unexpired entry for `key` exists and its stored
    /// fingerprint equals `value`'s. Side-effect free: expired entries are
    /// left in place for the next `get` or eviction pass to reap.
    pub fn is_unchanged(&self, key: &str, value: &CacheValue) -> bool {
        let entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                entry.fingerprint == fingerprint(value)
            }
            _ => false,
        }
    }

    /// Current number of entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Returns true when the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    fn evict_oldest(entries: &mut HashMap<String, Entry>, capacity: usize) {
        // Evict a tenth of capacity in one pass so back-to-back inserts at
        // the cap don't pay a sort each time.
        let batch = (capacity / 10).max(1);
        let overflow = entries.len().saturating_sub(capacity);
        let to_remove = batch.max(overflow);

        let mut by_expiry: Vec<(String, Instant)> = entries
            .iter()
            .map(|(k, e)| (k.clone(), e.expires_at))
            .collect();
        by_expiry.sort_by_key(|(_, expires_at)| *expires_at);

        let victims: Vec<String> = by_expiry
            .into_iter()
            .take(to_remove)
            .map(|(k, _)| k)
            .collect();
        for key in &victims {
            entries.remove(key);
        }
        tracing::debug!(evicted = victims.len(), size = entries.len(), "l1 eviction");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn put_get_round_trip() {
        let cache = LocalCache::new(10, Duration::from_secs(10));
        cache.put("k1", CacheValue::Json(json!({"a": 1})), None);
        assert_eq!(cache.get("k1"), Some(CacheValue::Json(json!({"a": 1}))));
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn expired_entries_never_surface() {
        let cache = LocalCache::new(10, Duration::from_secs(10));
        cache.put("k1", "v".into(), Some(Duration::from_millis(10)));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("k1"), None);
        // lazy eviction removed it
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn delete_removes_entry() {
        let cache = LocalCache::new(10, Duration::from_secs(10));
        cache.put("k1", "v".into(), None);
        cache.delete("k1");
        assert_eq!(cache.get("k1"), None);
    }

    #[test]
    fn over_capacity_evicts_oldest_by_expiry() {
        let cache = LocalCache::new(10, Duration::from_secs(10));
        // Entry expiring soonest should be the first evicted.
        cache.put("soon", "v".into(), Some(Duration::from_secs(1)));
        for i in 0..10 {
            cache.put(format!("k{i}"), "v".into(), Some(Duration::from_secs(60)));
        }
        assert!(cache.len() <= 10);
        assert_eq!(cache.get("soon"), None);
        assert!(cache.get("k9").is_some());
    }

    #[test]
    fn is_unchanged_matches_fingerprints() {
        let cache = LocalCache::new(10, Duration::from_secs(10));
        cache.put("k1", CacheValue::Json(json!({"a": 1})), None);

        assert!(cache.is_unchanged("k1", &CacheValue::Json(json!({"a": 1}))));
        assert!(!cache.is_unchanged("k1", &CacheValue::Json(json!({"a": 2}))));
        assert!(!cache.is_unchanged("other", &CacheValue::Json(json!({"a": 1}))));
    }

    #[test]
    fn is_unchanged_is_false_after_expiry() {
        let cache = LocalCache::new(10, Duration::from_secs(10));
        cache.put("k1", "v".into(), Some(Duration::from_millis(10)));
        std::thread::sleep(Duration::from_millis(20));
        assert!(!cache.is_unchanged("k1", &"v".into()));
        // and it had no side effect
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn replacing_a_key_does_not_grow_the_map() {
        let cache = LocalCache::new(10, Duration::from_secs(10));
        for _ in 0..100 {
            cache.put("same", "v".into(), None);
        }
        assert_eq!(cache.len(), 1);
    }
}
