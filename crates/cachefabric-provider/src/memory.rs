//! The in-process fallback backend.
//!
//! Every fallback chain terminates here, so this adapter never fails: in
//! degraded "L1-only mode" the fabric keeps serving whatever this map
//! holds. Capacity and eviction mirror the L1 tier.

use crate::{BulkPair, BulkResult, ConnectionInfo, Provider, ProviderId};
use async_trait::async_trait;
use cachefabric_core::{CacheValue, FabricError, ValueKind};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_CAPACITY: usize = 1000;

#[derive(Clone, Debug)]
struct MemEntry {
    value: CacheValue,
    expires_at: Option<Instant>,
}

impl MemEntry {
    fn live(&self) -> bool {
        self.expires_at.map_or(true, |at| at > Instant::now())
    }
}

/// Pure in-process map with the same capacity/eviction rules as the L1
/// tier, used as the primary backend when no remote backend is configured
/// and as the terminal fallback otherwise.
pub struct MemoryProvider {
    capacity: usize,
    entries: Mutex<HashMap<String, MemEntry>>,
}

impl MemoryProvider {
    /// A provider bounded to the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// A provider bounded to `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock_sentinel(key: &str) -> String {
        format!("__lock:{key}")
    }

    fn insert(&self, key: String, value: CacheValue, ttl_secs: Option<u64>) {
        let expires_at = match ttl_secs {
            Some(0) | None => None,
            Some(secs) => Some(Instant::now() + Duration::from_secs(secs)),
        };
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key, MemEntry { value, expires_at });
        if entries.len() > self.capacity {
            Self::evict_oldest(&mut entries, self.capacity);
        }
    }

    fn fetch(&self, key: &str) -> Option<CacheValue> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.live() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn evict_oldest(entries: &mut HashMap<String, MemEntry>, capacity: usize) {
        let batch = (capacity / 10).max(1);
        let far_future = Instant::now() + Duration::from_secs(86_400 * 365);
        let mut by_expiry: Vec<(String, Instant)> = entries
            .iter()
            .map(|(k, e)| (k.clone(), e.expires_at.unwrap_or(far_future)))
            .collect();
        by_expiry.sort_by_key(|(_, at)| *at);
        for (key, _) in by_expiry.into_iter().take(batch) {
            entries.remove(&key);
        }
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    async fn initialize(&self) -> Result<(), FabricError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }

    fn id(&self) -> ProviderId {
        ProviderId::Memory
    }

    async fn get(&self, key: &str, kind: ValueKind) -> Result<Option<CacheValue>, FabricError> {
        Ok(self
            .fetch(key)
            .map(|value| CacheValue::from_wire(value.to_wire(), kind)))
    }

    async fn set(
        &self,
        key: &str,
        value: &CacheValue,
        ttl_secs: Option<u64>,
    ) -> Result<(), FabricError> {
        self.insert(key.to_string(), value.clone(), ttl_secs);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), FabricError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, FabricError> {
        Ok(self.fetch(key).is_some())
    }

    async fn incr(&self, key: &str) -> Result<i64, FabricError> {
        let mut entries = self.entries.lock().unwrap();
        let (current, expires_at) = match entries.get(key) {
            Some(entry) if entry.live() => (
                entry
                    .value
                    .as_i64()
                    .ok_or_else(|| FabricError::client("value is not an integer"))?,
                entry.expires_at,
            ),
            _ => (0, None),
        };
        let next = current + 1;
        entries.insert(
            key.to_string(),
            MemEntry {
                value: CacheValue::Text(next.to_string()),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn lock(&self, key: &str, token: &str, ttl_secs: u64) -> Result<bool, FabricError> {
        let sentinel = Self::lock_sentinel(key);
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get(&sentinel) {
            if entry.live() {
                return Ok(false);
            }
        }
        entries.insert(
            sentinel,
            MemEntry {
                value: CacheValue::Text(token.to_string()),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs.max(1))),
            },
        );
        Ok(true)
    }

    async fn unlock(&self, key: &str, token: &str) -> Result<bool, FabricError> {
        let sentinel = Self::lock_sentinel(key);
        let mut entries = self.entries.lock().unwrap();
        match entries.get(&sentinel) {
            Some(entry) if entry.live() && entry.value == CacheValue::Text(token.to_string()) => {
                entries.remove(&sentinel);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_keys(&self, prefix: &str, limit: usize) -> Result<Vec<String>, FabricError> {
        let entries = self.entries.lock().unwrap();
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(k, e)| e.live() && k.starts_with(prefix) && !k.starts_with("__lock:"))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        if limit > 0 {
            keys.truncate(limit);
        }
        Ok(keys)
    }

    async fn bulk_set(&self, pairs: &[BulkPair]) -> Result<Vec<BulkResult>, FabricError> {
        for pair in pairs {
            self.insert(pair.key.clone(), pair.value.clone(), pair.ttl_secs);
        }
        Ok(pairs.iter().map(|p| BulkResult::ok(&p.key)).collect())
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, FabricError> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(key) {
            Some(entry) if entry.live() => {
                entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_secs));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn disconnect(&self) -> Result<(), FabricError> {
        Ok(())
    }

    fn connection_info(&self) -> ConnectionInfo {
        let mut details = BTreeMap::new();
        details.insert(
            "entries".to_string(),
            self.entries.lock().unwrap().len().to_string(),
        );
        details.insert("capacity".to_string(), self.capacity.to_string());
        ConnectionInfo {
            provider: ProviderId::Memory,
            endpoint: "in-process".to_string(),
            connected: true,
            details,
        }
    }
}
