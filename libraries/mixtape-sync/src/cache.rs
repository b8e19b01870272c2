//! Persistent local cache
//!
//! Entries carry an expiry and an explicit staleness flag. A stale or expired
//! entry is still returned; callers use the flag to decide whether to
//! revalidate in the background. Writes are mirrored into a pending set that
//! [`Cache::flush`] hands to the [`CacheStore`], so the map itself is updated
//! without awaiting.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mixtape_core::{Clock, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

use crate::optimistic::Snapshot;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: Value,
    pub expires_at: DateTime<Utc>,
    /// Set explicitly by invalidation, independent of expiry
    pub stale: bool,
    pub updated_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.stale || now >= self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheLookup<T> {
    pub value: T,
    pub is_stale: bool,
}

/// Durable backing for the cache
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<(String, CacheEntry)>>;

    async fn save_many(&self, entries: Vec<(String, CacheEntry)>) -> Result<()>;

    async fn remove_many(&self, keys: Vec<String>) -> Result<()>;
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    /// Unflushed changes: `Some` is an upsert, `None` a removal
    pending: HashMap<String, Option<CacheEntry>>,
}

struct CacheShared {
    state: Mutex<CacheInner>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
    store: Option<Arc<dyn CacheStore>>,
}

#[derive(Clone)]
pub struct Cache {
    shared: Arc<CacheShared>,
}

impl Cache {
    /// In-memory cache with no persistence
    pub fn new(clock: Arc<dyn Clock>, default_ttl: Duration) -> Self {
        Self::build(clock, default_ttl, None)
    }

    pub fn with_store(
        clock: Arc<dyn Clock>,
        default_ttl: Duration,
        store: Arc<dyn CacheStore>,
    ) -> Self {
        Self::build(clock, default_ttl, Some(store))
    }

    fn build(
        clock: Arc<dyn Clock>,
        default_ttl: Duration,
        store: Option<Arc<dyn CacheStore>>,
    ) -> Self {
        Self {
            shared: Arc::new(CacheShared {
                state: Mutex::new(CacheInner::default()),
                clock,
                default_ttl,
                store,
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<CacheLookup<Value>> {
        let now = self.shared.clock.now();
        self.lock().entries.get(key).map(|entry| CacheLookup {
            value: entry.value.clone(),
            is_stale: entry.is_stale(now),
        })
    }

    /// Typed read; an entry that no longer deserializes is treated as absent
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<CacheLookup<T>> {
        let lookup = self.get(key)?;
        match serde_json::from_value(lookup.value) {
            Ok(value) => Some(CacheLookup {
                value,
                is_stale: lookup.is_stale,
            }),
            Err(e) => {
                warn!(key, error = %e, "Discarding undecodable cache entry");
                None
            }
        }
    }

    /// Store a fresh value, replacing any previous entry
    pub fn set(&self, key: impl Into<String>, value: Value, ttl: Option<Duration>) {
        let now = self.shared.clock.now();
        let ttl = ttl.unwrap_or(self.shared.default_ttl);
        let lifetime = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let entry = CacheEntry {
            value,
            expires_at: now
                .checked_add_signed(lifetime)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            stale: false,
            updated_at: now,
        };
        self.put(key.into(), Some(entry));
    }

    pub fn set_as<T: Serialize>(
        &self,
        key: impl Into<String>,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.set(key, serde_json::to_value(value)?, ttl);
        Ok(())
    }

    /// Flag an entry for revalidation without dropping its value
    pub fn mark_stale(&self, key: &str) -> bool {
        let mut inner = self.lock();
        let Some(entry) = inner.entries.get_mut(key) else {
            return false;
        };
        entry.stale = true;
        let entry = entry.clone();
        inner.pending.insert(key.to_string(), Some(entry));
        true
    }

    /// Mark every entry under `prefix` stale; returns how many
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let mut marked = 0;
        for (key, entry) in inner.entries.iter_mut().filter(|(k, _)| k.starts_with(prefix)) {
            entry.stale = true;
            inner.pending.insert(key.clone(), Some(entry.clone()));
            marked += 1;
        }
        marked
    }

    pub fn remove(&self, key: &str) -> bool {
        let mut inner = self.lock();
        let existed = inner.entries.remove(key).is_some();
        if existed {
            inner.pending.insert(key.to_string(), None);
        }
        existed
    }

    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.lock().entries.get(key).cloned()
    }

    /// Put an entry back exactly as it was, including its absence
    pub fn restore_entry(&self, key: &str, entry: Option<CacheEntry>) {
        let mut inner = self.lock();
        match entry.clone() {
            Some(entry) => inner.entries.insert(key.to_string(), entry),
            None => inner.entries.remove(key),
        };
        inner.pending.insert(key.to_string(), entry);
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn pending_writes(&self) -> usize {
        self.lock().pending.len()
    }

    /// Load persisted entries; entries already in memory take precedence
    pub async fn hydrate(&self) -> Result<usize> {
        let Some(store) = self.shared.store.clone() else {
            return Ok(0);
        };
        let loaded = store.load_all().await?;

        let mut inner = self.lock();
        let mut added = 0;
        for (key, entry) in loaded {
            if !inner.entries.contains_key(&key) && !inner.pending.contains_key(&key) {
                inner.entries.insert(key, entry);
                added += 1;
            }
        }
        debug!(entries = added, "Cache hydrated");
        Ok(added)
    }

    /// Write pending changes to the store
    ///
    /// On failure the unwritten changes are queued again, unless a newer
    /// change for the same key arrived meanwhile.
    pub async fn flush(&self) -> Result<usize> {
        let Some(store) = self.shared.store.clone() else {
            self.lock().pending.clear();
            return Ok(0);
        };

        let pending: Vec<(String, Option<CacheEntry>)> = self.lock().pending.drain().collect();
        if pending.is_empty() {
            return Ok(0);
        }
        let count = pending.len();

        let mut saves = Vec::new();
        let mut removals = Vec::new();
        for (key, change) in &pending {
            match change {
                Some(entry) => saves.push((key.clone(), entry.clone())),
                None => removals.push(key.clone()),
            }
        }

        let result = async {
            if !saves.is_empty() {
                store.save_many(saves).await?;
            }
            if !removals.is_empty() {
                store.remove_many(removals).await?;
            }
            Ok(())
        }
        .await;

        if let Err(e) = result {
            warn!(error = %e, changes = count, "Cache flush failed, requeueing");
            let mut inner = self.lock();
            for (key, change) in pending {
                inner.pending.entry(key).or_insert(change);
            }
            return Err(e);
        }

        debug!(changes = count, "Cache flushed");
        Ok(count)
    }

    pub fn clear(&self) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        for key in inner.entries.keys() {
            inner.pending.insert(key.clone(), None);
        }
        inner.entries.clear();
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.shared.clock.now()
    }

    fn put(&self, key: String, entry: Option<CacheEntry>) {
        let mut inner = self.lock();
        match &entry {
            Some(entry) => inner.entries.insert(key.clone(), entry.clone()),
            None => inner.entries.remove(&key),
        };
        inner.pending.insert(key, entry);
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One cache key viewed as optimistic-mutation state
#[derive(Clone)]
pub struct CacheSlot {
    cache: Cache,
    key: String,
}

impl CacheSlot {
    pub fn new(cache: Cache, key: impl Into<String>) -> Self {
        Self {
            cache,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn get(&self) -> Option<Value> {
        self.cache.get(&self.key).map(|l| l.value)
    }

    pub fn set(&self, value: Value) {
        self.cache.set(self.key.clone(), value, None);
    }
}

impl Snapshot for CacheSlot {
    type Snap = Option<CacheEntry>;

    fn snapshot(&self) -> Self::Snap {
        self.cache.entry(&self.key)
    }

    fn restore(&self, snap: Self::Snap) {
        self.cache.restore_entry(&self.key, snap);
    }
}

/// Store that keeps persisted entries in memory, for tests and ephemeral
/// sessions
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
    fail: std::sync::atomic::AtomicBool,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn stored(&self, key: &str) -> Option<CacheEntry> {
        self.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(mixtape_core::MixtapeError::storage("cache store unavailable"));
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn load_all(&self) -> Result<Vec<(String, CacheEntry)>> {
        Ok(self
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn save_many(&self, entries: Vec<(String, CacheEntry)>) -> Result<()> {
        self.check()?;
        self.lock().extend(entries);
        Ok(())
    }

    async fn remove_many(&self, keys: Vec<String>) -> Result<()> {
        self.check()?;
        let mut stored = self.lock();
        for key in keys {
            stored.remove(&key);
        }
        Ok(())
    }
}
