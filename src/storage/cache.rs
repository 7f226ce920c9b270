//! TTL cache over a key-value store.
//!
//! Entries are persisted as JSON `{"data", "cachedAt", "expiresAt"}` with
//! millisecond epoch timestamps under the `cache:` key namespace.
//!
//! # Features
//! - Fresh reads honor the TTL; stale reads ignore it and flag the result
//! - Expiry is computed at read time, so stale entries stay usable offline
//! - Malformed or mistyped entries read as misses instead of errors
//! - Last writer wins; entries are replaced whole, never patched

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::Result;
use crate::storage::kv::{KeyValueStore, MemoryStore, SqliteStore};
use crate::storage::paths::AppPaths;

/// Key prefix owned by the cache inside the shared key-value store.
pub const CACHE_NAMESPACE: &str = "cache:";

/// Current time as epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

// =============================================================================
// Entries
// =============================================================================

/// Persisted cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub data: T,
    /// Write time, epoch ms.
    pub cached_at: i64,
    /// `cached_at + ttl`, epoch ms.
    pub expires_at: i64,
}

impl<T> CacheEntry<T> {
    /// Build an entry written at `now_ms` that lives for `ttl`.
    pub fn new(data: T, ttl: Duration, now_ms: i64) -> Self {
        Self {
            data,
            cached_at: now_ms,
            expires_at: now_ms.saturating_add(ttl_millis(ttl)),
        }
    }

    /// Whether the entry has outlived its TTL at `now_ms`.
    #[must_use]
    pub const fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms > self.expires_at
    }

    /// Write time as a UTC timestamp.
    #[must_use]
    pub fn cached_at_utc(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.cached_at).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    const fn is_well_formed(&self) -> bool {
        self.cached_at >= 0 && self.expires_at >= self.cached_at
    }
}

/// Result of a read that tolerates expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct StaleRead<T> {
    pub data: T,
    /// True when the TTL has elapsed.
    pub is_stale: bool,
    pub cached_at: DateTime<Utc>,
}

/// Read-time summary of the cache namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub fresh_entries: usize,
    pub stale_entries: usize,
}

// =============================================================================
// Store
// =============================================================================

/// TTL-tagged cache shared by all fetchers.
///
/// Cloning is cheap; clones share the same backing store.
#[derive(Clone)]
pub struct CacheStore {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore").finish_non_exhaustive()
    }
}

impl CacheStore {
    /// Open the on-disk cache database under `paths`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open(paths: &AppPaths) -> Result<Self> {
        let store = SqliteStore::open(&paths.cache_db_file())?;
        Ok(Self::with_store(Arc::new(store)))
    }

    /// Process-local cache that is lost on exit.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    /// Cache over an explicit key-value store.
    #[must_use]
    pub fn with_store(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn storage_key(key: &str) -> String {
        format!("{CACHE_NAMESPACE}{key}")
    }

    /// Store `data` under `key` for `ttl`, replacing any previous entry.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the store write fails.
    pub fn set<T: Serialize>(&self, key: &str, data: &T, ttl: Duration) -> Result<()> {
        let entry = CacheEntry::new(data, ttl, now_millis());
        self.write_entry(key, &entry)?;
        tracing::debug!(key, ttl_ms = ttl_millis(ttl), "Cache entry written");
        Ok(())
    }

    /// Write a pre-built entry (seeding, backdated test data).
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the store write fails.
    pub fn write_entry<T: Serialize>(&self, key: &str, entry: &CacheEntry<T>) -> Result<()> {
        let content = serde_json::to_string(entry)?;
        self.store.set(&Self::storage_key(key), &content)
    }

    /// Read and validate a raw entry. Anything unusable is a miss.
    fn read_entry<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
        let raw = match self.store.get(&Self::storage_key(key)) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_str::<CacheEntry<T>>(&raw) {
            Ok(entry) if entry.is_well_formed() => Some(entry),
            Ok(_) => {
                tracing::debug!(key, "Cache entry has inconsistent timestamps, ignoring");
                None
            }
            Err(e) => {
                tracing::debug!(key, error = %e, "Cache entry malformed, ignoring");
                None
            }
        }
    }

    /// Value for `key` if present and within its TTL.
    #[must_use]
    pub fn get_fresh<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entry = self.read_entry::<T>(key)?;
        if entry.is_expired_at(now_millis()) {
            tracing::debug!(key, "Cache entry expired");
            return None;
        }
        tracing::debug!(key, "Cache hit");
        Some(entry.data)
    }

    /// Value for `key` if present, regardless of TTL.
    #[must_use]
    pub fn get_stale<T: DeserializeOwned>(&self, key: &str) -> Option<StaleRead<T>> {
        let entry = self.read_entry::<T>(key)?;
        let is_stale = entry.is_expired_at(now_millis());
        let cached_at = entry.cached_at_utc();
        Some(StaleRead {
            data: entry.data,
            is_stale,
            cached_at,
        })
    }

    /// Delete the entry for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub fn remove(&self, key: &str) -> Result<()> {
        self.store.remove(&Self::storage_key(key))
    }

    /// Delete every cache entry. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be scanned or written.
    pub fn clear_all(&self) -> Result<usize> {
        let removed = self.store.remove_prefix(CACHE_NAMESPACE)?;
        tracing::info!(removed, "Cache cleared");
        Ok(removed)
    }

    /// Count fresh and stale entries. Malformed entries are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be scanned.
    pub fn stats(&self) -> Result<CacheStats> {
        let now = now_millis();
        let mut stats = CacheStats::default();

        for storage_key in self.store.keys_with_prefix(CACHE_NAMESPACE)? {
            let key = &storage_key[CACHE_NAMESPACE.len()..];
            let Some(entry) = self.read_entry::<serde_json::Value>(key) else {
                continue;
            };
            stats.total_entries += 1;
            if entry.is_expired_at(now) {
                stats.stale_entries += 1;
            } else {
                stats.fresh_entries += 1;
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn backdated<T>(data: T, age: Duration, ttl: Duration) -> CacheEntry<T> {
        let written = now_millis() - ttl_millis(age);
        CacheEntry::new(data, ttl, written)
    }

    #[test]
    fn open_persists_under_paths() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::rooted_at(dir.path());
        paths.ensure_dirs().unwrap();

        CacheStore::open(&paths)
            .unwrap()
            .set("inbox", &json!({"unread": 2}), Duration::from_secs(60))
            .unwrap();
        assert!(paths.cache_db_file().exists());

        let reopened = CacheStore::open(&paths).unwrap();
        let value: serde_json::Value = reopened.get_fresh("inbox").unwrap();
        assert_eq!(value["unread"], 2);
    }

    #[test]
    fn set_then_get_fresh() {
        let cache = CacheStore::in_memory();
        cache.set("plan", &json!({"blocks": 3}), Duration::from_secs(60)).unwrap();

        let value: serde_json::Value = cache.get_fresh("plan").unwrap();
        assert_eq!(value["blocks"], 3);

        let stale = cache.get_stale::<serde_json::Value>("plan").unwrap();
        assert!(!stale.is_stale);
        assert_eq!(stale.data, json!({"blocks": 3}));
    }

    #[test]
    fn expired_entry_is_stale_not_gone() {
        let cache = CacheStore::in_memory();
        let entry = backdated(42_u32, Duration::from_secs(120), Duration::from_secs(60));
        cache.write_entry("count", &entry).unwrap();

        assert_eq!(cache.get_fresh::<u32>("count"), None);

        let stale = cache.get_stale::<u32>("count").unwrap();
        assert_eq!(stale.data, 42);
        assert!(stale.is_stale);

        // Reading a stale entry never evicts it
        assert!(cache.get_stale::<u32>("count").is_some());
    }

    #[test]
    fn short_ttl_expires_after_wait() {
        let cache = CacheStore::in_memory();
        cache.set("plan", &"focus", Duration::from_millis(1)).unwrap();
        std::thread::sleep(Duration::from_millis(10));

        assert_eq!(cache.get_fresh::<String>("plan"), None);
        let stale = cache.get_stale::<String>("plan").unwrap();
        assert_eq!(stale.data, "focus");
        assert!(stale.is_stale);
    }

    #[test]
    fn set_overwrites_previous_entry() {
        let cache = CacheStore::in_memory();
        cache.set("k", &1_u8, Duration::from_secs(60)).unwrap();
        cache.set("k", &2_u8, Duration::from_secs(60)).unwrap();
        assert_eq!(cache.get_fresh::<u8>("k"), Some(2));
    }

    #[test]
    fn missing_key_is_none_for_both_reads() {
        let cache = CacheStore::in_memory();
        assert_eq!(cache.get_fresh::<u8>("nope"), None);
        assert!(cache.get_stale::<u8>("nope").is_none());
    }

    #[test]
    fn remove_deletes_entry() {
        let cache = CacheStore::in_memory();
        cache.set("k", &"v", Duration::from_secs(60)).unwrap();
        cache.remove("k").unwrap();
        assert!(cache.get_stale::<String>("k").is_none());
    }

    #[test]
    fn clear_all_only_touches_cache_namespace() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        kv.set("settings:theme", "dark").unwrap();

        let cache = CacheStore::with_store(Arc::clone(&kv));
        cache.set("a", &1, Duration::from_secs(60)).unwrap();
        cache.set("b", &2, Duration::from_secs(60)).unwrap();

        assert_eq!(cache.clear_all().unwrap(), 2);
        assert!(cache.get_stale::<i32>("a").is_none());
        assert!(cache.get_stale::<i32>("b").is_none());
        assert_eq!(kv.get("settings:theme").unwrap().as_deref(), Some("dark"));
    }

    #[test]
    fn malformed_entries_read_as_miss() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let cache = CacheStore::with_store(Arc::clone(&kv));

        kv.set("cache:garbage", "not json").unwrap();
        kv.set("cache:shape", r#"{"value": 1}"#).unwrap();
        kv.set(
            "cache:inverted",
            r#"{"data": 1, "cachedAt": 2000, "expiresAt": 1000}"#,
        )
        .unwrap();

        assert!(cache.get_stale::<serde_json::Value>("garbage").is_none());
        assert!(cache.get_stale::<serde_json::Value>("shape").is_none());
        assert!(cache.get_stale::<serde_json::Value>("inverted").is_none());
    }

    #[test]
    fn type_mismatch_reads_as_miss() {
        let cache = CacheStore::in_memory();
        cache.set("k", &"text", Duration::from_secs(60)).unwrap();
        assert_eq!(cache.get_fresh::<u64>("k"), None);
    }

    #[test]
    fn stats_split_fresh_and_stale() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let cache = CacheStore::with_store(Arc::clone(&kv));

        cache.set("fresh", &1, Duration::from_secs(60)).unwrap();
        cache
            .write_entry(
                "old",
                &backdated(2, Duration::from_secs(600), Duration::from_secs(60)),
            )
            .unwrap();
        kv.set("cache:broken", "{").unwrap();

        let stats = cache.stats().unwrap();
        assert_eq!(
            stats,
            CacheStats {
                total_entries: 2,
                fresh_entries: 1,
                stale_entries: 1,
            }
        );
    }

    #[test]
    fn persisted_entry_uses_camel_case_epoch_millis() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let cache = CacheStore::with_store(Arc::clone(&kv));
        cache.set("n", &7, Duration::from_secs(1)).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&kv.get("cache:n").unwrap().unwrap()).unwrap();
        let cached_at = raw["cachedAt"].as_i64().unwrap();
        let expires_at = raw["expiresAt"].as_i64().unwrap();
        assert_eq!(raw["data"], 7);
        assert_eq!(expires_at - cached_at, 1000);
    }
}
