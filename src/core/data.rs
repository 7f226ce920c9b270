//! Cached remote reads.
//!
//! Every read goes network first. A successful response refreshes the cache;
//! a transport failure (or a known-offline device) falls back to whatever the
//! cache holds, flagged stale when its TTL has passed. Errors the server
//! actually returned are never papered over with cached data.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core::client::AuthClient;
use crate::core::connectivity::OfflineDetector;
use crate::error::{DaylineError, Result};
use crate::storage::cache::{CacheStore, StaleRead};
use crate::storage::config::CacheTtls;

// =============================================================================
// Keys
// =============================================================================

/// The cached reads this layer knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    NotificationCount,
    DailyPlan,
    InboxSummary,
    TodayEvents,
    TaskLists,
}

impl CacheKey {
    pub const ALL: [Self; 5] = [
        Self::NotificationCount,
        Self::DailyPlan,
        Self::InboxSummary,
        Self::TodayEvents,
        Self::TaskLists,
    ];

    /// Cache key string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotificationCount => "notifications:count",
            Self::DailyPlan => "plan:today",
            Self::InboxSummary => "inbox:summary",
            Self::TodayEvents => "calendar:today",
            Self::TaskLists => "tasks:lists",
        }
    }

    /// Backend path serving this data.
    #[must_use]
    pub const fn path(&self) -> &'static str {
        match self {
            Self::NotificationCount => "/notifications/count",
            Self::DailyPlan => "/data/plan/today",
            Self::InboxSummary => "/data/inbox/summary",
            Self::TodayEvents => "/data/calendar/today",
            Self::TaskLists => "/data/tasks/lists",
        }
    }

    /// Lifetime for this kind of data.
    #[must_use]
    pub const fn ttl(&self, ttls: &CacheTtls) -> Duration {
        match self {
            Self::NotificationCount => ttls.notifications,
            Self::DailyPlan => ttls.daily_plan,
            Self::InboxSummary => ttls.inbox,
            Self::TodayEvents => ttls.calendar,
            Self::TaskLists => ttls.tasks,
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Results
// =============================================================================

/// Where a [`Fetched`] value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Network,
    Cache,
}

/// Data plus its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fetched<T> {
    pub data: T,
    pub source: DataSource,
    /// True when served from cache past its TTL.
    pub is_stale: bool,
    /// When the cached copy was written; `None` for network results.
    pub cached_at: Option<DateTime<Utc>>,
}

impl<T> Fetched<T> {
    fn network(data: T) -> Self {
        Self {
            data,
            source: DataSource::Network,
            is_stale: false,
            cached_at: None,
        }
    }

    fn cached(read: StaleRead<T>) -> Self {
        Self {
            data: read.data,
            source: DataSource::Cache,
            is_stale: read.is_stale,
            cached_at: Some(read.cached_at),
        }
    }

    /// Whether the data came from the cache.
    #[must_use]
    pub fn is_cached(&self) -> bool {
        self.source == DataSource::Cache
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CountBody {
    count: u64,
}

/// Whether a fresh cache hit may skip the network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FetchPolicy {
    /// Always ask the backend; use the cache only as a fallback.
    #[default]
    NetworkFirst,
    /// Serve a fresh cache entry without a request.
    CacheFirst,
}

// =============================================================================
// Service
// =============================================================================

/// Fetch-then-cache access to the backend's read endpoints.
#[derive(Debug, Clone)]
pub struct DataService {
    client: AuthClient,
    cache: CacheStore,
    detector: OfflineDetector,
    ttls: CacheTtls,
}

impl DataService {
    #[must_use]
    pub const fn new(
        client: AuthClient,
        cache: CacheStore,
        detector: OfflineDetector,
        ttls: CacheTtls,
    ) -> Self {
        Self {
            client,
            cache,
            detector,
            ttls,
        }
    }

    #[must_use]
    pub const fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Unread notification count.
    ///
    /// # Errors
    ///
    /// See [`DataService::fetch_cached`].
    pub async fn notification_count(&self) -> Result<Fetched<u64>> {
        let key = CacheKey::NotificationCount;
        let fetched: Fetched<CountBody> = self
            .fetch_cached(key.as_str(), key.path(), key.ttl(&self.ttls))
            .await?;
        Ok(Fetched {
            data: fetched.data.count,
            source: fetched.source,
            is_stale: fetched.is_stale,
            cached_at: fetched.cached_at,
        })
    }

    /// Today's plan.
    ///
    /// # Errors
    ///
    /// See [`DataService::fetch_cached`].
    pub async fn daily_plan(&self) -> Result<Fetched<serde_json::Value>> {
        self.fetch_key(CacheKey::DailyPlan).await
    }

    /// Inbox overview.
    ///
    /// # Errors
    ///
    /// See [`DataService::fetch_cached`].
    pub async fn inbox_summary(&self) -> Result<Fetched<serde_json::Value>> {
        self.fetch_key(CacheKey::InboxSummary).await
    }

    /// Today's calendar events.
    ///
    /// # Errors
    ///
    /// See [`DataService::fetch_cached`].
    pub async fn today_events(&self) -> Result<Fetched<serde_json::Value>> {
        self.fetch_key(CacheKey::TodayEvents).await
    }

    /// Task lists.
    ///
    /// # Errors
    ///
    /// See [`DataService::fetch_cached`].
    pub async fn task_lists(&self) -> Result<Fetched<serde_json::Value>> {
        self.fetch_key(CacheKey::TaskLists).await
    }

    async fn fetch_key(&self, key: CacheKey) -> Result<Fetched<serde_json::Value>> {
        self.fetch_cached(key.as_str(), key.path(), key.ttl(&self.ttls))
            .await
    }

    /// Network-first read of `path`, cached under `key` for `ttl`.
    ///
    /// # Errors
    ///
    /// - Transport failures with nothing cached propagate unchanged
    /// - [`DaylineError::Offline`] when offline with nothing cached
    /// - Authentication and remote errors always propagate
    pub async fn fetch_cached<T>(&self, key: &str, path: &str, ttl: Duration) -> Result<Fetched<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        self.fetch_cached_with(key, path, ttl, FetchPolicy::NetworkFirst)
            .await
    }

    /// [`DataService::fetch_cached`] with an explicit policy.
    ///
    /// # Errors
    ///
    /// See [`DataService::fetch_cached`].
    pub async fn fetch_cached_with<T>(
        &self,
        key: &str,
        path: &str,
        ttl: Duration,
        policy: FetchPolicy,
    ) -> Result<Fetched<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        if policy == FetchPolicy::CacheFirst {
            if let Some(read) = self.cache.get_stale::<T>(key).filter(|r| !r.is_stale) {
                return Ok(Fetched::cached(read));
            }
        }

        if self.detector.is_offline() {
            tracing::debug!(key, "Offline, serving cache without a request");
            return self
                .cache
                .get_stale::<T>(key)
                .map(Fetched::cached)
                .ok_or(DaylineError::Offline);
        }

        match self.client.get_json::<T>(path).await {
            Ok(data) => {
                if let Err(e) = self.cache.set(key, &data, ttl) {
                    tracing::warn!(key, error = %e, "Failed to cache response");
                }
                Ok(Fetched::network(data))
            }
            Err(e) if e.is_fallback_eligible() => match self.cache.get_stale::<T>(key) {
                Some(read) => {
                    tracing::warn!(
                        key,
                        error = %e,
                        stale = read.is_stale,
                        "Network unavailable, serving cached data"
                    );
                    Ok(Fetched::cached(read))
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    /// Drop every cached read (e.g. on sign-out).
    ///
    /// # Errors
    ///
    /// Returns an error if the cache store cannot be written.
    pub fn clear_cache(&self) -> Result<usize> {
        self.cache.clear_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::make_test_credentials;
    use std::collections::HashSet;
    use tracing_test::traced_test;

    /// Service whose backend refuses connections.
    fn unreachable_service() -> DataService {
        let client = AuthClient::with_base_url(
            "http://127.0.0.1:9",
            make_test_credentials("a", "r"),
            Duration::from_secs(1),
        )
        .unwrap();
        DataService::new(
            client,
            CacheStore::in_memory(),
            OfflineDetector::online(),
            CacheTtls::default(),
        )
    }

    #[test]
    fn cache_keys_are_distinct() {
        let keys: HashSet<_> = CacheKey::ALL.iter().map(CacheKey::as_str).collect();
        let paths: HashSet<_> = CacheKey::ALL.iter().map(CacheKey::path).collect();
        assert_eq!(keys.len(), CacheKey::ALL.len());
        assert_eq!(paths.len(), CacheKey::ALL.len());
    }

    #[test]
    fn ttl_follows_config() {
        let ttls = CacheTtls {
            notifications: Duration::from_secs(1),
            daily_plan: Duration::from_secs(2),
            inbox: Duration::from_secs(3),
            calendar: Duration::from_secs(4),
            tasks: Duration::from_secs(5),
        };
        assert_eq!(CacheKey::DailyPlan.ttl(&ttls), Duration::from_secs(2));
        assert_eq!(CacheKey::TaskLists.ttl(&ttls), Duration::from_secs(5));
    }

    #[test]
    fn fetched_serializes_camel_case() {
        let fetched = Fetched::network(3_u64);
        let json = serde_json::to_value(&fetched).unwrap();
        assert_eq!(json["source"], "network");
        assert_eq!(json["isStale"], false);
        assert!(json["cachedAt"].is_null());
        assert!(!fetched.is_cached());
    }

    #[tokio::test]
    #[traced_test]
    async fn transport_failure_serves_cache_and_logs() {
        let service = unreachable_service();
        service
            .cache()
            .set(CacheKey::NotificationCount.as_str(), &CountBody { count: 7 }, Duration::from_secs(60))
            .unwrap();

        let fetched = service.notification_count().await.unwrap();
        assert_eq!(fetched.data, 7);
        assert!(fetched.is_cached());
        assert!(!fetched.is_stale);
        assert!(logs_contain("serving cached data"));
    }

    #[tokio::test]
    async fn transport_failure_without_cache_propagates() {
        let err = unreachable_service().daily_plan().await.unwrap_err();
        assert!(err.is_fallback_eligible());
    }
}
