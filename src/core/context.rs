//! Wiring for the whole data layer.
//!
//! [`DataLayer`] builds every component from one [`ResolvedConfig`] and hands
//! out shared handles, so UI code needs a single object.

use crate::core::background::BackgroundTask;
use crate::core::client::AuthClient;
use crate::core::connectivity::{OfflineDetector, spawn_probe};
use crate::core::data::DataService;
use crate::core::sync::{PollingHandle, SyncAggregator};
use crate::error::{DaylineError, Result};
use crate::storage::cache::CacheStore;
use crate::storage::config::ResolvedConfig;
use crate::storage::credentials::{AuthStatus, CredentialStore};
use crate::storage::paths::AppPaths;

/// All components of the data layer, sharing one session, cache, and
/// connectivity state.
#[derive(Debug, Clone)]
pub struct DataLayer {
    config: ResolvedConfig,
    client: AuthClient,
    detector: OfflineDetector,
    data: DataService,
    sync: SyncAggregator,
}

impl DataLayer {
    /// Open the layer with on-disk stores in the platform directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories or the cache database cannot be
    /// created, or the HTTP client cannot be built.
    pub fn open(config: ResolvedConfig) -> Result<Self> {
        Self::open_at(config, &AppPaths::new())
    }

    /// Open the layer with on-disk stores under `paths`.
    ///
    /// # Errors
    ///
    /// See [`DataLayer::open`].
    pub fn open_at(config: ResolvedConfig, paths: &AppPaths) -> Result<Self> {
        paths.ensure_dirs().map_err(|e| {
            DaylineError::Storage(format!("Failed to create data directories: {e}"))
        })?;
        let credentials = CredentialStore::from_config(&config, paths);
        let cache = CacheStore::open(paths)?;
        tracing::debug!(base_url = %config.base_url, "Data layer opened");
        Self::from_parts(config, credentials, cache, OfflineDetector::online())
    }

    /// Assemble the layer from existing stores.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_parts(
        config: ResolvedConfig,
        credentials: CredentialStore,
        cache: CacheStore,
        detector: OfflineDetector,
    ) -> Result<Self> {
        let client = AuthClient::new(&config, credentials)?;
        let data = DataService::new(
            client.clone(),
            cache,
            detector.clone(),
            config.cache_ttls,
        );
        let sync = SyncAggregator::new(client.clone(), detector.clone(), config.settle_delay);

        Ok(Self {
            config,
            client,
            detector,
            data,
            sync,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    #[must_use]
    pub const fn client(&self) -> &AuthClient {
        &self.client
    }

    #[must_use]
    pub fn credentials(&self) -> &CredentialStore {
        self.client.credentials()
    }

    #[must_use]
    pub const fn detector(&self) -> &OfflineDetector {
        &self.detector
    }

    #[must_use]
    pub const fn data(&self) -> &DataService {
        &self.data
    }

    #[must_use]
    pub const fn sync(&self) -> &SyncAggregator {
        &self.sync
    }

    /// Persist the pair returned by the login exchange.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential store rejects the write.
    pub fn sign_in(&self, access_token: &str, refresh_token: &str) -> Result<()> {
        self.credentials().store_tokens(access_token, refresh_token)?;
        tracing::info!("Signed in");
        Ok(())
    }

    /// Forget the session and every cached read.
    ///
    /// # Errors
    ///
    /// Returns the first store failure; the other store is still cleared.
    pub fn sign_out(&self) -> Result<()> {
        let tokens = self.credentials().clear_tokens();
        let cache = self.data.clear_cache();
        tracing::info!("Signed out");
        tokens?;
        cache.map(|_| ())
    }

    #[must_use]
    pub fn auth_status(&self) -> AuthStatus {
        self.credentials().auth_status()
    }

    /// Poll sync status at the configured interval.
    #[must_use = "polling stops when the handle is dropped"]
    pub fn start_sync_polling(&self) -> PollingHandle {
        self.sync.start_polling(self.config.poll_interval)
    }

    /// Probe the health endpoint at the configured poll interval and feed
    /// the offline detector.
    #[must_use = "probing stops when the handle is dropped"]
    pub fn start_connectivity_probe(&self) -> BackgroundTask {
        spawn_probe(
            self.detector.clone(),
            self.client.http().clone(),
            self.client.url(&self.config.health_path),
            self.config.poll_interval,
        )
    }

    /// Stop publishing sync results. Background handles should be stopped
    /// or dropped by the caller.
    pub fn shutdown(&self) {
        self.sync.shutdown();
    }
}
