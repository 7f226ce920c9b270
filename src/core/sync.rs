//! Sync status aggregation.
//!
//! Mail, calendar and tasks each report when they last synced. The
//! [`SyncAggregator`] merges those into one [`SyncStatus`], drives manual
//! sync triggers, and optionally polls for changes in the background.
//!
//! ## Lifecycle
//!
//! ```text
//! idle/synced/error --trigger--> syncing --POST ok, settle, refetch--> synced
//!                                        \--failure------------------> error
//! ```
//!
//! At most one trigger is in flight; a second trigger while syncing is a
//! no-op. Polling skips ticks while a trigger runs or while offline.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;

use crate::core::background::{BackgroundTask, spawn_interval};
use crate::core::client::AuthClient;
use crate::core::connectivity::OfflineDetector;
use crate::error::{DaylineError, Result};

/// Path that starts a backend sync.
pub const TRIGGER_PATH: &str = "/sync/trigger";
/// Path that reports per-source sync state.
pub const STATUS_PATH: &str = "/sync/status";

/// Handle returned by [`SyncAggregator::start_polling`].
pub type PollingHandle = BackgroundTask;

// =============================================================================
// Model
// =============================================================================

/// What to sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncSource {
    Mail,
    Calendar,
    Tasks,
    All,
}

impl SyncSource {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Mail => "mail",
            Self::Calendar => "calendar",
            Self::Tasks => "tasks",
            Self::All => "all",
        }
    }
}

impl std::fmt::Display for SyncSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate sync state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    #[default]
    Idle,
    Syncing,
    Synced,
    Error,
}

/// Sync state of one source as reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSyncStatus {
    #[serde(default)]
    pub count: u64,
    #[serde(default, alias = "lastSynced", alias = "last_synced_at", alias = "lastSyncedAt")]
    pub last_synced: Option<DateTime<Utc>>,
}

/// Merged view across all sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub state: SyncState,
    /// Most recent `last_synced` over all sources.
    pub last_sync_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub sources: BTreeMap<String, SourceSyncStatus>,
}

impl SyncStatus {
    #[must_use]
    pub const fn is_syncing(&self) -> bool {
        matches!(self.state, SyncState::Syncing)
    }
}

/// Derive the aggregate from per-source statuses.
///
/// `last_sync_at` is the newest source timestamp. The state is `error` when
/// an error is given, otherwise `synced` if any source has synced and `idle`
/// if none has.
#[must_use]
pub fn compute_status(
    sources: BTreeMap<String, SourceSyncStatus>,
    error: Option<String>,
) -> SyncStatus {
    let last_sync_at = sources.values().filter_map(|s| s.last_synced).max();
    let state = match (&error, last_sync_at) {
        (Some(_), _) => SyncState::Error,
        (None, Some(_)) => SyncState::Synced,
        (None, None) => SyncState::Idle,
    };
    SyncStatus {
        state,
        last_sync_at,
        error,
        sources,
    }
}

/// Parse a `/sync/status` body.
///
/// Accepts `{"mail": {...}, ...}` or the same map under `"sources"`.
/// Entries that are not source objects are ignored.
///
/// # Errors
///
/// Returns [`DaylineError::ParseResponse`] if the body is not a JSON object.
pub fn parse_status_body(body: &serde_json::Value) -> Result<BTreeMap<String, SourceSyncStatus>> {
    let map = body
        .get("sources")
        .and_then(serde_json::Value::as_object)
        .or_else(|| body.as_object())
        .ok_or_else(|| DaylineError::ParseResponse("sync status is not an object".to_string()))?;

    let mut sources = BTreeMap::new();
    for (name, value) in map {
        if !value.is_object() {
            continue;
        }
        match serde_json::from_value::<SourceSyncStatus>(value.clone()) {
            Ok(status) => {
                sources.insert(name.clone(), status);
            }
            Err(e) => {
                tracing::debug!(source = %name, error = %e, "Ignoring unparseable source status");
            }
        }
    }
    Ok(sources)
}

#[derive(Debug, Deserialize)]
struct TriggerAck {
    #[serde(default = "default_true")]
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

const fn default_true() -> bool {
    true
}

/// Result of [`SyncAggregator::trigger_sync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Triggered, settled, and refetched.
    Completed,
    /// Another trigger was already running; nothing was sent.
    AlreadySyncing,
    /// The trigger or refetch failed; the status carries the message.
    Failed,
    /// The aggregator was shut down before the sync finished.
    Abandoned,
}

// =============================================================================
// Aggregator
// =============================================================================

/// Owner of the aggregate [`SyncStatus`].
///
/// Cloning is cheap; clones share state.
#[derive(Debug, Clone)]
pub struct SyncAggregator {
    inner: Arc<SyncInner>,
}

#[derive(Debug)]
struct SyncInner {
    client: AuthClient,
    detector: OfflineDetector,
    settle_delay: Duration,
    in_flight: AtomicBool,
    /// Bumped each time a manual sync claims `in_flight`.
    generation: AtomicU64,
    alive: AtomicBool,
    status: watch::Sender<SyncStatus>,
}

/// Clears the in-flight flag even if the trigger future is dropped.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SyncAggregator {
    #[must_use]
    pub fn new(client: AuthClient, detector: OfflineDetector, settle_delay: Duration) -> Self {
        let (status, _rx) = watch::channel(SyncStatus::default());
        Self {
            inner: Arc::new(SyncInner {
                client,
                detector,
                settle_delay,
                in_flight: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                alive: AtomicBool::new(true),
                status,
            }),
        }
    }

    /// Current aggregate status.
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        self.inner.status.borrow().clone()
    }

    /// Receive every status change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status.subscribe()
    }

    /// Whether a manual sync is running.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::SeqCst)
    }

    /// Stop accepting results. Pending operations finish without updating
    /// the status and polling ticks become no-ops.
    pub fn shutdown(&self) {
        if self.inner.alive.swap(false, Ordering::SeqCst) {
            tracing::debug!("Sync aggregator shut down");
        }
    }

    fn set_error(&self, message: String) {
        if !self.is_alive() {
            return;
        }
        tracing::warn!(error = %message, "Sync failed");
        self.inner.status.send_modify(|status| {
            status.state = SyncState::Error;
            status.error = Some(message);
        });
    }

    fn publish(&self, sources: BTreeMap<String, SourceSyncStatus>) -> SyncStatus {
        let next = compute_status(sources, None);
        self.inner.status.send_replace(next.clone());
        next
    }

    async fn fetch_sources(&self) -> Result<BTreeMap<String, SourceSyncStatus>> {
        let body: serde_json::Value = self.inner.client.get_json(STATUS_PATH).await?;
        parse_status_body(&body)
    }

    /// Ask the backend to sync `source`, then refresh the aggregate.
    ///
    /// Never returns an error: failures land in [`SyncStatus::error`].
    pub async fn trigger_sync(&self, source: SyncSource) -> TriggerOutcome {
        if self
            .inner
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!(%source, "Sync already in progress");
            return TriggerOutcome::AlreadySyncing;
        }
        let _in_flight = InFlight(&self.inner.in_flight);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);

        if !self.is_alive() {
            return TriggerOutcome::Abandoned;
        }

        self.inner.status.send_modify(|status| {
            status.state = SyncState::Syncing;
            status.error = None;
        });
        tracing::info!(%source, "Sync triggered");

        let ack = self
            .inner
            .client
            .send_json::<_, Option<TriggerAck>>(
                Method::POST,
                TRIGGER_PATH,
                &json!({ "source": source.as_str() }),
            )
            .await;

        if !self.is_alive() {
            return TriggerOutcome::Abandoned;
        }

        match ack {
            Err(e) => {
                self.set_error(format!("Sync failed: {e}"));
                return TriggerOutcome::Failed;
            }
            Ok(Some(ack)) if !ack.success => {
                let message = ack
                    .message
                    .unwrap_or_else(|| "Sync was rejected by the server".to_string());
                self.set_error(message);
                return TriggerOutcome::Failed;
            }
            Ok(_) => {}
        }

        tokio::time::sleep(self.inner.settle_delay).await;
        if !self.is_alive() {
            return TriggerOutcome::Abandoned;
        }

        match self.fetch_sources().await {
            Ok(sources) if self.is_alive() => {
                let status = self.publish(sources);
                tracing::info!(%source, state = ?status.state, "Sync finished");
                TriggerOutcome::Completed
            }
            Ok(_) => TriggerOutcome::Abandoned,
            Err(e) => {
                self.set_error(format!("Could not read sync status: {e}"));
                TriggerOutcome::Failed
            }
        }
    }

    /// Refetch per-source status and recompute the aggregate.
    ///
    /// Results are discarded if a manual sync started or ran while the
    /// fetch was out, or after shutdown; the current status is returned
    /// instead.
    ///
    /// # Errors
    ///
    /// Returns the fetch error; the status is left unchanged.
    pub async fn refresh_status(&self) -> Result<SyncStatus> {
        let generation = self.inner.generation.load(Ordering::SeqCst);
        if self.is_syncing() {
            return Ok(self.status());
        }
        let sources = self.fetch_sources().await?;
        let superseded = self.inner.generation.load(Ordering::SeqCst) != generation;
        if !self.is_alive() || self.is_syncing() || superseded {
            tracing::debug!(superseded, "Discarding sync status refresh");
            return Ok(self.status());
        }
        Ok(self.publish(sources))
    }

    async fn poll_once(&self) {
        if !self.is_alive() {
            return;
        }
        if self.is_syncing() {
            tracing::trace!("Manual sync running, skipping poll");
            return;
        }
        if self.inner.detector.is_offline() {
            tracing::trace!("Offline, skipping poll");
            return;
        }
        if let Err(e) = self.refresh_status().await {
            tracing::warn!(error = %e, "Sync status poll failed");
        }
    }

    /// Poll the status endpoint every `period` until the handle is stopped
    /// or dropped. Must be called from within a tokio runtime.
    #[must_use = "polling stops when the handle is dropped"]
    pub fn start_polling(&self, period: Duration) -> PollingHandle {
        let aggregator = self.clone();
        spawn_interval("sync-poll", period, move || {
            let aggregator = aggregator.clone();
            async move { aggregator.poll_once().await }
        })
    }
}
