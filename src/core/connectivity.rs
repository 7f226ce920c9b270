//! Connectivity tracking.
//!
//! [`OfflineDetector`] holds the current online/offline state. Platform
//! network events are fed in through [`OfflineDetector::set_online`]; an
//! optional [`spawn_probe`] loop can feed it from periodic health checks.
//! Subscribers are only woken on actual transitions.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::background::{BackgroundTask, spawn_interval};

/// Shared online/offline flag.
///
/// Cloning is cheap; clones observe and update the same state.
#[derive(Debug, Clone)]
pub struct OfflineDetector {
    state: Arc<watch::Sender<bool>>,
}

impl OfflineDetector {
    /// Detector starting in the given state.
    #[must_use]
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self {
            state: Arc::new(tx),
        }
    }

    /// Detector that assumes the network is up until told otherwise.
    #[must_use]
    pub fn online() -> Self {
        Self::new(true)
    }

    #[must_use]
    pub fn is_offline(&self) -> bool {
        !*self.state.borrow()
    }

    /// Record the platform's connectivity. Returns true if the state changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::info!(online, "Connectivity changed");
        }
        changed
    }

    /// Watch for transitions. Dropping the subscription unsubscribes.
    #[must_use]
    pub fn subscribe(&self) -> ConnectivitySubscription {
        ConnectivitySubscription {
            rx: self.state.subscribe(),
        }
    }

    /// Call `callback(is_offline)` on every transition until the returned
    /// guard is dropped. Must be called from within a tokio runtime.
    pub fn on_change<F>(&self, mut callback: F) -> ConnectivityListener
    where
        F: FnMut(bool) + Send + 'static,
    {
        let mut subscription = self.subscribe();
        let task = tokio::spawn(async move {
            while let Some(offline) = subscription.changed().await {
                callback(offline);
            }
        });
        ConnectivityListener { task }
    }
}

impl Default for OfflineDetector {
    fn default() -> Self {
        Self::online()
    }
}

/// Receiver side of [`OfflineDetector::subscribe`].
#[derive(Debug)]
pub struct ConnectivitySubscription {
    rx: watch::Receiver<bool>,
}

impl ConnectivitySubscription {
    /// Wait for the next transition and return the new `is_offline` value.
    ///
    /// Returns `None` once every detector handle has been dropped.
    pub async fn changed(&mut self) -> Option<bool> {
        self.rx.changed().await.ok()?;
        Some(!*self.rx.borrow_and_update())
    }

    #[must_use]
    pub fn is_offline(&self) -> bool {
        !*self.rx.borrow()
    }
}

/// Guard returned by [`OfflineDetector::on_change`]; drop to unsubscribe.
#[derive(Debug)]
pub struct ConnectivityListener {
    task: JoinHandle<()>,
}

impl Drop for ConnectivityListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// =============================================================================
// Health probe
// =============================================================================

/// Single reachability check: any HTTP response counts as online.
pub async fn probe_once(http: &Client, url: &str) -> bool {
    match http.get(url).send().await {
        Ok(response) => {
            tracing::trace!(url, status = response.status().as_u16(), "Health probe answered");
            true
        }
        Err(e) => {
            tracing::debug!(url, error = %e, "Health probe failed");
            false
        }
    }
}

/// Probe `url` every `period` and feed the result into `detector`.
///
/// Must be called from within a tokio runtime.
pub fn spawn_probe(
    detector: OfflineDetector,
    http: Client,
    url: String,
    period: Duration,
) -> BackgroundTask {
    let url: Arc<str> = url.into();
    spawn_interval("connectivity-probe", period, move || {
        let detector = detector.clone();
        let http = http.clone();
        let url = Arc::clone(&url);
        async move {
            let online = probe_once(&http, &url).await;
            detector.set_online(online);
        }
    })
}
