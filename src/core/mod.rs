//! Session handling, cached reads, sync status, and connectivity.

pub mod background;
pub mod client;
pub mod connectivity;
pub mod context;
pub mod data;
pub mod http;
pub mod logging;
pub mod session;
pub mod sync;

pub use background::BackgroundTask;
pub use client::{AuthClient, RequestOptions};
pub use connectivity::{ConnectivityListener, ConnectivitySubscription, OfflineDetector};
pub use context::DataLayer;
pub use data::{CacheKey, DataService, DataSource, FetchPolicy, Fetched};
pub use http::ApiResponse;
pub use session::{RefreshError, Session};
pub use sync::{
    PollingHandle, SourceSyncStatus, SyncAggregator, SyncSource, SyncState, SyncStatus,
    TriggerOutcome, compute_status,
};
