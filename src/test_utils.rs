//! Test utilities for dayline.
//!
//! Provides shared helpers, test data factories, and assertion macros
//! for use across all test modules.
//!
//! # Usage
//!
//! ```rust,ignore
//! use dayline::test_utils::*;
//!
//! let server = wiremock::MockServer::start().await;
//! let client = make_test_client(&server.uri(), "access-1", "refresh-1");
//! let dir = TestDir::new();
//! dir.create_file("config.toml", &make_test_config_toml());
//! ```

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write as IoWrite};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use crate::core::client::AuthClient;
use crate::core::connectivity::OfflineDetector;
use crate::core::context::DataLayer;
use crate::error::{DaylineError, Result};
use crate::storage::cache::CacheStore;
use crate::storage::config::ResolvedConfig;
use crate::storage::credentials::{CredentialStore, SecretBackend, TokenPair};

// =============================================================================
// Test Data Factories
// =============================================================================

/// A token pair with recognizable values.
#[must_use]
pub fn make_test_token_pair() -> TokenPair {
    TokenPair::new("access-test-1", "refresh-test-1")
}

/// In-memory credential store already holding `access` / `refresh`.
///
/// # Panics
///
/// Panics if the in-memory store rejects the write.
#[must_use]
pub fn make_test_credentials(access: &str, refresh: &str) -> CredentialStore {
    let store = CredentialStore::in_memory();
    store
        .store_tokens(access, refresh)
        .expect("in-memory credential write");
    store
}

/// Config pointing at `base_url` with short timeouts and no keychain.
///
/// The settle delay is 50ms so trigger tests stay fast.
#[must_use]
pub fn make_test_config(base_url: &str) -> ResolvedConfig {
    ResolvedConfig {
        base_url: base_url.trim_end_matches('/').to_string(),
        timeout: Duration::from_secs(2),
        settle_delay: Duration::from_millis(50),
        poll_interval: Duration::from_millis(100),
        use_keychain: false,
        ..ResolvedConfig::default()
    }
}

/// Client for `base_url` with an in-memory session.
///
/// # Panics
///
/// Panics if the HTTP client cannot be built.
#[must_use]
pub fn make_test_client(base_url: &str, access: &str, refresh: &str) -> AuthClient {
    AuthClient::new(
        &make_test_config(base_url),
        make_test_credentials(access, refresh),
    )
    .expect("test client")
}

/// Fully wired layer over in-memory stores.
///
/// # Panics
///
/// Panics if the HTTP client cannot be built.
#[must_use]
pub fn make_test_layer(base_url: &str, access: &str, refresh: &str) -> DataLayer {
    DataLayer::from_parts(
        make_test_config(base_url),
        make_test_credentials(access, refresh),
        CacheStore::in_memory(),
        OfflineDetector::online(),
    )
    .expect("test data layer")
}

/// Unsigned JWT whose payload carries `exp`.
#[must_use]
pub fn make_jwt(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"user-1","exp":{exp}}}"#));
    format!("{header}.{payload}.sig")
}

/// A `/sync/status` body: mail and tasks synced, calendar never synced.
#[must_use]
pub fn make_test_sync_status_json() -> serde_json::Value {
    serde_json::json!({
        "mail": {"count": 12, "last_synced": "2026-10-16T08:00:00Z"},
        "calendar": {"count": 0, "last_synced": null},
        "tasks": {"count": 4, "last_synced": "2026-10-16T09:30:00Z"}
    })
}

/// Sample config TOML content.
#[must_use]
pub fn make_test_config_toml() -> String {
    r#"[api]
base_url = "http://127.0.0.1:9999"
timeout_seconds = 10

[cache]
daily_plan_ttl_seconds = 120

[sync]
settle_delay_ms = 500
poll_interval_seconds = 15

[credentials]
service = "com.dayline.test"
use_keychain = false
"#
    .to_string()
}

// =============================================================================
// Failing Backend
// =============================================================================

/// Secret backend that fails on demand.
///
/// [`FailingBackend::new`] fails every operation. [`FailingBackend::failing_on`]
/// behaves like an in-memory backend except that writes to one key fail.
#[derive(Debug, Default)]
pub struct FailingBackend {
    fail_key: Option<String>,
    values: Mutex<HashMap<String, String>>,
}

impl FailingBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failing_on(key: &str) -> Self {
        Self {
            fail_key: Some(key.to_string()),
            values: Mutex::default(),
        }
    }

    fn fails_everything(&self) -> bool {
        self.fail_key.is_none()
    }

    fn unavailable() -> DaylineError {
        DaylineError::Keyring("backend unavailable".to_string())
    }
}

impl SecretBackend for FailingBackend {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        if self.fails_everything() {
            return Err(Self::unavailable());
        }
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if self.fails_everything() || self.fail_key.as_deref() == Some(key) {
            return Err(Self::unavailable());
        }
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<()> {
        if self.fails_everything() {
            return Err(Self::unavailable());
        }
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.remove(key);
        Ok(())
    }
}

// =============================================================================
// Temporary Directory Helpers
// =============================================================================

/// A temporary directory that is cleaned up when dropped.
///
/// # Examples
///
/// ```rust,ignore
/// use dayline::test_utils::TestDir;
///
/// let dir = TestDir::new();
/// dir.create_file("config.toml", "[api]\ntimeout_seconds = 30");
/// assert!(dir.file_exists("config.toml"));
/// ```
pub struct TestDir {
    inner: tempfile::TempDir,
}

impl TestDir {
    /// Create a new isolated temporary directory.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: tempfile::tempdir().expect("Failed to create temp directory"),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Create a file with the given content, creating parent directories.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be created or written.
    pub fn create_file(&self, name: &str, content: &str) {
        let path = self.inner.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        let mut file = fs::File::create(&path).expect("Failed to create test file");
        file.write_all(content.as_bytes())
            .expect("Failed to write test file");
    }

    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn read_file(&self, name: &str) -> io::Result<String> {
        fs::read_to_string(self.inner.path().join(name))
    }

    #[must_use]
    pub fn file_exists(&self, name: &str) -> bool {
        self.inner.path().join(name).exists()
    }

    #[must_use]
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.inner.path().join(name)
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Assertion Macros
// =============================================================================

/// Assert that a string contains a substring.
///
/// ```rust,ignore
/// use dayline::assert_contains;
///
/// assert_contains!("Sync failed: timeout", "timeout");
/// ```
#[macro_export]
macro_rules! assert_contains {
    ($haystack:expr, $needle:expr) => {
        let haystack = $haystack;
        let needle = $needle;
        assert!(
            haystack.contains(needle),
            "Expected string to contain {:?}\n\nActual string:\n{:?}",
            needle,
            haystack
        );
    };
}

/// Assert that a string does NOT contain a substring.
#[macro_export]
macro_rules! assert_not_contains {
    ($haystack:expr, $needle:expr) => {
        let haystack = $haystack;
        let needle = $needle;
        assert!(
            !haystack.contains(needle),
            "Expected string NOT to contain {:?}\n\nActual string:\n{:?}",
            needle,
            haystack
        );
    };
}

// =============================================================================
// Tests for Test Utilities
// =============================================================================
