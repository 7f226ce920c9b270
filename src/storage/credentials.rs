//! Session token persistence.
//!
//! Tokens live in two places: the OS keychain (primary, may be unavailable in
//! sandboxed or unsigned builds) and a JSON file in the config directory
//! (fallback, always written). [`FallbackBackend`] composes the two; the
//! [`CredentialStore`] on top keeps an in-memory snapshot so a token pair is
//! always replaced as a unit.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{DaylineError, Result};
use crate::storage::config::ResolvedConfig;
use crate::storage::paths::AppPaths;

/// Storage key for the bearer token.
pub const ACCESS_TOKEN_KEY: &str = "access_token";
/// Storage key for the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

// =============================================================================
// Token types
// =============================================================================

/// Access and refresh token, always stored and replaced together.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    #[serde(alias = "accessToken")]
    pub access_token: String,
    #[serde(alias = "refreshToken")]
    pub refresh_token: String,
}

impl TokenPair {
    #[must_use]
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &fingerprint(&self.access_token))
            .field("refresh_token", &fingerprint(&self.refresh_token))
            .finish()
    }
}

/// Snapshot of the session for UI gating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    pub is_authenticated: bool,
    /// `exp` claim of the access token, when it is a JWT.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Short, non-reversible identifier for a token, safe to log.
#[must_use]
pub fn fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..6])
}

/// Read the `exp` claim from a JWT without verifying it.
#[must_use]
pub fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    DateTime::from_timestamp(exp, 0)
}

// =============================================================================
// Backends
// =============================================================================

/// A place secrets can be read from and written to.
pub trait SecretBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Read a secret. Absence is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unavailable.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a secret.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unavailable or rejects the write.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a secret. Deleting a missing secret succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unavailable.
    fn clear(&self, key: &str) -> Result<()>;
}

/// OS keychain via the `keyring` crate.
#[derive(Debug, Clone)]
pub struct KeyringBackend {
    service: String,
}

impl KeyringBackend {
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, key).map_err(|e| DaylineError::Keyring(e.to_string()))
    }
}

impl SecretBackend for KeyringBackend {
    fn name(&self) -> &'static str {
        "keychain"
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(DaylineError::Keyring(e.to_string())),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entry(key)?
            .set_password(value)
            .map_err(|e| DaylineError::Keyring(e.to_string()))
    }

    fn clear(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(DaylineError::Keyring(e.to_string())),
        }
    }
}

/// JSON map on disk, rewritten atomically on every change.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileBackend {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content).map_err(|e| {
            DaylineError::Storage(format!(
                "credential file {} is corrupt: {e}",
                self.path.display()
            ))
        })
    }

    fn save(&self, map: &BTreeMap<String, String>) -> Result<()> {
        let content = serde_json::to_vec_pretty(map)?;
        write_private(&self.path, &content)?;
        Ok(())
    }

    fn update(&self, apply: impl FnOnce(&mut BTreeMap<String, String>)) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut map = self.load()?;
        apply(&mut map);
        self.save(&map)
    }
}

impl SecretBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.load()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.update(|map| {
            map.insert(key.to_string(), value.to_string());
        })
    }

    fn clear(&self, key: &str) -> Result<()> {
        self.update(|map| {
            map.remove(key);
        })
    }
}

/// Write bytes atomically using temp file + rename, owner-only on unix.
fn write_private(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let temp_path = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("credentials"),
        std::process::id()
    ));

    {
        let mut file = std::fs::File::create(&temp_path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(content)?;
        file.sync_all()?;
    }

    std::fs::rename(&temp_path, path)
}

/// Process-local backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.remove(key);
        Ok(())
    }
}

/// Primary-then-fallback composition.
///
/// Reads try the primary and fall back on error or absence. Writes always hit
/// the fallback (its failure is the caller's failure) and best-effort the
/// primary (failures are logged and swallowed).
pub struct FallbackBackend {
    primary: Box<dyn SecretBackend>,
    fallback: Box<dyn SecretBackend>,
}

impl FallbackBackend {
    #[must_use]
    pub fn new(primary: Box<dyn SecretBackend>, fallback: Box<dyn SecretBackend>) -> Self {
        Self { primary, fallback }
    }
}

impl std::fmt::Debug for FallbackBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackBackend")
            .field("primary", &self.primary.name())
            .field("fallback", &self.fallback.name())
            .finish()
    }
}

impl SecretBackend for FallbackBackend {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.primary.get(key) {
            Ok(Some(value)) => return Ok(Some(value)),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    backend = self.primary.name(),
                    key,
                    error = %e,
                    "Primary secret store unavailable, reading fallback"
                );
            }
        }
        self.fallback.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.fallback.set(key, value)?;
        if let Err(e) = self.primary.set(key, value) {
            tracing::warn!(
                backend = self.primary.name(),
                key,
                error = %e,
                "Primary secret store write failed, kept fallback copy"
            );
            // An older primary value would shadow the fallback on the next read.
            if let Err(e) = self.primary.clear(key) {
                tracing::debug!(backend = self.primary.name(), key, error = %e, "Primary clear failed");
            }
        }
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<()> {
        self.fallback.clear(key)?;
        if let Err(e) = self.primary.clear(key) {
            tracing::warn!(
                backend = self.primary.name(),
                key,
                error = %e,
                "Primary secret store delete failed"
            );
        }
        Ok(())
    }
}

// =============================================================================
// Credential store
// =============================================================================

#[derive(Debug, Default)]
struct Snapshot {
    loaded: bool,
    access: Option<String>,
    refresh: Option<String>,
}

/// Owner of the session token pair.
///
/// Reads never fail: an unreadable backend is logged and reported as absent.
#[derive(Clone)]
pub struct CredentialStore {
    backend: Arc<dyn SecretBackend>,
    snapshot: Arc<RwLock<Snapshot>>,
    /// Serializes backend writes; readers only wait on `snapshot`.
    writer: Arc<Mutex<()>>,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("backend", &self.backend.name())
            .finish_non_exhaustive()
    }
}

impl CredentialStore {
    /// Store over an explicit backend.
    #[must_use]
    pub fn new(backend: Arc<dyn SecretBackend>) -> Self {
        Self {
            backend,
            snapshot: Arc::new(RwLock::new(Snapshot::default())),
            writer: Arc::new(Mutex::new(())),
        }
    }

    /// Keychain-plus-file store as configured.
    #[must_use]
    pub fn from_config(config: &ResolvedConfig, paths: &AppPaths) -> Self {
        let file = FileBackend::new(paths.credentials_file());
        if config.use_keychain {
            let keychain = KeyringBackend::new(&config.keychain_service);
            Self::new(Arc::new(FallbackBackend::new(
                Box::new(keychain),
                Box::new(file),
            )))
        } else {
            tracing::debug!("Keychain disabled, using credential file only");
            Self::new(Arc::new(file))
        }
    }

    /// Store that forgets everything on exit.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    fn read_backend(&self, key: &str) -> Option<String> {
        match self.backend.get(key) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "Credential read failed");
                None
            }
        }
    }

    fn ensure_loaded(&self) {
        {
            let snapshot = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
            if snapshot.loaded {
                return;
            }
        }
        let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        if !snapshot.loaded {
            snapshot.access = self.read_backend(ACCESS_TOKEN_KEY);
            snapshot.refresh = self.read_backend(REFRESH_TOKEN_KEY);
            snapshot.loaded = true;
        }
    }

    /// Current bearer token.
    #[must_use]
    pub fn get_access_token(&self) -> Option<String> {
        self.ensure_loaded();
        let snapshot = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        snapshot.access.clone()
    }

    /// Current refresh token.
    #[must_use]
    pub fn get_refresh_token(&self) -> Option<String> {
        self.ensure_loaded();
        let snapshot = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        snapshot.refresh.clone()
    }

    /// Both tokens, if both are present.
    #[must_use]
    pub fn token_pair(&self) -> Option<TokenPair> {
        self.ensure_loaded();
        let snapshot = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        match (&snapshot.access, &snapshot.refresh) {
            (Some(access), Some(refresh)) => Some(TokenPair::new(access, refresh)),
            _ => None,
        }
    }

    /// Whether a session exists.
    #[must_use]
    pub fn has_tokens(&self) -> bool {
        self.get_access_token().is_some()
    }

    /// Replace both tokens.
    ///
    /// Concurrent readers see either the old pair or the new pair, and are
    /// not held up by backend I/O. If the second write fails the first is
    /// rolled back.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects either write.
    pub fn store_tokens(&self, access_token: &str, refresh_token: &str) -> Result<()> {
        self.ensure_loaded();
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = self
            .snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .access
            .clone();

        self.backend.set(ACCESS_TOKEN_KEY, access_token)?;
        if let Err(e) = self.backend.set(REFRESH_TOKEN_KEY, refresh_token) {
            let rollback = match &previous {
                Some(previous) => self.backend.set(ACCESS_TOKEN_KEY, previous),
                None => self.backend.clear(ACCESS_TOKEN_KEY),
            };
            if let Err(rollback_err) = rollback {
                tracing::warn!(error = %rollback_err, "Access token rollback failed");
            }
            return Err(e);
        }

        {
            let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
            snapshot.access = Some(access_token.to_string());
            snapshot.refresh = Some(refresh_token.to_string());
        }

        tracing::info!(
            access = %fingerprint(access_token),
            backend = self.backend.name(),
            "Stored session tokens"
        );
        Ok(())
    }

    /// Forget the session.
    ///
    /// # Errors
    ///
    /// Returns the first backend error; both keys are attempted regardless.
    pub fn clear_tokens(&self) -> Result<()> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        snapshot.access = None;
        snapshot.refresh = None;
        snapshot.loaded = true;
        drop(snapshot);

        let access = self.backend.clear(ACCESS_TOKEN_KEY);
        let refresh = self.backend.clear(REFRESH_TOKEN_KEY);
        tracing::info!("Cleared session tokens");
        access.and(refresh)
    }

    /// Authentication summary, with expiry decoded from a JWT access token.
    #[must_use]
    pub fn auth_status(&self) -> AuthStatus {
        let access = self.get_access_token();
        AuthStatus {
            is_authenticated: access.is_some(),
            expires_at: access.as_deref().and_then(jwt_expiry),
        }
    }
}
