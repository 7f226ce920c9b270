//! Persistence for configuration, credentials, and cached reads.

pub mod cache;
pub mod config;
pub mod credentials;
pub mod kv;
pub mod paths;

pub use cache::{CacheEntry, CacheStats, CacheStore, StaleRead};
pub use config::{
    CacheTtls, Config, ConfigSource, ConfigSources, ENV_API_URL, ENV_CONFIG, ENV_NO_KEYCHAIN,
    ENV_TIMEOUT, ResolvedConfig,
};
pub use credentials::{
    AuthStatus, CredentialStore, FallbackBackend, FileBackend, KeyringBackend, MemoryBackend,
    SecretBackend, TokenPair,
};
pub use kv::{KeyValueStore, MemoryStore, SqliteStore};
pub use paths::AppPaths;
