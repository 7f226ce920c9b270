//! Configuration file loading and management.
//!
//! Loads configuration from:
//! - Linux/macOS: `~/.config/dayline/config.toml`
//! - Windows: `%APPDATA%/dayline/config.toml`
//!
//! ## Precedence
//!
//! Settings are resolved with the following precedence (highest first):
//! 1. Environment variables
//! 2. Config file
//! 3. Built-in defaults
//!
//! ## Environment Variables
//!
//! - `DAYLINE_API_URL`: Backend base URL
//! - `DAYLINE_TIMEOUT`: Request timeout in seconds
//! - `DAYLINE_NO_KEYCHAIN`: Skip the OS keychain (1, true, yes)
//! - `DAYLINE_CONFIG`: Override config file path

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::error::{DaylineError, Result};

// =============================================================================
// Environment Variable Names
// =============================================================================

/// Environment variable for the backend base URL.
pub const ENV_API_URL: &str = "DAYLINE_API_URL";
/// Environment variable for timeout in seconds.
pub const ENV_TIMEOUT: &str = "DAYLINE_TIMEOUT";
/// Environment variable to bypass the OS keychain.
pub const ENV_NO_KEYCHAIN: &str = "DAYLINE_NO_KEYCHAIN";
/// Environment variable to override config file path.
pub const ENV_CONFIG: &str = "DAYLINE_CONFIG";

/// Upper bound accepted for `api.timeout_seconds`.
const MAX_TIMEOUT_SECONDS: u64 = 300;

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Fully resolved configuration after merging env vars and config file.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Backend base URL, without trailing slash.
    pub base_url: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Path probed by the connectivity monitor.
    pub health_path: String,
    /// Per-kind cache lifetimes.
    pub cache_ttls: CacheTtls,
    /// Wait between a sync trigger and the status refetch.
    pub settle_delay: Duration,
    /// Background status polling interval.
    pub poll_interval: Duration,
    /// Keychain service name for stored tokens.
    pub keychain_service: String,
    /// Whether the OS keychain is used as primary credential store.
    pub use_keychain: bool,
    /// Source of each setting for debugging.
    pub sources: ConfigSources,
}

/// Tracks the source of each overridable configuration value.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    pub base_url: ConfigSource,
    pub timeout: ConfigSource,
    pub use_keychain: ConfigSource,
}

/// Where a configuration value came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Value from environment variable.
    Env,
    /// Value from config file.
    ConfigFile,
    /// Built-in default.
    #[default]
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Env => write!(f, "environment variable"),
            Self::ConfigFile => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// Cache lifetimes per data kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    pub notifications: Duration,
    pub daily_plan: Duration,
    pub inbox: Duration,
    pub calendar: Duration,
    pub tasks: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        CacheConfig::default().ttls()
    }
}

impl ResolvedConfig {
    /// Resolve final configuration from the process environment and config file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The config file exists but is invalid
    /// - Any resolved value is invalid
    pub fn resolve() -> Result<Self> {
        let env = |key: &str| std::env::var(key).ok();
        let config = match env(ENV_CONFIG) {
            Some(path) => Config::load_from(Path::new(&path))?,
            None => Config::load()?,
        };
        Self::resolve_with(&config, env)
    }

    /// Resolve against an explicit config and environment lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the merged configuration fails validation.
    pub fn resolve_with(config: &Config, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut merged = config.clone();
        let mut sources = ConfigSources {
            base_url: ConfigSource::ConfigFile,
            timeout: ConfigSource::ConfigFile,
            use_keychain: ConfigSource::ConfigFile,
        };

        if let Some(url) = env(ENV_API_URL) {
            merged.api.base_url = url;
            sources.base_url = ConfigSource::Env;
        }

        if let Some(raw) = env(ENV_TIMEOUT) {
            let seconds = raw.trim().parse::<u64>().map_err(|_| DaylineError::ConfigInvalid {
                key: ENV_TIMEOUT.to_string(),
                value: raw.clone(),
                message: "expected a whole number of seconds".to_string(),
            })?;
            merged.api.timeout_seconds = seconds;
            sources.timeout = ConfigSource::Env;
        }

        if env(ENV_NO_KEYCHAIN).is_some_and(|v| is_truthy(&v)) {
            merged.credentials.use_keychain = false;
            sources.use_keychain = ConfigSource::Env;
        }

        let defaults = Config::default();
        if sources.base_url == ConfigSource::ConfigFile && merged.api.base_url == defaults.api.base_url {
            sources.base_url = ConfigSource::Default;
        }
        if sources.timeout == ConfigSource::ConfigFile
            && merged.api.timeout_seconds == defaults.api.timeout_seconds
        {
            sources.timeout = ConfigSource::Default;
        }
        if sources.use_keychain == ConfigSource::ConfigFile
            && merged.credentials.use_keychain == defaults.credentials.use_keychain
        {
            sources.use_keychain = ConfigSource::Default;
        }

        merged.validate()?;

        Ok(Self {
            base_url: merged.api.base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(merged.api.timeout_seconds),
            health_path: merged.api.health_path.clone(),
            cache_ttls: merged.cache.ttls(),
            settle_delay: Duration::from_millis(merged.sync.settle_delay_ms),
            poll_interval: Duration::from_secs(merged.sync.poll_interval_seconds),
            keychain_service: merged.credentials.service.clone(),
            use_keychain: merged.credentials.use_keychain,
            sources,
        })
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        let config = Config::default();
        Self {
            base_url: config.api.base_url,
            timeout: Duration::from_secs(config.api.timeout_seconds),
            health_path: config.api.health_path,
            cache_ttls: config.cache.ttls(),
            settle_delay: Duration::from_millis(config.sync.settle_delay_ms),
            poll_interval: Duration::from_secs(config.sync.poll_interval_seconds),
            keychain_service: config.credentials.service,
            use_keychain: config.credentials.use_keychain,
            sources: ConfigSources::default(),
        }
    }
}

/// Check if a value reads as "on".
fn is_truthy(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

// =============================================================================
// File Configuration
// =============================================================================

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend connection settings.
    pub api: ApiConfig,
    /// Cache lifetimes.
    pub cache: CacheConfig,
    /// Sync trigger and polling settings.
    pub sync: SyncConfig,
    /// Credential storage settings.
    pub credentials: CredentialsConfig,
}

/// Backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the backend.
    pub base_url: String,
    /// Default timeout for network requests in seconds.
    pub timeout_seconds: u64,
    /// Lightweight endpoint used to probe connectivity.
    pub health_path: String,
}

/// Cache lifetime settings, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub notifications_ttl_seconds: u64,
    pub daily_plan_ttl_seconds: u64,
    pub inbox_ttl_seconds: u64,
    pub calendar_ttl_seconds: u64,
    pub tasks_ttl_seconds: u64,
}

/// Sync settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Wait after a trigger before the status is refetched.
    pub settle_delay_ms: u64,
    /// Interval of background status polling.
    pub poll_interval_seconds: u64,
}

/// Credential storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Keychain service name.
    pub service: String,
    /// Use the OS keychain as the primary store.
    pub use_keychain: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8787".to_string(),
            timeout_seconds: 30,
            health_path: "/health".to_string(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            notifications_ttl_seconds: 60,
            daily_plan_ttl_seconds: 30 * 60,
            inbox_ttl_seconds: 5 * 60,
            calendar_ttl_seconds: 10 * 60,
            tasks_ttl_seconds: 10 * 60,
        }
    }
}

impl CacheConfig {
    /// Convert to durations.
    #[must_use]
    pub const fn ttls(&self) -> CacheTtls {
        CacheTtls {
            notifications: Duration::from_secs(self.notifications_ttl_seconds),
            daily_plan: Duration::from_secs(self.daily_plan_ttl_seconds),
            inbox: Duration::from_secs(self.inbox_ttl_seconds),
            calendar: Duration::from_secs(self.calendar_ttl_seconds),
            tasks: Duration::from_secs(self.tasks_ttl_seconds),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 2000,
            poll_interval_seconds: 60,
        }
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            service: "com.dayline.client".to_string(),
            use_keychain: true,
        }
    }
}

impl Config {
    /// Load configuration from the default config file path.
    ///
    /// Returns default config if the file doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns error only if the file exists but is invalid.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().config_file())
    }

    /// Load configuration from a specific path.
    ///
    /// Returns default config if the file doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns error only if the file exists but is invalid.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(?path, "Config file not found, using defaults");
            return Ok(Self::default());
        }

        tracing::debug!(?path, "Loading config file");
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| DaylineError::ConfigParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Save configuration to a specific path.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or the write fails.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| DaylineError::Config(format!("Failed to serialize config: {e}")))?;

        fs::write(path, content)?;
        tracing::debug!(?path, "Config file saved");
        Ok(())
    }

    /// Validate configuration values.
    ///
    /// Checks that:
    /// - The base URL is an http(s) URL
    /// - Timeout is within 1-300 seconds
    /// - Polling interval and cache lifetimes are non-zero
    ///
    /// # Errors
    ///
    /// Returns the first invalid value found.
    pub fn validate(&self) -> Result<()> {
        let url = self.api.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(DaylineError::ConfigInvalid {
                key: "api.base_url".to_string(),
                value: self.api.base_url.clone(),
                message: "must be an http:// or https:// URL".to_string(),
            });
        }

        if self.api.timeout_seconds == 0 || self.api.timeout_seconds > MAX_TIMEOUT_SECONDS {
            return Err(DaylineError::ConfigInvalid {
                key: "api.timeout_seconds".to_string(),
                value: self.api.timeout_seconds.to_string(),
                message: format!("must be between 1 and {MAX_TIMEOUT_SECONDS} seconds"),
            });
        }

        if !self.api.health_path.starts_with('/') {
            return Err(DaylineError::ConfigInvalid {
                key: "api.health_path".to_string(),
                value: self.api.health_path.clone(),
                message: "must start with '/'".to_string(),
            });
        }

        if self.sync.poll_interval_seconds == 0 {
            return Err(DaylineError::ConfigInvalid {
                key: "sync.poll_interval_seconds".to_string(),
                value: "0".to_string(),
                message: "must be at least 1 second".to_string(),
            });
        }

        let ttls = [
            ("cache.notifications_ttl_seconds", self.cache.notifications_ttl_seconds),
            ("cache.daily_plan_ttl_seconds", self.cache.daily_plan_ttl_seconds),
            ("cache.inbox_ttl_seconds", self.cache.inbox_ttl_seconds),
            ("cache.calendar_ttl_seconds", self.cache.calendar_ttl_seconds),
            ("cache.tasks_ttl_seconds", self.cache.tasks_ttl_seconds),
        ];
        if let Some((key, _)) = ttls.iter().find(|(_, v)| *v == 0) {
            return Err(DaylineError::ConfigInvalid {
                key: (*key).to_string(),
                value: "0".to_string(),
                message: "cache lifetime must be non-zero".to_string(),
            });
        }

        if self.credentials.service.trim().is_empty() {
            return Err(DaylineError::Config(
                "credentials.service must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
