//! Error types for dayline.
//!
//! Uses `thiserror` for structured error types.
//!
//! ## Error Taxonomy
//!
//! Errors are categorized into six main categories:
//! - **Authentication**: No usable session, or the refresh endpoint rejected it
//! - **Network**: Transport failures where no response was received
//! - **Remote**: The backend answered with a non-success status
//! - **Configuration**: Config file parsing, validation, or missing values
//! - **Storage**: Keychain, credential file, or cache store failures
//! - **Internal**: Unexpected errors, bugs, or unclassified issues
//!
//! Each error has a stable error code (e.g., `DAYLINE-A001`) for programmatic handling.
//!
//! Only [`ErrorCategory::Network`] errors may be answered from a stale cache
//! entry; see [`DaylineError::is_fallback_eligible`].

use thiserror::Error;

// =============================================================================
// Error Categories
// =============================================================================

/// High-level error categories for classification and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Session missing, expired beyond refresh, or rejected.
    Authentication,
    /// Transport failures (timeout, DNS, connection refused).
    Network,
    /// Non-success HTTP status with a server payload.
    Remote,
    /// Configuration issues (parse errors, invalid values).
    Configuration,
    /// Local persistence issues (keychain, files, cache database).
    Storage,
    /// Internal errors (bugs, unexpected state, unclassified).
    Internal,
}

impl ErrorCategory {
    /// Returns a human-readable description of the category.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Authentication => "Authentication error",
            Self::Network => "Network error",
            Self::Remote => "Remote error",
            Self::Configuration => "Configuration error",
            Self::Storage => "Storage error",
            Self::Internal => "Internal error",
        }
    }

    /// Returns a short code prefix for this category.
    #[must_use]
    pub const fn code_prefix(&self) -> &'static str {
        match self {
            Self::Authentication => "A",
            Self::Network => "N",
            Self::Remote => "R",
            Self::Configuration => "C",
            Self::Storage => "S",
            Self::Internal => "X",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Main error type for dayline operations.
///
/// Each variant has:
/// - A stable error code (e.g., `DAYLINE-A001`)
/// - A category for classification
/// - A fallback flag deciding whether stale cache may stand in for it
#[derive(Error, Debug)]
pub enum DaylineError {
    // ==========================================================================
    // Authentication errors (Category: Authentication)
    // ==========================================================================
    /// No access token is available, or the session could not be refreshed.
    #[error("not authenticated")]
    Unauthenticated,

    /// The refresh endpoint rejected the refresh token.
    #[error("session refresh rejected with HTTP {status}")]
    RefreshRejected { status: u16 },

    /// A refresh was needed but no refresh token is stored.
    #[error("no refresh token available")]
    MissingRefreshToken,

    // ==========================================================================
    // Network errors (Category: Network)
    // ==========================================================================
    /// Request timed out after the configured duration.
    #[error("request timeout after {0} seconds")]
    Timeout(u64),

    /// Connection could not be established or was dropped.
    #[error("network error: {0}")]
    Network(String),

    /// The device is offline and the request was not attempted.
    #[error("offline")]
    Offline,

    // ==========================================================================
    // Remote errors (Category: Remote)
    // ==========================================================================
    /// The backend responded with a non-success status.
    #[error("HTTP {status}: {message}")]
    Remote {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// The backend responded with a body that could not be decoded.
    #[error("failed to parse response: {0}")]
    ParseResponse(String),

    // ==========================================================================
    // Configuration errors (Category: Configuration)
    // ==========================================================================
    /// Generic configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Error parsing configuration file.
    #[error("config parse error at {path}: {message}")]
    ConfigParse { path: String, message: String },

    /// Invalid value in configuration.
    #[error("invalid config value for '{key}': {message}")]
    ConfigInvalid {
        key: String,
        value: String,
        message: String,
    },

    // ==========================================================================
    // Storage errors (Category: Storage)
    // ==========================================================================
    /// OS keychain access failed.
    #[error("keychain error: {0}")]
    Keyring(String),

    /// Local store (credential file, cache database) failed.
    #[error("storage error: {0}")]
    Storage(String),

    // ==========================================================================
    // I/O errors (Category: Internal)
    // ==========================================================================
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ==========================================================================
    // Generic wrapper (Category: Internal)
    // ==========================================================================
    /// Catch-all for other errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DaylineError {
    /// Returns the error category for classification and routing.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Unauthenticated | Self::RefreshRejected { .. } | Self::MissingRefreshToken => {
                ErrorCategory::Authentication
            }

            Self::Timeout(_) | Self::Network(_) | Self::Offline => ErrorCategory::Network,

            Self::Remote { .. } | Self::ParseResponse(_) => ErrorCategory::Remote,

            Self::Config(_) | Self::ConfigParse { .. } | Self::ConfigInvalid { .. } => {
                ErrorCategory::Configuration
            }

            Self::Keyring(_) | Self::Storage(_) => ErrorCategory::Storage,

            Self::Io(_) | Self::Json(_) | Self::Other(_) => ErrorCategory::Internal,
        }
    }

    /// Returns a stable error code for programmatic handling.
    ///
    /// Format: `DAYLINE-{category}{number}` where category is:
    /// - A: Authentication
    /// - N: Network
    /// - R: Remote
    /// - C: Configuration
    /// - S: Storage
    /// - X: Internal
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "DAYLINE-A001",
            Self::RefreshRejected { .. } => "DAYLINE-A002",
            Self::MissingRefreshToken => "DAYLINE-A003",

            Self::Timeout(_) => "DAYLINE-N001",
            Self::Offline => "DAYLINE-N002",
            Self::Network(_) => "DAYLINE-N099",

            Self::Remote { .. } => "DAYLINE-R001",
            Self::ParseResponse(_) => "DAYLINE-R002",

            Self::ConfigParse { .. } => "DAYLINE-C001",
            Self::ConfigInvalid { .. } => "DAYLINE-C002",
            Self::Config(_) => "DAYLINE-C003",

            Self::Keyring(_) => "DAYLINE-S001",
            Self::Storage(_) => "DAYLINE-S002",

            Self::Io(_) => "DAYLINE-X001",
            Self::Json(_) => "DAYLINE-X002",
            Self::Other(_) => "DAYLINE-X099",
        }
    }

    /// Whether a cached value (even an expired one) may be served instead.
    ///
    /// True only for transport failures. A response from the server, even an
    /// error response, is authoritative and must reach the caller.
    #[must_use]
    pub const fn is_fallback_eligible(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Network(_) | Self::Offline)
    }

    /// Returns whether the error is potentially recoverable by retrying.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Network(_) | Self::Offline => true,
            Self::Remote { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Returns whether the error means the user has to sign in again.
    #[must_use]
    pub const fn requires_login(&self) -> bool {
        matches!(self.category(), ErrorCategory::Authentication)
    }

    /// Returns the HTTP status if the backend produced one.
    #[must_use]
    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::Remote { status, .. } | Self::RefreshRejected { status } => Some(*status),
            _ => None,
        }
    }
}

/// Result type alias for dayline operations.
pub type Result<T> = std::result::Result<T, DaylineError>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(status: u16) -> DaylineError {
        DaylineError::Remote {
            status,
            code: None,
            message: "boom".to_string(),
        }
    }

    #[test]
    fn error_category_code_prefix() {
        assert_eq!(ErrorCategory::Authentication.code_prefix(), "A");
        assert_eq!(ErrorCategory::Network.code_prefix(), "N");
        assert_eq!(ErrorCategory::Remote.code_prefix(), "R");
        assert_eq!(ErrorCategory::Storage.code_prefix(), "S");
    }

    #[test]
    fn error_category_display() {
        assert_eq!(format!("{}", ErrorCategory::Remote), "Remote error");
    }

    #[test]
    fn authentication_errors_have_correct_category() {
        assert_eq!(
            DaylineError::Unauthenticated.category(),
            ErrorCategory::Authentication
        );
        assert_eq!(
            DaylineError::RefreshRejected { status: 401 }.category(),
            ErrorCategory::Authentication
        );
        assert!(DaylineError::MissingRefreshToken.requires_login());
    }

    #[test]
    fn error_codes_match_category_prefix() {
        let errors = vec![
            DaylineError::Unauthenticated,
            DaylineError::Timeout(30),
            DaylineError::Network("refused".to_string()),
            remote(404),
            DaylineError::Config("bad".to_string()),
            DaylineError::Storage("locked".to_string()),
            DaylineError::Other(anyhow::anyhow!("x")),
        ];

        for err in errors {
            let code = err.error_code();
            let expected = format!("DAYLINE-{}", err.category().code_prefix());
            assert!(code.starts_with(&expected), "{code} should start with {expected}");
        }
    }

    #[test]
    fn error_codes_are_unique() {
        use std::collections::HashSet;

        let codes = [
            DaylineError::Unauthenticated.error_code(),
            DaylineError::RefreshRejected { status: 0 }.error_code(),
            DaylineError::MissingRefreshToken.error_code(),
            DaylineError::Timeout(0).error_code(),
            DaylineError::Network(String::new()).error_code(),
            DaylineError::Offline.error_code(),
            remote(500).error_code(),
            DaylineError::ParseResponse(String::new()).error_code(),
            DaylineError::Config(String::new()).error_code(),
            DaylineError::ConfigParse {
                path: String::new(),
                message: String::new(),
            }
            .error_code(),
            DaylineError::ConfigInvalid {
                key: String::new(),
                value: String::new(),
                message: String::new(),
            }
            .error_code(),
            DaylineError::Keyring(String::new()).error_code(),
            DaylineError::Storage(String::new()).error_code(),
        ];

        let unique: HashSet<_> = codes.iter().collect();
        assert_eq!(codes.len(), unique.len(), "Error codes should be unique");
    }

    #[test]
    fn only_transport_failures_are_fallback_eligible() {
        assert!(DaylineError::Timeout(5).is_fallback_eligible());
        assert!(DaylineError::Network("dns".to_string()).is_fallback_eligible());
        assert!(DaylineError::Offline.is_fallback_eligible());

        assert!(!remote(404).is_fallback_eligible());
        assert!(!remote(503).is_fallback_eligible());
        assert!(!DaylineError::Unauthenticated.is_fallback_eligible());
        assert!(!DaylineError::ParseResponse("eof".to_string()).is_fallback_eligible());
    }

    #[test]
    fn retryable_errors() {
        assert!(DaylineError::Timeout(5).is_retryable());
        assert!(remote(503).is_retryable());
        assert!(remote(429).is_retryable());
        assert!(!remote(400).is_retryable());
        assert!(!DaylineError::Unauthenticated.is_retryable());
    }

    #[test]
    fn status_code_extraction() {
        assert_eq!(remote(418).status_code(), Some(418));
        assert_eq!(
            DaylineError::RefreshRejected { status: 403 }.status_code(),
            Some(403)
        );
        assert_eq!(DaylineError::Timeout(1).status_code(), None);
    }

    #[test]
    fn remote_error_display_includes_status_and_message() {
        let msg = remote(422).to_string();
        assert!(msg.contains("422"));
        assert!(msg.contains("boom"));
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: DaylineError = io.into();
        assert_eq!(err.category(), ErrorCategory::Internal);
        assert_eq!(err.error_code(), "DAYLINE-X001");
    }
}
