//! dayline - resilient data layer for a personal productivity client.
//!
//! Keeps a session alive across token expiry, serves cached data when the
//! backend is unreachable, and merges mail, calendar, and task sync state
//! into one status.
//!
//! ```rust,ignore
//! use dayline::core::DataLayer;
//! use dayline::storage::ResolvedConfig;
//!
//! let layer = DataLayer::open(ResolvedConfig::resolve()?)?;
//! let plan = layer.data().daily_plan().await?;
//! if plan.is_stale {
//!     // show the "offline" badge
//! }
//! ```

// Note: deny (not forbid) to allow #[allow(unsafe_code)] in test helpers for env var manipulation
#![deny(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod core;
pub mod error;
pub mod storage;

/// Test utilities module - included in test builds or when test-utils feature is enabled.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use error::{DaylineError, ErrorCategory, Result};

// Re-export test utilities for external test crates
#[cfg(any(test, feature = "test-utils"))]
pub use test_utils::*;
