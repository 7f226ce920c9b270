//! Shared helpers for integration tests.
//!
//! - `logger`: structured test logging with phases
//! - `mocks`: wiremock mounts for the backend endpoints

pub mod logger;
pub mod mocks;
