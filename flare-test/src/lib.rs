//! Helpers for testing wrapped handlers.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output is
//!    captured by the test runner.
//!  - Use a [`TestClient`] in place of a diagnostics client. It records every call, so tests can
//!    assert on the exact sequence of sessions, reports and flushes.
//!  - Use a [`MiniHost`] to run wrapped HTTP handlers the way a function host does.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use flare_test::TestClient;
//!
//! flare_test::setup();
//!
//! let client = Arc::new(TestClient::new());
//! assert!(client.calls().is_empty());
//! ```

#![warn(missing_docs)]

mod client;
mod host;

pub use crate::client::*;
pub use crate::host::*;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from this crate and mutes all other logs.
pub fn setup() {
    flare_log::init_test!();
}
