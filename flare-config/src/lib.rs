//! Configuration for Flare's function wrappers.
//!
//! The configuration lives in a `config.yml` file within a configuration directory. All sections
//! are optional; missing values fall back to their defaults:
//!
//! ```yaml
//! logging:
//!   level: debug
//!   format: json
//! diagnostics:
//!   auto_track_sessions: true
//!   auto_detect_errors: true
//!   enabled_error_types:
//!     unhandled_exceptions: true
//! wrapper:
//!   flush_timeout_ms: 2000
//! ```
//!
//! Selected values can be overridden from the environment, see [`OverridableConfig`].

#![warn(missing_docs)]

mod config;
mod overrides;

pub use crate::config::*;
pub use crate::overrides::*;
