//! Functionality to override the configuration with environment variables.

use std::env;

/// Environment variable overriding [`WrapperConfig::flush_timeout_ms`](crate::WrapperConfig).
pub const ENV_FLUSH_TIMEOUT_MS: &str = "FLARE_FLUSH_TIMEOUT_MS";
/// Environment variable overriding `diagnostics.auto_track_sessions`.
pub const ENV_AUTO_TRACK_SESSIONS: &str = "FLARE_AUTO_TRACK_SESSIONS";
/// Environment variable overriding `diagnostics.auto_detect_errors`.
pub const ENV_AUTO_DETECT_ERRORS: &str = "FLARE_AUTO_DETECT_ERRORS";
/// Environment variable overriding `logging.level`.
pub const ENV_LOG_LEVEL: &str = "FLARE_LOG_LEVEL";

/// Raw configuration overrides, validated by [`Config::apply_override`](crate::Config).
#[derive(Debug, Default)]
pub struct OverridableConfig {
    /// Flush timeout in milliseconds.
    pub flush_timeout_ms: Option<String>,
    /// `true` or `false`.
    pub auto_track_sessions: Option<String>,
    /// `true` or `false`.
    pub auto_detect_errors: Option<String>,
    /// One of the [`Level`](flare_log::Level) names.
    pub log_level: Option<String>,
}

impl OverridableConfig {
    /// Extracts overrides from a variable lookup function.
    ///
    /// This is the testable core of [`extract_config_env_vars`].
    pub fn from_lookup<F>(mut lookup: F) -> Self
    where
        F: FnMut(&str) -> Option<String>,
    {
        Self {
            flush_timeout_ms: lookup(ENV_FLUSH_TIMEOUT_MS),
            auto_track_sessions: lookup(ENV_AUTO_TRACK_SESSIONS),
            auto_detect_errors: lookup(ENV_AUTO_DETECT_ERRORS),
            log_level: lookup(ENV_LOG_LEVEL),
        }
    }

    /// Returns `true` if no value is overridden.
    pub fn is_empty(&self) -> bool {
        self.flush_timeout_ms.is_none()
            && self.auto_track_sessions.is_none()
            && self.auto_detect_errors.is_none()
            && self.log_level.is_none()
    }
}

/// Extract config arguments from environment variables
pub fn extract_config_env_vars() -> OverridableConfig {
    OverridableConfig::from_lookup(|name| env::var(name).ok())
}
