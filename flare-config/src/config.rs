use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use flare_log::{Level, LogConfig};
use serde::{Deserialize, Serialize};

use crate::overrides::OverridableConfig;

/// The basename of the configuration file within the config directory.
const CONFIG_FILE_NAME: &str = "config.yml";

/// Default time to wait for pending diagnostics at the end of an invocation.
const DEFAULT_FLUSH_TIMEOUT_MS: u64 = 2000;

/// Defines the source of a config error
#[derive(Debug, Default)]
enum ConfigErrorOrigin {
    /// An error occurring independently.
    #[default]
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating in a field override (an env var).
    FieldOverride(String),
}

/// Indicates config related errors.
#[derive(Debug)]
pub struct ConfigError {
    origin: ConfigErrorOrigin,
    kind: ConfigErrorKind,
    cause: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl ConfigError {
    #[inline]
    fn new(kind: ConfigErrorKind) -> Self {
        Self {
            origin: ConfigErrorOrigin::None,
            kind,
            cause: None,
        }
    }

    #[inline]
    fn wrap<E>(inner: E, kind: ConfigErrorKind) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            cause: Some(Box::new(inner)),
            ..Self::new(kind)
        }
    }

    #[inline]
    pub(crate) fn for_field<E>(inner: E, field: &'static str) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::wrap(inner, ConfigErrorKind::InvalidValue).field(field)
    }

    #[inline]
    fn file<P: AsRef<Path>>(mut self, p: P) -> Self {
        self.origin = ConfigErrorOrigin::File(p.as_ref().to_path_buf());
        self
    }

    #[inline]
    pub(crate) fn field(mut self, name: &'static str) -> Self {
        self.origin = ConfigErrorOrigin::FieldOverride(name.to_owned());
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            ConfigErrorOrigin::None => fmt::Display::fmt(&self.kind, f),
            ConfigErrorOrigin::File(file_name) => {
                write!(f, "{} (file {})", self.kind, file_name.display())
            }
            ConfigErrorOrigin::FieldOverride(name) => write!(f, "{} (field {})", self.kind, name),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause.as_deref().map(|e| e as &(dyn Error + 'static))
    }
}

impl From<ConfigErrorKind> for ConfigError {
    fn from(kind: ConfigErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Indicates config related errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// Invalid config value
    #[error("invalid config value")]
    InvalidValue,
}

/// Error types that are detected and reported automatically.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EnabledErrorTypes {
    /// Errors raised or returned by a wrapped handler.
    pub unhandled_exceptions: bool,
    /// Failed futures that nothing awaited.
    ///
    /// Wrapped handlers always await their outcome, so this flag is carried for completeness and
    /// has no effect on invocation wrapping.
    pub unhandled_rejections: bool,
}

impl Default for EnabledErrorTypes {
    fn default() -> Self {
        Self {
            unhandled_exceptions: true,
            unhandled_rejections: true,
        }
    }
}

/// The subset of the diagnostics client configuration consulted by the wrappers.
///
/// Wrappers read this from the client at the start of every invocation, so changes made at
/// runtime apply to the next invocation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Records a session for every invocation.
    pub auto_track_sessions: bool,
    /// Reports errors that escape wrapped handlers.
    pub auto_detect_errors: bool,
    /// Fine grained control over [`auto_detect_errors`](Self::auto_detect_errors).
    pub enabled_error_types: EnabledErrorTypes,
}

impl DiagnosticsConfig {
    /// Returns `true` if handler errors should be reported.
    pub fn reports_unhandled_exceptions(&self) -> bool {
        self.auto_detect_errors && self.enabled_error_types.unhandled_exceptions
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            auto_track_sessions: true,
            auto_detect_errors: true,
            enabled_error_types: EnabledErrorTypes::default(),
        }
    }
}

/// Controls the function wrappers.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WrapperConfig {
    /// Maximum time in milliseconds an invocation waits for pending diagnostics.
    pub flush_timeout_ms: u64,
}

impl Default for WrapperConfig {
    fn default() -> Self {
        Self {
            flush_timeout_ms: DEFAULT_FLUSH_TIMEOUT_MS,
        }
    }
}

/// The values of the configuration file.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ConfigValues {
    /// Logging configuration.
    pub logging: LogConfig,
    /// Diagnostics client configuration.
    pub diagnostics: DiagnosticsConfig,
    /// Function wrapper configuration.
    pub wrapper: WrapperConfig,
}

/// Config struct.
#[derive(Clone, Default)]
pub struct Config {
    values: ConfigValues,
    path: PathBuf,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("path", &self.path)
            .field("values", &self.values)
            .finish()
    }
}

impl Config {
    /// Loads a config from a given config folder.
    ///
    /// A folder without a `config.yml` yields the default configuration.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let file = path.join(CONFIG_FILE_NAME);

        let values = match fs::read_to_string(&file) {
            Ok(contents) => serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml).file(&file))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => ConfigValues::default(),
            Err(e) => {
                return Err(ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(&file));
            }
        };

        Ok(Config { values, path })
    }

    /// Creates a config from a YAML string.
    ///
    /// This is mostly useful for tests.
    pub fn from_yaml(yaml: &str) -> Result<Config, ConfigError> {
        Ok(Config {
            values: serde_yaml::from_str(yaml)
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml))?,
            path: PathBuf::new(),
        })
    }

    /// Override configuration with values coming from other sources (e.g. env variables).
    pub fn apply_override(
        &mut self,
        overrides: OverridableConfig,
    ) -> Result<&mut Self, ConfigError> {
        if let Some(timeout) = overrides.flush_timeout_ms {
            self.values.wrapper.flush_timeout_ms = timeout
                .trim()
                .parse()
                .map_err(|err| ConfigError::for_field(err, "flush_timeout_ms"))?;
        }

        if let Some(enabled) = overrides.auto_track_sessions {
            self.values.diagnostics.auto_track_sessions =
                parse_bool(&enabled).ok_or_else(|| {
                    ConfigError::new(ConfigErrorKind::InvalidValue).field("auto_track_sessions")
                })?;
        }

        if let Some(enabled) = overrides.auto_detect_errors {
            self.values.diagnostics.auto_detect_errors =
                parse_bool(&enabled).ok_or_else(|| {
                    ConfigError::new(ConfigErrorKind::InvalidValue).field("auto_detect_errors")
                })?;
        }

        if let Some(level) = overrides.log_level {
            self.values.logging.level = level
                .parse::<Level>()
                .map_err(|err| ConfigError::for_field(err, "log_level"))?;
        }

        Ok(self)
    }

    /// Returns the folder this configuration was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the logging configuration.
    pub fn logging(&self) -> &LogConfig {
        &self.values.logging
    }

    /// Returns the diagnostics client configuration.
    pub fn diagnostics(&self) -> &DiagnosticsConfig {
        &self.values.diagnostics
    }

    /// Returns the maximum time an invocation waits for pending diagnostics.
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.values.wrapper.flush_timeout_ms)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use insta::assert_json_snapshot;
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert_eq!(config.flush_timeout(), Duration::from_millis(2000));
        assert_eq!(*config.diagnostics(), DiagnosticsConfig::default());
        assert!(config.diagnostics().reports_unhandled_exceptions());
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
diagnostics:
  auto_track_sessions: false
  enabled_error_types:
    unhandled_exceptions: false
wrapper:
  flush_timeout_ms: 500
"#;

        let config = Config::from_yaml(yaml).unwrap();

        assert_eq!(
            *config.diagnostics(),
            DiagnosticsConfig {
                auto_track_sessions: false,
                auto_detect_errors: true,
                enabled_error_types: EnabledErrorTypes {
                    unhandled_exceptions: false,
                    unhandled_rejections: true,
                },
            }
        );
        assert_eq!(config.flush_timeout(), Duration::from_millis(500));
        assert!(!config.diagnostics().reports_unhandled_exceptions());
    }

    #[test]
    fn test_serialize_diagnostics() {
        assert_json_snapshot!(DiagnosticsConfig::default(), @r###"
        {
          "auto_track_sessions": true,
          "auto_detect_errors": true,
          "enabled_error_types": {
            "unhandled_exceptions": true,
            "unhandled_rejections": true
          }
        }
        "###);
    }

    #[test]
    fn test_bad_yaml() {
        let error = Config::from_yaml("wrapper: [").unwrap_err();
        assert_eq!(error.kind(), ConfigErrorKind::BadYaml);
        assert!(error.source().is_some());
    }

    #[test]
    fn test_from_path_missing_file() {
        let dir = std::env::temp_dir().join("flare-config-test-missing");
        fs::create_dir_all(&dir).unwrap();
        let _ = fs::remove_file(dir.join(CONFIG_FILE_NAME));

        let config = Config::from_path(&dir).unwrap();
        assert_eq!(config.path(), dir.as_path());
        assert_eq!(config.flush_timeout(), Duration::from_millis(2000));
    }

    #[test]
    fn test_from_path() {
        let dir = std::env::temp_dir().join("flare-config-test-file");
        fs::create_dir_all(&dir).unwrap();
        let mut file = fs::File::create(dir.join(CONFIG_FILE_NAME)).unwrap();
        writeln!(file, "wrapper:\n  flush_timeout_ms: 250").unwrap();

        let config = Config::from_path(&dir).unwrap();
        assert_eq!(config.flush_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_apply_override() {
        let mut config = Config::default();
        config
            .apply_override(OverridableConfig {
                flush_timeout_ms: Some("100".to_owned()),
                auto_track_sessions: Some("false".to_owned()),
                auto_detect_errors: Some("0".to_owned()),
                log_level: Some("debug".to_owned()),
            })
            .unwrap();

        assert_eq!(config.flush_timeout(), Duration::from_millis(100));
        assert!(!config.diagnostics().auto_track_sessions);
        assert!(!config.diagnostics().auto_detect_errors);
        assert_eq!(config.logging().level, Level::Debug);
    }

    #[test]
    fn test_apply_override_invalid() {
        let mut config = Config::default();
        let error = config
            .apply_override(OverridableConfig {
                flush_timeout_ms: Some("soon".to_owned()),
                ..Default::default()
            })
            .unwrap_err();

        assert_eq!(error.kind(), ConfigErrorKind::InvalidValue);
        assert_eq!(
            error.to_string(),
            "invalid config value (field flush_timeout_ms)"
        );

        let error = config
            .apply_override(OverridableConfig {
                auto_track_sessions: Some("maybe".to_owned()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(
            error.to_string(),
            "invalid config value (field auto_track_sessions)"
        );
    }
}
