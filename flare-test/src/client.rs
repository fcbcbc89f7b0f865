use std::collections::BTreeSet;
use std::error::Error;
use std::time::Duration;

use flare_client::{Client, FlushError, HandledState, Logger};
use flare_config::DiagnosticsConfig;
use futures::future::{self, BoxFuture};
use parking_lot::Mutex;
use serde_json::Value;

/// An error report submitted to the [`TestClient`].
#[derive(Clone, Debug, PartialEq)]
pub struct Report {
    /// The display message of the reported error.
    pub message: String,
    /// The handled state passed with the report.
    pub handled_state: HandledState,
    /// The integration the report was attributed to.
    pub origin: String,
}

/// A call received by the [`TestClient`].
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    /// [`Client::add_metadata`].
    Metadata {
        /// The metadata section.
        section: String,
        /// The recorded data.
        data: Value,
    },
    /// [`Client::start_session`].
    StartSession,
    /// [`Client::report`].
    Report(Report),
    /// [`Client::flush`] with the requested timeout.
    Flush(Duration),
}

/// How the [`TestClient`] responds to flushes.
#[derive(Clone, Debug, Default)]
pub enum FlushBehavior {
    /// Flushes complete immediately.
    #[default]
    Succeed,
    /// Flushes never complete.
    Hang,
    /// Flushes fail with [`FlushError::Delivery`] and the given message.
    Fail(String),
}

#[derive(Debug, Default)]
struct RecordingLogger {
    lines: Mutex<Vec<String>>,
}

impl Logger for RecordingLogger {
    fn error(&self, message: &str) {
        flare_log::debug!("client logger: {message}");
        self.lines.lock().push(message.to_owned());
    }
}

/// A diagnostics client that records all calls in order.
///
/// Configuration, loaded plugins and the flush behavior can be changed at any time and apply to
/// subsequent calls.
#[derive(Debug, Default)]
pub struct TestClient {
    calls: Mutex<Vec<Call>>,
    config: Mutex<DiagnosticsConfig>,
    plugins: Mutex<BTreeSet<String>>,
    flush_behavior: Mutex<FlushBehavior>,
    logger: RecordingLogger,
}

impl TestClient {
    /// Creates a client with default configuration and no loaded plugins.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a client with the given configuration.
    pub fn with_config(config: DiagnosticsConfig) -> Self {
        let client = Self::new();
        client.set_config(config);
        client
    }

    /// Replaces the configuration returned from [`Client::config`].
    pub fn set_config(&self, config: DiagnosticsConfig) {
        *self.config.lock() = config;
    }

    /// Marks a plugin as loaded.
    pub fn load_plugin(&self, name: &str) {
        self.plugins.lock().insert(name.to_owned());
    }

    /// Changes how subsequent flushes behave.
    pub fn set_flush_behavior(&self, behavior: FlushBehavior) {
        *self.flush_behavior.lock() = behavior;
    }

    /// Returns all calls received so far.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Returns all submitted error reports.
    pub fn reports(&self) -> Vec<Report> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Report(report) => Some(report.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the number of started sessions.
    pub fn session_count(&self) -> usize {
        self.count(|call| matches!(call, Call::StartSession))
    }

    /// Returns the number of flushes.
    pub fn flush_count(&self) -> usize {
        self.count(|call| matches!(call, Call::Flush(_)))
    }

    /// Returns the most recent data recorded for a metadata section.
    pub fn metadata(&self, section: &str) -> Option<Value> {
        self.calls.lock().iter().rev().find_map(|call| match call {
            Call::Metadata { section: s, data } if s == section => Some(data.clone()),
            _ => None,
        })
    }

    /// Returns all lines logged through the client's logger.
    pub fn log_lines(&self) -> Vec<String> {
        self.logger.lines.lock().clone()
    }

    fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| predicate(call)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

impl Client for TestClient {
    fn add_metadata(&self, section: &str, data: Value) {
        self.record(Call::Metadata {
            section: section.to_owned(),
            data,
        });
    }

    fn start_session(&self) {
        self.record(Call::StartSession);
    }

    fn report(&self, error: &(dyn Error + 'static), handled_state: &HandledState, origin: &str) {
        self.record(Call::Report(Report {
            message: error.to_string(),
            handled_state: *handled_state,
            origin: origin.to_owned(),
        }));
    }

    fn config(&self) -> DiagnosticsConfig {
        *self.config.lock()
    }

    fn flush(&self, timeout: Duration) -> BoxFuture<'static, Result<(), FlushError>> {
        self.record(Call::Flush(timeout));

        let result = match &*self.flush_behavior.lock() {
            FlushBehavior::Succeed => Ok(()),
            FlushBehavior::Hang => return Box::pin(future::pending::<Result<(), FlushError>>()),
            FlushBehavior::Fail(message) => Err(FlushError::Delivery(message.clone())),
        };

        Box::pin(future::ready(result))
    }

    fn plugin(&self, name: &str) -> bool {
        self.plugins.lock().contains(name)
    }

    fn logger(&self) -> &dyn Logger {
        &self.logger
    }
}
