use std::collections::BTreeSet;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use flare_config::DiagnosticsConfig;
use flare_log::LogError;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use sentry::protocol::{Context, Mechanism};
use sentry::{Hub, Level};
use serde_json::Value;

use crate::client::{Client, FlushError, Logger, TracingLogger};
use crate::event::HandledState;

/// A [`Client`] delivering to Sentry through the given [`Hub`].
///
/// Metadata sections become scope contexts, sessions use release health and reports carry the
/// handled state in their exception mechanism.
pub struct SentryClient {
    hub: Arc<Hub>,
    config: RwLock<DiagnosticsConfig>,
    plugins: RwLock<BTreeSet<String>>,
    logger: TracingLogger,
}

impl SentryClient {
    /// Creates a client reporting through `hub`.
    pub fn new(hub: Arc<Hub>, config: DiagnosticsConfig) -> Self {
        Self {
            hub,
            config: RwLock::new(config),
            plugins: RwLock::new(BTreeSet::new()),
            logger: TracingLogger,
        }
    }

    /// Replaces the configuration. Takes effect with the next invocation.
    pub fn set_config(&self, config: DiagnosticsConfig) {
        *self.config.write() = config;
    }

    /// Marks an integration as loaded.
    pub fn register_plugin(&self, name: impl Into<String>) {
        self.plugins.write().insert(name.into());
    }
}

fn to_context(data: Value) -> Context {
    match data {
        Value::Object(map) => Context::Other(map.into_iter().collect()),
        other => Context::Other([("value".to_owned(), other)].into_iter().collect()),
    }
}

impl Client for SentryClient {
    fn add_metadata(&self, section: &str, data: Value) {
        let context = to_context(data);
        self.hub.configure_scope(|scope| scope.set_context(section, context));
    }

    fn start_session(&self) {
        self.hub.start_session();
    }

    fn report(&self, error: &(dyn Error + 'static), handled_state: &HandledState, origin: &str) {
        let mut event = sentry::event_from_error(error);
        event.level = Level::Error;

        if let Some(exception) = event.exception.values.last_mut() {
            exception.mechanism = Some(Mechanism {
                ty: origin.to_owned(),
                handled: Some(!handled_state.unhandled),
                ..Default::default()
            });
        }

        event.tags.insert(
            "severity_reason".to_owned(),
            handled_state.severity_reason.ty.to_string(),
        );

        self.hub.capture_event(event);
    }

    fn config(&self) -> DiagnosticsConfig {
        *self.config.read()
    }

    fn flush(&self, timeout: Duration) -> BoxFuture<'static, Result<(), FlushError>> {
        let client = self.hub.client();

        Box::pin(async move {
            let Some(client) = client else {
                return Ok(());
            };

            let flushed = tokio::task::spawn_blocking(move || client.flush(Some(timeout)))
                .await
                .map_err(|error| {
                    flare_log::debug!("flush task failed: {}", LogError(&error));
                    FlushError::Delivery(error.to_string())
                })?;

            if flushed {
                Ok(())
            } else {
                Err(FlushError::Timeout(timeout))
            }
        })
    }

    fn plugin(&self, name: &str) -> bool {
        self.plugins.read().contains(name)
    }

    fn logger(&self) -> &dyn Logger {
        &self.logger
    }
}
