use std::error::Error;
use std::time::Duration;

use flare_config::DiagnosticsConfig;
use futures::future::BoxFuture;

use crate::event::HandledState;

/// A type-erased error as produced by wrapped handlers.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Error returned from [`Client::flush`].
#[derive(Debug, thiserror::Error)]
pub enum FlushError {
    /// Pending diagnostics were not delivered within the timeout.
    ///
    /// Delivery continues in the background.
    #[error("flush timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Delivery failed for another reason.
    #[error("delivery failed: {0}")]
    Delivery(String),
}

impl FlushError {
    /// Returns `true` if this error indicates an elapsed timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Sink for messages that concern the diagnostics client itself.
pub trait Logger: Send + Sync {
    /// Logs an error message.
    fn error(&self, message: &str);
}

/// A [`Logger`] forwarding to the `tracing` based [`flare_log`] facade.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn error(&self, message: &str) {
        flare_log::error!("{message}");
    }
}

/// The capabilities of a diagnostics client consumed by the function wrappers.
///
/// The client is shared across invocations and owned by the application, wrappers only call
/// into it. Implementations must be cheap to call and must not block: anything that involves
/// I/O belongs into [`flush`](Self::flush) or a background worker.
pub trait Client: Send + Sync {
    /// Attaches structured metadata to subsequent reports under the given section name.
    fn add_metadata(&self, section: &str, data: serde_json::Value);

    /// Starts a new session.
    fn start_session(&self);

    /// Creates an error report from `error` and queues it for delivery.
    ///
    /// `origin` names the integration that captured the error.
    fn report(&self, error: &(dyn Error + 'static), handled_state: &HandledState, origin: &str);

    /// Returns the current configuration.
    ///
    /// Called once per invocation, so changes apply to the next invocation.
    fn config(&self) -> DiagnosticsConfig;

    /// Waits for all queued diagnostics to be delivered.
    ///
    /// Resolves with [`FlushError::Timeout`] if delivery does not complete within `timeout`.
    fn flush(&self, timeout: Duration) -> BoxFuture<'static, Result<(), FlushError>>;

    /// Returns `true` if an integration with the given name is loaded.
    fn plugin(&self, name: &str) -> bool;

    /// Returns the client's logger.
    fn logger(&self) -> &dyn Logger;
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_timeout_message() {
        let error = FlushError::Timeout(Duration::from_millis(2000));
        assert_eq!(error.to_string(), "flush timed out after 2000ms");
        assert!(error.is_timeout());
    }

    #[test]
    fn test_delivery_message() {
        let error = FlushError::Delivery("connection refused".to_owned());
        assert_eq!(error.to_string(), "delivery failed: connection refused");
        assert!(!error.is_timeout());
    }
}
