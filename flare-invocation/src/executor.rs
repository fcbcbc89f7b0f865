use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use flare_client::{BoxError, Client, FlushError, HandledState};

/// Integrations that track sessions themselves when they are loaded.
///
/// While any of these is loaded, the executor does not start sessions to avoid counting an
/// invocation twice.
pub const HOST_INTEGRATIONS: &[&str] = &["axum", "actix-web", "warp"];

/// The origin attributed to errors reported by the wrappers.
pub const ORIGIN: &str = "functions";

/// Runs a single invocation of a wrapped handler.
///
/// The sequence is fixed: start a session, run the handler, report an error outcome, and flush
/// pending diagnostics within the flush timeout. The handler's outcome is returned unchanged.
#[derive(Clone)]
pub struct Executor {
    client: Arc<dyn Client>,
    flush_timeout: Duration,
}

impl Executor {
    /// Creates an executor reporting to `client`.
    pub fn new(client: Arc<dyn Client>, flush_timeout: Duration) -> Self {
        Self {
            client,
            flush_timeout,
        }
    }

    /// Returns the client diagnostics are reported to.
    pub fn client(&self) -> &Arc<dyn Client> {
        &self.client
    }

    /// Returns the maximum time to wait for pending diagnostics.
    pub fn flush_timeout(&self) -> Duration {
        self.flush_timeout
    }

    /// Executes one invocation.
    ///
    /// `handler` is called after the session has been started. Errors from flushing are logged
    /// through the client's logger and never affect the outcome.
    pub async fn execute<F, Fut, T>(&self, handler: F) -> Result<T, BoxError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BoxError>>,
    {
        let config = self.client.config();

        if config.auto_track_sessions {
            match self.host_integration() {
                Some(name) => flare_log::trace!("skipping session, tracked by {name}"),
                None => self.client.start_session(),
            }
        }

        let outcome = handler().await;

        if let Err(error) = &outcome {
            if config.reports_unhandled_exceptions() {
                flare_log::debug!("reporting unhandled handler error");
                self.client
                    .report(&**error, &HandledState::unhandled_exception(), ORIGIN);
            } else {
                flare_log::trace!("handler failed, error reporting disabled");
            }
        }

        if let Err(error) = self.flush().await {
            self.client
                .logger()
                .error(&format!("Delivery may be unsuccessful: {error}"));
        }

        outcome
    }

    fn host_integration(&self) -> Option<&'static str> {
        HOST_INTEGRATIONS
            .iter()
            .copied()
            .find(|name| self.client.plugin(name))
    }

    async fn flush(&self) -> Result<(), FlushError> {
        let flush = self.client.flush(self.flush_timeout);

        // Bounded here as well, a client that ignores its timeout must not stall the invocation.
        match tokio::time::timeout(self.flush_timeout, flush).await {
            Ok(result) => result,
            Err(_) => Err(FlushError::Timeout(self.flush_timeout)),
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("flush_timeout", &self.flush_timeout)
            .finish_non_exhaustive()
    }
}
