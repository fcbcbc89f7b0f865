use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use flare_client::{BoxError, Client};
use flare_config::Config;
use flare_log::LogError;
use flare_request::{HttpRequest, RequestSnapshot};
use futures::future::BoxFuture;
use serde::Serialize;
use tower::Service;

use crate::completion::{Response, wait_for_completion};
use crate::executor::Executor;
use crate::normalize::{Convention, EventHandler, IntoEventHandler};

/// Metadata section holding the snapshot of the inbound HTTP request.
pub const REQUEST_METADATA: &str = "request";

/// Metadata section holding the serialized event.
pub const EVENT_METADATA: &str = "cloudevent";

/// Default time to wait for pending diagnostics at the end of an invocation.
const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_millis(2000);

/// Options for wrapping handlers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WrapperOptions {
    /// Maximum time to wait for pending diagnostics at the end of each invocation.
    pub flush_timeout: Duration,
}

impl WrapperOptions {
    /// Derives the options from the wrapper section of the configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            flush_timeout: config.flush_timeout(),
        }
    }
}

impl Default for WrapperOptions {
    fn default() -> Self {
        Self {
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
        }
    }
}

/// Factory for wrapped HTTP and event handlers.
///
/// All handlers created from one plugin report to the same client.
#[derive(Clone)]
pub struct Plugin {
    client: Arc<dyn Client>,
    options: WrapperOptions,
}

impl Plugin {
    /// Creates a plugin reporting to `client`.
    pub fn new(client: Arc<dyn Client>, options: WrapperOptions) -> Self {
        Self { client, options }
    }

    /// Creates a plugin with options taken from the configuration.
    pub fn from_config(client: Arc<dyn Client>, config: &Config) -> Self {
        Self::new(client, WrapperOptions::from_config(config))
    }

    /// Returns the options handlers are wrapped with.
    pub fn options(&self) -> WrapperOptions {
        self.options
    }

    fn executor(&self) -> Executor {
        Executor::new(Arc::clone(&self.client), self.options.flush_timeout)
    }

    /// Wraps an HTTP handler.
    ///
    /// The wrapped handler records the request under the `request` metadata section, runs the
    /// handler and waits for the response to complete. Errors are reported and returned to the
    /// host unchanged, so that the host can answer with an error response.
    pub fn http_handler<H, Fut, Er>(&self, handler: H) -> HttpHandler
    where
        H: Fn(HttpRequest, Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Er>> + Send + 'static,
        Er: Into<BoxError> + 'static,
    {
        let handler = move |request: HttpRequest, response: Response| -> HttpFuture {
            let future = handler(request, response);
            Box::pin(async move { future.await.map_err(Into::into) })
        };

        HttpHandler {
            executor: self.executor(),
            handler: Arc::new(handler),
        }
    }

    /// Wraps an event handler.
    ///
    /// Both return-based and callback-based handlers are accepted, see [`IntoEventHandler`]. The
    /// wrapped handler records the event under the `cloudevent` metadata section.
    pub fn event_handler<E, T, H, M>(&self, handler: H) -> WrappedEventHandler<E, T>
    where
        H: IntoEventHandler<E, T, M>,
    {
        WrappedEventHandler {
            executor: self.executor(),
            handler: handler.into_event_handler(),
        }
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

type HttpFuture = BoxFuture<'static, Result<(), BoxError>>;
type HttpHandlerFn = dyn Fn(HttpRequest, Response) -> HttpFuture + Send + Sync;

/// A wrapped HTTP handler, created by [`Plugin::http_handler`].
#[derive(Clone)]
pub struct HttpHandler {
    executor: Executor,
    handler: Arc<HttpHandlerFn>,
}

impl HttpHandler {
    /// Handles one request.
    ///
    /// Resolves once the handler has completed the response and pending diagnostics have been
    /// flushed.
    pub async fn call(&self, request: HttpRequest, response: Response) -> Result<(), BoxError> {
        let snapshot = RequestSnapshot::from_request(&request);
        self.executor
            .client()
            .add_metadata(REQUEST_METADATA, snapshot.to_value());

        let handler = &self.handler;
        self.executor
            .execute(|| async move {
                handler(request, response.clone()).await?;
                wait_for_completion(&response).await?;
                Ok(())
            })
            .await
    }
}

impl fmt::Debug for HttpHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpHandler")
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl Service<(HttpRequest, Response)> for HttpHandler {
    type Response = ();
    type Error = BoxError;
    type Future = HttpFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, (request, response): (HttpRequest, Response)) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { this.call(request, response).await })
    }
}

/// A wrapped event handler, created by [`Plugin::event_handler`].
pub struct WrappedEventHandler<E, T> {
    executor: Executor,
    handler: EventHandler<E, T>,
}

impl<E, T> WrappedEventHandler<E, T> {
    /// Returns the calling convention the wrapped handler presents to the host.
    ///
    /// This is the convention of the original handler. Hosts with callback-based handlers call
    /// [`call_with_callback`](Self::call_with_callback), all others use [`call`](Self::call).
    pub fn convention(&self) -> Convention {
        self.handler.convention()
    }
}

impl<E, T> WrappedEventHandler<E, T>
where
    E: Serialize + Send + 'static,
    T: Send + 'static,
{
    /// Handles one event and resolves with the handler's outcome.
    pub async fn call(&self, event: E) -> Result<T, BoxError> {
        match serde_json::to_value(&event) {
            Ok(value) => self.executor.client().add_metadata(EVENT_METADATA, value),
            Err(error) => flare_log::warn!("failed to serialize event: {}", LogError(&error)),
        }

        self.executor.execute(|| self.handler.call(event)).await
    }

    /// Handles one event in the background and passes the outcome to `done`.
    ///
    /// Must be called within a Tokio runtime.
    pub fn call_with_callback<C>(&self, event: E, done: C) -> tokio::task::JoinHandle<()>
    where
        C: FnOnce(Result<T, BoxError>) + Send + 'static,
    {
        let this = self.clone();
        tokio::spawn(async move { done(this.call(event).await) })
    }
}

impl<E, T> Clone for WrappedEventHandler<E, T> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            handler: self.handler.clone(),
        }
    }
}

impl<E, T> fmt::Debug for WrappedEventHandler<E, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrappedEventHandler")
            .field("executor", &self.executor)
            .field("handler", &self.handler)
            .finish()
    }
}

impl<E, T> Service<E> for WrappedEventHandler<E, T>
where
    E: Serialize + Send + 'static,
    T: Send + 'static,
{
    type Response = T;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<T, BoxError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: E) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { this.call(event).await })
    }
}
