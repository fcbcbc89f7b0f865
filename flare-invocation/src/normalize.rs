//! Normalization of event handler calling conventions.
//!
//! Event handlers come in two shapes. Return-based handlers take the event and return a future
//! that resolves with the outcome. Callback-based handlers additionally receive a [`Callback`]
//! and complete the invocation by calling it, optionally also returning a future. Both are
//! converted into an [`EventHandler`] once, when the handler is wrapped.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use flare_client::BoxError;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Future returned by normalized handlers.
pub type HandlerFuture<T> = BoxFuture<'static, Result<T, BoxError>>;

/// The calling convention of an event handler.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Convention {
    /// The handler returns a future resolving with the outcome.
    ReturnBased,
    /// The handler receives a [`Callback`] to complete the invocation.
    CallbackBased,
}

/// Errors produced while normalizing a handler outcome.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    /// All callbacks were dropped without completing and no future was returned.
    #[error("handler dropped its callback without completing it")]
    CallbackDropped,
}

/// Single-assignment result cell fed by callbacks and returned futures.
struct SettleCell<T> {
    sender: Mutex<Option<oneshot::Sender<Result<T, BoxError>>>>,
}

impl<T> SettleCell<T> {
    fn new() -> (Arc<Self>, oneshot::Receiver<Result<T, BoxError>>) {
        let (sender, receiver) = oneshot::channel();
        let cell = Self {
            sender: Mutex::new(Some(sender)),
        };
        (Arc::new(cell), receiver)
    }

    fn settle(&self, result: Result<T, BoxError>) {
        match self.sender.lock().take() {
            Some(sender) => {
                sender.send(result).ok();
            }
            None => flare_log::debug!("ignoring handler outcome, invocation already settled"),
        }
    }
}

/// Completes a callback-based invocation.
///
/// The first completion determines the outcome. Later completions, including the resolution of
/// a future returned by the handler, are ignored. The callback can be cloned and moved into
/// other tasks.
pub struct Callback<T> {
    cell: Arc<SettleCell<T>>,
}

impl<T> Callback<T> {
    /// Completes the invocation successfully with `value`.
    pub fn succeed(&self, value: T) {
        self.complete(Ok(value));
    }

    /// Fails the invocation with an error or an error message.
    ///
    /// Every call fails the invocation, whatever the message. An empty message yields an error
    /// with an empty display string.
    pub fn fail(&self, error: impl Into<BoxError>) {
        self.complete(Err(error.into()));
    }

    /// Completes the invocation with the given outcome.
    pub fn complete(&self, result: Result<T, BoxError>) {
        self.cell.settle(result);
    }
}

impl<T> Clone for Callback<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T> fmt::Debug for Callback<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let settled = self.cell.sender.lock().is_none();
        f.debug_struct("Callback")
            .field("settled", &settled)
            .finish()
    }
}

/// Return values accepted from callback-based handlers.
///
/// Synchronous handlers return `()`, asynchronous handlers return a [`HandlerFuture`] which races
/// with the callback.
pub trait CallbackReturn<T> {
    /// Converts the return value into an optional competing future.
    fn into_returned(self) -> Option<HandlerFuture<T>>;
}

impl<T> CallbackReturn<T> for () {
    fn into_returned(self) -> Option<HandlerFuture<T>> {
        None
    }
}

impl<T> CallbackReturn<T> for HandlerFuture<T> {
    fn into_returned(self) -> Option<HandlerFuture<T>> {
        Some(self)
    }
}

type ReturnFn<E, T> = dyn Fn(E) -> HandlerFuture<T> + Send + Sync;
type CallbackFn<E, T> = dyn Fn(E, Callback<T>) -> Option<HandlerFuture<T>> + Send + Sync;

enum Inner<E, T> {
    ReturnBased(Arc<ReturnFn<E, T>>),
    CallbackBased(Arc<CallbackFn<E, T>>),
}

/// An event handler with a uniform, return-based interface.
pub struct EventHandler<E, T> {
    inner: Inner<E, T>,
}

impl<E, T> EventHandler<E, T> {
    /// Returns the calling convention of the original handler.
    pub fn convention(&self) -> Convention {
        match self.inner {
            Inner::ReturnBased(_) => Convention::ReturnBased,
            Inner::CallbackBased(_) => Convention::CallbackBased,
        }
    }
}

impl<E, T> EventHandler<E, T>
where
    T: Send + 'static,
{
    /// Invokes the handler and returns a future resolving with its outcome.
    ///
    /// The handler is called synchronously. For callback-based handlers, the future resolves
    /// with whatever settles first: the callback or the handler's returned future.
    pub fn call(&self, event: E) -> HandlerFuture<T> {
        match &self.inner {
            Inner::ReturnBased(handler) => handler(event),
            Inner::CallbackBased(handler) => {
                let (cell, receiver) = SettleCell::new();
                let callback = Callback {
                    cell: Arc::clone(&cell),
                };

                match handler(event, callback) {
                    Some(returned) => Box::pin(race(cell, receiver, returned)),
                    None => {
                        drop(cell);
                        Box::pin(async move {
                            receiver
                                .await
                                .unwrap_or_else(|_| Err(NormalizeError::CallbackDropped.into()))
                        })
                    }
                }
            }
        }
    }
}

async fn race<T>(
    cell: Arc<SettleCell<T>>,
    mut receiver: oneshot::Receiver<Result<T, BoxError>>,
    returned: HandlerFuture<T>,
) -> Result<T, BoxError>
where
    T: Send + 'static,
{
    let mut returned = returned;

    let settled = tokio::select! {
        biased;

        result = &mut receiver => Some(result),
        result = &mut returned => {
            cell.settle(result);
            None
        }
    };

    let result = match settled {
        Some(result) => {
            // The handler body keeps running, only its outcome is discarded.
            tokio::spawn(async move { cell.settle(returned.await) });
            result
        }
        None => receiver.await,
    };

    result.unwrap_or_else(|_| Err(NormalizeError::CallbackDropped.into()))
}

impl<E, T> Clone for EventHandler<E, T> {
    fn clone(&self) -> Self {
        let inner = match &self.inner {
            Inner::ReturnBased(handler) => Inner::ReturnBased(Arc::clone(handler)),
            Inner::CallbackBased(handler) => Inner::CallbackBased(Arc::clone(handler)),
        };

        Self { inner }
    }
}

impl<E, T> fmt::Debug for EventHandler<E, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandler")
            .field("convention", &self.convention())
            .finish()
    }
}

/// Marker for handlers of the form `Fn(E) -> impl Future`.
#[derive(Debug)]
pub enum Returning {}

/// Marker for handlers of the form `Fn(E, Callback<T>) -> R`.
#[derive(Debug)]
pub enum WithCallback {}

/// Conversion of functions and closures into an [`EventHandler`].
///
/// The marker `M` selects the calling convention from the handler's signature, so the
/// convention is fixed at compile time.
pub trait IntoEventHandler<E, T, M> {
    /// Performs the conversion.
    fn into_event_handler(self) -> EventHandler<E, T>;
}

impl<E, T, F, Fut, Er> IntoEventHandler<E, T, Returning> for F
where
    F: Fn(E) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, Er>> + Send + 'static,
    Er: Into<BoxError> + 'static,
    E: 'static,
    T: 'static,
{
    fn into_event_handler(self) -> EventHandler<E, T> {
        let handler = move |event: E| -> HandlerFuture<T> {
            let future = self(event);
            Box::pin(async move { future.await.map_err(Into::into) })
        };

        EventHandler {
            inner: Inner::ReturnBased(Arc::new(handler)),
        }
    }
}

impl<E, T, F, R> IntoEventHandler<E, T, WithCallback> for F
where
    F: Fn(E, Callback<T>) -> R + Send + Sync + 'static,
    R: CallbackReturn<T> + 'static,
    E: 'static,
    T: 'static,
{
    fn into_event_handler(self) -> EventHandler<E, T> {
        let handler = move |event: E, callback: Callback<T>| self(event, callback).into_returned();

        EventHandler {
            inner: Inner::CallbackBased(Arc::new(handler)),
        }
    }
}

impl<E, T> IntoEventHandler<E, T, ()> for EventHandler<E, T> {
    fn into_event_handler(self) -> EventHandler<E, T> {
        self
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::time::Duration;

    use serde_json::{Value, json};
    use similar_asserts::assert_eq;

    use super::*;

    fn normalize<E, T, M>(handler: impl IntoEventHandler<E, T, M>) -> EventHandler<E, T> {
        handler.into_event_handler()
    }

    #[tokio::test]
    async fn test_return_based() {
        let handler = normalize(|event: Value| async move { Ok::<_, io::Error>(event["id"].clone()) });
        assert_eq!(handler.convention(), Convention::ReturnBased);

        let outcome = handler.call(json!({"id": 7})).await.unwrap();
        assert_eq!(outcome, json!(7));
    }

    #[tokio::test]
    async fn test_return_based_error() {
        let handler = normalize(|_: Value| async move {
            Err::<(), _>(io::Error::other("oh no"))
        });

        let error = handler.call(json!({})).await.unwrap_err();
        assert_eq!(error.to_string(), "oh no");
    }

    #[tokio::test]
    async fn test_callback_success() {
        let handler = normalize(|_: Value, done: Callback<String>| {
            done.succeed("xyz".to_owned());
        });
        assert_eq!(handler.convention(), Convention::CallbackBased);

        let outcome = handler.call(json!({})).await.unwrap();
        assert_eq!(outcome, "xyz");
    }

    #[tokio::test]
    async fn test_callback_error_message() {
        let handler = normalize(|_: Value, done: Callback<String>| {
            done.fail("xyz");
        });

        let error = handler.call(json!({})).await.unwrap_err();
        assert_eq!(error.to_string(), "xyz");
    }

    #[tokio::test]
    async fn test_callback_empty_message() {
        let handler = normalize(|_: Value, done: Callback<String>| {
            done.fail("");
        });

        let error = handler.call(json!({})).await.unwrap_err();
        assert_eq!(error.to_string(), "");
    }

    #[tokio::test]
    async fn test_callback_error_value() {
        let handler = normalize(|_: Value, done: Callback<String>| {
            done.complete(Err(io::Error::other("broken pipe").into()));
        });

        let error = handler.call(json!({})).await.unwrap_err();
        assert!(error.is::<io::Error>());
        assert_eq!(error.to_string(), "broken pipe");
    }

    #[tokio::test]
    async fn test_callback_first_wins() {
        let handler = normalize(|_: Value, done: Callback<u32>| {
            done.succeed(1);
            done.succeed(2);
            done.fail("too late");
        });

        assert_eq!(handler.call(json!({})).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_callback_from_task() {
        let handler = normalize(|event: Value, done: Callback<Value>| {
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                done.succeed(event);
            });
        });

        let outcome = handler.call(json!({"type": "ping"})).await.unwrap();
        assert_eq!(outcome, json!({"type": "ping"}));
    }

    #[tokio::test]
    async fn test_future_without_callback() {
        let handler = normalize(|_: Value, _done: Callback<String>| -> HandlerFuture<String> {
            Box::pin(async move { Ok("from future".to_owned()) })
        });
        assert_eq!(handler.convention(), Convention::CallbackBased);

        assert_eq!(handler.call(json!({})).await.unwrap(), "from future");
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_before_future() {
        let handler = normalize(|_: Value, done: Callback<&'static str>| -> HandlerFuture<_> {
            done.succeed("callback");
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, BoxError>("future")
            })
        });

        assert_eq!(handler.call(json!({})).await.unwrap(), "callback");
    }

    #[tokio::test]
    async fn test_work_after_callback_completes() {
        let (finished_tx, finished_rx) = oneshot::channel();
        let finished_tx = Arc::new(Mutex::new(Some(finished_tx)));

        let handler = normalize(move |_: Value, done: Callback<u32>| -> HandlerFuture<_> {
            let finished_tx = Arc::clone(&finished_tx);
            Box::pin(async move {
                done.succeed(1);
                tokio::task::yield_now().await;
                if let Some(tx) = finished_tx.lock().take() {
                    tx.send(()).ok();
                }
                Ok::<_, BoxError>(2)
            })
        });

        assert_eq!(handler.call(json!({})).await.unwrap(), 1);

        // Resolves with an error if the handler body was dropped before finishing.
        finished_rx.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_future_before_callback() {
        let handler = normalize(|_: Value, done: Callback<&'static str>| -> HandlerFuture<_> {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                done.succeed("callback");
            });
            Box::pin(async move { Err::<&'static str, BoxError>("future".into()) })
        });

        let error = handler.call(json!({})).await.unwrap_err();
        assert_eq!(error.to_string(), "future");
    }

    #[tokio::test]
    async fn test_callback_dropped() {
        let handler = normalize(|_: Value, done: Callback<()>| {
            drop(done);
        });

        let error = handler.call(json!({})).await.unwrap_err();
        assert!(error.is::<NormalizeError>());
    }
}
