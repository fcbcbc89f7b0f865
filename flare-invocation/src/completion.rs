//! Detection of HTTP response completion.

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use flare_client::BoxError;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use parking_lot::Mutex;
use tokio::sync::oneshot;

/// A terminal notification emitted by an [`OutputStream`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Signal {
    /// All data has been flushed to the underlying transport.
    Finish,
    /// The stream has been closed by its writer.
    End,
    /// The stream failed or was destroyed before completing.
    Error,
}

impl Signal {
    /// All terminal signals, in the order they are subscribed to.
    pub const ALL: [Signal; 3] = [Signal::Finish, Signal::End, Signal::Error];
}

/// Identifies a listener registered with [`OutputStream::on`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ListenerId(u64);

/// Callback invoked when a stream emits a signal.
///
/// Receives the error for [`Signal::Error`] and `None` otherwise.
pub type Listener = Arc<dyn Fn(Option<&StreamError>) + Send + Sync>;

/// The error carried by [`Signal::Error`].
#[derive(Clone)]
pub struct StreamError(Arc<dyn Error + Send + Sync>);

impl StreamError {
    /// Creates a stream error from any error or message.
    pub fn new(error: impl Into<BoxError>) -> Self {
        let error: BoxError = error.into();
        Self(Arc::from(error))
    }
}

impl fmt::Debug for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StreamError").field(&self.0).finish()
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Error for StreamError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.0.source()
    }
}

/// A writable stream that notifies listeners about its terminal state.
pub trait OutputStream {
    /// Returns `true` if the writer has already ended the stream.
    fn is_write_finished(&self) -> bool;

    /// Returns the error if the stream has already failed.
    fn failure(&self) -> Option<StreamError> {
        None
    }

    /// Registers a listener for the given signal.
    fn on(&self, signal: Signal, listener: Listener) -> ListenerId;

    /// Removes a previously registered listener. Unknown ids are ignored.
    fn off(&self, id: ListenerId);
}

type Unsubscribe = Box<dyn FnOnce() + Send>;

/// One-shot latch shared by the listeners of a single [`wait_for_completion`] call.
struct Latch {
    fired: AtomicBool,
    sender: Mutex<Option<oneshot::Sender<Result<(), StreamError>>>>,
    unsubscribe: Mutex<Option<Unsubscribe>>,
}

impl Latch {
    fn fire(&self, result: Result<(), StreamError>) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }

        self.disarm();

        if let Some(sender) = self.sender.lock().take() {
            sender.send(result).ok();
        }
    }

    fn arm(&self, unsubscribe: Unsubscribe) {
        *self.unsubscribe.lock() = Some(unsubscribe);

        // A signal may have fired while the listeners were being registered.
        if self.fired.load(Ordering::SeqCst) {
            self.disarm();
        }
    }

    fn disarm(&self) {
        let unsubscribe = self.unsubscribe.lock().take();
        if let Some(unsubscribe) = unsubscribe {
            unsubscribe();
        }
    }
}

enum CompletionState {
    Ready(Option<Result<(), StreamError>>),
    Pending {
        receiver: oneshot::Receiver<Result<(), StreamError>>,
        latch: Arc<Latch>,
    },
}

/// Future returned by [`wait_for_completion`].
///
/// Dropping the future removes all listeners it registered.
#[must_use = "futures do nothing unless polled"]
pub struct Completion {
    state: CompletionState,
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending = matches!(self.state, CompletionState::Pending { .. });
        f.debug_struct("Completion")
            .field("pending", &pending)
            .finish()
    }
}

impl Future for Completion {
    type Output = Result<(), StreamError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            CompletionState::Ready(result) => Poll::Ready(result.take().unwrap_or(Ok(()))),
            CompletionState::Pending { receiver, .. } => match Pin::new(receiver).poll(cx) {
                Poll::Pending => Poll::Pending,
                // The latch owns the sender and lives as long as this future.
                Poll::Ready(result) => Poll::Ready(result.unwrap_or(Ok(()))),
            },
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let CompletionState::Pending { latch, .. } = &self.state {
            latch.disarm();
        }
    }
}

/// Waits until the stream signals that it has finished, ended or failed.
///
/// An already finished or failed stream completes immediately without registering listeners.
/// Otherwise, one listener is registered for each [`Signal`]. The first signal resolves the
/// future and removes all three listeners, later signals have no effect.
pub fn wait_for_completion<S>(stream: &S) -> Completion
where
    S: OutputStream + Clone + Send + 'static,
{
    if let Some(error) = stream.failure() {
        return Completion {
            state: CompletionState::Ready(Some(Err(error))),
        };
    }

    if stream.is_write_finished() {
        return Completion {
            state: CompletionState::Ready(Some(Ok(()))),
        };
    }

    let (sender, receiver) = oneshot::channel();
    let latch = Arc::new(Latch {
        fired: AtomicBool::new(false),
        sender: Mutex::new(Some(sender)),
        unsubscribe: Mutex::new(None),
    });

    let ids = Signal::ALL.map(|signal| {
        let latch = Arc::clone(&latch);
        stream.on(
            signal,
            Arc::new(move |error: Option<&StreamError>| match error {
                Some(error) => latch.fire(Err(error.clone())),
                None => latch.fire(Ok(())),
            }),
        )
    });

    let stream = stream.clone();
    latch.arm(Box::new(move || {
        for id in ids {
            stream.off(id);
        }
    }));

    Completion {
        state: CompletionState::Pending { receiver, latch },
    }
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(ListenerId, Signal, Listener)>,
}

struct ResponseState {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
    finished: bool,
    error: Option<StreamError>,
}

#[derive(Default)]
struct ResponseInner {
    state: Mutex<ResponseState>,
    listeners: Mutex<Listeners>,
}

impl Default for ResponseState {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Vec::new(),
            finished: false,
            error: None,
        }
    }
}

/// The response stream handed to wrapped HTTP handlers.
///
/// This is a handle: clones refer to the same response. The handler writes the status, headers
/// and body and finally calls [`end`](Self::end). The host reads the written response once the
/// invocation completes.
#[derive(Clone, Default)]
pub struct Response {
    inner: Arc<ResponseInner>,
}

impl Response {
    /// Creates an empty `200 OK` response.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the response status.
    pub fn status(&self) -> StatusCode {
        self.inner.state.lock().status
    }

    /// Sets the response status.
    pub fn set_status(&self, status: StatusCode) {
        self.inner.state.lock().status = status;
    }

    /// Returns a copy of the response headers.
    pub fn headers(&self) -> HeaderMap {
        self.inner.state.lock().headers.clone()
    }

    /// Appends a response header.
    pub fn append_header(&self, name: HeaderName, value: HeaderValue) {
        self.inner.state.lock().headers.append(name, value);
    }

    /// Appends data to the body. Writes after [`end`](Self::end) are discarded.
    pub fn write(&self, data: impl AsRef<[u8]>) {
        let mut state = self.inner.state.lock();
        if !state.finished && state.error.is_none() {
            state.body.extend_from_slice(data.as_ref());
        }
    }

    /// Returns a copy of the body written so far.
    pub fn body(&self) -> Vec<u8> {
        self.inner.state.lock().body.clone()
    }

    /// Returns the body written so far as text, replacing invalid UTF-8.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.inner.state.lock().body).into_owned()
    }

    /// Writes the status and body and ends the response.
    pub fn send(&self, status: StatusCode, body: impl AsRef<[u8]>) {
        self.set_status(status);
        self.write(body);
        self.end();
    }

    /// Ends the response, emitting [`Signal::Finish`] followed by [`Signal::End`].
    ///
    /// Ending a response more than once or after it was destroyed has no effect.
    pub fn end(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.finished || state.error.is_some() {
                return;
            }
            state.finished = true;
        }

        self.emit(Signal::Finish, None);
        self.emit(Signal::End, None);
    }

    /// Aborts the response, emitting [`Signal::Error`] with the given error.
    pub fn destroy(&self, error: impl Into<BoxError>) {
        let error = StreamError::new(error);

        {
            let mut state = self.inner.state.lock();
            if state.finished || state.error.is_some() {
                return;
            }
            state.error = Some(error.clone());
        }

        self.emit(Signal::Error, Some(&error));
    }

    /// Returns `true` if the response has been ended.
    pub fn is_finished(&self) -> bool {
        self.inner.state.lock().finished
    }

    /// Converts the written response into an [`http::Response`].
    pub fn to_http(&self) -> http::Response<Vec<u8>> {
        let state = self.inner.state.lock();
        let mut response = http::Response::new(state.body.clone());
        *response.status_mut() = state.status;
        *response.headers_mut() = state.headers.clone();
        response
    }

    fn emit(&self, signal: Signal, error: Option<&StreamError>) {
        // Listeners may unsubscribe while being called, so they run without the lock held.
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .entries
            .iter()
            .filter(|(_, s, _)| *s == signal)
            .map(|(_, _, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener(error);
        }
    }

    #[cfg(test)]
    fn listener_count(&self) -> usize {
        self.inner.listeners.lock().entries.len()
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Response")
            .field("status", &state.status)
            .field("headers", &state.headers)
            .field("body_len", &state.body.len())
            .field("finished", &state.finished)
            .field("error", &state.error)
            .finish()
    }
}

impl OutputStream for Response {
    fn is_write_finished(&self) -> bool {
        self.is_finished()
    }

    fn failure(&self) -> Option<StreamError> {
        self.inner.state.lock().error.clone()
    }

    fn on(&self, signal: Signal, listener: Listener) -> ListenerId {
        let mut listeners = self.inner.listeners.lock();
        let id = ListenerId(listeners.next_id);
        listeners.next_id += 1;
        listeners.entries.push((id, signal, listener));
        id
    }

    fn off(&self, id: ListenerId) {
        self.inner
            .listeners
            .lock()
            .entries
            .retain(|(entry_id, _, _)| *entry_id != id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use futures::FutureExt;
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_already_ended() {
        let response = Response::new();
        response.end();

        let completion = wait_for_completion(&response);
        assert_eq!(response.listener_count(), 0);
        assert!(matches!(completion.now_or_never(), Some(Ok(()))));
    }

    #[test]
    fn test_resolves_on_end() {
        let response = Response::new();
        let mut completion = wait_for_completion(&response);
        assert_eq!(response.listener_count(), 3);
        assert!((&mut completion).now_or_never().is_none());

        response.send(StatusCode::CREATED, "done");

        assert!(matches!(completion.now_or_never(), Some(Ok(()))));
        assert_eq!(response.listener_count(), 0);
    }

    #[test]
    fn test_resolves_once_for_finish_and_end() {
        let response = Response::new();
        let completion = wait_for_completion(&response);

        let calls = Arc::new(AtomicUsize::new(0));
        for signal in [Signal::Finish, Signal::End] {
            let calls = Arc::clone(&calls);
            response.on(
                signal,
                Arc::new(move |_: Option<&StreamError>| {
                    calls.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        response.end();

        // Both signals reached the remaining listeners, but the latch only fired once.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(completion.now_or_never(), Some(Ok(()))));
        assert_eq!(response.listener_count(), 2);
    }

    #[test]
    fn test_error_first() {
        let response = Response::new();
        let completion = wait_for_completion(&response);

        response.destroy("socket hang up");
        response.end();

        let error = completion.now_or_never().unwrap().unwrap_err();
        assert_eq!(error.to_string(), "socket hang up");
        assert_eq!(response.listener_count(), 0);
    }

    #[test]
    fn test_already_destroyed() {
        let response = Response::new();
        response.destroy("aborted");

        let error = wait_for_completion(&response)
            .now_or_never()
            .unwrap()
            .unwrap_err();
        assert_eq!(error.to_string(), "aborted");
        assert_eq!(response.listener_count(), 0);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let response = Response::new();
        let completion = wait_for_completion(&response);
        assert_eq!(response.listener_count(), 3);

        drop(completion);
        assert_eq!(response.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_end_from_task() {
        let response = Response::new();
        let completion = wait_for_completion(&response);

        let writer = response.clone();
        tokio::spawn(async move {
            writer.write("hello");
            writer.end();
        });

        completion.await.unwrap();
        assert_eq!(response.body_text(), "hello");
        assert_eq!(response.to_http().status(), StatusCode::OK);
    }

    #[test]
    fn test_write_after_end_discarded() {
        let response = Response::new();
        response.write("a");
        response.end();
        response.write("b");

        assert_eq!(response.body(), b"a".to_vec());
    }
}
