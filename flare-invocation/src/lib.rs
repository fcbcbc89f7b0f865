//! Invocation wrapping for serverless HTTP and event handlers.
//!
//! Wrapped handlers report unhandled errors to a diagnostics [`Client`](flare_client::Client),
//! record one session per invocation and do not complete before pending diagnostics have been
//! flushed or the flush timeout has elapsed. The outcome of the handler is never altered.
//!
//! # Usage
//!
//! Create a [`Plugin`] for the application's client and wrap handlers with it:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use flare_client::{BoxError, Client};
//! use flare_invocation::{Plugin, Response, WrapperOptions};
//! use flare_request::HttpRequest;
//!
//! # fn wrap(client: Arc<dyn Client>) {
//! let plugin = Plugin::new(client, WrapperOptions::default());
//!
//! let handler = plugin.http_handler(|_request: HttpRequest, response: Response| async move {
//!     response.send(http::StatusCode::OK, "hello");
//!     Ok::<_, BoxError>(())
//! });
//! # }
//! ```
//!
//! Event handlers may either return a future or complete a [`Callback`]. The convention is
//! derived from the handler's signature when it is wrapped:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use flare_client::{BoxError, Client};
//! use flare_invocation::{Callback, Plugin, WrapperOptions};
//! use serde_json::Value;
//!
//! # fn wrap(client: Arc<dyn Client>) {
//! let plugin = Plugin::new(client, WrapperOptions::default());
//!
//! let returning = plugin.event_handler(|event: Value| async move {
//!     Ok::<_, BoxError>(event["id"].clone())
//! });
//!
//! let with_callback = plugin.event_handler(|_event: Value, done: Callback<String>| {
//!     done.succeed("processed".to_owned());
//! });
//! # }
//! ```
//!
//! # Invocation sequence
//!
//! Every invocation runs through the [`Executor`]:
//!
//! 1. A session is started, unless session tracking is disabled or a host integration that
//!    tracks sessions itself is loaded (see [`HOST_INTEGRATIONS`]).
//! 2. The handler runs. HTTP handlers additionally wait for the [`Response`] to complete.
//! 3. An error outcome is reported as unhandled, if error detection is enabled.
//! 4. Pending diagnostics are flushed. Failures are logged as
//!    `Delivery may be unsuccessful: <reason>`.
//! 5. The handler's outcome is returned unchanged.

#![warn(missing_docs)]

mod completion;
mod executor;
mod normalize;
mod plugin;

pub use crate::completion::*;
pub use crate::executor::*;
pub use crate::normalize::*;
pub use crate::plugin::*;
