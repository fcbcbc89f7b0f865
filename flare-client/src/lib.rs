//! The diagnostics client capability consumed by Flare's function wrappers.
//!
//! Wrappers never construct, deliver or store diagnostics themselves. They call into an
//! application-owned [`Client`] that is shared across invocations:
//!
//! - [`Client::add_metadata`] attaches request or event data to subsequent reports,
//! - [`Client::start_session`] records a session for health statistics,
//! - [`Client::report`] queues an error report with a [`HandledState`],
//! - [`Client::flush`] waits for queued reports with a bounded timeout.
//!
//! # Features
//!
//! - `sentry`: enables [`SentryClient`], a client delivering to Sentry through the `sentry` SDK.

#![warn(missing_docs)]

mod client;
mod event;
#[cfg(feature = "sentry")]
mod sentry_client;

pub use crate::client::*;
pub use crate::event::*;
#[cfg(feature = "sentry")]
pub use crate::sentry_client::*;
