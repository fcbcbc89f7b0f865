//! HTTP request model and snapshots for diagnostics metadata.
//!
//! Function hosts describe the inbound request with an [`HttpRequest`], either filled by hand or
//! built from the head of an [`http::Request`] via [`HttpRequest::from_parts`]. The wrappers turn
//! it into a [`RequestSnapshot`]: a flat, serializable view with an absolute URL, flattened
//! headers and client information, attached to error reports as `request` metadata.
//!
//! ```
//! use flare_request::{HttpRequest, RequestSnapshot};
//!
//! let request = HttpRequest {
//!     protocol: Some("http".to_owned()),
//!     hostname: Some("example.com".to_owned()),
//!     url: "/a/b".to_owned(),
//!     ..Default::default()
//! };
//!
//! let snapshot = RequestSnapshot::from_request(&request);
//! assert_eq!(snapshot.url, "http://example.com/a/b");
//! ```

#![warn(missing_docs)]

mod request;
mod snapshot;

pub use crate::request::*;
pub use crate::snapshot::*;
