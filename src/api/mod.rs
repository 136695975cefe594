//! Authenticated access to the dashboard backend.
//!
//! `AuthenticatedClient` is the only way the rest of the crate talks to the
//! network. It owns the token lifecycle: bearer attachment, single-flight
//! refresh on 401, one replay per request, and the session-ended signal.

pub mod auth;
pub mod client;
pub mod error;
pub mod refresh;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use client::{AuthenticatedClient, SessionEvent};
pub use error::{ApiError, ErrorKind, SessionEndReason};
pub use refresh::RefreshState;
pub use transport::{HttpTransport, Transport, TransportError};
pub use types::{ApiRequest, ApiResponse, FilePart, Method, MultipartForm, UserProfile};
