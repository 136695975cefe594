//! Error taxonomy of the authenticated request client.

use serde::Serialize;

use crate::session_store::SessionStoreError;

/// Why a session ended. Carried by [`ApiError::AuthExpired`] and by the
/// session-ended event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "detail")]
pub enum SessionEndReason {
    /// A 401 arrived and no refresh token was stored.
    MissingRefreshToken,
    /// The refresh endpoint answered with a non-2xx status.
    RefreshRejected { status: u16 },
    /// The refresh call failed in transport (network error, timeout, bad body).
    RefreshUnavailable(String),
    /// The replayed request was rejected even with the refreshed token.
    RejectedAfterRefresh,
    /// The refreshing call was dropped before it completed.
    RefreshAbandoned,
    /// Explicit logout.
    LoggedOut,
}

impl std::fmt::Display for SessionEndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingRefreshToken => write!(f, "no refresh token available"),
            Self::RefreshRejected { status } => write!(f, "refresh rejected with HTTP {status}"),
            Self::RefreshUnavailable(detail) => write!(f, "refresh failed: {detail}"),
            Self::RejectedAfterRefresh => write!(f, "refreshed token was rejected"),
            Self::RefreshAbandoned => write!(f, "refresh abandoned"),
            Self::LoggedOut => write!(f, "logged out"),
        }
    }
}

/// Coarse error category for the view layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transient; the user may retry.
    Network,
    /// Session is over; redirect to login.
    AuthExpired,
    /// The backend answered but refused or returned garbage.
    Backend,
    /// Local failure (storage, encoding).
    Internal,
}

/// Errors surfaced by [`AuthenticatedClient`](super::AuthenticatedClient).
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Request timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },
    #[error("Session ended: {0}")]
    AuthExpired(SessionEndReason),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Response parsing error: {0}")]
    Decode(String),
    #[error("Request encoding error: {0}")]
    Encode(String),
    #[error("Session store error: {0}")]
    Store(#[from] SessionStoreError),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) | Self::Timeout { .. } => ErrorKind::Network,
            Self::AuthExpired(_) => ErrorKind::AuthExpired,
            Self::Status { .. } | Self::Decode(_) => ErrorKind::Backend,
            Self::Encode(_) | Self::Store(_) => ErrorKind::Internal,
        }
    }

    /// The end-of-session reason, if this error ended the session.
    pub fn session_end_reason(&self) -> Option<&SessionEndReason> {
        match self {
            Self::AuthExpired(reason) => Some(reason),
            _ => None,
        }
    }
}
