//! Errors surfaced to calling code

use crate::classify::ErrorKind;

/// Closed error taxonomy returned by `SessionClient::send`.
///
/// `Clone` so a single refresh outcome can be fanned out to every waiter.
/// Calling code is expected to branch on `kind()` rather than on status codes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// No response was received (connect failure, timeout, broken body).
    #[error("network error: {0}")]
    Network(String),

    /// Authentication failed again on a request that was already replayed
    /// with a refreshed credential.
    #[error("authentication expired: {0}")]
    AuthExpired(String),

    /// The refresh cycle failed; the session has been torn down.
    #[error("session expired: {0}")]
    SessionExpired(String),

    /// 4xx describing a problem with the request content.
    #[error("validation error ({status}): {message}")]
    Validation { status: u16, message: String },

    /// 5xx or an otherwise unusable response from the backend.
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Network(_) => ErrorKind::Network,
            ClientError::AuthExpired(_) => ErrorKind::AuthExpired,
            ClientError::SessionExpired(_) => ErrorKind::SessionExpired,
            ClientError::Validation { .. } => ErrorKind::Validation,
            ClientError::Server { .. } => ErrorKind::Server,
        }
    }

    /// HTTP status behind the error, when a response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Validation { status, .. } | ClientError::Server { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// Whether the error ends the whole session rather than one request.
    pub fn is_terminal_for_session(&self) -> bool {
        matches!(self, ClientError::SessionExpired(_))
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
