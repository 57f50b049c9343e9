//! Error types for credential and refresh-contract operations

/// Errors from credential storage and refresh response handling.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("refresh rejected: {0}")]
    Rejected(String),

    #[error("malformed refresh response: {0}")]
    MalformedResponse(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
