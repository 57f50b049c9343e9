//! Configuration and setup errors

use thiserror::Error;

/// Errors raised while loading configuration or assembling a client.
///
/// Per-request failures never use this type; they are reported through the
/// client's own closed error taxonomy.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid client configuration: {0}")]
    Config(String),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("config file is not valid TOML: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;
