//! Tracing subscriber setup for binaries and tests embedding the client

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install a JSON tracing subscriber filtered by `LOG_LEVEL`, then `RUST_LOG`,
/// falling back to `info`.
///
/// Fails if a global subscriber is already set; callers that may race with
/// another initializer can ignore the error.
pub fn init_tracing() -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .try_init()
}
