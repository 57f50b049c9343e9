//! Authenticated API client with single-flight session refresh
//!
//! Wraps every backend call so that an expired access token triggers at most
//! one refresh, no matter how many requests fail concurrently. Requests that
//! fail during a refresh are queued and replayed once with the new token, in
//! the order they failed. If the refresh itself fails the session is torn
//! down once: credentials cleared, user sent to the login route.
//!
//! Request flow:
//! 1. `SessionClient::send()` dispatches through the `RequestPipeline`
//! 2. Auth failures are handed to the `RefreshCoordinator` as `Waiter`s
//! 3. The first waiter of a cycle spawns the refresh; others just queue
//! 4. The `replay` module settles every waiter from the cycle outcome

pub mod classify;
pub mod client;
pub mod collaborators;
pub mod config;
pub mod coordinator;
pub mod descriptor;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod replay;
pub mod telemetry;
pub mod transport;

pub use classify::ErrorKind;
pub use client::{SessionClient, SessionClientBuilder};
pub use collaborators::{LogNavigator, LogNotifier, Navigator, Notifier, Severity};
pub use config::ClientConfig;
pub use coordinator::{CycleId, RefreshCoordinator, RefreshState, Waiter};
pub use descriptor::{Attempt, RequestDescriptor};
pub use error::{ClientError, Result};
pub use transport::{
    ApiResponse, OutgoingRequest, ReqwestTransport, Transport, TransportError, TransportFuture,
};

pub use session_auth::{CredentialPair, CredentialStore, FileCredentialStore, MemoryCredentialStore};
