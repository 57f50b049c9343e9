//! Session credential library
//!
//! Holds the credential pair issued at login, the storage contract the refresh
//! coordinator needs, and the wire contract of the backend's refresh endpoint.
//! This crate performs no network I/O; the client crate owns transport.
//!
//! Credential flow:
//! 1. Login flow stores a `CredentialPair` via `CredentialStore::set_credentials()`
//! 2. Client attaches `CredentialStore::access_token()` to every request
//! 3. On 401 the coordinator sends a `RefreshRequest` built from `refresh_token()`
//! 4. `parse_refresh_response()` turns the reply into a new `CredentialPair`
//! 5. New pair written back with `set_credentials()`, or `clear()` on failure

pub mod constants;
pub mod credentials;
pub mod error;
pub mod token;

pub use constants::*;
pub use credentials::{CredentialPair, CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use error::{Error, Result};
pub use token::{RefreshRequest, RefreshResponse, parse_refresh_response};
