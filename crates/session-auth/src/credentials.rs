//! Credential storage for the session's token pair
//!
//! The store is an opaque collaborator: the refresh coordinator reads both
//! tokens, writes a new pair after a successful refresh, and clears it on
//! teardown. It carries no concurrency logic beyond keeping each call
//! internally consistent.
//!
//! `FileCredentialStore` persists the pair as JSON. All writes use atomic
//! temp-file + rename to prevent corruption on crash; the in-memory copy is
//! authoritative for reads.

use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use common::Secret;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Access and refresh credentials issued together by the backend.
///
/// Both fields are redacted when formatted, so a pair can be logged with
/// `?pair` without leaking tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPair {
    /// Short-lived bearer token attached to every request
    pub access_token: Secret<String>,
    /// Longer-lived token used only against the refresh endpoint
    pub refresh_token: Secret<String>,
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: Secret::new(access_token.into()),
            refresh_token: Secret::new(refresh_token.into()),
        }
    }

    pub fn access(&self) -> &str {
        self.access_token.expose()
    }

    pub fn refresh(&self) -> &str {
        self.refresh_token.expose()
    }
}

/// Storage contract consumed by the refresh coordinator.
///
/// Implementations must be cheap to call from async code: no method may block
/// on network I/O. Writes that fail to persist are logged by the
/// implementation rather than surfaced, matching the fire-and-forget contract
/// of the storage medium.
pub trait CredentialStore: Send + Sync {
    /// Current access credential, if a session exists.
    fn access_token(&self) -> Option<String>;

    /// Current refresh credential, if a session exists.
    fn refresh_token(&self) -> Option<String>;

    /// Replace the stored pair.
    fn set_credentials(&self, pair: CredentialPair);

    /// Forget the session entirely.
    fn clear(&self);
}

/// Process-local credential store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    state: RwLock<Option<CredentialPair>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with a pair, as after a completed login.
    pub fn with_credentials(pair: CredentialPair) -> Self {
        Self {
            state: RwLock::new(Some(pair)),
        }
    }

    /// Snapshot of the stored pair.
    pub fn credentials(&self) -> Option<CredentialPair> {
        read(&self.state).clone()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn access_token(&self) -> Option<String> {
        read(&self.state).as_ref().map(|p| p.access().to_owned())
    }

    fn refresh_token(&self) -> Option<String> {
        read(&self.state).as_ref().map(|p| p.refresh().to_owned())
    }

    fn set_credentials(&self, pair: CredentialPair) {
        *write(&self.state) = Some(pair);
        debug!("stored credentials");
    }

    fn clear(&self) {
        *write(&self.state) = None;
        debug!("cleared credentials");
    }
}

/// File-backed credential store.
///
/// The file holds either the serialized pair or `null` when signed out.
pub struct FileCredentialStore {
    path: PathBuf,
    state: RwLock<Option<CredentialPair>>,
}

impl FileCredentialStore {
    /// Load credentials from the given file path.
    ///
    /// If the file doesn't exist, creates it as `null` (signed out). The
    /// first request will go out unauthenticated until a login stores a pair.
    pub fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let credentials: Option<CredentialPair> = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            info!(
                path = %path.display(),
                signed_in = credentials.is_some(),
                "loaded credentials"
            );
            credentials
        } else {
            info!(path = %path.display(), "credential file not found, starting signed out");
            write_atomic(&path, &None)?;
            None
        };

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the stored pair.
    pub fn credentials(&self) -> Option<CredentialPair> {
        read(&self.state).clone()
    }

    fn replace(&self, next: Option<CredentialPair>) {
        let mut state = write(&self.state);
        *state = next;
        if let Err(e) = write_atomic(&self.path, &state) {
            warn!(path = %self.path.display(), error = %e, "failed to persist credentials");
        }
    }
}

impl CredentialStore for FileCredentialStore {
    fn access_token(&self) -> Option<String> {
        read(&self.state).as_ref().map(|p| p.access().to_owned())
    }

    fn refresh_token(&self) -> Option<String> {
        read(&self.state).as_ref().map(|p| p.refresh().to_owned())
    }

    fn set_credentials(&self, pair: CredentialPair) {
        self.replace(Some(pair));
        debug!(path = %self.path.display(), "stored credentials");
    }

    fn clear(&self) {
        self.replace(None);
        debug!(path = %self.path.display(), "cleared credentials");
    }
}

// A panic while holding the lock cannot leave a half-written Option, so a
// poisoned guard is still safe to use.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Sibling temp file for `path`, named after the target so stores sharing a
/// directory never write through each other's temp file.
fn temp_path_for(path: &Path) -> Result<PathBuf> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;
    let name = path
        .file_name()
        .ok_or_else(|| Error::Io("credential path has no file name".into()))?;

    Ok(dir.join(format!(
        ".{}.tmp.{}",
        name.to_string_lossy(),
        std::process::id()
    )))
}

/// Write credentials to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets file permissions to 0600 (owner read/write only) since
/// the file contains bearer tokens.
fn write_atomic(path: &Path, data: &Option<CredentialPair>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let tmp_path = temp_path_for(path)?;

    std::fs::write(&tmp_path, json.as_bytes())
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&tmp_path, perms)
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    std::fs::rename(&tmp_path, path)
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}
