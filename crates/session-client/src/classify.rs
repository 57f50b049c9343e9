//! Error classification for backend responses
//!
//! Maps raw HTTP outcomes into the closed `ErrorKind` taxonomy so calling code
//! never inspects status codes. Everything here is a pure function of
//! (status, body): no state, no side effects.

use session_auth::UNAUTHENTICATED_CODE;

use crate::error::ClientError;
use crate::transport::TransportError;

/// Longest body excerpt carried into an error message.
const MAX_MESSAGE_CHARS: usize = 200;

/// Closed set of failure kinds exposed to calling code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    AuthExpired,
    SessionExpired,
    Validation,
    Server,
}

impl ErrorKind {
    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network_error",
            ErrorKind::AuthExpired => "auth_expired",
            ErrorKind::SessionExpired => "session_expired",
            ErrorKind::Validation => "validation_error",
            ErrorKind::Server => "server_error",
        }
    }
}

/// Classify a non-2xx response.
///
/// 401 (or an unauthenticated error code in the body) is `AuthExpired`, other
/// 4xx are `Validation`, and 5xx are `Server`. Statuses outside 400-599 should
/// never reach this point; they are treated as `Server` because the client
/// cannot act on them.
pub fn classify(status: u16, body: &str) -> ErrorKind {
    if is_unauthenticated(status, body) {
        return ErrorKind::AuthExpired;
    }
    match status {
        400..=499 => ErrorKind::Validation,
        _ => ErrorKind::Server,
    }
}

/// Whether a response means the access credential was not accepted.
///
/// Besides a plain 401, some endpoints answer with another error status and a
/// body code of `UNAUTHENTICATED`, either at the top level, under `error`, or
/// in a GraphQL-style `errors[].extensions` block.
pub fn is_unauthenticated(status: u16, body: &str) -> bool {
    if status == 401 {
        return true;
    }
    if (200..300).contains(&status) || body.is_empty() {
        return false;
    }
    let Ok(json) = serde_json::from_str::<serde_json::Value>(body) else {
        return false;
    };

    let code_matches =
        |v: Option<&serde_json::Value>| v.and_then(|c| c.as_str()) == Some(UNAUTHENTICATED_CODE);

    code_matches(json.get("code"))
        || code_matches(json.get("error").and_then(|e| e.get("code")))
        || json
            .get("errors")
            .and_then(|e| e.as_array())
            .is_some_and(|errors| {
                errors
                    .iter()
                    .any(|e| code_matches(e.get("extensions").and_then(|x| x.get("code"))))
            })
}

/// Build the caller-facing error for a non-2xx response.
pub fn to_client_error(status: u16, body: &str) -> ClientError {
    let message = extract_message(body).unwrap_or_else(|| format!("backend returned {status}"));
    match classify(status, body) {
        ErrorKind::AuthExpired => ClientError::AuthExpired(message),
        ErrorKind::Validation => ClientError::Validation { status, message },
        _ => ClientError::Server { status, message },
    }
}

/// Every transport failure is a `Network` error; none of them can trigger a
/// refresh.
pub fn from_transport(error: &TransportError) -> ClientError {
    ClientError::Network(error.to_string())
}

/// Pull a human-readable message out of an error body.
///
/// Looks at `message`, a string `error`, then `error.message`. Non-JSON bodies
/// are used verbatim (truncated). Empty bodies yield `None`.
pub fn extract_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
        let candidates = [
            json.get("message"),
            json.get("error").filter(|e| e.is_string()),
            json.get("error").and_then(|e| e.get("message")),
        ];
        if let Some(msg) = candidates.into_iter().flatten().find_map(|v| v.as_str()) {
            return Some(truncate(msg));
        }
    }

    Some(truncate(trimmed))
}

fn truncate(s: &str) -> String {
    match s.char_indices().nth(MAX_MESSAGE_CHARS) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}
