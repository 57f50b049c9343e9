//! Refresh endpoint wire contract
//!
//! `POST /auth/refresh-token` with `{"refreshToken": "..."}`. A 2xx reply
//! carries a complete new pair. Any other reply is a refresh failure,
//! including a JSON object missing either token.

use serde::{Deserialize, Serialize};

use crate::credentials::CredentialPair;
use crate::error::{Error, Result};

/// Body sent to the refresh endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

impl<'a> RefreshRequest<'a> {
    pub fn new(refresh_token: &'a str) -> Self {
        Self { refresh_token }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "refreshToken": self.refresh_token })
    }
}

/// Successful reply from the refresh endpoint.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
}

impl From<RefreshResponse> for CredentialPair {
    fn from(response: RefreshResponse) -> Self {
        CredentialPair::new(response.access_token, response.refresh_token)
    }
}

/// Turn a raw refresh endpoint reply into a new credential pair.
///
/// The body is never echoed into the error on success-status parse failures,
/// since a partially valid body may still contain token material.
pub fn parse_refresh_response(status: u16, body: &[u8]) -> Result<CredentialPair> {
    if !(200..300).contains(&status) {
        let text = String::from_utf8_lossy(body);
        return Err(Error::Rejected(format!(
            "refresh endpoint returned {status}: {}",
            truncate(&text, 200)
        )));
    }

    let response: RefreshResponse = serde_json::from_slice(body)
        .map_err(|e| Error::MalformedResponse(format!("invalid refresh response: {e}")))?;

    if response.access_token.is_empty() || response.refresh_token.is_empty() {
        return Err(Error::MalformedResponse(
            "refresh response contained an empty token".into(),
        ));
    }

    Ok(response.into())
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
