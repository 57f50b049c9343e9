//! Request pipeline
//!
//! Turns a `RequestDescriptor` into an `OutgoingRequest`, attaches the bearer
//! credential, applies the per-request timeout, and classifies the result.
//! The pipeline never decides whether to refresh; an unauthenticated response
//! comes back as `ClientError::AuthExpired` and the caller decides.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use session_auth::{BEARER_PREFIX, CredentialStore};
use tracing::{debug, warn};

use crate::classify;
use crate::descriptor::{Attempt, RequestDescriptor};
use crate::error::{ClientError, Result};
use crate::transport::{ApiResponse, OutgoingRequest, Transport, TransportError};

pub struct RequestPipeline {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    /// Base URL without a trailing slash
    base_url: String,
    timeout: Duration,
}

impl RequestPipeline {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        base_url: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            store,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    /// Access credential currently held by the store.
    pub fn current_access_token(&self) -> Option<String> {
        self.store.access_token()
    }

    /// Build the outgoing request for a descriptor.
    ///
    /// Without a token the request is sent unauthenticated. A token that
    /// cannot be encoded as a header value is skipped the same way, so the
    /// backend's 401 drives the normal refresh path.
    pub fn prepare(
        &self,
        descriptor: &RequestDescriptor,
        access_token: Option<&str>,
    ) -> Result<OutgoingRequest> {
        let url = self.resolve_url(descriptor)?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(token) = access_token {
            match HeaderValue::from_str(&format!("{BEARER_PREFIX}{token}")) {
                Ok(mut value) => {
                    value.set_sensitive(true);
                    headers.insert(AUTHORIZATION, value);
                }
                Err(e) => {
                    warn!(
                        request_id = %descriptor.request_id,
                        error = %e,
                        "access token is not a valid header value, sending unauthenticated"
                    );
                }
            }
        }

        Ok(OutgoingRequest {
            method: descriptor.method.clone(),
            url,
            headers,
            body: descriptor.body.clone(),
            timeout: self.timeout,
        })
    }

    /// Send one attempt of a descriptor and classify the outcome.
    ///
    /// 2xx responses are returned unchanged. Everything else becomes a
    /// `ClientError`; an auth failure on a replay is reported as terminal.
    pub async fn dispatch(
        &self,
        descriptor: &RequestDescriptor,
        access_token: Option<&str>,
        attempt: Attempt,
    ) -> Result<ApiResponse> {
        let request = self.prepare(descriptor, access_token)?;

        let outcome = tokio::time::timeout(self.timeout, self.transport.execute(request)).await;
        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(
                    request_id = %descriptor.request_id,
                    attempt = attempt.label(),
                    error = %e,
                    "request failed without a response"
                );
                return Err(classify::from_transport(&e));
            }
            Err(_) => {
                warn!(
                    request_id = %descriptor.request_id,
                    attempt = attempt.label(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "request timed out"
                );
                return Err(classify::from_transport(&TransportError::Timeout));
            }
        };

        let status = response.status.as_u16();
        if response.is_success() {
            debug!(
                request_id = %descriptor.request_id,
                attempt = attempt.label(),
                status,
                "request succeeded"
            );
            return Ok(response);
        }

        let err = match classify::to_client_error(status, &response.text()) {
            ClientError::AuthExpired(msg) if attempt.is_retried() => {
                ClientError::AuthExpired(format!("rejected after credential refresh: {msg}"))
            }
            other => other,
        };
        debug!(
            request_id = %descriptor.request_id,
            attempt = attempt.label(),
            status,
            kind = err.kind().label(),
            "request failed"
        );
        Err(err)
    }

    fn resolve_url(&self, descriptor: &RequestDescriptor) -> Result<Url> {
        let path = &descriptor.path;
        let raw = if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        };

        let mut url = Url::parse(&raw)
            .map_err(|e| ClientError::Network(format!("invalid request URL {raw}: {e}")))?;
        if !descriptor.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&descriptor.query);
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportFuture;
    use reqwest::StatusCode;
    use session_auth::{CredentialPair, MemoryCredentialStore};
    use std::sync::Mutex;

    /// Transport that returns one canned result and remembers the request.
    struct CannedTransport {
        result: std::result::Result<(u16, &'static str), TransportError>,
        seen: Mutex<Vec<OutgoingRequest>>,
    }

    impl CannedTransport {
        fn new(result: std::result::Result<(u16, &'static str), TransportError>) -> Arc<Self> {
            Arc::new(Self {
                result,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl Transport for CannedTransport {
        fn execute(&self, request: OutgoingRequest) -> TransportFuture<'_> {
            self.seen.lock().unwrap().push(request);
            let result = self.result.clone().map(|(status, body)| {
                ApiResponse::new(StatusCode::from_u16(status).unwrap(), body)
            });
            Box::pin(async move { result })
        }
    }

    fn pipeline(transport: Arc<CannedTransport>) -> RequestPipeline {
        let store = Arc::new(MemoryCredentialStore::with_credentials(CredentialPair::new(
            "at_1", "rt_1",
        )));
        RequestPipeline::new(
            transport,
            store,
            "https://api.example.com/v1/",
            Duration::from_secs(5),
        )
    }

    #[test]
    fn prepare_attaches_bearer_and_builds_url() {
        let p = pipeline(CannedTransport::new(Ok((200, "{}"))));
        let d = RequestDescriptor::get("/projects")
            .with_query("page", "2")
            .with_query("q", "a b");

        let req = p.prepare(&d, Some("at_1")).unwrap();
        assert_eq!(
            req.url.as_str(),
            "https://api.example.com/v1/projects?page=2&q=a+b"
        );
        assert_eq!(req.authorization(), Some("Bearer at_1"));
    }

    #[test]
    fn prepare_without_token_is_unauthenticated() {
        let p = pipeline(CannedTransport::new(Ok((200, "{}"))));
        let req = p.prepare(&RequestDescriptor::get("users"), None).unwrap();
        assert_eq!(req.url.as_str(), "https://api.example.com/v1/users");
        assert!(req.authorization().is_none());
    }

    #[test]
    fn prepare_skips_unencodable_token() {
        let p = pipeline(CannedTransport::new(Ok((200, "{}"))));
        let req = p
            .prepare(&RequestDescriptor::get("/a"), Some("bad\ntoken"))
            .unwrap();
        assert!(req.authorization().is_none());
    }

    #[test]
    fn current_token_comes_from_store() {
        let p = pipeline(CannedTransport::new(Ok((200, "{}"))));
        assert_eq!(p.current_access_token().as_deref(), Some("at_1"));
    }

    #[tokio::test]
    async fn success_is_returned_unchanged() {
        let transport = CannedTransport::new(Ok((200, r#"{"ok":true}"#)));
        let p = pipeline(transport.clone());

        let response = p
            .dispatch(&RequestDescriptor::get("/a"), Some("at_1"), Attempt::Initial)
            .await
            .unwrap();
        assert_eq!(response.text(), r#"{"ok":true}"#);
        assert_eq!(transport.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unauthorized_maps_to_auth_expired() {
        let p = pipeline(CannedTransport::new(Ok((401, ""))));
        let err = p
            .dispatch(&RequestDescriptor::get("/a"), Some("at_1"), Attempt::Initial)
            .await
            .unwrap_err();
        assert_eq!(err, ClientError::AuthExpired("backend returned 401".into()));
    }

    #[tokio::test]
    async fn unauthorized_replay_is_marked_terminal() {
        let p = pipeline(CannedTransport::new(Ok((401, ""))));
        let err = p
            .dispatch(&RequestDescriptor::get("/a"), Some("at_2"), Attempt::Replay)
            .await
            .unwrap_err();
        match err {
            ClientError::AuthExpired(msg) => assert!(msg.contains("after credential refresh")),
            other => panic!("expected AuthExpired, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn validation_and_server_errors_are_classified() {
        let p = pipeline(CannedTransport::new(Ok((422, r#"{"message":"bad name"}"#))));
        let err = p
            .dispatch(&RequestDescriptor::post("/a"), None, Attempt::Initial)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ClientError::Validation {
                status: 422,
                message: "bad name".into()
            }
        );

        let p = pipeline(CannedTransport::new(Ok((502, "bad gateway"))));
        let err = p
            .dispatch(&RequestDescriptor::get("/a"), None, Attempt::Initial)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(502));
    }

    #[tokio::test]
    async fn transport_failure_is_network_error() {
        let p = pipeline(CannedTransport::new(Err(TransportError::Connect(
            "refused".into(),
        ))));
        let err = p
            .dispatch(&RequestDescriptor::get("/a"), None, Attempt::Initial)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Network(_)));
    }
}
