//! Public entry point: `SessionClient`
//!
//! Every call goes through `send`. A 2xx or a non-auth failure settles
//! immediately. An auth failure parks the request with the refresh
//! coordinator and settles once the shared refresh cycle has either replayed
//! it or ended the session.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use session_auth::{CredentialPair, CredentialStore, MemoryCredentialStore};
use tracing::{debug, info, instrument};

use crate::collaborators::{LogNavigator, LogNotifier, Navigator, Notifier};
use crate::config::{self, ClientConfig, DEFAULT_REFRESH_TIMEOUT, DEFAULT_REQUEST_TIMEOUT};
use crate::coordinator::{RefreshCoordinator, RefreshState, Waiter};
use crate::descriptor::{Attempt, RequestDescriptor};
use crate::error::{ClientError, Result};
use crate::metrics;
use crate::pipeline::RequestPipeline;
use crate::transport::{ApiResponse, ReqwestTransport, Transport};

struct Inner {
    pipeline: RequestPipeline,
    coordinator: RefreshCoordinator,
    store: Arc<dyn CredentialStore>,
}

/// Authenticated API client with single-flight credential refresh.
///
/// Cheap to clone; clones share the credential store and the refresh queue.
#[derive(Clone)]
pub struct SessionClient {
    inner: Arc<Inner>,
}

impl SessionClient {
    pub fn builder() -> SessionClientBuilder {
        SessionClientBuilder::default()
    }

    /// Build a client from loaded configuration. The navigator logs the
    /// configured login route; use the builder to plug in a real router.
    pub fn from_config(
        config: &ClientConfig,
        store: Arc<dyn CredentialStore>,
        transport: Arc<dyn Transport>,
    ) -> common::Result<Self> {
        Self::builder()
            .base_url(&config.api.base_url)
            .request_timeout(config.request_timeout())
            .refresh_path(&config.auth.refresh_path)
            .refresh_timeout(config.refresh_timeout())
            .credential_store(store)
            .transport(transport)
            .navigator(Arc::new(LogNavigator::new(&config.auth.login_route)))
            .build()
    }

    /// Send a request, transparently refreshing the session once if the
    /// access token is rejected.
    #[instrument(skip_all, fields(
        request_id = %descriptor.request_id,
        method = %descriptor.method,
        path = %descriptor.path
    ))]
    pub async fn send(&self, descriptor: RequestDescriptor) -> Result<ApiResponse> {
        let token = self.inner.pipeline.current_access_token();
        let result = match self
            .inner
            .pipeline
            .dispatch(&descriptor, token.as_deref(), Attempt::Initial)
            .await
        {
            Err(ClientError::AuthExpired(reason)) => {
                debug!(reason = %reason, "access token rejected, waiting on refresh");
                self.await_refresh(descriptor).await
            }
            other => other,
        };

        metrics::record_request(&result);
        result
    }

    /// Store the pair issued by the login flow. A refresh still in flight
    /// for the previous session will not overwrite it.
    pub fn establish_session(&self, credentials: CredentialPair) {
        self.inner.coordinator.begin_session(credentials);
        info!("session established");
    }

    /// Drop stored credentials. Requests queued on an in-flight refresh are
    /// rejected with `SessionExpired` and the refreshed pair is discarded.
    pub fn sign_out(&self) {
        self.inner.coordinator.end_session();
        info!("signed out");
    }

    pub fn refresh_state(&self) -> RefreshState {
        self.inner.coordinator.state()
    }

    /// Requests currently parked on a refresh cycle.
    pub fn queued_requests(&self) -> usize {
        self.inner.coordinator.queued()
    }

    pub fn credential_store(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.store
    }

    async fn await_refresh(&self, descriptor: RequestDescriptor) -> Result<ApiResponse> {
        let (waiter, settled) = Waiter::new(descriptor);

        if let Some(cycle) = self.inner.coordinator.enqueue(waiter) {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                inner.coordinator.run_cycle(cycle, &inner.pipeline).await;
            });
        }

        settled.await.unwrap_or_else(|_| {
            Err(ClientError::SessionExpired(
                "refresh cycle ended without settling the request".into(),
            ))
        })
    }
}

/// Builder for `SessionClient`. Only `base_url` is required.
pub struct SessionClientBuilder {
    base_url: Option<String>,
    request_timeout: Duration,
    refresh_path: String,
    refresh_timeout: Duration,
    transport: Option<Arc<dyn Transport>>,
    store: Option<Arc<dyn CredentialStore>>,
    navigator: Option<Arc<dyn Navigator>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl Default for SessionClientBuilder {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            refresh_path: session_auth::REFRESH_TOKEN_PATH.to_string(),
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
            transport: None,
            store: None,
            navigator: None,
            notifier: None,
        }
    }
}

impl SessionClientBuilder {
    pub fn base_url(mut self, url: &str) -> Self {
        self.base_url = Some(url.to_string());
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn refresh_path(mut self, path: &str) -> Self {
        self.refresh_path = path.to_string();
        self
    }

    pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn build(self) -> common::Result<SessionClient> {
        let base_url = self
            .base_url
            .ok_or_else(|| common::Error::Config("base_url is required".into()))?;
        config::validate_base_url(&base_url)?;

        if self.request_timeout.is_zero() || self.refresh_timeout.is_zero() {
            return Err(common::Error::Config(
                "timeouts must be greater than 0".into(),
            ));
        }
        if !self.refresh_path.starts_with('/') {
            return Err(common::Error::Config(format!(
                "refresh_path must start with /, got: {}",
                self.refresh_path
            )));
        }

        let refresh_url = format!("{}{}", base_url.trim_end_matches('/'), self.refresh_path);
        let refresh_url = Url::parse(&refresh_url).map_err(|e| {
            common::Error::Config(format!("invalid refresh URL {refresh_url}: {e}"))
        })?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::default()),
        };
        let store: Arc<dyn CredentialStore> = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryCredentialStore::new()),
        };
        let navigator: Arc<dyn Navigator> = match self.navigator {
            Some(navigator) => navigator,
            None => Arc::new(LogNavigator::default()),
        };
        let notifier: Arc<dyn Notifier> = match self.notifier {
            Some(notifier) => notifier,
            None => Arc::new(LogNotifier),
        };

        let pipeline = RequestPipeline::new(
            Arc::clone(&transport),
            Arc::clone(&store),
            &base_url,
            self.request_timeout,
        );
        let coordinator = RefreshCoordinator::new(
            transport,
            Arc::clone(&store),
            navigator,
            notifier,
            refresh_url,
            self.refresh_timeout,
        );

        info!(base_url = %base_url, "session client ready");
        Ok(SessionClient {
            inner: Arc::new(Inner {
                pipeline,
                coordinator,
                store,
            }),
        })
    }
}
