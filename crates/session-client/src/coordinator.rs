//! Single-flight credential refresh
//!
//! At most one refresh call is in flight per client. Every request that hits
//! an auth failure becomes a `Waiter`; the first one to arrive while the
//! coordinator is idle starts a new cycle, later ones just queue.
//!
//! Lifecycle of a cycle:
//! 1. `enqueue()` moves `Idle -> Refreshing` in the same critical section that
//!    queues the waiter and returns the new `CycleId`
//! 2. `run_cycle()` calls the refresh endpoint once with the stored refresh token
//! 3. Success: new pair written to the store, queue drained, waiters replayed
//! 4. Failure: store cleared, queue drained, waiters rejected, then the
//!    session is torn down once
//!
//! Every store write (cycle outcome, login, sign-out) happens under the queue
//! lock. Login and sign-out bump a session generation; a cycle that started
//! under an older generation settles its waiters without touching the store.
//!
//! The queue lock is a `std::sync::Mutex` and is never held across an await.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Method, Url};
use session_auth::{CredentialPair, CredentialStore, RefreshRequest};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::collaborators::{Navigator, Notifier, Severity};
use crate::descriptor::RequestDescriptor;
use crate::error::{ClientError, Result};
use crate::metrics;
use crate::pipeline::RequestPipeline;
use crate::replay;
use crate::transport::{ApiResponse, OutgoingRequest, Transport};

/// Message shown to the user when the session ends.
const SESSION_EXPIRED_NOTICE: &str = "Your session has expired. Please sign in again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Refreshing,
}

/// Identifies one refresh cycle and the session generation it started in.
///
/// Cycle ids are monotonic and start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleId {
    id: u64,
    session: u64,
}

impl CycleId {
    pub fn get(&self) -> u64 {
        self.id
    }
}

/// A request parked until the current refresh cycle settles.
pub struct Waiter {
    pub descriptor: RequestDescriptor,
    settle: oneshot::Sender<Result<ApiResponse>>,
}

impl Waiter {
    /// Create a waiter and the receiver its caller awaits.
    pub fn new(descriptor: RequestDescriptor) -> (Self, oneshot::Receiver<Result<ApiResponse>>) {
        let (settle, settled) = oneshot::channel();
        (Self { descriptor, settle }, settled)
    }

    /// Resolve the caller's future. A caller that stopped waiting is not an error.
    pub fn settle(self, outcome: Result<ApiResponse>) {
        let request_id = self.descriptor.request_id;
        if self.settle.send(outcome).is_err() {
            debug!(%request_id, "caller went away before its request settled");
        }
    }
}

struct Queue {
    state: RefreshState,
    waiters: VecDeque<Waiter>,
    /// Id of the most recently started cycle, 0 before the first one
    cycle: u64,
    /// Bumped by every login and sign-out
    session: u64,
}

impl Queue {
    fn is_current(&self, cycle: CycleId) -> bool {
        self.session == cycle.session
    }

    fn drain(&mut self, cycle: CycleId) -> VecDeque<Waiter> {
        if self.state != RefreshState::Refreshing || self.cycle != cycle.id {
            warn!(
                cycle = cycle.id,
                current = self.cycle,
                "completing a cycle that is not in flight"
            );
        }
        self.state = RefreshState::Idle;
        std::mem::take(&mut self.waiters)
    }
}

/// Rejects whatever is still queued if a cycle ends without settling its
/// waiters (a panicking store, or the task dropped at runtime shutdown).
struct CycleGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    cycle: CycleId,
    settled: bool,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let waiters = self.coordinator.complete(self.cycle);
        warn!(
            cycle = self.cycle.id,
            waiters = waiters.len(),
            "refresh cycle aborted, rejecting queued requests"
        );
        replay::on_refresh_rejected(
            &ClientError::SessionExpired("refresh cycle aborted".into()),
            waiters,
        );
    }
}

pub struct RefreshCoordinator {
    queue: Mutex<Queue>,
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    navigator: Arc<dyn Navigator>,
    notifier: Arc<dyn Notifier>,
    refresh_url: Url,
    refresh_timeout: Duration,
    /// Highest cycle id that has already torn the session down
    torn_down: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        navigator: Arc<dyn Navigator>,
        notifier: Arc<dyn Notifier>,
        refresh_url: Url,
        refresh_timeout: Duration,
    ) -> Self {
        Self {
            queue: Mutex::new(Queue {
                state: RefreshState::Idle,
                waiters: VecDeque::new(),
                cycle: 0,
                session: 0,
            }),
            transport,
            store,
            navigator,
            notifier,
            refresh_url,
            refresh_timeout,
            torn_down: AtomicU64::new(0),
        }
    }

    /// Queue a waiter after an auth failure.
    ///
    /// Returns the id of a new cycle when this call moved the coordinator out
    /// of `Idle`; the caller must then run that cycle. Returns `None` when a
    /// refresh is already in flight and will settle this waiter.
    pub fn enqueue(&self, waiter: Waiter) -> Option<CycleId> {
        let mut queue = self.lock();
        let request_id = waiter.descriptor.request_id;
        queue.waiters.push_back(waiter);

        match queue.state {
            RefreshState::Refreshing => {
                debug!(
                    %request_id,
                    cycle = queue.cycle,
                    queued = queue.waiters.len(),
                    "refresh in flight, request queued"
                );
                None
            }
            RefreshState::Idle => {
                queue.state = RefreshState::Refreshing;
                queue.cycle += 1;
                info!(%request_id, cycle = queue.cycle, "access token rejected, starting refresh");
                Some(CycleId {
                    id: queue.cycle,
                    session: queue.session,
                })
            }
        }
    }

    /// Call the refresh endpoint once with the stored refresh token.
    ///
    /// Every failure mode (no refresh token, rejection, malformed reply,
    /// network error, timeout) is reported as `SessionExpired`.
    pub async fn refresh(&self) -> Result<CredentialPair> {
        let Some(refresh_token) = self.store.refresh_token() else {
            return Err(ClientError::SessionExpired(
                "no refresh token available".into(),
            ));
        };

        let request = OutgoingRequest {
            method: Method::POST,
            url: self.refresh_url.clone(),
            headers: HeaderMap::new(),
            body: Some(RefreshRequest::new(&refresh_token).to_json()),
            timeout: self.refresh_timeout,
        };

        let response =
            match tokio::time::timeout(self.refresh_timeout, self.transport.execute(request)).await
            {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    return Err(ClientError::SessionExpired(format!(
                        "refresh request failed: {e}"
                    )));
                }
                Err(_) => {
                    return Err(ClientError::SessionExpired(format!(
                        "refresh timed out after {}ms",
                        self.refresh_timeout.as_millis()
                    )));
                }
            };

        session_auth::parse_refresh_response(response.status.as_u16(), &response.body)
            .map_err(|e| ClientError::SessionExpired(e.to_string()))
    }

    /// Close a cycle: back to `Idle` and hand over every queued waiter in
    /// arrival order. Both happen under one lock acquisition, so a failure
    /// arriving afterwards starts a fresh cycle instead of joining this one.
    pub fn complete(&self, cycle: CycleId) -> VecDeque<Waiter> {
        self.lock().drain(cycle)
    }

    /// Store the outcome of a cycle and close it under one lock acquisition.
    ///
    /// `Some(pair)` writes the refreshed pair, `None` clears the store. Nothing
    /// is written if a login or sign-out happened since the cycle started;
    /// the returned flag says whether the cycle was still current.
    fn close(
        &self,
        cycle: CycleId,
        refreshed: Option<&CredentialPair>,
    ) -> (bool, VecDeque<Waiter>) {
        let mut queue = self.lock();
        let current = queue.is_current(cycle);
        if current {
            match refreshed {
                Some(pair) => self.store.set_credentials(pair.clone()),
                None => self.store.clear(),
            }
        }
        (current, queue.drain(cycle))
    }

    /// End the session after a failed refresh: clear the store, redirect to
    /// login, and notify the user. Runs at most once per cycle id, and not at
    /// all once a login or sign-out has superseded the cycle's session.
    /// Returns whether this call performed the teardown.
    pub fn teardown(&self, cycle: CycleId, reason: &str) -> bool {
        let previous = self.torn_down.fetch_max(cycle.id, Ordering::AcqRel);
        if previous >= cycle.id {
            debug!(cycle = cycle.id, "session already torn down for this cycle");
            return false;
        }

        {
            let queue = self.lock();
            if !queue.is_current(cycle) {
                debug!(
                    cycle = cycle.id,
                    "session replaced since refresh started, skipping teardown"
                );
                return false;
            }
            self.store.clear();
        }

        warn!(cycle = cycle.id, reason, "refresh failed, ending session");
        self.navigator.redirect_to_login(reason);
        self.notifier.notify(SESSION_EXPIRED_NOTICE, Severity::Error);
        true
    }

    /// Store a pair issued by the login flow. Any cycle in flight is superseded.
    pub fn begin_session(&self, credentials: CredentialPair) {
        let mut queue = self.lock();
        queue.session += 1;
        self.store.set_credentials(credentials);
    }

    /// Clear stored credentials. Any cycle in flight is superseded and will
    /// reject its waiters instead of restoring the session.
    pub fn end_session(&self) {
        let mut queue = self.lock();
        queue.session += 1;
        self.store.clear();
    }

    /// Drive one cycle to completion and settle every waiter.
    ///
    /// Callers run this on a spawned task so the cycle finishes even when the
    /// request that started it is dropped. Waiters are settled before any
    /// collaborator is called.
    pub async fn run_cycle(&self, cycle: CycleId, pipeline: &RequestPipeline) {
        let mut guard = CycleGuard {
            coordinator: self,
            cycle,
            settled: false,
        };

        match self.refresh().await {
            Ok(pair) => {
                let (current, waiters) = self.close(cycle, Some(&pair));
                guard.settled = true;
                metrics::record_refresh(current, waiters.len());
                if current {
                    info!(
                        cycle = cycle.id,
                        waiters = waiters.len(),
                        "refresh succeeded, replaying queued requests"
                    );
                    replay::on_refresh_resolved(pipeline, &pair, waiters).await;
                } else {
                    info!(
                        cycle = cycle.id,
                        waiters = waiters.len(),
                        "session replaced during refresh, discarding refreshed credentials"
                    );
                    replay::on_refresh_rejected(
                        &ClientError::SessionExpired(
                            "session ended while refresh was in flight".into(),
                        ),
                        waiters,
                    );
                }
            }
            Err(err) => {
                let (_, waiters) = self.close(cycle, None);
                guard.settled = true;
                metrics::record_refresh(false, waiters.len());
                replay::on_refresh_rejected(&err, waiters);
                self.teardown(cycle, &err.to_string());
            }
        }
    }

    pub fn state(&self) -> RefreshState {
        self.lock().state
    }

    /// Number of requests waiting on the current cycle.
    pub fn queued(&self) -> usize {
        self.lock().waiters.len()
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        // Queue updates are single assignments, so a poisoned queue is still consistent
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::LogNotifier;
    use crate::transport::{TransportError, TransportFuture};
    use reqwest::StatusCode;
    use session_auth::MemoryCredentialStore;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingNavigator {
        redirects: AtomicUsize,
    }

    impl Navigator for CountingNavigator {
        fn redirect_to_login(&self, _reason: &str) {
            self.redirects.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Refresh endpoint stub answering every call with the same result.
    struct RefreshStub {
        reply: std::result::Result<(u16, &'static str), TransportError>,
        calls: AtomicUsize,
    }

    impl Transport for RefreshStub {
        fn execute(&self, request: OutgoingRequest) -> TransportFuture<'_> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(request.method, Method::POST);
            let reply = self
                .reply
                .clone()
                .map(|(status, body)| ApiResponse::new(StatusCode::from_u16(status).unwrap(), body));
            Box::pin(async move { reply })
        }
    }

    struct Fixture {
        coordinator: RefreshCoordinator,
        store: Arc<MemoryCredentialStore>,
        navigator: Arc<CountingNavigator>,
        transport: Arc<RefreshStub>,
    }

    fn fixture(
        reply: std::result::Result<(u16, &'static str), TransportError>,
        credentials: Option<CredentialPair>,
    ) -> Fixture {
        let store = Arc::new(match credentials {
            Some(pair) => MemoryCredentialStore::with_credentials(pair),
            None => MemoryCredentialStore::new(),
        });
        let navigator = Arc::new(CountingNavigator::default());
        let transport = Arc::new(RefreshStub {
            reply,
            calls: AtomicUsize::new(0),
        });
        let coordinator = RefreshCoordinator::new(
            transport.clone(),
            store.clone(),
            navigator.clone(),
            Arc::new(LogNotifier),
            Url::parse("https://api.example.com/auth/refresh-token").unwrap(),
            Duration::from_secs(5),
        );
        Fixture {
            coordinator,
            store,
            navigator,
            transport,
        }
    }

    fn waiter(path: &str) -> Waiter {
        Waiter::new(RequestDescriptor::get(path)).0
    }

    #[test]
    fn first_enqueue_starts_cycle_later_ones_queue() {
        let f = fixture(Ok((200, "{}")), None);
        assert_eq!(f.coordinator.state(), RefreshState::Idle);

        let cycle = f.coordinator.enqueue(waiter("/a"));
        assert_eq!(cycle.map(|c| c.get()), Some(1));
        assert_eq!(f.coordinator.state(), RefreshState::Refreshing);

        assert_eq!(f.coordinator.enqueue(waiter("/b")), None);
        assert_eq!(f.coordinator.enqueue(waiter("/c")), None);
        assert_eq!(f.coordinator.queued(), 3);
    }

    #[test]
    fn complete_drains_in_arrival_order_and_goes_idle() {
        let f = fixture(Ok((200, "{}")), None);
        let cycle = f.coordinator.enqueue(waiter("/a")).unwrap();
        f.coordinator.enqueue(waiter("/b"));
        f.coordinator.enqueue(waiter("/c"));

        let drained: Vec<String> = f
            .coordinator
            .complete(cycle)
            .into_iter()
            .map(|w| w.descriptor.path)
            .collect();
        assert_eq!(drained, ["/a", "/b", "/c"]);
        assert_eq!(f.coordinator.state(), RefreshState::Idle);
        assert_eq!(f.coordinator.queued(), 0);

        // Next failure opens a new cycle
        assert_eq!(
            f.coordinator.enqueue(waiter("/d")).map(|c| c.get()),
            Some(2)
        );
    }

    #[tokio::test]
    async fn refresh_returns_new_pair() {
        let f = fixture(
            Ok((200, r#"{"accessToken":"at_2","refreshToken":"rt_2"}"#)),
            Some(CredentialPair::new("at_1", "rt_1")),
        );
        let pair = f.coordinator.refresh().await.unwrap();
        assert_eq!(pair.access(), "at_2");
        assert_eq!(pair.refresh(), "rt_2");
        assert_eq!(f.transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refresh_without_token_skips_network() {
        let f = fixture(Ok((200, "{}")), None);
        let err = f.coordinator.refresh().await.unwrap_err();
        assert!(err.is_terminal_for_session());
        assert_eq!(f.transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn refresh_failures_are_session_expired() {
        let replies = [
            Ok((401, r#"{"message":"refresh token revoked"}"#)),
            Ok((200, "not json")),
            Ok((200, r#"{"accessToken":"","refreshToken":"rt_2"}"#)),
            Err(TransportError::Connect("refused".into())),
        ];
        for reply in replies {
            let f = fixture(reply, Some(CredentialPair::new("at_1", "rt_1")));
            let err = f.coordinator.refresh().await.unwrap_err();
            assert!(matches!(err, ClientError::SessionExpired(_)), "got {err:?}");
        }
    }

    #[test]
    fn teardown_runs_once_per_cycle() {
        let f = fixture(Ok((200, "{}")), Some(CredentialPair::new("at_1", "rt_1")));
        let cycle = f.coordinator.enqueue(waiter("/a")).unwrap();

        assert!(f.coordinator.teardown(cycle, "refresh rejected"));
        assert!(!f.coordinator.teardown(cycle, "refresh rejected"));
        assert_eq!(f.navigator.redirects.load(Ordering::SeqCst), 1);
        assert!(f.store.credentials().is_none());

        // A later cycle may tear down again
        f.coordinator.complete(cycle);
        let next = f.coordinator.enqueue(waiter("/b")).unwrap();
        assert!(f.coordinator.teardown(next, "refresh rejected"));
        assert_eq!(f.navigator.redirects.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn teardown_skipped_once_session_replaced() {
        let f = fixture(Ok((200, "{}")), Some(CredentialPair::new("at_1", "rt_1")));
        let cycle = f.coordinator.enqueue(waiter("/a")).unwrap();

        f.coordinator.begin_session(CredentialPair::new("at_login", "rt_login"));
        assert!(!f.coordinator.teardown(cycle, "refresh rejected"));
        assert_eq!(f.navigator.redirects.load(Ordering::SeqCst), 0);
        assert_eq!(f.store.access_token().as_deref(), Some("at_login"));
    }

    #[tokio::test]
    async fn cycle_after_sign_out_keeps_store_empty() {
        let f = fixture(
            Ok((200, r#"{"accessToken":"at_2","refreshToken":"rt_2"}"#)),
            Some(CredentialPair::new("at_1", "rt_1")),
        );
        let (w, settled) = Waiter::new(RequestDescriptor::get("/a"));
        let cycle = f.coordinator.enqueue(w).unwrap();

        // Refresh reads the token before sign-out lands
        let refreshed = f.coordinator.refresh().await.unwrap();
        f.coordinator.end_session();
        let (current, waiters) = f.coordinator.close(cycle, Some(&refreshed));
        assert!(!current);
        assert_eq!(waiters.len(), 1);
        assert!(f.store.credentials().is_none());
        assert_eq!(f.coordinator.state(), RefreshState::Idle);
        drop(waiters);
        assert!(settled.await.is_err());

        // A cycle in the new session writes normally
        f.coordinator.begin_session(CredentialPair::new("at_3", "rt_3"));
        let cycle = f.coordinator.enqueue(waiter("/b")).unwrap();
        let (current, _) = f.coordinator.close(cycle, Some(&refreshed));
        assert!(current);
        assert_eq!(f.store.access_token().as_deref(), Some("at_2"));
    }

    /// Store whose writes always panic.
    struct PanickingStore;

    impl CredentialStore for PanickingStore {
        fn access_token(&self) -> Option<String> {
            Some("at_1".into())
        }

        fn refresh_token(&self) -> Option<String> {
            Some("rt_1".into())
        }

        fn set_credentials(&self, _pair: CredentialPair) {
            panic!("store unavailable");
        }

        fn clear(&self) {
            panic!("store unavailable");
        }
    }

    #[tokio::test]
    async fn aborted_cycle_rejects_queued_requests() {
        use futures_util::FutureExt;
        use std::panic::AssertUnwindSafe;

        let transport = Arc::new(RefreshStub {
            reply: Ok((200, r#"{"accessToken":"at_2","refreshToken":"rt_2"}"#)),
            calls: AtomicUsize::new(0),
        });
        let store: Arc<dyn CredentialStore> = Arc::new(PanickingStore);
        let coordinator = RefreshCoordinator::new(
            transport.clone(),
            store.clone(),
            Arc::new(CountingNavigator::default()),
            Arc::new(LogNotifier),
            Url::parse("https://api.example.com/auth/refresh-token").unwrap(),
            Duration::from_secs(5),
        );
        let pipeline = RequestPipeline::new(
            transport,
            store,
            "https://api.example.com",
            Duration::from_secs(5),
        );

        let (first, first_settled) = Waiter::new(RequestDescriptor::get("/a"));
        let (second, second_settled) = Waiter::new(RequestDescriptor::get("/b"));
        let cycle = coordinator.enqueue(first).unwrap();
        coordinator.enqueue(second);

        let outcome = AssertUnwindSafe(coordinator.run_cycle(cycle, &pipeline))
            .catch_unwind()
            .await;
        assert!(outcome.is_err());

        assert_eq!(coordinator.state(), RefreshState::Idle);
        assert_eq!(coordinator.queued(), 0);
        for settled in [first_settled, second_settled] {
            let err = settled.await.unwrap().unwrap_err();
            assert!(matches!(err, ClientError::SessionExpired(_)), "got {err:?}");
        }
    }

    #[test]
    fn settle_after_caller_dropped_is_silent() {
        let (w, settled) = Waiter::new(RequestDescriptor::get("/a"));
        drop(settled);
        w.settle(Err(ClientError::SessionExpired("x".into())));
    }
}
