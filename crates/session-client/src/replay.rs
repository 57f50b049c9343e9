//! Settling queued requests once a refresh cycle ends
//!
//! After a successful refresh every waiter is re-sent exactly once with the
//! new access token. Replays are submitted in queue order and run
//! concurrently; each waiter gets its own outcome, so one failed replay never
//! affects another. A replay that is rejected again surfaces `AuthExpired`
//! and does not start another refresh.

use std::collections::VecDeque;

use futures_util::future::join_all;
use session_auth::CredentialPair;
use tracing::debug;

use crate::coordinator::Waiter;
use crate::descriptor::Attempt;
use crate::error::ClientError;
use crate::metrics;
use crate::pipeline::RequestPipeline;

/// Replay every waiter with the refreshed credential.
///
/// `join_all` polls its futures in order on the first pass and each dispatch
/// hands its request to the transport before its first await, so submission
/// order matches queue order.
pub async fn on_refresh_resolved(
    pipeline: &RequestPipeline,
    credential: &CredentialPair,
    waiters: VecDeque<Waiter>,
) {
    let replays = waiters.into_iter().map(|waiter| async move {
        let outcome = pipeline
            .dispatch(&waiter.descriptor, Some(credential.access()), Attempt::Replay)
            .await;
        debug!(
            request_id = %waiter.descriptor.request_id,
            ok = outcome.is_ok(),
            "replay settled"
        );
        metrics::record_replay(&outcome);
        waiter.settle(outcome);
    });
    join_all(replays).await;
}

/// Reject every waiter with the refresh failure, in queue order.
pub fn on_refresh_rejected(error: &ClientError, waiters: VecDeque<Waiter>) {
    for waiter in waiters {
        waiter.settle(Err(error.clone()));
    }
}
