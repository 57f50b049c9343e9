//! Client metrics
//!
//! Recorded through the `metrics` facade; the embedding application decides
//! whether a recorder is installed. Without one every call is a no-op.
//!
//! - `session_requests_total` (counter): label `outcome` (`ok` or error kind)
//! - `session_refresh_total` (counter): label `outcome` (`success`/`failure`)
//! - `session_refresh_waiters_total` (counter): requests drained per cycle
//! - `session_replays_total` (counter): label `outcome`

/// Label value for a request that settled successfully.
const OUTCOME_OK: &str = "ok";

fn outcome_label<T>(result: &Result<T, crate::ClientError>) -> &'static str {
    match result {
        Ok(_) => OUTCOME_OK,
        Err(e) => e.kind().label(),
    }
}

/// Record a settled top-level `send`.
pub fn record_request<T>(result: &Result<T, crate::ClientError>) {
    metrics::counter!("session_requests_total", "outcome" => outcome_label(result)).increment(1);
}

/// Record the end of a refresh cycle and how many requests it settled.
pub fn record_refresh(success: bool, waiters: usize) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!("session_refresh_total", "outcome" => outcome).increment(1);
    metrics::counter!("session_refresh_waiters_total").increment(waiters as u64);
}

/// Record one replayed request.
pub fn record_replay<T>(result: &Result<T, crate::ClientError>) {
    metrics::counter!("session_replays_total", "outcome" => outcome_label(result)).increment(1);
}
