//! Retry decisions for failed export attempts.
//!
//! Every function here is pure: the backoff window is passed in and the next
//! one handed back in the [`RetryResult`], and the clock can be injected
//! through the `_at` variants. The only source of nondeterminism is the
//! jitter applied when the server did not ask for a specific delay.

use std::time::{Duration, SystemTime};

use rand::Rng;

use crate::exporter::client::{
    ExportClientGrpcResponse, ExportClientHttpResponse, ExportClientResponse,
};
use crate::retry_classification::{self, RetryErrorType};

/// Backoff window a new export call starts with.
pub const INITIAL_BACKOFF_MILLISECONDS: u64 = 1000;
/// Largest backoff window.
pub const MAX_BACKOFF_MILLISECONDS: u64 = 5000;
const BACKOFF_MULTIPLIER: f64 = 1.5;

/// Outcome of a positive retry decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryResult {
    /// Whether `retry_delay` was requested by the server.
    pub throttled: bool,
    /// How long to wait before the next attempt. Callers must not wait past
    /// the overall deadline.
    pub retry_delay: Duration,
    /// Backoff window to pass into the next decision.
    pub next_retry_delay_milliseconds: u64,
}

/// Decide whether a failed gRPC attempt should be retried.
///
/// Returns `None` when the attempt must not be retried: its deadline has
/// passed, the status is not retryable, or waiting would overrun the deadline.
pub fn try_get_grpc_retry_result(
    response: &ExportClientGrpcResponse,
    retry_delay_milliseconds: u64,
) -> Option<RetryResult> {
    try_get_grpc_retry_result_at(response, retry_delay_milliseconds, SystemTime::now())
}

/// [`try_get_grpc_retry_result`] evaluated at `now`.
pub fn try_get_grpc_retry_result_at(
    response: &ExportClientGrpcResponse,
    retry_delay_milliseconds: u64,
    now: SystemTime,
) -> Option<RetryResult> {
    // A gRPC attempt always ends with a status; without one there is
    // nothing to classify.
    let status = response.status.as_ref()?;
    if response.deadline <= now {
        return None;
    }
    let classification = retry_classification::grpc::classify_tonic_status(status);
    retry_result(classification, response.deadline, retry_delay_milliseconds, now)
}

/// Decide whether a failed HTTP attempt should be retried.
pub fn try_get_http_retry_result(
    response: &ExportClientHttpResponse,
    retry_delay_milliseconds: u64,
) -> Option<RetryResult> {
    try_get_http_retry_result_at(response, retry_delay_milliseconds, SystemTime::now())
}

/// [`try_get_http_retry_result`] evaluated at `now`.
pub fn try_get_http_retry_result_at(
    response: &ExportClientHttpResponse,
    retry_delay_milliseconds: u64,
    now: SystemTime,
) -> Option<RetryResult> {
    if response.deadline <= now {
        return None;
    }
    let classification = retry_classification::http::classify_http_response(
        response.status,
        &response.headers,
        now,
    );
    retry_result(classification, response.deadline, retry_delay_milliseconds, now)
}

/// Decide whether a failed attempt of either protocol should be retried.
pub fn try_get_retry_result(
    response: &ExportClientResponse,
    retry_delay_milliseconds: u64,
) -> Option<RetryResult> {
    try_get_retry_result_at(response, retry_delay_milliseconds, SystemTime::now())
}

/// [`try_get_retry_result`] evaluated at `now`.
pub fn try_get_retry_result_at(
    response: &ExportClientResponse,
    retry_delay_milliseconds: u64,
    now: SystemTime,
) -> Option<RetryResult> {
    match response {
        ExportClientResponse::Grpc(response) => {
            try_get_grpc_retry_result_at(response, retry_delay_milliseconds, now)
        }
        ExportClientResponse::Http(response) => {
            try_get_http_retry_result_at(response, retry_delay_milliseconds, now)
        }
    }
}

fn retry_result(
    classification: RetryErrorType,
    deadline: SystemTime,
    retry_delay_milliseconds: u64,
    now: SystemTime,
) -> Option<RetryResult> {
    // An empty window would never grow again.
    let window = retry_delay_milliseconds.max(1);
    let (throttled, retry_delay) = match classification {
        RetryErrorType::NonRetryable => return None,
        RetryErrorType::Throttled(delay) => (true, delay),
        RetryErrorType::Retryable => (false, jitter(window)),
    };

    // An unrepresentable resume time is far past any deadline we could hit.
    if let Some(resume_at) = deadline.checked_add(retry_delay) {
        if resume_at <= now {
            return None;
        }
    }

    // A throttle shorter than a millisecond leaves the current window in place.
    let base = match u64::try_from(retry_delay.as_millis()) {
        _ if !throttled => window,
        Ok(0) => window,
        Ok(throttle_milliseconds) => throttle_milliseconds,
        Err(_) => MAX_BACKOFF_MILLISECONDS,
    };

    Some(RetryResult {
        throttled,
        retry_delay,
        next_retry_delay_milliseconds: next_retry_delay(base),
    })
}

/// Grow a backoff window by the multiplier, capped at the maximum. Halfway
/// values round to the even neighbour.
fn next_retry_delay(retry_delay_milliseconds: u64) -> u64 {
    let next = (retry_delay_milliseconds as f64 * BACKOFF_MULTIPLIER)
        .min(MAX_BACKOFF_MILLISECONDS as f64);
    let rounded = next.round();
    if rounded - next == 0.5 && rounded % 2.0 != 0.0 {
        (rounded - 1.0) as u64
    } else {
        rounded as u64
    }
}

/// Full jitter: uniformly random in `[0, window)`.
fn jitter(retry_delay_milliseconds: u64) -> Duration {
    if retry_delay_milliseconds == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..retry_delay_milliseconds))
}
