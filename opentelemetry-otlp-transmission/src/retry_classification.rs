//! Error classification for OTLP exporters with protocol-specific throttling support.
//!
//! Maps a failed gRPC status or HTTP response onto [`RetryErrorType`], reading
//! server-provided throttling hints from the gRPC `RetryInfo` status detail or
//! the HTTP `Retry-After` header.

use std::time::Duration;

/// How a failed export attempt should be handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryErrorType {
    /// Transient failure, retry with the computed backoff.
    Retryable,
    /// Permanent failure, give up.
    NonRetryable,
    /// The server asked to wait this long before the next attempt.
    Throttled(Duration),
}

/// HTTP-specific error classification with Retry-After header support.
pub mod http {
    use std::time::SystemTime;

    use ::http::header::RETRY_AFTER;
    use ::http::{HeaderMap, StatusCode};

    use super::*;

    /// Whether an HTTP status code denotes a transient failure.
    pub fn is_retryable_status(status: StatusCode) -> bool {
        matches!(
            status,
            StatusCode::REQUEST_TIMEOUT
                | StatusCode::TOO_MANY_REQUESTS
                | StatusCode::BAD_GATEWAY
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::GATEWAY_TIMEOUT
        )
    }

    /// Classifies an HTTP response.
    ///
    /// A missing status means the request failed before any response was
    /// received, which is always retryable. `Retry-After` is only honoured
    /// on `429 Too Many Requests` and `503 Service Unavailable`.
    pub fn classify_http_response(
        status: Option<StatusCode>,
        headers: &HeaderMap,
        now: SystemTime,
    ) -> RetryErrorType {
        let Some(status) = status else {
            return RetryErrorType::Retryable;
        };
        if !is_retryable_status(status) {
            return RetryErrorType::NonRetryable;
        }
        if matches!(
            status,
            StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE
        ) {
            if let Some(delay) = retry_after(headers, now) {
                return RetryErrorType::Throttled(delay);
            }
        }
        RetryErrorType::Retryable
    }

    /// Reads the `Retry-After` header.
    ///
    /// Supports both formats:
    /// - Delay seconds: "120"
    /// - HTTP date: "Fri, 31 Dec 1999 23:59:59 GMT", relative to `now`.
    ///   Dates in the past yield a zero delay.
    pub fn retry_after(headers: &HeaderMap, now: SystemTime) -> Option<Duration> {
        let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
        if let Ok(seconds) = value.parse::<u64>() {
            return Some(Duration::from_secs(seconds));
        }
        let date = httpdate::parse_http_date(value).ok()?;
        Some(date.duration_since(now).unwrap_or(Duration::ZERO))
    }
}

/// gRPC-specific error classification with RetryInfo support.
pub mod grpc {
    use tonic::{Code, Status};
    use tonic_types::StatusExt;

    use super::*;

    /// Whether a gRPC status code denotes a transient failure regardless of
    /// any throttling hint.
    pub fn is_retryable_code(code: Code) -> bool {
        matches!(
            code,
            Code::Cancelled
                | Code::DeadlineExceeded
                | Code::Aborted
                | Code::OutOfRange
                | Code::Unavailable
                | Code::DataLoss
        )
    }

    /// Extracts the server requested delay from the `RetryInfo` status
    /// detail. Only `ResourceExhausted` and `Unavailable` carry one.
    pub fn throttle_delay(status: &Status) -> Option<Duration> {
        match status.code() {
            Code::ResourceExhausted | Code::Unavailable => status
                .get_details_retry_info()
                .and_then(|retry_info| retry_info.retry_delay),
            _ => None,
        }
    }

    /// Classifies a tonic::Status error
    ///
    /// Implements the OpenTelemetry OTLP specification for error handling:
    /// https://github.com/open-telemetry/opentelemetry-proto/blob/main/docs/specification.md#failures
    pub fn classify_tonic_status(status: &Status) -> RetryErrorType {
        match (status.code(), throttle_delay(status)) {
            // RESOURCE_EXHAUSTED is retryable only if the server signals
            // that recovery is possible.
            (Code::ResourceExhausted, Some(delay)) => RetryErrorType::Throttled(delay),
            (Code::ResourceExhausted, None) => RetryErrorType::NonRetryable,
            (Code::Unavailable, Some(delay)) => RetryErrorType::Throttled(delay),
            (code, _) if is_retryable_code(code) => RetryErrorType::Retryable,
            _ => RetryErrorType::NonRetryable,
        }
    }
}
