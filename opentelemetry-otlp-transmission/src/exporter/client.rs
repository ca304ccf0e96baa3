//! The single attempt contract shared by the gRPC and HTTP transports.
//!
//! An [`ExportClient`] sends one serialized payload once. Transport failures
//! are captured in the returned [`ExportClientResponse`] so the retry logic
//! can classify them; only misuse of the client (such as calling it after
//! shutdown) surfaces as an error.

use std::fmt::{self, Debug, Display};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use opentelemetry_sdk::error::{OTelSdkError, OTelSdkResult};
use tokio_util::sync::CancellationToken;

/// Outcome of one gRPC export attempt.
#[derive(Debug, Clone)]
pub struct ExportClientGrpcResponse {
    /// Whether the collector accepted the payload.
    pub success: bool,
    /// Deadline the attempt ran under.
    pub deadline: SystemTime,
    /// Status of a failed call, including any `grpc-status-details-bin`
    /// details the server attached.
    pub status: Option<tonic::Status>,
}

impl ExportClientGrpcResponse {
    /// An accepted payload.
    pub fn succeeded(deadline: SystemTime) -> Self {
        ExportClientGrpcResponse {
            success: true,
            deadline,
            status: None,
        }
    }

    /// A call that ended with `status`.
    pub fn failure(deadline: SystemTime, status: tonic::Status) -> Self {
        ExportClientGrpcResponse {
            success: false,
            deadline,
            status: Some(status),
        }
    }
}

/// Outcome of one HTTP export attempt.
#[derive(Debug, Clone)]
pub struct ExportClientHttpResponse {
    /// Whether the collector answered with a 2xx status.
    pub success: bool,
    /// Deadline the attempt ran under.
    pub deadline: SystemTime,
    /// Response status. `None` when no response was received.
    pub status: Option<StatusCode>,
    /// Response headers, empty when no response was received.
    pub headers: HeaderMap,
    /// Transport error that prevented a response.
    pub error: Option<String>,
}

impl ExportClientHttpResponse {
    /// A response received from the collector, successful or not.
    pub fn from_response(deadline: SystemTime, status: StatusCode, headers: HeaderMap) -> Self {
        ExportClientHttpResponse {
            success: status.is_success(),
            deadline,
            status: Some(status),
            headers,
            error: None,
        }
    }

    /// A request that failed before any response arrived.
    pub fn from_error(deadline: SystemTime, error: impl Display) -> Self {
        ExportClientHttpResponse {
            success: false,
            deadline,
            status: None,
            headers: HeaderMap::new(),
            error: Some(error.to_string()),
        }
    }
}

/// Response of either transport.
#[derive(Debug, Clone)]
pub enum ExportClientResponse {
    /// Sent with gRPC.
    Grpc(ExportClientGrpcResponse),
    /// Sent with HTTP.
    Http(ExportClientHttpResponse),
}

impl ExportClientResponse {
    /// Whether the collector accepted the payload.
    pub fn success(&self) -> bool {
        match self {
            ExportClientResponse::Grpc(response) => response.success,
            ExportClientResponse::Http(response) => response.success,
        }
    }

    /// Deadline the attempt ran under.
    pub fn deadline(&self) -> SystemTime {
        match self {
            ExportClientResponse::Grpc(response) => response.deadline,
            ExportClientResponse::Http(response) => response.deadline,
        }
    }
}

impl From<ExportClientGrpcResponse> for ExportClientResponse {
    fn from(response: ExportClientGrpcResponse) -> Self {
        ExportClientResponse::Grpc(response)
    }
}

impl From<ExportClientHttpResponse> for ExportClientResponse {
    fn from(response: ExportClientHttpResponse) -> Self {
        ExportClientResponse::Http(response)
    }
}

impl Display for ExportClientResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportClientResponse::Grpc(ExportClientGrpcResponse {
                status: Some(status),
                ..
            }) => write!(
                f,
                "grpc status {:?}: {}",
                status.code(),
                status.message()
            ),
            ExportClientResponse::Grpc(response) if response.success => f.write_str("grpc ok"),
            ExportClientResponse::Grpc(_) => f.write_str("grpc call without status"),
            ExportClientResponse::Http(ExportClientHttpResponse {
                error: Some(error),
                ..
            }) => write!(f, "http request failed: {error}"),
            ExportClientResponse::Http(ExportClientHttpResponse {
                status: Some(status),
                ..
            }) => write!(f, "http status {}", status.as_u16()),
            ExportClientResponse::Http(_) => f.write_str("http request without response"),
        }
    }
}

/// Sends one serialized payload to a collector.
///
/// Implementations must be safe to call repeatedly with the same payload.
#[async_trait]
pub trait ExportClient: Debug + Send + Sync {
    /// Make one attempt to deliver `body` before `deadline`.
    ///
    /// The attempt is abandoned as soon as `cancellation` fires. Returns
    /// [`OTelSdkError::AlreadyShutdown`] once [`ExportClient::shutdown`] has
    /// been called.
    async fn send_export_request(
        &self,
        body: Bytes,
        deadline: SystemTime,
        cancellation: &CancellationToken,
    ) -> Result<ExportClientResponse, OTelSdkError>;

    /// Abort any in-flight attempt and reject further ones.
    fn shutdown(&self) -> OTelSdkResult;
}

/// Time budget of an attempt: the configured timeout, cut short by the
/// deadline.
pub(crate) fn attempt_timeout(timeout: Duration, deadline: SystemTime) -> Duration {
    deadline
        .duration_since(SystemTime::now())
        .unwrap_or(Duration::ZERO)
        .min(timeout)
}

/// Shutdown bookkeeping shared by the transport clients.
#[derive(Debug, Default)]
pub(crate) struct ShutdownGuard {
    token: CancellationToken,
}

impl ShutdownGuard {
    pub(crate) fn check(&self) -> OTelSdkResult {
        if self.token.is_cancelled() {
            Err(OTelSdkError::AlreadyShutdown)
        } else {
            Ok(())
        }
    }

    pub(crate) fn shutdown(&self) -> OTelSdkResult {
        self.check()?;
        self.token.cancel();
        Ok(())
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}
