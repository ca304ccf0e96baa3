//! # OpenTelemetry OTLP Transmission
//!
//! Serializes telemetry batches straight into OTLP protobuf bytes and delivers
//! them to a collector over gRPC or HTTP, retrying transient failures with
//! exponential backoff and honouring server throttling hints.
//!
//! ## Exporting
//!
//! Each signal has its own exporter, configured through a builder that first
//! picks the transport:
//!
//! ```no_run
//! # #[cfg(feature = "grpc-tonic")]
//! # {
//! use opentelemetry_otlp_transmission::model::{KeyValue, Resource};
//! use opentelemetry_otlp_transmission::{RetryMode, SpanExporter, WithExportConfig};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut exporter = SpanExporter::builder()
//!     .with_tonic()
//!     .with_endpoint("http://localhost:4317")
//!     .with_timeout(Duration::from_secs(5))
//!     .with_retry_policy(RetryMode::Retry)
//!     .build()?;
//! exporter.set_resource(&Resource::new([KeyValue::new("service.name", "checkout")]));
//!
//! exporter.export(&[]).await?;
//! exporter.shutdown()?;
//! # Ok(())
//! # }
//! # }
//! ```
//!
//! ## Use with the SDK
//!
//! [`SpanExporter`], [`LogExporter`] and [`MetricExporter`] also implement
//! the `opentelemetry_sdk` exporter traits, converting the SDK's records
//! before writing them. The exporters drive their I/O and backoff with Tokio,
//! so the processor calling them has to run inside a Tokio runtime context.
//!
//! ## Retries
//!
//! With [`RetryMode::Retry`] a failed attempt is repeated while the response
//! is transient (gRPC `Cancelled`, `DeadlineExceeded`, `Aborted`,
//! `OutOfRange`, `DataLoss`, `Unavailable`, `ResourceExhausted` when the
//! server sent a retry delay, or HTTP 408, 429, 502, 503, 504) and the export
//! timeout has not run out. Each wait is drawn at random below a backoff
//! window that starts at one second, grows by half after every retry and is
//! capped at five seconds. A throttling delay sent by the server replaces the
//! random wait. The decision logic is available on its own in [`retry`].
//!
//! ## Configuration
//!
//! Values set on the builders win over environment variables. The supported
//! variables are:
//!
//! | Variable | Default |
//! |----------|---------|
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | `http://localhost:4317` (gRPC), `http://localhost:4318` (HTTP) |
//! | `OTEL_EXPORTER_OTLP_{TRACES,METRICS,LOGS}_ENDPOINT` | |
//! | `OTEL_EXPORTER_OTLP_HEADERS` | |
//! | `OTEL_EXPORTER_OTLP_{TRACES,METRICS,LOGS}_HEADERS` | |
//! | `OTEL_EXPORTER_OTLP_TIMEOUT` | 10000 ms |
//! | `OTEL_EXPORTER_OTLP_{TRACES,METRICS,LOGS}_TIMEOUT` | |
//! | `OTEL_EXPORTER_OTLP_PROTOCOL` | `http/protobuf` |
//!
//! Attribute limits are read from the `OTEL_*_LIMIT` variables, see
//! [`SdkLimitOptions::from_env`].
//!
//! ## Feature Flags
//!
//! * `grpc-tonic`: export over gRPC with `tonic`.
//! * `http-proto`: export protobuf over HTTP through an [`HttpClient`].
//! * `reqwest-client`: implement [`HttpClient`] for `reqwest::Client` and use
//!   it by default.
//! * `internal-logs`: emit the crate's internal diagnostics through `tracing`.
//!
//! All of them are enabled by default.
#![cfg_attr(
    docsrs,
    feature(doc_cfg, doc_auto_cfg),
    deny(rustdoc::broken_intra_doc_links)
)]

mod exporter;
pub mod limits;
mod logs;
mod metric;
pub mod model;
pub mod retry;
pub mod retry_classification;
mod span;
pub mod transform;
mod transmission;

pub use crate::exporter::client::{
    ExportClient, ExportClientGrpcResponse, ExportClientHttpResponse, ExportClientResponse,
};
pub use crate::exporter::ExportConfig;
pub use crate::exporter::ExporterBuildError;
pub use crate::limits::SdkLimitOptions;
pub use crate::logs::{
    LogExporter, LogExporterBuilder, OTEL_EXPORTER_OTLP_LOGS_ENDPOINT,
    OTEL_EXPORTER_OTLP_LOGS_HEADERS, OTEL_EXPORTER_OTLP_LOGS_TIMEOUT,
};
pub use crate::metric::{
    MetricExporter, MetricExporterBuilder, OTEL_EXPORTER_OTLP_METRICS_ENDPOINT,
    OTEL_EXPORTER_OTLP_METRICS_HEADERS, OTEL_EXPORTER_OTLP_METRICS_TIMEOUT,
};
pub use crate::span::{
    SpanExporter, SpanExporterBuilder, OTEL_EXPORTER_OTLP_TRACES_ENDPOINT,
    OTEL_EXPORTER_OTLP_TRACES_HEADERS, OTEL_EXPORTER_OTLP_TRACES_TIMEOUT,
};
pub use crate::transform::{SerializationError, Signal};
pub use crate::transmission::{RetryMode, TransmissionHandler};

#[cfg(feature = "grpc-tonic")]
pub use crate::exporter::tonic::{
    HasTonicConfig, TonicConfig, TonicExportClient, TonicExporterBuilder, WithTonicConfig,
};

#[cfg(feature = "http-proto")]
pub use crate::exporter::http::{
    HasHttpConfig, HttpClient, HttpConfig, HttpError, HttpExporterBuilder, OtlpHttpClient,
    WithHttpConfig,
};

pub use crate::exporter::{
    HasExportConfig, WithExportConfig, OTEL_EXPORTER_OTLP_ENDPOINT,
    OTEL_EXPORTER_OTLP_ENDPOINT_DEFAULT, OTEL_EXPORTER_OTLP_HEADERS, OTEL_EXPORTER_OTLP_PROTOCOL,
    OTEL_EXPORTER_OTLP_PROTOCOL_GRPC, OTEL_EXPORTER_OTLP_PROTOCOL_HTTP_PROTOBUF,
    OTEL_EXPORTER_OTLP_TIMEOUT, OTEL_EXPORTER_OTLP_TIMEOUT_DEFAULT,
};

/// Type to indicate the builder does not have a client set.
#[derive(Debug, Default, Clone)]
pub struct NoExporterBuilderSet;

/// Type to hold the [TonicExporterBuilder] and indicate it has been set.
///
/// Allowing access to [TonicExporterBuilder] specific configuration methods.
#[cfg(feature = "grpc-tonic")]
#[derive(Debug)]
pub struct TonicExporterBuilderSet(TonicExporterBuilder);

/// Type to hold the [HttpExporterBuilder] and indicate it has been set.
///
/// Allowing access to [HttpExporterBuilder] specific configuration methods.
#[cfg(feature = "http-proto")]
#[derive(Debug)]
pub struct HttpExporterBuilderSet(HttpExporterBuilder);

/// The communication protocol to use when exporting data.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Protocol {
    /// GRPC protocol
    Grpc,
    /// HTTP protocol with binary protobuf
    HttpBinary,
}

impl Protocol {
    /// The protocol named by `OTEL_EXPORTER_OTLP_PROTOCOL`, if it is one this
    /// crate can speak.
    pub fn from_env() -> Option<Self> {
        match std::env::var(OTEL_EXPORTER_OTLP_PROTOCOL).ok()?.trim() {
            OTEL_EXPORTER_OTLP_PROTOCOL_GRPC => Some(Protocol::Grpc),
            OTEL_EXPORTER_OTLP_PROTOCOL_HTTP_PROTOBUF => Some(Protocol::HttpBinary),
            other => {
                opentelemetry::otel_warn!(
                    name: "Protocol.UnsupportedValue",
                    protocol = other
                );
                None
            }
        }
    }
}
