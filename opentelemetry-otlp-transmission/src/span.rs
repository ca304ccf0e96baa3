//! # OTLP - Span Exporter
//!
//! Defines a [SpanExporter] to send trace data via the OpenTelemetry Protocol (OTLP)

use std::time::Duration;

use opentelemetry_sdk::error::OTelSdkResult;

#[cfg(feature = "grpc-tonic")]
use crate::{
    exporter::tonic::{HasTonicConfig, TonicExporterBuilder},
    TonicExporterBuilderSet,
};

#[cfg(feature = "http-proto")]
use crate::{
    exporter::http::{HasHttpConfig, HttpExporterBuilder},
    HttpExporterBuilderSet,
};

use crate::exporter::client::ExportClient;
use crate::limits::SdkLimitOptions;
use crate::model::trace::SpanData;
use crate::model::{ExportBatch, Resource};
use crate::transform::{write_traces_data, Signal};
use crate::transmission::{BufferedTransmission, RetryMode, TransmissionHandler};
use crate::{exporter::HasExportConfig, ExporterBuildError, NoExporterBuilderSet};

/// Target to which the exporter is going to send spans, defaults to https://localhost:4317/v1/traces.
/// Learn about the relationship between this constant and default/metrics/logs at
/// <https://github.com/open-telemetry/opentelemetry-specification/blob/main/specification/protocol/exporter.md#endpoint-urls-for-otlphttp>
pub const OTEL_EXPORTER_OTLP_TRACES_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_TRACES_ENDPOINT";
/// Max waiting time for the backend to process each spans batch, defaults to 10s.
pub const OTEL_EXPORTER_OTLP_TRACES_TIMEOUT: &str = "OTEL_EXPORTER_OTLP_TRACES_TIMEOUT";
/// Key-value pairs to be used as headers associated with gRPC or HTTP requests
/// for sending spans.
/// Example: `k1=v1,k2=v2`
pub const OTEL_EXPORTER_OTLP_TRACES_HEADERS: &str = "OTEL_EXPORTER_OTLP_TRACES_HEADERS";

/// Builder for [SpanExporter].
///
/// The transport is picked with `with_tonic` or `with_http`, after which the
/// transport specific configuration traits become available.
#[derive(Debug, Default)]
pub struct SpanExporterBuilder<C> {
    client: C,
    retry_mode: RetryMode,
    limits: Option<SdkLimitOptions>,
}

impl SpanExporterBuilder<NoExporterBuilderSet> {
    /// Create a new [SpanExporterBuilder] with default settings.
    pub fn new() -> Self {
        SpanExporterBuilder::default()
    }

    /// With the gRPC Tonic transport.
    #[cfg(feature = "grpc-tonic")]
    pub fn with_tonic(self) -> SpanExporterBuilder<TonicExporterBuilderSet> {
        SpanExporterBuilder {
            client: TonicExporterBuilderSet(TonicExporterBuilder::default()),
            retry_mode: self.retry_mode,
            limits: self.limits,
        }
    }

    /// With the HTTP transport.
    #[cfg(feature = "http-proto")]
    pub fn with_http(self) -> SpanExporterBuilder<HttpExporterBuilderSet> {
        SpanExporterBuilder {
            client: HttpExporterBuilderSet(HttpExporterBuilder::default()),
            retry_mode: self.retry_mode,
            limits: self.limits,
        }
    }
}

impl<C> SpanExporterBuilder<C> {
    /// Retry transient failures until the export timeout runs out.
    pub fn with_retry_policy(mut self, retry_mode: RetryMode) -> Self {
        self.retry_mode = retry_mode;
        self
    }

    /// Limits applied while serializing spans. Read from the environment when
    /// not set.
    pub fn with_limits(mut self, limits: SdkLimitOptions) -> Self {
        self.limits = Some(limits);
        self
    }
}

#[cfg(feature = "grpc-tonic")]
impl SpanExporterBuilder<TonicExporterBuilderSet> {
    /// Build the [SpanExporter] with the gRPC Tonic transport.
    pub fn build(self) -> Result<SpanExporter, ExporterBuildError> {
        let (client, timeout) = self.client.0.build_client(
            Signal::Traces,
            OTEL_EXPORTER_OTLP_TRACES_ENDPOINT,
            OTEL_EXPORTER_OTLP_TRACES_TIMEOUT,
            OTEL_EXPORTER_OTLP_TRACES_HEADERS,
        )?;
        let exporter = SpanExporter::new(
            client,
            timeout,
            self.retry_mode,
            self.limits.unwrap_or_else(SdkLimitOptions::from_env),
        );
        opentelemetry::otel_debug!(name: "SpanExporterBuilt");
        Ok(exporter)
    }
}

#[cfg(feature = "http-proto")]
impl SpanExporterBuilder<HttpExporterBuilderSet> {
    /// Build the [SpanExporter] with the HTTP transport.
    pub fn build(self) -> Result<SpanExporter, ExporterBuildError> {
        let (client, timeout) = self.client.0.build_client(
            Signal::Traces,
            OTEL_EXPORTER_OTLP_TRACES_ENDPOINT,
            OTEL_EXPORTER_OTLP_TRACES_TIMEOUT,
            OTEL_EXPORTER_OTLP_TRACES_HEADERS,
        )?;
        let exporter = SpanExporter::new(
            client,
            timeout,
            self.retry_mode,
            self.limits.unwrap_or_else(SdkLimitOptions::from_env),
        );
        opentelemetry::otel_debug!(name: "SpanExporterBuilt");
        Ok(exporter)
    }
}

#[cfg(feature = "grpc-tonic")]
impl HasExportConfig for SpanExporterBuilder<TonicExporterBuilderSet> {
    fn export_config(&mut self) -> &mut crate::ExportConfig {
        &mut self.client.0.exporter_config
    }
}

#[cfg(feature = "http-proto")]
impl HasExportConfig for SpanExporterBuilder<HttpExporterBuilderSet> {
    fn export_config(&mut self) -> &mut crate::ExportConfig {
        &mut self.client.0.exporter_config
    }
}

#[cfg(feature = "grpc-tonic")]
impl HasTonicConfig for SpanExporterBuilder<TonicExporterBuilderSet> {
    fn tonic_config(&mut self) -> &mut crate::TonicConfig {
        &mut self.client.0.tonic_config
    }
}

#[cfg(feature = "http-proto")]
impl HasHttpConfig for SpanExporterBuilder<HttpExporterBuilderSet> {
    fn http_client_config(&mut self) -> &mut crate::exporter::http::HttpConfig {
        &mut self.client.0.http_config
    }
}

/// OTLP exporter that sends tracing data
///
/// Besides its own [`SpanExporter::export`], it implements
/// [`opentelemetry_sdk::trace::SpanExporter`] so it can be installed on an
/// `SdkTracerProvider`. Exports must run inside a Tokio runtime context.
#[derive(Debug)]
pub struct SpanExporter {
    transmission: BufferedTransmission,
    resource: Resource,
    limits: SdkLimitOptions,
}

impl SpanExporter {
    /// Obtain a builder to configure a [SpanExporter].
    pub fn builder() -> SpanExporterBuilder<NoExporterBuilderSet> {
        SpanExporterBuilder::default()
    }

    fn new(
        client: impl ExportClient + 'static,
        timeout: Duration,
        retry_mode: RetryMode,
        limits: SdkLimitOptions,
    ) -> Self {
        SpanExporter {
            transmission: BufferedTransmission::new(TransmissionHandler::new(
                client,
                Signal::Traces,
                timeout,
                retry_mode,
            )),
            resource: Resource::default(),
            limits,
        }
    }

    /// Serialize `batch` and send it to the collector.
    pub async fn export(&self, batch: &[SpanData]) -> OTelSdkResult {
        let resource = &self.resource;
        let limits = &self.limits;
        self.transmission
            .export(|buffer| write_traces_data(buffer, 0, limits, ExportBatch::new(resource, batch)))
            .await
    }

    /// Set the resource attached to every exported batch.
    pub fn set_resource(&mut self, resource: &Resource) {
        self.resource = resource.clone();
    }

    /// Abort pending exports and reject new ones.
    pub fn shutdown(&self) -> OTelSdkResult {
        self.transmission.shutdown()
    }

    /// The overall time budget of one export.
    pub fn timeout(&self) -> Duration {
        self.transmission.handler().timeout()
    }
}

impl opentelemetry_sdk::trace::SpanExporter for SpanExporter {
    async fn export(&self, batch: Vec<opentelemetry_sdk::trace::SpanData>) -> OTelSdkResult {
        let spans: Vec<SpanData> = batch.into_iter().map(SpanData::from).collect();
        SpanExporter::export(self, &spans).await
    }

    fn shutdown_with_timeout(&mut self, _timeout: Duration) -> OTelSdkResult {
        self.transmission.shutdown()
    }

    fn set_resource(&mut self, resource: &opentelemetry_sdk::Resource) {
        self.resource = resource.into();
    }
}
