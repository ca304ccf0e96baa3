//! OTEL metric exporter
//!
//! Defines a [MetricExporter] to send metric data to backend via OTLP protocol.
//!

use std::fmt::{Debug, Formatter};
use std::time::Duration;

use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::metrics::data::ResourceMetrics;
use opentelemetry_sdk::metrics::exporter::PushMetricExporter;

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
use crate::model::metrics::{ScopeMetrics, Temporality};
use crate::model::{ExportBatch, Resource};
use crate::transform::{write_metrics_data, Signal};
use crate::transmission::{BufferedTransmission, RetryMode, TransmissionHandler};
use crate::{exporter::HasExportConfig, ExporterBuildError, NoExporterBuilderSet};

/// Target to which the exporter is going to send metrics, defaults to https://localhost:4317/v1/metrics.
/// Learn about the relationship between this constant and default/spans/logs at
/// <https://github.com/open-telemetry/opentelemetry-specification/blob/main/specification/protocol/exporter.md#endpoint-urls-for-otlphttp>
pub const OTEL_EXPORTER_OTLP_METRICS_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_METRICS_ENDPOINT";
/// Max waiting time for the backend to process each metrics batch, defaults to 10s.
pub const OTEL_EXPORTER_OTLP_METRICS_TIMEOUT: &str = "OTEL_EXPORTER_OTLP_METRICS_TIMEOUT";
/// Key-value pairs to be used as headers associated with gRPC or HTTP requests
/// for sending metrics.
/// Example: `k1=v1,k2=v2`
pub const OTEL_EXPORTER_OTLP_METRICS_HEADERS: &str = "OTEL_EXPORTER_OTLP_METRICS_HEADERS";

/// A builder for creating a new [MetricExporter].
#[derive(Debug, Default)]
pub struct MetricExporterBuilder<C> {
    client: C,
    temporality: Temporality,
    retry_mode: RetryMode,
    limits: Option<SdkLimitOptions>,
}

impl MetricExporterBuilder<NoExporterBuilderSet> {
    /// Create a new [MetricExporterBuilder] with default settings.
    pub fn new() -> Self {
        MetricExporterBuilder::default()
    }

    /// With the gRPC Tonic transport.
    #[cfg(feature = "grpc-tonic")]
    pub fn with_tonic(self) -> MetricExporterBuilder<TonicExporterBuilderSet> {
        MetricExporterBuilder {
            client: TonicExporterBuilderSet(TonicExporterBuilder::default()),
            temporality: self.temporality,
            retry_mode: self.retry_mode,
            limits: self.limits,
        }
    }

    /// With the HTTP transport.
    #[cfg(feature = "http-proto")]
    pub fn with_http(self) -> MetricExporterBuilder<HttpExporterBuilderSet> {
        MetricExporterBuilder {
            client: HttpExporterBuilderSet(HttpExporterBuilder::default()),
            temporality: self.temporality,
            retry_mode: self.retry_mode,
            limits: self.limits,
        }
    }
}

impl<C> MetricExporterBuilder<C> {
    /// Set the temporality the exporter asks the SDK to aggregate with.
    pub fn with_temporality(mut self, temporality: Temporality) -> Self {
        self.temporality = temporality;
        self
    }

    /// Retry transient failures until the export timeout runs out.
    pub fn with_retry_policy(mut self, retry_mode: RetryMode) -> Self {
        self.retry_mode = retry_mode;
        self
    }

    /// Limits applied to data point, exemplar and scope attributes.
    pub fn with_limits(mut self, limits: SdkLimitOptions) -> Self {
        self.limits = Some(limits);
        self
    }
}

#[cfg(feature = "grpc-tonic")]
impl MetricExporterBuilder<TonicExporterBuilderSet> {
    /// Build the [MetricExporter] with the gRPC Tonic transport.
    pub fn build(self) -> Result<MetricExporter, ExporterBuildError> {
        let (client, timeout) = self.client.0.build_client(
            Signal::Metrics,
            OTEL_EXPORTER_OTLP_METRICS_ENDPOINT,
            OTEL_EXPORTER_OTLP_METRICS_TIMEOUT,
            OTEL_EXPORTER_OTLP_METRICS_HEADERS,
        )?;
        let exporter = MetricExporter::new(
            client,
            timeout,
            self.temporality,
            self.retry_mode,
            self.limits.unwrap_or_else(SdkLimitOptions::from_env),
        );
        opentelemetry::otel_debug!(name: "MetricExporterBuilt");
        Ok(exporter)
    }
}

#[cfg(feature = "http-proto")]
impl MetricExporterBuilder<HttpExporterBuilderSet> {
    /// Build the [MetricExporter] with the HTTP transport.
    pub fn build(self) -> Result<MetricExporter, ExporterBuildError> {
        let (client, timeout) = self.client.0.build_client(
            Signal::Metrics,
            OTEL_EXPORTER_OTLP_METRICS_ENDPOINT,
            OTEL_EXPORTER_OTLP_METRICS_TIMEOUT,
            OTEL_EXPORTER_OTLP_METRICS_HEADERS,
        )?;
        let exporter = MetricExporter::new(
            client,
            timeout,
            self.temporality,
            self.retry_mode,
            self.limits.unwrap_or_else(SdkLimitOptions::from_env),
        );
        opentelemetry::otel_debug!(name: "MetricExporterBuilt");
        Ok(exporter)
    }
}

#[cfg(feature = "grpc-tonic")]
impl HasExportConfig for MetricExporterBuilder<TonicExporterBuilderSet> {
    fn export_config(&mut self) -> &mut crate::ExportConfig {
        &mut self.client.0.exporter_config
    }
}

#[cfg(feature = "http-proto")]
impl HasExportConfig for MetricExporterBuilder<HttpExporterBuilderSet> {
    fn export_config(&mut self) -> &mut crate::ExportConfig {
        &mut self.client.0.exporter_config
    }
}

#[cfg(feature = "grpc-tonic")]
impl HasTonicConfig for MetricExporterBuilder<TonicExporterBuilderSet> {
    fn tonic_config(&mut self) -> &mut crate::TonicConfig {
        &mut self.client.0.tonic_config
    }
}

#[cfg(feature = "http-proto")]
impl HasHttpConfig for MetricExporterBuilder<HttpExporterBuilderSet> {
    fn http_client_config(&mut self) -> &mut crate::exporter::http::HttpConfig {
        &mut self.client.0.http_config
    }
}

/// Export metrics in OTEL format.
///
/// Implements [`PushMetricExporter`] so it can back a periodic reader.
/// Exports must run inside a Tokio runtime context.
pub struct MetricExporter {
    transmission: BufferedTransmission,
    resource: Resource,
    limits: SdkLimitOptions,
    temporality: Temporality,
}

impl Debug for MetricExporter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricExporter")
            .field("transmission", &self.transmission)
            .field("temporality", &self.temporality)
            .finish()
    }
}

impl MetricExporter {
    /// Obtain a builder to configure a [MetricExporter].
    pub fn builder() -> MetricExporterBuilder<NoExporterBuilderSet> {
        MetricExporterBuilder::default()
    }

    fn new(
        client: impl ExportClient + 'static,
        timeout: Duration,
        temporality: Temporality,
        retry_mode: RetryMode,
        limits: SdkLimitOptions,
    ) -> Self {
        MetricExporter {
            transmission: BufferedTransmission::new(TransmissionHandler::new(
                client,
                Signal::Metrics,
                timeout,
                retry_mode,
            )),
            resource: Resource::default(),
            limits,
            temporality,
        }
    }

    /// Serialize the metrics of every scope and send them in one request.
    pub async fn export(&self, metrics: &[ScopeMetrics]) -> OTelSdkResult {
        self.export_with_resource(&self.resource, metrics).await
    }

    async fn export_with_resource(
        &self,
        resource: &Resource,
        metrics: &[ScopeMetrics],
    ) -> OTelSdkResult {
        let limits = &self.limits;
        self.transmission
            .export(|buffer| {
                write_metrics_data(buffer, 0, limits, ExportBatch::new(resource, metrics))
            })
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

    /// The temporality the exporter was configured with.
    pub fn temporality(&self) -> Temporality {
        self.temporality
    }
}

impl PushMetricExporter for MetricExporter {
    async fn export(&self, metrics: &ResourceMetrics) -> OTelSdkResult {
        // The collected batch carries the provider's resource.
        let resource = Resource::from(metrics.resource());
        let scope_metrics: Vec<ScopeMetrics> =
            metrics.scope_metrics().map(ScopeMetrics::from).collect();
        self.export_with_resource(&resource, &scope_metrics).await
    }

    fn force_flush(&self) -> OTelSdkResult {
        Ok(())
    }

    fn shutdown_with_timeout(&self, _timeout: Duration) -> OTelSdkResult {
        self.transmission.shutdown()
    }

    fn temporality(&self) -> opentelemetry_sdk::metrics::Temporality {
        self.temporality.into()
    }
}
