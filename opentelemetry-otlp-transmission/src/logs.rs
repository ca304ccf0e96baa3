//! OTLP - Log Exporter
//!
//! Defines a [LogExporter] to send logs via the OpenTelemetry Protocol (OTLP)

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
use crate::model::logs::LogRecord;
use crate::model::{ExportBatch, Resource};
use crate::transform::{write_logs_data, Signal};
use crate::transmission::{BufferedTransmission, RetryMode, TransmissionHandler};
use crate::{exporter::HasExportConfig, ExporterBuildError, NoExporterBuilderSet};

/// Target to which the exporter is going to send logs
pub const OTEL_EXPORTER_OTLP_LOGS_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_LOGS_ENDPOINT";

/// Maximum time the OTLP exporter will wait for each batch logs export.
pub const OTEL_EXPORTER_OTLP_LOGS_TIMEOUT: &str = "OTEL_EXPORTER_OTLP_LOGS_TIMEOUT";

/// Key-value pairs to be used as headers associated with gRPC or HTTP requests
/// for sending logs.
/// Example: `k1=v1,k2=v2`
pub const OTEL_EXPORTER_OTLP_LOGS_HEADERS: &str = "OTEL_EXPORTER_OTLP_LOGS_HEADERS";

/// Builder for [LogExporter].
#[derive(Debug, Default)]
pub struct LogExporterBuilder<C> {
    client: C,
    retry_mode: RetryMode,
    limits: Option<SdkLimitOptions>,
}

impl LogExporterBuilder<NoExporterBuilderSet> {
    /// Create a new [LogExporterBuilder] with default settings.
    pub fn new() -> Self {
        LogExporterBuilder::default()
    }

    /// With the gRPC Tonic transport.
    #[cfg(feature = "grpc-tonic")]
    pub fn with_tonic(self) -> LogExporterBuilder<TonicExporterBuilderSet> {
        LogExporterBuilder {
            client: TonicExporterBuilderSet(TonicExporterBuilder::default()),
            retry_mode: self.retry_mode,
            limits: self.limits,
        }
    }

    /// With the HTTP transport.
    #[cfg(feature = "http-proto")]
    pub fn with_http(self) -> LogExporterBuilder<HttpExporterBuilderSet> {
        LogExporterBuilder {
            client: HttpExporterBuilderSet(HttpExporterBuilder::default()),
            retry_mode: self.retry_mode,
            limits: self.limits,
        }
    }
}

impl<C> LogExporterBuilder<C> {
    /// Retry transient failures until the export timeout runs out.
    pub fn with_retry_policy(mut self, retry_mode: RetryMode) -> Self {
        self.retry_mode = retry_mode;
        self
    }

    /// Limits applied to log record attributes.
    pub fn with_limits(mut self, limits: SdkLimitOptions) -> Self {
        self.limits = Some(limits);
        self
    }
}

#[cfg(feature = "grpc-tonic")]
impl LogExporterBuilder<TonicExporterBuilderSet> {
    /// Build the [LogExporter] with the gRPC Tonic transport.
    pub fn build(self) -> Result<LogExporter, ExporterBuildError> {
        let (client, timeout) = self.client.0.build_client(
            Signal::Logs,
            OTEL_EXPORTER_OTLP_LOGS_ENDPOINT,
            OTEL_EXPORTER_OTLP_LOGS_TIMEOUT,
            OTEL_EXPORTER_OTLP_LOGS_HEADERS,
        )?;
        Ok(LogExporter::new(
            client,
            timeout,
            self.retry_mode,
            self.limits.unwrap_or_else(SdkLimitOptions::from_env),
        ))
    }
}

#[cfg(feature = "http-proto")]
impl LogExporterBuilder<HttpExporterBuilderSet> {
    /// Build the [LogExporter] with the HTTP transport.
    pub fn build(self) -> Result<LogExporter, ExporterBuildError> {
        let (client, timeout) = self.client.0.build_client(
            Signal::Logs,
            OTEL_EXPORTER_OTLP_LOGS_ENDPOINT,
            OTEL_EXPORTER_OTLP_LOGS_TIMEOUT,
            OTEL_EXPORTER_OTLP_LOGS_HEADERS,
        )?;
        Ok(LogExporter::new(
            client,
            timeout,
            self.retry_mode,
            self.limits.unwrap_or_else(SdkLimitOptions::from_env),
        ))
    }
}

#[cfg(feature = "grpc-tonic")]
impl HasExportConfig for LogExporterBuilder<TonicExporterBuilderSet> {
    fn export_config(&mut self) -> &mut crate::ExportConfig {
        &mut self.client.0.exporter_config
    }
}

#[cfg(feature = "http-proto")]
impl HasExportConfig for LogExporterBuilder<HttpExporterBuilderSet> {
    fn export_config(&mut self) -> &mut crate::ExportConfig {
        &mut self.client.0.exporter_config
    }
}

#[cfg(feature = "grpc-tonic")]
impl HasTonicConfig for LogExporterBuilder<TonicExporterBuilderSet> {
    fn tonic_config(&mut self) -> &mut crate::TonicConfig {
        &mut self.client.0.tonic_config
    }
}

#[cfg(feature = "http-proto")]
impl HasHttpConfig for LogExporterBuilder<HttpExporterBuilderSet> {
    fn http_client_config(&mut self) -> &mut crate::exporter::http::HttpConfig {
        &mut self.client.0.http_config
    }
}

/// OTLP exporter that sends log data
///
/// Implements [`opentelemetry_sdk::logs::LogExporter`] for use with an
/// `SdkLoggerProvider`. Exports must run inside a Tokio runtime context.
#[derive(Debug)]
pub struct LogExporter {
    transmission: BufferedTransmission,
    resource: Resource,
    limits: SdkLimitOptions,
}

impl LogExporter {
    /// Obtain a builder to configure a [LogExporter].
    pub fn builder() -> LogExporterBuilder<NoExporterBuilderSet> {
        LogExporterBuilder::default()
    }

    fn new(
        client: impl ExportClient + 'static,
        timeout: Duration,
        retry_mode: RetryMode,
        limits: SdkLimitOptions,
    ) -> Self {
        LogExporter {
            transmission: BufferedTransmission::new(TransmissionHandler::new(
                client,
                Signal::Logs,
                timeout,
                retry_mode,
            )),
            resource: Resource::default(),
            limits,
        }
    }

    /// Serialize `batch` and send it to the collector.
    pub async fn export(&self, batch: &[LogRecord]) -> OTelSdkResult {
        let resource = &self.resource;
        let limits = &self.limits;
        self.transmission
            .export(|buffer| write_logs_data(buffer, 0, limits, ExportBatch::new(resource, batch)))
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

    /// The retry behaviour the exporter was built with.
    pub fn retry_mode(&self) -> RetryMode {
        self.transmission.handler().retry_mode()
    }
}

impl opentelemetry_sdk::logs::LogExporter for LogExporter {
    async fn export(&self, batch: opentelemetry_sdk::logs::LogBatch<'_>) -> OTelSdkResult {
        let records: Vec<LogRecord> = batch.iter().map(LogRecord::from).collect();
        LogExporter::export(self, &records).await
    }

    fn shutdown_with_timeout(&self, _timeout: Duration) -> OTelSdkResult {
        self.transmission.shutdown()
    }

    fn set_resource(&mut self, resource: &opentelemetry_sdk::Resource) {
        self.resource = resource.into();
    }
}

#[cfg(all(test, feature = "http-proto"))]
mod tests {
    use opentelemetry::logs::{LogRecord as _, Logger as _, LoggerProvider as _, Severity};
    use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
    use opentelemetry_proto::tonic::common::v1::any_value;
    use opentelemetry_sdk::logs::SdkLoggerProvider;
    use prost::Message;

    use super::*;
    use crate::exporter::http::testing::CapturingHttpClient;
    use crate::model::{AnyValue, InstrumentationScope, KeyValue};
    use crate::{WithExportConfig, WithHttpConfig, OTEL_EXPORTER_OTLP_ENDPOINT};

    fn record(body: &'static str) -> LogRecord {
        LogRecord {
            severity_number: Some(Severity::Warn),
            severity_text: Some("WARN".into()),
            body: Some(AnyValue::String(body.into())),
            attributes: vec![KeyValue::new("user.id", 42)],
            instrumentation_scope: InstrumentationScope::new("payments"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn exports_to_signal_path_of_generic_endpoint() {
        let client = CapturingHttpClient::default();
        let exporter = temp_env::with_vars(
            [
                (OTEL_EXPORTER_OTLP_LOGS_ENDPOINT, None),
                (OTEL_EXPORTER_OTLP_ENDPOINT, Some("http://otel:4318")),
            ],
            || {
                LogExporter::builder()
                    .with_http()
                    .with_http_client(client.clone())
                    .with_retry_policy(RetryMode::Retry)
                    .build()
                    .unwrap()
            },
        );
        assert_eq!(exporter.retry_mode(), RetryMode::Retry);

        exporter
            .export(&[record("card declined"), record("retrying")])
            .await
            .unwrap();

        assert_eq!(client.uris(), vec!["http://otel:4318/v1/logs"]);
        let request = ExportLogsServiceRequest::decode(client.bodies()[0].clone()).unwrap();
        let scope_logs = &request.resource_logs[0].scope_logs;
        assert_eq!(scope_logs.len(), 1);
        assert_eq!(scope_logs[0].scope.as_ref().unwrap().name, "payments");
        assert_eq!(scope_logs[0].log_records.len(), 2);
        assert_eq!(scope_logs[0].log_records[0].severity_number, Severity::Warn as i32);
        assert_eq!(scope_logs[0].log_records[0].severity_text, "WARN");
    }

    #[tokio::test]
    async fn log_record_limits_are_applied() {
        let client = CapturingHttpClient::default();
        let exporter = LogExporter::builder()
            .with_http()
            .with_http_client(client.clone())
            .with_limits(SdkLimitOptions {
                log_record_attribute_count_limit: 0,
                ..SdkLimitOptions::default()
            })
            .build()
            .unwrap();

        exporter.export(&[record("quiet")]).await.unwrap();

        let request = ExportLogsServiceRequest::decode(client.bodies()[0].clone()).unwrap();
        let log_record = &request.resource_logs[0].scope_logs[0].log_records[0];
        assert!(log_record.attributes.is_empty());
        assert_eq!(log_record.dropped_attributes_count, 1);
    }

    #[test]
    fn logger_provider_exports_through_simple_processor() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let _guard = runtime.enter();
        let client = CapturingHttpClient::default();
        let exporter = LogExporter::builder()
            .with_http()
            .with_http_client(client.clone())
            .with_endpoint("http://collector:4318/v1/logs")
            .with_limits(SdkLimitOptions::default())
            .build()
            .unwrap();
        let provider = SdkLoggerProvider::builder()
            .with_simple_exporter(exporter)
            .with_resource(
                opentelemetry_sdk::Resource::builder_empty()
                    .with_service_name("billing")
                    .build(),
            )
            .build();

        let logger = provider.logger("payments");
        let mut declined = logger.create_log_record();
        declined.set_severity_number(Severity::Error);
        declined.set_body("card declined".into());
        declined.add_attribute("user.id", 42);
        logger.emit(declined);

        let mut gateway = logger.create_log_record();
        gateway.set_target("payments::gateway");
        gateway.set_body("timeout".into());
        logger.emit(gateway);
        provider.shutdown().unwrap();

        let bodies = client.bodies();
        assert_eq!(bodies.len(), 2);

        let request = ExportLogsServiceRequest::decode(bodies[0].clone()).unwrap();
        let resource_logs = &request.resource_logs[0];
        let resource = resource_logs.resource.as_ref().unwrap();
        assert_eq!(resource.attributes[0].key, "service.name");
        let scope_logs = &resource_logs.scope_logs[0];
        assert_eq!(scope_logs.scope.as_ref().unwrap().name, "payments");
        let log_record = &scope_logs.log_records[0];
        assert_eq!(log_record.severity_number, Severity::Error as i32);
        assert_eq!(
            log_record.body.as_ref().unwrap().value,
            Some(any_value::Value::StringValue("card declined".into()))
        );
        assert_eq!(log_record.attributes[0].key, "user.id");

        let request = ExportLogsServiceRequest::decode(bodies[1].clone()).unwrap();
        let scope_logs = &request.resource_logs[0].scope_logs[0];
        assert_eq!(scope_logs.scope.as_ref().unwrap().name, "payments::gateway");
    }
}
