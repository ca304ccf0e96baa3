use std::fmt::{Debug, Formatter};
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes};
use http::uri::PathAndQuery;
use http::{HeaderMap, HeaderName, HeaderValue};
use opentelemetry::otel_debug;
use opentelemetry_sdk::error::{OTelSdkError, OTelSdkResult};
use tokio_util::sync::CancellationToken;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::metadata::MetadataMap;
use tonic::transport::Channel;
use tonic::Status;

use super::client::{
    attempt_timeout, ExportClient, ExportClientGrpcResponse, ExportClientResponse, ShutdownGuard,
};
use super::{
    default_headers, headers_from_env, resolve_timeout, ExporterBuildError,
    OTEL_EXPORTER_OTLP_GRPC_ENDPOINT_DEFAULT,
};
use crate::transform::Signal;
use crate::{ExportConfig, OTEL_EXPORTER_OTLP_ENDPOINT};

/// gRPC specific settings of a builder.
#[derive(Debug, Default)]
#[non_exhaustive]
pub struct TonicConfig {
    /// Metadata attached to every call.
    pub(crate) metadata: Option<MetadataMap>,
    /// Channel to use instead of one built from the endpoint.
    pub(crate) channel: Option<Channel>,
}

/// Builds the gRPC transport of an exporter.
///
/// Calls go to the standard OTLP collector services over a lazily connected
/// [`Channel`], or over the channel given with
/// [`WithTonicConfig::with_channel`].
///
/// ## Examples
///
/// ```no_run
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let span_exporter = opentelemetry_otlp_transmission::SpanExporter::builder()
///     .with_tonic()
///     .build()?;
///
/// let log_exporter = opentelemetry_otlp_transmission::LogExporter::builder()
///     .with_tonic()
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct TonicExporterBuilder {
    pub(crate) tonic_config: TonicConfig,
    pub(crate) exporter_config: ExportConfig,
}

impl Default for TonicExporterBuilder {
    fn default() -> Self {
        TonicExporterBuilder {
            tonic_config: TonicConfig {
                metadata: Some(MetadataMap::from_headers(header_map(default_headers()))),
                channel: None,
            },
            exporter_config: ExportConfig {
                protocol: crate::Protocol::Grpc,
                ..Default::default()
            },
        }
    }
}

impl TonicExporterBuilder {
    /// Build the client of `signal` and resolve the export timeout.
    pub(crate) fn build_client(
        self,
        signal: Signal,
        signal_endpoint_var: &str,
        signal_timeout_var: &str,
        signal_headers_var: &str,
    ) -> Result<(TonicExportClient, Duration), ExporterBuildError> {
        let TonicExporterBuilder {
            tonic_config,
            exporter_config,
        } = self;

        let metadata = with_env_headers(tonic_config.metadata.unwrap_or_default(), signal_headers_var);
        let timeout = resolve_timeout(signal_timeout_var, exporter_config.timeout.as_ref());

        let channel = match tonic_config.channel {
            Some(channel) => channel,
            None => {
                let endpoint = resolve_endpoint(signal_endpoint_var, exporter_config.endpoint);
                Channel::from_shared(endpoint.clone())
                    .map_err(|e| ExporterBuildError::InvalidUri(endpoint.clone(), e.to_string()))?
                    .timeout(timeout)
                    .connect_lazy()
            }
        };

        otel_debug!(
            name: "TonicExportClientBuilding",
            signal = signal.as_str(),
            timeout_in_millisecs = timeout.as_millis() as u64,
            metadata_entries = metadata.len() as u64
        );
        Ok((TonicExportClient::new(channel, metadata, signal, timeout), timeout))
    }
}

/// The collector address: programmatic, then signal variable, then generic
/// variable, then the default.
///
/// gRPC routes on the service method, so no signal path is appended.
fn resolve_endpoint(signal_endpoint_var: &str, provided_endpoint: Option<String>) -> String {
    provided_endpoint
        .filter(|endpoint| !endpoint.is_empty())
        .or_else(|| std::env::var(signal_endpoint_var).ok())
        .or_else(|| std::env::var(OTEL_EXPORTER_OTLP_ENDPOINT).ok())
        .unwrap_or_else(|| OTEL_EXPORTER_OTLP_GRPC_ENDPOINT_DEFAULT.to_string())
}

fn header_map(pairs: impl IntoIterator<Item = (String, String)>) -> HeaderMap {
    pairs
        .into_iter()
        .filter_map(|(key, value)| {
            Some((
                HeaderName::from_str(&key).ok()?,
                HeaderValue::from_str(&value).ok()?,
            ))
        })
        .collect()
}

/// `metadata` with the headers from the environment added. Environment
/// values replace entries with the same key.
fn with_env_headers(metadata: MetadataMap, signal_headers_var: &str) -> MetadataMap {
    let from_env = header_map(headers_from_env(signal_headers_var));
    if from_env.is_empty() {
        return metadata;
    }
    let mut headers = metadata.into_headers();
    headers.extend(from_env);
    MetadataMap::from_headers(headers)
}

/// The `Export` method of the collector service receiving `signal`.
fn export_path(signal: Signal) -> PathAndQuery {
    match signal {
        Signal::Traces => {
            PathAndQuery::from_static("/opentelemetry.proto.collector.trace.v1.TraceService/Export")
        }
        Signal::Metrics => PathAndQuery::from_static(
            "/opentelemetry.proto.collector.metrics.v1.MetricsService/Export",
        ),
        Signal::Logs => {
            PathAndQuery::from_static("/opentelemetry.proto.collector.logs.v1.LogsService/Export")
        }
    }
}

/// Sends already encoded requests as they are and hands back the raw response.
#[derive(Debug, Clone, Copy, Default)]
struct BytesCodec;

impl Codec for BytesCodec {
    type Encode = Bytes;
    type Decode = Bytes;
    type Encoder = BytesCodec;
    type Decoder = BytesCodec;

    fn encoder(&mut self) -> Self::Encoder {
        BytesCodec
    }

    fn decoder(&mut self) -> Self::Decoder {
        BytesCodec
    }
}

impl Encoder for BytesCodec {
    type Item = Bytes;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        dst.put(item);
        Ok(())
    }
}

impl Decoder for BytesCodec {
    type Item = Bytes;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        Ok(Some(src.copy_to_bytes(src.remaining())))
    }
}

/// Exports encoded payloads with unary gRPC calls.
pub struct TonicExportClient {
    channel: Channel,
    metadata: MetadataMap,
    path: PathAndQuery,
    signal: Signal,
    timeout: Duration,
    shutdown: ShutdownGuard,
}

impl Debug for TonicExportClient {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TonicExportClient")
            .field("signal", &self.signal)
            .field("path", &self.path)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl TonicExportClient {
    pub(crate) fn new(
        channel: Channel,
        metadata: MetadataMap,
        signal: Signal,
        timeout: Duration,
    ) -> Self {
        otel_debug!(name: "TonicExportClientBuilt", signal = signal.as_str());
        TonicExportClient {
            channel,
            metadata,
            path: export_path(signal),
            signal,
            timeout,
            shutdown: ShutdownGuard::default(),
        }
    }

    async fn call(&self, body: Bytes, timeout: Duration) -> Result<(), Status> {
        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready()
            .await
            .map_err(|e| Status::unavailable(format!("service was not ready: {e}")))?;

        let mut request = tonic::Request::new(body);
        *request.metadata_mut() = self.metadata.clone();
        request.set_timeout(timeout);

        grpc.unary::<Bytes, Bytes, _>(request, self.path.clone(), BytesCodec)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl ExportClient for TonicExportClient {
    async fn send_export_request(
        &self,
        body: Bytes,
        deadline: SystemTime,
        cancellation: &CancellationToken,
    ) -> Result<ExportClientResponse, OTelSdkError> {
        self.shutdown.check()?;

        let timeout = attempt_timeout(self.timeout, deadline);
        otel_debug!(
            name: "TonicExportClient.ExportStarted",
            signal = self.signal.as_str(),
            timeout_in_millisecs = timeout.as_millis() as u64
        );

        let result = tokio::select! {
            biased;
            _ = cancellation.cancelled() => Err(Status::cancelled("export cancelled")),
            _ = self.shutdown.token().cancelled() => Err(Status::cancelled("client shut down")),
            result = tokio::time::timeout(timeout, self.call(body, timeout)) => match result {
                Ok(result) => result,
                Err(_) => Err(Status::deadline_exceeded("export timed out")),
            },
        };

        let response = match result {
            Ok(()) => {
                otel_debug!(name: "TonicExportClient.ExportSucceeded", signal = self.signal.as_str());
                ExportClientGrpcResponse::succeeded(deadline)
            }
            Err(status) => {
                otel_debug!(
                    name: "TonicExportClient.ExportFailed",
                    signal = self.signal.as_str(),
                    error = format!("{status:?}")
                );
                ExportClientGrpcResponse::failure(deadline, status)
            }
        };
        Ok(response.into())
    }

    fn shutdown(&self) -> OTelSdkResult {
        self.shutdown.shutdown()
    }
}

/// Gives [`WithTonicConfig`] access to the [TonicConfig] of a builder.
pub trait HasTonicConfig {
    /// The builder's [TonicConfig].
    fn tonic_config(&mut self) -> &mut TonicConfig;
}

impl HasTonicConfig for TonicExporterBuilder {
    fn tonic_config(&mut self) -> &mut TonicConfig {
        &mut self.tonic_config
    }
}

/// gRPC setters, available on every builder implementing [`HasTonicConfig`].
///
/// ## Examples
/// ```
/// use opentelemetry_otlp_transmission::WithTonicConfig;
/// use tonic::metadata::MetadataMap;
///
/// let mut metadata = MetadataMap::new();
/// metadata.insert("x-tenant", "acme".parse().unwrap());
/// let exporter_builder = opentelemetry_otlp_transmission::SpanExporter::builder()
///     .with_tonic()
///     .with_metadata(metadata);
/// ```
pub trait WithTonicConfig {
    /// Add metadata entries sent with every call. Entries replace earlier
    /// ones with the same key, including the default `User-Agent`.
    fn with_metadata(self, metadata: MetadataMap) -> Self;

    /// Send over `channel` instead of a channel built from the endpoint.
    ///
    /// The channel's own timeout is not adjusted; keep it in line with
    /// [`ExportConfig::timeout`].
    fn with_channel(self, channel: Channel) -> Self;
}

impl<B: HasTonicConfig> WithTonicConfig for B {
    fn with_metadata(mut self, metadata: MetadataMap) -> Self {
        let config = self.tonic_config();
        let mut headers = config.metadata.take().unwrap_or_default().into_headers();
        headers.extend(metadata.into_headers());
        config.metadata = Some(MetadataMap::from_headers(headers));
        self
    }

    fn with_channel(mut self, channel: Channel) -> Self {
        self.tonic_config().channel = Some(channel);
        self
    }
}
