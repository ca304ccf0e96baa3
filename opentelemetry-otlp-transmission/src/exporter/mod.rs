//! Transport builders and the configuration they share.
//!
//! Endpoint, timeout and headers are taken from the builder first, then from
//! the signal specific `OTEL_EXPORTER_OTLP_{TRACES,METRICS,LOGS}_*` variable
//! and last from the generic `OTEL_EXPORTER_OTLP_*` one.

#[cfg(feature = "http-proto")]
use crate::exporter::http::HttpExporterBuilder;
#[cfg(feature = "grpc-tonic")]
use crate::exporter::tonic::TonicExporterBuilder;
use crate::Protocol;
use std::time::Duration;
use thiserror::Error;

pub mod client;
#[cfg(feature = "http-proto")]
pub(crate) mod http;
#[cfg(feature = "grpc-tonic")]
pub(crate) mod tonic;

/// Collector address used by every signal unless a signal specific endpoint
/// is set.
///
/// For HTTP the signal path (`/v1/traces`, `/v1/metrics`, `/v1/logs`) is
/// appended to this value, see
/// <https://github.com/open-telemetry/opentelemetry-specification/blob/main/specification/protocol/exporter.md#endpoint-urls-for-otlphttp>
pub const OTEL_EXPORTER_OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
/// Collector address used when nothing else is configured.
pub const OTEL_EXPORTER_OTLP_ENDPOINT_DEFAULT: &str = OTEL_EXPORTER_OTLP_HTTP_ENDPOINT_DEFAULT;
/// Extra request headers for every signal, as `key=value` pairs separated by
/// commas. Values may be percent-encoded.
pub const OTEL_EXPORTER_OTLP_HEADERS: &str = "OTEL_EXPORTER_OTLP_HEADERS";
/// Transport protocol, `grpc` or `http/protobuf`.
pub const OTEL_EXPORTER_OTLP_PROTOCOL: &str = "OTEL_EXPORTER_OTLP_PROTOCOL";
/// [`OTEL_EXPORTER_OTLP_PROTOCOL`] value selecting protobuf over HTTP.
pub const OTEL_EXPORTER_OTLP_PROTOCOL_HTTP_PROTOBUF: &str = "http/protobuf";
/// [`OTEL_EXPORTER_OTLP_PROTOCOL`] value selecting gRPC.
pub const OTEL_EXPORTER_OTLP_PROTOCOL_GRPC: &str = "grpc";
/// Time budget of one export in milliseconds, retries included.
pub const OTEL_EXPORTER_OTLP_TIMEOUT: &str = "OTEL_EXPORTER_OTLP_TIMEOUT";
/// Time budget of one export when none is configured.
pub const OTEL_EXPORTER_OTLP_TIMEOUT_DEFAULT: Duration = Duration::from_secs(10);

#[cfg(feature = "grpc-tonic")]
const OTEL_EXPORTER_OTLP_GRPC_ENDPOINT_DEFAULT: &str = "http://localhost:4317";
const OTEL_EXPORTER_OTLP_HTTP_ENDPOINT_DEFAULT: &str = "http://localhost:4318";

/// Settings common to both transports.
#[derive(Debug)]
pub struct ExportConfig {
    /// Collector address. `None` or an empty string falls back to the
    /// environment and then to the protocol's default address.
    pub endpoint: Option<String>,

    /// Protocol the exporter was configured for.
    pub protocol: Protocol,

    /// Time budget of one export, every retry included. `None` falls back to
    /// the environment and then to 10 seconds.
    pub timeout: Option<Duration>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        // endpoint and timeout stay unset so the environment can still apply
        ExportConfig {
            endpoint: None,
            protocol: Protocol::default(),
            timeout: None,
        }
    }
}

/// Errors that can occur while building an exporter.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ExporterBuildError {
    /// The HTTP transport was selected without an [`HttpClient`](crate::HttpClient).
    #[error("no http client specified")]
    NoHttpClient,

    /// The collector endpoint is not a valid URI.
    #[error("invalid URI {0}. Reason {1}")]
    InvalidUri(String, String),

    /// A configuration value was rejected.
    #[error("{name}: {reason}")]
    InvalidConfig {
        /// The configuration name.
        name: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Failed due to an internal error.
    ///
    /// The message is meant for logs only and may change without notice.
    #[error("Reason: {0}")]
    InternalFailure(String),
}

/// `OTEL_EXPORTER_OTLP_PROTOCOL` when it names a supported protocol,
/// otherwise HTTP when the `http-proto` feature is enabled and gRPC if not.
impl Default for Protocol {
    fn default() -> Self {
        Protocol::from_env().unwrap_or(FEATURE_PROTOCOL)
    }
}

#[cfg(feature = "http-proto")]
const FEATURE_PROTOCOL: Protocol = Protocol::HttpBinary;
#[cfg(not(feature = "http-proto"))]
const FEATURE_PROTOCOL: Protocol = Protocol::Grpc;

/// Headers sent with every request unless overridden.
#[cfg(any(feature = "grpc-tonic", feature = "http-proto"))]
fn default_headers() -> std::collections::HashMap<String, String> {
    std::collections::HashMap::from([(
        "User-Agent".to_string(),
        format!("OTel-OTLP-Transmission-Rust/{}", env!("CARGO_PKG_VERSION")),
    )])
}

/// Gives the configuration traits access to the [ExportConfig] of a builder.
pub trait HasExportConfig {
    /// The builder's [ExportConfig].
    fn export_config(&mut self) -> &mut ExportConfig;
}

#[cfg(feature = "grpc-tonic")]
impl HasExportConfig for TonicExporterBuilder {
    fn export_config(&mut self) -> &mut ExportConfig {
        &mut self.exporter_config
    }
}

#[cfg(feature = "http-proto")]
impl HasExportConfig for HttpExporterBuilder {
    fn export_config(&mut self) -> &mut ExportConfig {
        &mut self.exporter_config
    }
}

/// Setters for [ExportConfig], available on every builder implementing
/// [`HasExportConfig`].
///
/// Values set here win over environment variables.
///
/// ## Examples
/// ```
/// # #[cfg(feature = "grpc-tonic")]
/// # {
/// use opentelemetry_otlp_transmission::WithExportConfig;
/// use std::time::Duration;
///
/// let exporter_builder = opentelemetry_otlp_transmission::SpanExporter::builder()
///     .with_tonic()
///     .with_endpoint("http://otel-collector:4317")
///     .with_timeout(Duration::from_secs(3));
/// # }
/// ```
pub trait WithExportConfig {
    /// Set the collector address. An empty string keeps the default.
    fn with_endpoint<T: Into<String>>(self, endpoint: T) -> Self;
    /// Record the protocol. The transport itself is chosen with
    /// `with_tonic` or `with_http`.
    fn with_protocol(self, protocol: Protocol) -> Self;
    /// Set the time budget of one export, every retry included.
    fn with_timeout(self, timeout: Duration) -> Self;
    /// Replace the whole [ExportConfig].
    fn with_export_config(self, export_config: ExportConfig) -> Self;
}

impl<B: HasExportConfig> WithExportConfig for B {
    fn with_endpoint<T: Into<String>>(mut self, endpoint: T) -> Self {
        self.export_config().endpoint = Some(endpoint.into());
        self
    }

    fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.export_config().protocol = protocol;
        self
    }

    fn with_timeout(mut self, timeout: Duration) -> Self {
        self.export_config().timeout = Some(timeout);
        self
    }

    fn with_export_config(mut self, export_config: ExportConfig) -> Self {
        *self.export_config() = export_config;
        self
    }
}

/// The export timeout: programmatic, then signal variable, then generic
/// variable, then the default.
#[cfg(any(feature = "grpc-tonic", feature = "http-proto"))]
fn resolve_timeout(signal_timeout_var: &str, provided_timeout: Option<&Duration>) -> Duration {
    provided_timeout
        .copied()
        .or_else(|| timeout_from_env(signal_timeout_var))
        .or_else(|| timeout_from_env(OTEL_EXPORTER_OTLP_TIMEOUT))
        .unwrap_or(OTEL_EXPORTER_OTLP_TIMEOUT_DEFAULT)
}

#[cfg(any(feature = "grpc-tonic", feature = "http-proto"))]
fn timeout_from_env(var: &str) -> Option<Duration> {
    let value = std::env::var(var).ok()?;
    match value.trim().parse::<u64>() {
        Ok(millis) => Some(Duration::from_millis(millis)),
        Err(_) => {
            opentelemetry::otel_warn!(
                name: "ExportConfig.InvalidTimeout",
                variable = var.to_string(),
                value = value.as_str()
            );
            None
        }
    }
}

/// Headers from the signal variable or, when it is unset, the generic one.
#[cfg(any(feature = "grpc-tonic", feature = "http-proto"))]
fn headers_from_env(signal_headers_var: &str) -> Vec<(String, String)> {
    std::env::var(signal_headers_var)
        .or_else(|_| std::env::var(OTEL_EXPORTER_OTLP_HEADERS))
        .map(|value| parse_headers(&value))
        .unwrap_or_default()
}

/// Parse `k1=v1,k2=v2`. Pairs without `=`, with an empty key or with an
/// empty value are skipped.
#[cfg(any(feature = "grpc-tonic", feature = "http-proto"))]
fn parse_headers(value: &str) -> Vec<(String, String)> {
    value.split(',').filter_map(parse_header).collect()
}

#[cfg(any(feature = "grpc-tonic", feature = "http-proto"))]
fn parse_header(pair: &str) -> Option<(String, String)> {
    let (key, value) = pair.split_once('=')?;
    let (key, value) = (key.trim(), value.trim());
    if key.is_empty() || value.is_empty() {
        return None;
    }
    let value = url_decode(value).unwrap_or_else(|| value.to_string());
    Some((key.to_string(), value))
}

/// Decode `%XX` escapes. `None` when an escape is malformed or the result is
/// not UTF-8.
#[cfg(any(feature = "grpc-tonic", feature = "http-proto"))]
fn url_decode(value: &str) -> Option<String> {
    let bytes = value.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3)?;
            if !hex.iter().all(u8::is_ascii_hexdigit) {
                return None;
            }
            let hex = std::str::from_utf8(hex).ok()?;
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded).ok()
}

#[cfg(test)]
#[cfg(any(feature = "grpc-tonic", feature = "http-proto"))]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{OTEL_EXPORTER_OTLP_LOGS_HEADERS, OTEL_EXPORTER_OTLP_TRACES_TIMEOUT};

    pub(crate) fn run_env_test<T, F>(env_vars: T, f: F)
    where
        F: FnOnce(),
        T: Into<Vec<(&'static str, &'static str)>>,
    {
        let vars: Vec<(&'static str, Option<&'static str>)> = env_vars
            .into()
            .into_iter()
            .map(|(key, value)| (key, Some(value)))
            .collect();
        temp_env::with_vars(vars, f)
    }

    fn pairs(expected: &[(&str, &str)]) -> Vec<(String, String)> {
        expected
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn builders_leave_endpoint_to_the_environment() {
        #[cfg(feature = "http-proto")]
        assert_eq!(HttpExporterBuilder::default().exporter_config.endpoint, None);
        #[cfg(feature = "grpc-tonic")]
        assert_eq!(TonicExporterBuilder::default().exporter_config.endpoint, None);
    }

    #[cfg(feature = "http-proto")]
    #[test]
    fn relative_http_endpoint_is_rejected() {
        use crate::{LogExporter, WithExportConfig};

        let result = LogExporter::builder()
            .with_http()
            .with_export_config(ExportConfig {
                endpoint: Some("collector/v1/logs".to_string()),
                protocol: Protocol::HttpBinary,
                timeout: None,
            })
            .build();

        assert!(
            matches!(result, Err(ExporterBuildError::InvalidUri(_, _))),
            "expected InvalidUri, got {result:?}"
        );
    }

    #[cfg(feature = "grpc-tonic")]
    #[tokio::test]
    async fn relative_grpc_endpoint_is_rejected() {
        use crate::{SpanExporter, WithExportConfig};

        let result = SpanExporter::builder()
            .with_tonic()
            .with_endpoint("collector:4317/traces")
            .build();

        assert!(matches!(result, Err(ExporterBuildError::InvalidUri(_, _))));
    }

    #[test]
    fn protocol_follows_environment() {
        temp_env::with_var_unset(OTEL_EXPORTER_OTLP_PROTOCOL, || {
            assert_eq!(Protocol::from_env(), None);
            #[cfg(feature = "http-proto")]
            assert_eq!(Protocol::default(), Protocol::HttpBinary);
            #[cfg(not(feature = "http-proto"))]
            assert_eq!(Protocol::default(), Protocol::Grpc);
        });

        run_env_test([(OTEL_EXPORTER_OTLP_PROTOCOL, "grpc")], || {
            assert_eq!(Protocol::from_env(), Some(Protocol::Grpc));
            assert_eq!(Protocol::default(), Protocol::Grpc);
        });

        run_env_test([(OTEL_EXPORTER_OTLP_PROTOCOL, " http/protobuf ")], || {
            assert_eq!(Protocol::from_env(), Some(Protocol::HttpBinary));
        });

        // no JSON encoding
        run_env_test([(OTEL_EXPORTER_OTLP_PROTOCOL, "http/json")], || {
            assert_eq!(Protocol::from_env(), None);
        });
    }

    #[test]
    fn url_decode_handles_escapes() {
        assert_eq!(url_decode("Bearer%20abc").as_deref(), Some("Bearer abc"));
        assert_eq!(url_decode("plain").as_deref(), Some("plain"));
        assert_eq!(url_decode("caf%C3%A9").as_deref(), Some("café"));
        assert_eq!(url_decode("100%25").as_deref(), Some("100%"));
        // malformed escapes
        assert_eq!(url_decode("50%"), None);
        assert_eq!(url_decode("%4"), None);
        assert_eq!(url_decode("%zz"), None);
        assert_eq!(url_decode("%+1"), None);
        // not UTF-8
        assert_eq!(url_decode("%C3"), None);
    }

    #[test]
    fn header_lists_are_parsed() {
        assert_eq!(
            parse_headers("x-tenant=acme, api-key = s3cr3t"),
            pairs(&[("x-tenant", "acme"), ("api-key", "s3cr3t")])
        );
        assert_eq!(
            parse_headers("authorization=Basic%20dXNlcg==,broken,=orphan,empty="),
            pairs(&[("authorization", "Basic dXNlcg==")])
        );
        // an undecodable value is kept as written
        assert_eq!(parse_headers("k=%ZZ"), pairs(&[("k", "%ZZ")]));
        assert!(parse_headers("").is_empty());
    }

    #[test]
    fn signal_headers_replace_generic_headers() {
        run_env_test(
            [
                (OTEL_EXPORTER_OTLP_LOGS_HEADERS, "tenant=logs"),
                (OTEL_EXPORTER_OTLP_HEADERS, "tenant=all,region=eu"),
            ],
            || {
                assert_eq!(
                    headers_from_env(OTEL_EXPORTER_OTLP_LOGS_HEADERS),
                    pairs(&[("tenant", "logs")])
                );
                assert_eq!(
                    headers_from_env("OTEL_EXPORTER_OTLP_UNSET_HEADERS"),
                    pairs(&[("tenant", "all"), ("region", "eu")])
                );
            },
        );
    }

    #[test]
    fn timeout_precedence() {
        run_env_test(
            [
                (OTEL_EXPORTER_OTLP_TRACES_TIMEOUT, "2500"),
                (OTEL_EXPORTER_OTLP_TIMEOUT, "4000"),
            ],
            || {
                assert_eq!(
                    resolve_timeout(OTEL_EXPORTER_OTLP_TRACES_TIMEOUT, None),
                    Duration::from_millis(2500)
                );
                assert_eq!(
                    resolve_timeout("OTEL_EXPORTER_OTLP_UNSET_TIMEOUT", None),
                    Duration::from_millis(4000)
                );
                assert_eq!(
                    resolve_timeout(
                        OTEL_EXPORTER_OTLP_TRACES_TIMEOUT,
                        Some(&Duration::from_millis(700))
                    ),
                    Duration::from_millis(700)
                );
            },
        );
    }

    #[test]
    fn invalid_timeout_falls_through() {
        temp_env::with_vars(
            [
                (OTEL_EXPORTER_OTLP_TRACES_TIMEOUT, Some("soon")),
                (OTEL_EXPORTER_OTLP_TIMEOUT, None),
            ],
            || {
                assert_eq!(
                    resolve_timeout(OTEL_EXPORTER_OTLP_TRACES_TIMEOUT, None),
                    OTEL_EXPORTER_OTLP_TIMEOUT_DEFAULT
                );
            },
        );
    }
}
