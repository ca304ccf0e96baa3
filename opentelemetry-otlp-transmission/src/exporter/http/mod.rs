use super::client::{
    attempt_timeout, ExportClient, ExportClientHttpResponse, ExportClientResponse, ShutdownGuard,
};
use super::{
    default_headers, headers_from_env, resolve_timeout, ExporterBuildError,
    OTEL_EXPORTER_OTLP_HTTP_ENDPOINT_DEFAULT,
};
use crate::transform::Signal;
use crate::{ExportConfig, Protocol, OTEL_EXPORTER_OTLP_ENDPOINT};
use async_trait::async_trait;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, Uri};
use opentelemetry::otel_debug;
use opentelemetry_sdk::error::{OTelSdkError, OTelSdkResult};
use std::collections::HashMap;
use std::env;
use std::fmt::Debug;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";

/// Error returned by an [`HttpClient`] when no response could be obtained.
pub type HttpError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A minimal interface necessary for sending requests over HTTP.
///
/// Users sometime choose HTTP clients that relay on a certain async runtime. This trait allows
/// users to bring their choice of HTTP client.
///
/// Implementations must hand back responses of every status, not only
/// successful ones, so `Retry-After` and the status code reach the retry logic.
#[async_trait]
pub trait HttpClient: Debug + Send + Sync {
    /// Send the specified HTTP request with `Bytes` payload.
    ///
    /// Returns an error if it can't connect to the server or the request could not be completed,
    /// e.g. because of a timeout, infinite redirects, or a loss of connection.
    async fn send_bytes(&self, request: Request<Bytes>) -> Result<Response<Bytes>, HttpError>;
}

#[cfg(feature = "reqwest-client")]
mod reqwest_client {
    use opentelemetry::otel_debug;

    use super::{async_trait, Bytes, HttpClient, HttpError, Request, Response};

    #[async_trait]
    impl HttpClient for reqwest::Client {
        async fn send_bytes(&self, request: Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
            otel_debug!(name: "ReqwestClient.Send");
            let request = reqwest::Request::try_from(request)?;
            let mut response = self.execute(request).await?;
            let headers = std::mem::take(response.headers_mut());
            let mut http_response = Response::builder()
                .status(response.status())
                .body(response.bytes().await?)?;
            *http_response.headers_mut() = headers;

            Ok(http_response)
        }
    }
}

/// Configuration of the http transport
#[derive(Debug)]
#[cfg_attr(not(feature = "reqwest-client"), derive(Default))]
pub struct HttpConfig {
    /// Select the HTTP client
    client: Option<Arc<dyn HttpClient>>,

    /// Additional headers to send to the collector.
    headers: Option<HashMap<String, String>>,
}

#[cfg(feature = "reqwest-client")]
impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            client: Some(Arc::new(reqwest::Client::new())),
            headers: None,
        }
    }
}

/// Configuration for the OTLP HTTP exporter.
///
/// ## Examples
///
/// ```no_run
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let span_exporter = opentelemetry_otlp_transmission::SpanExporter::builder()
///     .with_http()
///     .build()?;
///
/// let metric_exporter = opentelemetry_otlp_transmission::MetricExporter::builder()
///     .with_http()
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct HttpExporterBuilder {
    pub(crate) exporter_config: ExportConfig,
    pub(crate) http_config: HttpConfig,
}

impl Default for HttpExporterBuilder {
    fn default() -> Self {
        HttpExporterBuilder {
            exporter_config: ExportConfig {
                protocol: Protocol::HttpBinary,
                ..ExportConfig::default()
            },
            http_config: HttpConfig {
                headers: Some(default_headers()),
                ..HttpConfig::default()
            },
        }
    }
}

impl HttpExporterBuilder {
    /// Build the client of `signal` and resolve the export timeout.
    pub(crate) fn build_client(
        mut self,
        signal: Signal,
        signal_endpoint_var: &str,
        signal_timeout_var: &str,
        signal_http_headers_var: &str,
    ) -> Result<(OtlpHttpClient, Duration), ExporterBuildError> {
        let endpoint = resolve_endpoint(
            signal_endpoint_var,
            signal_path(signal),
            self.exporter_config.endpoint.as_deref(),
        )?;

        let timeout = resolve_timeout(signal_timeout_var, self.exporter_config.timeout.as_ref());

        let http_client = self
            .http_config
            .client
            .take()
            .ok_or(ExporterBuildError::NoHttpClient)?;

        let mut headers: HeaderMap = self
            .http_config
            .headers
            .take()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(k, v)| {
                Some((
                    HeaderName::from_str(&k).ok()?,
                    HeaderValue::from_str(&v).ok()?,
                ))
            })
            .collect();

        // read headers from env var - signal specific env var is preferred over general
        add_headers(headers_from_env(signal_http_headers_var), &mut headers);

        otel_debug!(
            name: "HttpExportClientBuilding",
            signal = signal.as_str(),
            endpoint = endpoint.to_string(),
            timeout_in_millisecs = timeout.as_millis() as u64
        );

        Ok((
            OtlpHttpClient::new(http_client, endpoint, headers, signal, timeout),
            timeout,
        ))
    }
}

/// Exports encoded payloads with `POST` requests.
#[derive(Debug)]
pub struct OtlpHttpClient {
    client: Arc<dyn HttpClient>,
    collector_endpoint: Uri,
    headers: HeaderMap,
    signal: Signal,
    timeout: Duration,
    shutdown: ShutdownGuard,
}

impl OtlpHttpClient {
    fn new(
        client: Arc<dyn HttpClient>,
        collector_endpoint: Uri,
        headers: HeaderMap,
        signal: Signal,
        timeout: Duration,
    ) -> Self {
        OtlpHttpClient {
            client,
            collector_endpoint,
            headers,
            signal,
            timeout,
            shutdown: ShutdownGuard::default(),
        }
    }

    fn build_request(&self, body: Bytes) -> Result<Request<Bytes>, OTelSdkError> {
        let mut request = Request::builder()
            .method(Method::POST)
            .uri(&self.collector_endpoint)
            .header(CONTENT_TYPE, PROTOBUF_CONTENT_TYPE)
            .body(body)
            .map_err(|e| OTelSdkError::InternalFailure(format!("invalid request: {e}")))?;

        for (k, v) in &self.headers {
            request.headers_mut().insert(k.clone(), v.clone());
        }
        Ok(request)
    }
}

#[async_trait]
impl ExportClient for OtlpHttpClient {
    async fn send_export_request(
        &self,
        body: Bytes,
        deadline: SystemTime,
        cancellation: &CancellationToken,
    ) -> Result<ExportClientResponse, OTelSdkError> {
        self.shutdown.check()?;

        let request = self.build_request(body)?;
        let timeout = attempt_timeout(self.timeout, deadline);
        otel_debug!(
            name: "HttpExportClient.CallingExport",
            signal = self.signal.as_str(),
            timeout_in_millisecs = timeout.as_millis() as u64
        );

        let response = tokio::select! {
            biased;
            _ = cancellation.cancelled() => {
                ExportClientHttpResponse::from_error(deadline, "export cancelled")
            }
            _ = self.shutdown.token().cancelled() => {
                ExportClientHttpResponse::from_error(deadline, "client shut down")
            }
            result = tokio::time::timeout(timeout, self.client.send_bytes(request)) => match result {
                Ok(Ok(response)) => {
                    let status = response.status();
                    let (parts, _) = response.into_parts();
                    ExportClientHttpResponse::from_response(deadline, status, parts.headers)
                }
                Ok(Err(error)) => ExportClientHttpResponse::from_error(deadline, error),
                Err(_) => ExportClientHttpResponse::from_error(deadline, "request timed out"),
            },
        };

        if response.success {
            otel_debug!(name: "HttpExportClient.ExportSucceeded", signal = self.signal.as_str());
        } else {
            otel_debug!(
                name: "HttpExportClient.ExportFailed",
                signal = self.signal.as_str(),
                status = response.status.map(|s| s.as_u16()).unwrap_or_default(),
                error = response.error.clone().unwrap_or_default()
            );
        }
        Ok(response.into())
    }

    fn shutdown(&self) -> OTelSdkResult {
        self.shutdown.shutdown()
    }
}

fn signal_path(signal: Signal) -> &'static str {
    match signal {
        Signal::Traces => "/v1/traces",
        Signal::Metrics => "/v1/metrics",
        Signal::Logs => "/v1/logs",
    }
}

fn build_endpoint_uri(endpoint: &str, path: &str) -> Result<Uri, ExporterBuildError> {
    let path = match path.strip_prefix('/') {
        Some(stripped) if endpoint.ends_with('/') => stripped,
        _ => path,
    };
    let endpoint = format!("{endpoint}{path}");
    endpoint
        .parse()
        .map_err(|e: http::uri::InvalidUri| ExporterBuildError::InvalidUri(endpoint, e.to_string()))
}

// see https://github.com/open-telemetry/opentelemetry-specification/blob/main/specification/protocol/exporter.md#endpoint-urls-for-otlphttp
fn resolve_endpoint(
    signal_endpoint_var: &str,
    signal_endpoint_path: &str,
    provided_endpoint: Option<&str>,
) -> Result<Uri, ExporterBuildError> {
    // programmatic configuration overrides any value set via environment variables
    if let Some(endpoint) = provided_endpoint.filter(|s| !s.is_empty()) {
        return endpoint
            .parse()
            .map_err(|e: http::uri::InvalidUri| {
                ExporterBuildError::InvalidUri(endpoint.to_string(), e.to_string())
            });
    }

    // per signal env var is not modified
    if let Some(endpoint) = env::var(signal_endpoint_var)
        .ok()
        .and_then(|s| s.parse().ok())
    {
        return Ok(endpoint);
    }

    // if signal env var is not set, then we check if the OTEL_EXPORTER_OTLP_ENDPOINT is set
    if let Some(endpoint) = env::var(OTEL_EXPORTER_OTLP_ENDPOINT)
        .ok()
        .and_then(|s| build_endpoint_uri(&s, signal_endpoint_path).ok())
    {
        return Ok(endpoint);
    }

    build_endpoint_uri(OTEL_EXPORTER_OTLP_HTTP_ENDPOINT_DEFAULT, signal_endpoint_path)
}

fn add_headers(input: Vec<(String, String)>, headers: &mut HeaderMap) {
    for (key, value) in input {
        if let (Ok(key), Ok(value)) = (HeaderName::from_str(&key), HeaderValue::from_str(&value)) {
            headers.insert(key, value);
        }
    }
}

/// Expose interface for modifying the [HttpConfig] within the exporter builders.
pub trait HasHttpConfig {
    /// Return a mutable reference to the [HttpConfig] within the exporter builders.
    fn http_client_config(&mut self) -> &mut HttpConfig;
}

/// Expose interface for modifying [HttpConfig] fields within the [HttpExporterBuilder].
impl HasHttpConfig for HttpExporterBuilder {
    fn http_client_config(&mut self) -> &mut HttpConfig {
        &mut self.http_config
    }
}

/// Expose methods to override [HttpConfig].
///
/// This trait will be implemented for every struct that implemented [`HasHttpConfig`] trait.
///
/// ## Examples
/// ```
/// use opentelemetry_otlp_transmission::WithHttpConfig;
/// use std::collections::HashMap;
///
/// let exporter_builder = opentelemetry_otlp_transmission::LogExporter::builder()
///     .with_http()
///     .with_headers(HashMap::from([("x-tenant".to_string(), "acme".to_string())]));
/// ```
pub trait WithHttpConfig {
    /// Assign client implementation
    fn with_http_client<T: HttpClient + 'static>(self, client: T) -> Self;

    /// Set additional headers to send to the collector.
    fn with_headers(self, headers: HashMap<String, String>) -> Self;
}

impl<B: HasHttpConfig> WithHttpConfig for B {
    fn with_http_client<T: HttpClient + 'static>(mut self, client: T) -> Self {
        self.http_client_config().client = Some(Arc::new(client));
        self
    }

    fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        // headers will be wrapped, so we must do some logic to unwrap first.
        let http_client_headers = self
            .http_client_config()
            .headers
            .get_or_insert(HashMap::new());
        headers.into_iter().for_each(|(key, value)| {
            http_client_headers.insert(key, super::url_decode(&value).unwrap_or(value));
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::tests::run_env_test;
    use crate::{
        OTEL_EXPORTER_OTLP_ENDPOINT, OTEL_EXPORTER_OTLP_HEADERS, OTEL_EXPORTER_OTLP_TRACES_ENDPOINT,
        OTEL_EXPORTER_OTLP_TRACES_HEADERS, OTEL_EXPORTER_OTLP_TRACES_TIMEOUT,
    };
    use http::StatusCode;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct RecordingClient {
        requests: Mutex<Vec<Request<Bytes>>>,
        status: Option<StatusCode>,
        retry_after: Option<&'static str>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl HttpClient for RecordingClient {
        async fn send_bytes(&self, request: Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
            self.requests.lock().unwrap().push(request);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let Some(status) = self.status else {
                return Err("connection refused".into());
            };
            let mut builder = Response::builder().status(status);
            if let Some(retry_after) = self.retry_after {
                builder = builder.header(http::header::RETRY_AFTER, retry_after);
            }
            Ok(builder.body(Bytes::new())?)
        }
    }

    fn build(client: RecordingClient) -> OtlpHttpClient {
        build_with(client)
    }

    fn deadline() -> SystemTime {
        SystemTime::now() + Duration::from_secs(30)
    }

    #[test]
    fn endpoint_resolution() {
        let signal_var = OTEL_EXPORTER_OTLP_TRACES_ENDPOINT;
        let cases: Vec<(Vec<(&'static str, &'static str)>, Option<&str>, &str)> = vec![
            // generic variable gets the signal path
            (
                vec![(OTEL_EXPORTER_OTLP_ENDPOINT, "http://otel:4318")],
                None,
                "http://otel:4318/v1/traces",
            ),
            // signal variable is used as is
            (
                vec![(signal_var, "http://otel:4318/ingest")],
                None,
                "http://otel:4318/ingest",
            ),
            (
                vec![
                    (signal_var, "http://traces:4318"),
                    (OTEL_EXPORTER_OTLP_ENDPOINT, "http://generic:4318"),
                ],
                None,
                "http://traces:4318/",
            ),
            (
                vec![
                    (signal_var, "http://traces:4318"),
                    (OTEL_EXPORTER_OTLP_ENDPOINT, "http://generic:4318"),
                ],
                Some("https://gateway.example/otlp/spans"),
                "https://gateway.example/otlp/spans",
            ),
            (vec![], None, "http://localhost:4318/v1/traces"),
            (vec![], Some(""), "http://localhost:4318/v1/traces"),
        ];

        for (vars, provided, expected) in cases {
            let lookup = |key: &str| vars.iter().find(|(k, _)| *k == key).map(|(_, v)| *v);
            let env = [
                (signal_var, lookup(signal_var)),
                (OTEL_EXPORTER_OTLP_ENDPOINT, lookup(OTEL_EXPORTER_OTLP_ENDPOINT)),
            ];
            temp_env::with_vars(env, || {
                let endpoint = resolve_endpoint(signal_var, "/v1/traces", provided).unwrap();
                assert_eq!(endpoint.to_string(), expected, "env {vars:?}");
            });
        }
    }

    #[test]
    fn test_build_endpoint_uri() {
        let uri = build_endpoint_uri("https://example.com", "/v1/traces").unwrap();
        assert_eq!(uri, "https://example.com/v1/traces");

        // Should be no duplicate slahes:
        let uri = build_endpoint_uri("https://example.com/", "/v1/traces").unwrap();
        assert_eq!(uri, "https://example.com/v1/traces");

        // Append paths properly:
        let uri = build_endpoint_uri("https://example.com/additional/path/", "/v1/traces").unwrap();
        assert_eq!(uri, "https://example.com/additional/path/v1/traces");
    }

    #[test]
    fn test_invalid_uri_in_signal_env_falls_back_to_generic_env() {
        run_env_test(
            vec![
                (
                    OTEL_EXPORTER_OTLP_TRACES_ENDPOINT,
                    "-*/*-/*-//-/-/invalid-uri",
                ),
                (OTEL_EXPORTER_OTLP_ENDPOINT, "http://example.com"),
            ],
            || {
                let endpoint =
                    super::resolve_endpoint(OTEL_EXPORTER_OTLP_TRACES_ENDPOINT, "/v1/traces", None)
                        .unwrap();
                assert_eq!(endpoint, "http://example.com/v1/traces");
            },
        );
    }

    #[test]
    fn test_invalid_provided_endpoint_is_an_error() {
        run_env_test(vec![], || {
            let result = super::resolve_endpoint(
                OTEL_EXPORTER_OTLP_TRACES_ENDPOINT,
                "/v1/traces",
                Some("-*/*-/*-//-/-/yet-another-invalid-uri"),
            );
            assert!(matches!(result, Err(ExporterBuildError::InvalidUri(_, _))));
        });
    }

    #[test]
    fn test_add_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("k1"),
            HeaderValue::from_static("v1"),
        );
        run_env_test(
            vec![
                (OTEL_EXPORTER_OTLP_TRACES_HEADERS, "k1=v1_new,k2=val=10,k3="),
                (OTEL_EXPORTER_OTLP_HEADERS, "k4=ignored"),
            ],
            || {
                super::add_headers(
                    headers_from_env(OTEL_EXPORTER_OTLP_TRACES_HEADERS),
                    &mut headers,
                );
            },
        );

        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("k1"), Some(&HeaderValue::from_static("v1_new")));
        assert_eq!(headers.get("k2"), Some(&HeaderValue::from_static("val=10")));
    }

    #[test]
    fn test_with_headers_decodes_values() {
        let builder = HttpExporterBuilder::default().with_headers(HashMap::from([(
            "authorization".to_string(),
            "Basic%20AAA".to_string(),
        )]));
        let headers = builder.http_config.headers.unwrap();
        assert_eq!(headers.get("authorization").unwrap(), "Basic AAA");
        assert!(headers.contains_key("User-Agent"));
    }

    #[test]
    fn test_missing_http_client_is_an_error() {
        let mut builder = HttpExporterBuilder::default();
        builder.http_config.client = None;
        let result = builder.build_client(
            Signal::Logs,
            "NON_EXISTENT_VAR",
            "NON_EXISTENT_VAR",
            "NON_EXISTENT_VAR",
        );
        assert!(matches!(result, Err(ExporterBuildError::NoHttpClient)));
    }

    #[test]
    fn test_timeout_resolved_from_env() {
        run_env_test(vec![(OTEL_EXPORTER_OTLP_TRACES_TIMEOUT, "1500")], || {
            let (_, timeout) = HttpExporterBuilder::default()
                .with_http_client(RecordingClient::default())
                .build_client(
                    Signal::Traces,
                    "NON_EXISTENT_VAR",
                    OTEL_EXPORTER_OTLP_TRACES_TIMEOUT,
                    "NON_EXISTENT_VAR",
                )
                .unwrap();
            assert_eq!(timeout, Duration::from_millis(1500));
        });
    }

    #[tokio::test]
    async fn test_posts_protobuf_payload() {
        let client = Arc::new(RecordingClient {
            status: Some(StatusCode::OK),
            ..Default::default()
        });
        let exporter_client = build_shared(client.clone());

        let response = exporter_client
            .send_export_request(
                Bytes::from_static(b"\x0a\x00"),
                deadline(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(response.success());

        let requests = client.requests.lock().unwrap();
        let request = &requests[0];
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.uri(), "http://localhost:4318/v1/traces");
        assert_eq!(request.headers()[CONTENT_TYPE], PROTOBUF_CONTENT_TYPE);
        assert_eq!(request.headers()["x-tenant"], "acme");
        assert!(request.headers().contains_key("user-agent"));
        assert_eq!(request.body().as_ref(), b"\x0a\x00");
    }

    #[tokio::test]
    async fn test_throttling_response_keeps_headers() {
        let client = build(RecordingClient {
            status: Some(StatusCode::TOO_MANY_REQUESTS),
            retry_after: Some("7"),
            ..Default::default()
        });

        let response = client
            .send_export_request(Bytes::new(), deadline(), &CancellationToken::new())
            .await
            .unwrap();
        let ExportClientResponse::Http(response) = response else {
            panic!("expected an http response");
        };
        assert!(!response.success);
        assert_eq!(response.status, Some(StatusCode::TOO_MANY_REQUESTS));
        assert_eq!(response.headers[http::header::RETRY_AFTER], "7");
    }

    #[tokio::test]
    async fn test_transport_error_is_captured() {
        let client = build(RecordingClient::default());

        let response = client
            .send_export_request(Bytes::new(), deadline(), &CancellationToken::new())
            .await
            .unwrap();
        let ExportClientResponse::Http(response) = response else {
            panic!("expected an http response");
        };
        assert_eq!(response.status, None);
        assert_eq!(response.error.as_deref(), Some("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_collector_times_out() {
        let client = build(RecordingClient {
            status: Some(StatusCode::OK),
            delay: Some(Duration::from_secs(60)),
            ..Default::default()
        });

        let response = client
            .send_export_request(Bytes::new(), deadline(), &CancellationToken::new())
            .await
            .unwrap();
        let ExportClientResponse::Http(response) = response else {
            panic!("expected an http response");
        };
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("request timed out"));
    }

    #[tokio::test]
    async fn test_shutdown_rejects_further_requests() {
        let client = build(RecordingClient {
            status: Some(StatusCode::OK),
            ..Default::default()
        });

        client.shutdown().unwrap();
        let result = client
            .send_export_request(Bytes::new(), deadline(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(OTelSdkError::AlreadyShutdown)));
        assert!(matches!(client.shutdown(), Err(OTelSdkError::AlreadyShutdown)));
    }

    #[derive(Debug)]
    struct SharedClient(Arc<RecordingClient>);

    #[async_trait]
    impl HttpClient for SharedClient {
        async fn send_bytes(&self, request: Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
            self.0.send_bytes(request).await
        }
    }

    fn build_shared(client: Arc<RecordingClient>) -> OtlpHttpClient {
        build_with(SharedClient(client))
    }

    fn build_with(client: impl HttpClient + 'static) -> OtlpHttpClient {
        let (client, _) = temp_env::with_vars_unset(
            [
                OTEL_EXPORTER_OTLP_ENDPOINT,
                OTEL_EXPORTER_OTLP_TRACES_ENDPOINT,
            ],
            || {
                HttpExporterBuilder::default()
                    .with_http_client(client)
                    .with_headers(HashMap::from([("x-tenant".to_string(), "acme".to_string())]))
                    .build_client(
                        Signal::Traces,
                        OTEL_EXPORTER_OTLP_TRACES_ENDPOINT,
                        "NON_EXISTENT_VAR",
                        "NON_EXISTENT_VAR",
                    )
            },
        )
        .unwrap();
        client
    }
}
