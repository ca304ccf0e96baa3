//! Drives export attempts for one serialized batch.
//!
//! A [`TransmissionHandler`] owns an [`ExportClient`] and sends a payload
//! either once or, in [`RetryMode::Retry`], until it is accepted, a response
//! is not retryable or the export timeout runs out. Attempts of one payload
//! are strictly sequential; the only wait between them is a backoff sleep
//! that [`TransmissionHandler::shutdown`] interrupts.

use std::time::{Duration, SystemTime};

use bytes::Bytes;
use opentelemetry::{otel_debug, otel_info, otel_warn};
use opentelemetry_sdk::error::{OTelSdkError, OTelSdkResult};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::exporter::client::{ExportClient, ExportClientResponse};
use crate::retry::{try_get_retry_result, INITIAL_BACKOFF_MILLISECONDS};
use crate::transform::{SerializationError, Signal};

/// Whether failed attempts are retried.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RetryMode {
    /// A single attempt per export.
    #[default]
    None,
    /// Retry transient failures with exponential backoff until the export
    /// timeout expires.
    Retry,
}

/// Sends payloads through an [`ExportClient`], retrying as configured.
#[derive(Debug)]
pub struct TransmissionHandler {
    client: Box<dyn ExportClient>,
    signal: Signal,
    timeout: Duration,
    retry_mode: RetryMode,
    cancellation: CancellationToken,
}

/// Why a transmission gave up.
enum Failure {
    NonRetryable(ExportClientResponse),
    DeadlineExceeded(Option<ExportClientResponse>),
    Cancelled,
}

impl TransmissionHandler {
    /// Create a handler sending `signal` payloads through `client`, each
    /// export limited to `timeout` overall.
    pub fn new(
        client: impl ExportClient + 'static,
        signal: Signal,
        timeout: Duration,
        retry_mode: RetryMode,
    ) -> Self {
        TransmissionHandler {
            client: Box::new(client),
            signal,
            timeout,
            retry_mode,
            cancellation: CancellationToken::new(),
        }
    }

    /// The overall time budget of one export.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The configured retry behaviour.
    pub fn retry_mode(&self) -> RetryMode {
        self.retry_mode
    }

    /// Deliver `body`, retrying according to the retry mode.
    ///
    /// Every failure is reported as [`OTelSdkError::InternalFailure`], except
    /// calls made after [`shutdown`](Self::shutdown), which return
    /// [`OTelSdkError::AlreadyShutdown`].
    pub async fn transmit(&self, body: Bytes) -> OTelSdkResult {
        if self.cancellation.is_cancelled() {
            return Err(OTelSdkError::AlreadyShutdown);
        }

        let deadline = Instant::now() + self.timeout;
        let (attempts, outcome) = match self.retry_mode {
            RetryMode::None => (1, self.attempt_once(&body, deadline).await),
            RetryMode::Retry => self.attempt_with_retry(&body, deadline).await,
        };

        match outcome {
            Ok(Ok(())) => {
                otel_debug!(
                    name: "TransmissionHandler.ExportSucceeded",
                    signal = self.signal.as_str(),
                    attempts = attempts
                );
                Ok(())
            }
            Ok(Err(failure)) => Err(self.report(failure, attempts)),
            Err(error) => Err(error),
        }
    }

    /// Cancel any pending attempt or backoff and reject further exports.
    pub fn shutdown(&self) -> OTelSdkResult {
        if self.cancellation.is_cancelled() {
            return Err(OTelSdkError::AlreadyShutdown);
        }
        self.cancellation.cancel();
        otel_debug!(name: "TransmissionHandler.Shutdown", signal = self.signal.as_str());
        self.client.shutdown()
    }

    async fn attempt_once(
        &self,
        body: &Bytes,
        deadline: Instant,
    ) -> Result<Result<(), Failure>, OTelSdkError> {
        let response = self.send(body, deadline).await?;
        Ok(if response.success() {
            Ok(())
        } else if self.cancellation.is_cancelled() {
            Err(Failure::Cancelled)
        } else {
            Err(Failure::NonRetryable(response))
        })
    }

    async fn attempt_with_retry(
        &self,
        body: &Bytes,
        deadline: Instant,
    ) -> (u32, Result<Result<(), Failure>, OTelSdkError>) {
        let mut attempts = 0;
        let mut retry_delay_milliseconds = INITIAL_BACKOFF_MILLISECONDS;
        let mut last_response = None;

        loop {
            if deadline <= Instant::now() {
                return (attempts, Ok(Err(Failure::DeadlineExceeded(last_response))));
            }

            attempts += 1;
            let response = match self.send(body, deadline).await {
                Ok(response) => response,
                Err(error) => return (attempts, Err(error)),
            };
            if response.success() {
                return (attempts, Ok(Ok(())));
            }
            if self.cancellation.is_cancelled() {
                return (attempts, Ok(Err(Failure::Cancelled)));
            }

            otel_debug!(
                name: "TransmissionHandler.AttemptFailed",
                signal = self.signal.as_str(),
                attempt = attempts,
                reason = response.to_string()
            );

            let Some(retry) = try_get_retry_result(&response, retry_delay_milliseconds) else {
                let failure = if response.deadline() <= SystemTime::now() {
                    Failure::DeadlineExceeded(Some(response))
                } else {
                    Failure::NonRetryable(response)
                };
                return (attempts, Ok(Err(failure)));
            };

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return (attempts, Ok(Err(Failure::DeadlineExceeded(Some(response)))));
            }
            let delay = retry.retry_delay.min(remaining);

            otel_debug!(
                name: "TransmissionHandler.RetryScheduled",
                signal = self.signal.as_str(),
                attempt = attempts,
                delay_in_millisecs = delay.as_millis() as u64,
                throttled = retry.throttled
            );

            tokio::select! {
                biased;
                _ = self.cancellation.cancelled() => {
                    return (attempts, Ok(Err(Failure::Cancelled)));
                }
                _ = tokio::time::sleep(delay) => {}
            }

            retry_delay_milliseconds = retry.next_retry_delay_milliseconds;
            last_response = Some(response);
        }
    }

    /// One attempt under the time left before `deadline`.
    async fn send(
        &self,
        body: &Bytes,
        deadline: Instant,
    ) -> Result<ExportClientResponse, OTelSdkError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let attempt_deadline = SystemTime::now()
            .checked_add(remaining)
            .unwrap_or_else(SystemTime::now);
        self.client
            .send_export_request(body.clone(), attempt_deadline, &self.cancellation)
            .await
    }

    fn report(&self, failure: Failure, attempts: u32) -> OTelSdkError {
        match failure {
            Failure::NonRetryable(response) => {
                let reason = response.to_string();
                otel_warn!(
                    name: "TransmissionHandler.ExportFailed",
                    signal = self.signal.as_str(),
                    attempts = attempts,
                    reason = reason.as_str()
                );
                OTelSdkError::InternalFailure(format!(
                    "{} export failed after {attempts} attempt(s): {reason}",
                    self.signal
                ))
            }
            Failure::DeadlineExceeded(response) => {
                let reason = response
                    .map(|response| response.to_string())
                    .unwrap_or_else(|| "no attempt completed".to_string());
                otel_warn!(
                    name: "TransmissionHandler.DeadlineExceeded",
                    signal = self.signal.as_str(),
                    attempts = attempts,
                    timeout_in_millisecs = self.timeout.as_millis() as u64,
                    reason = reason.as_str()
                );
                OTelSdkError::InternalFailure(format!(
                    "{} export did not complete within {:?} after {attempts} attempt(s): {reason}",
                    self.signal, self.timeout
                ))
            }
            Failure::Cancelled => {
                otel_info!(
                    name: "TransmissionHandler.ExportCancelled",
                    signal = self.signal.as_str(),
                    attempts = attempts
                );
                OTelSdkError::InternalFailure(format!(
                    "{} export cancelled by shutdown",
                    self.signal
                ))
            }
        }
    }
}

/// The serialization buffer of a signal exporter and the handler sending it.
///
/// The buffer starts empty, is sized on first use and is reused by every
/// export; it only ever grows.
#[derive(Debug)]
pub(crate) struct BufferedTransmission {
    handler: TransmissionHandler,
    buffer: Mutex<Vec<u8>>,
}

impl BufferedTransmission {
    pub(crate) fn new(handler: TransmissionHandler) -> Self {
        BufferedTransmission {
            handler,
            buffer: Mutex::new(Vec::new()),
        }
    }

    /// Serialize a batch with `write` and transmit the result.
    ///
    /// `write` receives the buffer and returns the end of the payload.
    pub(crate) async fn export<F>(&self, write: F) -> OTelSdkResult
    where
        F: FnOnce(&mut Vec<u8>) -> Result<usize, SerializationError>,
    {
        let body = {
            let mut buffer = self.buffer.lock().await;
            let end = write(&mut buffer).map_err(|e| {
                otel_warn!(
                    name: "TransmissionHandler.SerializationFailed",
                    signal = self.handler.signal.as_str(),
                    error = e.to_string()
                );
                OTelSdkError::InternalFailure(e.to_string())
            })?;
            Bytes::copy_from_slice(&buffer[..end])
        };
        self.handler.transmit(body).await
    }

    pub(crate) fn handler(&self) -> &TransmissionHandler {
        &self.handler
    }

    pub(crate) fn shutdown(&self) -> OTelSdkResult {
        self.handler.shutdown()
    }
}
