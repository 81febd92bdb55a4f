//! Upload orchestration: attempts, retry waits, cancellation and the final outcome.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::Stream;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderValue};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::aggregate::ErrorAggregator;
use super::constants::{ACCEPT_CONTENT_TYPE, ARCHIVE_CONTENT_TYPE};
use super::error::UploadError;
use super::monitor::{CancellationController, StallMonitor};
use super::retry::{RetryDecision, RetryDelay, RetryPolicy};
use super::source::{SharedByteSource, UploadRequest};
use super::transport::{PutRequest, ReqwestTransport, Transport};

/// Per-call upload options.
#[derive(Clone, Default)]
pub struct UploadOptions {
    /// Retry budget and delay function.
    pub retry: RetryPolicy,
    /// Optional stall monitor; without one the upload is never cancelled.
    pub stall_monitor: Option<Arc<dyn StallMonitor>>,
}

impl UploadOptions {
    /// Default options: two retries, geometric delay, no stall monitor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replaces the delay function, keeping the retry budget.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: RetryDelay) -> Self {
        self.retry = RetryPolicy::new(self.retry.max_retries(), delay);
        self
    }

    /// Replaces the retry budget, keeping the delay function.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry = RetryPolicy::new(max_retries, self.retry.delay().clone());
        self
    }

    /// Attaches a stall monitor.
    #[must_use]
    pub fn with_stall_monitor(mut self, monitor: Arc<dyn StallMonitor>) -> Self {
        self.stall_monitor = Some(monitor);
        self
    }
}

impl fmt::Debug for UploadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadOptions")
            .field("retry", &self.retry)
            .field("stall_monitor", &self.stall_monitor.is_some())
            .finish()
    }
}

/// Uploads archives through a [`Transport`].
///
/// Holds no per-upload state; one instance can serve concurrent calls.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use uploader_core::upload::{UploadOptions, UploadRequest, Uploader};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let uploader = Uploader::new();
/// let request =
///     UploadRequest::from_file("https://store.example/bundle.tar", Path::new("bundle.tar"))
///         .await?;
/// uploader.upload(request, &UploadOptions::new()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Uploader {
    transport: Arc<dyn Transport>,
}

impl Default for Uploader {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Uploader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Uploader").finish_non_exhaustive()
    }
}

impl Uploader {
    /// Creates an uploader over the default [`ReqwestTransport`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_transport(Arc::new(ReqwestTransport::new()))
    }

    /// Creates an uploader over a custom transport.
    #[must_use]
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Uploads `request`, retrying transient failures.
    ///
    /// Resolves successfully as soon as an attempt gets a status below 400;
    /// error bodies of earlier attempts are then dropped unread. When the stall
    /// monitor fires, its recorded reason is returned as-is and no further
    /// attempt is made.
    ///
    /// # Errors
    ///
    /// - [`UploadError::InvalidUrl`] if the destination does not parse
    /// - the single failure, if exactly one attempt failed
    /// - [`UploadError::Multiple`] with every attempt's error, in order, if
    ///   more than one attempt failed
    /// - the cancellation reason ([`UploadError::Stalled`] for the idle
    ///   monitor), or [`UploadError::Cancelled`] if none was recorded
    #[instrument(skip(self, request, options), fields(url = %request.url(), total_bytes = request.total_bytes()))]
    pub async fn upload(
        &self,
        request: UploadRequest,
        options: &UploadOptions,
    ) -> Result<(), UploadError> {
        let (url, total_bytes, source) = request.into_parts();
        Url::parse(&url).map_err(|_| UploadError::invalid_url(url.clone()))?;

        let (controller, source) = match &options.stall_monitor {
            Some(monitor) => (monitor.cancellation_controller(), monitor.monitor(source)),
            None => (CancellationController::new(), source),
        };
        let source = SharedByteSource::new(source, total_bytes);
        let headers = upload_headers(total_bytes);
        let token = controller.token();
        let mut aggregator = ErrorAggregator::new(url.clone());
        let mut attempt: u32 = 0;

        // A zero-length body is never polled by the client.
        if total_bytes == 0 {
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                () = source.finish() => {}
            }
        }

        loop {
            if controller.is_cancelled() {
                aggregator.discard();
                return Err(cancellation_error(&controller, &url));
            }

            debug!(attempt, "starting attempt");
            let result = self
                .transport
                .put(
                    PutRequest {
                        url: url.clone(),
                        headers: headers.clone(),
                        body: source.attempt_body(),
                    },
                    token.clone(),
                )
                .await;

            if controller.is_cancelled() {
                aggregator.discard();
                return Err(cancellation_error(&controller, &url));
            }

            let decision = match result {
                Ok(response) if response.is_success() => {
                    aggregator.discard();
                    info!(attempt, status = response.status, "upload complete");
                    return Ok(());
                }
                Ok(response) => {
                    let status = response.status;
                    warn!(attempt, status, "upload attempt rejected");
                    aggregator.record_http(attempt, response);
                    options.retry.decide(attempt, None, Some(status))
                }
                Err(error) => {
                    warn!(attempt, %error, "upload attempt failed");
                    let decision = options.retry.decide(attempt, Some(&error), None);
                    aggregator.record_network(attempt, error);
                    decision
                }
            };

            match decision {
                RetryDecision::Retry { delay, attempt: next } => {
                    info!(
                        attempt = next,
                        delay_ms = delay.as_millis(),
                        "retrying upload"
                    );
                    tokio::select! {
                        biased;
                        () = token.cancelled() => {}
                        () = tokio::time::sleep(delay) => {}
                    }
                    attempt = next;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(%reason, failures = aggregator.len(), "giving up");
                    return Err(aggregator.consolidate().await);
                }
            }
        }
    }
}

/// Uploads `source` to `url` with the default transport.
///
/// # Errors
///
/// Same as [`Uploader::upload`].
pub async fn upload(
    source: impl Stream<Item = std::io::Result<Bytes>> + Send + 'static,
    url: &str,
    total_bytes: u64,
    options: &UploadOptions,
) -> Result<(), UploadError> {
    Uploader::new()
        .upload(UploadRequest::new(url, total_bytes, source), options)
        .await
}

fn cancellation_error(controller: &CancellationController, url: &str) -> UploadError {
    let error = controller
        .take_reason()
        .unwrap_or_else(|| UploadError::cancelled(url));
    warn!(%error, "upload cancelled");
    error
}

fn upload_headers(total_bytes: u64) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_LENGTH, HeaderValue::from(total_bytes));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(ARCHIVE_CONTENT_TYPE));
    headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_CONTENT_TYPE));
    headers
}
