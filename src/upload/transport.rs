//! Transport seam: one HTTP PUT attempt per call.
//!
//! [`Transport`] is the narrow interface the orchestrator drives. The default
//! implementation, [`ReqwestTransport`], streams the body through reqwest
//! without buffering and aborts the in-flight request when the cancellation
//! token fires.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use reqwest::header::HeaderMap;
use reqwest::{Body, Client, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::constants::CONNECT_TIMEOUT_SECS;
use super::error::UploadError;
use super::source::ByteStream;
use crate::user_agent;

/// One PUT attempt handed to a [`Transport`].
pub struct PutRequest {
    /// Destination URL.
    pub url: String,
    /// Request headers.
    pub headers: HeaderMap,
    /// Streaming request body.
    pub body: ByteStream,
}

impl fmt::Debug for PutRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PutRequest")
            .field("url", &self.url)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Response body that is read lazily, at most once.
pub struct ResponseBody(BoxFuture<'static, Result<Bytes, UploadError>>);

impl ResponseBody {
    /// Wraps a future that yields the full body.
    pub fn new(read: impl Future<Output = Result<Bytes, UploadError>> + Send + 'static) -> Self {
        Self(Box::pin(read))
    }

    /// Body that is already in memory.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self::new(async move { Ok(bytes) })
    }

    /// Empty body.
    #[must_use]
    pub fn empty() -> Self {
        Self::from_bytes(Bytes::new())
    }

    /// Reads the whole body, consuming it.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if the body cannot be read.
    pub async fn bytes(self) -> Result<Bytes, UploadError> {
        self.0.await
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResponseBody(..)")
    }
}

/// Status, headers and lazy body of one attempt's response.
#[derive(Debug)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Canonical reason phrase for `status`, empty if unknown.
    pub status_text: String,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body, not yet read.
    pub body: ResponseBody,
}

impl TransportResponse {
    /// Creates a response with the canonical status text and no headers.
    #[must_use]
    pub fn new(status: u16, body: ResponseBody) -> Self {
        Self {
            status,
            status_text: canonical_status_text(status),
            headers: HeaderMap::new(),
            body,
        }
    }

    /// Returns true for statuses below 400.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status < 400
    }
}

fn canonical_status_text(status: u16) -> String {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or_default()
        .to_string()
}

/// Performs a single PUT attempt.
///
/// Implementations must stream `request.body` without buffering it whole and
/// must fail with [`UploadError::Cancelled`] once `cancel` fires mid-attempt.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one PUT and returns the response head with a lazy body.
    async fn put(
        &self,
        request: PutRequest,
        cancel: CancellationToken,
    ) -> Result<TransportResponse, UploadError>;
}

/// [`Transport`] backed by a pooled reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ReqwestTransport {
    /// Creates a transport with the default connect timeout and no read timeout.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    pub fn new() -> Self {
        Self::new_with_timeouts(CONNECT_TIMEOUT_SECS, None)
    }

    /// Creates a transport with explicit timeouts.
    ///
    /// `read_timeout_secs` bounds each read of the response; uploads of large
    /// files leave it unset and rely on the stall monitor instead.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the supplied
    /// timeout configuration.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new_with_timeouts(connect_timeout_secs: u64, read_timeout_secs: Option<u64>) -> Self {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .user_agent(user_agent::default_upload_user_agent());
        if let Some(read_timeout_secs) = read_timeout_secs {
            builder = builder.read_timeout(Duration::from_secs(read_timeout_secs));
        }
        let client = builder
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self { client }
    }

    /// Wraps an already configured reqwest client.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Returns a reference to the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[instrument(skip(self, request, cancel), fields(url = %request.url))]
    async fn put(
        &self,
        request: PutRequest,
        cancel: CancellationToken,
    ) -> Result<TransportResponse, UploadError> {
        let PutRequest { url, headers, body } = request;

        let send = self
            .client
            .put(&url)
            .headers(headers)
            .body(Body::wrap_stream(body))
            .send();

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("cancellation fired, aborting request");
                return Err(UploadError::cancelled(url));
            }
            result = send => result.map_err(|e| map_send_error(&url, e))?,
        };

        let status = response.status();
        let headers = response.headers().clone();
        debug!(status = status.as_u16(), "response received");

        let body_url = url.clone();
        Ok(TransportResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body: ResponseBody::new(async move {
                response
                    .bytes()
                    .await
                    .map_err(|e| UploadError::network(body_url, e))
            }),
        })
    }
}

fn map_send_error(url: &str, error: reqwest::Error) -> UploadError {
    if error.is_timeout() {
        UploadError::timeout(url)
    } else {
        UploadError::network(url, error)
    }
}
