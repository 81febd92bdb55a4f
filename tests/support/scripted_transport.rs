//! In-memory [`Transport`] that answers each attempt from a fixed script.
//!
//! Every attempt drains its request body before answering, racing the drain
//! against the cancellation token the way a real client races the wire.

use std::collections::VecDeque;
use std::io;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::CONTENT_LENGTH;
use tokio_util::sync::CancellationToken;
use uploader_core::upload::{PutRequest, ResponseBody, Transport, TransportResponse, UploadError};

/// How one attempt is answered.
#[derive(Debug, Clone)]
pub enum Step {
    /// Respond with `status` and an empty body.
    Status(u16),
    /// Respond with `status` and a JSON body.
    Json(u16, &'static str),
    /// Respond with `status` and a body that never finishes reading.
    NeverEndingBody(u16),
    /// Fail with a connection reset.
    NetworkError,
    /// Never respond; only cancellation ends the attempt.
    Hang,
    /// Read only `content-length` bytes of the body, keep it open, then
    /// respond with `status` after the delay.
    SlowResponse(u16, Duration),
}

/// Scripted transport; attempts beyond the script get `200`.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    bodies: Mutex<Vec<Vec<u8>>>,
}

impl ScriptedTransport {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Number of attempts made.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Bytes each completed attempt read from its request body.
    pub fn bodies(&self) -> Vec<Vec<u8>> {
        self.bodies.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn put(
        &self,
        request: PutRequest,
        cancel: CancellationToken,
    ) -> Result<TransportResponse, UploadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Step::Status(200));
        let PutRequest {
            url,
            headers,
            mut body,
        } = request;
        // Stop at the declared length like an HTTP client does.
        let declared_length = match step {
            Step::SlowResponse(..) => headers
                .get(CONTENT_LENGTH)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<usize>().ok()),
            _ => None,
        };

        let exchange = async {
            let mut sent = Vec::new();
            while declared_length.is_none_or(|limit| sent.len() < limit) {
                let Some(chunk) = body.next().await else {
                    break;
                };
                match chunk {
                    Ok(chunk) => sent.extend_from_slice(&chunk),
                    Err(err) => return Err(UploadError::network(url.clone(), err)),
                }
            }
            self.bodies.lock().unwrap().push(sent);

            match step {
                Step::Status(status) => Ok(TransportResponse::new(status, ResponseBody::empty())),
                Step::Json(status, json) => Ok(TransportResponse::new(
                    status,
                    ResponseBody::from_bytes(json.as_bytes()),
                )),
                Step::NeverEndingBody(status) => Ok(TransportResponse::new(
                    status,
                    ResponseBody::new(futures_util::future::pending()),
                )),
                Step::NetworkError => Err(UploadError::network(
                    url.clone(),
                    io::Error::new(io::ErrorKind::ConnectionReset, "connection reset by peer"),
                )),
                Step::Hang => futures_util::future::pending().await,
                Step::SlowResponse(status, delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(TransportResponse::new(status, ResponseBody::empty()))
                }
            }
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(UploadError::cancelled(url.clone())),
            result = exchange => result,
        }
    }
}
