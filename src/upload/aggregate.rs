//! Failure bookkeeping across the attempts of one upload call.
//!
//! HTTP error bodies are read in the background while the next attempt runs.
//! [`ErrorAggregator::consolidate`] joins those reads in attempt order before
//! building the final error; [`ErrorAggregator::discard`] (or dropping the
//! aggregator) aborts them instead.

use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::error::UploadError;
use super::transport::{ResponseBody, TransportResponse};

/// How an attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Status below 400.
    Success,
    /// Connection-level failure before a response arrived.
    NetworkError,
    /// Status 400 or above.
    HttpError,
}

/// What is known about one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    /// 0-based attempt index.
    pub index: u32,
    /// How the attempt ended.
    pub outcome: AttemptOutcome,
    /// Response status, if a response arrived.
    pub status: Option<u16>,
    /// Response status text, if a response arrived.
    pub status_text: Option<String>,
    /// Message from the error body; set once enrichment has resolved.
    pub message: Option<String>,
}

enum PendingFailure {
    Network(UploadError),
    Http {
        status: u16,
        enrichment: JoinHandle<String>,
    },
}

struct PendingAttempt {
    record: AttemptRecord,
    failure: PendingFailure,
}

/// Collects failed attempts of one upload call, in attempt order.
pub struct ErrorAggregator {
    url: String,
    pending: Vec<PendingAttempt>,
}

impl ErrorAggregator {
    /// Creates an empty aggregator for uploads to `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pending: Vec::new(),
        }
    }

    /// Number of recorded failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Records a connection-level failure. The error is kept as-is.
    pub fn record_network(&mut self, attempt_index: u32, error: UploadError) {
        debug!(attempt = attempt_index, %error, "recording network failure");
        self.pending.push(PendingAttempt {
            record: AttemptRecord {
                index: attempt_index,
                outcome: AttemptOutcome::NetworkError,
                status: None,
                status_text: None,
                message: None,
            },
            failure: PendingFailure::Network(error),
        });
    }

    /// Records an error response and starts reading its body in the background.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn record_http(&mut self, attempt_index: u32, response: TransportResponse) {
        let TransportResponse {
            status,
            status_text,
            body,
            ..
        } = response;
        debug!(attempt = attempt_index, status, "recording HTTP failure");

        let fallback = if status_text.is_empty() {
            format!("HTTP {status}")
        } else {
            status_text.clone()
        };
        let enrichment = tokio::spawn(enrich_message(body, fallback));

        self.pending.push(PendingAttempt {
            record: AttemptRecord {
                index: attempt_index,
                outcome: AttemptOutcome::HttpError,
                status: Some(status),
                status_text: Some(status_text),
                message: None,
            },
            failure: PendingFailure::Http { status, enrichment },
        });
    }

    /// Awaits every pending enrichment and folds the failures into one error.
    ///
    /// One failure is returned unwrapped; several become
    /// [`UploadError::Multiple`] in attempt order. An aggregator with nothing
    /// recorded yields an empty composite.
    pub async fn consolidate(self) -> UploadError {
        self.consolidate_with_records().await.1
    }

    /// Like [`consolidate`](Self::consolidate), also returning the resolved records.
    pub async fn consolidate_with_records(mut self) -> (Vec<AttemptRecord>, UploadError) {
        let pending = std::mem::take(&mut self.pending);
        let mut records = Vec::with_capacity(pending.len());
        let mut errors = Vec::with_capacity(pending.len());

        for PendingAttempt {
            mut record,
            failure,
        } in pending
        {
            let error = match failure {
                PendingFailure::Network(error) => error,
                PendingFailure::Http { status, enrichment } => {
                    let message = match enrichment.await {
                        Ok(message) => message,
                        Err(join_error) => {
                            warn!(attempt = record.index, error = %join_error, "error body task failed");
                            record
                                .status_text
                                .clone()
                                .filter(|text| !text.is_empty())
                                .unwrap_or_else(|| format!("HTTP {status}"))
                        }
                    };
                    record.message = Some(message.clone());
                    UploadError::http(self.url.clone(), status, message)
                }
            };
            debug!(
                attempt = record.index,
                outcome = ?record.outcome,
                status = ?record.status,
                message = ?record.message,
                "failed attempt"
            );
            records.push(record);
            errors.push(error);
        }

        let error = if errors.len() == 1 {
            errors.remove(0)
        } else {
            UploadError::multiple(errors)
        };
        (records, error)
    }

    /// Abandons pending enrichments without awaiting them.
    pub fn discard(self) {
        if !self.pending.is_empty() {
            debug!(
                discarded = self.pending.len(),
                "discarding earlier failed attempts"
            );
        }
    }
}

impl Drop for ErrorAggregator {
    fn drop(&mut self) {
        for attempt in &self.pending {
            if let PendingFailure::Http { enrichment, .. } = &attempt.failure {
                enrichment.abort();
            }
        }
    }
}

async fn enrich_message(body: ResponseBody, fallback: String) -> String {
    match body.bytes().await {
        Ok(bytes) => message_from_json(&bytes).unwrap_or(fallback),
        Err(error) => {
            debug!(%error, "could not read error body");
            fallback
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    Text(String),
    Object {
        message: Option<String>,
        error: Option<ErrorDetail>,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorDetail {
    Text(String),
    Object { message: String },
}

/// Extracts a message from a JSON error body.
///
/// Accepts a bare JSON string, `{"message": ".."}`, `{"error": ".."}` and
/// `{"error": {"message": ".."}}`.
pub(crate) fn message_from_json(bytes: &[u8]) -> Option<String> {
    let message = match serde_json::from_slice::<ErrorBody>(bytes).ok()? {
        ErrorBody::Text(text) => Some(text),
        ErrorBody::Object { message, error } => message.or_else(|| {
            error.map(|detail| match detail {
                ErrorDetail::Text(text) | ErrorDetail::Object { message: text } => text,
            })
        }),
    }?;
    let message = message.trim();
    (!message.is_empty()).then(|| message.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    const URL: &str = "https://store.example/bundle.tar";

    fn json_response(status: u16, body: &'static str) -> TransportResponse {
        TransportResponse::new(status, ResponseBody::from_bytes(body.as_bytes()))
    }

    // ==================== JSON Message Tests ====================

    #[test]
    fn test_message_from_json_shapes() {
        assert_eq!(
            message_from_json(br#"{"message":"bucket missing"}"#),
            Some("bucket missing".to_string())
        );
        assert_eq!(
            message_from_json(br#"{"error":"quota exceeded"}"#),
            Some("quota exceeded".to_string())
        );
        assert_eq!(
            message_from_json(br#"{"error":{"message":"bad archive"}}"#),
            Some("bad archive".to_string())
        );
        assert_eq!(
            message_from_json(br#""plain json string""#),
            Some("plain json string".to_string())
        );
    }

    #[test]
    fn test_message_from_json_rejects_unusable_bodies() {
        assert_eq!(message_from_json(b""), None);
        assert_eq!(message_from_json(b"<html>oops</html>"), None);
        assert_eq!(message_from_json(b"[1,2,3]"), None);
        assert_eq!(message_from_json(br#"{"code":17}"#), None);
        assert_eq!(message_from_json(br#"{"message":"   "}"#), None);
    }

    // ==================== Consolidation Tests ====================

    #[tokio::test]
    async fn test_single_failure_is_returned_unwrapped() {
        let mut aggregator = ErrorAggregator::new(URL);
        aggregator.record_http(0, json_response(404, r#"{"message":"no such bucket"}"#));

        match aggregator.consolidate().await {
            UploadError::Http {
                status,
                message,
                url,
            } => {
                assert_eq!(status, 404);
                assert_eq!(message, "no such bucket");
                assert_eq!(url, URL);
            }
            other => panic!("expected Http, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unparseable_body_falls_back_to_status_text() {
        let mut aggregator = ErrorAggregator::new(URL);
        aggregator.record_http(0, json_response(502, "upstream exploded"));

        let (records, error) = aggregator.consolidate_with_records().await;
        assert_eq!(records[0].message.as_deref(), Some("Bad Gateway"));
        assert!(matches!(error, UploadError::Http { status: 502, ref message, .. } if message == "Bad Gateway"));
    }

    #[tokio::test]
    async fn test_unreadable_body_falls_back_to_status_text() {
        let mut aggregator = ErrorAggregator::new(URL);
        let body = ResponseBody::new(async { Err(UploadError::timeout(URL)) });
        aggregator.record_http(0, TransportResponse::new(503, body));

        let error = aggregator.consolidate().await;
        assert!(
            matches!(error, UploadError::Http { status: 503, ref message, .. } if message == "Service Unavailable")
        );
    }

    #[tokio::test]
    async fn test_multiple_failures_keep_attempt_order() {
        let mut aggregator = ErrorAggregator::new(URL);
        aggregator.record_network(0, UploadError::timeout(URL));
        // Slow body on the second attempt must still land in position 1.
        let slow = ResponseBody::new(async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(bytes::Bytes::from_static(br#"{"message":"slow"}"#))
        });
        aggregator.record_http(1, TransportResponse::new(503, slow));
        aggregator.record_http(2, json_response(400, r#"{"message":"fast"}"#));
        assert_eq!(aggregator.len(), 3);

        let (records, error) = aggregator.consolidate_with_records().await;
        let indices: Vec<u32> = records.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(records[0].outcome, AttemptOutcome::NetworkError);
        assert_eq!(records[1].message.as_deref(), Some("slow"));

        let errors = error.errors().unwrap();
        assert_eq!(errors.len(), 3);
        assert!(matches!(errors[0], UploadError::Timeout { .. }));
        assert_eq!(errors[1].status(), Some(503));
        assert_eq!(errors[2].status(), Some(400));
    }

    #[tokio::test]
    async fn test_empty_aggregator_consolidates_to_empty_composite() {
        let aggregator = ErrorAggregator::new(URL);
        assert!(aggregator.is_empty());
        let error = aggregator.consolidate().await;
        assert_eq!(error.errors().map(<[UploadError]>::len), Some(0));
    }

    #[tokio::test]
    async fn test_discard_does_not_wait_for_pending_bodies() {
        let mut aggregator = ErrorAggregator::new(URL);
        let never = ResponseBody::new(futures_util::future::pending());
        aggregator.record_http(0, TransportResponse::new(503, never));

        tokio::time::timeout(Duration::from_secs(1), async move { aggregator.discard() })
            .await
            .unwrap();
    }
}
