//! Cancellation signal and stall detection for upload streams.
//!
//! A [`StallMonitor`] hands the orchestrator a [`CancellationController`] and
//! wraps the outgoing byte stream so every chunk read counts as activity.
//! [`IdleStallMonitor`] fires the controller with [`UploadError::Stalled`]
//! once no chunk has been read for longer than its threshold.

use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::Stream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::UploadError;
use super::source::ByteStream;

/// Shared cancellation signal for one upload call.
///
/// Once cancelled it stays cancelled. The first recorded reason wins.
#[derive(Debug, Clone, Default)]
pub struct CancellationController {
    token: CancellationToken,
    reason: Arc<Mutex<Option<UploadError>>>,
}

impl CancellationController {
    /// Creates a controller that has not fired.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Token observed by the transport.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Returns true once the controller has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fires without a reason.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Fires and records `reason` as the final error of the upload.
    ///
    /// Ignored if the controller already fired.
    pub fn cancel_with(&self, reason: UploadError) {
        let mut slot = self.reason.lock().unwrap_or_else(PoisonError::into_inner);
        if self.token.is_cancelled() {
            debug!(%reason, "cancellation already fired; dropping reason");
            return;
        }
        *slot = Some(reason);
        self.token.cancel();
    }

    /// Takes the recorded reason, if any.
    pub(crate) fn take_reason(&self) -> Option<UploadError> {
        self.reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Activity monitor consulted once at the start of an upload call.
pub trait StallMonitor: Send + Sync {
    /// Controller whose token aborts in-flight attempts.
    fn cancellation_controller(&self) -> CancellationController;

    /// Wraps the payload stream so reads are observed.
    fn monitor(&self, stream: ByteStream) -> ByteStream;
}

/// Fires cancellation when no chunk has been read for `threshold`.
///
/// One monitor serves one upload call: its controller is terminal once fired.
/// [`StallMonitor::monitor`] spawns a watchdog task and must be called from
/// within a Tokio runtime. The watchdog stops when the wrapped stream ends or
/// is dropped.
#[derive(Debug, Clone)]
pub struct IdleStallMonitor {
    threshold: Duration,
    controller: CancellationController,
}

impl IdleStallMonitor {
    /// Creates a monitor with the given idle threshold.
    #[must_use]
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            controller: CancellationController::new(),
        }
    }

    /// Idle threshold.
    #[must_use]
    pub fn threshold(&self) -> Duration {
        self.threshold
    }
}

impl StallMonitor for IdleStallMonitor {
    fn cancellation_controller(&self) -> CancellationController {
        self.controller.clone()
    }

    fn monitor(&self, stream: ByteStream) -> ByteStream {
        let last_read = Arc::new(Mutex::new(Instant::now()));
        let stop = CancellationToken::new();

        tokio::spawn(watch_for_stall(
            self.threshold,
            Arc::clone(&last_read),
            self.controller.clone(),
            stop.clone(),
        ));

        Box::pin(MonitoredStream {
            inner: stream,
            last_read,
            stop,
        })
    }
}

async fn watch_for_stall(
    threshold: Duration,
    last_read: Arc<Mutex<Instant>>,
    controller: CancellationController,
    stop: CancellationToken,
) {
    let mut interval = tokio::time::interval((threshold / 4).max(Duration::from_millis(10)));
    loop {
        tokio::select! {
            () = stop.cancelled() => return,
            () = controller.token.cancelled() => return,
            _ = interval.tick() => {
                let idle = last_read
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .elapsed();
                if idle > threshold {
                    warn!(
                        idle_ms = idle.as_millis(),
                        threshold_ms = threshold.as_millis(),
                        "upload stalled, cancelling"
                    );
                    controller.cancel_with(UploadError::stalled(idle, threshold));
                    return;
                }
            }
        }
    }
}

struct MonitoredStream {
    inner: ByteStream,
    last_read: Arc<Mutex<Instant>>,
    stop: CancellationToken,
}

impl Stream for MonitoredStream {
    type Item = std::io::Result<bytes::Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.inner.as_mut().poll_next(cx);
        match &polled {
            Poll::Ready(Some(Ok(_))) => {
                *self.last_read.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
            }
            // Nothing left to stall on.
            Poll::Ready(None) => self.stop.cancel(),
            _ => {}
        }
        polled
    }
}

impl Drop for MonitoredStream {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use bytes::Bytes;
    use futures_util::{StreamExt, stream};

    use super::*;

    fn stalling_source() -> ByteStream {
        let head = Ok::<_, std::io::Error>(Bytes::from_static(b"first chunk"));
        Box::pin(stream::iter(vec![head]).chain(stream::pending()))
    }

    #[test]
    fn test_cancel_with_keeps_first_reason() {
        let controller = CancellationController::new();
        controller.cancel_with(UploadError::cancelled("first"));
        controller.cancel_with(UploadError::cancelled("second"));

        assert!(controller.is_cancelled());
        match controller.take_reason() {
            Some(UploadError::Cancelled { url }) => assert_eq!(url, "first"),
            other => panic!("expected first reason, got: {other:?}"),
        }
        assert!(controller.take_reason().is_none());
    }

    #[test]
    fn test_plain_cancel_records_no_reason() {
        let controller = CancellationController::new();
        let token = controller.token();
        controller.cancel();
        assert!(token.is_cancelled());
        assert!(controller.take_reason().is_none());
    }

    #[tokio::test]
    async fn test_idle_monitor_fires_on_stall() {
        let monitor = IdleStallMonitor::new(Duration::from_millis(50));
        let controller = monitor.cancellation_controller();
        let mut stream = monitor.monitor(stalling_source());

        assert!(stream.next().await.is_some());
        tokio::time::timeout(Duration::from_secs(5), controller.token().cancelled())
            .await
            .unwrap();

        match controller.take_reason() {
            Some(UploadError::Stalled { idle, threshold }) => {
                assert_eq!(threshold, Duration::from_millis(50));
                assert!(idle > threshold);
            }
            other => panic!("expected Stalled, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_idle_monitor_quiet_while_data_flows() {
        let monitor = IdleStallMonitor::new(Duration::from_millis(200));
        let controller = monitor.cancellation_controller();
        let mut stream = monitor.monitor(Box::pin(
            stream::iter(0..10).then(|_| async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok::<_, std::io::Error>(Bytes::from_static(b"x"))
            }),
        ));

        let mut chunks = 0;
        while let Some(chunk) = stream.next().await {
            chunk.unwrap();
            chunks += 1;
        }
        assert_eq!(chunks, 10);
        assert!(!controller.is_cancelled());
    }

    #[tokio::test]
    async fn test_idle_monitor_stops_after_stream_dropped() {
        let monitor = IdleStallMonitor::new(Duration::from_millis(30));
        let controller = monitor.cancellation_controller();
        let stream = monitor.monitor(stalling_source());
        drop(stream);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!controller.is_cancelled());
    }
}
