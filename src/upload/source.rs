//! Upload requests and the single-use byte source behind them.

use std::fmt;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{Stream, StreamExt, stream};
use tokio::sync::Mutex;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use super::constants::ARCHIVE_CONTENT_TYPE;
use super::error::UploadError;

/// Forward-only stream of payload chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + 'static>>;

/// One archive upload: destination, declared length and the payload stream.
///
/// The payload is consumed exactly once. It is not rewound between attempts.
pub struct UploadRequest {
    url: String,
    total_bytes: u64,
    source: ByteStream,
}

impl UploadRequest {
    /// Creates a request from any chunk stream.
    pub fn new(
        url: impl Into<String>,
        total_bytes: u64,
        source: impl Stream<Item = io::Result<Bytes>> + Send + 'static,
    ) -> Self {
        Self {
            url: url.into(),
            total_bytes,
            source: Box::pin(source),
        }
    }

    /// Opens `path` and streams it, taking the length from file metadata.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::Io`] if the file cannot be opened or inspected.
    pub async fn from_file(url: impl Into<String>, path: &Path) -> Result<Self, UploadError> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| UploadError::io(path, e))?;
        let total_bytes = file
            .metadata()
            .await
            .map_err(|e| UploadError::io(path, e))?
            .len();
        debug!(path = %path.display(), total_bytes, "opened upload source");
        Ok(Self::new(url, total_bytes, ReaderStream::new(file)))
    }

    /// Calls `observer` with every chunk as it is read from the source.
    #[must_use]
    pub fn on_chunk(self, mut observer: impl FnMut(&Bytes) + Send + 'static) -> Self {
        let source = self.source.inspect(move |chunk| {
            if let Ok(chunk) = chunk {
                observer(chunk);
            }
        });
        Self {
            source: Box::pin(source),
            ..self
        }
    }

    /// Destination URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Declared payload length, sent as `content-length`.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Media type of the payload.
    #[must_use]
    pub fn content_type(&self) -> &'static str {
        ARCHIVE_CONTENT_TYPE
    }

    pub(crate) fn into_parts(self) -> (String, u64, ByteStream) {
        (self.url, self.total_bytes, self.source)
    }
}

impl fmt::Debug for UploadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadRequest")
            .field("url", &self.url)
            .field("total_bytes", &self.total_bytes)
            .finish_non_exhaustive()
    }
}

/// Byte source shared by every attempt of one upload call.
///
/// Each attempt gets a body that pulls from the same underlying stream, so a
/// retry after a partially sent body continues from where the previous attempt
/// stopped instead of starting over.
///
/// HTTP clients stop polling a body once `content-length` bytes are sent. When
/// the declared length is reached the underlying stream is therefore read to
/// its end right away, so wrappers such as the stall monitor observe
/// end-of-stream while the request is still waiting for its response.
#[derive(Clone)]
pub(crate) struct SharedByteSource {
    inner: Arc<Mutex<SourceState>>,
}

struct SourceState {
    stream: ByteStream,
    sent: u64,
    total_bytes: u64,
    finished: bool,
}

impl SharedByteSource {
    pub(crate) fn new(source: ByteStream, total_bytes: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SourceState {
                stream: source,
                sent: 0,
                total_bytes,
                finished: false,
            })),
        }
    }

    /// Returns the request body for one attempt.
    pub(crate) fn attempt_body(&self) -> ByteStream {
        let inner = Arc::clone(&self.inner);
        Box::pin(stream::unfold(inner, |inner| async move {
            let next = inner.lock().await.next_chunk().await;
            next.map(|chunk| (chunk, inner))
        }))
    }

    /// Reads the underlying stream to its end, discarding anything left.
    pub(crate) async fn finish(&self) {
        self.inner.lock().await.drain().await;
    }
}

impl SourceState {
    async fn next_chunk(&mut self) -> Option<io::Result<Bytes>> {
        if self.finished {
            return None;
        }
        let chunk = self.stream.next().await;
        match &chunk {
            Some(Ok(bytes)) => {
                self.sent = self.sent.saturating_add(bytes.len() as u64);
                if self.sent >= self.total_bytes {
                    self.drain().await;
                }
            }
            Some(Err(_)) => {}
            None => self.finished = true,
        }
        chunk
    }

    async fn drain(&mut self) {
        while !self.finished {
            match self.stream.next().await {
                Some(Ok(extra)) => {
                    warn!(
                        extra_bytes = extra.len(),
                        total_bytes = self.total_bytes,
                        "source exceeds declared length, dropping extra bytes"
                    );
                }
                Some(Err(error)) => {
                    debug!(%error, "source failed after declared length");
                    self.finished = true;
                }
                None => self.finished = true,
            }
        }
    }
}
