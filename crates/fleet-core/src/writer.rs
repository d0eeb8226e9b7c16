//! Streaming object writer.
//!
//! [`ObjectWriter`] never touches the store at construction. The first
//! non-empty write spawns a background upload fed through a bounded channel,
//! so memory stays flat regardless of object size. [`ObjectWriter::close`]
//! ends the stream and waits for the commit; errors found at commit time
//! (including precondition failures) surface there. Dropping a writer that
//! was never closed aborts the upload, and nothing becomes visible.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::{Error, Result};
use crate::oplog::OpLog;
use crate::storage::{
    ByteStream, Generation, ObjectAttrs, StorageBackend, WritePrecondition, WriteResult,
};

/// Chunks buffered between the writer and the upload task.
const CHANNEL_DEPTH: usize = 4;

/// A byte sink with an explicit, fallible close.
///
/// Implemented by [`ObjectWriter`] and by local file sinks so both can be
/// driven through one multi-writer.
#[async_trait]
pub trait WriteSink: Send {
    /// Writes the whole buffer, returning the number of bytes accepted.
    async fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Flushes and finalizes the sink.
    async fn close(&mut self) -> Result<()>;
}

enum State {
    Pending,
    Streaming {
        tx: mpsc::Sender<Result<Bytes>>,
        upload: JoinHandle<Result<WriteResult>>,
    },
    Closed,
}

/// Streaming writer for a single object.
pub struct ObjectWriter {
    backend: Arc<dyn StorageBackend>,
    path: String,
    attrs: ObjectAttrs,
    precondition: WritePrecondition,
    cancel: CancellationToken,
    log: OpLog,
    state: State,
    invalid: Option<Error>,
    generation: Option<Generation>,
}

impl std::fmt::Debug for ObjectWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            State::Pending => "pending",
            State::Streaming { .. } => "streaming",
            State::Closed => "closed",
        };
        f.debug_struct("ObjectWriter")
            .field("url", &self.log.url())
            .field("state", &state)
            .finish_non_exhaustive()
    }
}

impl ObjectWriter {
    pub(crate) fn new(
        backend: Arc<dyn StorageBackend>,
        path: String,
        attrs: ObjectAttrs,
        precondition: WritePrecondition,
        cancel: CancellationToken,
        log: OpLog,
        invalid: Option<Error>,
    ) -> Self {
        Self {
            backend,
            path,
            attrs,
            precondition,
            cancel,
            log,
            state: State::Pending,
            invalid,
            generation: None,
        }
    }

    /// The fully qualified URL of the object being written.
    #[must_use]
    pub fn url(&self) -> &str {
        self.log.url()
    }

    /// The generation of the committed object, once closed successfully.
    #[must_use]
    pub fn generation(&self) -> Option<Generation> {
        self.generation
    }

    /// Returns true once the writer has been closed or aborted.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }

    fn start_upload(&mut self) -> mpsc::Sender<Result<Bytes>> {
        self.log.start();
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        let backend = Arc::clone(&self.backend);
        let path = self.path.clone();
        let attrs = self.attrs.clone();
        let precondition = self.precondition;
        let body: ByteStream = Box::pin(ReceiverStream::new(rx));

        let upload = tokio::spawn(
            async move { backend.put_stream(&path, body, &attrs, precondition).await }
                .instrument(self.log.span().clone()),
        );
        self.state = State::Streaming {
            tx: tx.clone(),
            upload,
        };
        tx
    }

    /// Writes `buf` to the object.
    ///
    /// The first non-empty write starts the upload.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` after close, `Cancelled` if the handle's
    /// token fires, or the upload's error if it failed early.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if matches!(self.state, State::Closed) {
            return Err(self
                .log
                .wrap(Error::InvariantViolation("write after close".into())));
        }
        if let Some(err) = self.invalid.take() {
            self.state = State::Closed;
            self.log.start();
            return self.log.finish(Err(err));
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let tx = match &self.state {
            State::Streaming { tx, .. } => tx.clone(),
            _ => self.start_upload(),
        };
        let chunk = Bytes::copy_from_slice(buf);
        let sent = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Error::Cancelled),
            r = tx.send(Ok(chunk)) => Ok(r.is_ok()),
        };

        match sent {
            Ok(true) => Ok(buf.len()),
            // Receiver gone: the upload ended early, fetch its real error.
            Ok(false) => {
                let err = match self.join_upload().await {
                    Err(e) => e,
                    Ok(_) => Error::internal("upload finished before the stream ended"),
                };
                self.log.finish(Err(err))
            }
            Err(err) => {
                self.abort();
                self.log.finish(Err(err))
            }
        }
    }

    async fn join_upload(&mut self) -> Result<WriteResult> {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Streaming { tx, mut upload } => {
                drop(tx);
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => {
                        upload.abort();
                        Err(Error::Cancelled)
                    }
                    joined = &mut upload => joined
                        .map_err(|e| Error::internal(format!("upload task failed: {e}")))?,
                }
            }
            State::Pending => {
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => Err(Error::Cancelled),
                    r = self.backend.put(&self.path, Bytes::new(), &self.attrs, self.precondition)
                        .instrument(self.log.span().clone()) => r,
                }
            }
            State::Closed => Err(Error::InvariantViolation("writer already closed".into())),
        }
    }

    /// Ends the stream and waits for the object to commit.
    ///
    /// Closing a writer that received no bytes creates an empty object.
    ///
    /// # Errors
    ///
    /// Returns the upload's error, `PreconditionFailed` if the write
    /// precondition did not hold, or `InvariantViolation` on a second close.
    pub async fn close(&mut self) -> Result<()> {
        if matches!(self.state, State::Closed) {
            return Err(self
                .log
                .wrap(Error::InvariantViolation("writer already closed".into())));
        }
        self.log.start();
        if let Some(err) = self.invalid.take() {
            self.state = State::Closed;
            return self.log.finish(Err(err));
        }

        let result = match self.join_upload().await {
            Ok(WriteResult::Success { generation }) => {
                self.generation = Some(generation);
                Ok(())
            }
            Ok(WriteResult::PreconditionFailed { .. }) => Err(Error::precondition(format!(
                "{:?} not satisfied",
                self.precondition
            ))),
            Err(e) => Err(e),
        };
        self.log.finish(result)
    }

    /// Abandons the upload. Nothing becomes visible in the store.
    pub fn abort(&mut self) {
        if let State::Streaming { tx, upload } = std::mem::replace(&mut self.state, State::Closed) {
            let _ = tx.try_send(Err(Error::Cancelled));
            upload.abort();
            tracing::debug!(parent: self.log.span(), "upload aborted");
        }
        self.state = State::Closed;
    }

    /// Aborts the upload and records `err` as the call's outcome.
    pub(crate) fn fail(&mut self, err: Error) -> Error {
        self.abort();
        self.log.start();
        match self.log.finish::<()>(Err(err)) {
            Err(e) => e,
            Ok(()) => Error::internal("unreachable writer state"),
        }
    }
}

impl Drop for ObjectWriter {
    fn drop(&mut self) {
        self.abort();
    }
}

#[async_trait]
impl WriteSink for ObjectWriter {
    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        ObjectWriter::write(self, buf).await
    }

    async fn close(&mut self) -> Result<()> {
        ObjectWriter::close(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::{Bucket, BucketOptions};
    use crate::storage::MemoryBackend;

    fn bucket() -> (Bucket, MemoryBackend) {
        let backend = MemoryBackend::new();
        let bucket = Bucket::with_backend("b", Arc::new(backend.clone()), BucketOptions::default())
            .expect("bucket");
        (bucket, backend)
    }

    #[tokio::test]
    async fn test_writer_commits_on_close() {
        let (bucket, _) = bucket();
        let mut w = bucket.writer_with("out.log", ObjectAttrs::new().with_content_type("text/plain"));
        w.write(b"abc").await.expect("write");
        w.write(b"def").await.expect("write");
        assert!(!bucket.exists("out.log").await.expect("exists"));

        w.close().await.expect("close");
        assert!(w.generation().is_some());
        assert_eq!(bucket.read("out.log").await.expect("read"), Bytes::from("abcdef"));
        let meta = bucket.attrs("out.log").await.expect("attrs");
        assert_eq!(meta.content_type.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn test_writer_without_bytes_creates_empty_object() {
        let (bucket, _) = bucket();
        let mut w = bucket.writer("empty");
        w.close().await.expect("close");
        assert_eq!(bucket.read("empty").await.expect("read").len(), 0);
    }

    #[tokio::test]
    async fn test_dropped_writer_leaves_nothing() {
        let (bucket, backend) = bucket();
        {
            let mut w = bucket.writer("dropped");
            w.write(b"partial").await.expect("write");
        }
        tokio::task::yield_now().await;
        assert!(backend.is_empty().expect("len"));
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let (bucket, _) = bucket();
        let mut w = bucket.writer("x");
        w.close().await.expect("close");
        let err = w.write(b"late").await.expect_err("closed");
        assert_eq!(err.kind(), crate::ErrorKind::InvariantViolation);
        let err = w.close().await.expect_err("closed twice");
        assert_eq!(err.kind(), crate::ErrorKind::InvariantViolation);
    }

    #[tokio::test]
    async fn test_cancelled_writer_fails_close() {
        let token = CancellationToken::new();
        let bucket = Bucket::with_backend(
            "b",
            Arc::new(MemoryBackend::new()),
            BucketOptions::default().with_cancellation(token.clone()),
        )
        .expect("bucket");
        let mut w = bucket.writer("x");
        w.write(b"data").await.expect("write");
        token.cancel();
        let err = w.close().await.expect_err("cancelled");
        assert!(err.is_cancelled());
    }
}
