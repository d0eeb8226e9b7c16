//! Test storage implementations with operation tracing.
//!
//! Provides an in-memory backend that records every call and can inject
//! transport failures and latency.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use fleet_core::error::{Error, Result};
use fleet_core::storage::{
    ByteStream, DeleteResult, Generation, MemoryBackend, ObjectAttrs, ObjectMeta,
    StorageBackend, WritePrecondition, WriteResult,
};
use futures::StreamExt;

/// Chunk size of streamed reads when latency is simulated.
pub const STREAM_CHUNK_SIZE: usize = 4096;

/// Record of a storage operation for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOp {
    /// Full or streamed read.
    Get {
        /// Path that was read.
        path: String,
    },
    /// Metadata read.
    Head {
        /// Path that was checked.
        path: String,
    },
    /// Buffered or streamed write.
    Put {
        /// Path that was written.
        path: String,
        /// Precondition used.
        precondition: WritePrecondition,
    },
    /// Delete.
    Delete {
        /// Path that was deleted.
        path: String,
        /// Precondition used.
        precondition: WritePrecondition,
    },
    /// Attribute patch.
    Update {
        /// Path that was patched.
        path: String,
    },
    /// Listing.
    List {
        /// Prefix that was listed.
        prefix: String,
    },
}

impl StorageOp {
    /// The path or prefix the operation touched.
    pub fn path(&self) -> &str {
        match self {
            Self::Get { path }
            | Self::Head { path }
            | Self::Put { path, .. }
            | Self::Delete { path, .. }
            | Self::Update { path } => path,
            Self::List { prefix } => prefix,
        }
    }
}

/// In-memory storage backend with operation tracing.
#[derive(Debug, Clone, Default)]
pub struct TracingMemoryBackend {
    inner: MemoryBackend,
    operations: Arc<Mutex<Vec<StorageOp>>>,
    fail_paths: Arc<Mutex<Vec<String>>>,
    latency: Option<Duration>,
}

impl TracingMemoryBackend {
    /// Creates a new empty tracing storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates storage with simulated latency on every call.
    ///
    /// Streamed reads are also paced: each [`STREAM_CHUNK_SIZE`] chunk
    /// arrives after another `latency`.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// The wrapped memory backend.
    pub fn inner(&self) -> &MemoryBackend {
        &self.inner
    }

    /// Returns all recorded operations.
    pub fn operations(&self) -> Vec<StorageOp> {
        self.operations.lock().expect("lock").clone()
    }

    /// Clears recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().expect("lock").clear();
    }

    /// Makes every call on paths starting with `prefix` fail with a
    /// transport error.
    pub fn inject_failure(&self, prefix: impl Into<String>) {
        self.fail_paths.lock().expect("lock").push(prefix.into());
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        self.fail_paths.lock().expect("lock").clear();
    }

    /// Returns the current generation of `path`, if it exists.
    pub async fn generation(&self, path: &str) -> Option<Generation> {
        self.inner
            .head(path)
            .await
            .expect("head")
            .map(|m| m.generation)
    }

    fn record(&self, op: StorageOp) {
        self.operations.lock().expect("lock").push(op);
    }

    fn check_failure(&self, path: &str) -> Result<()> {
        let fail_paths = self.fail_paths.lock().expect("lock");
        if fail_paths.iter().any(|p| path.starts_with(p)) {
            return Err(Error::transport(format!("injected failure for path: {path}")));
        }
        Ok(())
    }

    async fn before(&self, op: StorageOp) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let path = op.path().to_string();
        self.record(op);
        self.check_failure(&path)
    }
}

#[async_trait::async_trait]
impl StorageBackend for TracingMemoryBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        self.before(StorageOp::Get {
            path: path.to_string(),
        })
        .await?;
        self.inner.get(path).await
    }

    async fn get_stream(&self, path: &str) -> Result<ByteStream> {
        self.before(StorageOp::Get {
            path: path.to_string(),
        })
        .await?;
        let Some(latency) = self.latency else {
            return self.inner.get_stream(path).await;
        };
        let data = self.inner.get(path).await?;
        let chunks: Vec<Bytes> = (0..data.len())
            .step_by(STREAM_CHUNK_SIZE)
            .map(|start| data.slice(start..(start + STREAM_CHUNK_SIZE).min(data.len())))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks).then(
            move |chunk| async move {
                tokio::time::sleep(latency).await;
                Ok::<_, Error>(chunk)
            },
        )))
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        attrs: &ObjectAttrs,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        self.before(StorageOp::Put {
            path: path.to_string(),
            precondition,
        })
        .await?;
        self.inner.put(path, data, attrs, precondition).await
    }

    async fn put_stream(
        &self,
        path: &str,
        body: ByteStream,
        attrs: &ObjectAttrs,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        self.before(StorageOp::Put {
            path: path.to_string(),
            precondition,
        })
        .await?;
        self.inner.put_stream(path, body, attrs, precondition).await
    }

    async fn delete(&self, path: &str, precondition: WritePrecondition) -> Result<DeleteResult> {
        self.before(StorageOp::Delete {
            path: path.to_string(),
            precondition,
        })
        .await?;
        self.inner.delete(path, precondition).await
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        self.before(StorageOp::Head {
            path: path.to_string(),
        })
        .await?;
        self.inner.head(path).await
    }

    async fn update(&self, path: &str, attrs: &ObjectAttrs) -> Result<ObjectMeta> {
        self.before(StorageOp::Update {
            path: path.to_string(),
        })
        .await?;
        self.inner.update(path, attrs).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        self.before(StorageOp::List {
            prefix: prefix.to_string(),
        })
        .await?;
        self.inner.list(prefix).await
    }
}
