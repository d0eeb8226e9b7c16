//! Bucket handle: the public object-store surface.
//!
//! A [`Bucket`] binds a storage backend to a bucket name, an optional key
//! prefix and a cancellation token. Callers always use unprefixed object
//! names; every operation rewrites them to `prefix + name` by plain
//! concatenation, so a prefix that should act like a directory must end in
//! `/`.
//!
//! Every operation runs inside an [`OpLog`] and is raced against the handle's
//! cancellation token. Failures come back wrapped as
//! `<op> gs://<bucket>/<prefix><name> failed: <inner>`.
//!
//! # Example
//!
//! ```rust,ignore
//! let bucket = Bucket::open("fleet-artifacts", BucketOptions::default().with_prefix("ci/")).await?;
//!
//! bucket.write("hello.txt", "hello, world", ObjectAttrs::new()).await?;
//! assert_eq!(bucket.read("hello.txt").await?, "hello, world");
//! ```

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::GcsClientOptions;
use crate::error::{Error, Result};
use crate::lock::{Lock, LockOptions};
use crate::oplog::{Op, OpLog};
use crate::storage::{
    DeleteResult, Generation, ObjectAttrs, ObjectMeta, StorageBackend, WritePrecondition,
    WriteResult,
};
use crate::writer::ObjectWriter;

/// Size of the buffer used to copy readers and files into uploads.
pub const COPY_BUFFER_SIZE: usize = 64 * 1024;

const CONSOLE_BASE: &str = "https://console.cloud.google.com/storage/browser";

/// Options for opening a bucket handle.
#[derive(Debug, Clone, Default)]
pub struct BucketOptions {
    /// Key prefix applied to every object name.
    pub prefix: String,
    /// Options for the underlying storage client.
    pub client: GcsClientOptions,
    /// Cancelling this token aborts every in-flight operation on the handle.
    pub cancellation: CancellationToken,
}

impl BucketOptions {
    /// Sets the key prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Sets the storage client options.
    #[must_use]
    pub fn with_client_options(mut self, client: GcsClientOptions) -> Self {
        self.client = client;
        self
    }

    /// Sets the cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

/// Handle to a named bucket.
///
/// Cheap to clone; clones share the backend client and cancellation token.
/// Dropping the last clone releases the client.
#[derive(Clone)]
pub struct Bucket {
    inner: Arc<BucketInner>,
}

struct BucketInner {
    name: String,
    prefix: String,
    backend: Arc<dyn StorageBackend>,
    cancel: CancellationToken,
}

impl fmt::Debug for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bucket")
            .field("name", &self.inner.name)
            .field("prefix", &self.inner.prefix)
            .finish_non_exhaustive()
    }
}

fn validate_bucket_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidArgument("bucket name cannot be empty".into()));
    }
    if name.contains('/') || name.chars().any(char::is_whitespace) {
        return Err(Error::InvalidArgument(format!(
            "bucket name cannot contain '/' or whitespace: {name:?}"
        )));
    }
    Ok(())
}

fn validate_object_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidArgument("object name cannot be empty".into()));
    }
    if name.contains(['\n', '\r', '\0']) {
        return Err(Error::InvalidArgument(format!(
            "object name cannot contain control characters: {name:?}"
        )));
    }
    Ok(())
}

impl Bucket {
    /// Creates a handle over an existing backend.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if the bucket name or prefix is invalid.
    pub fn with_backend(
        name: impl Into<String>,
        backend: Arc<dyn StorageBackend>,
        options: BucketOptions,
    ) -> Result<Self> {
        let name = name.into();
        validate_bucket_name(&name)?;
        if options.prefix.contains(['\n', '\r', '\0']) {
            return Err(Error::InvalidArgument(
                "prefix cannot contain control characters".into(),
            ));
        }

        Ok(Self {
            inner: Arc::new(BucketInner {
                name,
                prefix: options.prefix,
                backend,
                cancel: options.cancellation,
            }),
        })
    }

    /// Opens a handle to a GCS bucket.
    ///
    /// Construction does not contact the bucket; a missing bucket surfaces on
    /// the first call that reaches the remote.
    ///
    /// # Errors
    ///
    /// Returns an error if the options are invalid or credentials cannot be
    /// discovered.
    #[cfg(feature = "gcp")]
    pub async fn open(name: impl Into<String>, options: BucketOptions) -> Result<Self> {
        let name = name.into();
        validate_bucket_name(&name)?;
        let backend = crate::gcs::GcsBackend::new(&name, &options.client).await?;
        Self::with_backend(name, Arc::new(backend), options)
    }

    /// The bucket name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The key prefix (possibly empty).
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.inner.prefix
    }

    /// The token that cancels operations on this handle.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    /// The backend this handle delegates to.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.inner.backend
    }

    fn object_path(&self, name: &str) -> String {
        format!("{}{}", self.inner.prefix, name)
    }

    fn strip(&self, mut meta: ObjectMeta) -> ObjectMeta {
        if let Some(stripped) = meta.name.strip_prefix(&self.inner.prefix) {
            meta.name = stripped.to_string();
        }
        meta
    }

    /// Fully qualified URL of an object: `gs://<bucket>/<prefix><name>`.
    #[must_use]
    pub fn url(&self, name: &str) -> String {
        format!("gs://{}/{}", self.inner.name, self.object_path(name))
    }

    /// Cloud console detail view of an object.
    #[must_use]
    pub fn console_url(&self, name: &str) -> String {
        format!(
            "{CONSOLE_BASE}/_details/{}/{}",
            self.inner.name,
            self.object_path(name)
        )
    }

    /// Cloud console list view of everything under a path prefix.
    #[must_use]
    pub fn console_list_url(&self, path_prefix: &str) -> String {
        format!(
            "{CONSOLE_BASE}/{}/{}",
            self.inner.name,
            self.object_path(path_prefix)
        )
    }

    fn oplog(&self, op: Op, name: &str) -> OpLog {
        OpLog::new(op, &self.inner.name, &self.inner.prefix, name, self.url(name))
    }

    /// Runs one logged, cancellable call.
    async fn run<T, F>(&self, log: &mut OpLog, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        log.start();
        let span = log.span().clone();
        let result = tokio::select! {
            biased;
            () = self.inner.cancel.cancelled() => Err(Error::Cancelled),
            r = fut.instrument(span) => r,
        };
        log.finish(result)
    }

    /// Returns true iff the object exists.
    ///
    /// # Errors
    ///
    /// Never fails with not-found; fails on transport errors or cancellation.
    pub async fn exists(&self, name: &str) -> Result<bool> {
        let mut log = self.oplog(Op::Exists, name);
        let path = self.object_path(name);
        self.run(&mut log, async {
            validate_object_name(name)?;
            Ok(self.inner.backend.head(&path).await?.is_some())
        })
        .await
    }

    /// Reads the entire object.
    ///
    /// # Errors
    ///
    /// Returns a `NotFound` error if the object is missing.
    pub async fn read(&self, name: &str) -> Result<Bytes> {
        let mut log = self.oplog(Op::Read, name);
        let path = self.object_path(name);
        self.run(&mut log, async {
            validate_object_name(name)?;
            self.inner.backend.get(&path).await
        })
        .await
    }

    /// Replaces the object's content, applying `attrs` in the same call.
    ///
    /// # Errors
    ///
    /// Returns an error if the attributes are invalid or the store call fails.
    pub async fn write(
        &self,
        name: &str,
        data: impl Into<Bytes>,
        attrs: ObjectAttrs,
    ) -> Result<()> {
        self.write_if(name, data, attrs, WritePrecondition::None)
            .await
            .map(|_| ())
    }

    /// Writes the object only if `precondition` holds at commit time.
    ///
    /// Returns the generation of the new content.
    ///
    /// # Errors
    ///
    /// Returns a `PreconditionFailed` error if the precondition is violated.
    pub async fn write_if(
        &self,
        name: &str,
        data: impl Into<Bytes>,
        attrs: ObjectAttrs,
        precondition: WritePrecondition,
    ) -> Result<Generation> {
        self.put_with(Op::Write, name, data.into(), &attrs, precondition, |outcome| {
            match outcome {
                WriteResult::Success { generation } => Ok(generation),
                WriteResult::PreconditionFailed { .. } => Err(Error::precondition(format!(
                    "{precondition:?} not satisfied"
                ))),
            }
        })
        .await
    }

    /// Writes and reports the raw outcome; used by the lock.
    pub(crate) async fn put_checked(
        &self,
        op: Op,
        name: &str,
        data: Bytes,
        attrs: &ObjectAttrs,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        self.put_with(op, name, data, attrs, precondition, Ok).await
    }

    /// Writes and maps the outcome inside the same logged call.
    async fn put_with<T>(
        &self,
        op: Op,
        name: &str,
        data: Bytes,
        attrs: &ObjectAttrs,
        precondition: WritePrecondition,
        outcome: impl FnOnce(WriteResult) -> Result<T>,
    ) -> Result<T> {
        let mut log = self.oplog(op, name);
        let path = self.object_path(name);
        self.run(&mut log, async {
            validate_object_name(name)?;
            attrs.validate()?;
            let result = self
                .inner
                .backend
                .put(&path, data, attrs, precondition)
                .await?;
            outcome(result)
        })
        .await
    }

    /// Writes the object from a reader, copying through a bounded buffer.
    ///
    /// Blocks until the reader reports end-of-stream and the upload commits.
    /// The reader is borrowed; closing its source stays with the caller.
    ///
    /// # Errors
    ///
    /// Returns an `Io` error if reading fails (the upload is aborted), or the
    /// upload's error.
    pub async fn write_stream<R>(&self, name: &str, reader: &mut R, attrs: ObjectAttrs) -> Result<()>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let writer = self.new_writer(Op::Write, name, attrs, WritePrecondition::None);
        copy_into(reader, writer, || format!("read source stream for {}", self.url(name))).await
    }

    /// Returns a streaming writer for the object.
    ///
    /// Construction is synchronous and never contacts the store; bytes are
    /// uploaded as they are written and committed by
    /// [`ObjectWriter::close`]. Errors discovered at commit time surface
    /// from `close`.
    #[must_use]
    pub fn writer(&self, name: &str) -> ObjectWriter {
        self.writer_with(name, ObjectAttrs::new())
    }

    /// Like [`writer`](Self::writer) with attributes applied at commit.
    #[must_use]
    pub fn writer_with(&self, name: &str, attrs: ObjectAttrs) -> ObjectWriter {
        self.new_writer(Op::Write, name, attrs, WritePrecondition::None)
    }

    fn new_writer(
        &self,
        op: Op,
        name: &str,
        attrs: ObjectAttrs,
        precondition: WritePrecondition,
    ) -> ObjectWriter {
        let log = self.oplog(op, name);
        let invalid = validate_object_name(name)
            .and_then(|()| attrs.validate())
            .err();
        ObjectWriter::new(
            Arc::clone(&self.inner.backend),
            self.object_path(name),
            attrs,
            precondition,
            self.inner.cancel.clone(),
            log,
            invalid,
        )
    }

    /// Uploads a local file to the object.
    ///
    /// # Errors
    ///
    /// Returns an `Io` error naming the failed step (open, read) or the
    /// upload's error.
    pub async fn upload(&self, local_path: &Path, name: &str, attrs: ObjectAttrs) -> Result<()> {
        let mut file = match tokio::fs::File::open(local_path).await {
            Ok(file) => file,
            Err(e) => {
                let log = self.oplog(Op::Upload, name);
                return Err(log.wrap(Error::io(format!("open {}", local_path.display()), e)));
            }
        };
        let writer = self.new_writer(Op::Upload, name, attrs, WritePrecondition::None);
        copy_into(&mut file, writer, || format!("read {}", local_path.display())).await
    }

    /// Downloads the object into a local file, replacing its contents.
    ///
    /// The local file is only created once the object is known to exist; a
    /// partially written file is removed on failure or cancellation.
    ///
    /// # Errors
    ///
    /// Returns a `NotFound` error if the object is missing, or an `Io` error
    /// naming the failed step (create, write, flush).
    pub async fn download(&self, name: &str, local_path: &Path) -> Result<()> {
        let mut log = self.oplog(Op::Download, name);
        let path = self.object_path(name);
        let created = AtomicBool::new(false);
        let result = self
            .run(&mut log, async {
                validate_object_name(name)?;
                let mut stream = self.inner.backend.get_stream(&path).await?;
                let mut file = tokio::fs::File::create(local_path)
                    .await
                    .map_err(|e| Error::io(format!("create {}", local_path.display()), e))?;
                created.store(true, Ordering::Release);

                let mut total = 0_u64;
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk?;
                    file.write_all(&chunk)
                        .await
                        .map_err(|e| Error::io(format!("write {}", local_path.display()), e))?;
                    total += chunk.len() as u64;
                }
                file.flush()
                    .await
                    .map_err(|e| Error::io(format!("flush {}", local_path.display()), e))?;
                Ok(total)
            })
            .await;

        // `run` drops the copy on cancellation, so cleanup happens here.
        match result {
            Ok(bytes) => {
                tracing::debug!(bytes, local_path = %local_path.display(), "download complete");
                Ok(())
            }
            Err(err) => {
                if created.load(Ordering::Acquire) {
                    if let Err(e) = tokio::fs::remove_file(local_path).await {
                        tracing::debug!(
                            error = %e,
                            local_path = %local_path.display(),
                            "failed to remove partial download"
                        );
                    }
                }
                Err(err)
            }
        }
    }

    /// Removes the object. A missing object is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or cancellation.
    pub async fn delete(&self, name: &str) -> Result<()> {
        self.delete_if(name, WritePrecondition::None).await
    }

    /// Removes the object only if `precondition` holds.
    ///
    /// A missing object is not an error.
    ///
    /// # Errors
    ///
    /// Returns a `PreconditionFailed` error if the object's generation does
    /// not match.
    pub async fn delete_if(&self, name: &str, precondition: WritePrecondition) -> Result<()> {
        self.delete_with(Op::Delete, name, precondition, |outcome| match outcome {
            DeleteResult::Deleted | DeleteResult::NotFound => Ok(()),
            DeleteResult::PreconditionFailed => Err(Error::precondition(format!(
                "{precondition:?} not satisfied"
            ))),
        })
        .await
    }

    /// Deletes and reports the raw outcome; used by the lock.
    pub(crate) async fn delete_checked(
        &self,
        op: Op,
        name: &str,
        precondition: WritePrecondition,
    ) -> Result<DeleteResult> {
        self.delete_with(op, name, precondition, Ok).await
    }

    /// Deletes and maps the outcome inside the same logged call.
    async fn delete_with<T>(
        &self,
        op: Op,
        name: &str,
        precondition: WritePrecondition,
        outcome: impl FnOnce(DeleteResult) -> Result<T>,
    ) -> Result<T> {
        let mut log = self.oplog(op, name);
        let path = self.object_path(name);
        self.run(&mut log, async {
            validate_object_name(name)?;
            outcome(self.inner.backend.delete(&path, precondition).await?)
        })
        .await
    }

    /// Reads the object's metadata.
    ///
    /// # Errors
    ///
    /// Returns a `NotFound` error if the object is missing.
    pub async fn attrs(&self, name: &str) -> Result<ObjectMeta> {
        let mut log = self.oplog(Op::Attrs, name);
        let path = self.object_path(name);
        let meta = self
            .run(&mut log, async {
                validate_object_name(name)?;
                self.inner
                    .backend
                    .head(&path)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("object not found: {path}")))
            })
            .await?;
        Ok(self.strip(meta))
    }

    /// Reads the object's metadata, or `None` if it is missing.
    pub(crate) async fn try_attrs(&self, op: Op, name: &str) -> Result<Option<ObjectMeta>> {
        let mut log = self.oplog(op, name);
        let path = self.object_path(name);
        let meta = self
            .run(&mut log, async {
                validate_object_name(name)?;
                self.inner.backend.head(&path).await
            })
            .await?;
        Ok(meta.map(|m| self.strip(m)))
    }

    /// Patches the object's mutable attributes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `attrs` is empty or invalid, and
    /// `NotFound` if the object is missing.
    pub async fn update(&self, name: &str, attrs: ObjectAttrs) -> Result<()> {
        let mut log = self.oplog(Op::Update, name);
        let path = self.object_path(name);
        self.run(&mut log, async {
            validate_object_name(name)?;
            if attrs.is_empty() {
                return Err(Error::InvalidArgument("no attributes to update".into()));
            }
            attrs.validate()?;
            self.inner.backend.update(&path, &attrs).await.map(|_| ())
        })
        .await
    }

    /// Lists objects under `prefix` (relative to the handle's prefix).
    ///
    /// Listings are eventually consistent; use [`exists`](Self::exists) for
    /// decisions that matter.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or cancellation.
    pub async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let mut log = self.oplog(Op::List, prefix);
        let path = self.object_path(prefix);
        let listed = self
            .run(&mut log, self.inner.backend.list(&path))
            .await?;
        Ok(listed.into_iter().map(|m| self.strip(m)).collect())
    }

    /// Creates (but does not acquire) a lock bound to `name`.
    #[must_use]
    pub fn new_lock(&self, name: &str, max_wait: Duration, options: LockOptions) -> Lock {
        Lock::new(self.clone(), name, options.with_max_wait(max_wait))
    }
}

/// Copies a reader into an object writer through a fixed-size buffer.
async fn copy_into<R>(
    reader: &mut R,
    mut writer: ObjectWriter,
    describe: impl Fn() -> String,
) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0_u8; COPY_BUFFER_SIZE];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => return Err(writer.fail(Error::io(describe(), e))),
        };
        writer.write(&buf[..n]).await?;
    }
    writer.close().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;

    fn bucket_with_prefix(prefix: &str) -> (Bucket, MemoryBackend) {
        let backend = MemoryBackend::new();
        let bucket = Bucket::with_backend(
            "test-bucket",
            Arc::new(backend.clone()),
            BucketOptions::default().with_prefix(prefix),
        )
        .expect("bucket");
        (bucket, backend)
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (bucket, _) = bucket_with_prefix("");
        bucket
            .write("hello.txt", "hello, world", ObjectAttrs::new())
            .await
            .expect("write");

        assert!(bucket.exists("hello.txt").await.expect("exists"));
        assert_eq!(
            bucket.read("hello.txt").await.expect("read"),
            Bytes::from("hello, world")
        );
    }

    #[tokio::test]
    async fn test_prefix_is_concatenated_and_hidden() {
        let (bucket, backend) = bucket_with_prefix("envs/dev-");
        bucket
            .write("index.yaml", "x", ObjectAttrs::new())
            .await
            .expect("write");

        assert!(
            backend
                .head("envs/dev-index.yaml")
                .await
                .expect("head")
                .is_some()
        );
        let meta = bucket.attrs("index.yaml").await.expect("attrs");
        assert_eq!(meta.name, "index.yaml");
        assert_eq!(bucket.url("index.yaml"), "gs://test-bucket/envs/dev-index.yaml");
    }

    #[tokio::test]
    async fn test_read_missing_is_wrapped_not_found() {
        let (bucket, _) = bucket_with_prefix("p/");
        let err = bucket.read("nope").await.expect_err("missing");
        assert!(err.is_not_found());
        assert!(
            err.to_string().starts_with("read gs://test-bucket/p/nope failed:"),
            "{err}"
        );
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let (bucket, _) = bucket_with_prefix("");
        bucket.delete("never-existed").await.expect("delete");
        assert!(!bucket.exists("never-existed").await.expect("exists"));
    }

    #[tokio::test]
    async fn test_write_if_does_not_exist() {
        let (bucket, _) = bucket_with_prefix("");
        let generation = bucket
            .write_if("a", "1", ObjectAttrs::new(), WritePrecondition::DoesNotExist)
            .await
            .expect("create");
        let err = bucket
            .write_if("a", "2", ObjectAttrs::new(), WritePrecondition::DoesNotExist)
            .await
            .expect_err("exists");
        assert!(err.is_precondition_failed());

        let err = bucket
            .delete_if(
                "a",
                WritePrecondition::GenerationMatch(Generation::new(generation.get() - 1)),
            )
            .await
            .expect_err("wrong generation");
        assert!(err.is_precondition_failed());
        bucket
            .delete_if("a", WritePrecondition::GenerationMatch(generation))
            .await
            .expect("delete");
    }

    #[tokio::test]
    async fn test_precondition_errors_name_the_original_call() {
        let (bucket, _) = bucket_with_prefix("pre/");
        bucket
            .write_if("a", "1", ObjectAttrs::new(), WritePrecondition::DoesNotExist)
            .await
            .expect("create");

        let err = bucket
            .write_if("a", "2", ObjectAttrs::new(), WritePrecondition::DoesNotExist)
            .await
            .expect_err("exists");
        assert_eq!(
            err.to_string(),
            "write gs://test-bucket/pre/a failed: precondition failed: DoesNotExist not satisfied"
        );

        let err = bucket
            .delete_if("a", WritePrecondition::GenerationMatch(Generation::new(1)))
            .await
            .expect_err("stale generation");
        assert!(err.is_precondition_failed());
        assert!(
            err.to_string()
                .starts_with("delete gs://test-bucket/pre/a failed: precondition failed:"),
            "{err}"
        );
    }

    #[tokio::test]
    async fn test_update_requires_attributes() {
        let (bucket, _) = bucket_with_prefix("");
        bucket.write("a", "1", ObjectAttrs::new()).await.expect("write");
        let err = bucket
            .update("a", ObjectAttrs::new())
            .await
            .expect_err("empty update");
        assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_cancelled_handle_rejects_calls() {
        let token = CancellationToken::new();
        let bucket = Bucket::with_backend(
            "b",
            Arc::new(MemoryBackend::new()),
            BucketOptions::default().with_cancellation(token.clone()),
        )
        .expect("bucket");
        token.cancel();

        let err = bucket.exists("x").await.expect_err("cancelled");
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_write_stream_copies_reader() {
        let (bucket, _) = bucket_with_prefix("");
        let payload = vec![7_u8; COPY_BUFFER_SIZE * 3 + 11];
        let mut reader = payload.as_slice();
        bucket
            .write_stream("big.bin", &mut reader, ObjectAttrs::new())
            .await
            .expect("write_stream");
        assert_eq!(bucket.read("big.bin").await.expect("read").len(), payload.len());
    }

    #[test]
    fn test_console_urls() {
        let (bucket, _) = bucket_with_prefix("logs/");
        assert_eq!(
            bucket.console_url("a.log"),
            "https://console.cloud.google.com/storage/browser/_details/test-bucket/logs/a.log"
        );
        assert_eq!(
            bucket.console_list_url("env/rel/"),
            "https://console.cloud.google.com/storage/browser/test-bucket/logs/env/rel/"
        );
    }

    #[test]
    fn test_invalid_names_are_rejected() {
        assert!(
            Bucket::with_backend("", Arc::new(MemoryBackend::new()), BucketOptions::default())
                .is_err()
        );
        assert!(
            Bucket::with_backend(
                "a/b",
                Arc::new(MemoryBackend::new()),
                BucketOptions::default()
            )
            .is_err()
        );
    }
}
