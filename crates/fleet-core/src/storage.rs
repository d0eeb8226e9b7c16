//! Storage backend abstraction for cloud object storage.
//!
//! This module defines the capability-level contract the bucket handle is
//! built on:
//! - Conditional writes and deletes keyed on generation numbers
//! - A mutable attribute subset (content type, cache control, custom metadata)
//! - Streaming reads and writes
//!
//! Backends work with fully qualified object names. Prefix handling, logging,
//! cancellation and error wrapping live one level up in
//! [`Bucket`](crate::bucket::Bucket).
//!
//! Precondition outcomes are reported as values ([`WriteResult`],
//! [`DeleteResult`]) rather than errors at this level, since the lock treats
//! a lost race as a normal outcome.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};

/// A boxed stream of byte chunks, used for streaming reads and uploads.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Generation number assigned by the store on every successful write.
///
/// Generations are monotonically increasing per bucket. Knowing the
/// generation of a lock object authorizes its release, so avoid logging it
/// above debug level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(i64);

impl Generation {
    /// Wraps a raw generation number.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw generation number.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Generation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<i64>()
            .map(Self)
            .map_err(|e| Error::InvalidArgument(format!("invalid generation {s:?}: {e}")))
    }
}

/// Precondition for conditional writes and deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritePrecondition {
    /// Apply unconditionally.
    #[default]
    None,
    /// Apply only if the object does not exist.
    DoesNotExist,
    /// Apply only if the object's current generation matches.
    GenerationMatch(Generation),
}

/// Result of a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// Write succeeded.
    Success {
        /// The generation assigned to the new content.
        generation: Generation,
    },
    /// The precondition was not satisfied at commit time.
    PreconditionFailed {
        /// The current generation, when the backend reports it.
        current: Option<Generation>,
    },
}

/// Result of a conditional delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteResult {
    /// The object was removed.
    Deleted,
    /// There was no object to remove.
    NotFound,
    /// The object exists but its generation did not match.
    PreconditionFailed,
}

/// The mutable attribute subset carried by writes and updates.
///
/// Unset fields are left untouched by [`StorageBackend::update`]. When
/// `metadata` is set, it replaces the object's custom metadata wholesale.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectAttrs {
    /// `Content-Type` of the object.
    pub content_type: Option<String>,
    /// `Cache-Control` of the object.
    pub cache_control: Option<String>,
    /// Custom key/value metadata.
    pub metadata: Option<HashMap<String, String>>,
}

impl ObjectAttrs {
    /// Creates an empty attribute set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the content type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Sets the cache-control policy.
    #[must_use]
    pub fn with_cache_control(mut self, cache_control: impl Into<String>) -> Self {
        self.cache_control = Some(cache_control.into());
        self
    }

    /// Adds a single custom metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Replaces the custom metadata map.
    #[must_use]
    pub fn with_metadata_map(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Returns true if no attribute is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content_type.is_none() && self.cache_control.is_none() && self.metadata.is_none()
    }

    /// Checks that every set attribute is acceptable to the store.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` for empty strings, empty metadata keys,
    /// or values containing line breaks.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("content_type", &self.content_type),
            ("cache_control", &self.cache_control),
        ] {
            if let Some(value) = value {
                if value.trim().is_empty() {
                    return Err(Error::InvalidArgument(format!("{field} cannot be empty")));
                }
                if value.contains(['\n', '\r']) {
                    return Err(Error::InvalidArgument(format!(
                        "{field} cannot contain line breaks"
                    )));
                }
            }
        }
        if let Some(metadata) = &self.metadata {
            if metadata.keys().any(|k| k.trim().is_empty()) {
                return Err(Error::InvalidArgument(
                    "metadata keys cannot be empty".into(),
                ));
            }
        }
        Ok(())
    }

    fn apply_to(&self, meta: &mut StoredAttrs) {
        if let Some(ct) = &self.content_type {
            meta.content_type = Some(ct.clone());
        }
        if let Some(cc) = &self.cache_control {
            meta.cache_control = Some(cc.clone());
        }
        if let Some(md) = &self.metadata {
            meta.metadata = md.clone();
        }
    }
}

/// Metadata about a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Object name as known to the backend.
    pub name: String,
    /// Object size in bytes.
    pub size: u64,
    /// Generation of the current content.
    pub generation: Generation,
    /// When this generation was created.
    pub created: DateTime<Utc>,
    /// When the object's metadata was last updated.
    pub updated: DateTime<Utc>,
    /// `Content-Type`, if set.
    pub content_type: Option<String>,
    /// `Cache-Control`, if set.
    pub cache_control: Option<String>,
    /// Custom metadata.
    pub metadata: HashMap<String, String>,
}

/// Storage backend trait for a single bucket.
///
/// All backends (GCS, memory) implement this trait. Object names are fully
/// qualified; the bucket handle applies any prefix before calling in.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Reads the entire object.
    ///
    /// Returns `Error::NotFound` if the object doesn't exist.
    async fn get(&self, path: &str) -> Result<Bytes>;

    /// Reads the object as a stream of chunks.
    ///
    /// Returns `Error::NotFound` if the object doesn't exist.
    async fn get_stream(&self, path: &str) -> Result<ByteStream>;

    /// Writes the object, applying `attrs` in the same call.
    async fn put(
        &self,
        path: &str,
        data: Bytes,
        attrs: &ObjectAttrs,
        precondition: WritePrecondition,
    ) -> Result<WriteResult>;

    /// Writes the object from a stream of chunks.
    ///
    /// The upload commits only after the stream ends without error; a stream
    /// that yields an error aborts the upload.
    async fn put_stream(
        &self,
        path: &str,
        body: ByteStream,
        attrs: &ObjectAttrs,
        precondition: WritePrecondition,
    ) -> Result<WriteResult>;

    /// Deletes the object if the precondition holds.
    async fn delete(&self, path: &str, precondition: WritePrecondition) -> Result<DeleteResult>;

    /// Gets object metadata without reading content.
    ///
    /// Returns `None` if the object doesn't exist.
    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>>;

    /// Patches the mutable attribute subset.
    ///
    /// Returns `Error::NotFound` if the object doesn't exist.
    async fn update(&self, path: &str, attrs: &ObjectAttrs) -> Result<ObjectMeta>;

    /// Lists objects with the given prefix.
    ///
    /// Listings may be eventually consistent; never use them to decide
    /// authoritative state.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;
}

/// Process-wide generation counter shared by all memory backends.
///
/// Seeded from the wall clock like GCS generations so values stay unique
/// even when an object is deleted and recreated.
static NEXT_GENERATION: AtomicI64 = AtomicI64::new(0);

fn next_generation() -> Generation {
    let floor = Utc::now().timestamp_micros();
    let mut current = NEXT_GENERATION.load(Ordering::Relaxed);
    loop {
        let next = current.max(floor - 1) + 1;
        match NEXT_GENERATION.compare_exchange_weak(
            current,
            next,
            Ordering::SeqCst,
            Ordering::Relaxed,
        ) {
            Ok(_) => return Generation(next),
            Err(actual) => current = actual,
        }
    }
}

/// In-memory storage backend for tests and local runs.
///
/// Thread-safe via `RwLock`. Not suitable for production.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    generation: Generation,
    created: DateTime<Utc>,
    attrs: StoredAttrs,
}

#[derive(Debug, Clone, Default)]
struct StoredAttrs {
    content_type: Option<String>,
    cache_control: Option<String>,
    metadata: HashMap<String, String>,
    updated: Option<DateTime<Utc>>,
}

impl StoredObject {
    fn meta(&self, path: &str) -> ObjectMeta {
        ObjectMeta {
            name: path.to_string(),
            size: self.data.len() as u64,
            generation: self.generation,
            created: self.created,
            updated: self.attrs.updated.unwrap_or(self.created),
            content_type: self.attrs.content_type.clone(),
            cache_control: self.attrs.cache_control.clone(),
            metadata: self.attrs.metadata.clone(),
        }
    }
}

fn poisoned<T>(_: T) -> Error {
    Error::internal("lock poisoned")
}

fn check_precondition(
    current: Option<&StoredObject>,
    precondition: WritePrecondition,
) -> Option<WriteResult> {
    let failed = match (precondition, current) {
        (WritePrecondition::None, _) | (WritePrecondition::DoesNotExist, None) => false,
        (WritePrecondition::DoesNotExist, Some(_)) | (WritePrecondition::GenerationMatch(_), None) => {
            true
        }
        (WritePrecondition::GenerationMatch(expected), Some(obj)) => obj.generation != expected,
    };
    failed.then(|| WriteResult::PreconditionFailed {
        current: current.map(|o| o.generation),
    })
}

impl MemoryBackend {
    /// Creates a new empty memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored objects.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the internal lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.objects.read().map_err(poisoned)?.len())
    }

    /// Returns true if nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the internal lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Shifts the creation time of an object into the past.
    ///
    /// Lets tests exercise expiry logic without sleeping.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the object doesn't exist.
    pub fn backdate(&self, path: &str, by: chrono::Duration) -> Result<()> {
        let mut objects = self.objects.write().map_err(poisoned)?;
        let obj = objects
            .get_mut(path)
            .ok_or_else(|| Error::NotFound(format!("object not found: {path}")))?;
        obj.created -= by;
        Ok(())
    }

    fn insert(
        &self,
        path: &str,
        data: Bytes,
        attrs: &ObjectAttrs,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let mut objects = self.objects.write().map_err(poisoned)?;

        if let Some(failed) = check_precondition(objects.get(path), precondition) {
            return Ok(failed);
        }

        let generation = next_generation();
        let mut stored = StoredAttrs::default();
        attrs.apply_to(&mut stored);
        objects.insert(
            path.to_string(),
            StoredObject {
                data,
                generation,
                created: Utc::now(),
                attrs: stored,
            },
        );
        drop(objects);

        Ok(WriteResult::Success { generation })
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        let objects = self.objects.read().map_err(poisoned)?;

        objects
            .get(path)
            .map(|o| o.data.clone())
            .ok_or_else(|| Error::NotFound(format!("object not found: {path}")))
    }

    async fn get_stream(&self, path: &str) -> Result<ByteStream> {
        let data = self.get(path).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(data) })))
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        attrs: &ObjectAttrs,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        self.insert(path, data, attrs, precondition)
    }

    async fn put_stream(
        &self,
        path: &str,
        mut body: ByteStream,
        attrs: &ObjectAttrs,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let mut buf = Vec::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        self.insert(path, Bytes::from(buf), attrs, precondition)
    }

    async fn delete(&self, path: &str, precondition: WritePrecondition) -> Result<DeleteResult> {
        let mut objects = self.objects.write().map_err(poisoned)?;

        let Some(current) = objects.get(path) else {
            return Ok(DeleteResult::NotFound);
        };
        if let WritePrecondition::GenerationMatch(expected) = precondition {
            if current.generation != expected {
                return Ok(DeleteResult::PreconditionFailed);
            }
        }
        objects.remove(path);
        Ok(DeleteResult::Deleted)
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        let objects = self.objects.read().map_err(poisoned)?;
        Ok(objects.get(path).map(|o| o.meta(path)))
    }

    async fn update(&self, path: &str, attrs: &ObjectAttrs) -> Result<ObjectMeta> {
        let mut objects = self.objects.write().map_err(poisoned)?;
        let obj = objects
            .get_mut(path)
            .ok_or_else(|| Error::NotFound(format!("object not found: {path}")))?;
        attrs.apply_to(&mut obj.attrs);
        obj.attrs.updated = Some(Utc::now());
        Ok(obj.meta(path))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let objects = self.objects.read().map_err(poisoned)?;

        let mut listed: Vec<ObjectMeta> = objects
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(path, obj)| obj.meta(path))
            .collect();
        listed.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backend_roundtrip() {
        let backend = MemoryBackend::new();
        let data = Bytes::from("hello world");

        let result = backend
            .put(
                "test/file.txt",
                data.clone(),
                &ObjectAttrs::new(),
                WritePrecondition::None,
            )
            .await
            .expect("put should succeed");
        assert!(matches!(result, WriteResult::Success { .. }));

        let retrieved = backend
            .get("test/file.txt")
            .await
            .expect("get should succeed");
        assert_eq!(retrieved, data);
    }

    #[tokio::test]
    async fn test_precondition_does_not_exist() {
        let backend = MemoryBackend::new();
        let attrs = ObjectAttrs::new();

        let first = backend
            .put("new.txt", Bytes::from("a"), &attrs, WritePrecondition::DoesNotExist)
            .await
            .expect("put");
        let WriteResult::Success { generation } = first else {
            panic!("expected success");
        };

        let second = backend
            .put("new.txt", Bytes::from("b"), &attrs, WritePrecondition::DoesNotExist)
            .await
            .expect("put");
        assert_eq!(
            second,
            WriteResult::PreconditionFailed {
                current: Some(generation)
            }
        );
    }

    #[tokio::test]
    async fn test_generation_match_on_write_and_delete() {
        let backend = MemoryBackend::new();
        let attrs = ObjectAttrs::new();

        let WriteResult::Success { generation: g1 } = backend
            .put("gen.txt", Bytes::from("v1"), &attrs, WritePrecondition::None)
            .await
            .expect("put")
        else {
            panic!("expected success");
        };

        let WriteResult::Success { generation: g2 } = backend
            .put(
                "gen.txt",
                Bytes::from("v2"),
                &attrs,
                WritePrecondition::GenerationMatch(g1),
            )
            .await
            .expect("put")
        else {
            panic!("expected success");
        };
        assert!(g2 > g1);

        let stale = backend
            .delete("gen.txt", WritePrecondition::GenerationMatch(g1))
            .await
            .expect("delete");
        assert_eq!(stale, DeleteResult::PreconditionFailed);

        let deleted = backend
            .delete("gen.txt", WritePrecondition::GenerationMatch(g2))
            .await
            .expect("delete");
        assert_eq!(deleted, DeleteResult::Deleted);

        let missing = backend
            .delete("gen.txt", WritePrecondition::None)
            .await
            .expect("delete");
        assert_eq!(missing, DeleteResult::NotFound);
    }

    #[tokio::test]
    async fn test_recreated_object_gets_fresh_generation() {
        let backend = MemoryBackend::new();
        let attrs = ObjectAttrs::new();

        let WriteResult::Success { generation: g1 } = backend
            .put("x", Bytes::new(), &attrs, WritePrecondition::DoesNotExist)
            .await
            .expect("put")
        else {
            panic!("expected success");
        };
        backend
            .delete("x", WritePrecondition::None)
            .await
            .expect("delete");
        let WriteResult::Success { generation: g2 } = backend
            .put("x", Bytes::new(), &attrs, WritePrecondition::DoesNotExist)
            .await
            .expect("put")
        else {
            panic!("expected success");
        };
        assert_ne!(g1, g2);
    }

    #[tokio::test]
    async fn test_update_replaces_metadata_and_keeps_other_attrs() {
        let backend = MemoryBackend::new();
        backend
            .put(
                "a",
                Bytes::from("x"),
                &ObjectAttrs::new()
                    .with_content_type("text/plain")
                    .with_metadata("old", "1"),
                WritePrecondition::None,
            )
            .await
            .expect("put");

        let meta = backend
            .update(
                "a",
                &ObjectAttrs::new()
                    .with_cache_control("no-cache")
                    .with_metadata("new", "2"),
            )
            .await
            .expect("update");

        assert_eq!(meta.content_type.as_deref(), Some("text/plain"));
        assert_eq!(meta.cache_control.as_deref(), Some("no-cache"));
        assert_eq!(meta.metadata.len(), 1);
        assert_eq!(meta.metadata.get("new").map(String::as_str), Some("2"));
    }

    #[tokio::test]
    async fn test_update_missing_object_is_not_found() {
        let backend = MemoryBackend::new();
        let err = backend
            .update("missing", &ObjectAttrs::new().with_cache_control("no-cache"))
            .await
            .expect_err("should fail");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_put_stream_aborts_on_stream_error() {
        let backend = MemoryBackend::new();
        let body: ByteStream = Box::pin(futures::stream::iter(vec![
            Ok(Bytes::from("partial")),
            Err(Error::transport("reader failed")),
        ]));

        let result = backend
            .put_stream("s", body, &ObjectAttrs::new(), WritePrecondition::None)
            .await;
        assert!(result.is_err());
        assert!(backend.head("s").await.expect("head").is_none());
    }

    #[test]
    fn test_attrs_validation() {
        assert!(ObjectAttrs::new().validate().is_ok());
        assert!(
            ObjectAttrs::new()
                .with_cache_control("")
                .validate()
                .is_err()
        );
        assert!(
            ObjectAttrs::new()
                .with_metadata(" ", "v")
                .validate()
                .is_err()
        );
        assert!(
            ObjectAttrs::new()
                .with_content_type("text/plain\nX-Injected: 1")
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_generation_parse() {
        let g: Generation = "1712345".parse().expect("parse");
        assert_eq!(g.get(), 1_712_345);
        assert!("abc".parse::<Generation>().is_err());
    }
}
