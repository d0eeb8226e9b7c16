//! Bucket factories.
//!
//! Higher layers (chart repositories, artifact managers, the CLI) open
//! buckets through a [`BucketFactory`] so tests can swap GCS for memory.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::bucket::{Bucket, BucketOptions};
use crate::error::{Error, Result};
use crate::storage::MemoryBackend;

/// Opens bucket handles by name.
#[async_trait]
pub trait BucketFactory: Send + Sync {
    /// Opens a handle to `name`.
    async fn bucket(&self, name: &str, options: BucketOptions) -> Result<Bucket>;
}

/// Factory handing out memory-backed buckets.
///
/// Handles opened for the same name share contents, so separate handles
/// behave like separate processes against one bucket.
#[derive(Debug, Clone, Default)]
pub struct MemoryBucketFactory {
    buckets: Arc<Mutex<HashMap<String, MemoryBackend>>>,
}

impl MemoryBucketFactory {
    /// Creates an empty factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the backend behind `name`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the registry lock is poisoned.
    pub fn backend(&self, name: &str) -> Result<MemoryBackend> {
        let mut buckets = self
            .buckets
            .lock()
            .map_err(|_| Error::internal("bucket registry lock poisoned"))?;
        Ok(buckets.entry(name.to_string()).or_default().clone())
    }
}

#[async_trait]
impl BucketFactory for MemoryBucketFactory {
    async fn bucket(&self, name: &str, options: BucketOptions) -> Result<Bucket> {
        let backend = self.backend(name)?;
        Bucket::with_backend(name, Arc::new(backend), options)
    }
}

/// Factory opening GCS buckets.
#[cfg(feature = "gcp")]
#[derive(Debug, Clone, Copy, Default)]
pub struct GcsBucketFactory;

#[cfg(feature = "gcp")]
#[async_trait]
impl BucketFactory for GcsBucketFactory {
    async fn bucket(&self, name: &str, options: BucketOptions) -> Result<Bucket> {
        Bucket::open(name, options).await
    }
}
