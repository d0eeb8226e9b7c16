//! # fleet-core
//!
//! Object-store substrate for fleet tooling.
//!
//! This crate provides the storage layer the chart repository and the
//! artifact writers are built on:
//!
//! - **Bucket handle**: prefixed, cancellable, logged access to one bucket
//! - **Storage backends**: GCS over the JSON API, plus an in-memory backend
//! - **Streaming writer**: lazy uploads that commit on close
//! - **Distributed lock**: advisory locking through generation preconditions
//! - **Error types**: one error enum with a stable classification
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use fleet_core::prelude::*;
//!
//! let bucket = Bucket::with_backend(
//!     "my-bucket",
//!     Arc::new(MemoryBackend::new()),
//!     BucketOptions::default().with_prefix("staging/"),
//! )
//! .unwrap();
//! assert_eq!(bucket.url("index.yaml"), "gs://my-bucket/staging/index.yaml");
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod bucket;
pub mod config;
pub mod error;
pub mod factory;
#[cfg(feature = "gcp")]
pub mod gcs;
pub mod lock;
pub mod observability;
pub mod oplog;
pub mod storage;
pub mod writer;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use fleet_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::bucket::{Bucket, BucketOptions};
    pub use crate::config::GcsClientOptions;
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::factory::{BucketFactory, MemoryBucketFactory};
    pub use crate::lock::{Lock, LockGuard, LockOptions};
    pub use crate::storage::{
        Generation, MemoryBackend, ObjectAttrs, ObjectMeta, StorageBackend, WritePrecondition,
    };
    pub use crate::writer::{ObjectWriter, WriteSink};
}

pub use bucket::{Bucket, BucketOptions};
pub use tokio_util::sync::CancellationToken;
pub use config::GcsClientOptions;
pub use error::{Error, ErrorKind, Result};
pub use factory::{BucketFactory, MemoryBucketFactory};
#[cfg(feature = "gcp")]
pub use factory::GcsBucketFactory;
#[cfg(feature = "gcp")]
pub use gcs::GcsBackend;
pub use lock::{Lock, LockGuard, LockOptions, LockRecord};
pub use observability::{LogFormat, init_logging};
pub use storage::{
    ByteStream, DeleteResult, Generation, MemoryBackend, ObjectAttrs, ObjectMeta, StorageBackend,
    WritePrecondition, WriteResult,
};
pub use writer::{ObjectWriter, WriteSink};
