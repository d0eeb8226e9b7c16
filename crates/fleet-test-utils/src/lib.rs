//! Shared test utilities for fleet integration tests.
//!
//! This crate provides:
//! - [`TracingMemoryBackend`]: In-memory storage with operation recording
//!   and failure injection
//! - [`memory_bucket`]: a bucket handle over a fresh tracing backend
//!
//! # Example
//!
//! ```rust,ignore
//! use fleet_test_utils::memory_bucket;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let (bucket, backend) = memory_bucket("test-bucket", "");
//!     bucket.write("a", "1", ObjectAttrs::new()).await.unwrap();
//!     assert_eq!(backend.operations().len(), 1);
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod storage;

use std::sync::Arc;

use fleet_core::{Bucket, BucketOptions};

pub use storage::*;

/// Opens a bucket handle over a fresh [`TracingMemoryBackend`].
pub fn memory_bucket(name: &str, prefix: &str) -> (Bucket, TracingMemoryBackend) {
    let backend = TracingMemoryBackend::new();
    let bucket = Bucket::with_backend(
        name,
        Arc::new(backend.clone()),
        BucketOptions::default().with_prefix(prefix),
    )
    .expect("valid bucket");
    (bucket, backend)
}

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("fleet_core=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
