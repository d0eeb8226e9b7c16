//! # fleet-artifacts
//!
//! Operational artifact capture.
//!
//! An [`ArtifactManager`] hands out [`MultiWriter`]s that tee one artifact
//! stream into a local file and a bucket object at the same time, plus any
//! extra sinks the caller supplies.
//!
//! ## Example
//!
//! ```rust,ignore
//! use fleet_artifacts::{ArtifactKind, ArtifactManager, ArtifactOptions, ArtifactTarget};
//! use fleet_core::WriteSink;
//!
//! let manager = ArtifactManager::new(
//!     ArtifactOptions::default().with_local_dir("/tmp/artifacts"),
//!     Some(bucket),
//! )?;
//! let target = ArtifactTarget::new("prod-eu", "api");
//! let mut w = manager.writer(&target, &ArtifactKind::ContainerLogs, "api-0.log").await?;
//! w.write(b"log line\n").await?;
//! w.close().await?;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod manager;
pub mod sink;

pub use fleet_core::WriteSink;
pub use manager::{
    ArtifactKind, ArtifactManager, ArtifactOptions, ArtifactTarget, Location, TIMESTAMP_FORMAT,
};
pub use sink::{FileSink, MultiWriter};
