//! # fleet-charts
//!
//! Helm chart repository hosted on a storage bucket.
//!
//! The repository is a naming convention over a [`fleet_core::Bucket`]:
//! archives under `charts/`, one `index.yaml`, and a lock object guarding
//! publication. Archives get a short public cache policy and the index is
//! never cached, so clients see a new release as soon as the index lands.
//!
//! ## Example
//!
//! ```rust,ignore
//! use fleet_charts::{ChartRepo, RepoOptions};
//!
//! let mut repo = ChartRepo::new(bucket, RepoOptions::default())?;
//! repo.lock().await?;
//! repo.upload_chart(Path::new("dist/app-1.2.0.tgz")).await?;
//! repo.upload_index(Path::new("dist/index.yaml")).await?;
//! repo.unlock().await?;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod repo;

pub use repo::{
    CHARTS_DIR, ChartRepo, DEFAULT_CHART_CACHE_CONTROL, DEFAULT_INDEX_CACHE_CONTROL,
    DEFAULT_LOCK_EXPIRE, DEFAULT_LOCK_OBJECT, DEFAULT_LOCK_WAIT, INDEX_OBJECT, RepoOptions,
};
