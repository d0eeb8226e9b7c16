//! Chart repository over a bucket.
//!
//! Layout:
//!
//! ```text
//! <prefix>index.yaml          # authoritative index, Cache-Control: no-cache
//! <prefix>charts/<name>.tgz   # chart archives, short public cache
//! <prefix>.repo.lk            # repository lock object
//! ```
//!
//! Publishing follows one sequence: lock, upload the new archives, upload the
//! regenerated index, unlock. The index upload is the publication point;
//! archives without an index entry are invisible to clients.

use std::path::{Path, PathBuf};
use std::time::Duration;

use fleet_core::{
    Bucket, BucketFactory, BucketOptions, Error, Generation, Lock, LockOptions, ObjectAttrs,
    Result,
};

/// Directory holding chart archives.
pub const CHARTS_DIR: &str = "charts/";

/// Name of the repository index.
pub const INDEX_OBJECT: &str = "index.yaml";

/// Default lock object name.
pub const DEFAULT_LOCK_OBJECT: &str = ".repo.lk";

/// Default time `lock` may wait.
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(2 * 60);

/// Default age after which a repository lock is considered abandoned.
pub const DEFAULT_LOCK_EXPIRE: Duration = Duration::from_secs(5 * 60);

/// Default cache policy for chart archives.
pub const DEFAULT_CHART_CACHE_CONTROL: &str = "public, max-age=300";

/// Default cache policy for the index.
pub const DEFAULT_INDEX_CACHE_CONTROL: &str = "no-cache";

const CHART_CONTENT_TYPE: &str = "application/gzip";
const INDEX_CONTENT_TYPE: &str = "text/yaml";

/// Options for a chart repository handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoOptions {
    /// How long `lock` may wait for the repository lock.
    pub lock_wait_timeout: Duration,
    /// Age after which a lock is reclaimed as stale.
    pub lock_expire_timeout: Duration,
    /// Lock object name, relative to the bucket prefix.
    pub lock_object: String,
    /// Cache-Control applied to chart archives.
    pub chart_cache_control: String,
    /// Cache-Control applied to the index.
    pub index_cache_control: String,
    /// Reject uploads while unlocked instead of warning.
    pub enforce_lock: bool,
}

impl Default for RepoOptions {
    fn default() -> Self {
        Self {
            lock_wait_timeout: DEFAULT_LOCK_WAIT,
            lock_expire_timeout: DEFAULT_LOCK_EXPIRE,
            lock_object: DEFAULT_LOCK_OBJECT.to_string(),
            chart_cache_control: DEFAULT_CHART_CACHE_CONTROL.to_string(),
            index_cache_control: DEFAULT_INDEX_CACHE_CONTROL.to_string(),
            enforce_lock: false,
        }
    }
}

impl RepoOptions {
    /// Sets the lock wait timeout.
    #[must_use]
    pub const fn with_lock_wait_timeout(mut self, timeout: Duration) -> Self {
        self.lock_wait_timeout = timeout;
        self
    }

    /// Sets the lock expiry.
    #[must_use]
    pub const fn with_lock_expire_timeout(mut self, timeout: Duration) -> Self {
        self.lock_expire_timeout = timeout;
        self
    }

    /// Sets the lock object name.
    #[must_use]
    pub fn with_lock_object(mut self, name: impl Into<String>) -> Self {
        self.lock_object = name.into();
        self
    }

    /// Sets the chart archive cache policy.
    #[must_use]
    pub fn with_chart_cache_control(mut self, value: impl Into<String>) -> Self {
        self.chart_cache_control = value.into();
        self
    }

    /// Sets the index cache policy.
    #[must_use]
    pub fn with_index_cache_control(mut self, value: impl Into<String>) -> Self {
        self.index_cache_control = value.into();
        self
    }

    /// Makes uploads fail unless the repository is locked.
    #[must_use]
    pub const fn with_enforce_lock(mut self, enforce: bool) -> Self {
        self.enforce_lock = enforce;
        self
    }

    /// Checks the options.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty lock object or cache policy.
    pub fn validate(&self) -> Result<()> {
        if self.lock_object.trim().is_empty() {
            return Err(Error::InvalidArgument("lock object cannot be empty".into()));
        }
        ObjectAttrs::new()
            .with_cache_control(self.chart_cache_control.clone())
            .validate()?;
        ObjectAttrs::new()
            .with_cache_control(self.index_cache_control.clone())
            .validate()?;
        Ok(())
    }
}

/// Handle to a chart repository.
///
/// The handle holds at most one lock generation. Uploads are meant to run
/// between [`lock`](Self::lock) and [`unlock`](Self::unlock); by default an
/// unlocked upload only logs a warning, see [`RepoOptions::enforce_lock`].
#[derive(Debug)]
pub struct ChartRepo {
    bucket: Bucket,
    options: RepoOptions,
    lock: Lock,
    held: Option<Generation>,
}

impl ChartRepo {
    /// Creates a repository handle over `bucket`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the options are invalid.
    pub fn new(bucket: Bucket, options: RepoOptions) -> Result<Self> {
        options.validate()?;
        let lock = bucket.new_lock(
            &options.lock_object,
            options.lock_wait_timeout,
            LockOptions::default().with_expires_after(options.lock_expire_timeout),
        );
        Ok(Self {
            bucket,
            options,
            lock,
            held: None,
        })
    }

    /// Opens the bucket through `factory` and creates a handle over it.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket cannot be opened or the options are
    /// invalid.
    pub async fn open(
        factory: &dyn BucketFactory,
        bucket_name: &str,
        bucket_options: BucketOptions,
        options: RepoOptions,
    ) -> Result<Self> {
        let bucket = factory.bucket(bucket_name, bucket_options).await?;
        Self::new(bucket, options)
    }

    /// The bucket the repository lives in.
    #[must_use]
    pub fn bucket(&self) -> &Bucket {
        &self.bucket
    }

    /// The handle's options.
    #[must_use]
    pub fn options(&self) -> &RepoOptions {
        &self.options
    }

    /// Public HTTP URL of the repository.
    #[must_use]
    pub fn url(&self) -> String {
        format!("https://{}.storage.googleapis.com", self.bucket.name())
    }

    /// Returns true iff this handle holds the repository lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.held.is_some()
    }

    /// Acquires the repository lock.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if this handle already holds the lock,
    /// `Timeout` if another holder keeps it past the wait timeout.
    pub async fn lock(&mut self) -> Result<()> {
        if self.held.is_some() {
            return Err(Error::InvariantViolation("repo is already locked".into()));
        }
        let generation = self.lock.acquire().await?;
        self.held = Some(generation);
        tracing::info!(repo = %self.url(), "repo locked");
        Ok(())
    }

    /// Releases the repository lock.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if this handle does not hold the lock.
    pub async fn unlock(&mut self) -> Result<()> {
        let Some(generation) = self.held else {
            return Err(Error::InvariantViolation("repo is not locked".into()));
        };
        self.lock.release(generation).await?;
        self.held = None;
        tracing::info!(repo = %self.url(), "repo unlocked");
        Ok(())
    }

    fn check_locked(&self, what: &str) -> Result<()> {
        if self.held.is_some() {
            return Ok(());
        }
        if self.options.enforce_lock {
            return Err(Error::InvariantViolation(format!(
                "{what} requires the repo lock"
            )));
        }
        tracing::warn!(repo = %self.url(), "{what} called without holding the repo lock");
        Ok(())
    }

    /// Uploads a chart archive to `charts/<file name>`.
    ///
    /// Call while locked.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the path has no file name, or the upload
    /// error.
    pub async fn upload_chart(&self, local_path: &Path) -> Result<()> {
        self.check_locked("upload_chart")?;
        let name = chart_object_name(local_path)?;
        self.bucket
            .upload(
                local_path,
                &name,
                ObjectAttrs::new()
                    .with_content_type(CHART_CONTENT_TYPE)
                    .with_cache_control(self.options.chart_cache_control.clone()),
            )
            .await?;
        tracing::info!(chart = %name, "uploaded chart");
        Ok(())
    }

    /// Uploads the repository index.
    ///
    /// Call while locked.
    ///
    /// # Errors
    ///
    /// Returns the upload error.
    pub async fn upload_index(&self, local_path: &Path) -> Result<()> {
        self.check_locked("upload_index")?;
        self.bucket
            .upload(
                local_path,
                INDEX_OBJECT,
                ObjectAttrs::new()
                    .with_content_type(INDEX_CONTENT_TYPE)
                    .with_cache_control(self.options.index_cache_control.clone()),
            )
            .await?;
        tracing::info!("uploaded index");
        Ok(())
    }

    /// Returns true if the index exists.
    ///
    /// # Errors
    ///
    /// Returns transport errors.
    pub async fn has_index(&self) -> Result<bool> {
        self.bucket.exists(INDEX_OBJECT).await
    }

    /// Downloads the index to a local file.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if there is no index yet.
    pub async fn download_index(&self, local_path: &Path) -> Result<()> {
        self.bucket.download(INDEX_OBJECT, local_path).await
    }

    /// Publishes charts and their index under the repository lock.
    ///
    /// Locks, uploads every chart, uploads the index, and unlocks on every
    /// exit path. The first error wins.
    ///
    /// # Errors
    ///
    /// Returns the first lock, upload or unlock error.
    pub async fn publish(&mut self, chart_paths: &[PathBuf], index_path: &Path) -> Result<()> {
        self.lock().await?;

        let uploaded = async {
            for chart in chart_paths {
                self.upload_chart(chart).await?;
            }
            self.upload_index(index_path).await
        }
        .await;

        let unlocked = self.unlock().await;
        uploaded.and(unlocked)
    }
}

impl Drop for ChartRepo {
    fn drop(&mut self) {
        let Some(generation) = self.held.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(repo = %self.url(), "repo handle dropped while locked");
            return;
        };
        let lock = self.lock.clone();
        handle.spawn(async move {
            if let Err(e) = lock.release(generation).await {
                tracing::warn!(error = %e, "best-effort repo unlock failed");
            }
        });
    }
}

fn chart_object_name(local_path: &Path) -> Result<String> {
    let file_name = local_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            Error::InvalidArgument(format!(
                "chart path has no UTF-8 file name: {}",
                local_path.display()
            ))
        })?;
    Ok(format!("{CHARTS_DIR}{file_name}"))
}
