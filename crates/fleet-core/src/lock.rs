//! Distributed advisory lock backed by a single object.
//!
//! The lock uses the store's generation preconditions as its only
//! coordination primitive:
//! - **Acquire** creates the lock object with a `DoesNotExist` precondition.
//!   The generation of the created object is the lock id.
//! - **Release** deletes the object with a `GenerationMatch` precondition, so
//!   a holder can only ever remove its own generation.
//! - **Stale sweep**: when `expires_after` is non-zero, every acquire attempt
//!   first deletes a lock object older than the expiry, again keyed on the
//!   observed generation.
//!
//! The lock is advisory and time-bounded. A holder that outlives the expiry
//! may lose the lock to a sweeper without noticing.
//!
//! # Example
//!
//! ```rust,ignore
//! let lock = bucket.new_lock("deploy.lk", Duration::from_secs(30), LockOptions::default());
//! let generation = lock.acquire().await?;
//! // critical section
//! lock.release(generation).await?;
//! ```

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use ulid::Ulid;

use crate::bucket::Bucket;
use crate::error::{Error, Result};
use crate::oplog::Op;
use crate::storage::{DeleteResult, Generation, ObjectAttrs, WritePrecondition, WriteResult};

/// Default first backoff interval between acquire attempts.
pub const DEFAULT_BACKOFF_STARTING_INTERVAL: Duration = Duration::from_millis(100);

/// Default backoff growth factor.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Options for a lock handle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LockOptions {
    /// Absolute deadline for `acquire`, measured from the first attempt.
    pub max_wait: Duration,
    /// Age after which a lock object is considered abandoned. Zero disables
    /// the stale sweep.
    pub expires_after: Duration,
    /// First sleep between attempts.
    pub backoff_starting_interval: Duration,
    /// Growth factor applied to the sleep after each failed attempt.
    pub backoff_multiplier: f64,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            max_wait: Duration::ZERO,
            expires_after: Duration::ZERO,
            backoff_starting_interval: DEFAULT_BACKOFF_STARTING_INTERVAL,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl LockOptions {
    /// Sets the acquire deadline.
    #[must_use]
    pub const fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Sets the stale-lock expiry.
    #[must_use]
    pub const fn with_expires_after(mut self, expires_after: Duration) -> Self {
        self.expires_after = expires_after;
        self
    }

    /// Sets the first backoff interval.
    #[must_use]
    pub const fn with_backoff_starting_interval(mut self, interval: Duration) -> Self {
        self.backoff_starting_interval = interval;
        self
    }

    /// Sets the backoff growth factor.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Checks the options.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a zero starting interval or a multiplier
    /// below 1.
    pub fn validate(&self) -> Result<()> {
        if self.backoff_starting_interval.is_zero() {
            return Err(Error::InvalidArgument(
                "backoff starting interval must be greater than zero".into(),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(Error::InvalidArgument(format!(
                "backoff multiplier must be a finite number >= 1 (got {})",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }
}

/// Body of the lock object. Informational only; ownership is the generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    /// Id of the handle that created the object.
    pub holder_id: String,
    /// When the object was created, by the holder's clock.
    pub acquired_at: DateTime<Utc>,
}

/// Handle to an advisory lock object.
///
/// A handle carries no held state; the generation returned by
/// [`acquire`](Self::acquire) is the capability needed to release. Whoever
/// acquires owns that generation and must be the one to release it.
#[derive(Debug, Clone)]
pub struct Lock {
    bucket: Bucket,
    object: String,
    options: LockOptions,
    holder_id: Ulid,
}

impl Lock {
    pub(crate) fn new(bucket: Bucket, object: &str, options: LockOptions) -> Self {
        Self {
            bucket,
            object: object.to_string(),
            options,
            holder_id: Ulid::new(),
        }
    }

    /// The lock object's name, relative to the bucket prefix.
    #[must_use]
    pub fn object(&self) -> &str {
        &self.object
    }

    /// The lock object's URL.
    #[must_use]
    pub fn url(&self) -> String {
        self.bucket.url(&self.object)
    }

    /// The handle's options.
    #[must_use]
    pub fn options(&self) -> &LockOptions {
        &self.options
    }

    /// Id written into lock objects created by this handle.
    #[must_use]
    pub fn holder_id(&self) -> Ulid {
        self.holder_id
    }

    /// Acquires the lock, waiting up to `max_wait`.
    ///
    /// Returns the generation of the created lock object.
    ///
    /// # Errors
    ///
    /// - `Timeout` if the lock is still held when the deadline passes
    /// - `Cancelled` if the bucket's token fires
    /// - any other store error, immediately and without retry
    pub async fn acquire(&self) -> Result<Generation> {
        self.options.validate()?;
        let url = self.url();
        let cancel = self.bucket.cancellation_token().clone();
        let deadline = Instant::now() + self.options.max_wait;
        let mut backoff = self.options.backoff_starting_interval;
        let mut attempts = 0_u32;

        loop {
            attempts += 1;
            if !self.options.expires_after.is_zero() {
                self.sweep().await?;
            }

            let record = LockRecord {
                holder_id: self.holder_id.to_string(),
                acquired_at: Utc::now(),
            };
            let body = serde_json::to_vec(&record)
                .map_err(|e| Error::internal(format!("failed to encode lock record: {e}")))?;

            match self
                .bucket
                .put_checked(
                    Op::Lock,
                    &self.object,
                    Bytes::from(body),
                    &ObjectAttrs::new().with_content_type("application/json"),
                    WritePrecondition::DoesNotExist,
                )
                .await?
            {
                WriteResult::Success { generation } => {
                    tracing::debug!(url = %url, %generation, attempts, "lock acquired");
                    return Ok(generation);
                }
                WriteResult::PreconditionFailed { .. } => {}
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::debug!(url = %url, attempts, "lock wait deadline reached");
                return Err(Error::Timeout {
                    waited: self.options.max_wait,
                    url,
                });
            }

            let sleep = backoff.min(deadline - now);
            tracing::trace!(url = %url, sleep_ms = sleep.as_millis(), "lock held, backing off");
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(Error::Cancelled.in_operation(Op::Lock.as_str(), url));
                }
                () = tokio::time::sleep(sleep) => {}
            }

            let cap = self.options.max_wait.max(self.options.backoff_starting_interval);
            backoff = Duration::try_from_secs_f64(backoff.as_secs_f64() * self.options.backoff_multiplier)
                .unwrap_or(cap)
                .min(cap);
        }
    }

    /// Deletes the lock object if it is older than `expires_after`.
    async fn sweep(&self) -> Result<()> {
        let Some(meta) = self.bucket.try_attrs(Op::Lock, &self.object).await? else {
            return Ok(());
        };

        let age = (Utc::now() - meta.created).to_std().unwrap_or(Duration::ZERO);
        if age < self.options.expires_after {
            return Ok(());
        }

        match self
            .bucket
            .delete_checked(
                Op::Lock,
                &self.object,
                WritePrecondition::GenerationMatch(meta.generation),
            )
            .await?
        {
            DeleteResult::Deleted => {
                tracing::info!(
                    url = %self.url(),
                    age_secs = age.as_secs(),
                    "removed stale lock"
                );
            }
            // Another sweeper or the holder got there first.
            DeleteResult::NotFound | DeleteResult::PreconditionFailed => {}
        }
        Ok(())
    }

    /// Releases a lock acquired by this owner.
    ///
    /// If the lock was already reclaimed as stale, logs a warning and
    /// succeeds without touching the current holder's object.
    ///
    /// # Errors
    ///
    /// Returns store errors other than the reclaimed-lock cases.
    pub async fn release(&self, generation: Generation) -> Result<()> {
        let outcome = self
            .bucket
            .delete_checked(
                Op::Unlock,
                &self.object,
                WritePrecondition::GenerationMatch(generation),
            )
            .await?;

        match outcome {
            DeleteResult::Deleted => {
                tracing::debug!(url = %self.url(), %generation, "lock released");
            }
            DeleteResult::PreconditionFailed => {
                tracing::warn!(
                    url = %self.url(),
                    "lock was reclaimed by another holder before release"
                );
            }
            DeleteResult::NotFound => {
                tracing::warn!(url = %self.url(), "lock object vanished before release");
            }
        }
        Ok(())
    }

    /// Acquires the lock and returns a guard that releases it.
    ///
    /// # Errors
    ///
    /// Same as [`acquire`](Self::acquire).
    pub async fn acquire_guard(&self) -> Result<LockGuard> {
        let generation = self.acquire().await?;
        Ok(LockGuard {
            lock: self.clone(),
            generation,
            released: false,
        })
    }
}

/// Scoped ownership of an acquired lock.
///
/// Prefer [`release`](Self::release); dropping the guard spawns a
/// best-effort release on the current runtime, if there is one.
#[derive(Debug)]
pub struct LockGuard {
    lock: Lock,
    generation: Generation,
    released: bool,
}

impl LockGuard {
    /// The held generation.
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// The lock this guard holds.
    #[must_use]
    pub fn lock(&self) -> &Lock {
        &self.lock
    }

    /// Releases the lock.
    ///
    /// # Errors
    ///
    /// Same as [`Lock::release`].
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        self.lock.release(self.generation).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Without a runtime the expiry sweep is the only cleanup.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(url = %self.lock.url(), "lock guard dropped outside a runtime");
            return;
        };
        let lock = self.lock.clone();
        let generation = self.generation;
        handle.spawn(async move {
            if let Err(e) = lock.release(generation).await {
                tracing::warn!(error = %e, "best-effort lock release failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::BucketOptions;
    use crate::storage::MemoryBackend;
    use std::sync::Arc;

    fn bucket() -> (Bucket, MemoryBackend) {
        let backend = MemoryBackend::new();
        let bucket = Bucket::with_backend("b", Arc::new(backend.clone()), BucketOptions::default())
            .expect("bucket");
        (bucket, backend)
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let (bucket, _) = bucket();
        let lock = bucket.new_lock("a.lk", Duration::from_millis(200), LockOptions::default());

        let generation = lock.acquire().await.expect("acquire");
        assert!(bucket.exists("a.lk").await.expect("exists"));

        let record: LockRecord =
            serde_json::from_slice(&bucket.read("a.lk").await.expect("read")).expect("json");
        assert_eq!(record.holder_id, lock.holder_id().to_string());

        lock.release(generation).await.expect("release");
        assert!(!bucket.exists("a.lk").await.expect("exists"));
    }

    #[tokio::test]
    async fn test_zero_wait_is_single_attempt() {
        let (bucket, _) = bucket();
        let first = bucket.new_lock("a.lk", Duration::ZERO, LockOptions::default());
        let second = bucket.new_lock("a.lk", Duration::ZERO, LockOptions::default());

        first.acquire().await.expect("acquire");
        let err = second.acquire().await.expect_err("held");
        assert_eq!(err.kind(), crate::ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_stale_lock_is_swept() {
        let (bucket, backend) = bucket();
        let options = LockOptions::default().with_expires_after(Duration::from_secs(60));
        let first = bucket.new_lock("a.lk", Duration::from_millis(100), options);
        let second = bucket.new_lock("a.lk", Duration::from_millis(100), options);

        let g1 = first.acquire().await.expect("acquire");
        backend
            .backdate("a.lk", chrono::Duration::seconds(61))
            .expect("backdate");

        let g2 = second.acquire().await.expect("reclaim");
        assert_ne!(g1, g2);

        first.release(g1).await.expect("stale release is ok");
        assert_eq!(bucket.attrs("a.lk").await.expect("attrs").generation, g2);

        second.release(g2).await.expect("release");
        assert!(!bucket.exists("a.lk").await.expect("exists"));
    }

    #[tokio::test]
    async fn test_guard_release() {
        let (bucket, _) = bucket();
        let lock = bucket.new_lock("g.lk", Duration::ZERO, LockOptions::default());
        let guard = lock.acquire_guard().await.expect("acquire");
        assert!(bucket.exists("g.lk").await.expect("exists"));
        guard.release().await.expect("release");
        assert!(!bucket.exists("g.lk").await.expect("exists"));
    }

    #[test]
    fn test_options_validation() {
        assert!(LockOptions::default().validate().is_ok());
        assert!(
            LockOptions::default()
                .with_backoff_multiplier(0.5)
                .validate()
                .is_err()
        );
        assert!(
            LockOptions::default()
                .with_backoff_starting_interval(Duration::ZERO)
                .validate()
                .is_err()
        );
    }
}
