//! Distributed lock contract tests.
//!
//! # Invariants Tested
//!
//! 1. **Round-trip**: acquire then release leaves no lock object behind
//! 2. **Mutual exclusion**: concurrent acquirers never both succeed
//! 3. **Stale reclamation**: an expired lock is swept with a fresh generation
//! 4. **Release by non-owner**: releasing a reclaimed generation is a no-op
//! 5. **Cancellation**: a waiting acquirer returns promptly when cancelled

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use fleet_core::{
    Bucket, BucketOptions, CancellationToken, ErrorKind, LockOptions, MemoryBackend,
    WritePrecondition,
};
use fleet_test_utils::{StorageOp, init_test_logging, memory_bucket};

fn memory_bucket_with(backend: &MemoryBackend, token: CancellationToken) -> Bucket {
    Bucket::with_backend(
        "test-bucket",
        Arc::new(backend.clone()),
        BucketOptions::default().with_cancellation(token),
    )
    .expect("bucket")
}

#[tokio::test]
async fn lock_round_trip_and_timeout() {
    init_test_logging();
    let (bucket, _) = memory_bucket("test-bucket", "");
    let options = LockOptions::default().with_expires_after(Duration::from_secs(5));
    let first = bucket.new_lock("test.lk", Duration::from_secs(1), options);
    let second = bucket.new_lock("test.lk", Duration::from_secs(1), options);

    assert!(!bucket.exists("test.lk").await.expect("exists"));
    let g1 = first.acquire().await.expect("acquire");

    let started = Instant::now();
    let err = second.acquire().await.expect_err("held elsewhere");
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(
        err.to_string(),
        "timed out after 1s waiting for lock: gs://test-bucket/test.lk"
    );

    first.release(g1).await.expect("release");
    assert!(!bucket.exists("test.lk").await.expect("exists"));
}

#[tokio::test]
async fn stale_lock_is_reclaimed_and_old_release_is_harmless() {
    let backend = MemoryBackend::new();
    let bucket = memory_bucket_with(&backend, CancellationToken::new());
    let options = LockOptions::default().with_expires_after(Duration::from_secs(5));
    let a = bucket.new_lock("test.lk", Duration::from_secs(30), options);
    let b = bucket.new_lock("test.lk", Duration::from_secs(30), options);

    let g1 = a.acquire().await.expect("acquire");
    backend
        .backdate("test.lk", chrono::Duration::milliseconds(5_500))
        .expect("backdate");

    let started = Instant::now();
    let g2 = b.acquire().await.expect("reclaim");
    assert!(started.elapsed() < Duration::from_secs(5), "reclaim must not wait");
    assert_ne!(g1, g2);

    a.release(g1).await.expect("release of reclaimed lock");
    assert_eq!(bucket.attrs("test.lk").await.expect("attrs").generation, g2);

    b.release(g2).await.expect("release");
    assert!(!bucket.exists("test.lk").await.expect("exists"));
}

#[tokio::test]
async fn stale_lock_is_reclaimed_in_real_time() {
    let (bucket, _) = memory_bucket("test-bucket", "locks/");
    let options = LockOptions::default().with_expires_after(Duration::from_millis(300));
    let a = bucket.new_lock("job.lk", Duration::from_secs(5), options);
    let b = bucket.new_lock("job.lk", Duration::from_secs(5), options);

    let g1 = a.acquire().await.expect("acquire");
    tokio::time::sleep(Duration::from_millis(400)).await;
    let g2 = b.acquire().await.expect("reclaim");
    assert_ne!(g1, g2);
    b.release(g2).await.expect("release");
}

#[tokio::test]
async fn concurrent_acquirers_are_mutually_exclusive() {
    init_test_logging();
    let (bucket, _) = memory_bucket("test-bucket", "");
    let holders = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let lock = bucket.new_lock(
            "shared.lk",
            Duration::from_secs(10),
            LockOptions::default().with_backoff_starting_interval(Duration::from_millis(5)),
        );
        let holders = Arc::clone(&holders);
        let max_seen = Arc::clone(&max_seen);
        tasks.push(tokio::spawn(async move {
            let g = lock.acquire().await.expect("acquire");
            let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
            max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            holders.fetch_sub(1, Ordering::SeqCst);
            lock.release(g).await.expect("release");
        }));
    }
    for task in tasks {
        task.await.expect("join");
    }

    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    assert!(!bucket.exists("shared.lk").await.expect("exists"));
}

#[tokio::test]
async fn cancellation_stops_a_waiting_acquirer() {
    init_test_logging();
    let backend = MemoryBackend::new();
    let holder = memory_bucket_with(&backend, CancellationToken::new());
    let token = CancellationToken::new();
    let waiter = memory_bucket_with(&backend, token.clone());

    let held = holder
        .new_lock("c.lk", Duration::ZERO, LockOptions::default())
        .acquire()
        .await
        .expect("acquire");

    let lock = waiter.new_lock("c.lk", Duration::from_secs(60), LockOptions::default());
    let pending = tokio::spawn(async move { lock.acquire().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();

    let err = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .expect("prompt")
        .expect("join")
        .expect_err("cancelled");
    assert_eq!(err.kind(), ErrorKind::Cancelled);

    // Cancellation never releases someone else's hold.
    assert_eq!(
        holder.attrs("c.lk").await.expect("attrs").generation,
        held
    );
}

#[tokio::test]
async fn acquire_creates_with_does_not_exist_and_releases_by_generation() {
    let (bucket, backend) = memory_bucket("test-bucket", "");
    let lock = bucket.new_lock("ops.lk", Duration::ZERO, LockOptions::default());

    let g = lock.acquire().await.expect("acquire");
    lock.release(g).await.expect("release");

    let ops = backend.operations();
    assert!(ops.contains(&StorageOp::Put {
        path: "ops.lk".into(),
        precondition: WritePrecondition::DoesNotExist,
    }));
    assert!(ops.contains(&StorageOp::Delete {
        path: "ops.lk".into(),
        precondition: WritePrecondition::GenerationMatch(g),
    }));
    // No sweep without an expiry.
    assert!(!ops.iter().any(|op| matches!(op, StorageOp::Head { .. })));
}

#[tokio::test]
async fn store_errors_surface_without_retry() {
    let (bucket, backend) = memory_bucket("test-bucket", "");
    backend.inject_failure("err.lk");
    let lock = bucket.new_lock("err.lk", Duration::from_secs(10), LockOptions::default());

    let started = Instant::now();
    let err = lock.acquire().await.expect_err("injected");
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(backend.operations().len(), 1);
}

#[tokio::test]
async fn dropped_guard_releases_in_background() {
    init_test_logging();
    let (bucket, _) = memory_bucket("test-bucket", "");
    let lock = bucket.new_lock("guard.lk", Duration::ZERO, LockOptions::default());
    {
        let _guard = lock.acquire_guard().await.expect("acquire");
        assert!(bucket.exists("guard.lk").await.expect("exists"));
    }

    for _ in 0..50 {
        if !bucket.exists("guard.lk").await.expect("exists") {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("guard drop did not release the lock");
}
