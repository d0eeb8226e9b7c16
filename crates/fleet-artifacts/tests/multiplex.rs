//! Artifact fan-out tests against a local directory and a memory bucket.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use bytes::Bytes;
use chrono::{TimeZone, Utc};

use fleet_artifacts::{
    ArtifactKind, ArtifactManager, ArtifactOptions, ArtifactTarget, FileSink, MultiWriter,
    WriteSink,
};
use fleet_core::ErrorKind;
use fleet_test_utils::{init_test_logging, memory_bucket};

#[tokio::test]
async fn multiplex_fan_out() {
    init_test_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    let local = dir.path().join("a.log");
    let (bucket, _) = memory_bucket("artifacts", "");

    let mut w = MultiWriter::new(vec![
        Box::new(FileSink::open(&local).await.expect("open")),
        Box::new(bucket.writer("a.log")),
    ]);
    w.write(b"abc").await.expect("write");
    w.write(b"def").await.expect("write");
    w.close().await.expect("close");

    assert_eq!(tokio::fs::read(&local).await.expect("read local"), b"abcdef");
    assert_eq!(
        bucket.read("a.log").await.expect("read object"),
        Bytes::from("abcdef")
    );
}

#[tokio::test]
async fn manager_writes_both_copies_under_the_base_path() {
    init_test_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    let (bucket, _) = memory_bucket("artifacts", "runs/");
    let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
    let manager = ArtifactManager::new(
        ArtifactOptions::default()
            .with_local_dir(dir.path())
            .with_timestamp(ts),
        Some(bucket.clone()),
    )
    .expect("manager");
    let target = ArtifactTarget::new("staging", "web");

    let mut w = manager
        .writer(&target, &ArtifactKind::ContainerLogs, "web-0.log")
        .await
        .expect("writer");
    assert_eq!(w.len(), 2);
    w.write(b"line 1\n").await.expect("write");
    w.close().await.expect("close");

    let base = "staging/web/container-logs/2024-01-02-030405";
    assert_eq!(
        tokio::fs::read_to_string(dir.path().join(base).join("web-0.log"))
            .await
            .expect("local copy"),
        "line 1\n"
    );
    assert_eq!(
        bucket
            .read(&format!("{base}/web-0.log"))
            .await
            .expect("uploaded copy"),
        Bytes::from("line 1\n")
    );

    let location = manager
        .location(&target, &ArtifactKind::ContainerLogs)
        .expect("location");
    assert_eq!(location.path, Some(dir.path().join(base)));
    assert_eq!(
        location.cloud_console_url.as_deref(),
        Some(
            "https://console.cloud.google.com/storage/browser/artifacts/runs/staging/web/container-logs/2024-01-02-030405/"
        )
    );
}

#[tokio::test]
async fn extra_sinks_receive_the_same_bytes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let extra_path = dir.path().join("extra.log");
    let manager = ArtifactManager::new(ArtifactOptions::default(), None).expect("manager");

    let mut w = manager
        .writer_with(
            &ArtifactTarget::new("d", "r"),
            &ArtifactKind::Custom("debug".into()),
            "x.log",
            vec![Box::new(FileSink::open(&extra_path).await.expect("open"))],
        )
        .await
        .expect("writer");
    assert_eq!(w.len(), 1);
    w.write(b"tee").await.expect("write");
    w.close().await.expect("close");

    assert_eq!(tokio::fs::read(&extra_path).await.expect("read"), b"tee");
}

#[tokio::test]
async fn failed_upload_surfaces_on_close_and_local_copy_survives() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (bucket, backend) = memory_bucket("artifacts", "");
    backend.inject_failure("d/r/");
    let manager = ArtifactManager::new(
        ArtifactOptions::default().with_local_dir(dir.path()),
        Some(bucket),
    )
    .expect("manager");
    let target = ArtifactTarget::new("d", "r");

    let mut w = manager
        .writer(&target, &ArtifactKind::PodEvents, "events.log")
        .await
        .expect("writer");
    // The upload may fail before or after this write reaches it.
    let wrote = w.write(b"event").await;
    let closed = w.close().await;
    let err = wrote.and(closed).expect_err("upload fails");
    assert_eq!(err.kind(), ErrorKind::Transport);

    let local = manager
        .location(&target, &ArtifactKind::PodEvents)
        .expect("location")
        .path
        .expect("local path")
        .join("events.log");
    assert_eq!(tokio::fs::read(&local).await.expect("read"), b"event");
}
