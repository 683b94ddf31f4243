//! Integration tests for quota accounting.

mod helpers;

use std::time::{Duration, Instant};

use filehub_core::ErrorKind;
use filehub_core::types::id::OwnerId;

use helpers::{TestHub, slow_stream};

#[tokio::test]
async fn test_concurrent_uploads_cannot_overdraw() {
    let hub = TestHub::with_allotment(100).await;
    let data = [7u8; 60];

    let (first, second) = tokio::join!(
        hub.upload(None, "a.bin", &data),
        hub.upload(None, "b.bin", &data),
    );

    let results = [first, second];
    let accepted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(accepted, 1);
    let rejected = results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .collect::<Vec<_>>();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].kind, ErrorKind::QuotaExceeded);
    assert_eq!(hub.used_bytes().await, 60);
    assert_eq!(hub.blob_keys().await.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_uploads_on_a_database_file_cannot_overdraw() {
    let hub = TestHub::file_backed(100, 5).await;
    let data = [3u8; 40];

    let results = futures::future::join_all(
        ["a.bin", "b.bin", "c.bin", "d.bin"]
            .into_iter()
            .map(|name| hub.upload(None, name, &data)),
    )
    .await;

    let accepted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(accepted, 2);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_eq!(err.kind, ErrorKind::QuotaExceeded);
    }
    assert_eq!(hub.used_bytes().await, 80);

    let recalculated = hub
        .services
        .quota
        .recalculate(hub.owner)
        .await
        .expect("recalculate");
    assert_eq!(recalculated.used_bytes, 80);
    // Version and live blob of each accepted upload; rejected ones are gone.
    assert_eq!(hub.blob_keys().await.len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_upload_does_not_block_other_owners() {
    let hub = TestHub::file_backed(1 << 20, 1).await;
    let other = OwnerId::new();
    let started = Instant::now();

    let (slow, quick) = tokio::join!(
        hub.upload_stream(
            hub.owner,
            "large.bin",
            slow_stream(b"streamed slowly", Duration::from_millis(2500)),
            15,
            false,
        ),
        async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let created = hub.services.tree.create_directory(other, None, "inbox").await;
            (created, started.elapsed())
        },
    );

    let (created, finished_at) = quick;
    created.expect("other owner writes while the stream is open");
    assert!(finished_at < Duration::from_millis(2000));
    let file = slow.expect("slow upload");
    assert_eq!(file.size_bytes, 15);
}

#[tokio::test]
async fn test_usage_tracks_every_operation() {
    let hub = TestHub::new().await;
    let dir = hub.mkdir(None, "work").await;
    let a = hub.upload(Some(&dir), "a.txt", &[1u8; 100]).await.expect("upload a");
    let b = hub.upload(None, "b.txt", &[2u8; 50]).await.expect("upload b");
    hub.overwrite(&a, &[3u8; 40]).await.expect("shrink a");
    hub.services
        .versions
        .restore_version(hub.owner, a.id, 1)
        .await
        .expect("restore a v1");
    hub.services
        .tree
        .copy_node(hub.owner, dir.id, None, Some("work-copy".to_string()))
        .await
        .expect("copy dir");
    hub.services
        .recycle
        .soft_delete(hub.owner, b.id)
        .await
        .expect("recycle b");
    assert_eq!(hub.used_bytes().await, 100 + 50 + 100);

    hub.services.recycle.purge(hub.owner, b.id).await.expect("purge b");
    assert_eq!(hub.used_bytes().await, 200);

    let recalculated = hub
        .services
        .quota
        .recalculate(hub.owner)
        .await
        .expect("recalculate");
    assert_eq!(recalculated.used_bytes, 200);
}

#[tokio::test]
async fn test_set_allotment() {
    let hub = TestHub::new().await;
    hub.upload(None, "data.bin", &[0u8; 500]).await.expect("upload");

    let err = hub
        .services
        .quota
        .set_allotment(hub.owner, 499)
        .await
        .expect_err("below usage");
    assert_eq!(err.kind, ErrorKind::Validation);

    let err = hub
        .services
        .quota
        .set_allotment(hub.owner, -1)
        .await
        .expect_err("negative");
    assert_eq!(err.kind, ErrorKind::Validation);

    let quota = hub
        .services
        .quota
        .set_allotment(hub.owner, 500)
        .await
        .expect("exactly usage");
    assert_eq!(quota.allotted_bytes, 500);
    assert_eq!(quota.used_bytes, 500);

    let err = hub.upload(None, "one-more.bin", &[0u8; 1]).await.expect_err("full");
    assert_eq!(err.kind, ErrorKind::QuotaExceeded);
    let empty = hub.upload(None, "empty.bin", &[]).await.expect("zero bytes fit");
    assert_eq!(empty.size_bytes, 0);
}

#[tokio::test]
async fn test_copy_over_quota() {
    let hub = TestHub::with_allotment(100).await;
    let file = hub.upload(None, "half.bin", &[9u8; 60]).await.expect("upload");
    let keys_before = hub.blob_keys().await.len();

    let err = hub
        .services
        .tree
        .copy_node(hub.owner, file.id, None, Some("half-copy.bin".to_string()))
        .await
        .expect_err("over quota");
    assert_eq!(err.kind, ErrorKind::QuotaExceeded);

    let lookup = hub.services.tree.find_by_path(hub.owner, "/half-copy.bin").await;
    assert_eq!(lookup.expect_err("no copy").kind, ErrorKind::NotFound);
    assert_eq!(hub.used_bytes().await, 60);
    assert_eq!(hub.blob_keys().await.len(), keys_before);
}

#[tokio::test]
async fn test_directory_copy_stops_at_quota() {
    let hub = TestHub::with_allotment(100).await;
    let dir = hub.mkdir(None, "pair").await;
    hub.upload(Some(&dir), "one.bin", &[1u8; 30]).await.expect("upload one");
    hub.upload(Some(&dir), "two.bin", &[2u8; 30]).await.expect("upload two");

    let err = hub
        .services
        .tree
        .copy_node(hub.owner, dir.id, None, Some("pair-copy".to_string()))
        .await
        .expect_err("second file does not fit");
    assert_eq!(err.kind, ErrorKind::PartialFailure);
    let progress = err.progress.expect("progress");
    assert_eq!(progress.succeeded, 1);
    assert_eq!(progress.failed, 1);
    assert_eq!(hub.used_bytes().await, 90);

    let recalculated = hub
        .services
        .quota
        .recalculate(hub.owner)
        .await
        .expect("recalculate");
    assert_eq!(recalculated.used_bytes, 90);
}
