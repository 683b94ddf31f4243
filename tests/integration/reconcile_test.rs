//! Integration tests for the storage reconciliation sweep.

mod helpers;

use bytes::Bytes;
use chrono::Duration;

use filehub_core::ErrorKind;
use filehub_core::traits::storage::{StorageBackend, stream_from_bytes};
use filehub_entity::node::BlobState;

use helpers::TestHub;

async fn put_blob(hub: &TestHub, key: &str, data: &'static [u8]) {
    hub.backend
        .save(key, stream_from_bytes(data), data.len() as u64)
        .await
        .expect("save blob");
}

#[tokio::test]
async fn test_old_orphans_are_deleted() {
    let hub = TestHub::new().await;
    let file = hub.upload(None, "kept.txt", b"kept").await.expect("upload");
    let orphan = format!("{}/stray.bin", hub.owner);
    put_blob(&hub, &orphan, b"stray").await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let report = hub
        .services
        .reconcile
        .run(Duration::zero())
        .await
        .expect("reconcile");
    assert_eq!(report.scanned_objects, 3);
    assert_eq!(report.orphans_deleted, 1);
    assert_eq!(report.orphan_failures, 0);
    assert_eq!(report.dangling_marked, 0);

    assert!(!hub.blob_exists(&orphan).await);
    assert_eq!(hub.read(file.id).await.expect("read"), Bytes::from_static(b"kept"));
}

#[tokio::test]
async fn test_recent_orphans_survive_the_grace_period() {
    let hub = TestHub::new().await;
    let orphan = "versions/in-flight/upload".to_string();
    put_blob(&hub, &orphan, b"half-committed").await;

    let report = hub
        .services
        .reconcile
        .run_with_config()
        .await
        .expect("reconcile");
    assert_eq!(report.orphans_deleted, 0);
    assert!(hub.blob_exists(&orphan).await);
}

#[tokio::test]
async fn test_dangling_file_is_flagged_and_recovered() {
    let hub = TestHub::new().await;
    let file = hub.upload(None, "fragile.txt", b"fragile").await.expect("upload");
    let live = hub.live_key("/fragile.txt");
    let version = hub.version_key(file.id, 1).await;
    hub.backend.delete(&live).await.expect("delete live");
    hub.backend.delete(&version).await.expect("delete version");

    let report = hub
        .services
        .reconcile
        .run(Duration::hours(1))
        .await
        .expect("reconcile");
    assert_eq!(report.dangling_marked, 1);
    assert_eq!(report.missing_versions, 1);
    assert_eq!(hub.node(file.id).await.blob_state, BlobState::Missing);

    let err = hub.read(file.id).await.expect_err("content missing");
    assert_eq!(err.kind, ErrorKind::StorageIo);

    put_blob(&hub, &live, b"fragile").await;
    let report = hub
        .services
        .reconcile
        .run(Duration::hours(1))
        .await
        .expect("reconcile again");
    assert_eq!(report.recovered, 1);
    assert_eq!(report.repaired, 1);
    assert_eq!(report.dangling_marked, 0);
    assert_eq!(report.missing_versions, 0);
    assert_eq!(hub.node(file.id).await.blob_state, BlobState::Ok);
    assert_eq!(hub.blob(&version).await, Bytes::from_static(b"fragile"));
    assert_eq!(hub.read(file.id).await.expect("read"), Bytes::from_static(b"fragile"));
}

#[tokio::test]
async fn test_live_blob_is_rebuilt_from_version() {
    let hub = TestHub::new().await;
    let file = hub.upload(None, "photo.png", b"\x89PNG").await.expect("upload");
    hub.overwrite(&file, b"\x89PNG v2").await.expect("overwrite");
    let live = hub.live_key("/photo.png");
    hub.backend.delete(&live).await.expect("delete live");

    let report = hub
        .services
        .reconcile
        .run(Duration::hours(1))
        .await
        .expect("reconcile");
    assert_eq!(report.repaired, 1);
    assert_eq!(report.dangling_marked, 0);
    assert_eq!(report.missing_versions, 0);
    assert_eq!(hub.node(file.id).await.blob_state, BlobState::Ok);
    assert_eq!(
        hub.read(file.id).await.expect("read"),
        Bytes::from_static(b"\x89PNG v2")
    );
}

#[tokio::test]
async fn test_missing_old_version_is_counted() {
    let hub = TestHub::new().await;
    let file = hub.upload(None, "essay.txt", b"draft").await.expect("upload");
    hub.overwrite(&file, b"final").await.expect("overwrite");
    let first = hub.version_key(file.id, 1).await;
    hub.backend.delete(&first).await.expect("delete v1");

    let report = hub
        .services
        .reconcile
        .run(Duration::hours(1))
        .await
        .expect("reconcile");
    assert_eq!(report.missing_versions, 1);
    assert_eq!(report.dangling_marked, 0);
    assert_eq!(report.repaired, 0);

    let err = hub
        .services
        .versions
        .restore_version(hub.owner, file.id, 1)
        .await
        .expect_err("blob gone");
    assert_eq!(err.kind, ErrorKind::StorageIo);
    assert_eq!(hub.node(file.id).await.version, 2);
}

#[tokio::test]
async fn test_recycled_files_keep_their_blobs() {
    let hub = TestHub::new().await;
    let file = hub.upload(None, "binned.txt", b"binned").await.expect("upload");
    hub.services
        .recycle
        .soft_delete(hub.owner, file.id)
        .await
        .expect("soft delete");
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let report = hub
        .services
        .reconcile
        .run(Duration::zero())
        .await
        .expect("reconcile");
    assert_eq!(report.orphans_deleted, 0);
    assert_eq!(report.dangling_marked, 0);

    hub.services
        .recycle
        .restore(hub.owner, file.id)
        .await
        .expect("restore");
    assert_eq!(hub.read(file.id).await.expect("read"), Bytes::from_static(b"binned"));
}
