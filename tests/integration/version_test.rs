//! Integration tests for file version history.

mod helpers;

use bytes::Bytes;

use filehub_core::ErrorKind;

use helpers::TestHub;

#[tokio::test]
async fn test_restore_appends_a_new_version() {
    let hub = TestHub::new().await;
    let file = hub.upload(None, "draft.txt", &[b'a'; 10]).await.expect("upload");
    let second = hub.overwrite(&file, &[b'b'; 20]).await.expect("overwrite");
    assert_eq!(second.version, 2);
    assert_eq!(hub.used_bytes().await, 20);

    let restored = hub
        .services
        .versions
        .restore_version(hub.owner, file.id, 1)
        .await
        .expect("restore v1");
    assert_eq!(restored.version, 3);
    assert_eq!(restored.size_bytes, 10);
    assert_eq!(restored.content_hash, file.content_hash);
    assert_eq!(hub.used_bytes().await, 10);
    assert_eq!(
        hub.read(file.id).await.expect("read"),
        Bytes::from_static(&[b'a'; 10])
    );

    let history = hub
        .services
        .versions
        .list_versions(hub.owner, file.id)
        .await
        .expect("list");
    let numbers: Vec<i32> = history.iter().map(|v| v.version).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert_eq!(history[2].content_hash, history[0].content_hash);
}

#[tokio::test]
async fn test_restore_unknown_version() {
    let hub = TestHub::new().await;
    let file = hub.upload(None, "only.txt", b"one").await.expect("upload");

    let err = hub
        .services
        .versions
        .restore_version(hub.owner, file.id, 7)
        .await
        .expect_err("no such version");
    assert_eq!(err.kind, ErrorKind::VersionNotFound);
    assert_eq!(hub.node(file.id).await.version, 1);
}

#[tokio::test]
async fn test_restore_after_rename_uses_stable_version_keys() {
    let hub = TestHub::new().await;
    let dir = hub.mkdir(None, "notes").await;
    let file = hub.upload(Some(&dir), "todo.txt", b"milk").await.expect("upload");
    hub.overwrite(&file, b"milk, eggs").await.expect("overwrite");

    hub.services
        .tree
        .rename(hub.owner, dir.id, "lists")
        .await
        .expect("rename dir");

    let restored = hub
        .services
        .versions
        .restore_version(hub.owner, file.id, 1)
        .await
        .expect("restore");
    assert_eq!(restored.path, "/lists/todo.txt");
    assert_eq!(hub.read(file.id).await.expect("read"), Bytes::from_static(b"milk"));
    assert!(hub.blob_exists(&hub.live_key("/lists/todo.txt")).await);
    assert!(!hub.blob_exists(&hub.live_key("/notes/todo.txt")).await);
}

#[tokio::test]
async fn test_prune_keeps_latest_versions() {
    let hub = TestHub::new().await;
    let file = hub.upload(None, "log.txt", b"v1").await.expect("upload");
    for content in [b"v2", b"v3", b"v4"] {
        hub.overwrite(&file, content).await.expect("overwrite");
    }
    let before = hub.blob_keys().await.len();

    let report = hub
        .services
        .versions
        .prune_versions(2, None)
        .await
        .expect("prune");
    assert_eq!(report.pruned, 2);
    assert_eq!(report.blob_failures, 0);

    let history = hub
        .services
        .versions
        .list_versions(hub.owner, file.id)
        .await
        .expect("list");
    let numbers: Vec<i32> = history.iter().map(|v| v.version).collect();
    assert_eq!(numbers, vec![3, 4]);
    assert_eq!(hub.blob_keys().await.len(), before - 2);
    assert_eq!(hub.read(file.id).await.expect("read"), Bytes::from_static(b"v4"));

    let err = hub
        .services
        .versions
        .restore_version(hub.owner, file.id, 1)
        .await
        .expect_err("pruned");
    assert_eq!(err.kind, ErrorKind::VersionNotFound);

    let next = hub.overwrite(&file, b"v5").await.expect("overwrite after prune");
    assert_eq!(next.version, 5);
}

#[tokio::test]
async fn test_prune_never_touches_current_version() {
    let hub = TestHub::new().await;
    let file = hub.upload(None, "single.txt", b"only").await.expect("upload");

    let report = hub
        .services
        .versions
        .prune_versions(1, Some(chrono::Duration::zero()))
        .await
        .expect("prune");
    assert_eq!(report.pruned, 0);
    assert_eq!(hub.read(file.id).await.expect("read"), Bytes::from_static(b"only"));
}

#[tokio::test]
async fn test_overwrite_over_quota_changes_nothing() {
    let hub = TestHub::with_allotment(16).await;
    let file = hub.upload(None, "small.txt", b"12345678").await.expect("upload");

    let err = hub.overwrite(&file, &[b'x'; 17]).await.expect_err("too big");
    assert_eq!(err.kind, ErrorKind::QuotaExceeded);

    let node = hub.node(file.id).await;
    assert_eq!(node.version, 1);
    assert_eq!(node.size_bytes, 8);
    assert_eq!(hub.used_bytes().await, 8);
    assert_eq!(hub.read(file.id).await.expect("read"), Bytes::from_static(b"12345678"));
}

#[tokio::test]
async fn test_failed_revision_keeps_previous_content() {
    let hub = TestHub::new().await;
    let file = hub.upload(None, "stable.txt", b"first").await.expect("upload");
    let mut keys_before = hub.blob_keys().await;
    keys_before.sort();
    hub.backend
        .fail_saves_matching(format!("versions/{}/{}/", hub.owner, file.id));

    let err = hub.overwrite(&file, b"second").await.expect_err("save fails");
    assert_eq!(err.kind, ErrorKind::StorageIo);

    let node = hub.node(file.id).await;
    assert_eq!(node.version, 1);
    assert_eq!(hub.used_bytes().await, 5);
    assert_eq!(hub.read(file.id).await.expect("read"), Bytes::from_static(b"first"));
    let mut keys_after = hub.blob_keys().await;
    keys_after.sort();
    assert_eq!(keys_after, keys_before);
    let history = hub
        .services
        .versions
        .list_versions(hub.owner, file.id)
        .await
        .expect("list");
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_failed_live_copy_keeps_new_version_readable() {
    let hub = TestHub::new().await;
    let file = hub.upload(None, "stable.txt", b"first").await.expect("upload");
    hub.backend.fail_copies_matching("stable.txt");

    let updated = hub.overwrite(&file, b"second").await.expect("version recorded");
    assert_eq!(updated.version, 2);
    assert_eq!(hub.read(file.id).await.expect("read"), Bytes::from_static(b"second"));
    let live = hub.live_key("/stable.txt");
    assert!(!hub.blob_exists(&live).await);

    hub.backend.clear_faults();
    let report = hub
        .services
        .reconcile
        .run(chrono::Duration::hours(1))
        .await
        .expect("reconcile");
    assert_eq!(report.repaired, 1);
    assert_eq!(hub.blob(&live).await, Bytes::from_static(b"second"));
}

#[tokio::test]
async fn test_version_keys_are_unique_per_revision() {
    let hub = TestHub::new().await;
    let file = hub.upload(None, "notes.txt", b"one").await.expect("upload");
    hub.overwrite(&file, b"two").await.expect("overwrite");

    let first = hub.version_key(file.id, 1).await;
    let second = hub.version_key(file.id, 2).await;
    assert_ne!(first, second);
    assert!(first.starts_with(&format!("versions/{}/{}/", hub.owner, file.id)));
    assert_eq!(hub.blob(&first).await, Bytes::from_static(b"one"));
    assert_eq!(hub.blob(&second).await, Bytes::from_static(b"two"));
}
