//! Integration tests for soft delete, restore and purge.

mod helpers;

use bytes::Bytes;
use chrono::{Duration, Utc};

use filehub_core::ErrorKind;
use filehub_core::types::pagination::PageRequest;
use filehub_entity::node::NodeState;
use filehub_entity::share::ShareAccess;
use filehub_service::CreateShareRequest;

use helpers::TestHub;

#[tokio::test]
async fn test_soft_delete_and_restore_directory() {
    let hub = TestHub::new().await;
    let dir = hub.mkdir(None, "music").await;
    let a = hub.upload(Some(&dir), "a.mp3", b"aaa").await.expect("upload a");
    let b = hub.upload(Some(&dir), "b.mp3", b"bbbb").await.expect("upload b");

    let deleted = hub
        .services
        .recycle
        .soft_delete(hub.owner, dir.id)
        .await
        .expect("soft delete");
    assert_eq!(deleted.state, NodeState::Recycled);
    for id in [a.id, b.id] {
        let node = hub.node(id).await;
        assert_eq!(node.state, NodeState::Recycled);
        assert_eq!(node.recycle_root, Some(dir.id));
    }
    let err = hub.read(a.id).await.expect_err("recycled content");
    assert_eq!(err.kind, ErrorKind::NotFound);
    assert_eq!(hub.used_bytes().await, 7);

    let restored = hub
        .services
        .recycle
        .restore(hub.owner, dir.id)
        .await
        .expect("restore");
    assert_eq!(restored.state, NodeState::Active);
    assert_eq!(restored.recycled_at, None);
    for id in [a.id, b.id] {
        assert_eq!(hub.node(id).await.state, NodeState::Active);
    }
    assert_eq!(hub.read(b.id).await.expect("read b"), Bytes::from_static(b"bbbb"));
}

#[tokio::test]
async fn test_recycled_file_name_can_become_a_directory() {
    let hub = TestHub::new().await;
    let file = hub.upload(None, "x", b"plain file").await.expect("upload");
    hub.services
        .recycle
        .soft_delete(hub.owner, file.id)
        .await
        .expect("soft delete");
    assert!(!hub.blob_exists(&hub.live_key("/x")).await);

    let dir = hub.mkdir(None, "x").await;
    let inner = hub.upload(Some(&dir), "y", b"nested").await.expect("upload into x");
    assert_eq!(hub.read(inner.id).await.expect("read"), Bytes::from_static(b"nested"));
    assert_eq!(hub.blob(&hub.live_key("/x/y")).await, Bytes::from_static(b"nested"));

    let err = hub
        .services
        .recycle
        .restore(hub.owner, file.id)
        .await
        .expect_err("name taken by the directory");
    assert_eq!(err.kind, ErrorKind::Conflict);
}

#[tokio::test]
async fn test_recycled_directory_name_can_become_a_file() {
    let hub = TestHub::new().await;
    let dir = hub.mkdir(None, "x").await;
    let inner = hub.upload(Some(&dir), "y", b"nested").await.expect("upload into x");
    hub.services
        .recycle
        .soft_delete(hub.owner, dir.id)
        .await
        .expect("soft delete");
    assert!(!hub.blob_exists(&hub.live_key("/x/y")).await);

    let file = hub.upload(None, "x", b"plain file").await.expect("upload x");
    assert_eq!(hub.read(file.id).await.expect("read"), Bytes::from_static(b"plain file"));
    assert_eq!(hub.blob(&hub.live_key("/x")).await, Bytes::from_static(b"plain file"));
    assert_eq!(hub.node(inner.id).await.state, NodeState::Recycled);
}

#[tokio::test]
async fn test_restore_conflict_changes_nothing() {
    let hub = TestHub::new().await;
    let old = hub.upload(None, "cv.pdf", b"old cv").await.expect("upload");
    hub.services
        .recycle
        .soft_delete(hub.owner, old.id)
        .await
        .expect("soft delete");
    let new = hub.upload(None, "cv.pdf", b"new cv!").await.expect("reuse name");

    let err = hub
        .services
        .recycle
        .restore(hub.owner, old.id)
        .await
        .expect_err("name taken");
    assert_eq!(err.kind, ErrorKind::Conflict);
    assert_eq!(hub.node(old.id).await.state, NodeState::Recycled);

    hub.services
        .recycle
        .purge(hub.owner, old.id)
        .await
        .expect("purge old");
    assert_eq!(hub.read(new.id).await.expect("read new"), Bytes::from_static(b"new cv!"));
    assert_eq!(hub.used_bytes().await, 7);
}

#[tokio::test]
async fn test_restore_requires_batch_root_and_active_parent() {
    let hub = TestHub::new().await;
    let dir = hub.mkdir(None, "inbox").await;
    let inner = hub.upload(Some(&dir), "mail.eml", b"hi").await.expect("upload");
    let loose = hub.upload(Some(&dir), "loose.txt", b"x").await.expect("upload");

    hub.services
        .recycle
        .soft_delete(hub.owner, loose.id)
        .await
        .expect("delete loose file");
    hub.services
        .recycle
        .soft_delete(hub.owner, dir.id)
        .await
        .expect("delete dir");

    let err = hub
        .services
        .recycle
        .restore(hub.owner, inner.id)
        .await
        .expect_err("not a batch root");
    assert_eq!(err.kind, ErrorKind::InvalidTarget);

    let err = hub
        .services
        .recycle
        .restore(hub.owner, loose.id)
        .await
        .expect_err("parent recycled");
    assert_eq!(err.kind, ErrorKind::InvalidTarget);

    hub.services
        .recycle
        .restore(hub.owner, dir.id)
        .await
        .expect("restore dir");
    assert_eq!(hub.node(inner.id).await.state, NodeState::Active);
    assert_eq!(hub.node(loose.id).await.state, NodeState::Recycled);

    hub.services
        .recycle
        .restore(hub.owner, loose.id)
        .await
        .expect("restore loose file");
    assert_eq!(hub.read(loose.id).await.expect("read"), Bytes::from_static(b"x"));
}

#[tokio::test]
async fn test_purge_releases_quota_and_blobs() {
    let hub = TestHub::new().await;
    let dir = hub.mkdir(None, "tmp").await;
    let file = hub.upload(Some(&dir), "big.bin", &[0u8; 64]).await.expect("upload");
    hub.overwrite(&file, &[1u8; 32]).await.expect("overwrite");
    assert_eq!(hub.used_bytes().await, 32);

    let err = hub
        .services
        .recycle
        .purge(hub.owner, dir.id)
        .await
        .expect_err("still active");
    assert_eq!(err.kind, ErrorKind::InvalidTarget);

    hub.services
        .recycle
        .soft_delete(hub.owner, dir.id)
        .await
        .expect("soft delete");
    assert_eq!(hub.used_bytes().await, 32);

    let report = hub
        .services
        .recycle
        .purge(hub.owner, dir.id)
        .await
        .expect("purge");
    assert_eq!(report.purged_nodes, 2);
    assert_eq!(report.released_bytes, 32);
    assert!(report.failed_blobs.is_empty());
    assert_eq!(hub.used_bytes().await, 0);
    assert!(hub.blob_keys().await.is_empty());

    let err = hub
        .services
        .tree
        .get_node(hub.owner, file.id)
        .await
        .expect_err("purged");
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn test_list_and_empty_recycle_bin() {
    let hub = TestHub::new().await;
    let dir = hub.mkdir(None, "old").await;
    hub.upload(Some(&dir), "1.txt", b"1").await.expect("upload");
    hub.upload(Some(&dir), "2.txt", b"22").await.expect("upload");
    let single = hub.upload(None, "3.txt", b"333").await.expect("upload");
    let kept = hub.upload(None, "keep.txt", b"keep").await.expect("upload");

    hub.services.recycle.soft_delete(hub.owner, dir.id).await.expect("delete dir");
    hub.services.recycle.soft_delete(hub.owner, single.id).await.expect("delete file");

    let page = hub
        .services
        .recycle
        .list(hub.owner, PageRequest::new(1, 10))
        .await
        .expect("list");
    assert_eq!(page.total_items, 2);
    let mut names: Vec<&str> = page.items.iter().map(|n| n.name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["3.txt", "old"]);

    let report = hub.services.recycle.empty(hub.owner).await.expect("empty");
    assert_eq!(report.purged_nodes, 4);
    assert_eq!(report.released_bytes, 6);
    assert_eq!(hub.used_bytes().await, 4);

    let page = hub
        .services
        .recycle
        .list(hub.owner, PageRequest::new(1, 10))
        .await
        .expect("list");
    assert_eq!(page.total_items, 0);
    assert_eq!(hub.read(kept.id).await.expect("read"), Bytes::from_static(b"keep"));
}

#[tokio::test]
async fn test_sweep_purges_only_expired_batches() {
    let hub = TestHub::new().await;
    let file = hub.upload(None, "stale.txt", b"stale").await.expect("upload");
    hub.services.recycle.soft_delete(hub.owner, file.id).await.expect("delete");

    let report = hub
        .services
        .recycle
        .sweep(Utc::now() - Duration::hours(1))
        .await
        .expect("sweep");
    assert_eq!(report.batches_purged, 0);
    assert_eq!(hub.node(file.id).await.state, NodeState::Recycled);

    let report = hub
        .services
        .recycle
        .sweep_expired()
        .await
        .expect("sweep with 30 day retention");
    assert_eq!(report.batches_purged, 0);

    let report = hub
        .services
        .recycle
        .sweep(Utc::now() + Duration::seconds(1))
        .await
        .expect("sweep");
    assert_eq!(report.batches_purged, 1);
    assert_eq!(report.batches_failed, 0);
    assert_eq!(report.purge.released_bytes, 5);
    assert_eq!(hub.used_bytes().await, 0);
}

#[tokio::test]
async fn test_soft_delete_twice_is_rejected() {
    let hub = TestHub::new().await;
    let file = hub.upload(None, "twice.txt", b"x").await.expect("upload");
    hub.services.recycle.soft_delete(hub.owner, file.id).await.expect("delete");

    let err = hub
        .services
        .recycle
        .soft_delete(hub.owner, file.id)
        .await
        .expect_err("already recycled");
    assert_eq!(err.kind, ErrorKind::InvalidTarget);
}

#[tokio::test]
async fn test_permanent_delete_deactivates_shares() {
    let hub = TestHub::new().await;
    let file = hub.upload(None, "shared.txt", b"shared").await.expect("upload");
    let share = hub
        .services
        .shares
        .create_share(
            hub.owner,
            CreateShareRequest {
                node_id: file.id,
                access: ShareAccess::Download,
                password: None,
                expires_at: None,
                max_downloads: None,
            },
        )
        .await
        .expect("share");

    let report = hub
        .services
        .tree
        .permanent_delete(hub.owner, file.id)
        .await
        .expect("permanent delete");
    assert_eq!(report.purged_nodes, 1);
    assert_eq!(hub.used_bytes().await, 0);

    let shares = hub.services.shares.list_shares(hub.owner).await.expect("list");
    assert_eq!(shares.len(), 1);
    assert!(!shares[0].is_active);
    let err = hub
        .services
        .shares
        .access_share(&share.token, None)
        .await
        .expect_err("deactivated");
    assert_eq!(err.kind, ErrorKind::ShareInvalid);
}
