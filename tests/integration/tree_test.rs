//! Integration tests for file tree operations.

mod helpers;

use std::time::Duration as StdDuration;

use bytes::Bytes;
use chrono::Duration;

use filehub_core::ErrorKind;
use filehub_core::traits::storage::stream_from_bytes;
use filehub_core::types::id::OwnerId;
use filehub_core::types::pagination::PageRequest;
use filehub_entity::node::{NodeState, Visibility};
use filehub_service::UploadRequest;
use filehub_service::hashing::sha256_hex;

use helpers::{TestHub, slow_stream};

#[tokio::test]
async fn test_upload_download_roundtrip() {
    let hub = TestHub::new().await;
    let docs = hub.mkdir(None, "docs").await;
    let data = b"The quick brown fox jumps over the lazy dog";

    let file = hub.upload(Some(&docs), "fox.txt", data).await.expect("upload");
    assert_eq!(file.path, "/docs/fox.txt");
    assert_eq!(file.version, 1);
    assert_eq!(file.size_bytes, data.len() as i64);
    assert_eq!(file.mime_type.as_deref(), Some("text/plain"));
    assert_eq!(file.content_hash.as_deref(), Some(sha256_hex(data).as_str()));

    let read = hub.read(file.id).await.expect("download");
    assert_eq!(read, Bytes::from_static(data));
    assert!(hub.blob_exists(&hub.live_key("/docs/fox.txt")).await);
    assert_eq!(hub.used_bytes().await, data.len() as i64);
}

#[tokio::test]
async fn test_move_roundtrip_restores_path() {
    let hub = TestHub::new().await;
    let a = hub.mkdir(None, "a").await;
    let b = hub.mkdir(None, "b").await;
    let file = hub.upload(Some(&a), "note.md", b"# note").await.expect("upload");

    let moved = hub
        .services
        .tree
        .move_node(hub.owner, file.id, Some(b.id))
        .await
        .expect("move to b");
    assert_eq!(moved.path, "/b/note.md");
    assert!(hub.blob_exists(&hub.live_key("/b/note.md")).await);
    assert!(!hub.blob_exists(&hub.live_key("/a/note.md")).await);

    let back = hub
        .services
        .tree
        .move_node(hub.owner, file.id, Some(a.id))
        .await
        .expect("move back");
    assert_eq!(back.path, file.path);
    assert_eq!(back.parent_id, Some(a.id));
    assert_eq!(hub.read(file.id).await.expect("read"), Bytes::from_static(b"# note"));
}

#[tokio::test]
async fn test_move_directory_into_descendant_is_invalid() {
    let hub = TestHub::new().await;
    let outer = hub.mkdir(None, "outer").await;
    let inner = hub.mkdir(Some(&outer), "inner").await;
    let deepest = hub.mkdir(Some(&inner), "deepest").await;

    for target in [outer.id, inner.id, deepest.id] {
        let err = hub
            .services
            .tree
            .move_node(hub.owner, outer.id, Some(target))
            .await
            .expect_err("cycle");
        assert_eq!(err.kind, ErrorKind::InvalidTarget);
    }
    assert_eq!(hub.node(outer.id).await.path, "/outer");
}

#[tokio::test]
async fn test_rename_updates_descendant_paths() {
    let hub = TestHub::new().await;
    let project = hub.mkdir(None, "project").await;
    let src = hub.mkdir(Some(&project), "src").await;
    let main = hub
        .upload(Some(&src), "main.rs", b"fn main() {}")
        .await
        .expect("upload");

    let renamed = hub
        .services
        .tree
        .rename(hub.owner, project.id, "app")
        .await
        .expect("rename");
    assert_eq!(renamed.path, "/app");

    let found = hub
        .services
        .tree
        .find_by_path(hub.owner, "/app/src/main.rs")
        .await
        .expect("find");
    assert_eq!(found.id, main.id);
    assert_eq!(hub.read(main.id).await.expect("read"), Bytes::from_static(b"fn main() {}"));
    assert!(!hub.blob_exists(&hub.live_key("/project/src/main.rs")).await);
}

#[tokio::test]
async fn test_name_rules_and_conflicts() {
    let hub = TestHub::new().await;
    let file = hub.upload(None, "report.pdf", b"v1").await.expect("upload");

    let err = hub.upload(None, "report.pdf", b"again").await.expect_err("duplicate");
    assert_eq!(err.kind, ErrorKind::Conflict);

    for bad in ["", ".", "..", "a/b"] {
        let err = hub.upload(None, bad, b"x").await.expect_err("bad name");
        assert_eq!(err.kind, ErrorKind::Validation, "name {bad:?}");
    }

    let replaced = hub
        .services
        .tree
        .upload_new_file(
            hub.owner,
            UploadRequest {
                parent: None,
                name: "report.pdf".to_string(),
                content: stream_from_bytes("v2 content"),
                size: 10,
                mime_type: Some("application/pdf".to_string()),
                override_if_exists: true,
            },
        )
        .await
        .expect("override");
    assert_eq!(replaced.id, file.id);
    assert_eq!(replaced.version, 2);
    assert_eq!(hub.used_bytes().await, 10);

    hub.mkdir(None, "archive").await;
    let err = hub
        .services
        .tree
        .upload_new_file(
            hub.owner,
            UploadRequest {
                parent: None,
                name: "archive".to_string(),
                content: stream_from_bytes("x"),
                size: 1,
                mime_type: None,
                override_if_exists: true,
            },
        )
        .await
        .expect_err("directory of that name");
    assert_eq!(err.kind, ErrorKind::Conflict);
}

#[tokio::test]
async fn test_copy_directory_duplicates_content() {
    let hub = TestHub::new().await;
    let photos = hub.mkdir(None, "photos").await;
    let trip = hub.mkdir(Some(&photos), "trip").await;
    hub.upload(Some(&photos), "a.jpg", b"aaaa").await.expect("upload a");
    let b = hub.upload(Some(&trip), "b.jpg", b"bbbbbb").await.expect("upload b");
    hub.overwrite(&b, b"bbbbbbbb").await.expect("overwrite b");
    let backup = hub.mkdir(None, "backup").await;

    let copy = hub
        .services
        .tree
        .copy_node(hub.owner, photos.id, Some(backup.id), None)
        .await
        .expect("copy");
    assert_eq!(copy.path, "/backup/photos");

    let copied_b = hub
        .services
        .tree
        .find_by_path(hub.owner, "/backup/photos/trip/b.jpg")
        .await
        .expect("copied b");
    assert_ne!(copied_b.id, b.id);
    assert_eq!(copied_b.version, 1);
    assert_eq!(
        hub.read(copied_b.id).await.expect("read copy"),
        Bytes::from_static(b"bbbbbbbb")
    );
    let history = hub
        .services
        .versions
        .list_versions(hub.owner, copied_b.id)
        .await
        .expect("versions");
    assert_eq!(history.len(), 1);

    assert_eq!(hub.used_bytes().await, 2 * (4 + 8));
}

#[tokio::test]
async fn test_copy_into_itself_is_invalid() {
    let hub = TestHub::new().await;
    let dir = hub.mkdir(None, "dir").await;
    let sub = hub.mkdir(Some(&dir), "sub").await;

    let err = hub
        .services
        .tree
        .copy_node(hub.owner, dir.id, Some(sub.id), None)
        .await
        .expect_err("copy into descendant");
    assert_eq!(err.kind, ErrorKind::InvalidTarget);
}

#[tokio::test]
async fn test_blob_failure_during_upload_leaves_nothing() {
    let hub = TestHub::new().await;
    hub.backend.fail_saves_matching("versions/");

    let err = hub.upload(None, "doomed.bin", b"0123456789").await.expect_err("save fails");
    assert_eq!(err.kind, ErrorKind::StorageIo);

    let lookup = hub.services.tree.find_by_path(hub.owner, "/doomed.bin").await;
    assert_eq!(lookup.expect_err("no row").kind, ErrorKind::NotFound);
    assert_eq!(hub.used_bytes().await, 0);
    assert!(hub.blob_keys().await.is_empty());
}

#[tokio::test]
async fn test_live_copy_failure_during_upload_keeps_the_file() {
    let hub = TestHub::new().await;
    hub.backend.fail_copies_matching("doomed.bin");

    let file = hub.upload(None, "doomed.bin", b"0123456789").await.expect("upload");
    assert_eq!(file.version, 1);
    assert_eq!(hub.used_bytes().await, 10);
    assert_eq!(hub.read(file.id).await.expect("read"), Bytes::from_static(b"0123456789"));
    assert!(!hub.blob_exists(&hub.live_key("/doomed.bin")).await);

    hub.backend.clear_faults();
    let report = hub
        .services
        .reconcile
        .run(Duration::hours(1))
        .await
        .expect("reconcile");
    assert_eq!(report.repaired, 1);
    assert!(hub.blob_exists(&hub.live_key("/doomed.bin")).await);
}

#[tokio::test]
async fn test_partial_failure_move_then_rerun_repairs() {
    let hub = TestHub::new().await;
    let src = hub.mkdir(None, "src").await;
    let a = hub.upload(Some(&src), "a.txt", b"alpha").await.expect("upload a");
    let b = hub.upload(Some(&src), "b.txt", b"bravo").await.expect("upload b");
    let dst = hub.mkdir(None, "dst").await;

    hub.backend.fail_copies_matching("b.txt");
    let err = hub
        .services
        .tree
        .move_node(hub.owner, src.id, Some(dst.id))
        .await
        .expect_err("partial move");
    assert_eq!(err.kind, ErrorKind::PartialFailure);
    let progress = err.progress.expect("progress");
    assert_eq!(progress.succeeded, 1);
    assert_eq!(progress.failed, 1);

    assert_eq!(hub.node(src.id).await.path, "/dst/src");
    assert_eq!(hub.node(a.id).await.path, "/dst/src/a.txt");
    assert_eq!(hub.node(b.id).await.path, "/src/b.txt");

    hub.backend.clear_faults();
    hub.services
        .tree
        .move_node(hub.owner, src.id, Some(dst.id))
        .await
        .expect("repairing rerun");

    assert_eq!(hub.node(b.id).await.path, "/dst/src/b.txt");
    assert_eq!(hub.read(b.id).await.expect("read b"), Bytes::from_static(b"bravo"));
    assert_eq!(hub.read(a.id).await.expect("read a"), Bytes::from_static(b"alpha"));
}

#[tokio::test]
async fn test_stale_descendant_never_reads_another_nodes_content() {
    let hub = TestHub::new().await;
    let d = hub.mkdir(None, "d").await;
    let stale = hub.upload(Some(&d), "x", b"ORIGINAL").await.expect("upload");

    hub.backend.fail_copies_matching(format!("{}/e/x", hub.owner));
    let err = hub
        .services
        .tree
        .rename(hub.owner, d.id, "e")
        .await
        .expect_err("partial rename");
    assert_eq!(err.kind, ErrorKind::PartialFailure);
    assert_eq!(hub.node(stale.id).await.path, "/d/x");
    hub.backend.clear_faults();

    // A new node takes over the path the stale child still carries.
    let new_d = hub.mkdir(None, "d").await;
    let other = hub
        .upload(Some(&new_d), "x", b"SOMEONE ELSE")
        .await
        .expect("upload at the stale path");
    assert_eq!(other.path, "/d/x");
    assert_eq!(hub.read(stale.id).await.expect("read stale"), Bytes::from_static(b"ORIGINAL"));
    assert_eq!(
        hub.read(other.id).await.expect("read other"),
        Bytes::from_static(b"SOMEONE ELSE")
    );

    hub.services
        .tree
        .rename(hub.owner, d.id, "e")
        .await
        .expect("repairing rerun");
    assert_eq!(hub.node(stale.id).await.path, "/e/x");
    assert_eq!(hub.blob(&hub.live_key("/e/x")).await, Bytes::from_static(b"ORIGINAL"));
    assert_eq!(hub.blob(&hub.live_key("/d/x")).await, Bytes::from_static(b"SOMEONE ELSE"));
    assert_eq!(hub.read(stale.id).await.expect("read moved"), Bytes::from_static(b"ORIGINAL"));
    assert_eq!(
        hub.read(other.id).await.expect("read other again"),
        Bytes::from_static(b"SOMEONE ELSE")
    );
}

#[tokio::test]
async fn test_override_upload_replaces_the_file_it_resolved() {
    let hub = TestHub::new().await;
    let file = hub.upload(None, "report.pdf", b"v1").await.expect("upload");

    // The name changes hands while the new content is still streaming.
    let (upload, renamed) = tokio::join!(
        hub.upload_stream(
            hub.owner,
            "report.pdf",
            slow_stream(b"v2 content", StdDuration::from_millis(500)),
            10,
            true,
        ),
        async {
            tokio::time::sleep(StdDuration::from_millis(100)).await;
            hub.services.tree.rename(hub.owner, file.id, "old.pdf").await
        },
    );
    renamed.expect("rename");
    let err = upload.expect_err("target changed");
    assert_eq!(err.kind, ErrorKind::Conflict);

    let kept = hub.node(file.id).await;
    assert_eq!(kept.path, "/old.pdf");
    assert_eq!(kept.version, 1);
    assert_eq!(hub.read(file.id).await.expect("read"), Bytes::from_static(b"v1"));
    let lookup = hub.services.tree.find_by_path(hub.owner, "/report.pdf").await;
    assert_eq!(lookup.expect_err("nothing created").kind, ErrorKind::NotFound);
    assert_eq!(hub.used_bytes().await, 2);
    assert_eq!(hub.blob_keys().await.len(), 2);
}

#[tokio::test]
async fn test_list_children_pages() {
    let hub = TestHub::new().await;
    let dir = hub.mkdir(None, "inbox").await;
    for name in ["1.txt", "2.txt", "3.txt"] {
        hub.upload(Some(&dir), name, b"x").await.expect("upload");
    }

    let first = hub
        .services
        .tree
        .list_children(hub.owner, Some(dir.id), PageRequest::new(1, 2))
        .await
        .expect("page 1");
    assert_eq!(first.items.len(), 2);
    assert_eq!(first.total_items, 3);
    assert!(first.has_next());

    let second = hub
        .services
        .tree
        .list_children(hub.owner, Some(dir.id), PageRequest::new(2, 2))
        .await
        .expect("page 2");
    assert_eq!(second.items.len(), 1);
    assert!(!second.has_next());
}

#[tokio::test]
async fn test_private_nodes_are_hidden_from_other_owners() {
    let hub = TestHub::new().await;
    let stranger = OwnerId::new();
    let file = hub.upload(None, "diary.txt", b"dear diary").await.expect("upload");

    let err = hub
        .services
        .tree
        .download_file(stranger, file.id)
        .await
        .err()
        .expect("private");
    assert_eq!(err.kind, ErrorKind::PermissionDenied);

    let err = hub
        .services
        .tree
        .rename(stranger, file.id, "mine.txt")
        .await
        .expect_err("not the owner");
    assert_eq!(err.kind, ErrorKind::PermissionDenied);

    hub.services
        .tree
        .set_visibility(hub.owner, file.id, Visibility::Public)
        .await
        .expect("publish");
    let (_, node) = hub
        .services
        .tree
        .download_file(stranger, file.id)
        .await
        .expect("public download");
    assert_eq!(node.state, NodeState::Active);
}
