//! Integration tests for share links.

mod helpers;

use bytes::Bytes;
use chrono::{Duration, Utc};

use filehub_core::ErrorKind;
use filehub_core::error::AppError;
use filehub_core::traits::storage::collect_stream;
use filehub_core::types::id::{NodeId, OwnerId};
use filehub_database::repositories::ShareRepository;
use filehub_entity::share::{NewShare, Share, ShareAccess};
use filehub_service::CreateShareRequest;

use helpers::TestHub;

fn request(node_id: NodeId, access: ShareAccess) -> CreateShareRequest {
    CreateShareRequest {
        node_id,
        access,
        password: None,
        expires_at: None,
        max_downloads: None,
    }
}

async fn download(hub: &TestHub, share: &Share, password: Option<&str>) -> Result<Bytes, AppError> {
    let (stream, _) = hub
        .services
        .shares
        .download_shared_file(&share.token, password)
        .await?;
    collect_stream(stream).await
}

#[tokio::test]
async fn test_download_limit_is_enforced() {
    let hub = TestHub::new().await;
    let file = hub.upload(None, "once.txt", b"one shot").await.expect("upload");

    let share = hub
        .services
        .shares
        .create_share(
            hub.owner,
            CreateShareRequest {
                max_downloads: Some(1),
                ..request(file.id, ShareAccess::Download)
            },
        )
        .await
        .expect("create share");
    assert!(share.is_active);
    assert_eq!(share.download_count, 0);

    let first = download(&hub, &share, None).await.expect("first download");
    assert_eq!(first, Bytes::from_static(b"one shot"));

    let err = download(&hub, &share, None).await.expect_err("exhausted");
    assert_eq!(err.kind, ErrorKind::ShareInvalid);

    let shares = hub.services.shares.list_shares(hub.owner).await.expect("list");
    assert_eq!(shares.len(), 1);
    assert_eq!(shares[0].download_count, 1);
}

#[tokio::test]
async fn test_password_protected_share() {
    let hub = TestHub::new().await;
    let file = hub.upload(None, "secret.txt", b"classified").await.expect("upload");

    let err = hub
        .services
        .shares
        .create_share(
            hub.owner,
            CreateShareRequest {
                password: Some("abc".to_string()),
                ..request(file.id, ShareAccess::Download)
            },
        )
        .await
        .expect_err("password too short");
    assert_eq!(err.kind, ErrorKind::Validation);

    let share = hub
        .services
        .shares
        .create_share(
            hub.owner,
            CreateShareRequest {
                password: Some("hunter22".to_string()),
                ..request(file.id, ShareAccess::Download)
            },
        )
        .await
        .expect("create share");
    assert!(share.requires_password());

    let err = hub
        .services
        .shares
        .access_share(&share.token, None)
        .await
        .expect_err("no password");
    assert_eq!(err.kind, ErrorKind::PasswordRequired);

    let err = hub
        .services
        .shares
        .access_share(&share.token, Some("hunter2"))
        .await
        .expect_err("wrong password");
    assert_eq!(err.kind, ErrorKind::PasswordIncorrect);

    let accessed = hub
        .services
        .shares
        .access_share(&share.token, Some("hunter22"))
        .await
        .expect("right password");
    assert!(accessed.last_accessed_at.is_some());
    assert_eq!(
        download(&hub, &share, Some("hunter22")).await.expect("download"),
        Bytes::from_static(b"classified")
    );
}

#[tokio::test]
async fn test_view_share_cannot_download() {
    let hub = TestHub::new().await;
    let file = hub.upload(None, "look.txt", b"no touching").await.expect("upload");
    let share = hub
        .services
        .shares
        .create_share(hub.owner, request(file.id, ShareAccess::View))
        .await
        .expect("create share");

    hub.services
        .shares
        .access_share(&share.token, None)
        .await
        .expect("view access");
    let err = download(&hub, &share, None).await.expect_err("view only");
    assert_eq!(err.kind, ErrorKind::PermissionDenied);
}

#[tokio::test]
async fn test_expiry_rules() {
    let hub = TestHub::new().await;
    let file = hub.upload(None, "brief.txt", b"soon gone").await.expect("upload");

    let err = hub
        .services
        .shares
        .create_share(
            hub.owner,
            CreateShareRequest {
                expires_at: Some(Utc::now() - Duration::minutes(1)),
                ..request(file.id, ShareAccess::Download)
            },
        )
        .await
        .expect_err("expiry in the past");
    assert_eq!(err.kind, ErrorKind::Validation);

    let err = hub
        .services
        .shares
        .create_share(
            hub.owner,
            CreateShareRequest {
                expires_at: Some(Utc::now() + Duration::days(366)),
                ..request(file.id, ShareAccess::Download)
            },
        )
        .await
        .expect_err("expiry too far out");
    assert_eq!(err.kind, ErrorKind::Validation);

    let expired = {
        let mut conn = hub.services.db.acquire().await.expect("connection");
        ShareRepository::new()
            .insert(
                &mut conn,
                &NewShare {
                    token: "expired-token".to_string(),
                    node_id: file.id,
                    created_by: hub.owner,
                    password_hash: None,
                    access: ShareAccess::Download,
                    expires_at: Some(Utc::now() - Duration::hours(1)),
                    max_downloads: None,
                },
                Utc::now() - Duration::days(1),
            )
            .await
            .expect("insert share")
    };
    let err = download(&hub, &expired, None).await.expect_err("expired");
    assert_eq!(err.kind, ErrorKind::ShareExpired);
}

#[tokio::test]
async fn test_revoke_share() {
    let hub = TestHub::new().await;
    let file = hub.upload(None, "public.txt", b"for now").await.expect("upload");
    let share = hub
        .services
        .shares
        .create_share(hub.owner, request(file.id, ShareAccess::Download))
        .await
        .expect("create share");

    let err = hub
        .services
        .shares
        .revoke_share(OwnerId::new(), share.id)
        .await
        .expect_err("not the creator");
    assert_eq!(err.kind, ErrorKind::PermissionDenied);

    hub.services
        .shares
        .revoke_share(hub.owner, share.id)
        .await
        .expect("revoke");
    let err = hub
        .services
        .shares
        .access_share(&share.token, None)
        .await
        .expect_err("revoked");
    assert_eq!(err.kind, ErrorKind::ShareInvalid);

    let err = hub
        .services
        .shares
        .access_share("no-such-token", None)
        .await
        .expect_err("unknown token");
    assert_eq!(err.kind, ErrorKind::ShareInvalid);
}

#[tokio::test]
async fn test_share_of_recycled_node_is_invalid() {
    let hub = TestHub::new().await;
    let file = hub.upload(None, "gone.txt", b"bye").await.expect("upload");
    let share = hub
        .services
        .shares
        .create_share(hub.owner, request(file.id, ShareAccess::Download))
        .await
        .expect("create share");

    hub.services
        .recycle
        .soft_delete(hub.owner, file.id)
        .await
        .expect("soft delete");
    let err = download(&hub, &share, None).await.expect_err("recycled");
    assert_eq!(err.kind, ErrorKind::ShareInvalid);

    let err = hub
        .services
        .shares
        .create_share(hub.owner, request(file.id, ShareAccess::Download))
        .await
        .expect_err("cannot share a recycled node");
    assert_eq!(err.kind, ErrorKind::InvalidTarget);

    hub.services
        .recycle
        .restore(hub.owner, file.id)
        .await
        .expect("restore");
    assert_eq!(
        download(&hub, &share, None).await.expect("download after restore"),
        Bytes::from_static(b"bye")
    );
}

#[tokio::test]
async fn test_directory_share_cannot_be_downloaded() {
    let hub = TestHub::new().await;
    let dir = hub.mkdir(None, "album").await;
    let share = hub
        .services
        .shares
        .create_share(hub.owner, request(dir.id, ShareAccess::Download))
        .await
        .expect("create share");

    hub.services
        .shares
        .access_share(&share.token, None)
        .await
        .expect("directory shares can be viewed");
    let err = download(&hub, &share, None).await.expect_err("directory");
    assert_eq!(err.kind, ErrorKind::InvalidTarget);
}

#[tokio::test]
async fn test_only_owner_can_share() {
    let hub = TestHub::new().await;
    let file = hub.upload(None, "mine.txt", b"mine").await.expect("upload");

    let err = hub
        .services
        .shares
        .create_share(OwnerId::new(), request(file.id, ShareAccess::Download))
        .await
        .expect_err("not the owner");
    assert_eq!(err.kind, ErrorKind::PermissionDenied);

    let err = hub
        .services
        .shares
        .create_share(
            hub.owner,
            CreateShareRequest {
                max_downloads: Some(0),
                ..request(file.id, ShareAccess::Download)
            },
        )
        .await
        .expect_err("zero downloads");
    assert_eq!(err.kind, ErrorKind::Validation);
}
