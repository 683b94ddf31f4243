//! File tree service: creation, content and lookups.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use filehub_core::error::AppError;
use filehub_core::result::AppResult;
use filehub_core::traits::storage::ByteStream;
use filehub_core::types::id::{NodeId, OwnerId};
use filehub_core::types::pagination::{PageRequest, PageResponse};
use filehub_database::repositories::{NodeRepository, ShareRepository, VersionRepository};
use filehub_database::{DatabasePool, SqliteConnection, commit};
use filehub_entity::node::{BlobState, FileNode, NodeKind, NodeState, Visibility};
use filehub_storage::StorageManager;

use super::path::{compute_path, validate_name};
use crate::guard::{load_node, load_owned, load_readable, require_active, require_file};
use crate::live::LiveMirror;
use crate::mime::resolve_mime;
use crate::quota::QuotaService;
use crate::version::{RevisionContent, StagedRevision, VersionService};

/// Orchestrates metadata transactions and blob I/O for the file tree.
#[derive(Debug, Clone)]
pub struct FileTreeService {
    /// Database pool.
    pub(super) db: DatabasePool,
    /// Blob storage.
    pub(super) storage: Arc<StorageManager>,
    /// Node repository.
    pub(super) node_repo: Arc<NodeRepository>,
    /// Version repository.
    pub(super) version_repo: Arc<VersionRepository>,
    /// Share repository, for deactivating shares of purged nodes.
    pub(super) share_repo: Arc<ShareRepository>,
    /// Quota accounting.
    pub(super) quota: Arc<QuotaService>,
    /// Revision writer.
    pub(super) versions: Arc<VersionService>,
    /// Live-key mirror.
    pub(super) mirror: Arc<LiveMirror>,
}

/// A new file to store.
pub struct UploadRequest {
    /// Parent directory, `None` for the owner's root level.
    pub parent: Option<NodeId>,
    /// File name.
    pub name: String,
    /// File content.
    pub content: ByteStream,
    /// Exact length of `content` in bytes.
    pub size: u64,
    /// Declared MIME type. Guessed from the name when absent.
    pub mime_type: Option<String>,
    /// Overwrite an existing file of the same name instead of failing.
    pub override_if_exists: bool,
}

impl std::fmt::Debug for UploadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadRequest")
            .field("parent", &self.parent)
            .field("name", &self.name)
            .field("size", &self.size)
            .field("mime_type", &self.mime_type)
            .field("override_if_exists", &self.override_if_exists)
            .finish()
    }
}

impl FileTreeService {
    /// Creates a new file tree service.
    pub fn new(
        db: DatabasePool,
        storage: Arc<StorageManager>,
        node_repo: Arc<NodeRepository>,
        version_repo: Arc<VersionRepository>,
        share_repo: Arc<ShareRepository>,
        quota: Arc<QuotaService>,
        versions: Arc<VersionService>,
        mirror: Arc<LiveMirror>,
    ) -> Self {
        Self {
            db,
            storage,
            node_repo,
            version_repo,
            share_repo,
            quota,
            versions,
            mirror,
        }
    }

    /// Create an empty directory.
    pub async fn create_directory(
        &self,
        owner: OwnerId,
        parent: Option<NodeId>,
        name: &str,
    ) -> AppResult<FileNode> {
        validate_name(name)?;

        let mut tx = self.db.begin().await?;
        self.quota.lock_owner(&mut tx, owner).await?;
        let parent = self.resolve_parent(&mut tx, owner, parent).await?;
        self.ensure_name_free(&mut tx, owner, parent.as_ref(), name, None)
            .await?;

        let node = new_node(NodeId::new(), owner, parent.as_ref(), name, NodeKind::Directory);
        self.node_repo.insert(&mut tx, &node).await?;
        commit(tx).await?;

        info!(owner_id = %owner, node_id = %node.id, path = %node.path, "Directory created");
        Ok(node)
    }

    /// Store a new file as version 1.
    ///
    /// With `override_if_exists` an existing file of the same name gets a
    /// new version instead; a directory of that name is still a conflict.
    /// The content is staged before the transaction opens.
    pub async fn upload_new_file(
        &self,
        owner: OwnerId,
        mut request: UploadRequest,
    ) -> AppResult<FileNode> {
        validate_name(&request.name)?;
        let size_bytes = i64::try_from(request.size)
            .map_err(|_| AppError::validation("File is too large"))?;

        let existing = {
            let mut conn = self.db.acquire().await?;
            self.resolve_parent(&mut conn, owner, request.parent).await?;
            let existing = self
                .upload_target(&mut conn, owner, &request)
                .await?;
            let delta = size_bytes - existing.as_ref().map_or(0, |e| e.size_bytes);
            self.quota.ensure_room(&mut conn, owner, delta).await?;
            existing
        };

        let existing_id = existing.map(|e| e.id);
        let node_id = existing_id.unwrap_or_else(NodeId::new);
        let mime_type = resolve_mime(request.mime_type.as_deref(), &request.name);
        let staged = self
            .versions
            .stage(
                owner,
                node_id,
                RevisionContent {
                    stream: std::mem::replace(
                        &mut request.content,
                        Box::pin(futures::stream::empty()),
                    ),
                    size: request.size,
                    mime_type,
                    created_by: owner,
                },
            )
            .await?;

        let result = async {
            let mut tx = self.db.begin().await?;
            self.quota.lock_owner(&mut tx, owner).await?;
            let parent = self.resolve_parent(&mut tx, owner, request.parent).await?;
            let target = self.upload_target(&mut tx, owner, &request).await?;
            if target.as_ref().map(|f| f.id) != existing_id {
                return Err(AppError::conflict(format!(
                    "'{}' changed while it was being uploaded",
                    request.name
                )));
            }
            let replaced = match target {
                Some(file) => {
                    self.versions.record_overwrite(&mut tx, &file, &staged).await?;
                    Some(file.id)
                }
                None => {
                    self.insert_file(&mut tx, node_id, owner, parent.as_ref(), &request.name, &staged)
                        .await?;
                    None
                }
            };
            commit(tx).await?;
            Ok::<_, AppError>(replaced)
        }
        .await;
        let replaced = self.versions.keep_or_discard(&staged, result).await?;

        let id = replaced.unwrap_or(node_id);
        self.mirror.publish(id).await;
        let node = self.reload(id).await?;
        match replaced {
            Some(_) => info!(
                owner_id = %owner,
                node_id = %node.id,
                version = node.version,
                size_bytes,
                "File overwritten by upload"
            ),
            None => info!(
                owner_id = %owner,
                node_id = %node.id,
                path = %node.path,
                size_bytes,
                "File uploaded"
            ),
        }
        Ok(node)
    }

    /// The existing file an upload replaces, if any.
    ///
    /// Fails with `Conflict` when the name is taken by a directory, or by a
    /// file without `override_if_exists`.
    async fn upload_target(
        &self,
        conn: &mut SqliteConnection,
        owner: OwnerId,
        request: &UploadRequest,
    ) -> AppResult<Option<FileNode>> {
        let existing = self
            .node_repo
            .find_active_child(conn, owner, request.parent, &request.name)
            .await?;
        match existing {
            Some(existing) if !request.override_if_exists || !existing.is_file() => Err(
                AppError::conflict(format!("'{}' already exists", existing.path)),
            ),
            existing => Ok(existing),
        }
    }

    /// Reserve quota for and insert a new file holding `staged` as version 1.
    pub(super) async fn insert_file(
        &self,
        conn: &mut SqliteConnection,
        id: NodeId,
        owner: OwnerId,
        parent: Option<&FileNode>,
        name: &str,
        staged: &StagedRevision,
    ) -> AppResult<FileNode> {
        self.quota
            .check_and_reserve(conn, owner, staged.size_bytes)
            .await?;
        let mut node = new_node(id, owner, parent, name, NodeKind::File);
        node.size_bytes = staged.size_bytes;
        node.mime_type = staged.mime_type.clone();
        node.content_hash = Some(staged.content_hash.clone());
        self.node_repo.insert(conn, &node).await?;
        self.versions.record(conn, node.id, 1, staged).await?;
        Ok(node)
    }

    /// Replace the content of a file, appending a version.
    pub async fn overwrite_file(
        &self,
        owner: OwnerId,
        file_id: NodeId,
        content: ByteStream,
        size: u64,
        mime_type: Option<String>,
    ) -> AppResult<FileNode> {
        let size_bytes =
            i64::try_from(size).map_err(|_| AppError::validation("File is too large"))?;

        let file = {
            let mut conn = self.db.acquire().await?;
            let file = load_owned(&self.node_repo, &mut conn, owner, file_id).await?;
            require_active(&file)?;
            require_file(&file)?;
            self.quota
                .ensure_room(&mut conn, owner, size_bytes - file.size_bytes)
                .await?;
            file
        };

        let staged = self
            .versions
            .stage(
                owner,
                file.id,
                RevisionContent {
                    stream: content,
                    size,
                    mime_type: resolve_mime(mime_type.as_deref(), &file.name),
                    created_by: owner,
                },
            )
            .await?;

        let result = async {
            let mut tx = self.db.begin().await?;
            self.quota.lock_owner(&mut tx, owner).await?;
            let file = load_owned(&self.node_repo, &mut tx, owner, file_id).await?;
            require_active(&file)?;
            require_file(&file)?;
            let version = self.versions.record_overwrite(&mut tx, &file, &staged).await?;
            commit(tx).await?;
            Ok::<_, AppError>(version)
        }
        .await;
        let version = self.versions.keep_or_discard(&staged, result).await?;
        self.mirror.publish(file.id).await;

        info!(
            owner_id = %owner,
            node_id = %file.id,
            version = version.version,
            size_bytes,
            "File overwritten"
        );
        self.reload(file.id).await
    }

    /// Open the current content of a file.
    pub async fn download_file(
        &self,
        requester: OwnerId,
        file_id: NodeId,
    ) -> AppResult<(ByteStream, FileNode)> {
        let node = {
            let mut conn = self.db.acquire().await?;
            load_readable(&self.node_repo, &mut conn, requester, file_id).await?
        };
        if !node.is_active() {
            return Err(AppError::not_found(format!("Node {file_id} not found")));
        }
        require_file(&node)?;
        let stream = self.open_content(&node).await?;

        debug!(requester = %requester, node_id = %node.id, "File download started");
        Ok((stream, node))
    }

    /// Open the current version blob of a file node.
    pub(crate) async fn open_content(&self, node: &FileNode) -> AppResult<ByteStream> {
        self.mirror.open(node).await
    }

    /// Get a node readable by `requester`.
    pub async fn get_node(&self, requester: OwnerId, id: NodeId) -> AppResult<FileNode> {
        let mut conn = self.db.acquire().await?;
        load_readable(&self.node_repo, &mut conn, requester, id).await
    }

    /// Find one of the owner's Active nodes by path.
    pub async fn find_by_path(&self, owner: OwnerId, path: &str) -> AppResult<FileNode> {
        let mut conn = self.db.acquire().await?;
        self.node_repo
            .find_active_by_path(&mut conn, owner, path)
            .await?
            .ok_or_else(|| AppError::not_found(format!("No node at '{path}'")))
    }

    /// List Active children of a directory, or of the requester's root level.
    pub async fn list_children(
        &self,
        requester: OwnerId,
        parent: Option<NodeId>,
        page: PageRequest,
    ) -> AppResult<PageResponse<FileNode>> {
        let mut conn = self.db.acquire().await?;
        let owner = match parent {
            Some(parent_id) => {
                let dir = load_readable(&self.node_repo, &mut conn, requester, parent_id).await?;
                require_active(&dir)?;
                if !dir.is_directory() {
                    return Err(AppError::invalid_target(format!(
                        "'{}' is not a directory",
                        dir.path
                    )));
                }
                dir.owner_id
            }
            None => requester,
        };
        let (items, total) = self
            .node_repo
            .list_active_children(&mut conn, owner, parent, &page)
            .await?;
        Ok(PageResponse::new(items, &page, total))
    }

    /// Make a node private or public.
    pub async fn set_visibility(
        &self,
        owner: OwnerId,
        id: NodeId,
        visibility: Visibility,
    ) -> AppResult<FileNode> {
        let mut tx = self.db.begin().await?;
        self.quota.lock_owner(&mut tx, owner).await?;
        let node = load_owned(&self.node_repo, &mut tx, owner, id).await?;
        require_active(&node)?;
        self.node_repo
            .set_visibility(&mut tx, id, visibility, Utc::now())
            .await?;
        commit(tx).await?;

        info!(owner_id = %owner, node_id = %id, ?visibility, "Visibility changed");
        self.reload(id).await
    }

    /// Re-read a node after a committed change.
    pub(super) async fn reload(&self, id: NodeId) -> AppResult<FileNode> {
        let mut conn = self.db.acquire().await?;
        load_node(&self.node_repo, &mut conn, id).await
    }

    /// Resolve a destination parent: it must be the owner's Active directory.
    pub(super) async fn resolve_parent(
        &self,
        conn: &mut SqliteConnection,
        owner: OwnerId,
        parent: Option<NodeId>,
    ) -> AppResult<Option<FileNode>> {
        let Some(parent_id) = parent else {
            return Ok(None);
        };
        let dir = load_owned(&self.node_repo, conn, owner, parent_id).await?;
        if !dir.is_directory() {
            return Err(AppError::invalid_target(format!(
                "'{}' is not a directory",
                dir.path
            )));
        }
        require_active(&dir)?;
        Ok(Some(dir))
    }

    /// Fail with `Conflict` if an Active sibling other than `except` has `name`.
    pub(super) async fn ensure_name_free(
        &self,
        conn: &mut SqliteConnection,
        owner: OwnerId,
        parent: Option<&FileNode>,
        name: &str,
        except: Option<NodeId>,
    ) -> AppResult<()> {
        let existing = self
            .node_repo
            .find_active_child(conn, owner, parent.map(|p| p.id), name)
            .await?;
        match existing {
            Some(node) if Some(node.id) != except => Err(AppError::conflict(format!(
                "'{}' already exists",
                node.path
            ))),
            _ => Ok(()),
        }
    }

    /// Fail with `InvalidTarget` if `target` is `node` or one of its descendants.
    pub(super) async fn ensure_not_within(
        &self,
        conn: &mut SqliteConnection,
        target: NodeId,
        node: NodeId,
    ) -> AppResult<()> {
        let chain = self.node_repo.ancestor_chain(conn, target).await?;
        if chain.contains(&node) {
            return Err(AppError::invalid_target(
                "A directory cannot be placed inside itself",
            ));
        }
        Ok(())
    }
}

/// Build a fresh Active node under `parent`.
pub(super) fn new_node(
    id: NodeId,
    owner: OwnerId,
    parent: Option<&FileNode>,
    name: &str,
    kind: NodeKind,
) -> FileNode {
    let now = Utc::now();
    FileNode {
        id,
        owner_id: owner,
        parent_id: parent.map(|p| p.id),
        name: name.to_string(),
        path: compute_path(parent.map(|p| p.path.as_str()), name),
        kind,
        size_bytes: 0,
        mime_type: None,
        content_hash: None,
        visibility: Visibility::Private,
        version: 1,
        state: NodeState::Active,
        recycled_at: None,
        recycle_root: None,
        blob_state: BlobState::Ok,
        created_at: now,
        updated_at: now,
    }
}
