//! Append-only file version history.
//!
//! Every content change of a file goes through the revision writer. The
//! content is first staged under a fresh version key with no transaction
//! open, then recorded as a new `FileVersion` row in a short transaction.
//! A staged blob whose transaction fails is removed again.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, warn};

use filehub_core::config::VersioningConfig;
use filehub_core::error::AppError;
use filehub_core::result::AppResult;
use filehub_core::traits::storage::{ByteStream, StorageBackend};
use filehub_core::types::id::{NodeId, OwnerId, VersionId};
use filehub_database::repositories::{NodeRepository, VersionRepository};
use filehub_database::{DatabasePool, SqliteConnection, commit};
use filehub_entity::node::FileNode;
use filehub_entity::version::{FileVersion, NewFileVersion};
use filehub_storage::StorageManager;
use filehub_storage::keys;

use crate::guard::{blob_error, load_owned, load_readable, require_active, require_file};
use crate::hashing::HashingStream;
use crate::live::LiveMirror;
use crate::quota::QuotaService;

/// Content for a new revision.
pub struct RevisionContent {
    /// The bytes to store.
    pub stream: ByteStream,
    /// Declared length of `stream`.
    pub size: u64,
    /// MIME type recorded on the version and the node.
    pub mime_type: String,
    /// Who wrote the revision.
    pub created_by: OwnerId,
}

/// A revision blob stored under its own version key but not yet recorded.
#[derive(Debug, Clone)]
#[must_use = "a staged revision must be recorded or discarded"]
pub struct StagedRevision {
    /// Identifier of the version row to record.
    pub id: VersionId,
    /// Key the blob was written to.
    pub storage_key: String,
    /// Size in bytes.
    pub size_bytes: i64,
    /// SHA-256 hex digest.
    pub content_hash: String,
    /// MIME type.
    pub mime_type: Option<String>,
    /// Who wrote the revision.
    pub created_by: OwnerId,
}

/// Outcome of a pruning pass.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct PruneReport {
    /// Version rows deleted.
    pub pruned: u64,
    /// Blobs that could not be deleted after commit.
    pub blob_failures: u64,
}

/// Manages file versions.
#[derive(Debug, Clone)]
pub struct VersionService {
    /// Database pool.
    db: DatabasePool,
    /// Blob storage.
    storage: Arc<StorageManager>,
    /// Node repository.
    node_repo: Arc<NodeRepository>,
    /// Version repository.
    version_repo: Arc<VersionRepository>,
    /// Quota accounting.
    quota: Arc<QuotaService>,
    /// Live-key mirror.
    mirror: Arc<LiveMirror>,
    /// Retention policy for scheduled pruning.
    config: VersioningConfig,
}

impl VersionService {
    /// Creates a new version service.
    pub fn new(
        db: DatabasePool,
        storage: Arc<StorageManager>,
        node_repo: Arc<NodeRepository>,
        version_repo: Arc<VersionRepository>,
        quota: Arc<QuotaService>,
        mirror: Arc<LiveMirror>,
        config: VersioningConfig,
    ) -> Self {
        Self {
            db,
            storage,
            node_repo,
            version_repo,
            quota,
            mirror,
            config,
        }
    }

    /// Stream `content` to a fresh version key of `node`.
    ///
    /// Must run with no transaction open. The blob is removed again if the
    /// stream fails or ends short.
    pub(crate) async fn stage(
        &self,
        owner: OwnerId,
        node: NodeId,
        content: RevisionContent,
    ) -> AppResult<StagedRevision> {
        let size_bytes = i64::try_from(content.size)
            .map_err(|_| AppError::validation("Content is too large"))?;
        let id = VersionId::new();
        let storage_key = keys::version_key(owner, node, id);

        let (stream, digest) = HashingStream::new(content.stream);
        if let Err(e) = self
            .storage
            .save(&storage_key, stream.boxed(), content.size)
            .await
        {
            self.remove_quietly(&storage_key).await;
            return Err(e);
        }
        let Some(digest) = digest.finish() else {
            self.remove_quietly(&storage_key).await;
            return Err(AppError::storage(
                "Upload stream ended before it was fully stored",
            ));
        };

        Ok(StagedRevision {
            id,
            storage_key,
            size_bytes,
            content_hash: digest.sha256,
            mime_type: Some(content.mime_type),
            created_by: content.created_by,
        })
    }

    /// Copy an existing version to a fresh version key of `node`.
    pub(crate) async fn stage_copy(
        &self,
        owner: OwnerId,
        node: NodeId,
        source: &FileVersion,
        created_by: OwnerId,
    ) -> AppResult<StagedRevision> {
        let id = VersionId::new();
        let storage_key = keys::version_key(owner, node, id);
        if let Err(e) = self.storage.copy(&source.storage_key, &storage_key).await {
            self.remove_quietly(&storage_key).await;
            return Err(blob_error(&source.storage_key)(e));
        }
        Ok(StagedRevision {
            id,
            storage_key,
            size_bytes: source.size_bytes,
            content_hash: source.content_hash.clone(),
            mime_type: source.mime_type.clone(),
            created_by,
        })
    }

    /// Record `staged` as revision `number` of a file and make it current.
    pub(crate) async fn record(
        &self,
        conn: &mut SqliteConnection,
        file_id: NodeId,
        number: i32,
        staged: &StagedRevision,
    ) -> AppResult<FileVersion> {
        let now = Utc::now();
        let version = self
            .version_repo
            .insert(
                conn,
                &NewFileVersion {
                    id: staged.id,
                    file_id,
                    version: number,
                    size_bytes: staged.size_bytes,
                    content_hash: staged.content_hash.clone(),
                    storage_key: staged.storage_key.clone(),
                    mime_type: staged.mime_type.clone(),
                    created_by: staged.created_by,
                },
                now,
            )
            .await?;
        self.node_repo
            .update_content(
                conn,
                file_id,
                staged.size_bytes,
                staged.mime_type.as_deref(),
                &staged.content_hash,
                number,
                now,
            )
            .await?;
        Ok(version)
    }

    /// Charge the size change and record `staged` as the next revision of
    /// `file`. `file` must have been read under the owner lock held by `conn`.
    pub(crate) async fn record_overwrite(
        &self,
        conn: &mut SqliteConnection,
        file: &FileNode,
        staged: &StagedRevision,
    ) -> AppResult<FileVersion> {
        self.quota
            .apply_delta(conn, file.owner_id, staged.size_bytes - file.size_bytes)
            .await?;
        self.record(conn, file.id, file.version + 1, staged).await
    }

    /// Pass `result` through, removing the staged blob when it is an error.
    pub(crate) async fn keep_or_discard<T>(
        &self,
        staged: &StagedRevision,
        result: AppResult<T>,
    ) -> AppResult<T> {
        if result.is_err() {
            self.discard(staged).await;
        }
        result
    }

    /// Remove a staged blob that will not be recorded.
    pub(crate) async fn discard(&self, staged: &StagedRevision) {
        self.remove_quietly(&staged.storage_key).await;
    }

    async fn remove_quietly(&self, key: &str) {
        if let Err(e) = self.storage.delete(key).await {
            warn!(key, error = %e, "Failed to remove blob of aborted revision");
        }
    }

    /// All versions of a file, oldest first.
    pub async fn list_versions(
        &self,
        requester: OwnerId,
        file_id: NodeId,
    ) -> AppResult<Vec<FileVersion>> {
        let mut conn = self.db.acquire().await?;
        let file = load_readable(&self.node_repo, &mut conn, requester, file_id).await?;
        require_file(&file)?;
        self.version_repo.list_for_file(&mut conn, file.id).await
    }

    /// Make the content of version `number` current again, as a new version.
    pub async fn restore_version(
        &self,
        owner: OwnerId,
        file_id: NodeId,
        number: i32,
    ) -> AppResult<FileNode> {
        let (file, source) = {
            let mut conn = self.db.acquire().await?;
            let file = load_owned(&self.node_repo, &mut conn, owner, file_id).await?;
            require_active(&file)?;
            require_file(&file)?;
            let source = self.find_version(&mut conn, &file, number).await?;
            self.quota
                .ensure_room(&mut conn, owner, source.size_bytes - file.size_bytes)
                .await?;
            (file, source)
        };

        let staged = self.stage_copy(owner, file.id, &source, owner).await?;
        let result = async {
            let mut tx = self.db.begin().await?;
            self.quota.lock_owner(&mut tx, owner).await?;
            let file = load_owned(&self.node_repo, &mut tx, owner, file.id).await?;
            require_active(&file)?;
            require_file(&file)?;
            // Pruning may have removed the source since it was copied.
            self.find_version(&mut tx, &file, number).await?;
            let version = self.record_overwrite(&mut tx, &file, &staged).await?;
            commit(tx).await?;
            Ok::<_, AppError>(version)
        }
        .await;
        let version = self.keep_or_discard(&staged, result).await?;
        self.mirror.publish(file.id).await;

        info!(
            owner_id = %owner,
            file_id = %file.id,
            restored_from = number,
            new_version = version.version,
            "File version restored"
        );

        let mut conn = self.db.acquire().await?;
        load_owned(&self.node_repo, &mut conn, owner, file_id).await
    }

    async fn find_version(
        &self,
        conn: &mut SqliteConnection,
        file: &FileNode,
        number: i32,
    ) -> AppResult<FileVersion> {
        self.version_repo
            .find(conn, file.id, number)
            .await?
            .ok_or_else(|| {
                AppError::version_not_found(format!(
                    "Version {number} of '{}' does not exist",
                    file.path
                ))
            })
    }

    /// Prune using the configured retention policy.
    pub async fn prune_with_policy(&self) -> AppResult<PruneReport> {
        let max_age =
            (self.config.max_age_days > 0).then(|| Duration::days(self.config.max_age_days));
        self.prune_versions(self.config.max_versions, max_age).await
    }

    /// Delete non-current versions beyond `max_count` per file or older than
    /// `max_age`. A limit of zero (or `None`) disables that rule.
    pub async fn prune_versions(
        &self,
        max_count: u32,
        max_age: Option<Duration>,
    ) -> AppResult<PruneReport> {
        let mut report = PruneReport::default();
        if max_count == 0 && max_age.is_none() {
            return Ok(report);
        }
        let created_before = max_age.map(|age| Utc::now() - age);

        let candidates = {
            let mut conn = self.db.acquire().await?;
            self.version_repo
                .prune_candidates(&mut conn, i64::from(max_count), created_before)
                .await?
        };

        for candidate in candidates {
            match self.prune_one(&candidate).await {
                Ok(false) => {}
                Ok(true) => {
                    report.pruned += 1;
                    if let Err(e) = self.storage.delete(&candidate.storage_key).await {
                        warn!(
                            key = %candidate.storage_key,
                            error = %e,
                            "Failed to delete pruned version blob"
                        );
                        report.blob_failures += 1;
                    }
                }
                Err(e) => {
                    warn!(
                        file_id = %candidate.file_id,
                        version = candidate.version,
                        error = %e,
                        "Failed to prune version"
                    );
                }
            }
        }

        if report.pruned > 0 {
            info!(
                pruned = report.pruned,
                blob_failures = report.blob_failures,
                "Old file versions pruned"
            );
        }
        Ok(report)
    }

    /// Delete one version row if it is still not the current version.
    async fn prune_one(&self, candidate: &FileVersion) -> AppResult<bool> {
        let owner = {
            let mut conn = self.db.acquire().await?;
            match self.node_repo.find_by_id(&mut conn, candidate.file_id).await? {
                Some(node) => node.owner_id,
                None => return Ok(false),
            }
        };

        let mut tx = self.db.begin().await?;
        self.quota.lock_owner(&mut tx, owner).await?;
        let Some(node) = self.node_repo.find_by_id(&mut tx, candidate.file_id).await? else {
            return Ok(false);
        };
        if candidate.version >= node.version {
            return Ok(false);
        }
        let deleted = self.version_repo.delete(&mut tx, candidate.id).await?;
        commit(tx).await?;
        Ok(deleted)
    }
}
