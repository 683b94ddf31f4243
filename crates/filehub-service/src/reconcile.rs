//! Reconciliation between the metadata tree and the blob backend.
//!
//! Storage writes are not part of the metadata transaction, so crashes and
//! failed post-commit deletes leave blobs nobody references, and lost blobs
//! leave rows pointing at nothing. This sweep finds both, and rebuilds live
//! keys that fell out of line with the current version.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use filehub_core::config::ReconcileConfig;
use filehub_core::error::ErrorKind;
use filehub_core::result::AppResult;
use filehub_core::traits::storage::StorageBackend;
use filehub_core::types::id::NodeId;
use filehub_database::DatabasePool;
use filehub_database::repositories::{NodeRepository, VersionRepository};
use filehub_entity::node::{BlobState, FileNode};
use filehub_entity::version::FileVersion;
use filehub_storage::StorageManager;
use filehub_storage::keys::live_key;

use crate::live::LiveMirror;

/// Outcome of one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ReconcileReport {
    /// Objects listed from the backend.
    pub scanned_objects: u64,
    /// Unreferenced objects deleted.
    pub orphans_deleted: u64,
    /// Unreferenced objects that could not be deleted.
    pub orphan_failures: u64,
    /// Files newly marked as missing their blob.
    pub dangling_marked: u64,
    /// Live blobs rebuilt from the current version blob, and current
    /// version blobs recovered from an intact live blob.
    pub repaired: u64,
    /// Files previously marked missing whose blob is back.
    pub recovered: u64,
    /// Version rows whose blob is gone.
    pub missing_versions: u64,
    /// Stale incomplete uploads removed by the backend.
    pub incomplete_cleaned: u64,
}

/// Runs the reconciliation sweep.
#[derive(Debug, Clone)]
pub struct ReconcileService {
    /// Database pool.
    db: DatabasePool,
    /// Blob storage.
    storage: Arc<StorageManager>,
    /// Node repository.
    node_repo: Arc<NodeRepository>,
    /// Version repository.
    version_repo: Arc<VersionRepository>,
    /// Live-key mirror, for path ownership checks.
    mirror: Arc<LiveMirror>,
    /// Grace period settings.
    config: ReconcileConfig,
}

impl ReconcileService {
    /// Creates a new reconcile service.
    pub fn new(
        db: DatabasePool,
        storage: Arc<StorageManager>,
        node_repo: Arc<NodeRepository>,
        version_repo: Arc<VersionRepository>,
        mirror: Arc<LiveMirror>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            db,
            storage,
            node_repo,
            version_repo,
            mirror,
            config,
        }
    }

    /// Run with the configured grace period.
    pub async fn run_with_config(&self) -> AppResult<ReconcileReport> {
        self.run(Duration::minutes(self.config.grace_minutes.max(0)))
            .await
    }

    /// Delete orphans older than `grace`, flag dangling rows and clean up
    /// stale incomplete uploads.
    pub async fn run(&self, grace: Duration) -> AppResult<ReconcileReport> {
        let cutoff = Utc::now() - grace;
        let mut report = ReconcileReport::default();

        // Listing before loading metadata: a blob whose row commits after the
        // listing is either referenced by then or younger than the cutoff.
        let objects = self.storage.list("").await?;
        report.scanned_objects = objects.len() as u64;

        let (files, versions) = {
            let mut conn = self.db.acquire().await?;
            let files = self.node_repo.live_files(&mut conn).await?;
            let versions = self.version_repo.all(&mut conn).await?;
            (files, versions)
        };

        let mut referenced: HashSet<String> = files
            .iter()
            .filter(|f| f.is_active())
            .map(|f| live_key(f.owner_id, &f.path))
            .collect();
        referenced.extend(versions.iter().map(|v| v.storage_key.clone()));

        for object in &objects {
            if object.is_directory || referenced.contains(&object.key) {
                continue;
            }
            let Some(modified) = object.last_modified else {
                continue;
            };
            if modified >= cutoff {
                debug!(key = %object.key, "Skipping recent unreferenced blob");
                continue;
            }
            match self.storage.delete(&object.key).await {
                Ok(()) => {
                    warn!(key = %object.key, size = object.size_bytes, "Deleted orphaned blob");
                    report.orphans_deleted += 1;
                }
                Err(e) => {
                    warn!(key = %object.key, error = %e, "Failed to delete orphaned blob");
                    report.orphan_failures += 1;
                }
            }
        }

        let current: HashMap<(NodeId, i32), &FileVersion> = versions
            .iter()
            .map(|v| ((v.file_id, v.version), v))
            .collect();
        for file in &files {
            let version = current.get(&(file.id, file.version)).copied();
            self.check_file(file, version, &mut report).await?;
        }

        for version in &versions {
            if !self.storage.exists(&version.storage_key).await? {
                warn!(
                    file_id = %version.file_id,
                    version = version.version,
                    key = %version.storage_key,
                    "Version blob is missing"
                );
                report.missing_versions += 1;
            }
        }

        report.incomplete_cleaned = self.storage.cleanup_incomplete(cutoff).await?;

        info!(
            scanned = report.scanned_objects,
            orphans_deleted = report.orphans_deleted,
            dangling = report.dangling_marked,
            repaired = report.repaired,
            missing_versions = report.missing_versions,
            incomplete = report.incomplete_cleaned,
            "Reconciliation finished"
        );
        Ok(report)
    }

    async fn check_file(
        &self,
        file: &FileNode,
        current: Option<&FileVersion>,
        report: &mut ReconcileReport,
    ) -> AppResult<()> {
        let version_present = match current {
            Some(version) => self.storage.exists(&version.storage_key).await?,
            None => false,
        };
        // A recycled file, or one sharing its path with a stale node, has no
        // live key of its own.
        let present = if file.is_active() && self.mirror.sole_claimant(file).await? {
            self.check_live(file, current, version_present, report).await?
        } else {
            version_present
        };

        let wanted = if present {
            BlobState::Ok
        } else {
            BlobState::Missing
        };
        if wanted == file.blob_state {
            return Ok(());
        }

        let mut conn = self.db.acquire().await?;
        self.node_repo
            .set_blob_state(&mut conn, file.id, wanted)
            .await?;
        match wanted {
            BlobState::Missing => {
                warn!(node_id = %file.id, owner_id = %file.owner_id, path = %file.path, "File blob is missing");
                report.dangling_marked += 1;
            }
            BlobState::Ok => {
                info!(node_id = %file.id, "File blob is available again");
                report.recovered += 1;
            }
        }
        Ok(())
    }

    /// Line up the live key of a file with its current version. Returns
    /// whether the file's content is available afterwards.
    async fn check_live(
        &self,
        file: &FileNode,
        current: Option<&FileVersion>,
        version_present: bool,
        report: &mut ReconcileReport,
    ) -> AppResult<bool> {
        let live = live_key(file.owner_id, &file.path);
        let live_size = match self.storage.stat(&live).await {
            Ok(meta) if !meta.is_directory => Some(meta.size_bytes),
            Ok(_) => None,
            Err(e) if e.kind == ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };
        let live_intact = live_size.is_some_and(|size| i64::try_from(size) == Ok(file.size_bytes));

        match current {
            Some(version) if version_present && !live_intact => {
                match self.storage.copy(&version.storage_key, &live).await {
                    Ok(()) => {
                        info!(node_id = %file.id, key = %live, "Rebuilt live blob from version");
                        report.repaired += 1;
                    }
                    Err(e) => warn!(node_id = %file.id, key = %live, error = %e, "Failed to rebuild live blob"),
                }
                Ok(true)
            }
            Some(_) if version_present => Ok(true),
            Some(version) if live_intact => {
                match self.storage.copy(&live, &version.storage_key).await {
                    Ok(()) => {
                        info!(
                            node_id = %file.id,
                            key = %version.storage_key,
                            "Recovered version blob from live content"
                        );
                        report.repaired += 1;
                        Ok(true)
                    }
                    Err(e) => {
                        warn!(node_id = %file.id, error = %e, "Failed to recover version blob");
                        Ok(false)
                    }
                }
            }
            _ => Ok(false),
        }
    }
}
