//! Service container shared by the binary, the worker and tests.

use std::sync::Arc;

use filehub_core::config::AppConfig;
use filehub_database::DatabasePool;
use filehub_database::repositories::{
    NodeRepository, QuotaRepository, ShareRepository, VersionRepository,
};
use filehub_storage::StorageManager;

use crate::live::LiveMirror;
use crate::quota::QuotaService;
use crate::reconcile::ReconcileService;
use crate::recycle::RecycleService;
use crate::share::{LinkService, PasswordHasher, ShareService};
use crate::tree::FileTreeService;
use crate::version::VersionService;

/// Every service wired against one database and one storage backend.
///
/// All fields are `Arc`-wrapped for cheap cloning across tasks.
#[derive(Debug, Clone)]
pub struct Services {
    // ── Infrastructure ───────────────────────────────────────
    /// Metadata database pool
    pub db: DatabasePool,
    /// Blob storage
    pub storage: Arc<StorageManager>,

    // ── Services ─────────────────────────────────────────────
    /// Quota accounting
    pub quota: Arc<QuotaService>,
    /// Version history
    pub versions: Arc<VersionService>,
    /// File tree operations
    pub tree: Arc<FileTreeService>,
    /// Recycle bin
    pub recycle: Arc<RecycleService>,
    /// Share links
    pub shares: Arc<ShareService>,
    /// Storage reconciliation
    pub reconcile: Arc<ReconcileService>,
}

impl Services {
    /// Build all services from their shared infrastructure.
    pub fn new(db: DatabasePool, storage: Arc<StorageManager>, config: &AppConfig) -> Self {
        let node_repo = Arc::new(NodeRepository::new());
        let version_repo = Arc::new(VersionRepository::new());
        let share_repo = Arc::new(ShareRepository::new());
        let quota_repo = Arc::new(QuotaRepository::new());

        let quota = Arc::new(QuotaService::new(
            db.clone(),
            quota_repo,
            Arc::clone(&node_repo),
            &config.quota,
        ));
        let mirror = Arc::new(LiveMirror::new(
            db.clone(),
            Arc::clone(&storage),
            Arc::clone(&node_repo),
            Arc::clone(&version_repo),
        ));
        let versions = Arc::new(VersionService::new(
            db.clone(),
            Arc::clone(&storage),
            Arc::clone(&node_repo),
            Arc::clone(&version_repo),
            Arc::clone(&quota),
            Arc::clone(&mirror),
            config.versioning.clone(),
        ));
        let tree = Arc::new(FileTreeService::new(
            db.clone(),
            Arc::clone(&storage),
            Arc::clone(&node_repo),
            Arc::clone(&version_repo),
            Arc::clone(&share_repo),
            Arc::clone(&quota),
            Arc::clone(&versions),
            Arc::clone(&mirror),
        ));
        let recycle = Arc::new(RecycleService::new(
            db.clone(),
            Arc::clone(&node_repo),
            Arc::clone(&tree),
            config.recycle.clone(),
        ));
        let shares = Arc::new(ShareService::new(
            db.clone(),
            Arc::clone(&node_repo),
            share_repo,
            Arc::clone(&quota),
            Arc::clone(&tree),
            Arc::new(LinkService::new()),
            Arc::new(PasswordHasher::new()),
            config.share.clone(),
        ));
        let reconcile = Arc::new(ReconcileService::new(
            db.clone(),
            Arc::clone(&storage),
            node_repo,
            version_repo,
            mirror,
            config.reconcile.clone(),
        ));

        Self {
            db,
            storage,
            quota,
            versions,
            tree,
            recycle,
            shares,
            reconcile,
        }
    }
}
