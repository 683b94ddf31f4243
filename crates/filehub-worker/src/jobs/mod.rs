//! Built-in maintenance job handlers.

pub mod reconcile;
pub mod recycle;
pub mod versions;

pub use reconcile::ReconcileJobHandler;
pub use recycle::RecycleSweepJobHandler;
pub use versions::VersionPruneJobHandler;

/// Job type of the recycle bin retention sweep.
pub const RECYCLE_SWEEP: &str = "recycle_sweep";
/// Job type of the storage reconciliation sweep.
pub const RECONCILE: &str = "reconcile";
/// Job type of version history pruning.
pub const VERSION_PRUNE: &str = "version_prune";
