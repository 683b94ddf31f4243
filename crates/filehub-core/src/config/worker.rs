//! Background worker configuration.

use serde::{Deserialize, Serialize};

/// Scheduled maintenance configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Whether the maintenance scheduler runs in this process.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Cron expression for the recycle bin sweep.
    #[serde(default = "default_recycle_sweep_cron")]
    pub recycle_sweep_cron: String,
    /// Cron expression for the storage reconciliation sweep.
    #[serde(default = "default_reconcile_cron")]
    pub reconcile_cron: String,
    /// Cron expression for version pruning.
    #[serde(default = "default_version_prune_cron")]
    pub version_prune_cron: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            recycle_sweep_cron: default_recycle_sweep_cron(),
            reconcile_cron: default_reconcile_cron(),
            version_prune_cron: default_version_prune_cron(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_recycle_sweep_cron() -> String {
    "0 0 3 * * *".to_string()
}

fn default_reconcile_cron() -> String {
    "0 30 * * * *".to_string()
}

fn default_version_prune_cron() -> String {
    "0 0 4 * * *".to_string()
}
