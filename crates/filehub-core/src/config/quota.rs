//! Quota configuration.

use serde::{Deserialize, Serialize};

/// Per-owner storage quota defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Allotment provisioned the first time an owner mutates the tree.
    #[serde(default = "default_allotment")]
    pub default_allotment_bytes: i64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_allotment_bytes: default_allotment(),
        }
    }
}

fn default_allotment() -> i64 {
    10 * 1024 * 1024 * 1024 // 10 GiB
}
