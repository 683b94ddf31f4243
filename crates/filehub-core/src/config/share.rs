//! Share link configuration.

use serde::{Deserialize, Serialize};

/// Share link settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareConfig {
    /// Minimum length of a share password.
    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,
    /// Upper bound for a share's lifetime, in days. Zero disables the bound.
    #[serde(default = "default_max_expiry_days")]
    pub max_expiry_days: i64,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            min_password_length: default_min_password_length(),
            max_expiry_days: default_max_expiry_days(),
        }
    }
}

fn default_min_password_length() -> usize {
    4
}

fn default_max_expiry_days() -> i64 {
    365
}
