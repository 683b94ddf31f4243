//! Version history pruning.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use filehub_service::VersionService;

use super::VERSION_PRUNE;
use crate::executor::{JobExecutionError, JobHandler};

/// Prunes old versions according to the versioning policy
#[derive(Debug)]
pub struct VersionPruneJobHandler {
    /// Version service
    versions: Arc<VersionService>,
}

impl VersionPruneJobHandler {
    /// Create a new version prune handler
    pub fn new(versions: Arc<VersionService>) -> Self {
        Self { versions }
    }
}

#[async_trait]
impl JobHandler for VersionPruneJobHandler {
    fn job_type(&self) -> &str {
        VERSION_PRUNE
    }

    async fn execute(&self) -> Result<Value, JobExecutionError> {
        let report = self
            .versions
            .prune_with_policy()
            .await
            .map_err(|e| JobExecutionError::Transient(format!("Version pruning failed: {e}")))?;

        Ok(serde_json::json!({
            "task": VERSION_PRUNE,
            "pruned": report.pruned,
            "blob_failures": report.blob_failures,
        }))
    }
}
