//! Recycle bin retention sweep.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use filehub_service::RecycleService;

use super::RECYCLE_SWEEP;
use crate::executor::{JobExecutionError, JobHandler};

/// Purges recycle batches older than the retention period
#[derive(Debug)]
pub struct RecycleSweepJobHandler {
    /// Recycle bin service
    recycle: Arc<RecycleService>,
}

impl RecycleSweepJobHandler {
    /// Create a new recycle sweep handler
    pub fn new(recycle: Arc<RecycleService>) -> Self {
        Self { recycle }
    }
}

#[async_trait]
impl JobHandler for RecycleSweepJobHandler {
    fn job_type(&self) -> &str {
        RECYCLE_SWEEP
    }

    async fn execute(&self) -> Result<Value, JobExecutionError> {
        let report = self
            .recycle
            .sweep_expired()
            .await
            .map_err(|e| JobExecutionError::Transient(format!("Recycle sweep failed: {e}")))?;

        Ok(serde_json::json!({
            "task": RECYCLE_SWEEP,
            "batches_purged": report.batches_purged,
            "batches_failed": report.batches_failed,
            "nodes_purged": report.purge.purged_nodes,
            "released_bytes": report.purge.released_bytes,
            "failed_blobs": report.purge.failed_blobs.len(),
        }))
    }
}
