//! Storage reconciliation job.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use filehub_service::ReconcileService;

use super::RECONCILE;
use crate::executor::{JobExecutionError, JobHandler};

/// Runs the reconciliation sweep with the configured grace period
#[derive(Debug)]
pub struct ReconcileJobHandler {
    /// Reconciliation service
    reconcile: Arc<ReconcileService>,
}

impl ReconcileJobHandler {
    /// Create a new reconcile handler
    pub fn new(reconcile: Arc<ReconcileService>) -> Self {
        Self { reconcile }
    }
}

#[async_trait]
impl JobHandler for ReconcileJobHandler {
    fn job_type(&self) -> &str {
        RECONCILE
    }

    async fn execute(&self) -> Result<Value, JobExecutionError> {
        let report = self
            .reconcile
            .run_with_config()
            .await
            .map_err(|e| JobExecutionError::Transient(format!("Reconciliation failed: {e}")))?;

        let mut summary = serde_json::to_value(&report)
            .map_err(|e| JobExecutionError::Permanent(format!("Bad reconcile report: {e}")))?;
        summary["task"] = Value::from(RECONCILE);
        Ok(summary)
    }
}
