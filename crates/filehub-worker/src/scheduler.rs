//! Cron scheduler for periodic maintenance tasks.

use std::sync::Arc;

use tokio_cron_scheduler::{Job as CronJob, JobScheduler};

use filehub_core::config::WorkerConfig;
use filehub_core::error::AppError;
use filehub_service::Services;

use crate::executor::JobExecutor;
use crate::jobs::{
    RECONCILE, RECYCLE_SWEEP, ReconcileJobHandler, RecycleSweepJobHandler, VERSION_PRUNE,
    VersionPruneJobHandler,
};

/// Cron-based scheduler for periodic background tasks
pub struct CronScheduler {
    /// The underlying job scheduler
    scheduler: JobScheduler,
    /// Executor running the registered handlers
    executor: Arc<JobExecutor>,
}

impl std::fmt::Debug for CronScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronScheduler")
            .field("job_types", &self.executor.registered_types())
            .finish()
    }
}

impl CronScheduler {
    /// Create a new cron scheduler around an executor
    pub async fn new(executor: Arc<JobExecutor>) -> Result<Self, AppError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::internal(format!("Failed to create scheduler: {e}")))?;

        Ok(Self {
            scheduler,
            executor,
        })
    }

    /// Build an executor with the built-in maintenance handlers
    pub fn default_executor(services: &Services) -> JobExecutor {
        let mut executor = JobExecutor::new();
        executor.register(Arc::new(RecycleSweepJobHandler::new(Arc::clone(
            &services.recycle,
        ))));
        executor.register(Arc::new(ReconcileJobHandler::new(Arc::clone(
            &services.reconcile,
        ))));
        executor.register(Arc::new(VersionPruneJobHandler::new(Arc::clone(
            &services.versions,
        ))));
        executor
    }

    /// Register the built-in maintenance tasks on their configured schedules
    pub async fn register_default_tasks(&self, config: &WorkerConfig) -> Result<(), AppError> {
        self.register(RECYCLE_SWEEP, &config.recycle_sweep_cron)
            .await?;
        self.register(RECONCILE, &config.reconcile_cron).await?;
        self.register(VERSION_PRUNE, &config.version_prune_cron)
            .await?;

        tracing::info!("All scheduled tasks registered");
        Ok(())
    }

    /// Run `job_type` on the given six-field cron schedule
    pub async fn register(&self, job_type: &'static str, cron: &str) -> Result<(), AppError> {
        if !self.executor.has_handler(job_type) {
            return Err(AppError::configuration(format!(
                "No handler registered for scheduled job '{job_type}'"
            )));
        }

        let executor = Arc::clone(&self.executor);
        let job = CronJob::new_async(cron, move |_uuid, _lock| {
            let executor = Arc::clone(&executor);
            Box::pin(async move {
                // Failures are logged by the executor; the next tick retries.
                let _ = executor.execute(job_type).await;
            })
        })
        .map_err(|e| {
            AppError::configuration(format!(
                "Invalid cron expression '{cron}' for {job_type}: {e}"
            ))
        })?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| AppError::internal(format!("Failed to add {job_type} schedule: {e}")))?;

        tracing::info!(job_type, cron, "Registered scheduled task");
        Ok(())
    }

    /// Start the scheduler
    pub async fn start(&self) -> Result<(), AppError> {
        self.scheduler
            .start()
            .await
            .map_err(|e| AppError::internal(format!("Failed to start scheduler: {e}")))?;

        tracing::info!("Cron scheduler started");
        Ok(())
    }

    /// Shutdown the scheduler
    pub async fn shutdown(&mut self) -> Result<(), AppError> {
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::internal(format!("Failed to shutdown scheduler: {e}")))?;

        tracing::info!("Cron scheduler shut down");
        Ok(())
    }
}
