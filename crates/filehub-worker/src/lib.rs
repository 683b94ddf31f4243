//! Scheduled maintenance for FileHub.
//!
//! This crate provides:
//! - A cron scheduler running maintenance on configurable schedules
//! - A job executor that dispatches jobs to the correct handler
//! - Handlers for the recycle bin sweep, storage reconciliation and version pruning

pub mod executor;
pub mod jobs;
pub mod scheduler;

pub use executor::{JobExecutionError, JobExecutor, JobHandler};
pub use scheduler::CronScheduler;
