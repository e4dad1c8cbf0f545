//! Background job processing and scheduled maintenance for TaskHub.
//!
//! This crate provides:
//! - A durable, multi-queue job engine with per-queue concurrency ceilings
//! - A worker registry mapping job kinds to handlers
//! - A cron scheduler for periodic maintenance tasks that never overlap themselves
//! - Retention sweeps that delete time-windowed rows in bounded batches

pub mod jobs;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod runner;
pub mod scheduler;

pub use jobs::{JobHistorySweep, NotificationDeliveryHandler, RetentionSweep, SweepReport};
pub use queue::{JobQueue, QueueStats};
pub use registry::{JobContext, JobExecutionError, JobHandler, WorkerRegistry};
pub use retry::RetryPolicy;
pub use runner::{DrainReport, QueueEngine};
pub use scheduler::{
    CronScheduler, FireOutcome, MaintenanceTask, ScheduledTask, TaskStats, validate_cron_expression,
};
