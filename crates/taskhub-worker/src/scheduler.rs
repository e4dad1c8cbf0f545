//! Cron scheduler for periodic maintenance tasks.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use tokio_util::task::TaskTracker;
use tracing;

use taskhub_core::error::AppError;
use taskhub_core::result::AppResult;

/// A named callback fired on a cron schedule.
#[async_trait]
pub trait MaintenanceTask: Send + Sync + std::fmt::Debug {
    /// Name used in logs and stats
    fn name(&self) -> &str;

    /// Run the task once
    async fn run(&self) -> AppResult<()>;
}

/// What happened when a task was fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FireOutcome {
    /// The task ran to completion
    Completed,
    /// The task returned an error or panicked; it stays scheduled
    Failed,
    /// The previous run was still in progress
    Skipped,
}

/// Counters for one scheduled task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    /// Runs that completed
    pub completed: u64,
    /// Runs that failed
    pub failed: u64,
    /// Firings skipped because a run was still in progress
    pub skipped: u64,
}

/// A maintenance task plus its overlap guard.
#[derive(Debug)]
pub struct ScheduledTask {
    task: Arc<dyn MaintenanceTask>,
    cron: String,
    running: AtomicBool,
    completed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

/// Clears the running flag when a run ends, even by panic
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ScheduledTask {
    /// Wrap a task fired on `cron`
    pub fn new(cron: impl Into<String>, task: Arc<dyn MaintenanceTask>) -> Self {
        Self {
            task,
            cron: cron.into(),
            running: AtomicBool::new(false),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }

    /// Task name
    pub fn name(&self) -> &str {
        self.task.name()
    }

    /// Cron expression
    pub fn cron(&self) -> &str {
        &self.cron
    }

    /// Whether a run is in progress
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run counters so far
    pub fn stats(&self) -> TaskStats {
        TaskStats {
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }

    /// Run the task unless a previous run is still in progress.
    ///
    /// Errors and panics are logged and counted; they never propagate.
    pub async fn fire(&self) -> FireOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(task = %self.name(), "Previous run still in progress, skipping this firing");
            return FireOutcome::Skipped;
        }
        let _guard = RunningGuard(&self.running);

        let started = Instant::now();
        tracing::debug!(task = %self.name(), "Running scheduled task");

        match AssertUnwindSafe(self.task.run()).catch_unwind().await {
            Ok(Ok(())) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    task = %self.name(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Scheduled task finished"
                );
                FireOutcome::Completed
            }
            Ok(Err(e)) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(task = %self.name(), error = %e, "Scheduled task failed");
                FireOutcome::Failed
            }
            Err(_) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(task = %self.name(), "Scheduled task panicked");
                FireOutcome::Failed
            }
        }
    }
}

/// Check that `expression` parses as a schedule
pub fn validate_cron_expression(expression: &str) -> AppResult<()> {
    CronJob::new_async(expression, |_uuid, _lock| Box::pin(async {}))
        .map(drop)
        .map_err(|e| {
            AppError::configuration(format!("Invalid cron expression '{expression}': {e}"))
        })
}

/// Cron-based scheduler for periodic background tasks
pub struct CronScheduler {
    /// The underlying job scheduler
    scheduler: JobScheduler,
    /// Registered tasks
    tasks: std::sync::Mutex<Vec<Arc<ScheduledTask>>>,
    /// Runs in progress
    runs: TaskTracker,
}

impl std::fmt::Debug for CronScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronScheduler")
            .field("runs_in_progress", &self.runs.len())
            .finish()
    }
}

impl CronScheduler {
    /// Create a new cron scheduler
    pub async fn new() -> AppResult<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::internal(format!("Failed to create scheduler: {e}")))?;

        Ok(Self {
            scheduler,
            tasks: std::sync::Mutex::new(Vec::new()),
            runs: TaskTracker::new(),
        })
    }

    /// Register `task` to fire on `cron`
    pub async fn schedule(
        &self,
        cron: &str,
        task: Arc<dyn MaintenanceTask>,
    ) -> AppResult<Arc<ScheduledTask>> {
        let scheduled = Arc::new(ScheduledTask::new(cron, task));
        let name = scheduled.name().to_string();

        let fired = Arc::clone(&scheduled);
        let runs = self.runs.clone();
        let job = CronJob::new_async(cron, move |_uuid, _lock| {
            let fired = Arc::clone(&fired);
            let runs = runs.clone();
            Box::pin(async move {
                if runs.is_closed() {
                    return;
                }
                runs.spawn(async move {
                    fired.fire().await;
                });
            })
        })
        .map_err(|e| {
            AppError::configuration(format!("Invalid cron expression '{cron}' for {name}: {e}"))
        })?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| AppError::internal(format!("Failed to add {name} schedule: {e}")))?;

        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(&scheduled));

        tracing::info!(task = %name, cron = %cron, "Registered scheduled task");
        Ok(scheduled)
    }

    /// Registered tasks
    pub fn tasks(&self) -> Vec<Arc<ScheduledTask>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Start the scheduler
    pub async fn start(&self) -> AppResult<()> {
        self.scheduler
            .start()
            .await
            .map_err(|e| AppError::internal(format!("Failed to start scheduler: {e}")))?;

        tracing::info!(tasks = self.tasks().len(), "Cron scheduler started");
        Ok(())
    }

    /// Stop future firings, then wait up to `grace` for runs in progress.
    ///
    /// Runs still going after `grace` are left to finish on their own.
    pub async fn stop(&self, grace: Duration) -> AppResult<()> {
        self.runs.close();

        let mut scheduler = self.scheduler.clone();
        let shutdown = scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::internal(format!("Failed to shut down scheduler: {e}")));

        if tokio::time::timeout(grace, self.runs.wait()).await.is_err() {
            tracing::warn!(
                in_progress = self.runs.len(),
                "Scheduled tasks still running after grace period"
            );
        }

        shutdown?;
        tracing::info!("Cron scheduler shut down");
        Ok(())
    }
}
