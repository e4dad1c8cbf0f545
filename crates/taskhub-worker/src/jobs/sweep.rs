//! TTL sweeps over time-windowed tables.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing;

use taskhub_core::clock::Clock;
use taskhub_core::config::SweepConfig;
use taskhub_core::error::AppError;
use taskhub_core::result::AppResult;
use taskhub_database::store::RetentionStore;
use taskhub_entity::retention::RetentionTarget;

use crate::queue::JobQueue;
use crate::scheduler::MaintenanceTask;

/// Result of one sweep run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Sweep name
    pub name: String,
    /// Rows created before this instant were eligible
    pub cutoff: DateTime<Utc>,
    /// Rows removed
    pub rows_deleted: u64,
    /// Delete statements issued
    pub batches: u32,
}

/// TTL window and batch bound shared by every sweep
#[derive(Debug, Clone)]
struct Window {
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
    batch_size: i64,
}

impl Window {
    fn new(clock: Arc<dyn Clock>, ttl: Duration, batch_size: i64) -> AppResult<Self> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|_| AppError::configuration("Sweep TTL is out of range"))?;
        if batch_size < 1 {
            return Err(AppError::configuration("Sweep batch size must be positive"));
        }
        Ok(Self {
            clock,
            ttl,
            batch_size,
        })
    }

    fn from_config(clock: Arc<dyn Clock>, config: &SweepConfig) -> AppResult<Self> {
        Self::new(clock, Duration::from_secs(config.ttl_seconds), config.batch_size)
    }

    /// `now - ttl`, read from the canonical clock
    fn cutoff(&self) -> DateTime<Utc> {
        self.clock
            .now()
            .checked_sub_signed(self.ttl)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Repeat `delete` until a batch comes back short.
    async fn run<F, Fut>(&self, name: &str, mut delete: F) -> AppResult<SweepReport>
    where
        F: FnMut(DateTime<Utc>, i64) -> Fut,
        Fut: Future<Output = AppResult<u64>>,
    {
        let cutoff = self.cutoff();
        tracing::info!(sweep = %name, cutoff = %cutoff, "Sweep started");

        let mut rows_deleted = 0u64;
        let mut batches = 0u32;
        loop {
            let deleted = delete(cutoff, self.batch_size).await?;
            rows_deleted += deleted;
            batches += 1;
            if deleted < self.batch_size as u64 {
                break;
            }
            tokio::task::yield_now().await;
        }

        tracing::info!(sweep = %name, cutoff = %cutoff, rows_deleted, batches, "Sweep finished");
        Ok(SweepReport {
            name: name.to_string(),
            cutoff,
            rows_deleted,
            batches,
        })
    }
}

/// Deletes rows of a [`RetentionTarget`] older than a TTL.
#[derive(Debug, Clone)]
pub struct RetentionSweep {
    name: String,
    target: RetentionTarget,
    store: Arc<dyn RetentionStore>,
    window: Window,
}

impl RetentionSweep {
    /// Create a sweep over `target`
    pub fn new(
        name: impl Into<String>,
        target: RetentionTarget,
        store: Arc<dyn RetentionStore>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        batch_size: i64,
    ) -> AppResult<Self> {
        Ok(Self {
            name: name.into(),
            target,
            store,
            window: Window::new(clock, ttl, batch_size)?,
        })
    }

    /// One-time passcodes older than their expiry
    pub fn expired_passcodes(
        store: Arc<dyn RetentionStore>,
        clock: Arc<dyn Clock>,
        config: &SweepConfig,
    ) -> AppResult<Self> {
        Ok(Self {
            name: "expired_passcodes".to_string(),
            target: RetentionTarget::OneTimePasscodes,
            store,
            window: Window::from_config(clock, config)?,
        })
    }

    /// Session tokens older than their lifetime
    pub fn stale_session_tokens(
        store: Arc<dyn RetentionStore>,
        clock: Arc<dyn Clock>,
        config: &SweepConfig,
    ) -> AppResult<Self> {
        Ok(Self {
            name: "stale_session_tokens".to_string(),
            target: RetentionTarget::SessionTokens,
            store,
            window: Window::from_config(clock, config)?,
        })
    }

    /// Delete every row created strictly before `now - ttl`
    pub async fn sweep(&self) -> AppResult<SweepReport> {
        let target = self.target;
        self.window
            .run(&self.name, move |cutoff, limit| {
                self.store.delete_batch_before(target, cutoff, limit)
            })
            .await
    }
}

#[async_trait]
impl MaintenanceTask for RetentionSweep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> AppResult<()> {
        self.sweep().await.map(drop)
    }
}

/// Deletes finished jobs older than a TTL, through the job queue.
#[derive(Debug, Clone)]
pub struct JobHistorySweep {
    queue: JobQueue,
    window: Window,
}

impl JobHistorySweep {
    /// Create the sweep from its configuration
    pub fn new(queue: JobQueue, config: &SweepConfig) -> AppResult<Self> {
        let window = Window::from_config(Arc::clone(queue.clock()), config)?;
        Ok(Self { queue, window })
    }

    /// Delete terminal jobs finalized before `now - ttl`
    pub async fn sweep(&self) -> AppResult<SweepReport> {
        self.window
            .run("job_history", move |cutoff, limit| {
                self.queue.purge_finished(cutoff, limit)
            })
            .await
    }
}

#[async_trait]
impl MaintenanceTask for JobHistorySweep {
    fn name(&self) -> &str {
        "job_history"
    }

    async fn run(&self) -> AppResult<()> {
        self.sweep().await.map(drop)
    }
}
