//! Storage traits for jobs and time-windowed tables.
//!
//! The job engine and the maintenance sweeps are written against these
//! traits. [`crate::repositories`] provides the PostgreSQL implementations
//! and [`memory`] the in-process ones.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use taskhub_core::result::AppResult;
use taskhub_entity::job::{Job, JobState, NewJob};
use taskhub_entity::retention::RetentionTarget;

pub use memory::{MemoryJobStore, MemoryRetentionStore};

/// Where a failed attempt sends the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureTransition {
    /// Back to `available`, claimable from `at`.
    Retry {
        /// Next claim time.
        at: DateTime<Utc>,
    },
    /// Terminal `discarded`: attempts exhausted.
    Discard,
    /// Terminal `errored`: the handler declared the failure permanent.
    Error,
}

/// Number of jobs of one queue in one state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct QueueStateCount {
    /// Queue name.
    pub queue: String,
    /// Job state.
    pub state: JobState,
    /// Jobs in that state.
    pub count: i64,
}

/// Persistent job storage.
///
/// Every transition out of `running` is guarded on the row still being
/// `running`, and returns whether the row actually moved. Claims are atomic:
/// concurrent `claim_next` calls never return the same job.
#[async_trait]
pub trait JobStore: Send + Sync + std::fmt::Debug {
    /// Persist a new `available` job.
    async fn insert(&self, job: &NewJob, now: DateTime<Utc>) -> AppResult<Job>;

    /// Find a job by ID.
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Job>>;

    /// Atomically move the earliest due job of `queue` to `running`.
    ///
    /// Due means `scheduled_at <= now`; ties are broken by creation order.
    async fn claim_next(
        &self,
        queue: &str,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Job>>;

    /// Refresh the liveness timestamp of a running job.
    async fn heartbeat(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<bool>;

    /// Backdate the heartbeat of a job this worker gave up on, so the next
    /// stale recovery requeues it. Only touches the row while `worker_id`
    /// still owns it and it is `running`.
    async fn expire_heartbeat(&self, id: Uuid, worker_id: &str) -> AppResult<bool>;

    /// `running → completed`.
    async fn complete(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<bool>;

    /// Record a failed attempt: increments `attempts` and applies `transition`.
    async fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        transition: FailureTransition,
        now: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// `running → available` without consuming an attempt.
    async fn release(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<bool>;

    /// Requeue running jobs last seen before `stale_before`.
    ///
    /// Last seen is the heartbeat, else the claim time, else creation.
    async fn recover_stale(&self, stale_before: DateTime<Utc>, now: DateTime<Utc>) -> AppResult<u64>;

    /// Distinct kinds of jobs that may still be dispatched.
    async fn pending_kinds(&self) -> AppResult<Vec<String>>;

    /// Job counts grouped by queue and state.
    async fn count_by_queue_and_state(&self) -> AppResult<Vec<QueueStateCount>>;

    /// Delete up to `limit` terminal jobs finalized before `before`.
    async fn purge_finished(&self, before: DateTime<Utc>, limit: i64) -> AppResult<u64>;
}

/// Storage for tables swept by TTL.
#[async_trait]
pub trait RetentionStore: Send + Sync + std::fmt::Debug {
    /// Delete up to `limit` rows of `target` created strictly before `cutoff`.
    async fn delete_batch_before(
        &self,
        target: RetentionTarget,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<u64>;
}
