//! Job queue: the only component that mutates job rows.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, RwLock};
use tracing;
use uuid::Uuid;

use taskhub_core::clock::Clock;
use taskhub_core::config::WorkerConfig;
use taskhub_core::error::AppError;
use taskhub_database::store::{FailureTransition, JobStore};
use taskhub_entity::job::{EnqueueOptions, Job, JobState, NewJob};

use crate::retry::RetryPolicy;

/// Per-queue job counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Queue name
    pub queue: String,
    /// Configured concurrency ceiling
    pub max_workers: usize,
    /// Jobs waiting to be claimed (including ones scheduled in the future)
    pub available: i64,
    /// Jobs currently held by a worker
    pub running: i64,
    /// Jobs that finished successfully
    pub completed: i64,
    /// Jobs that failed permanently
    pub errored: i64,
    /// Jobs that exhausted their attempts
    pub discarded: i64,
}

/// Job queue for enqueuing work and recording the outcome of attempts
#[derive(Debug, Clone)]
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    default_max_attempts: i32,
    /// Configured queues and their concurrency ceilings
    queues: BTreeMap<String, usize>,
    /// Wakes a queue's dispatcher when work is enqueued
    wakers: Arc<HashMap<String, Arc<Notify>>>,
    /// Kinds with a handler in the running engine; `None` until one starts
    accepted_kinds: Arc<RwLock<Option<BTreeSet<String>>>>,
}

impl JobQueue {
    /// Create a job queue serving the queues named in `config`
    pub fn new(store: Arc<dyn JobStore>, clock: Arc<dyn Clock>, config: &WorkerConfig) -> Self {
        let queues: BTreeMap<String, usize> = config
            .queues
            .iter()
            .map(|(name, queue)| (name.clone(), queue.max_workers))
            .collect();
        let wakers = queues
            .keys()
            .map(|name| (name.clone(), Arc::new(Notify::new())))
            .collect();

        Self {
            store,
            clock,
            retry: RetryPolicy::from_config(&config.retry),
            default_max_attempts: config.default_max_attempts,
            queues,
            wakers: Arc::new(wakers),
            accepted_kinds: Arc::new(RwLock::new(None)),
        }
    }

    /// Refuse to enqueue any kind outside `kinds` from now on.
    ///
    /// A job no handler can run would block every later engine start.
    pub async fn accept_only(&self, kinds: impl IntoIterator<Item = String>) {
        *self.accepted_kinds.write().await = Some(kinds.into_iter().collect());
    }

    /// The clock every job timestamp is read from
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Configured queues with their concurrency ceilings
    pub fn queues(&self) -> &BTreeMap<String, usize> {
        &self.queues
    }

    /// Enqueue a new job and return its ID.
    ///
    /// Safe to call concurrently. The job is `available` as soon as this
    /// returns and its queue's dispatcher is woken.
    pub async fn enqueue(
        &self,
        queue: &str,
        kind: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<Uuid, AppError> {
        if !self.queues.contains_key(queue) {
            return Err(AppError::validation(format!("Unknown queue '{queue}'")));
        }
        if kind.trim().is_empty() {
            return Err(AppError::validation("Job kind must not be empty"));
        }
        if let Some(accepted) = self.accepted_kinds.read().await.as_ref() {
            if !accepted.contains(kind) {
                return Err(AppError::validation(format!(
                    "No handler registered for job kind '{kind}'"
                )));
            }
        }
        let max_attempts = options.max_attempts.unwrap_or(self.default_max_attempts);
        if max_attempts < 1 {
            return Err(AppError::validation("max_attempts must be at least 1"));
        }

        let now = self.clock.now();
        let new_job = NewJob {
            queue: queue.to_string(),
            kind: kind.to_string(),
            payload,
            max_attempts,
            scheduled_at: options.scheduled_at.unwrap_or(now),
        };

        let job = self.store.insert(&new_job, now).await?;

        tracing::debug!(
            job_id = %job.id,
            queue = %job.queue,
            kind = %job.kind,
            scheduled_at = %job.scheduled_at,
            "Enqueued job"
        );

        if let Some(waker) = self.wakers.get(queue) {
            waker.notify_one();
        }

        Ok(job.id)
    }

    /// Look up a job
    pub async fn find(&self, id: Uuid) -> Result<Option<Job>, AppError> {
        self.store.find_by_id(id).await
    }

    /// Notifier woken whenever a job is enqueued into `queue`
    pub(crate) fn waker(&self, queue: &str) -> Option<Arc<Notify>> {
        self.wakers.get(queue).cloned()
    }

    /// Claim the next due job of a queue for `worker_id`
    pub async fn claim(&self, queue: &str, worker_id: &str) -> Result<Option<Job>, AppError> {
        let job = self.store.claim_next(queue, worker_id, self.clock.now()).await?;
        if let Some(job) = &job {
            tracing::debug!(
                job_id = %job.id,
                queue = %job.queue,
                kind = %job.kind,
                attempt = job.attempts + 1,
                worker_id = %worker_id,
                "Claimed job"
            );
        }
        Ok(job)
    }

    /// Refresh the heartbeat of a running job
    pub async fn heartbeat(&self, id: Uuid) -> Result<bool, AppError> {
        self.store.heartbeat(id, self.clock.now()).await
    }

    /// Give up on a job this worker can no longer finish.
    ///
    /// The row stays `running` but is recovered by the next stale check.
    pub async fn abandon(&self, job: &Job, worker_id: &str) -> Result<(), AppError> {
        if self.store.expire_heartbeat(job.id, worker_id).await? {
            tracing::warn!(
                job_id = %job.id,
                queue = %job.queue,
                kind = %job.kind,
                worker_id = %worker_id,
                "Abandoned job after grace period; it stays running until recovered"
            );
        }
        Ok(())
    }

    /// Mark a running job as completed
    pub async fn complete(&self, job: &Job) -> Result<(), AppError> {
        if self.store.complete(job.id, self.clock.now()).await? {
            tracing::info!(
                job_id = %job.id,
                queue = %job.queue,
                kind = %job.kind,
                state = %JobState::Completed,
                attempt = job.attempts + 1,
                "Job completed"
            );
        } else {
            tracing::warn!(job_id = %job.id, "Job was no longer running when it completed");
        }
        Ok(())
    }

    /// Record a retryable failure: back off, or discard when attempts run out
    pub async fn fail(&self, job: &Job, error: &str) -> Result<JobState, AppError> {
        let now = self.clock.now();
        let attempt = job.attempts + 1;

        let (transition, state) = if attempt >= job.max_attempts {
            (FailureTransition::Discard, JobState::Discarded)
        } else {
            let at = self.retry.next_run_at(now, attempt);
            (FailureTransition::Retry { at }, JobState::Available)
        };

        if !self.store.record_failure(job.id, error, transition, now).await? {
            tracing::warn!(job_id = %job.id, "Job was no longer running when it failed");
            return Ok(state);
        }

        match transition {
            FailureTransition::Retry { at } => tracing::warn!(
                job_id = %job.id,
                queue = %job.queue,
                kind = %job.kind,
                attempt,
                max_attempts = job.max_attempts,
                retry_at = %at,
                error = %error,
                "Job failed, retry scheduled"
            ),
            _ => tracing::warn!(
                job_id = %job.id,
                queue = %job.queue,
                kind = %job.kind,
                state = %JobState::Discarded,
                attempts = attempt,
                error = %error,
                "Job discarded after exhausting its attempts"
            ),
        }
        Ok(state)
    }

    /// Record a permanent failure: the job is never retried
    pub async fn fail_permanently(&self, job: &Job, error: &str) -> Result<(), AppError> {
        let recorded = self
            .store
            .record_failure(job.id, error, FailureTransition::Error, self.clock.now())
            .await?;

        if recorded {
            tracing::warn!(
                job_id = %job.id,
                queue = %job.queue,
                kind = %job.kind,
                state = %JobState::Errored,
                attempts = job.attempts + 1,
                error = %error,
                "Job failed permanently"
            );
        }
        Ok(())
    }

    /// Hand a running job back without consuming an attempt
    pub async fn release(&self, job: &Job) -> Result<(), AppError> {
        if self.store.release(job.id, self.clock.now()).await? {
            tracing::info!(job_id = %job.id, queue = %job.queue, "Released job back to its queue");
        }
        Ok(())
    }

    /// Requeue running jobs whose heartbeat is older than `stale_after`
    pub async fn recover_stale(&self, stale_after: chrono::Duration) -> Result<u64, AppError> {
        let now = self.clock.now();
        let stale_before = now
            .checked_sub_signed(stale_after)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let recovered = self.store.recover_stale(stale_before, now).await?;
        if recovered > 0 {
            tracing::warn!(recovered, "Requeued jobs abandoned by a previous worker");
            for waker in self.wakers.values() {
                waker.notify_one();
            }
        }
        Ok(recovered)
    }

    /// Kinds of jobs that can still be dispatched
    pub async fn pending_kinds(&self) -> Result<Vec<String>, AppError> {
        self.store.pending_kinds().await
    }

    /// Per-queue job counts, including configured queues with no jobs
    pub async fn stats(&self) -> Result<Vec<QueueStats>, AppError> {
        let mut stats: BTreeMap<String, QueueStats> = self
            .queues
            .iter()
            .map(|(name, max_workers)| {
                let entry = QueueStats {
                    queue: name.clone(),
                    max_workers: *max_workers,
                    ..QueueStats::default()
                };
                (name.clone(), entry)
            })
            .collect();

        for row in self.store.count_by_queue_and_state().await? {
            let entry = stats.entry(row.queue.clone()).or_insert_with(|| QueueStats {
                queue: row.queue.clone(),
                ..QueueStats::default()
            });
            match row.state {
                JobState::Available => entry.available += row.count,
                JobState::Running => entry.running += row.count,
                JobState::Completed => entry.completed += row.count,
                JobState::Errored => entry.errored += row.count,
                JobState::Discarded => entry.discarded += row.count,
            }
        }

        Ok(stats.into_values().collect())
    }

    /// Delete up to `limit` terminal jobs finalized before `before`
    pub async fn purge_finished(&self, before: DateTime<Utc>, limit: i64) -> Result<u64, AppError> {
        self.store.purge_finished(before, limit).await
    }
}
