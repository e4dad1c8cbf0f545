//! In-memory stores using a Tokio mutex for single-node deployments and tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use taskhub_core::result::AppResult;
use taskhub_entity::job::{Job, JobState, NewJob};
use taskhub_entity::retention::RetentionTarget;

use super::{FailureTransition, JobStore, QueueStateCount, RetentionStore};

#[derive(Debug, Default)]
struct JobTable {
    jobs: HashMap<Uuid, Job>,
    next_seq: i64,
}

impl JobTable {
    fn running_mut(&mut self, id: Uuid) -> Option<&mut Job> {
        self.jobs
            .get_mut(&id)
            .filter(|job| job.state == JobState::Running)
    }
}

/// Job store held in process memory.
///
/// One mutex guards the whole table, which makes every claim and
/// transition atomic.
#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    table: Arc<Mutex<JobTable>>,
}

impl MemoryJobStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored job, in creation order.
    pub async fn all(&self) -> Vec<Job> {
        let table = self.table.lock().await;
        let mut jobs: Vec<Job> = table.jobs.values().cloned().collect();
        jobs.sort_by_key(|job| job.seq);
        jobs
    }

    /// Number of jobs of `queue` currently `running`.
    pub async fn running_in(&self, queue: &str) -> usize {
        let table = self.table.lock().await;
        table
            .jobs
            .values()
            .filter(|job| job.queue == queue && job.state == JobState::Running)
            .count()
    }

    /// Overwrite a stored job, for seeding rows a previous process left behind.
    pub async fn put(&self, job: Job) {
        let mut table = self.table.lock().await;
        table.next_seq = table.next_seq.max(job.seq + 1);
        table.jobs.insert(job.id, job);
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, new: &NewJob, now: DateTime<Utc>) -> AppResult<Job> {
        let mut table = self.table.lock().await;
        table.next_seq += 1;

        let job = Job {
            id: Uuid::now_v7(),
            seq: table.next_seq,
            queue: new.queue.clone(),
            kind: new.kind.clone(),
            payload: new.payload.clone(),
            state: JobState::Available,
            attempts: 0,
            max_attempts: new.max_attempts,
            scheduled_at: new.scheduled_at,
            created_at: now,
            attempted_at: None,
            heartbeat_at: None,
            finalized_at: None,
            worker_id: None,
            last_error: None,
        };

        table.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Job>> {
        Ok(self.table.lock().await.jobs.get(&id).cloned())
    }

    async fn claim_next(
        &self,
        queue: &str,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Job>> {
        let mut table = self.table.lock().await;

        let next = table
            .jobs
            .values()
            .filter(|job| {
                job.queue == queue && job.state == JobState::Available && job.scheduled_at <= now
            })
            .min_by_key(|job| (job.scheduled_at, job.seq))
            .map(|job| job.id);

        let Some(id) = next else {
            return Ok(None);
        };

        let Some(job) = table.jobs.get_mut(&id) else {
            return Ok(None);
        };
        job.state = JobState::Running;
        job.attempted_at = Some(now);
        job.heartbeat_at = Some(now);
        job.worker_id = Some(worker_id.to_string());
        Ok(Some(job.clone()))
    }

    async fn heartbeat(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<bool> {
        let mut table = self.table.lock().await;
        Ok(match table.running_mut(id) {
            Some(job) => {
                job.heartbeat_at = Some(now);
                true
            }
            None => false,
        })
    }

    async fn expire_heartbeat(&self, id: Uuid, worker_id: &str) -> AppResult<bool> {
        let mut table = self.table.lock().await;
        Ok(match table.running_mut(id) {
            Some(job) if job.worker_id.as_deref() == Some(worker_id) => {
                job.heartbeat_at = Some(DateTime::<Utc>::UNIX_EPOCH);
                true
            }
            _ => false,
        })
    }

    async fn complete(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<bool> {
        let mut table = self.table.lock().await;
        Ok(match table.running_mut(id) {
            Some(job) => {
                job.state = JobState::Completed;
                job.finalized_at = Some(now);
                true
            }
            None => false,
        })
    }

    async fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        transition: FailureTransition,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut table = self.table.lock().await;
        let Some(job) = table.running_mut(id) else {
            return Ok(false);
        };

        job.attempts += 1;
        job.last_error = Some(error.to_string());
        match transition {
            FailureTransition::Retry { at } => {
                job.state = JobState::Available;
                job.scheduled_at = at;
            }
            FailureTransition::Discard => {
                job.state = JobState::Discarded;
                job.finalized_at = Some(now);
            }
            FailureTransition::Error => {
                job.state = JobState::Errored;
                job.finalized_at = Some(now);
            }
        }
        Ok(true)
    }

    async fn release(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<bool> {
        let mut table = self.table.lock().await;
        Ok(match table.running_mut(id) {
            Some(job) => {
                job.state = JobState::Available;
                job.scheduled_at = now;
                true
            }
            None => false,
        })
    }

    async fn recover_stale(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<u64> {
        let mut table = self.table.lock().await;
        let mut recovered = 0;
        for job in table.jobs.values_mut() {
            let last_seen = job
                .heartbeat_at
                .or(job.attempted_at)
                .unwrap_or(job.created_at);
            if job.state == JobState::Running && last_seen < stale_before {
                job.state = JobState::Available;
                job.scheduled_at = now;
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn pending_kinds(&self) -> AppResult<Vec<String>> {
        let table = self.table.lock().await;
        let kinds: BTreeSet<String> = table
            .jobs
            .values()
            .filter(|job| !job.state.is_terminal())
            .map(|job| job.kind.clone())
            .collect();
        Ok(kinds.into_iter().collect())
    }

    async fn count_by_queue_and_state(&self) -> AppResult<Vec<QueueStateCount>> {
        let table = self.table.lock().await;
        let mut counts: BTreeMap<(String, &'static str), (JobState, i64)> = BTreeMap::new();
        for job in table.jobs.values() {
            counts
                .entry((job.queue.clone(), job.state.as_str()))
                .or_insert((job.state, 0))
                .1 += 1;
        }
        Ok(counts
            .into_iter()
            .map(|((queue, _), (state, count))| QueueStateCount {
                queue,
                state,
                count,
            })
            .collect())
    }

    async fn purge_finished(&self, before: DateTime<Utc>, limit: i64) -> AppResult<u64> {
        let mut table = self.table.lock().await;
        let doomed: Vec<Uuid> = table
            .jobs
            .values()
            .filter(|job| {
                job.state.is_terminal() && job.finalized_at.is_some_and(|at| at < before)
            })
            .map(|job| job.id)
            .take(usize::try_from(limit).unwrap_or(0))
            .collect();

        for id in &doomed {
            table.jobs.remove(id);
        }
        Ok(doomed.len() as u64)
    }
}

/// Retention rows held in process memory, keyed by target.
#[derive(Debug, Clone, Default)]
pub struct MemoryRetentionStore {
    rows: Arc<Mutex<HashMap<RetentionTarget, Vec<DateTime<Utc>>>>>,
}

impl MemoryRetentionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a row created at `created_at`.
    pub async fn insert(&self, target: RetentionTarget, created_at: DateTime<Utc>) {
        self.rows
            .lock()
            .await
            .entry(target)
            .or_default()
            .push(created_at);
    }

    /// Creation times of the rows still present for `target`.
    pub async fn remaining(&self, target: RetentionTarget) -> Vec<DateTime<Utc>> {
        let rows = self.rows.lock().await;
        let mut remaining = rows.get(&target).cloned().unwrap_or_default();
        remaining.sort();
        remaining
    }
}

#[async_trait]
impl RetentionStore for MemoryRetentionStore {
    async fn delete_batch_before(
        &self,
        target: RetentionTarget,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<u64> {
        let mut rows = self.rows.lock().await;
        let Some(table) = rows.get_mut(&target) else {
            return Ok(0);
        };

        let mut budget = usize::try_from(limit).unwrap_or(0);
        let before = table.len();
        table.retain(|created_at| {
            if budget > 0 && *created_at < cutoff {
                budget -= 1;
                false
            } else {
                true
            }
        });
        Ok((before - table.len()) as u64)
    }
}
