//! Queue engine: one dispatcher per queue feeding a bounded worker pool.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, Semaphore};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing;
use uuid::Uuid;

use taskhub_core::config::WorkerConfig;
use taskhub_core::error::AppError;
use taskhub_entity::job::Job;

use crate::queue::JobQueue;
use crate::registry::{JobContext, JobExecutionError, WorkerRegistry};

/// Outcome of draining the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    /// In-flight jobs that finished within the grace period
    pub completed_in_grace: usize,
    /// In-flight jobs still running when the grace period ran out
    pub interrupted: usize,
}

/// Everything a dispatcher and its job tasks share
#[derive(Debug, Clone)]
struct Shared {
    queue: JobQueue,
    registry: Arc<WorkerRegistry>,
    worker_id: String,
    poll_interval: Duration,
    heartbeat_interval: Duration,
    stale_check_interval: Duration,
    /// Fired when the engine starts stopping
    cancel: CancellationToken,
    /// Fired when the grace period runs out
    abandon: CancellationToken,
    jobs: TaskTracker,
}

/// Multi-queue job engine.
///
/// `start` spawns one dispatcher per configured queue. Each dispatcher holds
/// a semaphore sized to the queue's `max_workers`, so a queue never has more
/// jobs in flight than its ceiling, and queues never wait on each other.
#[derive(Debug)]
pub struct QueueEngine {
    shared: Shared,
    config: WorkerConfig,
    dispatchers: TaskTracker,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl QueueEngine {
    /// Create an engine. Handlers must all be registered before this call.
    pub fn new(queue: JobQueue, registry: WorkerRegistry, config: WorkerConfig) -> Self {
        let worker_id = format!("worker-{}", &Uuid::new_v4().simple().to_string()[..8]);

        Self {
            shared: Shared {
                queue,
                registry: Arc::new(registry),
                worker_id,
                poll_interval: config.poll_interval(),
                heartbeat_interval: config.heartbeat_interval().max(Duration::from_millis(100)),
                stale_check_interval: config.stale_check_interval(),
                cancel: CancellationToken::new(),
                abandon: CancellationToken::new(),
                jobs: TaskTracker::new(),
            },
            config,
            dispatchers: TaskTracker::new(),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Identifier recorded on every job this engine claims
    pub fn worker_id(&self) -> &str {
        &self.shared.worker_id
    }

    /// The job queue this engine dispatches from
    pub fn queue(&self) -> &JobQueue {
        &self.shared.queue
    }

    /// Recover abandoned jobs, check every pending kind has a handler, then
    /// start dispatching.
    pub async fn start(&self) -> Result<(), AppError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(AppError::conflict("Job queue engine already started"));
        }

        self.shared
            .queue
            .accept_only(self.shared.registry.registered_kinds())
            .await;

        let stale_after = match self.preflight().await {
            Ok(stale_after) => stale_after,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        for (name, max_workers) in self.shared.queue.queues() {
            if *max_workers == 0 {
                tracing::warn!(
                    queue = %name,
                    "Queue has no workers; its jobs will accumulate undispatched"
                );
                continue;
            }

            let Some(waker) = self.shared.queue.waker(name) else {
                continue;
            };
            let dispatcher = Dispatcher {
                shared: self.shared.clone(),
                name: name.clone(),
                slots: Arc::new(Semaphore::new(*max_workers)),
                waker,
            };
            self.dispatchers.spawn(dispatcher.run());
        }
        self.dispatchers
            .spawn(self.shared.clone().watch_stale(stale_after));
        self.dispatchers.close();

        tracing::info!(
            worker_id = %self.shared.worker_id,
            queues = ?self.shared.queue.queues(),
            kinds = ?self.shared.registry.registered_kinds(),
            "Job queue engine started"
        );
        Ok(())
    }

    async fn preflight(&self) -> Result<chrono::Duration, AppError> {
        let stale_after =
            chrono::Duration::from_std(Duration::from_secs(self.config.stale_after_seconds))
                .map_err(|_| AppError::configuration("worker.stale_after_seconds is out of range"))?;
        self.shared.queue.recover_stale(stale_after).await?;

        let pending = self.shared.queue.pending_kinds().await?;
        self.shared.registry.ensure_registered(&pending)?;
        Ok(stale_after)
    }

    /// Stop claiming jobs and wait up to `grace` for in-flight ones.
    ///
    /// Jobs still running after `grace` are abandoned in the `running` state
    /// with an expired heartbeat, so the next stale check requeues them.
    pub async fn stop(&self, grace: Duration) -> DrainReport {
        if !self.started.load(Ordering::SeqCst) || self.stopped.swap(true, Ordering::SeqCst) {
            return DrainReport::default();
        }

        self.shared.cancel.cancel();
        self.dispatchers.wait().await;

        let jobs = &self.shared.jobs;
        jobs.close();
        let in_flight = jobs.len();
        tracing::info!(in_flight, grace = ?grace, "Draining job queue engine");

        let interrupted = match time::timeout(grace, jobs.wait()).await {
            Ok(()) => 0,
            Err(_) => {
                let interrupted = jobs.len();
                tracing::warn!(
                    interrupted,
                    "Grace period elapsed; leaving remaining jobs running for recovery"
                );
                self.shared.abandon.cancel();
                jobs.wait().await;
                interrupted
            }
        };

        let report = DrainReport {
            completed_in_grace: in_flight.saturating_sub(interrupted),
            interrupted,
        };
        tracing::info!(
            completed_in_grace = report.completed_in_grace,
            interrupted = report.interrupted,
            "Job queue engine stopped"
        );
        report
    }
}

/// Claims jobs of one queue while it has free slots
struct Dispatcher {
    shared: Shared,
    name: String,
    slots: Arc<Semaphore>,
    waker: Arc<Notify>,
}

impl Dispatcher {
    async fn run(self) {
        tracing::debug!(queue = %self.name, slots = self.slots.available_permits(), "Dispatcher started");
        let cancel = self.shared.cancel.clone();

        loop {
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = self.slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match self.shared.queue.claim(&self.name, &self.shared.worker_id).await {
                Ok(Some(job)) => {
                    let shared = self.shared.clone();
                    self.shared.jobs.spawn(async move {
                        let _permit = permit;
                        shared.run_job(job).await;
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.waker.notified() => {}
                        _ = time::sleep(self.shared.poll_interval) => {}
                    }
                }
                Err(e) => {
                    drop(permit);
                    tracing::error!(queue = %self.name, error = %e, "Failed to claim job");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = time::sleep(self.shared.poll_interval) => {}
                    }
                }
            }
        }

        tracing::debug!(queue = %self.name, "Dispatcher stopped");
    }
}

impl Shared {
    /// Execute one claimed job and record its outcome
    async fn run_job(&self, job: Job) {
        if self.cancel.is_cancelled() {
            self.log_err(&job, self.queue.release(&job).await);
            return;
        }

        let Some(handler) = self.registry.get(&job.kind) else {
            let reason = format!("No handler registered for job kind '{}'", job.kind);
            self.log_err(&job, self.queue.fail_permanently(&job, &reason).await);
            return;
        };

        tracing::info!(
            job_id = %job.id,
            queue = %job.queue,
            kind = %job.kind,
            attempt = job.attempts + 1,
            max_attempts = job.max_attempts,
            "Processing job"
        );

        // The handler runs in its own task so a panic surfaces as a JoinError.
        let ctx = JobContext::new(job.clone(), self.cancel.clone());
        let mut execution = tokio::spawn(async move { handler.execute(&ctx).await });

        let mut heartbeat = time::interval(self.heartbeat_interval);
        heartbeat.tick().await;

        let outcome = loop {
            tokio::select! {
                result = &mut execution => break result,
                _ = heartbeat.tick() => {
                    if let Err(e) = self.queue.heartbeat(job.id).await {
                        tracing::warn!(job_id = %job.id, error = %e, "Failed to record heartbeat");
                    }
                }
                _ = self.abandon.cancelled() => {
                    execution.abort();
                    self.log_err(&job, self.queue.abandon(&job, &self.worker_id).await);
                    return;
                }
            }
        };

        let recorded = match outcome {
            Ok(Ok(())) => self.queue.complete(&job).await,
            Ok(Err(JobExecutionError::Transient(msg))) => self.queue.fail(&job, &msg).await.map(drop),
            Ok(Err(JobExecutionError::Internal(err))) => {
                self.queue.fail(&job, &err.to_string()).await.map(drop)
            }
            Ok(Err(JobExecutionError::Permanent(msg))) => {
                self.queue.fail_permanently(&job, &msg).await
            }
            Ok(Err(JobExecutionError::Cancelled)) if self.cancel.is_cancelled() => {
                self.queue.release(&job).await
            }
            Ok(Err(JobExecutionError::Cancelled)) => {
                self.queue
                    .fail(&job, "Handler reported cancellation while the engine was running")
                    .await
                    .map(drop)
            }
            Err(join_err) => {
                let reason = if join_err.is_panic() {
                    format!("Handler panicked: {}", panic_message(join_err.into_panic()))
                } else {
                    "Handler task was aborted".to_string()
                };
                tracing::error!(job_id = %job.id, kind = %job.kind, reason = %reason, "Job handler crashed");
                self.queue.fail(&job, &reason).await.map(drop)
            }
        };

        self.log_err(&job, recorded);
    }

    /// Requeue jobs whose owner stopped heartbeating, until the engine stops
    async fn watch_stale(self, stale_after: chrono::Duration) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = time::sleep(self.stale_check_interval) => {}
            }
            if let Err(e) = self.queue.recover_stale(stale_after).await {
                tracing::warn!(error = %e, "Failed to check for stale jobs");
            }
        }
    }

    fn log_err(&self, job: &Job, result: Result<(), AppError>) {
        if let Err(e) = result {
            tracing::error!(job_id = %job.id, error = %e, "Failed to record job outcome");
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
