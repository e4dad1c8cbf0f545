//! Integration tests for the cron scheduler.

mod helpers;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Barrier, Notify};

use taskhub_core::error::ErrorKind;
use taskhub_core::result::AppResult;
use taskhub_worker::scheduler::{CronScheduler, FireOutcome, MaintenanceTask, ScheduledTask};

/// Blocks until released, counting runs
#[derive(Debug, Default)]
struct Gated {
    started: Notify,
    release: Notify,
    runs: AtomicUsize,
}

#[async_trait]
impl MaintenanceTask for Gated {
    fn name(&self) -> &str {
        "gated"
    }

    async fn run(&self) -> AppResult<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        self.release.notified().await;
        Ok(())
    }
}

/// Waits at a barrier shared with another task
#[derive(Debug)]
struct Rendezvous {
    name: &'static str,
    barrier: Arc<Barrier>,
}

#[async_trait]
impl MaintenanceTask for Rendezvous {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self) -> AppResult<()> {
        self.barrier.wait().await;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Counting {
    runs: AtomicUsize,
}

#[async_trait]
impl MaintenanceTask for Counting {
    fn name(&self) -> &str {
        "counting"
    }

    async fn run(&self) -> AppResult<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_overlapping_firing_is_skipped() {
    let gated = Arc::new(Gated::default());
    let task = Arc::new(ScheduledTask::new("0 * * * * *", gated.clone()));

    let first = tokio::spawn({
        let task = Arc::clone(&task);
        async move { task.fire().await }
    });
    gated.started.notified().await;
    assert!(task.is_running());

    assert_eq!(task.fire().await, FireOutcome::Skipped);
    assert_eq!(gated.runs.load(Ordering::SeqCst), 1);

    gated.release.notify_one();
    assert_eq!(first.await.unwrap(), FireOutcome::Completed);
    assert!(!task.is_running());

    let stats = task.stats();
    assert_eq!((stats.completed, stats.failed, stats.skipped), (1, 0, 1));
}

#[tokio::test]
async fn test_coincident_tasks_run_concurrently() {
    let barrier = Arc::new(Barrier::new(2));
    let passcodes = ScheduledTask::new(
        "0 */5 * * * *",
        Arc::new(Rendezvous {
            name: "expired_passcodes",
            barrier: Arc::clone(&barrier),
        }),
    );
    let sessions = ScheduledTask::new(
        "0 */5 * * * *",
        Arc::new(Rendezvous {
            name: "stale_session_tokens",
            barrier,
        }),
    );

    let both = tokio::time::timeout(Duration::from_secs(2), async {
        tokio::join!(passcodes.fire(), sessions.fire())
    })
    .await
    .expect("tasks sharing a firing time waited on each other");

    assert_eq!(both, (FireOutcome::Completed, FireOutcome::Completed));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_scheduler_fires_registered_task() {
    let scheduler = CronScheduler::new().await.unwrap();
    let counting = Arc::new(Counting::default());
    let scheduled = scheduler
        .schedule("* * * * * *", counting.clone())
        .await
        .unwrap();
    assert_eq!(scheduled.name(), "counting");
    assert_eq!(scheduler.tasks().len(), 1);

    scheduler.start().await.unwrap();
    let runs = &counting.runs;
    helpers::eventually("the task to fire", || async move { runs.load(Ordering::SeqCst) > 0 })
        .await;
    scheduler.stop(Duration::from_secs(1)).await.unwrap();

    assert!(scheduled.stats().completed >= 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_schedule_rejects_invalid_expression() {
    let scheduler = CronScheduler::new().await.unwrap();
    let err = scheduler
        .schedule("every five minutes", Arc::new(Counting::default()))
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Configuration);
    assert!(scheduler.tasks().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_waits_for_running_callback_and_halts_firings() {
    let scheduler = Arc::new(CronScheduler::new().await.unwrap());
    let gated = Arc::new(Gated::default());
    let scheduled = scheduler
        .schedule("* * * * * *", gated.clone())
        .await
        .unwrap();

    scheduler.start().await.unwrap();
    gated.started.notified().await;
    assert!(scheduled.is_running());

    let stopping = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        async move { scheduler.stop(Duration::from_secs(5)).await }
    });

    // Blocked callback keeps stop waiting; it is not interrupted.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!stopping.is_finished());
    assert!(scheduled.is_running());

    gated.release.notify_one();
    stopping.await.unwrap().unwrap();

    assert!(!scheduled.is_running());
    let stats = scheduled.stats();
    assert_eq!((stats.completed, stats.failed), (1, 0));
    assert_eq!(gated.runs.load(Ordering::SeqCst), 1);

    let fired = stats.completed + stats.failed + stats.skipped;
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let after = scheduled.stats();
    assert_eq!(after.completed + after.failed + after.skipped, fired);
    assert_eq!(gated.runs.load(Ordering::SeqCst), 1);
}
