//! Integration tests for the job queue engine.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use taskhub_core::clock::Clock;
use taskhub_core::error::ErrorKind;
use taskhub_entity::job::{EnqueueOptions, JobState};
use taskhub_worker::registry::WorkerRegistry;

use helpers::{Behavior, TestHandler, TestQueue};

#[tokio::test]
async fn test_queue_never_exceeds_max_workers() {
    let tq = TestQueue::new(helpers::worker_config(&[("default", 2), ("email", 3)]));
    let slow = TestHandler::new("report.build", Behavior::Sleep(Duration::from_millis(100)));
    let mail = TestHandler::new("email.send", Behavior::Sleep(Duration::from_millis(100)));
    let (slow_tally, mail_tally) = (slow.tally.clone(), mail.tally.clone());

    let mut ids = Vec::new();
    for _ in 0..6 {
        ids.push(tq.enqueue("default", "report.build").await);
        ids.push(tq.enqueue("email", "email.send").await);
    }

    let engine = tq.engine(helpers::registry(vec![slow, mail]));
    engine.start().await.unwrap();
    for id in &ids {
        tq.wait_for_state(*id, JobState::Completed).await;
    }
    engine.stop(Duration::from_secs(1)).await;

    assert_eq!(slow_tally.executions(), 6);
    assert!(slow_tally.peak() <= 2, "default ran {} at once", slow_tally.peak());
    assert!(mail_tally.peak() <= 3, "email ran {} at once", mail_tally.peak());
}

#[tokio::test]
async fn test_transient_failures_discard_after_max_attempts() {
    let tq = TestQueue::new(helpers::worker_config(&[("default", 1)]));
    let handler = TestHandler::new("sync.contacts", Behavior::Transient);
    let tally = handler.tally.clone();

    let id = tq
        .enqueue_with(
            "default",
            "sync.contacts",
            EnqueueOptions {
                max_attempts: Some(2),
                ..EnqueueOptions::default()
            },
        )
        .await;

    let engine = tq.engine(helpers::registry(vec![handler]));
    engine.start().await.unwrap();

    let first = tq.wait_for_attempts(id, 1).await;
    assert_eq!(first.state, JobState::Available);
    assert_eq!(first.scheduled_at, tq.clock.now() + chrono::Duration::seconds(1));
    assert_eq!(first.last_error.as_deref(), Some("downstream unavailable"));

    // The retry is not due until the backoff has elapsed on the canonical clock.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(tally.executions(), 1);

    tq.clock.advance(chrono::Duration::seconds(2));
    let discarded = tq.wait_for_state(id, JobState::Discarded).await;
    engine.stop(Duration::from_secs(1)).await;

    assert_eq!(discarded.attempts, 2);
    assert!(discarded.finalized_at.is_some());
    assert_eq!(tally.executions(), 2);
}

#[tokio::test]
async fn test_permanent_failure_is_never_retried() {
    let tq = TestQueue::new(helpers::worker_config(&[("default", 1)]));
    let handler = TestHandler::new("invoice.render", Behavior::Permanent);
    let tally = handler.tally.clone();
    let id = tq.enqueue("default", "invoice.render").await;

    let engine = tq.engine(helpers::registry(vec![handler]));
    engine.start().await.unwrap();
    let errored = tq.wait_for_state(id, JobState::Errored).await;

    tq.clock.advance(chrono::Duration::hours(1));
    tokio::time::sleep(Duration::from_millis(100)).await;
    engine.stop(Duration::from_secs(1)).await;

    assert_eq!(errored.attempts, 1);
    assert_eq!(errored.last_error.as_deref(), Some("payload rejected"));
    assert_eq!(tally.executions(), 1);
}

#[tokio::test]
async fn test_panicking_handler_counts_as_failed_attempt() {
    let tq = TestQueue::new(helpers::worker_config(&[("default", 1)]));
    let id = tq.enqueue("default", "thumbnail.render").await;

    let engine = tq.engine(helpers::registry(vec![TestHandler::new(
        "thumbnail.render",
        Behavior::Panic,
    )]));
    engine.start().await.unwrap();
    let job = tq.wait_for_attempts(id, 1).await;
    engine.stop(Duration::from_secs(1)).await;

    assert_eq!(job.state, JobState::Available);
    let error = job.last_error.unwrap_or_default();
    assert!(error.contains("Handler panicked"), "unexpected error: {error}");
    assert!(error.contains("handler bug"), "unexpected error: {error}");
}

#[tokio::test]
async fn test_start_fails_when_pending_kind_has_no_handler() {
    let tq = TestQueue::new(helpers::worker_config(&[("default", 1)]));
    tq.enqueue("default", "legacy.export").await;

    let engine = tq.engine(helpers::registry(vec![TestHandler::new(
        "email.send",
        Behavior::Succeed,
    )]));
    let err = engine.start().await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::Validation);
    assert!(err.message.contains("legacy.export"));
    assert_eq!(engine.stop(Duration::from_secs(1)).await.interrupted, 0);
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let tq = TestQueue::new(helpers::worker_config(&[("default", 1)]));
    let engine = tq.engine(WorkerRegistry::new());

    engine.start().await.unwrap();
    let err = engine.start().await.unwrap_err();
    engine.stop(Duration::from_secs(1)).await;

    assert_eq!(err.kind, ErrorKind::Conflict);
}

#[tokio::test]
async fn test_concurrent_claims_have_exactly_one_winner() {
    let tq = TestQueue::new(helpers::worker_config(&[("default", 1)]));
    let id = tq.enqueue("default", "email.send").await;

    let mut claims = Vec::new();
    for worker in 0..16 {
        let queue = tq.queue.clone();
        claims.push(tokio::spawn(async move {
            queue.claim("default", &format!("worker-{worker}")).await
        }));
    }

    let mut winners = Vec::new();
    for claim in claims {
        if let Some(job) = claim.await.unwrap().unwrap() {
            winners.push(job);
        }
    }

    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].id, id);
    assert_eq!(tq.job(id).await.state, JobState::Running);
}

#[tokio::test]
async fn test_enqueue_wakes_idle_dispatcher() {
    let mut config = helpers::worker_config(&[("default", 1)]);
    config.poll_interval_ms = 60_000;
    let tq = TestQueue::new(config);

    let engine = tq.engine(helpers::registry(vec![TestHandler::new(
        "email.send",
        Behavior::Succeed,
    )]));
    engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let id = tq.enqueue("default", "email.send").await;
    tq.wait_for_state(id, JobState::Completed).await;
    engine.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_zero_worker_queue_accumulates_backlog() {
    let tq = TestQueue::new(helpers::worker_config(&[("default", 1), ("refresh", 0)]));
    let handler = TestHandler::new("cache.refresh", Behavior::Succeed);
    let tally = handler.tally.clone();

    let engine = tq.engine(helpers::registry(vec![handler]));
    engine.start().await.unwrap();

    let id = tq.enqueue("refresh", "cache.refresh").await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    engine.stop(Duration::from_secs(1)).await;

    assert_eq!(tq.job(id).await.state, JobState::Available);
    assert_eq!(tally.executions(), 0);

    let stats = tq.queue.stats().await.unwrap();
    let refresh = stats.iter().find(|s| s.queue == "refresh").unwrap();
    assert_eq!((refresh.max_workers, refresh.available), (0, 1));
}

#[tokio::test]
async fn test_drain_lets_in_flight_jobs_finish_within_grace() {
    let tq = TestQueue::new(helpers::worker_config(&[("default", 3)]));
    let ids = [
        tq.enqueue("default", "report.build").await,
        tq.enqueue("default", "report.build").await,
        tq.enqueue("default", "report.build").await,
    ];

    let engine = tq.engine(helpers::registry(vec![TestHandler::new(
        "report.build",
        Behavior::Sleep(Duration::from_millis(300)),
    )]));
    engine.start().await.unwrap();
    tq.wait_for_running("default", 3).await;

    let report = engine.stop(Duration::from_secs(5)).await;

    assert_eq!(report.completed_in_grace, 3);
    assert_eq!(report.interrupted, 0);
    for id in ids {
        assert_eq!(tq.job(id).await.state, JobState::Completed);
    }
}

#[tokio::test]
async fn test_jobs_past_grace_are_recovered_on_next_start() {
    let tq = TestQueue::new(helpers::worker_config(&[("default", 3)]));
    let ids = [
        tq.enqueue("default", "video.transcode").await,
        tq.enqueue("default", "video.transcode").await,
        tq.enqueue("default", "video.transcode").await,
    ];

    let stuck = tq.engine(helpers::registry(vec![TestHandler::new(
        "video.transcode",
        Behavior::Hang,
    )]));
    stuck.start().await.unwrap();
    tq.wait_for_running("default", 3).await;

    let report = stuck.stop(Duration::from_millis(200)).await;
    assert_eq!(report.interrupted, 3);
    assert_eq!(report.completed_in_grace, 0);
    for id in ids {
        let job = tq.job(id).await;
        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.heartbeat_at, Some(DateTime::<Utc>::UNIX_EPOCH));
    }

    // Restarting right away, well inside the staleness threshold.
    let restarted = tq.engine(helpers::registry(vec![TestHandler::new(
        "video.transcode",
        Behavior::Succeed,
    )]));
    restarted.start().await.unwrap();
    for id in ids {
        let job = tq.wait_for_state(id, JobState::Completed).await;
        assert_eq!(job.worker_id.as_deref(), Some(restarted.worker_id()));
        assert_eq!(job.attempts, 0);
    }
    restarted.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_crashed_worker_jobs_are_recovered_while_serving() {
    let tq = TestQueue::new(helpers::worker_config(&[("default", 1)]));
    let id = tq.enqueue("default", "account.refresh").await;
    let orphan = tq.queue.claim("default", "worker-crashed").await.unwrap().unwrap();
    assert_eq!(orphan.id, id);

    let engine = tq.engine(helpers::registry(vec![TestHandler::new(
        "account.refresh",
        Behavior::Succeed,
    )]));
    engine.start().await.unwrap();

    // The heartbeat is still fresh, so the owner may be alive.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let job = tq.job(id).await;
    assert_eq!(job.state, JobState::Running);
    assert_eq!(job.worker_id.as_deref(), Some("worker-crashed"));

    tq.clock.advance(chrono::Duration::seconds(61));
    let job = tq.wait_for_state(id, JobState::Completed).await;
    engine.stop(Duration::from_secs(1)).await;

    assert_eq!(job.worker_id.as_deref(), Some(engine.worker_id()));
}

#[tokio::test]
async fn test_enqueue_of_unhandled_kind_cannot_block_restart() {
    let tq = TestQueue::new(helpers::worker_config(&[("default", 1)]));
    let registry = || {
        helpers::registry(vec![TestHandler::new("email.send", Behavior::Succeed)])
    };

    let engine = tq.engine(registry());
    engine.start().await.unwrap();
    let err = tq
        .queue
        .enqueue(
            "default",
            "bogus.kind",
            serde_json::json!({}),
            EnqueueOptions {
                scheduled_at: Some(tq.clock.now() + chrono::Duration::days(365)),
                ..EnqueueOptions::default()
            },
        )
        .await
        .unwrap_err();
    engine.stop(Duration::from_secs(1)).await;

    assert_eq!(err.kind, ErrorKind::Validation);
    assert!(err.message.contains("bogus.kind"));
    assert!(tq.queue.pending_kinds().await.unwrap().is_empty());

    let next = tq.engine(registry());
    next.start().await.unwrap();
    next.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_cancelled_job_is_released_without_consuming_attempt() {
    let tq = TestQueue::new(helpers::worker_config(&[("default", 1)]));
    let id = tq.enqueue("default", "webhook.replay").await;

    let engine = tq.engine(helpers::registry(vec![TestHandler::new(
        "webhook.replay",
        Behavior::Cooperative,
    )]));
    engine.start().await.unwrap();
    tq.wait_for_running("default", 1).await;

    let report = engine.stop(Duration::from_secs(2)).await;

    assert_eq!(report.interrupted, 0);
    let job = tq.job(id).await;
    assert_eq!(job.state, JobState::Available);
    assert_eq!(job.attempts, 0);
    assert!(job.last_error.is_none());
}

#[tokio::test]
async fn test_duplicate_kind_registration_is_rejected() {
    let tq = TestQueue::new(helpers::worker_config(&[("default", 1)]));
    let handler = Arc::new(TestHandler::new("email.send", Behavior::Succeed));
    let tally = handler.tally.clone();

    let mut registry = WorkerRegistry::new();
    registry.register(handler.clone()).unwrap();
    let err = registry.register(handler).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);

    let id = tq.enqueue("default", "email.send").await;
    let engine = tq.engine(registry);
    engine.start().await.unwrap();
    tq.wait_for_state(id, JobState::Completed).await;
    engine.stop(Duration::from_secs(1)).await;

    assert_eq!(tally.executions(), 1);
}
