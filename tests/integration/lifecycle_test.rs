//! Integration tests for startup, shutdown and the lifecycle controller.

mod helpers;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::FutureExt;

use taskhub::lifecycle::{ShutdownStep, run_shutdown_steps};
use taskhub::{AppContext, Lifecycle, serve};
use taskhub_core::clock::ManualClock;
use taskhub_core::config::AppConfig;
use taskhub_core::error::{AppError, ErrorKind};
use taskhub_core::lifecycle::Stage;
use taskhub_entity::job::{EnqueueOptions, JobState};

use helpers::{Behavior, TestHandler};

fn in_memory_context(config: AppConfig) -> AppContext {
    AppContext::in_memory(config, Arc::new(ManualClock::new(Utc::now())))
        .expect("Failed to build context")
}

#[tokio::test]
async fn test_failing_step_does_not_abort_teardown() {
    let ran_last = AtomicBool::new(false);
    let order = Mutex::new(Vec::new());

    let steps: Vec<ShutdownStep<'_>> = vec![
        (
            "listener",
            async {
                order.lock().unwrap().push("listener");
                Ok::<_, AppError>(())
            }
            .boxed(),
        ),
        (
            "job_queue_engine",
            async {
                order.lock().unwrap().push("job_queue_engine");
                Err(AppError::internal("engine wedged"))
            }
            .boxed(),
        ),
        (
            "external_clients",
            async {
                order.lock().unwrap().push("external_clients");
                ran_last.store(true, Ordering::SeqCst);
                Ok(())
            }
            .boxed(),
        ),
    ];

    let reports = run_shutdown_steps(steps).await;

    assert!(ran_last.load(Ordering::SeqCst));
    assert_eq!(
        *order.lock().unwrap(),
        vec!["listener", "job_queue_engine", "external_clients"]
    );
    assert_eq!(reports.len(), 3);
    assert!(reports[0].error.is_none());
    assert!(
        reports[1]
            .error
            .as_deref()
            .is_some_and(|e| e.contains("engine wedged"))
    );
    assert!(reports[2].error.is_none());
}

#[test]
fn test_second_shutdown_request_is_ignored() {
    let lifecycle = Lifecycle::new();
    assert!(!lifecycle.is_shutdown_requested());

    assert!(lifecycle.request_shutdown());
    assert!(!lifecycle.request_shutdown());
    assert!(!lifecycle.request_shutdown());
    assert!(lifecycle.is_shutdown_requested());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_serve_runs_until_shutdown_then_drains_in_order() {
    let lifecycle = Arc::new(Lifecycle::new());
    let ctx = in_memory_context(helpers::test_config());
    let queue = ctx.queue.clone();
    let handler = TestHandler::new("email.send", Behavior::Succeed);
    let tally = handler.tally.clone();

    let mut stages = lifecycle.subscribe();
    let server = tokio::spawn(serve(
        Arc::clone(&lifecycle),
        ctx,
        helpers::registry(vec![handler]),
    ));
    stages.wait_for(|stage| *stage == Stage::Serving).await.unwrap();

    let id = queue
        .enqueue(
            "default",
            "email.send",
            serde_json::json!({ "to": "ops@example.com" }),
            EnqueueOptions::default(),
        )
        .await
        .unwrap();
    let queue_ref = &queue;
    helpers::eventually("the job to complete", || async move {
        queue_ref.find(id).await.unwrap().map(|job| job.state) == Some(JobState::Completed)
    })
    .await;

    assert!(lifecycle.request_shutdown());
    assert!(!lifecycle.request_shutdown());
    let report = server.await.unwrap().unwrap();

    let steps: Vec<&str> = report.steps.iter().map(|s| s.step).collect();
    assert_eq!(
        steps,
        vec!["listener", "job_queue_engine", "cron_scheduler", "external_clients"]
    );
    assert!(report.is_clean(), "unclean shutdown: {report:?}");
    assert_eq!(tally.executions(), 1);
    assert_eq!(lifecycle.stage(), Stage::Stopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_serve_fails_fast_when_pending_kind_has_no_handler() {
    let lifecycle = Arc::new(Lifecycle::new());
    let ctx = in_memory_context(helpers::test_config());
    ctx.queue
        .enqueue(
            "default",
            "legacy.export",
            serde_json::json!({}),
            EnqueueOptions::default(),
        )
        .await
        .unwrap();

    let err = serve(
        Arc::clone(&lifecycle),
        ctx,
        helpers::registry(vec![TestHandler::new("email.send", Behavior::Succeed)]),
    )
    .await
    .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Validation);
    assert!(lifecycle.stage() < Stage::Serving);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_listener_failure_unwinds_started_subsystems() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let mut config = helpers::test_config();
    config.server.port = occupied.local_addr().unwrap().port();

    let lifecycle = Arc::new(Lifecycle::new());
    let err = serve(
        Arc::clone(&lifecycle),
        in_memory_context(config),
        helpers::registry(vec![TestHandler::new("email.send", Behavior::Succeed)]),
    )
    .await
    .unwrap_err();

    assert!(err.message.contains("Failed to bind"), "unexpected error: {err}");
    assert!(lifecycle.stage() < Stage::Serving);
}

#[test]
fn test_validate_config_rejects_bad_cron() {
    let mut config = helpers::test_config();
    config.maintenance.passcode_sweep.cron = "whenever".to_string();

    let err = taskhub::server::validate_config(&config).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Configuration);
    assert!(err.message.contains("passcode_sweep"));

    config.maintenance.passcode_sweep.enabled = false;
    assert!(taskhub::server::validate_config(&config).is_ok());
}
