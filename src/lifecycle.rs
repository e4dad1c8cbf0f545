//! Lifecycle controller: stage tracking, the one-shot drain trigger, and
//! best-effort shutdown sequencing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard, watch};
use tokio_util::sync::CancellationToken;

use taskhub_core::error::AppError;
use taskhub_core::lifecycle::Stage;
use taskhub_core::result::AppResult;
use taskhub_worker::runner::DrainReport;

/// Process-wide lifecycle state.
#[derive(Debug)]
pub struct Lifecycle {
    stage: watch::Sender<Stage>,
    /// Held for the whole of a start or stop sequence
    transition: Mutex<()>,
    shutdown_requested: AtomicBool,
    shutdown: CancellationToken,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// A lifecycle in [`Stage::Init`]
    pub fn new() -> Self {
        let (stage, _) = watch::channel(Stage::Init);
        Self {
            stage,
            transition: Mutex::new(()),
            shutdown_requested: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    /// Current stage
    pub fn stage(&self) -> Stage {
        *self.stage.borrow()
    }

    /// Receiver that observes every stage change
    pub fn subscribe(&self) -> watch::Receiver<Stage> {
        self.stage.subscribe()
    }

    /// Move forward to `to`. Stages never move backwards.
    pub fn advance(&self, to: Stage) -> AppResult<()> {
        let mut from = to;
        let moved = self.stage.send_if_modified(|current| {
            from = *current;
            if to > *current {
                *current = to;
                true
            } else {
                false
            }
        });

        if !moved {
            return Err(AppError::conflict(format!(
                "Cannot move lifecycle from {from} to {to}"
            )));
        }
        tracing::info!(from = %from, stage = %to, "Lifecycle stage changed");
        Ok(())
    }

    /// Serialize start and stop sequences
    pub async fn begin_transition(&self) -> MutexGuard<'_, ()> {
        self.transition.lock().await
    }

    /// Ask the process to drain.
    ///
    /// Only the first call triggers anything; it returns `true`. Later calls
    /// are logged and ignored.
    pub fn request_shutdown(&self) -> bool {
        if self.shutdown_requested.swap(true, Ordering::SeqCst) {
            tracing::warn!("Shutdown already in progress; ignoring signal");
            return false;
        }
        tracing::info!(stage = %self.stage(), "Shutdown requested");
        self.shutdown.cancel();
        true
    }

    /// Whether a drain has been requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Resolves once a drain has been requested
    pub async fn shutdown_requested(&self) {
        self.shutdown.cancelled().await
    }
}

/// Outcome of one shutdown step
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    /// Step name
    pub step: &'static str,
    /// Failure message, if the step failed
    pub error: Option<String>,
    /// Time the step took
    pub elapsed: Duration,
}

/// What the drain did
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShutdownReport {
    /// Steps in the order they ran
    pub steps: Vec<StepReport>,
    /// Job queue engine drain result
    pub drain: DrainReport,
}

impl ShutdownReport {
    /// Names of the steps that failed
    pub fn failed_steps(&self) -> Vec<&'static str> {
        self.steps
            .iter()
            .filter(|s| s.error.is_some())
            .map(|s| s.step)
            .collect()
    }

    /// Every step succeeded and no job was interrupted
    pub fn is_clean(&self) -> bool {
        self.failed_steps().is_empty() && self.drain.interrupted == 0
    }
}

/// A named teardown action
pub type ShutdownStep<'a> = (&'static str, BoxFuture<'a, AppResult<()>>);

/// Run `steps` in order. A failing step is logged and the rest still run.
pub async fn run_shutdown_steps(steps: Vec<ShutdownStep<'_>>) -> Vec<StepReport> {
    let mut reports = Vec::with_capacity(steps.len());

    for (step, action) in steps {
        let started = Instant::now();
        let result = action.await;
        let elapsed = started.elapsed();

        let error = match result {
            Ok(()) => {
                tracing::info!(
                    step,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Shutdown step completed"
                );
                None
            }
            Err(e) => {
                tracing::error!(step, error = %e, "Shutdown step failed; continuing teardown");
                Some(e.to_string())
            }
        };

        reports.push(StepReport {
            step,
            error,
            elapsed,
        });
    }

    reports
}
