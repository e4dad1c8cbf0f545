//! Startup and shutdown sequencing for the TaskHub process.
//!
//! Startup runs `Configuring → ConnectingDependencies → Serving`; any error
//! before `Serving` is returned to `main`, which maps it to a failing exit
//! code. Once serving, the process waits for the first termination request
//! and drains: listener, job queue engine, cron scheduler, external clients.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use taskhub_api::{AppState, build_router};
use taskhub_core::clock::SystemClock;
use taskhub_core::config::AppConfig;
use taskhub_core::error::{AppError, ErrorKind};
use taskhub_core::lifecycle::Stage;
use taskhub_core::result::AppResult;
use taskhub_worker::registry::WorkerRegistry;
use taskhub_worker::runner::{DrainReport, QueueEngine};
use taskhub_worker::scheduler::{CronScheduler, validate_cron_expression};

use crate::context::AppContext;
use crate::lifecycle::{Lifecycle, ShutdownReport, ShutdownStep, run_shutdown_steps};

/// `Configuring`: load and validate configuration for `env`.
pub fn configure(lifecycle: &Lifecycle, env: &str) -> AppResult<AppConfig> {
    lifecycle.advance(Stage::Configuring)?;
    let config = AppConfig::load(env)?;
    validate_config(&config)?;
    Ok(config)
}

/// Cross-field checks plus cron expressions of every enabled sweep
pub fn validate_config(config: &AppConfig) -> AppResult<()> {
    config.validate()?;

    let maintenance = &config.maintenance;
    for (name, sweep) in [
        ("passcode_sweep", &maintenance.passcode_sweep),
        ("session_token_sweep", &maintenance.session_token_sweep),
        ("job_history_sweep", &maintenance.job_history_sweep),
    ] {
        if sweep.enabled {
            validate_cron_expression(&sweep.cron).map_err(|e| {
                AppError::configuration(format!("maintenance.{name}.cron: {}", e.message))
            })?;
        }
    }
    Ok(())
}

/// `ConnectingDependencies` then `Serving` against PostgreSQL.
pub async fn run(lifecycle: Arc<Lifecycle>, config: AppConfig) -> AppResult<ShutdownReport> {
    let ctx = {
        let _transition = lifecycle.begin_transition().await;
        lifecycle.advance(Stage::ConnectingDependencies)?;
        tracing::info!("Connecting to database...");
        AppContext::connect(config, Arc::new(SystemClock)).await?
    };

    let registry = match ctx.default_registry() {
        Ok(registry) => registry,
        Err(e) => {
            release(&ctx).await;
            return Err(e);
        }
    };
    serve(lifecycle, ctx, registry).await
}

/// Start the engine, the scheduler and the listener, in that order, then
/// block until shutdown is requested and drain.
pub async fn serve(
    lifecycle: Arc<Lifecycle>,
    ctx: AppContext,
    registry: WorkerRegistry,
) -> AppResult<ShutdownReport> {
    let running = {
        let _transition = lifecycle.begin_transition().await;
        let running = match Running::start(&lifecycle, &ctx, registry).await {
            Ok(running) => running,
            Err(e) => {
                release(&ctx).await;
                return Err(e);
            }
        };
        if let Err(e) = lifecycle.advance(Stage::Serving) {
            running.drain(&ctx).await;
            return Err(e);
        }
        running
    };

    tracing::info!(address = %running.listener.local_addr, "TaskHub is serving");
    lifecycle.shutdown_requested().await;

    let _transition = lifecycle.begin_transition().await;
    lifecycle.advance(Stage::Draining)?;
    let report = running.drain(&ctx).await;
    lifecycle.advance(Stage::Stopped)?;

    tracing::info!(
        failed_steps = ?report.failed_steps(),
        interrupted_jobs = report.drain.interrupted,
        "TaskHub shut down"
    );
    Ok(report)
}

/// Best-effort release of dependencies after a failed startup
async fn release(ctx: &AppContext) {
    if let Err(e) = ctx.close_external_clients().await {
        tracing::warn!(error = %e, "Failed to release external clients");
    }
}

/// Subsystems started by `serve`
struct Running {
    engine: Option<QueueEngine>,
    scheduler: CronScheduler,
    listener: Listener,
}

impl Running {
    async fn start(
        lifecycle: &Lifecycle,
        ctx: &AppContext,
        registry: WorkerRegistry,
    ) -> AppResult<Self> {
        let grace = ctx.config.worker.shutdown_grace();

        let engine = if ctx.config.worker.enabled {
            let engine = QueueEngine::new(ctx.queue.clone(), registry, ctx.config.worker.clone());
            engine.start().await?;
            Some(engine)
        } else {
            tracing::info!("Job queue engine disabled");
            None
        };

        let scheduler = match start_scheduler(ctx).await {
            Ok(scheduler) => scheduler,
            Err(e) => {
                if let Some(engine) = &engine {
                    engine.stop(grace).await;
                }
                return Err(e);
            }
        };

        let listener = match Listener::start(lifecycle, ctx).await {
            Ok(listener) => listener,
            Err(e) => {
                if let Err(stop_err) = scheduler.stop(grace).await {
                    tracing::warn!(error = %stop_err, "Failed to stop cron scheduler");
                }
                if let Some(engine) = &engine {
                    engine.stop(grace).await;
                }
                return Err(e);
            }
        };

        Ok(Self {
            engine,
            scheduler,
            listener,
        })
    }

    /// Tear everything down in order. Failures are logged, never fatal.
    async fn drain(self, ctx: &AppContext) -> ShutdownReport {
        let server_grace = Duration::from_secs(ctx.config.server.shutdown_grace_seconds);
        let worker_grace = ctx.config.worker.shutdown_grace();
        let mut drain = DrainReport::default();

        let engine = &self.engine;
        let scheduler = &self.scheduler;
        let steps: Vec<ShutdownStep<'_>> = vec![
            ("listener", self.listener.stop(server_grace).boxed()),
            (
                "job_queue_engine",
                async {
                    if let Some(engine) = engine {
                        drain = engine.stop(worker_grace).await;
                    }
                    Ok(())
                }
                .boxed(),
            ),
            ("cron_scheduler", scheduler.stop(worker_grace).boxed()),
            ("external_clients", ctx.close_external_clients().boxed()),
        ];

        let steps = run_shutdown_steps(steps).await;
        ShutdownReport { steps, drain }
    }
}

async fn start_scheduler(ctx: &AppContext) -> AppResult<CronScheduler> {
    let scheduler = ctx.build_scheduler().await?;
    scheduler.start().await?;
    Ok(scheduler)
}

/// The HTTP listener task
struct Listener {
    local_addr: SocketAddr,
    stop: CancellationToken,
    handle: JoinHandle<std::io::Result<()>>,
}

impl Listener {
    async fn start(lifecycle: &Lifecycle, ctx: &AppContext) -> AppResult<Self> {
        let addr = ctx.config.server.bind_address();
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            AppError::with_source(ErrorKind::Internal, format!("Failed to bind {addr}"), e)
        })?;
        let local_addr = listener.local_addr()?;

        let state = AppState::new(ctx.queue.clone(), lifecycle.subscribe(), ctx.db.clone());
        let app = build_router(state);

        let stop = CancellationToken::new();
        let signal = stop.clone();
        let server = axum::serve(listener, app)
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .into_future();
        let handle = tokio::spawn(server);

        tracing::info!(address = %local_addr, "HTTP listener started");
        Ok(Self {
            local_addr,
            stop,
            handle,
        })
    }

    /// Stop accepting connections and wait up to `grace` for open ones
    async fn stop(mut self, grace: Duration) -> AppResult<()> {
        self.stop.cancel();

        match tokio::time::timeout(grace, &mut self.handle).await {
            Ok(Ok(result)) => result.map_err(AppError::from),
            Ok(Err(e)) => Err(AppError::internal(format!("Listener task failed: {e}"))),
            Err(_) => {
                self.handle.abort();
                Err(AppError::service_unavailable(format!(
                    "Open connections did not close within {grace:?}"
                )))
            }
        }
    }
}
