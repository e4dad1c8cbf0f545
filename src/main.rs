//! TaskHub Server: background job orchestration service
//!
//! Loads configuration, initializes logging and hands control to the
//! lifecycle controller.

use std::process::ExitCode;
use std::sync::Arc;

use tracing;
use tracing_subscriber::{EnvFilter, fmt};

use taskhub::{Lifecycle, configure, run, shutdown};
use taskhub_core::config::{LogFormat, LoggingConfig};
use taskhub_core::lifecycle::Stage;

#[tokio::main]
async fn main() -> ExitCode {
    let lifecycle = Arc::new(Lifecycle::new());
    let env = std::env::var("TASKHUB_ENV").unwrap_or_else(|_| "development".to_string());

    let config = match configure(&lifecycle, &env) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.logging);
    tracing::info!(
        env = %env,
        stage = %lifecycle.stage(),
        "Starting TaskHub v{}",
        env!("CARGO_PKG_VERSION")
    );

    tokio::spawn(shutdown::forward_signals(Arc::clone(&lifecycle)));

    match run(Arc::clone(&lifecycle), config).await {
        Ok(report) if report.is_clean() => ExitCode::SUCCESS,
        Ok(report) => {
            tracing::warn!(
                failed_steps = ?report.failed_steps(),
                interrupted_jobs = report.drain.interrupted,
                "Shutdown finished with problems"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(
                error = %e,
                kind = %e.kind,
                fatal = e.is_fatal(),
                stage = %lifecycle.stage(),
                "Server error"
            );
            if let Err(rejected) = lifecycle.advance(Stage::Stopped) {
                tracing::debug!(error = %rejected, "Stage not advanced to stopped");
            }
            ExitCode::FAILURE
        }
    }
}

/// Initialize tracing/logging
fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        LogFormat::Pretty => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}
