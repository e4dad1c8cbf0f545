//! Termination signal handling.

use std::sync::Arc;

use crate::lifecycle::Lifecycle;

/// Forward every SIGINT/SIGTERM to the lifecycle until the process exits.
///
/// The first signal starts the drain; the lifecycle ignores the rest.
pub async fn forward_signals(lifecycle: Arc<Lifecycle>) {
    #[cfg(unix)]
    let mut terminate =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => Some(signal),
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                None
            }
        };

    loop {
        #[cfg(unix)]
        let terminated = async {
            match terminate.as_mut() {
                Some(signal) => {
                    if signal.recv().await.is_none() {
                        std::future::pending::<()>().await;
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };

        #[cfg(not(unix))]
        let terminated = std::future::pending::<()>();

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                    return;
                }
                tracing::info!(signal = "SIGINT", "Termination signal received");
            }
            _ = terminated => {
                tracing::info!(signal = "SIGTERM", "Termination signal received");
            }
        }

        lifecycle.request_shutdown();
    }
}
