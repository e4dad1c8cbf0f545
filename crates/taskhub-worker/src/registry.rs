//! Worker registry mapping job kinds to their handlers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing;

use taskhub_core::error::AppError;
use taskhub_entity::job::Job;

/// What a handler sees while executing one attempt of a job.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// The claimed job.
    pub job: Job,
    cancel: CancellationToken,
}

impl JobContext {
    /// Wrap a claimed job with the engine's stop signal.
    pub fn new(job: Job, cancel: CancellationToken) -> Self {
        Self { job, cancel }
    }

    /// Whether the engine has started stopping.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the engine starts stopping.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// Trait for job handler implementations
#[async_trait]
pub trait JobHandler: Send + Sync + std::fmt::Debug {
    /// Get the job kind this handler processes
    fn kind(&self) -> &str;

    /// Execute one attempt of the job
    async fn execute(&self, ctx: &JobContext) -> Result<(), JobExecutionError>;
}

/// Error from job execution
#[derive(Debug, thiserror::Error)]
pub enum JobExecutionError {
    /// Permanent failure, never retried
    #[error("Permanent job failure: {0}")]
    Permanent(String),

    /// Transient failure, retried with backoff
    #[error("Transient job failure: {0}")]
    Transient(String),

    /// The handler stopped because the engine is shutting down
    #[error("Job cancelled by shutdown")]
    Cancelled,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] AppError),
}

/// Maps job kinds to handlers.
///
/// Built up before the engine starts and frozen once handed to it.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    /// Registered job handlers by kind
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl WorkerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job handler. A kind can only be registered once.
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) -> Result<(), AppError> {
        let kind = handler.kind().to_string();
        if self.handlers.contains_key(&kind) {
            return Err(AppError::conflict(format!(
                "A handler for job kind '{kind}' is already registered"
            )));
        }
        tracing::info!(kind = %kind, "Registered job handler");
        self.handlers.insert(kind, handler);
        Ok(())
    }

    /// Look up the handler for a kind
    pub fn get(&self, kind: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(kind).cloned()
    }

    /// Check if a handler is registered for a kind
    pub fn has_handler(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Get the list of registered kinds, sorted
    pub fn registered_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.handlers.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Fail if any of `kinds` has no handler.
    pub fn ensure_registered(&self, kinds: &[String]) -> Result<(), AppError> {
        let missing: Vec<&str> = kinds
            .iter()
            .filter(|kind| !self.has_handler(kind))
            .map(String::as_str)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(AppError::validation(format!(
                "Persisted jobs reference kinds without a registered handler: {}",
                missing.join(", ")
            )))
        }
    }
}
