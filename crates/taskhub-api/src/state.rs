//! Shared application state passed to all handlers.

use tokio::sync::watch;

use taskhub_core::lifecycle::Stage;
use taskhub_database::DatabasePool;
use taskhub_worker::queue::JobQueue;

/// State shared by every request handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Job queue used to enqueue work and read statistics
    pub queue: JobQueue,
    /// Current lifecycle stage
    pub stage: watch::Receiver<Stage>,
    /// Database pool, absent when running on in-memory storage
    pub db: Option<DatabasePool>,
}

impl AppState {
    /// Create the handler state
    pub fn new(queue: JobQueue, stage: watch::Receiver<Stage>, db: Option<DatabasePool>) -> Self {
        Self { queue, stage, db }
    }

    /// Lifecycle stage at this moment
    pub fn current_stage(&self) -> Stage {
        *self.stage.borrow()
    }
}
