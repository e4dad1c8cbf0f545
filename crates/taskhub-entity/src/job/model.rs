//! Job entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::status::JobState;

/// A background job.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Job {
    /// Unique job identifier.
    pub id: Uuid,
    /// Monotonic creation sequence, breaks ties between equal `scheduled_at`.
    pub seq: i64,
    /// Queue the job belongs to for its whole lifetime.
    pub queue: String,
    /// Handler kind (e.g. `"notification.deliver"`).
    pub kind: String,
    /// Handler-specific payload (JSON).
    pub payload: serde_json::Value,
    /// Current state.
    pub state: JobState,
    /// Failed attempts so far.
    pub attempts: i32,
    /// Attempts allowed before the job is discarded.
    pub max_attempts: i32,
    /// Earliest time the job may be claimed.
    pub scheduled_at: DateTime<Utc>,
    /// When the job was enqueued.
    pub created_at: DateTime<Utc>,
    /// When the job was last claimed.
    pub attempted_at: Option<DateTime<Utc>>,
    /// Last liveness signal from the worker executing it.
    pub heartbeat_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub finalized_at: Option<DateTime<Utc>>,
    /// Worker that holds (or last held) the job.
    pub worker_id: Option<String>,
    /// Most recent failure reason.
    pub last_error: Option<String>,
}

impl Job {
    /// Whether one more failure would exhaust the job's attempts.
    pub fn is_final_attempt(&self) -> bool {
        self.attempts + 1 >= self.max_attempts
    }
}

/// Data required to persist a new job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    /// Target queue.
    pub queue: String,
    /// Handler kind.
    pub kind: String,
    /// Handler-specific payload.
    pub payload: serde_json::Value,
    /// Attempts allowed.
    pub max_attempts: i32,
    /// Earliest claim time.
    pub scheduled_at: DateTime<Utc>,
}

/// Optional knobs supplied by enqueuers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnqueueOptions {
    /// Overrides the configured default attempt limit.
    #[serde(default)]
    pub max_attempts: Option<i32>,
    /// Delays the job until this instant.
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}
