//! Request DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use taskhub_entity::job::EnqueueOptions;

/// Body of `POST /api/jobs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueJobRequest {
    /// Target queue.
    pub queue: String,
    /// Job kind; must have a registered handler to ever run.
    pub kind: String,
    /// Opaque handler payload.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Attempts before the job is discarded.
    #[serde(default)]
    pub max_attempts: Option<i32>,
    /// Earliest claim time.
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl EnqueueJobRequest {
    /// Enqueue options carried by the request.
    pub fn options(&self) -> EnqueueOptions {
        EnqueueOptions {
            max_attempts: self.max_attempts,
            scheduled_at: self.scheduled_at,
        }
    }
}
