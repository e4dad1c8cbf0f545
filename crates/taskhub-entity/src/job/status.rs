//! Job state enumeration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a background job.
///
/// `available → running → {completed | errored | discarded}`, with
/// `running → available` for retries and released or recovered jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_state", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting for its scheduled time and a free worker slot.
    Available,
    /// Claimed by a worker and executing.
    Running,
    /// The handler succeeded.
    Completed,
    /// The handler reported a failure that must not be retried.
    Errored,
    /// Every allowed attempt failed.
    Discarded,
}

impl JobState {
    /// Every state, in lifecycle order.
    pub const ALL: [JobState; 5] = [
        Self::Available,
        Self::Running,
        Self::Completed,
        Self::Errored,
        Self::Discarded,
    ];

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Errored | Self::Discarded)
    }

    /// Return the state as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Errored => "errored",
            Self::Discarded => "discarded",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
