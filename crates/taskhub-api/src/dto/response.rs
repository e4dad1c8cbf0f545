//! Response DTOs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use taskhub_database::PoolStatus;

/// Standard success response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T: Serialize> {
    /// Whether the request was successful.
    pub success: bool,
    /// Response data.
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    /// Creates a successful response.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `ok` while serving, otherwise the stage name.
    pub status: String,
    /// Lifecycle stage.
    pub stage: String,
    /// Database status.
    pub database: String,
    /// Round-trip time of the ping query.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_latency_ms: Option<u64>,
    /// Pool occupancy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolStatus>,
    /// Version.
    pub version: String,
}

/// Enqueued job reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueuedJobResponse {
    /// ID of the new job.
    pub id: Uuid,
}
