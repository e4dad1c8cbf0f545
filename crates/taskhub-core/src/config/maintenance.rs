//! Scheduled maintenance sweep configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the built-in retention sweeps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Deletes one-time passcodes past their expiry.
    #[serde(default = "default_passcode_sweep")]
    pub passcode_sweep: SweepConfig,
    /// Deletes session tokens past their lifetime.
    #[serde(default = "default_session_token_sweep")]
    pub session_token_sweep: SweepConfig,
    /// Deletes finished jobs past their retention.
    #[serde(default = "default_job_history_sweep")]
    pub job_history_sweep: SweepConfig,
}

/// A single TTL sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Whether the sweep is scheduled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Six-field cron expression (seconds first).
    pub cron: String,
    /// Rows created more than this many seconds ago are deleted.
    pub ttl_seconds: u64,
    /// Maximum rows removed per delete statement.
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            passcode_sweep: default_passcode_sweep(),
            session_token_sweep: default_session_token_sweep(),
            job_history_sweep: default_job_history_sweep(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> i64 {
    1000
}

fn default_passcode_sweep() -> SweepConfig {
    SweepConfig {
        enabled: true,
        cron: "0 */5 * * * *".to_string(),
        ttl_seconds: 600,
        batch_size: default_batch_size(),
    }
}

fn default_session_token_sweep() -> SweepConfig {
    SweepConfig {
        enabled: true,
        cron: "0 0 * * * *".to_string(),
        ttl_seconds: 30 * 24 * 3600,
        batch_size: default_batch_size(),
    }
}

fn default_job_history_sweep() -> SweepConfig {
    SweepConfig {
        enabled: true,
        cron: "0 30 3 * * *".to_string(),
        ttl_seconds: 7 * 24 * 3600,
        batch_size: default_batch_size(),
    }
}
