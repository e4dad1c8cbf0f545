//! Background worker configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Job queue engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Whether the engine dispatches jobs in this process.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Milliseconds an idle queue waits before polling storage again.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Seconds in-flight jobs get to finish once the engine stops.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
    /// A running job whose heartbeat is older than this is considered abandoned.
    #[serde(default = "default_stale_after")]
    pub stale_after_seconds: u64,
    /// How often running jobs refresh their heartbeat.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,
    /// Milliseconds between checks for stale jobs while serving.
    #[serde(default = "default_stale_check_interval")]
    pub stale_check_interval_ms: u64,
    /// Attempts allowed when the enqueuer does not specify one.
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: i32,
    /// Retry backoff settings.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Queues served by this process, keyed by name.
    #[serde(default = "default_queues")]
    pub queues: BTreeMap<String, QueueConfig>,
}

/// Per-queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Concurrency ceiling. Zero leaves the queue undispatched.
    pub max_workers: usize,
}

/// Exponential backoff with bounded jitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    /// Upper bound on the exponential delay, in seconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_seconds: u64,
    /// Extra random delay as a fraction of the computed delay, in `[0, 1]`.
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay(),
            max_delay_seconds: default_max_delay(),
            jitter_ratio: default_jitter_ratio(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: default_poll_interval(),
            shutdown_grace_seconds: default_shutdown_grace(),
            stale_after_seconds: default_stale_after(),
            heartbeat_interval_seconds: default_heartbeat_interval(),
            stale_check_interval_ms: default_stale_check_interval(),
            default_max_attempts: default_max_attempts(),
            retry: RetryConfig::default(),
            queues: default_queues(),
        }
    }
}

impl WorkerConfig {
    /// Poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Shutdown grace period as a [`Duration`].
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    /// Heartbeat interval as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn stale_check_interval(&self) -> Duration {
        Duration::from_millis(self.stale_check_interval_ms)
    }
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_shutdown_grace() -> u64 {
    30
}

fn default_stale_after() -> u64 {
    300
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_stale_check_interval() -> u64 {
    30_000
}

fn default_max_attempts() -> i32 {
    5
}

fn default_base_delay() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    3600
}

fn default_jitter_ratio() -> f64 {
    0.2
}

fn default_queues() -> BTreeMap<String, QueueConfig> {
    let mut queues = BTreeMap::new();
    queues.insert("default".to_string(), QueueConfig { max_workers: 4 });
    queues
}
