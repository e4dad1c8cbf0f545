//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section.

pub mod app;
pub mod database;
pub mod logging;
pub mod maintenance;
pub mod notifier;
pub mod worker;

use serde::{Deserialize, Serialize};

pub use self::app::ServerConfig;
pub use self::database::DatabaseConfig;
pub use self::logging::{LogFormat, LoggingConfig};
pub use self::maintenance::{MaintenanceConfig, SweepConfig};
pub use self::notifier::NotifierConfig;
pub use self::worker::{QueueConfig, RetryConfig, WorkerConfig};

use crate::error::AppError;

/// Root application configuration.
///
/// This struct is the top-level deserialization target for the merged
/// TOML configuration files (default.toml + environment overlay).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Database connection settings.
    pub database: DatabaseConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Job queue engine settings.
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Maintenance sweep settings.
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    /// Outbound notification client settings.
    #[serde(default)]
    pub notifier: NotifierConfig,
}

impl AppConfig {
    /// Load configuration from TOML files.
    ///
    /// Merges the default configuration with an environment-specific overlay
    /// and environment variables prefixed with `TASKHUB_`.
    pub fn load(env: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("TASKHUB")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))
    }

    /// Parse configuration from an inline TOML document.
    pub fn from_toml_str(toml: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))
    }

    /// Check cross-field constraints that serde cannot express.
    ///
    /// Cron expressions are checked separately by the scheduler's parser.
    pub fn validate(&self) -> Result<(), AppError> {
        self.database.validate()?;

        let worker = &self.worker;
        if worker.queues.is_empty() {
            return Err(AppError::configuration(
                "worker.queues must define at least one queue",
            ));
        }
        if let Some(name) = worker.queues.keys().find(|name| name.trim().is_empty()) {
            return Err(AppError::configuration(format!(
                "queue name '{name}' is empty"
            )));
        }
        if worker.shutdown_grace_seconds == 0 {
            return Err(AppError::configuration(
                "worker.shutdown_grace_seconds must be positive",
            ));
        }
        if worker.stale_check_interval_ms == 0 {
            return Err(AppError::configuration(
                "worker.stale_check_interval_ms must be positive",
            ));
        }
        if worker.poll_interval_ms == 0 {
            return Err(AppError::configuration(
                "worker.poll_interval_ms must be positive",
            ));
        }
        if worker.default_max_attempts < 1 {
            return Err(AppError::configuration(
                "worker.default_max_attempts must be at least 1",
            ));
        }
        if worker.heartbeat_interval_seconds == 0
            || worker.heartbeat_interval_seconds >= worker.stale_after_seconds
        {
            return Err(AppError::configuration(format!(
                "worker.heartbeat_interval_seconds ({}) must be positive and below stale_after_seconds ({})",
                worker.heartbeat_interval_seconds, worker.stale_after_seconds
            )));
        }

        let retry = &worker.retry;
        if !(0.0..=1.0).contains(&retry.jitter_ratio) {
            return Err(AppError::configuration(format!(
                "worker.retry.jitter_ratio must be within [0, 1], got {}",
                retry.jitter_ratio
            )));
        }
        if retry.base_delay_ms == 0 || retry.base_delay_ms > retry.max_delay_seconds * 1000 {
            return Err(AppError::configuration(
                "worker.retry.base_delay_ms must be positive and not exceed max_delay_seconds",
            ));
        }

        for (name, sweep) in [
            ("passcode_sweep", &self.maintenance.passcode_sweep),
            ("session_token_sweep", &self.maintenance.session_token_sweep),
            ("job_history_sweep", &self.maintenance.job_history_sweep),
        ] {
            if sweep.ttl_seconds == 0 {
                return Err(AppError::configuration(format!(
                    "maintenance.{name}.ttl_seconds must be positive"
                )));
            }
            if sweep.batch_size <= 0 {
                return Err(AppError::configuration(format!(
                    "maintenance.{name}.batch_size must be positive"
                )));
            }
        }

        Ok(())
    }
}
