//! Application context built once during startup.
//!
//! Every long-lived handle (configuration, clock, storage, job queue,
//! outbound clients) lives here and is passed explicitly to the components
//! that need it.

use std::sync::Arc;
use std::time::Duration;

use taskhub_core::clock::Clock;
use taskhub_core::config::{AppConfig, NotifierConfig};
use taskhub_core::error::{AppError, ErrorKind};
use taskhub_core::result::AppResult;
use taskhub_database::DatabasePool;
use taskhub_database::repositories::{JobRepository, RetentionRepository};
use taskhub_database::store::{JobStore, MemoryJobStore, MemoryRetentionStore, RetentionStore};
use taskhub_worker::jobs::{JobHistorySweep, NotificationDeliveryHandler, RetentionSweep};
use taskhub_worker::queue::JobQueue;
use taskhub_worker::registry::WorkerRegistry;
use taskhub_worker::scheduler::CronScheduler;

/// Outbound clients owned by the process.
#[derive(Debug, Clone)]
pub struct ExternalClients {
    /// HTTP client for webhook delivery
    pub http: reqwest::Client,
}

impl ExternalClients {
    /// Build the outbound clients
    pub fn new(config: &NotifierConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(concat!("taskhub/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                AppError::with_source(ErrorKind::ExternalService, "Failed to build HTTP client", e)
            })?;
        Ok(Self { http })
    }
}

/// Everything the running subsystems share.
#[derive(Debug, Clone)]
pub struct AppContext {
    /// Validated configuration
    pub config: Arc<AppConfig>,
    /// Canonical clock for every persisted timestamp
    pub clock: Arc<dyn Clock>,
    /// Database pool, absent when running on in-memory storage
    pub db: Option<DatabasePool>,
    /// Job storage
    pub job_store: Arc<dyn JobStore>,
    /// Storage of TTL-swept tables
    pub retention_store: Arc<dyn RetentionStore>,
    /// The job queue
    pub queue: JobQueue,
    /// Outbound clients
    pub clients: ExternalClients,
}

impl AppContext {
    /// Connect to PostgreSQL, run migrations and build the clients.
    ///
    /// Any failure here is fatal.
    pub async fn connect(config: AppConfig, clock: Arc<dyn Clock>) -> AppResult<Self> {
        let db = DatabasePool::open(&config.database).await?;

        let job_store: Arc<dyn JobStore> = Arc::new(JobRepository::new(db.pool().clone()));
        let retention_store: Arc<dyn RetentionStore> =
            Arc::new(RetentionRepository::new(db.pool().clone()));

        Self::with_stores(config, clock, job_store, retention_store, Some(db))
    }

    /// Context backed by in-process storage.
    pub fn in_memory(config: AppConfig, clock: Arc<dyn Clock>) -> AppResult<Self> {
        Self::with_stores(
            config,
            clock,
            Arc::new(MemoryJobStore::new()),
            Arc::new(MemoryRetentionStore::new()),
            None,
        )
    }

    /// Context over explicit stores
    pub fn with_stores(
        config: AppConfig,
        clock: Arc<dyn Clock>,
        job_store: Arc<dyn JobStore>,
        retention_store: Arc<dyn RetentionStore>,
        db: Option<DatabasePool>,
    ) -> AppResult<Self> {
        let clients = ExternalClients::new(&config.notifier)?;
        let queue = JobQueue::new(Arc::clone(&job_store), Arc::clone(&clock), &config.worker);

        Ok(Self {
            config: Arc::new(config),
            clock,
            db,
            job_store,
            retention_store,
            queue,
            clients,
        })
    }

    /// Registry holding the built-in job handlers
    pub fn default_registry(&self) -> AppResult<WorkerRegistry> {
        let mut registry = WorkerRegistry::new();
        registry.register(Arc::new(NotificationDeliveryHandler::new(
            self.clients.http.clone(),
            self.config.notifier.webhook_url.clone(),
        )))?;
        Ok(registry)
    }

    /// Scheduler with every enabled maintenance sweep registered
    pub async fn build_scheduler(&self) -> AppResult<CronScheduler> {
        let scheduler = CronScheduler::new().await?;
        let maintenance = &self.config.maintenance;

        if maintenance.passcode_sweep.enabled {
            let sweep = RetentionSweep::expired_passcodes(
                Arc::clone(&self.retention_store),
                Arc::clone(&self.clock),
                &maintenance.passcode_sweep,
            )?;
            scheduler
                .schedule(&maintenance.passcode_sweep.cron, Arc::new(sweep))
                .await?;
        }

        if maintenance.session_token_sweep.enabled {
            let sweep = RetentionSweep::stale_session_tokens(
                Arc::clone(&self.retention_store),
                Arc::clone(&self.clock),
                &maintenance.session_token_sweep,
            )?;
            scheduler
                .schedule(&maintenance.session_token_sweep.cron, Arc::new(sweep))
                .await?;
        }

        if maintenance.job_history_sweep.enabled {
            let sweep = JobHistorySweep::new(self.queue.clone(), &maintenance.job_history_sweep)?;
            scheduler
                .schedule(&maintenance.job_history_sweep.cron, Arc::new(sweep))
                .await?;
        }

        Ok(scheduler)
    }

    /// Release outbound clients and close the database pool
    pub async fn close_external_clients(&self) -> AppResult<()> {
        if let Some(db) = &self.db {
            db.close().await;
        }
        tracing::debug!("External clients released");
        Ok(())
    }
}
