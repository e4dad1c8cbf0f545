//! PostgreSQL pool shared by job handlers, sweeps and request handling.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, warn};

use taskhub_core::config::DatabaseConfig;
use taskhub_core::error::{AppError, ErrorKind};
use taskhub_core::result::AppResult;

use crate::migration::run_migrations;

/// Snapshot of the pool as reported by the readiness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    /// Open connections.
    pub size: u32,
    /// Connections not checked out.
    pub idle: usize,
    /// Configured upper bound.
    pub max: u32,
}

impl PoolStatus {
    /// Connections currently checked out.
    pub fn in_use(&self) -> usize {
        (self.size as usize).saturating_sub(self.idle)
    }
}

/// Fixed-size connection pool. Never auto-scaled.
#[derive(Debug, Clone)]
pub struct DatabasePool {
    pool: PgPool,
    max: u32,
}

impl DatabasePool {
    /// Connect and bring the schema up to date.
    ///
    /// The pool is closed again when migrations fail.
    pub async fn open(config: &DatabaseConfig) -> AppResult<Self> {
        let db = Self::connect(config).await?;
        if let Err(e) = run_migrations(&db.pool).await {
            db.close().await;
            return Err(e);
        }
        Ok(db)
    }

    /// Connect without touching the schema.
    pub async fn connect(config: &DatabaseConfig) -> AppResult<Self> {
        info!(
            url = %redact_url(&config.url),
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Opening job store pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(config.idle_timeout())
            .connect(&config.url)
            .await
            .map_err(|e| {
                AppError::with_source(
                    ErrorKind::Database,
                    format!("Job store unreachable at {}", redact_url(&config.url)),
                    e,
                )
            })?;

        Ok(Self {
            pool,
            max: config.max_connections,
        })
    }

    /// The underlying sqlx pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Current pool occupancy.
    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
            max: self.max,
        }
    }

    /// Round-trip a trivial query, returning its latency.
    pub async fn ping(&self) -> AppResult<Duration> {
        let started = Instant::now();
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Job store ping failed", e))?;
        Ok(started.elapsed())
    }

    /// Close every connection, waiting for checked-out ones to return.
    pub async fn close(&self) {
        let status = self.status();
        if status.in_use() > 0 {
            warn!(in_use = status.in_use(), "Closing pool with connections checked out");
        }
        self.pool.close().await;
        info!("Job store pool closed");
    }
}

/// Replace the password in a connection URL with `****`.
fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((userinfo, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match userinfo.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:****@{host}"),
        None => url.to_string(),
    }
}
