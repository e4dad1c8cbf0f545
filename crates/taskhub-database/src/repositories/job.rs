//! Job repository implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use taskhub_core::error::{AppError, ErrorKind};
use taskhub_core::result::AppResult;
use taskhub_entity::job::{Job, NewJob};

use crate::store::{FailureTransition, JobStore, QueueStateCount};

/// Repository for background job persistence and queue operations.
#[derive(Debug, Clone)]
pub struct JobRepository {
    pool: PgPool,
}

impl JobRepository {
    /// Create a new job repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for JobRepository {
    async fn insert(&self, data: &NewJob, now: DateTime<Utc>) -> AppResult<Job> {
        sqlx::query_as::<_, Job>(
            "INSERT INTO jobs (id, queue, kind, payload, state, attempts, max_attempts, scheduled_at, created_at) \
             VALUES ($1, $2, $3, $4, 'available', 0, $5, $6, $7) RETURNING *",
        )
        .bind(Uuid::now_v7())
        .bind(&data.queue)
        .bind(&data.kind)
        .bind(&data.payload)
        .bind(data.max_attempts)
        .bind(data.scheduled_at)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to create job", e))
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Job>> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find job", e))
    }

    /// Claim the next due job of a queue (SKIP LOCKED for concurrency).
    async fn claim_next(
        &self,
        queue: &str,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Job>> {
        sqlx::query_as::<_, Job>(
            "UPDATE jobs SET state = 'running', attempted_at = $3, heartbeat_at = $3, worker_id = $2 \
             WHERE id = ( \
                SELECT id FROM jobs \
                WHERE queue = $1 AND state = 'available' AND scheduled_at <= $3 \
                ORDER BY scheduled_at ASC, seq ASC \
                LIMIT 1 \
                FOR UPDATE SKIP LOCKED \
             ) RETURNING *",
        )
        .bind(queue)
        .bind(worker_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to claim job", e))
    }

    async fn heartbeat(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<bool> {
        let result =
            sqlx::query("UPDATE jobs SET heartbeat_at = $2 WHERE id = $1 AND state = 'running'")
                .bind(id)
                .bind(now)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    AppError::with_source(ErrorKind::Database, "Failed to record heartbeat", e)
                })?;
        Ok(result.rows_affected() > 0)
    }

    async fn complete(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET state = 'completed', finalized_at = $2 \
             WHERE id = $1 AND state = 'running'",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to complete job", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        transition: FailureTransition,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let query = match transition {
            FailureTransition::Retry { at } => sqlx::query(
                "UPDATE jobs SET state = 'available', attempts = attempts + 1, last_error = $2, \
                 scheduled_at = $3 \
                 WHERE id = $1 AND state = 'running'",
            )
            .bind(id)
            .bind(error)
            .bind(at),
            FailureTransition::Discard => sqlx::query(
                "UPDATE jobs SET state = 'discarded', attempts = attempts + 1, last_error = $2, \
                 finalized_at = $3 \
                 WHERE id = $1 AND state = 'running'",
            )
            .bind(id)
            .bind(error)
            .bind(now),
            FailureTransition::Error => sqlx::query(
                "UPDATE jobs SET state = 'errored', attempts = attempts + 1, last_error = $2, \
                 finalized_at = $3 \
                 WHERE id = $1 AND state = 'running'",
            )
            .bind(id)
            .bind(error)
            .bind(now),
        };

        let result = query.execute(&self.pool).await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to record job failure", e)
        })?;
        Ok(result.rows_affected() > 0)
    }

    async fn release(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET state = 'available', scheduled_at = $2 \
             WHERE id = $1 AND state = 'running'",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to release job", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn expire_heartbeat(&self, id: Uuid, worker_id: &str) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET heartbeat_at = $3 \
             WHERE id = $1 AND worker_id = $2 AND state = 'running'",
        )
        .bind(id)
        .bind(worker_id)
        .bind(DateTime::<Utc>::UNIX_EPOCH)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to expire job heartbeat", e)
        })?;
        Ok(result.rows_affected() > 0)
    }

    async fn recover_stale(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET state = 'available', scheduled_at = $2 \
             WHERE state = 'running' \
             AND COALESCE(heartbeat_at, attempted_at, created_at) < $1",
        )
        .bind(stale_before)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to recover stale jobs", e)
        })?;
        Ok(result.rows_affected())
    }

    async fn pending_kinds(&self) -> AppResult<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT kind FROM jobs WHERE state IN ('available', 'running') ORDER BY kind",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to list job kinds", e))
    }

    async fn count_by_queue_and_state(&self) -> AppResult<Vec<QueueStateCount>> {
        sqlx::query_as::<_, QueueStateCount>(
            "SELECT queue, state, COUNT(*) AS count FROM jobs GROUP BY queue, state ORDER BY queue, state",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to count jobs", e))
    }

    async fn purge_finished(&self, before: DateTime<Utc>, limit: i64) -> AppResult<u64> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE id IN ( \
                SELECT id FROM jobs \
                WHERE state IN ('completed', 'errored', 'discarded') AND finalized_at < $1 \
                LIMIT $2 \
             )",
        )
        .bind(before)
        .bind(limit)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to purge jobs", e))?;
        Ok(result.rows_affected())
    }
}
