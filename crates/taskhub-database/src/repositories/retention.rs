//! Batched TTL deletes over time-windowed tables.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use taskhub_core::error::{AppError, ErrorKind};
use taskhub_core::result::AppResult;
use taskhub_entity::retention::RetentionTarget;

use crate::store::RetentionStore;

/// Repository deleting expired rows from retention-managed tables.
#[derive(Debug, Clone)]
pub struct RetentionRepository {
    pool: PgPool,
}

impl RetentionRepository {
    /// Create a new retention repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RetentionStore for RetentionRepository {
    async fn delete_batch_before(
        &self,
        target: RetentionTarget,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<u64> {
        // Table and column come from the closed RetentionTarget enum.
        let sql = format!(
            "DELETE FROM {table} WHERE ctid IN ( \
                SELECT ctid FROM {table} WHERE {column} < $1 LIMIT $2 \
             )",
            table = target.table(),
            column = target.timestamp_column(),
        );

        let result = sqlx::query(&sql)
            .bind(cutoff)
            .bind(limit)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(
                    ErrorKind::Database,
                    format!("Failed to sweep {target}"),
                    e,
                )
            })?;
        Ok(result.rows_affected())
    }
}
