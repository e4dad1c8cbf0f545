//! # taskhub-database
//!
//! PostgreSQL connection management, the storage traits the job engine and
//! sweeps are written against, and their Postgres and in-memory
//! implementations.

pub mod connection;
pub mod migration;
pub mod repositories;
pub mod store;

pub use connection::{DatabasePool, PoolStatus};
pub use store::{FailureTransition, JobStore, QueueStateCount, RetentionStore};
