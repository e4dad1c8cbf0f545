//! PostgreSQL implementations of the storage traits.

pub mod job;
pub mod retention;

pub use job::JobRepository;
pub use retention::RetentionRepository;
