//! # taskhub-entity
//!
//! Entity models for TaskHub. Every struct in this crate represents a
//! database table row or a domain value object. Database entities derive
//! `sqlx::FromRow`.

pub mod job;
pub mod retention;

pub use job::{EnqueueOptions, Job, JobState, NewJob};
pub use retention::RetentionTarget;
