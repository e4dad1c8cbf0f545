//! # taskhub-api
//!
//! The network listener for TaskHub built on Axum.
//!
//! Exposes the health endpoint, per-queue statistics, and the enqueue
//! endpoint consumed by other services.

pub mod dto;
pub mod error;
pub mod handlers;
pub mod router;
pub mod state;

pub use error::ApiError;
pub use router::build_router;
pub use state::AppState;
