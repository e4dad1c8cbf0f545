//! # taskhub-core
//!
//! Core crate for TaskHub. Contains configuration schemas, the canonical
//! clock used for every persisted timestamp, lifecycle stages, and the
//! unified error system.
//!
//! This crate has **no** internal dependencies on other TaskHub crates.

pub mod clock;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod result;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{AppError, ErrorKind};
pub use lifecycle::Stage;
pub use result::AppResult;
