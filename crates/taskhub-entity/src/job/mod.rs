//! Background job entities.

pub mod model;
pub mod status;

pub use model::{EnqueueOptions, Job, NewJob};
pub use status::JobState;
