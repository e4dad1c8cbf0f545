//! TaskHub server: wires the job queue engine, the cron scheduler and the
//! network listener together under one lifecycle controller.

pub mod context;
pub mod lifecycle;
pub mod server;
pub mod shutdown;

pub use context::{AppContext, ExternalClients};
pub use lifecycle::{Lifecycle, ShutdownReport, StepReport};
pub use server::{configure, run, serve};
