//! Match engine.
//!
//! The [`scheduler::Scheduler`] keeps the [`driver::TickDriver`] firing
//! roughly every tick period; the driver ingests prices, advances the global
//! tick and fans out to the per-game [`tick::TickEngine`] pipeline.

mod closeout;
mod driver;
mod scheduler;
mod tick;

pub use driver::TickDriver;
pub use scheduler::{ScheduleStatus, Scheduler};
pub use tick::TickEngine;

use crate::store::StoreError;

/// Infrastructure failure during a game tick. Domain-level failures never
/// surface here; they become order-status transitions instead.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
