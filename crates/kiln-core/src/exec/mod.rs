//! Execution layer: queue, sequential worker, cancellation checkpoints,
//! progress reporting.

mod checkpoint;
mod progress;
pub(crate) mod queue;
pub(crate) mod worker;

pub use checkpoint::{Checkpoint, StopReason};
pub use progress::ProgressSink;
