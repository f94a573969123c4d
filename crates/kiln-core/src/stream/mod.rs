//! Streaming block pipeline.
//!
//! Runs an ordered chain of compute blocks whose combined resident footprint
//! would exceed the fast memory budget, by keeping only a 2-slot window
//! resident and streaming the rest through a dedicated transfer lane that
//! overlaps with compute. Peak fast-tier usage is O(constant) — two block
//! slots plus whatever small always-resident pieces the backend keeps —
//! instead of O(N); the per-block transfer latency is hidden behind the
//! previous block's computation.

mod lane;
mod pipeline;
mod stage;

pub use pipeline::{PipelineStats, RESIDENT_SLOTS, StreamingPipeline, run_two_family};
pub use stage::{Stage, StageError};

use thiserror::Error;

/// How a pipeline run can fail. Any error aborts the whole run immediately:
/// there is no partial recovery or resume-from-block capability, and the
/// caller must perform a full reclamation pass afterwards.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The cancellation checkpoint fired between blocks.
    #[error("interrupted at a block checkpoint")]
    Interrupted,

    /// A block could not be materialized into (or released from) fast memory.
    #[error("transfer of block {index} failed: {message}")]
    Transfer { index: usize, message: String },

    /// A block's computation failed.
    #[error("block {index} failed: {message}")]
    Compute { index: usize, message: String },

    /// The transfer lane thread could not be started.
    #[error("transfer lane failed to start: {0}")]
    LaneSpawn(String),

    /// The transfer lane thread went away.
    #[error("transfer lane disconnected")]
    LaneClosed,
}
