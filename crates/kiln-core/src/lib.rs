//! kiln-core
//!
//! Job execution engine for a single-owner compute backend: FIFO submission
//! with durable-enough in-memory status tracking, one sequential worker,
//! cooperative cancellation with a per-job wall-clock ceiling, bounded
//! history retention, and a streaming block pipeline that keeps a 2-slot
//! resident window over models too large for the fast tier.
//!
//! # Module layout
//! - **domain**: IDs, statuses, records, serializable views
//! - **store**: the task registry and its retention policy
//! - **exec**: queue, sequential worker, checkpoints, progress sink
//! - **work**: the `WorkFunction` trait, registry, and reclamation hook
//! - **stream**: the 2-slot streaming block pipeline
//! - **engine**: the public facade (`EngineBuilder` / `Engine`)

pub mod domain;
pub mod engine;
pub mod error;
pub mod exec;
pub mod store;
pub mod stream;
pub mod work;

pub use domain::{StatusCounts, Submission, TaskId, TaskStatus, TaskType, TaskView};
pub use engine::{DEFAULT_JOB_TIMEOUT, Engine, EngineBuilder, EngineConfig};
pub use error::EngineError;
pub use exec::{Checkpoint, ProgressSink, StopReason};
pub use store::RetentionPolicy;
pub use work::{JobContext, JobError, Reclaimer, WorkFunction};
