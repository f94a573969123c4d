//! Block stages and their residency contract.

use thiserror::Error;

/// Error raised inside a stage implementation (fetch, evict, or compute).
#[derive(Debug, Error)]
#[error("{0}")]
pub struct StageError(String);

impl StageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// One block of an ordered sequential computation over evolving state `S`.
///
/// Residency contract:
/// - A block starts in the reserved tier (slow, capacity N).
/// - `fetch` materializes it into a resident slot (fast tier, 2 slots per
///   active pipeline); called on the transfer lane, possibly concurrently
///   with another block's `compute`.
/// - `compute` is only ever called after that block's own `fetch` has been
///   confirmed complete, and consumes the running state of its predecessor.
/// - `evict` releases the slot back to the reserved tier immediately after
///   `compute` returns; the reserved tier is sized and prepared to make this
///   transfer cheap in both directions.
pub trait Stage<S>: Send + Sync {
    fn fetch(&self) -> Result<(), StageError>;

    fn evict(&self) -> Result<(), StageError>;

    fn compute(&self, state: S) -> Result<S, StageError>;
}
