//! Task lifecycle state machine.

use serde::{Deserialize, Serialize};

/// Task status.
///
/// State transitions:
/// - Queued -> Processing -> Done
/// - Queued -> Processing -> Error
/// - Queued -> Processing -> Cancelled | Timeout (cooperative stop)
/// - Queued -> Cancelled (cancel before the worker dequeues)
///
/// The four end states are terminal: no outgoing edges. Using an enum keeps
/// matching exhaustive and makes invalid states unrepresentable.
///
/// Serializes SCREAMING_SNAKE_CASE to match the wire shape the front end
/// expects: QUEUED / PROCESSING / DONE / ERROR / CANCELLED / TIMEOUT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Waiting in the FIFO for the worker.
    Queued,

    /// Currently executing on the worker.
    Processing,

    /// Completed with a result.
    Done,

    /// Work function failed.
    Error,

    /// Stopped at a checkpoint after a cancel request.
    Cancelled,

    /// Stopped at a checkpoint after exceeding the time ceiling.
    Timeout,
}

impl TaskStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Done | TaskStatus::Error | TaskStatus::Cancelled | TaskStatus::Timeout
        )
    }

    /// Is this task still occupying the queue or the worker?
    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::Queued | TaskStatus::Processing)
    }

    /// Whether `self -> next` is a legal edge of the lifecycle.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        match self {
            TaskStatus::Queued => matches!(
                next,
                TaskStatus::Processing | TaskStatus::Cancelled
            ),
            TaskStatus::Processing => next.is_terminal(),
            _ => false,
        }
    }
}

/// Per-status counters for observability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusCounts {
    pub queued: usize,
    pub processing: usize,
    pub done: usize,
    pub error: usize,
    pub cancelled: usize,
    pub timeout: usize,
}

impl StatusCounts {
    pub fn active(&self) -> usize {
        self.queued + self.processing
    }
}
