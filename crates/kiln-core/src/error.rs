use thiserror::Error;

use crate::domain::{TaskId, TaskType};

/// Errors surfaced by the engine's public operations.
///
/// Job-level failures (work function errors, timeouts, cancellations) are not
/// here: they fold into the task record's terminal state instead of
/// propagating to the caller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("cannot remove active task {0}")]
    TaskActive(TaskId),

    #[error("no work function registered for task_type={0}")]
    UnknownTaskType(TaskType),

    #[error("duplicate work function for task_type={0}")]
    DuplicateWorkFunction(TaskType),

    #[error("engine is shutting down; queue closed")]
    QueueClosed,
}
