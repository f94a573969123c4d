//! Serializable snapshots of task records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::RESULT_PREVIEW_LEN;
use super::{TaskId, TaskRecord, TaskStatus, TaskType};

/// Point-in-time snapshot of one record, as handed to callers.
///
/// `queue_position` is the 0-indexed position among active records ordered
/// by `created_at`; `None` for terminal records. `active` mirrors
/// `status.is_active()` so callers don't need to know the status taxonomy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskView {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub progress: f64,
    pub message: String,
    pub result: String,
    pub error: String,
    pub task_type: TaskType,
    pub task_label: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cancel_requested: bool,
    pub active: bool,
    pub queue_position: Option<usize>,
}

impl TaskView {
    pub fn of(record: &TaskRecord, label: &str, queue_position: Option<usize>) -> Self {
        Self {
            task_id: record.id,
            status: record.status,
            progress: record.progress,
            message: record.message.clone(),
            result: record.result.clone(),
            error: record.error.clone(),
            task_type: record.task_type.clone(),
            task_label: label.to_string(),
            created_at: record.created_at,
            started_at: record.started_at,
            finished_at: record.finished_at,
            cancel_requested: record.cancel_requested(),
            active: record.status.is_active(),
            queue_position,
        }
    }

    /// List views truncate long results to keep payloads small.
    pub fn with_result_preview(mut self) -> Self {
        if self.result.len() > RESULT_PREVIEW_LEN {
            self.result.truncate(RESULT_PREVIEW_LEN);
            self.result.push_str("...");
        }
        self
    }
}

/// Returned by `submit`: the handle plus a queue-position hint.
///
/// The position is a snapshot count of active predecessors at submission
/// time, not a guarantee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub task_id: TaskId,
    pub queue_position: usize,
}
