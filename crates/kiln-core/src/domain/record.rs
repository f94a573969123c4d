//! Task record: the single source of truth for one task's lifecycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};

use super::{TaskId, TaskStatus, TaskType};

/// Length at which `result` is truncated in list views.
pub const RESULT_PREVIEW_LEN: usize = 200;

/// One tracked task, from submission to a terminal state.
///
/// Design:
/// - Lives inside the store's map; all mutation happens under the store lock.
/// - The cancel flag is shared out as an `Arc<AtomicBool>` so a running job
///   can poll it without touching the lock. It is the only cross-thread
///   signal that reaches into a job.
/// - Once a terminal state is reached the record is never mutated again,
///   only removed.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: TaskId,
    pub status: TaskStatus,

    /// 0.0..=1.0, monotonically non-decreasing while active.
    pub progress: f64,

    /// Human-readable status line.
    pub message: String,

    /// Opaque artifact reference (e.g. an output path), empty until Done.
    pub result: String,

    /// Populated only on Error / Timeout.
    pub error: String,

    pub task_type: TaskType,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    cancel: Arc<AtomicBool>,
}

impl TaskRecord {
    pub fn new(id: TaskId, task_type: TaskType) -> Self {
        Self {
            id,
            status: TaskStatus::Queued,
            progress: 0.0,
            message: "Queued.".to_string(),
            result: String::new(),
            error: String::new(),
            task_type,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for polling the cancel flag from outside the lock.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Queued -> Processing, stamping `started_at`.
    pub fn mark_processing(&mut self) {
        self.status = TaskStatus::Processing;
        self.started_at = Some(Utc::now());
        self.progress = 0.02;
        self.message = "Starting...".to_string();
    }

    pub fn mark_done(&mut self, result: String, elapsed_secs: f64) {
        self.status = TaskStatus::Done;
        self.progress = 1.0;
        self.result = result;
        self.finished_at = Some(Utc::now());
        self.message = format!("Completed in {elapsed_secs:.1}s");
    }

    pub fn mark_error(&mut self, error: String, elapsed_secs: f64) {
        self.status = TaskStatus::Error;
        self.message = format!("Error after {elapsed_secs:.1}s: {error}");
        self.error = error;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_cancelled(&mut self, message: String) {
        self.status = TaskStatus::Cancelled;
        self.message = message;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_timeout(&mut self, ceiling_secs: u64, elapsed_secs: f64) {
        self.status = TaskStatus::Timeout;
        self.message = format!("Timed out after {elapsed_secs:.0}s");
        self.error = format!("Task exceeded {ceiling_secs}s limit");
        self.finished_at = Some(Utc::now());
    }
}
