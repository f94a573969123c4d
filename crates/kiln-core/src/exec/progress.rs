//! Progress reporting from inside a running job.

use std::sync::Arc;

use crate::domain::TaskId;
use crate::store::{TaskPatch, TaskStore};

/// Sink a work function calls to publish progress and a status line.
///
/// The store clamps progress into 0.0..=1.0 and keeps it monotonically
/// non-decreasing, so a noisy work function cannot make the reported
/// fraction go backwards. Writes to a terminal record are dropped.
#[derive(Clone)]
pub struct ProgressSink {
    store: Arc<TaskStore>,
    id: TaskId,
}

impl ProgressSink {
    pub fn new(store: Arc<TaskStore>, id: TaskId) -> Self {
        Self { store, id }
    }

    pub fn report(&self, fraction: f64, message: impl Into<String>) {
        self.store.update(
            self.id,
            TaskPatch {
                progress: Some(fraction),
                message: Some(message.into()),
            },
        );
    }

    /// Progress-only update, keeping the current message.
    pub fn fraction(&self, fraction: f64) {
        self.store.update(
            self.id,
            TaskPatch {
                progress: Some(fraction),
                message: None,
            },
        );
    }
}
