//! Task store: registry of task records, guarded by a single lock.

mod retention;

pub use retention::RetentionPolicy;

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::domain::{StatusCounts, TaskId, TaskRecord, TaskStatus, TaskType, TaskView};
use crate::error::EngineError;

/// Partial update for an active record (atomic merge under the store lock).
#[derive(Debug, Default, Clone)]
pub struct TaskPatch {
    pub progress: Option<f64>,
    pub message: Option<String>,
}

/// What the worker should do with a freshly dequeued handle.
#[derive(Debug)]
pub enum DequeueDecision {
    /// Transitioned to Processing; poll this flag at checkpoints.
    Run { cancel: Arc<AtomicBool> },

    /// Cancelled while still queued; skip the work function entirely.
    SkipCancelled,

    /// Record purged or removed between enqueue and dequeue.
    Missing,
}

/// Registry of task records and their lifecycle.
///
/// Design:
/// - One `std::sync::Mutex` over the whole map. Hold time is limited to
///   field reads/merges, never across a job's execution, so status queries
///   never block on an in-flight job. A plain mutex (not the async one)
///   keeps every operation callable from both async and blocking contexts.
/// - Lifecycle edges are enforced here: terminal records are never mutated,
///   only removed.
pub struct TaskStore {
    records: Mutex<HashMap<TaskId, TaskRecord>>,
    retention: RetentionPolicy,
}

impl TaskStore {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            retention,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TaskId, TaskRecord>> {
        // Lock poisoning only happens if a thread panicked mid-mutation;
        // every critical section here is a field merge, so recover the map.
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a new Queued record. Returns the handle and the number of
    /// active predecessors (the 0-indexed queue-position hint).
    pub fn create(&self, task_type: TaskType) -> (TaskId, usize) {
        let id = TaskId::generate();
        let record = TaskRecord::new(id, task_type);
        let mut records = self.lock();
        let position = records.values().filter(|r| r.status.is_active()).count();
        records.insert(id, record);
        (id, position)
    }

    pub fn get(&self, id: TaskId) -> Option<TaskRecord> {
        self.lock().get(&id).cloned()
    }

    /// Merge a partial update into an active record. No-op for unknown
    /// handles and for terminal records. Progress never decreases.
    pub fn update(&self, id: TaskId, patch: TaskPatch) {
        let mut records = self.lock();
        let Some(record) = records.get_mut(&id) else {
            return;
        };
        if record.status.is_terminal() {
            return;
        }
        if let Some(progress) = patch.progress {
            record.progress = record.progress.max(progress.clamp(0.0, 1.0));
        }
        if let Some(message) = patch.message {
            record.message = message;
        }
    }

    /// Request cancellation. Queued records transition directly to
    /// Cancelled; Processing records only get the flag set (the job stops at
    /// its next checkpoint). Idempotent on terminal records: returns the
    /// current record unchanged.
    pub fn cancel(&self, id: TaskId) -> Result<TaskRecord, EngineError> {
        let mut records = self.lock();
        let record = records.get_mut(&id).ok_or(EngineError::NotFound(id))?;
        if record.status.is_terminal() {
            return Ok(record.clone());
        }
        record.request_cancel();
        if record.status == TaskStatus::Queued {
            record.mark_cancelled("Cancelled while queued.".to_string());
        }
        Ok(record.clone())
    }

    /// Remove a terminal record. Active records are rejected.
    pub fn remove(&self, id: TaskId) -> Result<(), EngineError> {
        let mut records = self.lock();
        let record = records.get(&id).ok_or(EngineError::NotFound(id))?;
        if record.status.is_active() {
            return Err(EngineError::TaskActive(id));
        }
        records.remove(&id);
        Ok(())
    }

    /// Drop a record regardless of state. Only for unwinding a submission
    /// whose enqueue failed; callers go through `remove` otherwise.
    pub(crate) fn discard(&self, id: TaskId) {
        self.lock().remove(&id);
    }

    /// Worker dequeue: re-check cancel-while-queued, then move to
    /// Processing and hand out the cancel flag.
    pub fn begin_processing(&self, id: TaskId) -> DequeueDecision {
        let mut records = self.lock();
        let Some(record) = records.get_mut(&id) else {
            return DequeueDecision::Missing;
        };
        if record.status == TaskStatus::Cancelled {
            return DequeueDecision::SkipCancelled;
        }
        if record.cancel_requested() {
            // `cancel` normally does this transition itself; cover the case
            // where only the flag was set.
            if record.status == TaskStatus::Queued {
                record.mark_cancelled("Cancelled while queued.".to_string());
            }
            return DequeueDecision::SkipCancelled;
        }
        record.mark_processing();
        DequeueDecision::Run {
            cancel: record.cancel_flag(),
        }
    }

    /// Stamp the timeout message on a still-running record (fired from the
    /// checkpoint the moment the ceiling is crossed).
    pub fn note_timeout(&self, id: TaskId, ceiling_secs: u64) {
        self.update(
            id,
            TaskPatch {
                progress: None,
                message: Some(format!("Timed out after {ceiling_secs}s")),
            },
        );
    }

    /// Terminal transition out of Processing. Ignores records that already
    /// reached a terminal state (e.g. cancelled-while-queued).
    pub fn finish(&self, id: TaskId, finish: impl FnOnce(&mut TaskRecord)) {
        let mut records = self.lock();
        if let Some(record) = records.get_mut(&id)
            && record.status == TaskStatus::Processing
        {
            finish(record);
            debug_assert!(record.status.is_terminal());
        }
    }

    /// Full view of one record, with its live queue position if active.
    pub fn view(&self, id: TaskId, label: &str) -> Result<TaskView, EngineError> {
        let records = self.lock();
        let record = records.get(&id).ok_or(EngineError::NotFound(id))?;
        let position = Self::position_of(&records, record);
        Ok(TaskView::of(record, label, position))
    }

    /// All non-purged records, most-recent-first, results truncated to a
    /// preview, annotated with active flag and queue position.
    pub fn list(&self, label_of: impl Fn(&TaskType) -> String) -> Vec<TaskView> {
        let records = self.lock();
        let mut views: Vec<TaskView> = records
            .values()
            .map(|r| {
                let position = Self::position_of(&records, r);
                TaskView::of(r, &label_of(&r.task_type), position).with_result_preview()
            })
            .collect();
        views.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        views
    }

    pub fn counts(&self) -> StatusCounts {
        let records = self.lock();
        let mut counts = StatusCounts::default();
        for record in records.values() {
            match record.status {
                TaskStatus::Queued => counts.queued += 1,
                TaskStatus::Processing => counts.processing += 1,
                TaskStatus::Done => counts.done += 1,
                TaskStatus::Error => counts.error += 1,
                TaskStatus::Cancelled => counts.cancelled += 1,
                TaskStatus::Timeout => counts.timeout += 1,
            }
        }
        counts
    }

    /// Apply the retention policy. Returns the number of evicted records.
    pub fn purge(&self) -> usize {
        let mut records = self.lock();
        let evict = self.retention.select_evictions(records.values(), Utc::now());
        for id in &evict {
            records.remove(id);
        }
        evict.len()
    }

    fn position_of(records: &HashMap<TaskId, TaskRecord>, record: &TaskRecord) -> Option<usize> {
        if !record.status.is_active() {
            return None;
        }
        let position = records
            .values()
            .filter(|r| r.status.is_active() && r.created_at < record.created_at)
            .count();
        Some(position)
    }
}
