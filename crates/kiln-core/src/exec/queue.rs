//! Job queue: unbounded FIFO feeding the single worker.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::domain::TaskId;
use crate::error::EngineError;
use crate::work::WorkFunction;

/// One queue entry. The work function is resolved at submission time, so the
/// worker never consults the registry.
pub(crate) enum QueueItem {
    Run {
        id: TaskId,
        params: serde_json::Value,
        work: Arc<dyn WorkFunction>,
    },

    /// Distinguished sentinel: the worker drains everything ahead of it,
    /// then exits its loop.
    Shutdown,
}

/// Sender half of the job queue.
///
/// Unbounded by design: the engine provides no admission control beyond
/// FIFO ordering. `submit`/`shutdown` never block.
pub(crate) struct JobQueue {
    tx: mpsc::UnboundedSender<QueueItem>,
}

impl JobQueue {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<QueueItem>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub(crate) fn submit(
        &self,
        id: TaskId,
        params: serde_json::Value,
        work: Arc<dyn WorkFunction>,
    ) -> Result<(), EngineError> {
        self.tx
            .send(QueueItem::Run { id, params, work })
            .map_err(|_| EngineError::QueueClosed)
    }

    pub(crate) fn shutdown(&self) -> Result<(), EngineError> {
        self.tx
            .send(QueueItem::Shutdown)
            .map_err(|_| EngineError::QueueClosed)
    }
}
