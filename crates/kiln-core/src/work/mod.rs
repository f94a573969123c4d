//! Work functions: the pluggable compute side of the engine.
//!
//! A work function is registered per task type and receives the submitted
//! parameters plus a [`JobContext`] carrying the cancellation checkpoint and
//! the progress sink. The concrete model-execution stack (image synthesis,
//! document-understanding inference, ...) lives behind this trait; the
//! engine never sees it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::TaskType;
use crate::error::EngineError;
use crate::exec::{Checkpoint, ProgressSink};
use crate::stream::PipelineError;

/// Handed to a work function for the duration of one job.
#[derive(Clone)]
pub struct JobContext {
    /// Poll at every checkpoint: before each major phase, and once per
    /// iteration of any iterative phase. On `true`, unwind immediately with
    /// [`JobError::Interrupted`].
    pub checkpoint: Checkpoint,

    /// Publish monotonically increasing progress fractions.
    pub progress: ProgressSink,
}

/// How a job ended, from the work function's point of view.
///
/// `Interrupted` is the distinguished "stopped at a checkpoint" marker; the
/// executor decides afterwards whether it counts as Cancelled or Timeout.
/// Any other failure is `Failed` with the message captured verbatim.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("interrupted at a checkpoint")]
    Interrupted,

    #[error("{0}")]
    Failed(String),
}

impl JobError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

impl From<PipelineError> for JobError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Interrupted => JobError::Interrupted,
            other => JobError::Failed(other.to_string()),
        }
    }
}

/// One registered job implementation.
///
/// `execute` returns the opaque artifact reference (e.g. an output path) on
/// success. Implementations must poll `ctx.checkpoint` as documented there.
#[async_trait]
pub trait WorkFunction: Send + Sync {
    /// Human-readable label for status views (e.g. "Text-to-Image").
    fn label(&self) -> &str {
        ""
    }

    async fn execute(&self, params: serde_json::Value, ctx: JobContext)
    -> Result<String, JobError>;
}

/// Releases transient fast-tier allocations held by the compute backend.
///
/// Invoked by the executor after every job outcome, normal or abnormal, so
/// one job's leftovers never bleed into the next.
pub trait Reclaimer: Send + Sync {
    fn reclaim(&self);
}

/// Default reclaimer for backends with nothing to release.
pub struct NoopReclaimer;

impl Reclaimer for NoopReclaimer {
    fn reclaim(&self) {}
}

/// Registry mapping task types to work functions.
///
/// Built during initialization (mutable), then shared immutably with the
/// engine — no locks at dispatch time. Resolution happens once, at
/// submission.
#[derive(Default)]
pub struct WorkRegistry {
    entries: HashMap<TaskType, Arc<dyn WorkFunction>>,
}

impl WorkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        task_type: TaskType,
        work: Arc<dyn WorkFunction>,
    ) -> Result<(), EngineError> {
        if self.entries.contains_key(&task_type) {
            return Err(EngineError::DuplicateWorkFunction(task_type));
        }
        self.entries.insert(task_type, work);
        Ok(())
    }

    pub fn resolve(&self, task_type: &TaskType) -> Option<Arc<dyn WorkFunction>> {
        self.entries.get(task_type).cloned()
    }

    pub fn label_of(&self, task_type: &TaskType) -> String {
        self.entries
            .get(task_type)
            .map(|w| w.label().to_string())
            .unwrap_or_default()
    }

    pub fn registered_types(&self) -> Vec<TaskType> {
        self.entries.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nop;

    #[async_trait]
    impl WorkFunction for Nop {
        fn label(&self) -> &str {
            "No-op"
        }

        async fn execute(
            &self,
            _params: serde_json::Value,
            _ctx: JobContext,
        ) -> Result<String, JobError> {
            Ok(String::new())
        }
    }

    #[test]
    fn register_then_resolve() {
        let mut reg = WorkRegistry::new();
        reg.register(TaskType::new("nop"), Arc::new(Nop)).unwrap();
        assert!(reg.resolve(&TaskType::new("nop")).is_some());
        assert!(reg.resolve(&TaskType::new("other")).is_none());
        assert_eq!(reg.label_of(&TaskType::new("nop")), "No-op");
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut reg = WorkRegistry::new();
        reg.register(TaskType::new("nop"), Arc::new(Nop)).unwrap();
        let err = reg
            .register(TaskType::new("nop"), Arc::new(Nop))
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateWorkFunction(_)));
    }

    #[test]
    fn pipeline_interruption_maps_to_the_interrupted_marker() {
        let err: JobError = PipelineError::Interrupted.into();
        assert!(matches!(err, JobError::Interrupted));

        let err: JobError = PipelineError::Compute {
            index: 3,
            message: "nan".into(),
        }
        .into();
        assert!(matches!(err, JobError::Failed(_)));
    }
}
