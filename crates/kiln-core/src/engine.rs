//! Engine: the public facade wiring store, queue, and worker together.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::domain::{StatusCounts, Submission, TaskId, TaskType, TaskView};
use crate::error::EngineError;
use crate::exec::queue::JobQueue;
use crate::exec::worker::worker_loop;
use crate::store::{RetentionPolicy, TaskStore};
use crate::work::{NoopReclaimer, Reclaimer, WorkFunction, WorkRegistry};

/// Per-job wall-clock ceiling applied when the config does not override it.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Wall-clock ceiling per job, measured from the moment the job starts
    /// processing (queue wait does not count).
    pub job_timeout: Duration,
    pub retention: RetentionPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            job_timeout: DEFAULT_JOB_TIMEOUT,
            retention: RetentionPolicy::default(),
        }
    }
}

/// Builds an [`Engine`].
///
/// Work functions are registered up front; once `start` is called the
/// registry is frozen and shared without locks.
///
/// ```ignore
/// let engine = EngineBuilder::new()
///     .register("txt2img", Arc::new(RenderWork::new(backend)))?
///     .with_config(config)
///     .start();
/// ```
pub struct EngineBuilder {
    config: EngineConfig,
    registry: WorkRegistry,
    reclaimer: Arc<dyn Reclaimer>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            registry: WorkRegistry::new(),
            reclaimer: Arc::new(NoopReclaimer),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Register the work function for one task type. Rejects duplicates.
    pub fn register(
        mut self,
        task_type: impl Into<TaskType>,
        work: Arc<dyn WorkFunction>,
    ) -> Result<Self, EngineError> {
        self.registry.register(task_type.into(), work)?;
        Ok(self)
    }

    /// Install the backend's post-job reclamation hook.
    pub fn with_reclaimer(mut self, reclaimer: Arc<dyn Reclaimer>) -> Self {
        self.reclaimer = reclaimer;
        self
    }

    /// Spawn the single worker and hand back the running engine.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> Engine {
        let store = Arc::new(TaskStore::new(self.config.retention.clone()));
        let (queue, rx) = JobQueue::new();
        let worker = tokio::spawn(worker_loop(
            Arc::clone(&store),
            self.reclaimer,
            self.config.job_timeout,
            rx,
        ));
        tracing::info!(
            timeout_secs = self.config.job_timeout.as_secs(),
            types = ?self.registry.registered_types(),
            "engine started"
        );
        Engine {
            store,
            registry: Arc::new(self.registry),
            queue,
            worker,
        }
    }
}

/// Running job engine: submit, check, cancel, list, remove, shutdown.
///
/// All surface operations are non-blocking with respect to job execution:
/// they only ever take the store lock for a field merge, never for the
/// duration of a job.
pub struct Engine {
    store: Arc<TaskStore>,
    registry: Arc<WorkRegistry>,
    queue: JobQueue,
    worker: JoinHandle<()>,
}

impl Engine {
    /// Enqueue a job. The work function is resolved here, so an unknown
    /// task type is rejected before any record is created.
    pub fn submit(
        &self,
        task_type: impl Into<TaskType>,
        params: serde_json::Value,
    ) -> Result<Submission, EngineError> {
        let task_type = task_type.into();
        let work = self
            .registry
            .resolve(&task_type)
            .ok_or_else(|| EngineError::UnknownTaskType(task_type.clone()))?;
        let (task_id, queue_position) = self.store.create(task_type);
        if let Err(err) = self.queue.submit(task_id, params, work) {
            // The record would otherwise sit Queued forever with no worker
            // to dequeue it.
            self.store.discard(task_id);
            return Err(err);
        }
        tracing::info!(task = %task_id.short(), position = queue_position, "task submitted");
        Ok(Submission {
            task_id,
            queue_position,
        })
    }

    /// Snapshot one record, full result included.
    pub fn check(&self, id: TaskId) -> Result<TaskView, EngineError> {
        let record = self.store.get(id).ok_or(EngineError::NotFound(id))?;
        let label = self.registry.label_of(&record.task_type);
        self.store.view(id, &label)
    }

    /// Request cancellation and return the record as it now stands. A queued
    /// job is terminal immediately; a processing job stops at its next
    /// checkpoint. Idempotent on terminal records.
    pub fn cancel(&self, id: TaskId) -> Result<TaskView, EngineError> {
        self.store.cancel(id)?;
        self.check(id)
    }

    /// All retained records, most recent first, results truncated to a
    /// preview.
    pub fn list(&self) -> Vec<TaskView> {
        let registry = Arc::clone(&self.registry);
        self.store.list(move |t| registry.label_of(t))
    }

    /// Delete a terminal record. Active records are rejected; cancel first.
    pub fn remove(&self, id: TaskId) -> Result<(), EngineError> {
        self.store.remove(id)
    }

    pub fn counts(&self) -> StatusCounts {
        self.store.counts()
    }

    /// Graceful stop: every job already queued still runs to completion,
    /// then the worker exits.
    pub async fn shutdown(self) -> Result<(), EngineError> {
        self.queue.shutdown()?;
        self.worker.await.map_err(|_| EngineError::QueueClosed)?;
        tracing::info!("engine stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskStatus;
    use crate::work::{JobContext, JobError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Completes immediately with a fixed artifact path.
    struct Quick;

    #[async_trait]
    impl WorkFunction for Quick {
        fn label(&self) -> &str {
            "Quick"
        }

        async fn execute(
            &self,
            _params: serde_json::Value,
            ctx: JobContext,
        ) -> Result<String, JobError> {
            ctx.progress.fraction(0.5);
            Ok("outputs/instant.png".to_string())
        }
    }

    /// Blocks until released, recording each execution.
    struct Gated {
        release: Arc<Notify>,
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl WorkFunction for Gated {
        async fn execute(
            &self,
            _params: serde_json::Value,
            _ctx: JobContext,
        ) -> Result<String, JobError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            Ok("done".to_string())
        }
    }

    /// Spins on the checkpoint until told to stop.
    struct Obedient;

    #[async_trait]
    impl WorkFunction for Obedient {
        async fn execute(
            &self,
            _params: serde_json::Value,
            ctx: JobContext,
        ) -> Result<String, JobError> {
            loop {
                if ctx.checkpoint.should_stop() {
                    return Err(JobError::Interrupted);
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        }
    }

    /// Ignores the checkpoint for a stretch, then starts honoring it.
    struct Sluggish {
        first_poll_after: Duration,
    }

    #[async_trait]
    impl WorkFunction for Sluggish {
        async fn execute(
            &self,
            _params: serde_json::Value,
            ctx: JobContext,
        ) -> Result<String, JobError> {
            tokio::time::sleep(self.first_poll_after).await;
            loop {
                if ctx.checkpoint.should_stop() {
                    return Err(JobError::Interrupted);
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        }
    }

    struct Panicky;

    #[async_trait]
    impl WorkFunction for Panicky {
        async fn execute(
            &self,
            _params: serde_json::Value,
            _ctx: JobContext,
        ) -> Result<String, JobError> {
            panic!("backend exploded");
        }
    }

    /// Appends its tag to a shared log, so ordering is observable.
    struct Tagged {
        tag: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl WorkFunction for Tagged {
        async fn execute(
            &self,
            _params: serde_json::Value,
            _ctx: JobContext,
        ) -> Result<String, JobError> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.log.lock().unwrap().push(self.tag);
            Ok(self.tag.to_string())
        }
    }

    struct CountingReclaimer(AtomicUsize);

    impl Reclaimer for CountingReclaimer {
        fn reclaim(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn wait_until(
        engine: &Engine,
        id: TaskId,
        pred: impl Fn(&TaskView) -> bool,
    ) -> TaskView {
        for _ in 0..500 {
            let view = engine.check(id).unwrap();
            if pred(&view) {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached for task {id}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_task_type_is_rejected_without_a_record() {
        let engine = EngineBuilder::new().start();
        let err = engine.submit("nope", json!({})).unwrap_err();
        assert!(matches!(err, EngineError::UnknownTaskType(_)));
        assert!(engine.list().is_empty());
        engine.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn jobs_run_in_submission_order() {
        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let engine = EngineBuilder::new()
            .register(
                "a",
                Arc::new(Tagged {
                    tag: "a",
                    log: Arc::clone(&log),
                }),
            )
            .unwrap()
            .register(
                "b",
                Arc::new(Tagged {
                    tag: "b",
                    log: Arc::clone(&log),
                }),
            )
            .unwrap()
            .register(
                "c",
                Arc::new(Tagged {
                    tag: "c",
                    log: Arc::clone(&log),
                }),
            )
            .unwrap()
            .start();

        let sa = engine.submit("a", json!({})).unwrap();
        let sb = engine.submit("b", json!({})).unwrap();
        let sc = engine.submit("c", json!({})).unwrap();
        assert_eq!(sa.queue_position, 0);
        assert_eq!(sb.queue_position, 1);
        assert_eq!(sc.queue_position, 2);

        engine.shutdown().await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn done_record_carries_result_and_completion_message() {
        let engine = EngineBuilder::new()
            .register("instant", Arc::new(Quick))
            .unwrap()
            .start();
        let sub = engine.submit("instant", json!({"prompt": "a cat"})).unwrap();
        let view = wait_until(&engine, sub.task_id, |v| !v.active).await;
        assert_eq!(view.status, TaskStatus::Done);
        assert_eq!(view.result, "outputs/instant.png");
        assert_eq!(view.progress, 1.0);
        assert!(view.message.starts_with("Completed in"));
        assert_eq!(view.task_label, "Quick");
        assert!(view.started_at.is_some());
        assert!(view.finished_at.is_some());
        engine.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancel_while_queued_never_runs_the_work_function() {
        let release = Arc::new(Notify::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let victim_runs = Arc::new(AtomicUsize::new(0));
        let engine = EngineBuilder::new()
            .register(
                "gate",
                Arc::new(Gated {
                    release: Arc::clone(&release),
                    runs: Arc::clone(&runs),
                }),
            )
            .unwrap()
            .register(
                "victim",
                Arc::new(Gated {
                    release: Arc::clone(&release),
                    runs: Arc::clone(&victim_runs),
                }),
            )
            .unwrap()
            .start();

        let blocker = engine.submit("gate", json!({})).unwrap();
        let victim = engine.submit("victim", json!({})).unwrap();

        // Cancel the queued job while the first one holds the worker.
        wait_until(&engine, blocker.task_id, |v| {
            v.status == TaskStatus::Processing
        })
        .await;
        let view = engine.cancel(victim.task_id).unwrap();
        assert_eq!(view.status, TaskStatus::Cancelled);
        assert_eq!(view.message, "Cancelled while queued.");

        release.notify_one();
        release.notify_one();
        engine.shutdown().await.unwrap();
        assert_eq!(victim_runs.load(Ordering::SeqCst), 0);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancel_while_processing_stops_at_the_next_checkpoint() {
        let engine = EngineBuilder::new()
            .register("loop", Arc::new(Obedient))
            .unwrap()
            .start();
        let sub = engine.submit("loop", json!({})).unwrap();
        wait_until(&engine, sub.task_id, |v| v.status == TaskStatus::Processing).await;

        engine.cancel(sub.task_id).unwrap();
        let view = wait_until(&engine, sub.task_id, |v| !v.active).await;
        assert_eq!(view.status, TaskStatus::Cancelled);
        assert!(view.message.starts_with("Cancelled by user"));
        engine.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn overrunning_job_times_out() {
        let engine = EngineBuilder::new()
            .register("loop", Arc::new(Obedient))
            .unwrap()
            .with_config(EngineConfig {
                job_timeout: Duration::from_millis(50),
                ..EngineConfig::default()
            })
            .start();
        let sub = engine.submit("loop", json!({})).unwrap();
        let view = wait_until(&engine, sub.task_id, |v| !v.active).await;
        assert_eq!(view.status, TaskStatus::Timeout);
        assert!(view.error.contains("limit"));
        engine.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn a_panicking_job_is_an_error_and_the_worker_survives() {
        let engine = EngineBuilder::new()
            .register("boom", Arc::new(Panicky))
            .unwrap()
            .register("instant", Arc::new(Quick))
            .unwrap()
            .start();

        let bad = engine.submit("boom", json!({})).unwrap();
        let good = engine.submit("instant", json!({})).unwrap();

        let bad_view = wait_until(&engine, bad.task_id, |v| !v.active).await;
        assert_eq!(bad_view.status, TaskStatus::Error);
        assert!(bad_view.error.contains("panicked"));

        let good_view = wait_until(&engine, good.task_id, |v| !v.active).await;
        assert_eq!(good_view.status, TaskStatus::Done);
        engine.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reclaimer_runs_after_every_outcome() {
        let reclaimer = Arc::new(CountingReclaimer(AtomicUsize::new(0)));
        let engine = EngineBuilder::new()
            .register("boom", Arc::new(Panicky))
            .unwrap()
            .register("instant", Arc::new(Quick))
            .unwrap()
            .with_reclaimer(Arc::clone(&reclaimer) as Arc<dyn Reclaimer>)
            .start();

        engine.submit("instant", json!({})).unwrap();
        engine.submit("boom", json!({})).unwrap();
        engine.shutdown().await.unwrap();
        assert_eq!(reclaimer.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remove_requires_a_terminal_record() {
        let release = Arc::new(Notify::new());
        let engine = EngineBuilder::new()
            .register(
                "gate",
                Arc::new(Gated {
                    release: Arc::clone(&release),
                    runs: Arc::new(AtomicUsize::new(0)),
                }),
            )
            .unwrap()
            .start();
        let sub = engine.submit("gate", json!({})).unwrap();
        wait_until(&engine, sub.task_id, |v| v.status == TaskStatus::Processing).await;

        let err = engine.remove(sub.task_id).unwrap_err();
        assert!(matches!(err, EngineError::TaskActive(_)));

        release.notify_one();
        wait_until(&engine, sub.task_id, |v| !v.active).await;
        engine.remove(sub.task_id).unwrap();
        assert!(matches!(
            engine.check(sub.task_id),
            Err(EngineError::NotFound(_))
        ));
        engine.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn counts_track_the_lifecycle() {
        let engine = EngineBuilder::new()
            .register("instant", Arc::new(Quick))
            .unwrap()
            .start();
        let sub = engine.submit("instant", json!({})).unwrap();
        wait_until(&engine, sub.task_id, |v| !v.active).await;
        let counts = engine.counts();
        assert_eq!(counts.done, 1);
        assert_eq!(counts.active(), 0);
        engine.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_drains_already_queued_jobs() {
        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let engine = EngineBuilder::new()
            .register(
                "a",
                Arc::new(Tagged {
                    tag: "a",
                    log: Arc::clone(&log),
                }),
            )
            .unwrap()
            .start();
        for _ in 0..3 {
            engine.submit("a", json!({})).unwrap();
        }
        engine.shutdown().await.unwrap();
        assert_eq!(log.lock().unwrap().len(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn late_first_poll_still_classifies_as_timeout() {
        let ceiling = Duration::from_millis(30);
        let poll_gap = Duration::from_millis(150);
        let engine = EngineBuilder::new()
            .register(
                "slow",
                Arc::new(Sluggish {
                    first_poll_after: poll_gap,
                }),
            )
            .unwrap()
            .with_config(EngineConfig {
                job_timeout: ceiling,
                ..EngineConfig::default()
            })
            .start();

        let clock = std::time::Instant::now();
        let sub = engine.submit("slow", json!({})).unwrap();
        let view = wait_until(&engine, sub.task_id, |v| !v.active).await;
        let settled = clock.elapsed();

        assert_eq!(view.status, TaskStatus::Timeout);
        assert!(view.error.contains("limit"));
        // Detection lags by at most the work function's polling gap.
        assert!(settled >= ceiling);
        assert!(
            settled < ceiling + poll_gap + Duration::from_millis(500),
            "settled after {settled:?}"
        );
        engine.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn timestamps_are_strictly_ordered_on_a_completed_task() {
        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let engine = EngineBuilder::new()
            .register(
                "a",
                Arc::new(Tagged {
                    tag: "a",
                    log: Arc::clone(&log),
                }),
            )
            .unwrap()
            .start();

        let sub = engine.submit("a", json!({})).unwrap();
        let view = wait_until(&engine, sub.task_id, |v| !v.active).await;
        assert_eq!(view.status, TaskStatus::Done);

        let started = view.started_at.unwrap();
        let finished = view.finished_at.unwrap();
        assert!(view.created_at < started);
        assert!(started < finished);
        engine.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_enqueue_leaves_no_record_behind() {
        let engine = EngineBuilder::new()
            .register("instant", Arc::new(Quick))
            .unwrap()
            .start();

        // Kill the worker so the queue's receiver is gone.
        engine.worker.abort();
        for _ in 0..500 {
            if engine.worker.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let err = engine.submit("instant", json!({})).unwrap_err();
        assert!(matches!(err, EngineError::QueueClosed));
        assert!(engine.list().is_empty());
    }
}
