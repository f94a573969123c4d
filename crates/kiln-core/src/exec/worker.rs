//! Sequential executor: the single worker that runs all job computation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use super::checkpoint::{Checkpoint, StopReason};
use super::progress::ProgressSink;
use super::queue::QueueItem;
use crate::domain::TaskId;
use crate::store::{DequeueDecision, TaskStore};
use crate::work::{JobContext, JobError, Reclaimer, WorkFunction};

/// Dequeues jobs one at a time and writes outcomes back to the store.
///
/// Exactly one of these runs per engine: the compute backend is single-owner
/// and cannot safely run two jobs concurrently. The loop survives any single
/// job's failure or panic and continues with the next queued job; it exits
/// only on the shutdown sentinel (after draining everything ahead of it) or
/// when every sender is dropped.
pub(crate) async fn worker_loop(
    store: Arc<TaskStore>,
    reclaimer: Arc<dyn Reclaimer>,
    job_timeout: Duration,
    mut rx: mpsc::UnboundedReceiver<QueueItem>,
) {
    while let Some(item) = rx.recv().await {
        match item {
            QueueItem::Shutdown => {
                tracing::info!("worker received shutdown sentinel");
                break;
            }
            QueueItem::Run { id, params, work } => {
                run_one(&store, &reclaimer, job_timeout, id, params, work).await;
            }
        }
    }
}

async fn run_one(
    store: &Arc<TaskStore>,
    reclaimer: &Arc<dyn Reclaimer>,
    job_timeout: Duration,
    id: TaskId,
    params: serde_json::Value,
    work: Arc<dyn WorkFunction>,
) {
    let cancel = match store.begin_processing(id) {
        DequeueDecision::Run { cancel } => cancel,
        DequeueDecision::SkipCancelled => {
            tracing::info!(task = %id.short(), "cancelled while queued, skipping");
            return;
        }
        DequeueDecision::Missing => {
            tracing::warn!(task = %id.short(), "record vanished before processing");
            return;
        }
    };

    let label = work.label().to_string();
    tracing::info!(task = %id.short(), label = %label, "task started");

    let ceiling_secs = job_timeout.as_secs();
    let checkpoint = {
        let store = Arc::clone(store);
        Checkpoint::with_deadline_hook(cancel, job_timeout, move || {
            store.note_timeout(id, ceiling_secs);
        })
    };
    let ctx = JobContext {
        checkpoint: checkpoint.clone(),
        progress: ProgressSink::new(Arc::clone(store), id),
    };

    let started = Instant::now();
    // Spawned so a panicking work function surfaces as a JoinError instead
    // of tearing down this loop.
    let outcome = tokio::spawn(async move { work.execute(params, ctx).await }).await;
    let elapsed = started.elapsed().as_secs_f64();

    match outcome {
        Ok(Ok(result)) => {
            store.finish(id, |r| r.mark_done(result, elapsed));
            tracing::info!(task = %id.short(), "task done in {elapsed:.1}s");
        }
        Ok(Err(JobError::Interrupted)) => match checkpoint.reason() {
            Some(StopReason::Deadline) => {
                store.finish(id, |r| r.mark_timeout(ceiling_secs, elapsed));
                tracing::warn!(task = %id.short(), "task timed out");
            }
            _ => {
                store.finish(id, |r| {
                    r.mark_cancelled(format!("Cancelled by user ({elapsed:.1}s elapsed)"));
                });
                tracing::info!(task = %id.short(), "task cancelled by user");
            }
        },
        Ok(Err(JobError::Failed(message))) => {
            tracing::error!(task = %id.short(), error = %message, "task failed");
            store.finish(id, |r| r.mark_error(message, elapsed));
        }
        Err(join_err) => {
            let message = if join_err.is_panic() {
                format!("work function panicked: {join_err}")
            } else {
                "work function aborted".to_string()
            };
            tracing::error!(task = %id.short(), error = %message, "task failed");
            store.finish(id, |r| r.mark_error(message, elapsed));
        }
    }

    // Release transient fast-tier allocations on every exit path, then let
    // retention run.
    reclaimer.reclaim();
    let evicted = store.purge();
    if evicted > 0 {
        tracing::debug!(evicted, "retention purged terminal records");
    }
}
