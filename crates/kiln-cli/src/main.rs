//! Demo driver for the kiln engine.
//!
//! Registers two work functions — a streamed "render" job that pushes toy
//! block families through the 2-slot pipeline, and an iterative "extract"
//! job — then submits a few tasks, cancels one, and polls until everything
//! settles.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use kiln_core::stream::{Stage, StageError, run_two_family};
use kiln_core::{
    Engine, EngineBuilder, JobContext, JobError, TaskStatus, WorkFunction,
};

#[derive(Debug, Deserialize)]
struct RenderParams {
    prompt: String,
    #[serde(default = "default_blocks")]
    blocks: usize,
}

fn default_blocks() -> usize {
    8
}

/// Stand-in for a transformer block operating on paired streams.
#[derive(Clone)]
struct DualState {
    text: Vec<f64>,
    image: Vec<f64>,
}

struct DualBlock {
    gain: f64,
}

impl Stage<DualState> for DualBlock {
    fn fetch(&self) -> Result<(), StageError> {
        // A real backend copies weights into the fast tier here.
        std::thread::sleep(Duration::from_millis(10));
        Ok(())
    }

    fn evict(&self) -> Result<(), StageError> {
        Ok(())
    }

    fn compute(&self, state: DualState) -> Result<DualState, StageError> {
        std::thread::sleep(Duration::from_millis(25));
        Ok(DualState {
            text: state.text.iter().map(|x| x * self.gain).collect(),
            image: state.image.iter().map(|x| x + self.gain).collect(),
        })
    }
}

struct MergedBlock {
    shift: f64,
}

impl Stage<Vec<f64>> for MergedBlock {
    fn fetch(&self) -> Result<(), StageError> {
        std::thread::sleep(Duration::from_millis(10));
        Ok(())
    }

    fn evict(&self) -> Result<(), StageError> {
        Ok(())
    }

    fn compute(&self, state: Vec<f64>) -> Result<Vec<f64>, StageError> {
        std::thread::sleep(Duration::from_millis(25));
        Ok(state.iter().map(|x| x + self.shift).collect())
    }
}

/// Streams two block families through the pipeline, then "saves" the output.
struct RenderWork;

#[async_trait]
impl WorkFunction for RenderWork {
    fn label(&self) -> &str {
        "Text-to-Image"
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: JobContext,
    ) -> Result<String, JobError> {
        let params: RenderParams =
            serde_json::from_value(params).map_err(|e| JobError::failed(e.to_string()))?;

        ctx.progress.report(0.05, "Loading model...".to_string());

        let dual: Vec<Arc<dyn Stage<DualState>>> = (0..params.blocks)
            .map(|i| Arc::new(DualBlock { gain: 1.0 + i as f64 * 0.01 }) as _)
            .collect();
        let merged: Vec<Arc<dyn Stage<Vec<f64>>>> = (0..params.blocks * 2)
            .map(|i| Arc::new(MergedBlock { shift: i as f64 * 0.5 }) as _)
            .collect();

        let seed = params.prompt.len() as f64;
        let init = DualState {
            text: vec![seed; 4],
            image: vec![seed * 0.5; 4],
        };

        // The pipeline is synchronous; run it off the async worker thread.
        let checkpoint = ctx.checkpoint.clone();
        let progress = ctx.progress.clone();
        let handle = tokio::task::spawn_blocking(move || {
            progress.report(0.2, "Denoising...".to_string());
            let should_stop = move || checkpoint.should_stop();
            run_two_family(&should_stop, &dual, &merged, init, |d| {
                let mut v = d.text;
                v.extend(d.image);
                v
            })
        });
        let (out, stats) = handle
            .await
            .map_err(|e| JobError::failed(format!("render worker died: {e}")))??;

        ctx.progress.report(0.95, "Saving image...".to_string());
        tracing::info!(
            blocks = stats.blocks_run,
            peak = stats.peak_resident,
            compute_ms = stats.total_compute.as_millis() as u64,
            "render pipeline finished"
        );
        Ok(format!("outputs/render_{:.0}.png", out.iter().sum::<f64>()))
    }
}

#[derive(Debug, Deserialize)]
struct ExtractParams {
    pages: usize,
}

/// Iterative token-loop job: one checkpoint poll per step.
struct ExtractWork;

#[async_trait]
impl WorkFunction for ExtractWork {
    fn label(&self) -> &str {
        "Document Extraction"
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: JobContext,
    ) -> Result<String, JobError> {
        let params: ExtractParams =
            serde_json::from_value(params).map_err(|e| JobError::failed(e.to_string()))?;

        for page in 0..params.pages {
            if ctx.checkpoint.should_stop() {
                return Err(JobError::Interrupted);
            }
            sleep(Duration::from_millis(40)).await;
            ctx.progress.report(
                (page + 1) as f64 / params.pages as f64,
                format!("Extracting page {}/{}", page + 1, params.pages),
            );
        }
        Ok(format!("outputs/extract_{}_pages.json", params.pages))
    }
}

async fn wait_terminal(engine: &Engine, id: kiln_core::TaskId) -> TaskStatus {
    loop {
        let view = engine.check(id).expect("task exists");
        if !view.active {
            println!(
                "  {} [{}] {:?}: {} {}",
                id.short(),
                view.task_label,
                view.status,
                view.message,
                view.result
            );
            return view.status;
        }
        sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let engine = EngineBuilder::new()
        .register("render", Arc::new(RenderWork))
        .expect("register render")
        .register("extract", Arc::new(ExtractWork))
        .expect("register extract")
        .start();

    let a = engine
        .submit("render", serde_json::json!({ "prompt": "a fox in the snow" }))
        .unwrap();
    let b = engine
        .submit("extract", serde_json::json!({ "pages": 6 }))
        .unwrap();
    let c = engine
        .submit("render", serde_json::json!({ "prompt": "doomed", "blocks": 32 }))
        .unwrap();
    println!(
        "submitted: {} (pos {}), {} (pos {}), {} (pos {})",
        a.task_id.short(),
        a.queue_position,
        b.task_id.short(),
        b.queue_position,
        c.task_id.short(),
        c.queue_position
    );

    // Cancel the third while it is still queued.
    let cancelled = engine.cancel(c.task_id).unwrap();
    println!("cancelled {}: {:?}", c.task_id.short(), cancelled.status);

    println!("final statuses:");
    wait_terminal(&engine, a.task_id).await;
    wait_terminal(&engine, b.task_id).await;
    wait_terminal(&engine, c.task_id).await;

    println!("history:");
    for view in engine.list() {
        println!(
            "  {} [{}] {:?} progress={:.2}",
            view.task_id.short(),
            view.task_label,
            view.status,
            view.progress
        );
    }
    println!("counts: {:?}", engine.counts());

    engine.shutdown().await.unwrap();
}
