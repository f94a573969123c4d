//! The window-slide pipeline: 2 resident slots, overlapped transfer and
//! compute.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use super::PipelineError;
use super::lane::TransferLane;
use super::stage::Stage;

/// Fast-tier slot budget per active pipeline.
pub const RESIDENT_SLOTS: usize = 2;

/// Counts blocks currently resident in the fast tier.
///
/// Incremented when a fetch completes, decremented on evict; the recorded
/// peak lets tests (and diagnostics) verify the slot budget was honored.
#[derive(Default)]
struct ResidencyGauge {
    resident: AtomicUsize,
    peak: AtomicUsize,
}

impl ResidencyGauge {
    fn on_fetched(&self) {
        let now = self.resident.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        debug_assert!(now <= RESIDENT_SLOTS, "resident window exceeded");
    }

    fn on_evicted(&self) {
        self.resident.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Diagnostics for one pipeline invocation.
#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub blocks_run: usize,
    pub peak_resident: usize,
    pub total_compute: Duration,
}

/// Streams ordered block families through the 2-slot resident window.
///
/// One instance per job invocation that needs streaming execution; never
/// shared across jobs (the single-worker executor already guarantees only
/// one job computes at a time). Dropping it tears the transfer lane down.
///
/// Per family, for each block i:
/// 1. warm-up: block 0 is fetched and confirmed before the loop;
/// 2. block i+1's fetch is issued so it overlaps with block i's compute;
/// 3. block i computes (its own fetch is already confirmed), timed;
/// 4. block i is evicted back to the reserved tier;
/// 5. block i+1's fetch is confirmed before it becomes "current".
///
/// The cancellation checkpoint is polled once per block.
pub struct StreamingPipeline<'a> {
    lane: TransferLane,
    gauge: Arc<ResidencyGauge>,
    should_stop: &'a (dyn Fn() -> bool + Sync),
    block_times: Vec<Duration>,
}

impl<'a> StreamingPipeline<'a> {
    pub fn new(should_stop: &'a (dyn Fn() -> bool + Sync)) -> Result<Self, PipelineError> {
        Ok(Self {
            lane: TransferLane::spawn()?,
            gauge: Arc::new(ResidencyGauge::default()),
            should_stop,
            block_times: Vec::new(),
        })
    }

    /// Slide the resident window over one family of blocks, threading the
    /// running state through them in strict index order.
    pub fn run_family<S: 'static>(
        &mut self,
        family: &str,
        stages: &[Arc<dyn Stage<S>>],
        mut state: S,
    ) -> Result<S, PipelineError> {
        let n = stages.len();
        if n == 0 {
            return Ok(state);
        }

        let family_started = Instant::now();

        // Warm-up: block until block 0 is materialized.
        self.issue_fetch(0, &stages[0])?;
        self.lane.wait(0)?;

        for i in 0..n {
            if (self.should_stop)() {
                return Err(PipelineError::Interrupted);
            }

            // Overlap: next block's transfer runs while this block computes.
            if i + 1 < n {
                self.issue_fetch(i + 1, &stages[i + 1])?;
            }

            let t0 = Instant::now();
            state = stages[i]
                .compute(state)
                .map_err(|e| PipelineError::Compute {
                    index: i,
                    message: e.to_string(),
                })?;
            let elapsed = t0.elapsed();
            self.block_times.push(elapsed);
            tracing::trace!(
                family,
                block = i,
                elapsed_ms = elapsed.as_millis() as u64,
                "block computed"
            );

            stages[i].evict().map_err(|e| PipelineError::Transfer {
                index: i,
                message: e.to_string(),
            })?;
            self.gauge.on_evicted();

            if i + 1 < n {
                self.lane.wait(i + 1)?;
            }
        }

        let avg_ms = family_started.elapsed().as_secs_f64() * 1000.0 / n as f64;
        tracing::debug!(family, blocks = n, avg_ms, "family streamed");
        Ok(state)
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            blocks_run: self.block_times.len(),
            peak_resident: self.gauge.peak.load(Ordering::SeqCst),
            total_compute: self.block_times.iter().sum(),
        }
    }

    fn issue_fetch<S: 'static>(
        &self,
        index: usize,
        stage: &Arc<dyn Stage<S>>,
    ) -> Result<(), PipelineError> {
        let stage = Arc::clone(stage);
        let gauge = Arc::clone(&self.gauge);
        self.lane.issue(
            index,
            Box::new(move || {
                stage.fetch()?;
                gauge.on_fetched();
                Ok(())
            }),
        )
    }
}

/// Full two-family run: slide the window over family A, combine its evolved
/// output into family B's input state, then slide over family B. No block
/// of family B begins before every block of family A has completed.
pub fn run_two_family<A: 'static, S: 'static>(
    should_stop: &(dyn Fn() -> bool + Sync),
    family_a: &[Arc<dyn Stage<A>>],
    family_b: &[Arc<dyn Stage<S>>],
    init: A,
    combine: impl FnOnce(A) -> S,
) -> Result<(S, PipelineStats), PipelineError> {
    let mut pipeline = StreamingPipeline::new(should_stop)?;
    let evolved = pipeline.run_family("a", family_a, init)?;
    let state = pipeline.run_family("b", family_b, combine(evolved))?;
    let stats = pipeline.stats();
    Ok((state, stats))
}
