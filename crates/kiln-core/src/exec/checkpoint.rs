//! Cooperative cancellation and timeout enforcement.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::{Duration, Instant};

/// Which stop condition tripped first.
///
/// Recorded set-once at the checkpoint that observed it, so the terminal
/// state (Cancelled vs Timeout) is decided by the first observation, not by
/// re-measuring elapsed time after the job unwinds. A cancel arriving just
/// before the ceiling is therefore always reported as Cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancel,
    Deadline,
}

const TRIP_NONE: u8 = 0;
const TRIP_CANCEL: u8 = 1;
const TRIP_DEADLINE: u8 = 2;

struct Inner {
    cancel: Arc<AtomicBool>,
    started: Instant,
    ceiling: Duration,
    tripped: AtomicU8,
    on_deadline: Option<Box<dyn Fn() + Send + Sync>>,
}

/// The predicate a work function must poll at its checkpoints: before each
/// major phase and once per iteration of any iterative phase.
///
/// Returns true if an external cancel request set the flag, or if elapsed
/// time since the job started exceeds the configured ceiling. On the
/// deadline path the cancel flag is also set (so nested loops polling only
/// the flag stop too) and the deadline hook fires once.
///
/// Lock-free: safe to poll from blocking compute threads at high frequency.
#[derive(Clone)]
pub struct Checkpoint {
    inner: Arc<Inner>,
}

impl Checkpoint {
    pub fn new(cancel: Arc<AtomicBool>, ceiling: Duration) -> Self {
        Self::build(cancel, ceiling, None)
    }

    /// Like `new`, but runs `hook` the moment the deadline is first observed
    /// (e.g. to stamp a timeout message on the record while the job is still
    /// unwinding).
    pub fn with_deadline_hook(
        cancel: Arc<AtomicBool>,
        ceiling: Duration,
        hook: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self::build(cancel, ceiling, Some(Box::new(hook)))
    }

    fn build(
        cancel: Arc<AtomicBool>,
        ceiling: Duration,
        on_deadline: Option<Box<dyn Fn() + Send + Sync>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancel,
                started: Instant::now(),
                ceiling,
                tripped: AtomicU8::new(TRIP_NONE),
                on_deadline,
            }),
        }
    }

    /// True if the job must unwind now. Cancel is checked before the
    /// deadline, so a cancel that raced the ceiling wins deterministically.
    pub fn should_stop(&self) -> bool {
        let inner = &self.inner;
        if inner.tripped.load(Ordering::Acquire) != TRIP_NONE {
            return true;
        }
        if inner.cancel.load(Ordering::Relaxed) {
            self.trip(TRIP_CANCEL);
            return true;
        }
        if inner.started.elapsed() >= inner.ceiling {
            inner.cancel.store(true, Ordering::Relaxed);
            if self.trip(TRIP_DEADLINE)
                && let Some(hook) = &inner.on_deadline
            {
                hook();
            }
            return true;
        }
        false
    }

    /// The condition that tripped first, if any.
    pub fn reason(&self) -> Option<StopReason> {
        match self.inner.tripped.load(Ordering::Acquire) {
            TRIP_CANCEL => Some(StopReason::Cancel),
            TRIP_DEADLINE => Some(StopReason::Deadline),
            _ => None,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.inner.started.elapsed()
    }

    pub fn ceiling(&self) -> Duration {
        self.inner.ceiling
    }

    /// Set-once; returns true if this call won the race.
    fn trip(&self, reason: u8) -> bool {
        self.inner
            .tripped
            .compare_exchange(TRIP_NONE, reason, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl std::fmt::Debug for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checkpoint")
            .field("elapsed", &self.elapsed())
            .field("ceiling", &self.inner.ceiling)
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn flag() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    #[test]
    fn fresh_checkpoint_does_not_stop() {
        let cp = Checkpoint::new(flag(), Duration::from_secs(60));
        assert!(!cp.should_stop());
        assert_eq!(cp.reason(), None);
    }

    #[test]
    fn cancel_flag_trips_with_cancel_reason() {
        let cancel = flag();
        let cp = Checkpoint::new(Arc::clone(&cancel), Duration::from_secs(60));
        cancel.store(true, Ordering::Relaxed);
        assert!(cp.should_stop());
        assert_eq!(cp.reason(), Some(StopReason::Cancel));
    }

    #[test]
    fn deadline_trips_and_sets_the_cancel_flag() {
        let cancel = flag();
        let cp = Checkpoint::new(Arc::clone(&cancel), Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(10));
        assert!(cp.should_stop());
        assert_eq!(cp.reason(), Some(StopReason::Deadline));
        assert!(cancel.load(Ordering::Relaxed));
    }

    #[test]
    fn first_observation_wins_cancel_before_deadline() {
        // Both conditions hold when polled; cancel must win.
        let cancel = flag();
        cancel.store(true, Ordering::Relaxed);
        let cp = Checkpoint::new(Arc::clone(&cancel), Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cp.should_stop());
        assert_eq!(cp.reason(), Some(StopReason::Cancel));
    }

    #[test]
    fn reason_is_stable_across_repeated_polls() {
        let cancel = flag();
        let cp = Checkpoint::new(Arc::clone(&cancel), Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(10));
        assert!(cp.should_stop());
        // Flag is now set as a side effect; later polls must not flip the
        // recorded reason to Cancel.
        assert!(cp.should_stop());
        assert_eq!(cp.reason(), Some(StopReason::Deadline));
    }

    #[test]
    fn deadline_hook_fires_exactly_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let cp = Checkpoint::with_deadline_hook(flag(), Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        std::thread::sleep(Duration::from_millis(10));
        assert!(cp.should_stop());
        assert!(cp.should_stop());
        assert_eq!(fired.load(Ordering::Relaxed), 1);
    }
}
