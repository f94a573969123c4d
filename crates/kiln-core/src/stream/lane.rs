//! Transfer lane: a dedicated thread that materializes blocks into fast
//! memory while the caller's thread computes.

use std::sync::mpsc;
use std::thread;

use super::PipelineError;
use super::stage::StageError;

type FetchJob = Box<dyn FnOnce() -> Result<(), StageError> + Send>;

struct FetchCmd {
    index: usize,
    job: FetchJob,
}

/// The "transfer channel" half of the dual-channel streaming contract.
///
/// `issue` hands a fetch to the lane thread and returns immediately; `wait`
/// blocks until that fetch's completion handshake arrives. Fetches are
/// issued strictly in order and complete in order, which is exactly the
/// barrier discipline the pipeline needs: a block's transfer is issued
/// before its predecessor's computation finishes, and a block is never
/// computed before its own transfer is confirmed complete.
pub(super) struct TransferLane {
    cmd_tx: Option<mpsc::Sender<FetchCmd>>,
    done_rx: mpsc::Receiver<(usize, Result<(), StageError>)>,
    handle: Option<thread::JoinHandle<()>>,
}

impl TransferLane {
    pub(super) fn spawn() -> Result<Self, PipelineError> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<FetchCmd>();
        let (done_tx, done_rx) = mpsc::channel();

        let handle = thread::Builder::new()
            .name("kiln-transfer".to_string())
            .spawn(move || {
                for cmd in cmd_rx {
                    let result = (cmd.job)();
                    if done_tx.send((cmd.index, result)).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| PipelineError::LaneSpawn(e.to_string()))?;

        Ok(Self {
            cmd_tx: Some(cmd_tx),
            done_rx,
            handle: Some(handle),
        })
    }

    /// Start an asynchronous fetch of block `index`.
    pub(super) fn issue(&self, index: usize, job: FetchJob) -> Result<(), PipelineError> {
        let tx = self.cmd_tx.as_ref().ok_or(PipelineError::LaneClosed)?;
        tx.send(FetchCmd { index, job })
            .map_err(|_| PipelineError::LaneClosed)
    }

    /// Block until the fetch of block `index` has completed.
    pub(super) fn wait(&self, index: usize) -> Result<(), PipelineError> {
        let (done_index, result) = self.done_rx.recv().map_err(|_| PipelineError::LaneClosed)?;
        debug_assert_eq!(done_index, index, "completions arrive in issue order");
        result.map_err(|e| PipelineError::Transfer {
            index,
            message: e.to_string(),
        })
    }
}

impl Drop for TransferLane {
    fn drop(&mut self) {
        // Closing the command channel ends the lane thread's loop; join so
        // no fetch outlives the pipeline invocation that issued it.
        self.cmd_tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
