//! Background execution of the speculative decode step.
//!
//! The stream runs at most one step ahead of its consumer. The worker
//! thread owns nothing between steps: the whole [`StepState`] ping-pongs
//! through a pair of depth-1 channels, so the single-writer discipline on
//! the cache is structural. Dropping the worker closes the job channel,
//! which ends the thread after at most the in-flight step.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::error::{GenError, Result};
use crate::model::Model;

use super::{run_step, StepOutput, StepState};

struct Job {
    state: StepState,
    input: Vec<u32>,
}

type StepResult = Result<(StepOutput, StepState)>;

pub(crate) struct StepWorker {
    job_tx: Option<Sender<Job>>,
    result_rx: Receiver<StepResult>,
    thread: Option<thread::JoinHandle<()>>,
}

impl StepWorker {
    pub(crate) fn spawn(model: Arc<dyn Model>) -> Result<Self> {
        let (job_tx, job_rx) = bounded::<Job>(1);
        let (result_tx, result_rx) = bounded::<StepResult>(1);

        let thread = thread::Builder::new()
            .name("decode-worker".into())
            .spawn(move || worker_loop(model, job_rx, result_tx))?;

        Ok(StepWorker {
            job_tx: Some(job_tx),
            result_rx,
            thread: Some(thread),
        })
    }

    /// Schedule the next step. The result slot must be empty, which the
    /// stream guarantees by receiving before every submit.
    pub(crate) fn submit(&self, state: StepState, input: Vec<u32>) -> Result<()> {
        match &self.job_tx {
            Some(tx) => tx
                .send(Job { state, input })
                .map_err(|_| GenError::WorkerDisconnected),
            None => Err(GenError::WorkerDisconnected),
        }
    }

    /// Block until the in-flight step's result is ready.
    pub(crate) fn recv(&self) -> Result<(StepOutput, StepState)> {
        self.result_rx
            .recv()
            .map_err(|_| GenError::WorkerDisconnected)?
    }
}

impl Drop for StepWorker {
    fn drop(&mut self) {
        self.job_tx.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn worker_loop(model: Arc<dyn Model>, job_rx: Receiver<Job>, result_tx: Sender<StepResult>) {
    while let Ok(job) = job_rx.recv() {
        let mut state = job.state;
        let result = run_step(model.as_ref(), &mut state, &job.input).map(|out| (out, state));
        if result_tx.send(result).is_err() {
            break;
        }
    }
}
