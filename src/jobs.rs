//! Background request jobs and the messages they report back with.
//!
//! Every network call runs on its own worker thread. Results come back over
//! a single channel owned by the workflow session and are applied only when
//! the session polls, so session state is never touched from a worker.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError},
    },
    thread,
    time::Duration,
};

use crate::api::{ApiError, ModelId, PredictionResult, TrainedModel};
use crate::pipeline::FeatureSchema;
use crate::pipeline::registry::FetchTicket;

/// Result of a background job.
#[derive(Debug)]
pub enum JobMessage {
    SchemaFetched(SchemaFetchMessage),
    Submitted(SubmissionMessage),
}

/// Completed schema fetch, tagged with the ticket that requested it.
#[derive(Debug)]
pub struct SchemaFetchMessage {
    pub(crate) ticket: FetchTicket,
    pub(crate) model_id: ModelId,
    pub(crate) result: Result<FeatureSchema, ApiError>,
}

/// Completed submission, tagged with the session epoch it was sent at.
#[derive(Debug)]
pub struct SubmissionMessage {
    pub(crate) epoch: u64,
    pub(crate) result: Result<SubmissionOutcome, ApiError>,
}

/// What a successful submission produced.
#[derive(Clone, Debug, PartialEq)]
pub enum SubmissionOutcome {
    Prediction(PredictionResult),
    Trained(TrainedModel),
}

/// Sender/receiver pair for job messages.
pub(crate) struct JobChannel {
    tx: Sender<JobMessage>,
    rx: Receiver<JobMessage>,
}

impl JobChannel {
    pub(crate) fn new() -> Self {
        let (tx, rx) = std::sync::mpsc::channel::<JobMessage>();
        Self { tx, rx }
    }

    pub(crate) fn sender(&self) -> Sender<JobMessage> {
        self.tx.clone()
    }

    pub(crate) fn try_recv(&self) -> Option<JobMessage> {
        match self.rx.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub(crate) fn recv_timeout(&self, timeout: Duration) -> Option<JobMessage> {
        match self.rx.recv_timeout(timeout) {
            Ok(message) => Some(message),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

/// Cancellation flag shared with a running job.
///
/// The underlying request is not aborted. A cancelled job still reports back
/// so the session can account for the stale response.
#[derive(Clone, Debug, Default)]
pub(crate) struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub(crate) fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Run `job` on a worker thread and send its message back.
pub(crate) fn spawn_job<F>(label: &'static str, tx: Sender<JobMessage>, cancel: CancelFlag, job: F)
where
    F: FnOnce() -> JobMessage + Send + 'static,
{
    thread::spawn(move || {
        let message = job();
        if cancel.is_cancelled() {
            tracing::debug!("{label} finished after cancellation; reporting as stale");
        }
        // The receiver is gone once the session is dropped.
        let _ = tx.send(message);
    });
}
