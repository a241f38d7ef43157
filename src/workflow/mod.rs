//! Stateful session that drives one prediction or training interaction.
//!
//! The session is owned by a single caller. Network calls run on worker
//! threads and report back over the session's job channel; their results are
//! applied only inside [`WorkflowSession::poll`] and [`WorkflowSession::wait`].
//! Each `open` and each submission bumps the session epoch, and a response is
//! applied only while its epoch is current and the session is in the state
//! that awaits it.

mod errors;


use std::{sync::Arc, time::Duration};

pub use errors::{SubmissionError, WorkflowError, WorkflowState};

use crate::api::{ApiError, ApiGateway, ModelId};
use crate::jobs::{
    self, CancelFlag, JobChannel, JobMessage, SchemaFetchMessage, SubmissionMessage,
    SubmissionOutcome,
};
use crate::pipeline::{
    FeatureEncoder, FeatureSchema, FetchTicket, RawInputs, SchemaFetch, SchemaFetchError,
    SchemaRegistry, TrainingForm, compile_prediction, compile_training,
};

/// Which interaction the session was opened for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Prediction(ModelId),
    Training,
}

/// A response that arrived after the session moved on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DroppedResponse {
    Schema { model_id: ModelId },
    Submission { epoch: u64 },
}

/// What applying one job message did to the session.
#[derive(Clone, Debug, PartialEq)]
pub enum PollOutcome {
    SchemaReady { model_id: ModelId },
    SchemaFailed(SchemaFetchError),
    ResultReady(SubmissionOutcome),
    SubmissionFailed(SubmissionError),
    Dropped {
        response: DroppedResponse,
        current_epoch: u64,
    },
}

pub struct WorkflowSession {
    gateway: Arc<dyn ApiGateway>,
    encoder: FeatureEncoder,
    channel: JobChannel,
    registry: SchemaRegistry,
    state: WorkflowState,
    flow: Option<Flow>,
    epoch: u64,
    schema: Option<Arc<FeatureSchema>>,
    pending_fetch: Option<FetchTicket>,
    submission_cancel: Option<CancelFlag>,
    result: Option<SubmissionOutcome>,
    last_error: Option<WorkflowError>,
    dropped_responses: u64,
}

impl WorkflowSession {
    pub fn new(gateway: Arc<dyn ApiGateway>, encoder: FeatureEncoder) -> Self {
        let channel = JobChannel::new();
        let registry = SchemaRegistry::new(Arc::clone(&gateway), channel.sender());
        Self {
            gateway,
            encoder,
            channel,
            registry,
            state: WorkflowState::Closed,
            flow: None,
            epoch: 0,
            schema: None,
            pending_fetch: None,
            submission_cancel: None,
            result: None,
            last_error: None,
            dropped_responses: 0,
        }
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn flow(&self) -> Option<Flow> {
        self.flow
    }

    /// Schema of the open prediction flow, once fetched.
    pub fn schema(&self) -> Option<&FeatureSchema> {
        self.schema.as_deref()
    }

    pub fn result(&self) -> Option<&SubmissionOutcome> {
        self.result.as_ref()
    }

    /// Error attached by the last failed step, if it has not been cleared.
    pub fn last_error(&self) -> Option<&WorkflowError> {
        self.last_error.as_ref()
    }

    /// Responses discarded as stale since the session was created.
    pub fn dropped_responses(&self) -> u64 {
        self.dropped_responses
    }

    /// Start a prediction flow for `model_id`, closing any open flow first.
    pub fn open(&mut self, model_id: ModelId) {
        if self.state != WorkflowState::Closed {
            self.close();
        }
        self.epoch += 1;
        self.flow = Some(Flow::Prediction(model_id));
        self.request_schema(model_id);
    }

    fn request_schema(&mut self, model_id: ModelId) {
        match self.registry.fetch(model_id) {
            SchemaFetch::Ready(schema) => {
                self.pending_fetch = None;
                self.schema = Some(schema);
                self.transition(WorkflowState::AwaitingInput);
            }
            SchemaFetch::Pending(ticket) => {
                self.pending_fetch = Some(ticket);
                self.transition(WorkflowState::FetchingSchema);
            }
        }
    }

    /// Start a training flow. Training needs no schema.
    pub fn open_training(&mut self) {
        if self.state != WorkflowState::Closed {
            self.close();
        }
        self.epoch += 1;
        self.flow = Some(Flow::Training);
        self.transition(WorkflowState::AwaitingInput);
    }

    /// Encode `raw` against the open schema and send it for prediction.
    ///
    /// Input errors are attached to the session and returned; they never
    /// reach the network and leave the epoch unchanged.
    pub fn submit(&mut self, raw: &RawInputs) -> Result<(), WorkflowError> {
        const ACTION: &str = "submit a prediction";
        self.ensure_accepting_input(ACTION)?;
        let schema = match (self.flow, &self.schema) {
            (Some(Flow::Prediction(_)), Some(schema)) => Arc::clone(schema),
            _ => return Err(self.invalid_state(ACTION)),
        };
        let features = self
            .encoder
            .encode(&schema, raw)
            .map_err(|err| self.hold_error(err.into()))?;
        let request = compile_prediction(&features);
        tracing::debug!(
            model_id = %request.model_id(),
            columns = features.tokens().len(),
            "Prediction compiled"
        );
        let gateway = Arc::clone(&self.gateway);
        self.dispatch("prediction", move || {
            gateway.predict(&request).map(SubmissionOutcome::Prediction)
        });
        Ok(())
    }

    /// Validate a training form and send it.
    pub fn submit_training(&mut self, form: &TrainingForm) -> Result<(), WorkflowError> {
        const ACTION: &str = "submit training";
        self.ensure_accepting_input(ACTION)?;
        if self.flow != Some(Flow::Training) {
            return Err(self.invalid_state(ACTION));
        }
        let request = compile_training(form).map_err(|err| self.hold_error(err.into()))?;
        tracing::debug!(
            dataset_id = %request.dataset_id,
            model_type = %request.ml_model_type,
            "Training request compiled"
        );
        let gateway = Arc::clone(&self.gateway);
        self.dispatch("training", move || {
            gateway.train(&request).map(SubmissionOutcome::Trained)
        });
        Ok(())
    }

    /// Go back to input after a result, keeping the schema.
    pub fn resume_input(&mut self) -> Result<(), WorkflowError> {
        if self.state != WorkflowState::ResultReady {
            return Err(self.invalid_state("resume input"));
        }
        self.result = None;
        self.transition(WorkflowState::AwaitingInput);
        Ok(())
    }

    /// Abandon the current flow from any state.
    pub fn close(&mut self) {
        if let Some(cancel) = self.submission_cancel.take() {
            cancel.cancel();
        }
        self.registry.clear();
        self.pending_fetch = None;
        self.flow = None;
        self.schema = None;
        self.result = None;
        self.last_error = None;
        self.transition(WorkflowState::Closed);
    }

    /// Forget a cached schema so the next `open` fetches it again. A fetch
    /// already running for the open model is replaced by a fresh one.
    pub fn invalidate_schema(&mut self, model_id: ModelId) {
        self.registry.invalidate(model_id);
        if self.state == WorkflowState::FetchingSchema
            && self.flow == Some(Flow::Prediction(model_id))
        {
            tracing::debug!(%model_id, "Refetching invalidated schema");
            self.request_schema(model_id);
        }
    }

    /// Apply every job message that has already arrived.
    pub fn poll(&mut self) -> Vec<PollOutcome> {
        let mut outcomes = Vec::new();
        while let Some(message) = self.channel.try_recv() {
            outcomes.push(self.apply(message));
        }
        outcomes
    }

    /// Block up to `timeout` for the next job message, then drain the rest.
    pub fn wait(&mut self, timeout: Duration) -> Vec<PollOutcome> {
        let mut outcomes = Vec::new();
        if let Some(message) = self.channel.recv_timeout(timeout) {
            outcomes.push(self.apply(message));
        }
        outcomes.extend(self.poll());
        outcomes
    }

    fn apply(&mut self, message: JobMessage) -> PollOutcome {
        match message {
            JobMessage::SchemaFetched(message) => self.apply_schema(message),
            JobMessage::Submitted(message) => self.apply_submission(message),
        }
    }

    fn apply_schema(&mut self, message: SchemaFetchMessage) -> PollOutcome {
        let model_id = message.model_id;
        let stale = DroppedResponse::Schema { model_id };
        let Some(resolution) = self.registry.complete(message) else {
            return self.drop_response(stale);
        };
        if self.state != WorkflowState::FetchingSchema
            || self.pending_fetch != Some(resolution.ticket)
        {
            return self.drop_response(stale);
        }
        self.pending_fetch = None;
        match resolution.result {
            Ok(schema) => {
                tracing::info!(%model_id, columns = schema.len(), "Schema ready");
                self.schema = Some(schema);
                self.transition(WorkflowState::AwaitingInput);
                PollOutcome::SchemaReady { model_id }
            }
            Err(err) => {
                self.last_error = Some(WorkflowError::SchemaFetch(err.clone()));
                self.transition(WorkflowState::Failed);
                PollOutcome::SchemaFailed(err)
            }
        }
    }

    fn apply_submission(&mut self, message: SubmissionMessage) -> PollOutcome {
        if message.epoch != self.epoch || self.state != WorkflowState::Submitting {
            return self.drop_response(DroppedResponse::Submission {
                epoch: message.epoch,
            });
        }
        self.submission_cancel = None;
        match message.result {
            Ok(outcome) => {
                self.result = Some(outcome.clone());
                self.transition(WorkflowState::ResultReady);
                PollOutcome::ResultReady(outcome)
            }
            Err(cause) => {
                tracing::warn!(epoch = self.epoch, "Submission failed: {cause}");
                let error = SubmissionError { cause };
                self.last_error = Some(WorkflowError::Submission(error.clone()));
                self.transition(WorkflowState::AwaitingInput);
                PollOutcome::SubmissionFailed(error)
            }
        }
    }

    fn dispatch<F>(&mut self, label: &'static str, call: F)
    where
        F: FnOnce() -> Result<SubmissionOutcome, ApiError> + Send + 'static,
    {
        self.epoch += 1;
        let epoch = self.epoch;
        self.last_error = None;
        self.result = None;
        let cancel = CancelFlag::default();
        jobs::spawn_job(label, self.channel.sender(), cancel.clone(), move || {
            JobMessage::Submitted(SubmissionMessage {
                epoch,
                result: call(),
            })
        });
        tracing::debug!(epoch, "{label} dispatched");
        self.submission_cancel = Some(cancel);
        self.transition(WorkflowState::Submitting);
    }

    fn ensure_accepting_input(&self, action: &'static str) -> Result<(), WorkflowError> {
        match self.state {
            WorkflowState::AwaitingInput => Ok(()),
            WorkflowState::Submitting => Err(WorkflowError::Busy),
            _ => Err(self.invalid_state(action)),
        }
    }

    fn invalid_state(&self, action: &'static str) -> WorkflowError {
        WorkflowError::InvalidState {
            action,
            state: self.state,
        }
    }

    fn hold_error(&mut self, error: WorkflowError) -> WorkflowError {
        tracing::debug!("Input rejected: {error}");
        self.last_error = Some(error.clone());
        error
    }

    fn drop_response(&mut self, response: DroppedResponse) -> PollOutcome {
        self.dropped_responses += 1;
        tracing::debug!(
            ?response,
            current_epoch = self.epoch,
            state = %self.state,
            "Dropping stale response"
        );
        PollOutcome::Dropped {
            response,
            current_epoch: self.epoch,
        }
    }

    fn transition(&mut self, next: WorkflowState) {
        if self.state != next {
            tracing::info!(from = %self.state, to = %next, epoch = self.epoch, "Workflow transition");
            self.state = next;
        }
    }
}

impl Drop for WorkflowSession {
    fn drop(&mut self) {
        if let Some(cancel) = self.submission_cancel.take() {
            cancel.cancel();
        }
        self.registry.clear();
    }
}
