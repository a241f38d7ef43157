use std::fmt;

use crate::api::ApiError;
use crate::pipeline::{InputError, SchemaFetchError};

/// Lifecycle of a workflow session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkflowState {
    Closed,
    FetchingSchema,
    AwaitingInput,
    Submitting,
    ResultReady,
    Failed,
}

impl WorkflowState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::FetchingSchema => "fetching schema",
            Self::AwaitingInput => "awaiting input",
            Self::Submitting => "submitting",
            Self::ResultReady => "result ready",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The backend rejected or never answered a submission.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{cause}")]
pub struct SubmissionError {
    pub cause: ApiError,
}

/// Errors returned by [`super::WorkflowSession`] operations.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    #[error(transparent)]
    SchemaFetch(#[from] SchemaFetchError),
    #[error("Invalid input: {0}")]
    Input(#[from] InputError),
    #[error("A submission is already in progress")]
    Busy,
    #[error("Submission failed: {0}")]
    Submission(#[from] SubmissionError),
    #[error("Cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: WorkflowState,
    },
}
