//! Error taxonomy for sequence orchestration
//!
//! `SequenceError` covers caller mistakes and runner-level failures that are returned
//! from `SequenceRunner` operations. `TaskError` describes why a single task ended up
//! `FAILED`; it is recorded in the run state rather than returned.

use crate::models::AggregateStatus;
use thiserror::Error;

/// Errors returned by the runner and the sequence model
#[derive(Error, Debug)]
pub enum SequenceError {
    #[error("Task sequence '{0}' has no tasks")]
    EmptySequence(String),

    #[error("Task id '{task_id}' appears more than once in sequence '{workflow_id}'")]
    DuplicateTaskId {
        workflow_id: String,
        task_id: String,
    },

    #[error("Workflow '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Persisted run state does not match sequence '{workflow_id}': {reason}")]
    ResumeMismatch { workflow_id: String, reason: String },

    #[error("Cannot {operation} workflow '{workflow_id}' while it is {status}")]
    InvalidTransition {
        workflow_id: String,
        operation: &'static str,
        status: AggregateStatus,
    },

    #[error("No workflow run is loaded")]
    NoActiveRun,

    #[error("Invalid sequence definition: {0}")]
    InvalidDefinition(String),

    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}

/// Reasons a single task failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("Request could not be built: {0}")]
    RequestBuild(String),

    #[error("Local step failed: {0}")]
    LocalStep(String),

    #[error("Request dispatch failed: {0}")]
    RequestDispatch(String),

    #[error("Status polling gave up after {attempts} consecutive transport errors: {last_error}")]
    PollTransport { attempts: u32, last_error: String },

    #[error("Remote operation failed with status {0}")]
    RemoteOperationFailure(String),
}
