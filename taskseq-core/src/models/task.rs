//! Task, request and remote status data types

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Execution mode of a task
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskMode {
    /// Runs a local function and completes immediately
    Sync,
    /// Sends one request; completes when that request is answered
    AsyncFireAndForget,
    /// Sends one request, then polls the returned handle until terminal
    AsyncPolled,
}

/// Status of a single task inside a run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl TaskStatus {
    /// Completed or skipped; counts toward progress
    pub fn is_done(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Skipped)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Skipped => "SKIPPED",
        };
        write!(f, "{}", s)
    }
}

/// Aggregate status of a whole run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregateStatus {
    #[default]
    NotStarted,
    Running,
    Completed,
    /// A required task failed; waiting for retry, skip or abort
    Failed,
    Aborted,
}

impl AggregateStatus {
    /// Completed or aborted: nothing can move the run any further
    pub fn is_terminal(self) -> bool {
        matches!(self, AggregateStatus::Completed | AggregateStatus::Aborted)
    }
}

impl fmt::Display for AggregateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AggregateStatus::NotStarted => "NOT_STARTED",
            AggregateStatus::Running => "RUNNING",
            AggregateStatus::Completed => "COMPLETED",
            AggregateStatus::Failed => "FAILED",
            AggregateStatus::Aborted => "ABORTED",
        };
        write!(f, "{}", s)
    }
}

/// HTTP verb of a remote operation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    #[default]
    Put,
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        };
        write!(f, "{}", s)
    }
}

/// A fully rendered request against the cluster-management API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationRequest {
    /// HTTP method
    pub method: HttpMethod,
    /// Path relative to the API root, e.g. `/clusters/c1/services`
    pub path: String,
    /// JSON request body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl OperationRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Opaque identifier of a submitted remote operation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct RequestHandle(String);

impl RequestHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for RequestHandle {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Answer to a submitted request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmitResponse {
    /// Handle to poll; absent when the backend had nothing to do
    pub handle: Option<RequestHandle>,
    /// Response body, if any
    pub immediate_result: Option<Value>,
}

/// Remote status discriminator reported by a poll
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteStatus {
    InProgress,
    Success,
    Failure,
}

/// Answer to a single status poll
#[derive(Debug, Clone, PartialEq)]
pub struct PollResponse {
    pub status: RemoteStatus,
    /// Status string as reported by the backend, e.g. `TIMEDOUT`
    pub raw_status: Option<String>,
    /// Backend-reported completion percentage
    pub progress_percent: Option<f64>,
    pub payload: Value,
}

impl PollResponse {
    pub fn new(status: RemoteStatus) -> Self {
        Self {
            status,
            raw_status: None,
            progress_percent: None,
            payload: Value::Null,
        }
    }
}
