//! Remote operation client contract and the cluster-management REST implementation

use crate::models::{OperationRequest, PollResponse, RequestHandle, SubmitResponse};
use async_trait::async_trait;
use thiserror::Error;

pub mod ambari;

pub use ambari::AmbariClient;

/// Errors surfaced by a remote operation client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server error {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Malformed response: {0}")]
    Decode(String),
}

/// Issues requests to the cluster-management backend and reports their status
#[async_trait]
pub trait RemoteOperationClient: Send + Sync {
    /// Submit a request
    ///
    /// # Returns
    /// A handle to poll, or no handle when the backend had nothing to do
    async fn submit(&self, request: &OperationRequest) -> Result<SubmitResponse, ClientError>;

    /// Query the status of a previously submitted request
    async fn poll(&self, handle: &RequestHandle) -> Result<PollResponse, ClientError>;
}
