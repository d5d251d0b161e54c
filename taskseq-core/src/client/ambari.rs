//! HTTP client for the cluster-management REST API

use crate::client::{ClientError, RemoteOperationClient};
use crate::models::{
    HttpMethod, OperationRequest, PollResponse, RemoteStatus, RequestHandle, SubmitResponse,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::Value;
use std::time::Duration;

const REQUESTED_BY: &str = "taskseq";

/// Client for `/api/v1` of a cluster-management server
pub struct AmbariClient {
    base_url: String,
    cluster_name: String,
    credentials: Option<(String, String)>,
    client: Client,
}

impl AmbariClient {
    pub fn new(server_url: &str, cluster_name: impl Into<String>) -> Result<Self> {
        let parsed = url::Url::parse(server_url).context("Invalid server URL")?;
        let base = parsed.as_str().trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url: format!("{}/api/v1", base),
            cluster_name: cluster_name.into(),
            credentials: None,
            client,
        })
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    fn endpoint(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, self.endpoint(path))
            .header("X-Requested-By", REQUESTED_BY);
        match &self.credentials {
            Some((user, password)) => builder.basic_auth(user, Some(password)),
            None => builder,
        }
    }

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            Err(ClientError::Rejected {
                status,
                body: body.trim().to_string(),
            })
        }
    }
}

fn to_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
    }
}

/// Map a backend `request_status` onto the poll discriminator
pub fn map_request_status(status: &str) -> Option<RemoteStatus> {
    match status {
        "PENDING" | "QUEUED" | "IN_PROGRESS" | "HOLDING" => Some(RemoteStatus::InProgress),
        "COMPLETED" => Some(RemoteStatus::Success),
        "FAILED" | "ABORTED" | "TIMEDOUT" | "SKIPPED_FAILED" | "HOLDING_FAILED"
        | "HOLDING_TIMEDOUT" => Some(RemoteStatus::Failure),
        _ => None,
    }
}

/// Extract the request id from a `{"Requests": {"id": N}}` body
fn extract_request_id(body: &Value) -> Option<RequestHandle> {
    match body.pointer("/Requests/id")? {
        Value::Number(n) => n.as_u64().map(RequestHandle::from),
        Value::String(s) if !s.is_empty() => Some(RequestHandle::new(s.clone())),
        _ => None,
    }
}

#[async_trait]
impl RemoteOperationClient for AmbariClient {
    async fn submit(&self, request: &OperationRequest) -> Result<SubmitResponse, ClientError> {
        let mut builder = self.request(to_method(request.method), &request.path);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let response = Self::ensure_success(response).await?;
        let text = response
            .text()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        if text.trim().is_empty() {
            tracing::debug!("{} {} returned no request", request.method, request.path);
            return Ok(SubmitResponse::default());
        }

        let body: Value =
            serde_json::from_str(&text).map_err(|e| ClientError::Decode(e.to_string()))?;
        Ok(SubmitResponse {
            handle: extract_request_id(&body),
            immediate_result: Some(body),
        })
    }

    async fn poll(&self, handle: &RequestHandle) -> Result<PollResponse, ClientError> {
        let path = format!(
            "/clusters/{}/requests/{}?fields=Requests/request_status,Requests/progress_percent",
            self.cluster_name, handle
        );
        let response = self
            .request(Method::GET, &path)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let response = Self::ensure_success(response).await?;
        let payload: Value = response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;

        let raw_status = payload
            .pointer("/Requests/request_status")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::Decode("missing Requests/request_status".to_string()))?
            .to_string();
        let status = map_request_status(&raw_status)
            .ok_or_else(|| ClientError::Decode(format!("unknown request status {}", raw_status)))?;
        let progress_percent = payload
            .pointer("/Requests/progress_percent")
            .and_then(Value::as_f64);

        Ok(PollResponse {
            status,
            raw_status: Some(raw_status),
            progress_percent,
            payload,
        })
    }
}
