//! Shared fixtures for runner integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskseq_core::client::{ClientError, RemoteOperationClient};
use taskseq_core::models::{
    HttpMethod, OperationRequest, PollResponse, RemoteStatus, RequestHandle, RunnerConfig,
    SubmitResponse, WorkflowContext,
};
use taskseq_core::workflow::{AbortHandle, LocalStep, RequestBuilder, TaskDescriptor};
use taskseq_core::TaskError;

type Scripted<T> = VecDeque<Result<T, ClientError>>;

#[derive(Default)]
struct Script {
    submits: HashMap<String, Scripted<SubmitResponse>>,
    polls: HashMap<String, Scripted<PollResponse>>,
    submitted: Vec<OperationRequest>,
    polled: Vec<RequestHandle>,
    abort_on_poll: Option<(String, usize, AbortHandle)>,
}

/// Remote client replaying scripted answers
///
/// Submitting `/tasks/<id>` returns handle `<id>` unless a submit answer was scripted.
/// Polls pop the scripted answers of their handle and repeat the last one; an
/// unscripted handle succeeds at once.
#[derive(Default)]
pub struct ScriptedClient {
    script: Mutex<Script>,
}

impl ScriptedClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on_submit(&self, path: &str, answer: Result<SubmitResponse, ClientError>) {
        let mut script = self.script.lock().unwrap();
        script
            .submits
            .entry(path.to_string())
            .or_default()
            .push_back(answer);
    }

    pub fn on_poll(&self, handle: &str, statuses: &[RemoteStatus]) {
        for status in statuses {
            let mut response = PollResponse::new(*status);
            response.raw_status = Some(
                match status {
                    RemoteStatus::InProgress => "IN_PROGRESS",
                    RemoteStatus::Success => "COMPLETED",
                    RemoteStatus::Failure => "FAILED",
                }
                .to_string(),
            );
            self.on_poll_result(handle, Ok(response));
        }
    }

    pub fn on_poll_result(&self, handle: &str, answer: Result<PollResponse, ClientError>) {
        let mut script = self.script.lock().unwrap();
        script
            .polls
            .entry(handle.to_string())
            .or_default()
            .push_back(answer);
    }

    /// Trigger `abort` while the `nth` poll of `handle` is in flight
    pub fn abort_on_poll(&self, handle: &str, nth: usize, abort: AbortHandle) {
        self.script.lock().unwrap().abort_on_poll = Some((handle.to_string(), nth, abort));
    }

    pub fn submitted_paths(&self) -> Vec<String> {
        let script = self.script.lock().unwrap();
        script.submitted.iter().map(|r| r.path.clone()).collect()
    }

    pub fn submissions_of(&self, task_id: &str) -> usize {
        let path = task_path(task_id);
        self.submitted_paths().iter().filter(|p| **p == path).count()
    }

    pub fn polls_of(&self, handle: &str) -> usize {
        let script = self.script.lock().unwrap();
        script.polled.iter().filter(|h| h.as_str() == handle).count()
    }
}

#[async_trait]
impl RemoteOperationClient for ScriptedClient {
    async fn submit(&self, request: &OperationRequest) -> Result<SubmitResponse, ClientError> {
        let mut script = self.script.lock().unwrap();
        script.submitted.push(request.clone());
        if let Some(answer) = script
            .submits
            .get_mut(&request.path)
            .and_then(|queue| queue.pop_front())
        {
            return answer;
        }
        let handle = request.path.trim_start_matches("/tasks/").to_string();
        Ok(SubmitResponse {
            handle: Some(RequestHandle::new(handle)),
            immediate_result: None,
        })
    }

    async fn poll(&self, handle: &RequestHandle) -> Result<PollResponse, ClientError> {
        let mut script = self.script.lock().unwrap();
        script.polled.push(handle.clone());
        let count = script.polled.iter().filter(|h| *h == handle).count();

        if let Some((target, nth, abort)) = &script.abort_on_poll {
            if target == handle.as_str() && *nth == count {
                abort.abort();
            }
        }

        match script.polls.get_mut(handle.as_str()) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue.front().cloned().unwrap(),
            _ => Ok(PollResponse::new(RemoteStatus::Success)),
        }
    }
}

pub fn task_path(task_id: &str) -> String {
    format!("/tasks/{}", task_id)
}

/// Builds `POST /tasks/<id>`
pub struct TaskRequest(pub String);

impl RequestBuilder for TaskRequest {
    fn build(&self, _context: &WorkflowContext) -> Result<OperationRequest, TaskError> {
        Ok(OperationRequest::new(HttpMethod::Post, task_path(&self.0)))
    }
}

/// Counting local step that fails while `failures` is positive
#[derive(Clone, Default)]
pub struct CountingStep {
    pub calls: Arc<AtomicU32>,
    pub failures: Arc<AtomicU32>,
}

impl CountingStep {
    pub fn failing(times: u32) -> Self {
        let step = Self::default();
        step.failures.store(times, Ordering::SeqCst);
        step
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LocalStep for CountingStep {
    fn run(&self, _context: &WorkflowContext) -> Result<(), TaskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(TaskError::LocalStep("host check failed".to_string()));
        }
        Ok(())
    }
}

pub fn polled(id: &str) -> TaskDescriptor {
    TaskDescriptor::polled(id, id, TaskRequest(id.to_string()))
}

pub fn fire_and_forget(id: &str) -> TaskDescriptor {
    TaskDescriptor::fire_and_forget(id, id, TaskRequest(id.to_string()))
}

pub fn sync(id: &str, step: CountingStep) -> TaskDescriptor {
    TaskDescriptor::sync(id, id, step)
}

pub fn fast_config() -> RunnerConfig {
    RunnerConfig {
        poll_interval: Duration::from_millis(1),
        max_transport_failures: 2,
        ..RunnerConfig::default()
    }
}
