//! Status polling for submitted remote operations

use crate::client::RemoteOperationClient;
use crate::error::TaskError;
use crate::models::{PollResponse, RemoteStatus, RequestHandle};
use crate::workflow::abort::AbortSignal;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Bookkeeping for the request currently being polled
#[derive(Debug, Clone)]
pub struct PollAttempt {
    pub handle: RequestHandle,
    pub attempt_count: u32,
    pub last_polled_at: Option<DateTime<Utc>>,
}

impl PollAttempt {
    fn new(handle: RequestHandle) -> Self {
        Self {
            handle,
            attempt_count: 0,
            last_polled_at: None,
        }
    }
}

/// How a polling loop ended
#[derive(Debug, Clone)]
pub enum PollOutcome {
    Succeeded(PollResponse),
    Failed(TaskError),
    Aborted,
}

/// Receives the backend-reported percentage of an in-progress request
pub type ProgressListener = Box<dyn Fn(f64) + Send + Sync>;

/// Polls one request until it reaches a terminal status
pub struct PollingLoop {
    client: Arc<dyn RemoteOperationClient>,
    interval: Duration,
    max_transport_failures: u32,
    on_progress: Option<ProgressListener>,
}

impl PollingLoop {
    pub fn new(
        client: Arc<dyn RemoteOperationClient>,
        interval: Duration,
        max_transport_failures: u32,
    ) -> Self {
        Self {
            client,
            interval,
            max_transport_failures,
            on_progress: None,
        }
    }

    /// Call `listener` with every progress percentage reported while in progress
    pub fn with_progress_listener(mut self, listener: ProgressListener) -> Self {
        self.on_progress = Some(listener);
        self
    }

    /// Poll `handle` until success, failure or abort
    ///
    /// The first poll is issued immediately; later ones wait `interval`. A transport
    /// error only fails the task once more than `max_transport_failures` happen in a
    /// row, and any answer from the backend resets that count. A response that
    /// arrives after an abort was requested is discarded.
    pub async fn run(&self, handle: &RequestHandle, abort: &mut AbortSignal) -> PollOutcome {
        let mut attempt = PollAttempt::new(handle.clone());
        let mut consecutive_failures: u32 = 0;

        loop {
            if abort.is_aborted() {
                return PollOutcome::Aborted;
            }

            attempt.attempt_count += 1;
            attempt.last_polled_at = Some(Utc::now());
            let result = self.client.poll(&attempt.handle).await;

            if abort.is_aborted() {
                tracing::debug!(
                    handle = %attempt.handle,
                    "Discarding poll result received after abort"
                );
                return PollOutcome::Aborted;
            }

            match result {
                Ok(response) => {
                    consecutive_failures = 0;
                    match response.status {
                        RemoteStatus::Success => {
                            tracing::debug!(
                                handle = %attempt.handle,
                                attempts = attempt.attempt_count,
                                "Remote operation succeeded"
                            );
                            return PollOutcome::Succeeded(response);
                        }
                        RemoteStatus::Failure => {
                            let status = response
                                .raw_status
                                .clone()
                                .unwrap_or_else(|| "FAILURE".to_string());
                            return PollOutcome::Failed(TaskError::RemoteOperationFailure(status));
                        }
                        RemoteStatus::InProgress => {
                            tracing::debug!(
                                handle = %attempt.handle,
                                progress = ?response.progress_percent,
                                "Remote operation in progress"
                            );
                            if let (Some(listener), Some(percent)) =
                                (&self.on_progress, response.progress_percent)
                            {
                                listener(percent);
                            }
                        }
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    tracing::warn!(
                        handle = %attempt.handle,
                        consecutive_failures,
                        error = %e,
                        "Status poll failed"
                    );
                    if consecutive_failures > self.max_transport_failures {
                        return PollOutcome::Failed(TaskError::PollTransport {
                            attempts: consecutive_failures,
                            last_error: e.to_string(),
                        });
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = abort.aborted() => return PollOutcome::Aborted,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientError;
    use crate::models::{OperationRequest, SubmitResponse};
    use crate::workflow::abort::AbortHandle;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed list of poll results, then repeats the last one
    struct Replay {
        results: Mutex<VecDeque<Result<PollResponse, ClientError>>>,
        polls: Mutex<u32>,
    }

    impl Replay {
        fn new(results: Vec<Result<PollResponse, ClientError>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                polls: Mutex::new(0),
            })
        }

        fn polls(&self) -> u32 {
            *self.polls.lock().unwrap()
        }
    }

    #[async_trait]
    impl RemoteOperationClient for Replay {
        async fn submit(&self, _request: &OperationRequest) -> Result<SubmitResponse, ClientError> {
            Ok(SubmitResponse::default())
        }

        async fn poll(&self, _handle: &RequestHandle) -> Result<PollResponse, ClientError> {
            *self.polls.lock().unwrap() += 1;
            let mut results = self.results.lock().unwrap();
            if results.len() > 1 {
                results.pop_front().unwrap()
            } else {
                results.front().cloned().unwrap()
            }
        }
    }

    fn in_progress() -> Result<PollResponse, ClientError> {
        Ok(PollResponse::new(RemoteStatus::InProgress))
    }

    fn transport() -> Result<PollResponse, ClientError> {
        Err(ClientError::Transport("connection reset".to_string()))
    }

    fn polling(client: Arc<Replay>, max_failures: u32) -> PollingLoop {
        PollingLoop::new(client, Duration::from_millis(1), max_failures)
    }

    #[tokio::test]
    async fn test_polls_until_success() {
        let client = Replay::new(vec![
            in_progress(),
            in_progress(),
            Ok(PollResponse::new(RemoteStatus::Success)),
        ]);
        let mut signal = AbortHandle::new().signal();

        let outcome = polling(client.clone(), 3)
            .run(&RequestHandle::from(7), &mut signal)
            .await;

        assert!(matches!(outcome, PollOutcome::Succeeded(_)));
        assert_eq!(client.polls(), 3);
    }

    #[tokio::test]
    async fn test_progress_listener_sees_reported_percentages() {
        let mut halfway = PollResponse::new(RemoteStatus::InProgress);
        halfway.progress_percent = Some(50.0);
        let client = Replay::new(vec![
            in_progress(),
            Ok(halfway),
            Ok(PollResponse::new(RemoteStatus::Success)),
        ]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut signal = AbortHandle::new().signal();

        let outcome = polling(client, 3)
            .with_progress_listener(Box::new(move |percent| sink.lock().unwrap().push(percent)))
            .run(&RequestHandle::from(7), &mut signal)
            .await;

        assert!(matches!(outcome, PollOutcome::Succeeded(_)));
        assert_eq!(*seen.lock().unwrap(), vec![50.0]);
    }

    #[tokio::test]
    async fn test_remote_failure_carries_raw_status() {
        let mut failed = PollResponse::new(RemoteStatus::Failure);
        failed.raw_status = Some("TIMEDOUT".to_string());
        let client = Replay::new(vec![in_progress(), Ok(failed)]);
        let mut signal = AbortHandle::new().signal();

        let outcome = polling(client, 3)
            .run(&RequestHandle::from(1), &mut signal)
            .await;

        match outcome {
            PollOutcome::Failed(TaskError::RemoteOperationFailure(status)) => {
                assert_eq!(status, "TIMEDOUT")
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transport_failures_below_threshold_are_tolerated() {
        let client = Replay::new(vec![
            transport(),
            transport(),
            in_progress(),
            transport(),
            transport(),
            Ok(PollResponse::new(RemoteStatus::Success)),
        ]);
        let mut signal = AbortHandle::new().signal();

        let outcome = polling(client.clone(), 2)
            .run(&RequestHandle::from(1), &mut signal)
            .await;

        assert!(matches!(outcome, PollOutcome::Succeeded(_)));
        assert_eq!(client.polls(), 6);
    }

    #[tokio::test]
    async fn test_transport_failures_above_threshold_fail() {
        let client = Replay::new(vec![transport()]);
        let mut signal = AbortHandle::new().signal();

        let outcome = polling(client.clone(), 2)
            .run(&RequestHandle::from(1), &mut signal)
            .await;

        match outcome {
            PollOutcome::Failed(TaskError::PollTransport { attempts, .. }) => {
                assert_eq!(attempts, 3)
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(client.polls(), 3);
    }

    #[tokio::test]
    async fn test_abort_before_first_poll() {
        let client = Replay::new(vec![in_progress()]);
        let handle = AbortHandle::new();
        handle.abort();
        let mut signal = handle.signal();

        let outcome = polling(client.clone(), 2)
            .run(&RequestHandle::from(1), &mut signal)
            .await;

        assert!(matches!(outcome, PollOutcome::Aborted));
        assert_eq!(client.polls(), 0);
    }

    #[tokio::test]
    async fn test_abort_interrupts_wait() {
        let client = Replay::new(vec![in_progress()]);
        let handle = AbortHandle::new();
        let mut signal = handle.signal();
        let poller = PollingLoop::new(client, Duration::from_secs(60), 2);

        let trigger = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.abort();
        });

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            poller.run(&RequestHandle::from(1), &mut signal),
        )
        .await
        .expect("abort should interrupt the poll interval");
        assert!(matches!(outcome, PollOutcome::Aborted));
    }
}
