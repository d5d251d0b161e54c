//! Sequence runner: dispatch, polling, retry/skip/abort and resumable progress

use crate::client::RemoteOperationClient;
use crate::error::{SequenceError, TaskError};
use crate::models::{
    AggregateStatus, RequestHandle, ResumePolicy, RunState, RunnerConfig, TaskStatus,
    WorkflowContext,
};
use crate::services::logging::{log_run_status, log_task_failure, log_task_transition};
use crate::workflow::abort::{AbortHandle, AbortSignal};
use crate::workflow::persistence::RunStateStore;
use crate::workflow::poller::{PollOutcome, PollingLoop};
use crate::workflow::sequence::{TaskDescriptor, TaskKind, TaskSequence};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Snapshot emitted after every run state transition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressEvent {
    pub workflow_id: String,
    /// Task at the current index; absent once the run moved past the last task
    pub current_task_id: Option<String>,
    pub current_task_status: Option<TaskStatus>,
    pub fraction_complete: f64,
    pub aggregate_status: AggregateStatus,
    /// Backend-reported percentage of the current remote operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_progress: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn from_state(state: &RunState) -> Self {
        Self {
            workflow_id: state.workflow_id.clone(),
            current_task_id: state.current_task_id().map(str::to_string),
            current_task_status: state.current_task_status(),
            fraction_complete: state.fraction_complete(),
            aggregate_status: state.aggregate_status,
            task_progress: None,
            timestamp: state.updated_at,
        }
    }
}

/// Terminal result of one dispatch
enum StepOutcome {
    Completed,
    Failed(TaskError),
    Aborted,
}

struct ActiveRun {
    sequence: TaskSequence,
    context: WorkflowContext,
    state: RunState,
}

/// Drives one task sequence at a time against a remote operation client
pub struct SequenceRunner {
    client: Arc<dyn RemoteOperationClient>,
    store: Arc<dyn RunStateStore>,
    config: RunnerConfig,
    events: broadcast::Sender<ProgressEvent>,
    abort: AbortHandle,
    active: Option<ActiveRun>,
}

impl SequenceRunner {
    pub fn new(
        client: Arc<dyn RemoteOperationClient>,
        store: Arc<dyn RunStateStore>,
        config: RunnerConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            client,
            store,
            config,
            events,
            abort: AbortHandle::new(),
            active: None,
        }
    }

    /// Progress events of every run driven by this runner
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    /// Handle for aborting a drive from another task
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Current run state, if a run is loaded
    pub fn state(&self) -> Option<&RunState> {
        self.active.as_ref().map(|run| &run.state)
    }

    /// Start a fresh run and drive it until it completes, fails or is aborted
    ///
    /// # Errors
    /// `AlreadyRunning` when a run of the same workflow is stored as `RUNNING`.
    pub async fn start(
        &mut self,
        sequence: TaskSequence,
        context: WorkflowContext,
    ) -> Result<RunState, SequenceError> {
        sequence.validate()?;
        let workflow_id = sequence.workflow_id().to_string();

        let running_here = self
            .active
            .as_ref()
            .map(|run| {
                run.state.workflow_id == workflow_id
                    && run.state.aggregate_status == AggregateStatus::Running
            })
            .unwrap_or(false);
        let running_stored = self
            .store
            .load(&workflow_id)?
            .map(|state| state.aggregate_status == AggregateStatus::Running)
            .unwrap_or(false);
        if running_here || running_stored {
            return Err(SequenceError::AlreadyRunning(workflow_id));
        }

        let mut state = RunState::new(&workflow_id, sequence.task_ids());
        state.set_aggregate(AggregateStatus::Running);
        tracing::info!(
            workflow_id = %workflow_id,
            run_id = %state.run_id,
            tasks = state.task_order.len(),
            "Starting task sequence"
        );

        self.abort.reset();
        self.active = Some(ActiveRun {
            sequence,
            context,
            state,
        });
        self.commit_active()?;
        self.drive().await
    }

    /// Continue a persisted run
    ///
    /// A polled task found `IN_PROGRESS` with a stored handle is polled again rather than
    /// resubmitted. Terminal and failed runs are loaded and returned unchanged.
    pub async fn resume(
        &mut self,
        persisted: RunState,
        sequence: TaskSequence,
        context: WorkflowContext,
    ) -> Result<RunState, SequenceError> {
        sequence.validate()?;
        check_matches(&persisted, &sequence)?;

        let status = persisted.aggregate_status;
        tracing::info!(
            workflow_id = %persisted.workflow_id,
            run_id = %persisted.run_id,
            status = %status,
            current_index = persisted.current_index,
            "Resuming task sequence"
        );
        self.active = Some(ActiveRun {
            sequence,
            context,
            state: persisted,
        });

        match status {
            AggregateStatus::Completed | AggregateStatus::Aborted | AggregateStatus::Failed => {
                self.snapshot()
            }
            AggregateStatus::NotStarted | AggregateStatus::Running => {
                if let Some(run) = self.active.as_mut() {
                    run.state.set_aggregate(AggregateStatus::Running);
                }
                self.abort.reset();
                self.commit_active()?;
                self.drive().await
            }
        }
    }

    /// Reset the failed task to `PENDING` and drive again from it
    pub async fn retry(&mut self) -> Result<RunState, SequenceError> {
        {
            let run = self.failed_run("retry")?;
            let task_id = failed_task_id(run, "retry")?;
            run.state.set_status(&task_id, TaskStatus::Pending);
            run.state.request_handle = None;
            run.state.set_aggregate(AggregateStatus::Running);
            tracing::info!(workflow_id = %run.state.workflow_id, task_id = %task_id, "Retrying task");
        }
        self.abort.reset();
        self.commit_active()?;
        self.drive().await
    }

    /// Mark the failed task `SKIPPED` and continue with the next one
    pub async fn skip(&mut self) -> Result<RunState, SequenceError> {
        {
            let run = self.failed_run("skip")?;
            let task_id = failed_task_id(run, "skip")?;
            run.state.set_status(&task_id, TaskStatus::Skipped);
            run.state.request_handle = None;
            run.state.current_index += 1;
            run.state.set_aggregate(AggregateStatus::Running);
            tracing::info!(workflow_id = %run.state.workflow_id, task_id = %task_id, "Skipping failed task");
        }
        self.abort.reset();
        self.commit_active()?;
        self.drive().await
    }

    /// Abort the loaded run
    ///
    /// While a drive is in progress use [`SequenceRunner::abort_handle`] instead. Remote
    /// operations already submitted are left running.
    pub fn abort(&mut self) -> Result<RunState, SequenceError> {
        self.abort.abort();
        {
            let run = self.active.as_mut().ok_or(SequenceError::NoActiveRun)?;
            match run.state.aggregate_status {
                AggregateStatus::Aborted => return Ok(run.state.clone()),
                AggregateStatus::Completed => {
                    return Err(SequenceError::InvalidTransition {
                        workflow_id: run.state.workflow_id.clone(),
                        operation: "abort",
                        status: AggregateStatus::Completed,
                    })
                }
                _ => run.state.set_aggregate(AggregateStatus::Aborted),
            }
        }
        self.commit_active()?;
        self.snapshot()
    }

    /// Clear the stored state of a finished run
    pub fn acknowledge(&mut self) -> Result<(), SequenceError> {
        let run = self.active.as_ref().ok_or(SequenceError::NoActiveRun)?;
        if !run.state.aggregate_status.is_terminal() {
            return Err(SequenceError::InvalidTransition {
                workflow_id: run.state.workflow_id.clone(),
                operation: "acknowledge",
                status: run.state.aggregate_status,
            });
        }
        self.store.clear(&run.state.workflow_id)?;
        tracing::debug!(workflow_id = %run.state.workflow_id, "Run acknowledged");
        self.active = None;
        Ok(())
    }

    /// Drop any stored state for `workflow_id`, whatever its status
    pub fn discard(&mut self, workflow_id: &str) -> Result<(), SequenceError> {
        self.store.clear(workflow_id)?;
        if self
            .active
            .as_ref()
            .map(|run| run.state.workflow_id == workflow_id)
            .unwrap_or(false)
        {
            self.active = None;
        }
        tracing::info!(workflow_id, "Run state discarded");
        Ok(())
    }

    /// Mark a stored run `ABORTED` without loading its sequence
    ///
    /// Used for runs left `RUNNING` by a process that is gone.
    pub fn abort_stored(
        store: &dyn RunStateStore,
        workflow_id: &str,
    ) -> Result<RunState, SequenceError> {
        let mut state = store.load(workflow_id)?.ok_or(SequenceError::NoActiveRun)?;
        match state.aggregate_status {
            AggregateStatus::Aborted => Ok(state),
            AggregateStatus::Completed => Err(SequenceError::InvalidTransition {
                workflow_id: workflow_id.to_string(),
                operation: "abort",
                status: AggregateStatus::Completed,
            }),
            _ => {
                state.set_aggregate(AggregateStatus::Aborted);
                store.save(workflow_id, &state)?;
                log_run_status(workflow_id, state.aggregate_status, state.fraction_complete());
                Ok(state)
            }
        }
    }

    fn snapshot(&self) -> Result<RunState, SequenceError> {
        self.state().cloned().ok_or(SequenceError::NoActiveRun)
    }

    fn failed_run(&mut self, operation: &'static str) -> Result<&mut ActiveRun, SequenceError> {
        let run = self.active.as_mut().ok_or(SequenceError::NoActiveRun)?;
        if run.state.aggregate_status != AggregateStatus::Failed {
            return Err(SequenceError::InvalidTransition {
                workflow_id: run.state.workflow_id.clone(),
                operation,
                status: run.state.aggregate_status,
            });
        }
        Ok(run)
    }

    /// Persist then announce a transition
    fn commit(&self, state: &RunState) -> Result<(), SequenceError> {
        self.store.save(&state.workflow_id, state)?;
        // No subscribers is fine
        let _ = self.events.send(ProgressEvent::from_state(state));
        Ok(())
    }

    fn commit_active(&self) -> Result<(), SequenceError> {
        let run = self.active.as_ref().ok_or(SequenceError::NoActiveRun)?;
        self.commit(&run.state)
    }

    async fn drive(&mut self) -> Result<RunState, SequenceError> {
        let mut run = self.active.take().ok_or(SequenceError::NoActiveRun)?;
        let result = self.drive_run(&mut run).await;
        let snapshot = run.state.clone();
        self.active = Some(run);
        result.map(|()| snapshot)
    }

    async fn drive_run(&self, run: &mut ActiveRun) -> Result<(), SequenceError> {
        let mut signal = self.abort.signal();

        loop {
            if signal.is_aborted() {
                return self.finish_aborted(run);
            }

            let Some(task) = run.sequence.get(run.state.current_index).cloned() else {
                run.state.request_handle = None;
                run.state.set_aggregate(AggregateStatus::Completed);
                self.commit(&run.state)?;
                log_run_status(
                    &run.state.workflow_id,
                    AggregateStatus::Completed,
                    run.state.fraction_complete(),
                );
                return Ok(());
            };

            let status = run.state.status_of(&task.id).unwrap_or(TaskStatus::Pending);
            let outcome = match status {
                TaskStatus::Completed | TaskStatus::Skipped => {
                    run.state.current_index += 1;
                    continue;
                }
                TaskStatus::Failed => {
                    // Interrupted between recording a failure and acting on it
                    if self.settle_failure(run, &task)? {
                        continue;
                    }
                    return Ok(());
                }
                TaskStatus::Pending => self.dispatch(run, &task, &mut signal).await?,
                TaskStatus::InProgress => self.continue_in_progress(run, &task, &mut signal).await?,
            };

            match outcome {
                StepOutcome::Completed => {
                    run.state.request_handle = None;
                    run.state.clear_error(&task.id);
                    run.state.set_status(&task.id, TaskStatus::Completed);
                    run.state.current_index += 1;
                    self.commit(&run.state)?;
                    log_task_transition(
                        &run.state.workflow_id,
                        &task.id,
                        TaskStatus::Completed,
                        run.state.attempts_for(&task.id),
                    );
                }
                StepOutcome::Failed(error) => {
                    let message = error.to_string();
                    run.state.request_handle = None;
                    run.state.record_error(&task.id, &message);
                    run.state.set_status(&task.id, TaskStatus::Failed);
                    self.commit(&run.state)?;
                    log_task_failure(&run.state.workflow_id, &task.id, task.optional, &message);

                    if !self.settle_failure(run, &task)? {
                        return Ok(());
                    }
                }
                StepOutcome::Aborted => return self.finish_aborted(run),
            }
        }
    }

    /// Skip a failed optional task or fail the run; returns whether the run goes on
    fn settle_failure(&self, run: &mut ActiveRun, task: &TaskDescriptor) -> Result<bool, SequenceError> {
        if task.optional {
            run.state.set_status(&task.id, TaskStatus::Skipped);
            run.state.current_index += 1;
            self.commit(&run.state)?;
            log_task_transition(
                &run.state.workflow_id,
                &task.id,
                TaskStatus::Skipped,
                run.state.attempts_for(&task.id),
            );
            Ok(true)
        } else {
            run.state.set_aggregate(AggregateStatus::Failed);
            self.commit(&run.state)?;
            log_run_status(
                &run.state.workflow_id,
                AggregateStatus::Failed,
                run.state.fraction_complete(),
            );
            Ok(false)
        }
    }

    fn finish_aborted(&self, run: &mut ActiveRun) -> Result<(), SequenceError> {
        run.state.set_aggregate(AggregateStatus::Aborted);
        self.commit(&run.state)?;
        log_run_status(
            &run.state.workflow_id,
            AggregateStatus::Aborted,
            run.state.fraction_complete(),
        );
        Ok(())
    }

    /// Mark the task `IN_PROGRESS` and run it according to its mode
    async fn dispatch(
        &self,
        run: &mut ActiveRun,
        task: &TaskDescriptor,
        signal: &mut AbortSignal,
    ) -> Result<StepOutcome, SequenceError> {
        run.state.request_handle = None;
        run.state.record_attempt(&task.id);
        run.state.set_status(&task.id, TaskStatus::InProgress);
        self.commit(&run.state)?;
        log_task_transition(
            &run.state.workflow_id,
            &task.id,
            TaskStatus::InProgress,
            run.state.attempts_for(&task.id),
        );

        let builder = match &task.kind {
            TaskKind::Sync(step) => {
                return Ok(match step.run(&run.context) {
                    Ok(()) => StepOutcome::Completed,
                    Err(e) => StepOutcome::Failed(e),
                });
            }
            TaskKind::FireAndForget(builder) | TaskKind::Polled(builder) => builder,
        };

        let request = match builder.build(&run.context) {
            Ok(request) => request,
            Err(e) => return Ok(StepOutcome::Failed(e)),
        };
        tracing::debug!(
            workflow_id = %run.state.workflow_id,
            task_id = %task.id,
            method = %request.method,
            path = %request.path,
            "Submitting request"
        );

        let submitted = self.client.submit(&request).await;
        if signal.is_aborted() {
            tracing::debug!(task_id = %task.id, "Discarding submit result received after abort");
            return Ok(StepOutcome::Aborted);
        }
        let response = match submitted {
            Ok(response) => response,
            Err(e) => return Ok(StepOutcome::Failed(TaskError::RequestDispatch(e.to_string()))),
        };

        match (&task.kind, response.handle) {
            (TaskKind::Polled(_), Some(handle)) => {
                run.state.request_handle = Some(handle.clone());
                self.commit(&run.state)?;
                Ok(self.poll(&run.state, &handle, signal).await)
            }
            (TaskKind::Polled(_), None) => {
                tracing::debug!(task_id = %task.id, "No request created, nothing to poll");
                Ok(StepOutcome::Completed)
            }
            _ => Ok(StepOutcome::Completed),
        }
    }

    /// Pick up a task that was `IN_PROGRESS` when the run was persisted
    async fn continue_in_progress(
        &self,
        run: &mut ActiveRun,
        task: &TaskDescriptor,
        signal: &mut AbortSignal,
    ) -> Result<StepOutcome, SequenceError> {
        match (&task.kind, run.state.request_handle.clone()) {
            (TaskKind::Polled(_), Some(handle)) => {
                tracing::info!(
                    workflow_id = %run.state.workflow_id,
                    task_id = %task.id,
                    handle = %handle,
                    "Re-polling in-flight request"
                );
                Ok(self.poll(&run.state, &handle, signal).await)
            }
            (TaskKind::Polled(_), None) => self.dispatch(run, task, signal).await,
            _ => match self.config.resume_policy {
                ResumePolicy::Redispatch => self.dispatch(run, task, signal).await,
                ResumePolicy::AssumeCompleted => {
                    tracing::info!(
                        workflow_id = %run.state.workflow_id,
                        task_id = %task.id,
                        "Assuming interrupted task completed"
                    );
                    Ok(StepOutcome::Completed)
                }
            },
        }
    }

    async fn poll(
        &self,
        state: &RunState,
        handle: &RequestHandle,
        signal: &mut AbortSignal,
    ) -> StepOutcome {
        // Progress updates are announced but not persisted
        let events = self.events.clone();
        let snapshot = ProgressEvent::from_state(state);
        let polling = PollingLoop::new(
            self.client.clone(),
            self.config.poll_interval,
            self.config.max_transport_failures,
        )
        .with_progress_listener(Box::new(move |percent| {
            let event = ProgressEvent {
                task_progress: Some(percent),
                timestamp: Utc::now(),
                ..snapshot.clone()
            };
            let _ = events.send(event);
        }));
        match polling.run(handle, signal).await {
            PollOutcome::Succeeded(_) => StepOutcome::Completed,
            PollOutcome::Failed(e) => StepOutcome::Failed(e),
            PollOutcome::Aborted => StepOutcome::Aborted,
        }
    }
}

/// Reject a persisted state recorded for a different sequence
fn check_matches(persisted: &RunState, sequence: &TaskSequence) -> Result<(), SequenceError> {
    let mismatch = |reason: String| SequenceError::ResumeMismatch {
        workflow_id: sequence.workflow_id().to_string(),
        reason,
    };

    if persisted.workflow_id != sequence.workflow_id() {
        return Err(mismatch(format!(
            "state belongs to workflow '{}'",
            persisted.workflow_id
        )));
    }
    if persisted.task_order != sequence.task_ids() {
        return Err(mismatch(format!(
            "stored task order [{}] differs from [{}]",
            persisted.task_order.join(", "),
            sequence.task_ids().join(", ")
        )));
    }
    if persisted.current_index > persisted.task_order.len() {
        return Err(mismatch(format!(
            "current index {} is past the last task",
            persisted.current_index
        )));
    }
    Ok(())
}

fn failed_task_id(run: &ActiveRun, operation: &'static str) -> Result<String, SequenceError> {
    match run.state.current_task_id() {
        Some(id) if run.state.status_of(id) == Some(TaskStatus::Failed) => Ok(id.to_string()),
        _ => Err(SequenceError::InvalidTransition {
            workflow_id: run.state.workflow_id.clone(),
            operation,
            status: run.state.aggregate_status,
        }),
    }
}
