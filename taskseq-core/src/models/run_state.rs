//! Persisted progress of one workflow run

use crate::models::task::{AggregateStatus, RequestHandle, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Progress of a workflow run, saved after every status transition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunState {
    /// Unique run identifier
    pub run_id: Uuid,
    /// Workflow this run belongs to
    pub workflow_id: String,
    /// Index of the task being worked on; equals the task count once done
    pub current_index: usize,
    /// Task ids in execution order
    pub task_order: Vec<String>,
    /// Status per task id
    pub task_statuses: BTreeMap<String, TaskStatus>,
    /// Remote operation currently in flight
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_handle: Option<RequestHandle>,
    /// Overall status
    pub aggregate_status: AggregateStatus,
    /// Dispatch count per task id
    #[serde(default)]
    pub attempts: BTreeMap<String, u32>,
    /// Last failure message per task id
    #[serde(default)]
    pub errors: BTreeMap<String, String>,
    /// When the run was created
    pub started_at: DateTime<Utc>,
    /// Last transition time
    pub updated_at: DateTime<Utc>,
}

impl RunState {
    /// Fresh run with every task pending
    pub fn new<I, S>(workflow_id: impl Into<String>, task_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let task_order: Vec<String> = task_ids.into_iter().map(Into::into).collect();
        let task_statuses = task_order
            .iter()
            .map(|id| (id.clone(), TaskStatus::Pending))
            .collect();
        let now = Utc::now();

        Self {
            run_id: Uuid::new_v4(),
            workflow_id: workflow_id.into(),
            current_index: 0,
            task_order,
            task_statuses,
            request_handle: None,
            aggregate_status: AggregateStatus::NotStarted,
            attempts: BTreeMap::new(),
            errors: BTreeMap::new(),
            started_at: now,
            updated_at: now,
        }
    }

    pub fn status_of(&self, task_id: &str) -> Option<TaskStatus> {
        self.task_statuses.get(task_id).copied()
    }

    pub fn set_status(&mut self, task_id: &str, status: TaskStatus) {
        if let Some(slot) = self.task_statuses.get_mut(task_id) {
            *slot = status;
        }
        self.touch();
    }

    pub fn set_aggregate(&mut self, status: AggregateStatus) {
        self.aggregate_status = status;
        self.touch();
    }

    /// Id of the task at `current_index`, if any
    pub fn current_task_id(&self) -> Option<&str> {
        self.task_order.get(self.current_index).map(String::as_str)
    }

    pub fn current_task_status(&self) -> Option<TaskStatus> {
        self.current_task_id().and_then(|id| self.status_of(id))
    }

    /// `(completed + skipped) / total`, in `[0, 1]`
    pub fn fraction_complete(&self) -> f64 {
        if self.task_order.is_empty() {
            return 0.0;
        }
        let done = self
            .task_statuses
            .values()
            .filter(|status| status.is_done())
            .count();
        done as f64 / self.task_order.len() as f64
    }

    pub fn attempts_for(&self, task_id: &str) -> u32 {
        self.attempts.get(task_id).copied().unwrap_or(0)
    }

    pub fn record_attempt(&mut self, task_id: &str) {
        *self.attempts.entry(task_id.to_string()).or_insert(0) += 1;
    }

    pub fn record_error(&mut self, task_id: &str, message: impl Into<String>) {
        self.errors.insert(task_id.to_string(), message.into());
    }

    pub fn clear_error(&mut self, task_id: &str) {
        self.errors.remove(task_id);
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_run_state_is_pending() {
        let state = RunState::new("enableNameNodeHA", ["stopServices", "installNameNode"]);
        assert_eq!(state.aggregate_status, AggregateStatus::NotStarted);
        assert_eq!(state.current_task_id(), Some("stopServices"));
        assert_eq!(state.status_of("installNameNode"), Some(TaskStatus::Pending));
        assert_eq!(state.fraction_complete(), 0.0);
    }

    #[test]
    fn test_fraction_counts_completed_and_skipped() {
        let mut state = RunState::new("wf", ["a", "b", "c", "d"]);
        state.set_status("a", TaskStatus::Completed);
        state.set_status("b", TaskStatus::Skipped);
        state.set_status("c", TaskStatus::Failed);
        assert_eq!(state.fraction_complete(), 0.5);
    }

    #[test]
    fn test_set_status_ignores_unknown_task() {
        let mut state = RunState::new("wf", ["a"]);
        state.set_status("zzz", TaskStatus::Completed);
        assert_eq!(state.task_statuses.len(), 1);
    }

    #[test]
    fn test_run_state_json_shape() {
        let mut state = RunState::new("wf", ["a"]);
        state.request_handle = Some(RequestHandle::from(9));
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["task_statuses"]["a"], "PENDING");
        assert_eq!(json["request_handle"], "9");
        assert_eq!(json["aggregate_status"], "NOT_STARTED");

        let back: RunState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }
}
