//! Task descriptors and ordered task sequences

use crate::error::{SequenceError, TaskError};
use crate::models::{OperationRequest, TaskMode, WorkflowContext};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Produces the remote request of a task from the workflow context
///
/// Must be deterministic for a given context so a resumed run rebuilds the same request.
pub trait RequestBuilder: Send + Sync {
    fn build(&self, context: &WorkflowContext) -> Result<OperationRequest, TaskError>;
}

impl<F> RequestBuilder for F
where
    F: Fn(&WorkflowContext) -> Result<OperationRequest, TaskError> + Send + Sync,
{
    fn build(&self, context: &WorkflowContext) -> Result<OperationRequest, TaskError> {
        self(context)
    }
}

/// Local work performed by a sync task
pub trait LocalStep: Send + Sync {
    fn run(&self, context: &WorkflowContext) -> Result<(), TaskError>;
}

impl<F> LocalStep for F
where
    F: Fn(&WorkflowContext) -> Result<(), TaskError> + Send + Sync,
{
    fn run(&self, context: &WorkflowContext) -> Result<(), TaskError> {
        self(context)
    }
}

/// Execution mode together with its handler
#[derive(Clone)]
pub enum TaskKind {
    Sync(Arc<dyn LocalStep>),
    FireAndForget(Arc<dyn RequestBuilder>),
    Polled(Arc<dyn RequestBuilder>),
}

impl TaskKind {
    pub fn mode(&self) -> TaskMode {
        match self {
            TaskKind::Sync(_) => TaskMode::Sync,
            TaskKind::FireAndForget(_) => TaskMode::AsyncFireAndForget,
            TaskKind::Polled(_) => TaskMode::AsyncPolled,
        }
    }
}

impl fmt::Debug for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.mode())
    }
}

/// Immutable definition of one step
#[derive(Clone, Debug)]
pub struct TaskDescriptor {
    pub id: String,
    pub label: String,
    /// Failure does not halt the sequence
    pub optional: bool,
    pub kind: TaskKind,
}

impl TaskDescriptor {
    pub fn new(id: impl Into<String>, label: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            optional: false,
            kind,
        }
    }

    pub fn sync(
        id: impl Into<String>,
        label: impl Into<String>,
        step: impl LocalStep + 'static,
    ) -> Self {
        Self::new(id, label, TaskKind::Sync(Arc::new(step)))
    }

    pub fn fire_and_forget(
        id: impl Into<String>,
        label: impl Into<String>,
        builder: impl RequestBuilder + 'static,
    ) -> Self {
        Self::new(id, label, TaskKind::FireAndForget(Arc::new(builder)))
    }

    pub fn polled(
        id: impl Into<String>,
        label: impl Into<String>,
        builder: impl RequestBuilder + 'static,
    ) -> Self {
        Self::new(id, label, TaskKind::Polled(Arc::new(builder)))
    }

    /// Mark the task optional
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn mode(&self) -> TaskMode {
        self.kind.mode()
    }
}

/// Ordered list of tasks for one workflow
#[derive(Clone, Debug)]
pub struct TaskSequence {
    workflow_id: String,
    tasks: Vec<TaskDescriptor>,
}

impl TaskSequence {
    pub fn new(workflow_id: impl Into<String>, tasks: Vec<TaskDescriptor>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            tasks,
        }
    }

    /// Reject empty sequences and duplicate task ids
    pub fn validate(&self) -> Result<(), SequenceError> {
        if self.tasks.is_empty() {
            return Err(SequenceError::EmptySequence(self.workflow_id.clone()));
        }

        let mut seen = HashSet::new();
        for task in &self.tasks {
            if !seen.insert(task.id.as_str()) {
                return Err(SequenceError::DuplicateTaskId {
                    workflow_id: self.workflow_id.clone(),
                    task_id: task.id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Drop tasks by id before the run starts; unknown ids are ignored
    pub fn without_tasks(mut self, ids: &[&str]) -> Self {
        self.tasks.retain(|task| !ids.contains(&task.id.as_str()));
        self
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn tasks(&self) -> &[TaskDescriptor] {
        &self.tasks
    }

    pub fn get(&self, index: usize) -> Option<&TaskDescriptor> {
        self.tasks.get(index)
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.tasks.iter().map(|task| task.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HttpMethod;

    fn noop(_: &WorkflowContext) -> Result<(), TaskError> {
        Ok(())
    }

    fn stop_services(ctx: &WorkflowContext) -> Result<OperationRequest, TaskError> {
        let cluster = ctx
            .get_str("cluster")
            .ok_or_else(|| TaskError::RequestBuild("cluster missing".to_string()))?;
        Ok(OperationRequest::new(
            HttpMethod::Put,
            format!("/clusters/{}/services", cluster),
        ))
    }

    #[test]
    fn test_validate_empty_sequence() {
        let sequence = TaskSequence::new("enableRmHA", vec![]);
        assert!(matches!(
            sequence.validate(),
            Err(SequenceError::EmptySequence(id)) if id == "enableRmHA"
        ));
    }

    #[test]
    fn test_validate_duplicate_ids() {
        let sequence = TaskSequence::new(
            "enableRmHA",
            vec![
                TaskDescriptor::sync("check", "Check", noop),
                TaskDescriptor::polled("stop", "Stop", stop_services),
                TaskDescriptor::sync("check", "Check again", noop),
            ],
        );
        assert!(matches!(
            sequence.validate(),
            Err(SequenceError::DuplicateTaskId { task_id, .. }) if task_id == "check"
        ));
    }

    #[test]
    fn test_without_tasks_keeps_order() {
        let sequence = TaskSequence::new(
            "reassignMaster",
            vec![
                TaskDescriptor::polled("stopServices", "", stop_services),
                TaskDescriptor::polled("cleanMySqlServer", "", stop_services),
                TaskDescriptor::polled("createHostComponents", "", stop_services),
                TaskDescriptor::polled("configureMySqlServer", "", stop_services),
            ],
        )
        .without_tasks(&["cleanMySqlServer", "configureMySqlServer", "unknown"]);

        assert_eq!(
            sequence.task_ids(),
            vec!["stopServices".to_string(), "createHostComponents".to_string()]
        );
        assert!(sequence.validate().is_ok());
    }

    #[test]
    fn test_modes_follow_kind() {
        let task = TaskDescriptor::fire_and_forget("tag", "Tag", stop_services).optional();
        assert_eq!(task.mode(), TaskMode::AsyncFireAndForget);
        assert!(task.optional);
        assert_eq!(format!("{:?}", task.kind), "AsyncFireAndForget");
    }

    #[test]
    fn test_closure_builder_reads_context() {
        let ctx = WorkflowContext::new().with("cluster", "c1");
        let request = stop_services.build(&ctx).unwrap();
        assert_eq!(request.path, "/clusters/c1/services");
        assert!(stop_services.build(&WorkflowContext::new()).is_err());
    }
}
