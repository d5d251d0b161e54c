//! Loading YAML sequence definitions and turning them into runnable sequences

use crate::error::SequenceError;
use crate::models::{SequenceDefinition, TaskDefinition, TaskMode, WorkflowContext};
use crate::workflow::sequence::{TaskDescriptor, TaskSequence};
use crate::workflow::template::RequireKeys;
use anyhow::{Context, Result};
use std::path::Path;

/// Parse a definition from YAML text
pub fn parse_definition(yaml: &str) -> Result<SequenceDefinition> {
    serde_yaml::from_str(yaml).context("Failed to parse sequence definition")
}

/// Read and parse a definition file
pub fn load_definition(path: &Path) -> Result<SequenceDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read sequence definition {}", path.display()))?;
    parse_definition(&content).with_context(|| format!("In {}", path.display()))
}

impl SequenceDefinition {
    /// Build the runnable sequence for `context`
    ///
    /// Tasks whose `when` condition does not hold are left out.
    pub fn build(&self, context: &WorkflowContext) -> Result<TaskSequence, SequenceError> {
        let mut tasks = Vec::with_capacity(self.tasks.len());

        for task in &self.tasks {
            if let Some(condition) = &task.when {
                if !condition.matches(context) {
                    tracing::debug!(
                        workflow_id = %self.workflow_id,
                        task_id = %task.id,
                        key = %condition.key,
                        "Task pruned by condition"
                    );
                    continue;
                }
            }
            tasks.push(self.descriptor(task)?);
        }

        let sequence = TaskSequence::new(&self.workflow_id, tasks);
        sequence.validate()?;
        Ok(sequence)
    }

    fn descriptor(&self, task: &TaskDefinition) -> Result<TaskDescriptor, SequenceError> {
        let label = if task.label.is_empty() {
            task.id.clone()
        } else {
            task.label.clone()
        };

        let descriptor = match task.mode {
            TaskMode::Sync => {
                TaskDescriptor::sync(&task.id, label, RequireKeys(task.require.clone()))
            }
            TaskMode::AsyncFireAndForget | TaskMode::AsyncPolled => {
                let template = task.request.clone().ok_or_else(|| {
                    SequenceError::InvalidDefinition(format!(
                        "task '{}' of workflow '{}' needs a request",
                        task.id, self.workflow_id
                    ))
                })?;
                if task.mode == TaskMode::AsyncPolled {
                    TaskDescriptor::polled(&task.id, label, template)
                } else {
                    TaskDescriptor::fire_and_forget(&task.id, label, template)
                }
            }
        };

        Ok(if task.optional {
            descriptor.optional()
        } else {
            descriptor
        })
    }
}
