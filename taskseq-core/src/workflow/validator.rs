//! Sequence definition validation

use crate::models::{SequenceDefinition, TaskMode};
use crate::workflow::template::placeholders;
use anyhow::{Context, Result};
use jsonschema::JSONSchema;
use serde_json::{json, Value};
use std::collections::HashSet;

/// Validation error type
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

/// Validation result
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: String, message: String) {
        self.errors.push(ValidationError { field, message });
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }
}

/// Structural schema of a definition document
fn definition_schema() -> Value {
    json!({
        "type": "object",
        "required": ["workflow_id", "tasks"],
        "additionalProperties": false,
        "properties": {
            "workflow_id": { "type": "string" },
            "description": { "type": "string" },
            "tasks": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["id", "mode"],
                    "additionalProperties": false,
                    "properties": {
                        "id": { "type": "string" },
                        "label": { "type": "string" },
                        "mode": { "enum": ["sync", "async_fire_and_forget", "async_polled"] },
                        "optional": { "type": "boolean" },
                        "require": { "type": "array", "items": { "type": "string" } },
                        "request": {
                            "type": "object",
                            "required": ["path"],
                            "additionalProperties": false,
                            "properties": {
                                "method": { "enum": ["GET", "POST", "PUT", "DELETE"] },
                                "path": { "type": "string" },
                                "body": {}
                            }
                        },
                        "when": {
                            "type": "object",
                            "required": ["key"],
                            "additionalProperties": false,
                            "properties": {
                                "key": { "type": "string" },
                                "equals": {},
                                "not_equals": {},
                                "present": { "type": "boolean" }
                            }
                        }
                    }
                }
            }
        }
    })
}

/// Collect every string of a JSON document, keys included
fn collect_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|item| collect_strings(item, out)),
        Value::Object(map) => {
            for (key, item) in map {
                out.push(key);
                collect_strings(item, out);
            }
        }
        _ => {}
    }
}

/// Sequence definition validator
pub struct SequenceValidator;

impl SequenceValidator {
    /// Validate a YAML definition document
    ///
    /// Runs the structural schema check first; semantic checks only run on documents that
    /// pass it.
    pub fn validate_document(yaml: &str) -> Result<ValidationResult> {
        let document: Value =
            serde_yaml::from_str(yaml).context("Failed to parse sequence definition YAML")?;

        let schema = definition_schema();
        let compiled = JSONSchema::compile(&schema)
            .map_err(|e| anyhow::anyhow!("Invalid definition schema: {}", e))?;

        let mut result = ValidationResult::new();
        if let Err(errors) = compiled.validate(&document) {
            for error in errors {
                let path = error.instance_path.to_string();
                let field = if path.is_empty() { "/".to_string() } else { path };
                result.add_error(field, error.to_string());
            }
            return Ok(result);
        }

        let definition: SequenceDefinition = serde_json::from_value(document)
            .context("Definition passed the schema but could not be decoded")?;
        Ok(Self::validate_definition(&definition))
    }

    /// Semantic checks on a decoded definition
    pub fn validate_definition(definition: &SequenceDefinition) -> ValidationResult {
        let mut result = ValidationResult::new();

        if definition.workflow_id.trim().is_empty() {
            result.add_error(
                "workflow_id".to_string(),
                "workflow_id cannot be empty".to_string(),
            );
        }

        if definition.tasks.is_empty() {
            result.add_error(
                "tasks".to_string(),
                "A sequence needs at least one task".to_string(),
            );
            return result;
        }

        let mut seen = HashSet::new();
        for (index, task) in definition.tasks.iter().enumerate() {
            let field = |name: &str| format!("tasks[{}].{}", index, name);

            if task.id.trim().is_empty() {
                result.add_error(field("id"), "Task id cannot be empty".to_string());
            } else if !seen.insert(task.id.as_str()) {
                result.add_error(field("id"), format!("Duplicate task id '{}'", task.id));
            }

            match (task.mode, &task.request) {
                (TaskMode::Sync, Some(_)) => result.add_warning(format!(
                    "Task '{}' is sync; its request is ignored",
                    task.id
                )),
                (TaskMode::AsyncFireAndForget | TaskMode::AsyncPolled, None) => result.add_error(
                    field("request"),
                    format!("Task '{}' needs a request for mode {:?}", task.id, task.mode),
                ),
                _ => {}
            }

            if task.mode != TaskMode::Sync && !task.require.is_empty() {
                result.add_warning(format!(
                    "Task '{}' is not sync; its require list is ignored",
                    task.id
                ));
            }

            if let Some(request) = &task.request {
                if let Err(e) = placeholders(&request.path) {
                    result.add_error(field("request.path"), e.to_string());
                }
                if let Some(body) = &request.body {
                    let mut strings = Vec::new();
                    collect_strings(body, &mut strings);
                    for text in strings {
                        if let Err(e) = placeholders(text) {
                            result.add_error(field("request.body"), e.to_string());
                        }
                    }
                }
            }

            if task.label.trim().is_empty() {
                result.add_warning(format!("Task '{}' has no label", task.id));
            }
        }

        if definition.tasks.iter().all(|task| task.optional) {
            result.add_warning(
                "Every task is optional; the sequence can never fail".to_string(),
            );
        }

        result
    }
}
