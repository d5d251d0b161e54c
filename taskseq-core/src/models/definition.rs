//! Declarative sequence definitions loaded from YAML

use crate::models::context::WorkflowContext;
use crate::models::task::{HttpMethod, TaskMode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A workflow's command list as written in a definition file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceDefinition {
    /// Business operation identifier, e.g. `enableNameNodeHA`
    pub workflow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Commands in execution order
    pub tasks: Vec<TaskDefinition>,
}

/// One command of a definition file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: String,
    #[serde(default)]
    pub label: String,
    pub mode: TaskMode,
    #[serde(default)]
    pub optional: bool,
    /// Request template for remote modes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestTemplate>,
    /// Context keys a sync task requires to be present
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub require: Vec<String>,
    /// Keep the task only when this holds for the context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Condition>,
}

/// Request with `{placeholder}` substitution from the context
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestTemplate {
    #[serde(default)]
    pub method: HttpMethod,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Context predicate deciding whether a task belongs in the sequence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_equals: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub present: Option<bool>,
}

impl Condition {
    /// All given constraints must hold; with none given the key must be present
    pub fn matches(&self, context: &WorkflowContext) -> bool {
        let value = context.get(&self.key);

        if self.equals.is_none() && self.not_equals.is_none() && self.present.is_none() {
            return value.is_some();
        }
        if let Some(expected) = &self.equals {
            if value != Some(expected) {
                return false;
            }
        }
        if let Some(rejected) = &self.not_equals {
            if value == Some(rejected) {
                return false;
            }
        }
        if let Some(present) = self.present {
            if value.is_some() != present {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> WorkflowContext {
        WorkflowContext::from_value(json!({"db_type": "mysql", "remote_db": false})).unwrap()
    }

    #[test]
    fn test_condition_equals() {
        let cond = Condition {
            key: "db_type".to_string(),
            equals: Some(json!("mysql")),
            not_equals: None,
            present: None,
        };
        assert!(cond.matches(&ctx()));

        let cond = Condition {
            equals: Some(json!("derby")),
            ..cond
        };
        assert!(!cond.matches(&ctx()));
    }

    #[test]
    fn test_condition_presence() {
        let cond = Condition {
            key: "kdc_host".to_string(),
            equals: None,
            not_equals: None,
            present: Some(false),
        };
        assert!(cond.matches(&ctx()));

        let bare = Condition {
            key: "remote_db".to_string(),
            equals: None,
            not_equals: None,
            present: None,
        };
        assert!(bare.matches(&ctx()));
    }

    #[test]
    fn test_task_definition_defaults() {
        let task: TaskDefinition = serde_yaml::from_str(
            r#"
id: startServices
mode: async_polled
request:
  path: /clusters/{cluster}/services
"#,
        )
        .unwrap();
        assert!(!task.optional);
        assert!(task.label.is_empty());
        assert_eq!(task.request.unwrap().method, HttpMethod::Put);
    }
}
