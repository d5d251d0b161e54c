//! Read-only workflow context handed to request builders

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Business data collected by a wizard (cluster name, hosts, config tags, ...)
///
/// Builders only ever see `&WorkflowContext`; the runner never mutates it, which keeps
/// request building deterministic across a resume.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct WorkflowContext {
    values: Map<String, Value>,
}

impl WorkflowContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON object; anything else is rejected
    pub fn from_value(value: Value) -> anyhow::Result<Self> {
        match value {
            Value::Object(values) => Ok(Self { values }),
            Value::Null => Ok(Self::default()),
            other => Err(anyhow::anyhow!(
                "Workflow context must be a JSON object, got {}",
                other
            )),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Look up a key; dotted keys walk nested objects (`hosts.source`)
    pub fn get(&self, key: &str) -> Option<&Value> {
        let mut parts = key.split('.');
        let first = parts.next()?;
        let mut current = self.values.get(first)?;
        for part in parts {
            current = match current {
                Value::Object(map) => map.get(part)?,
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dotted_lookup() {
        let ctx = WorkflowContext::from_value(json!({
            "cluster": "c1",
            "hosts": { "source": "h1", "targets": ["h2", "h3"] }
        }))
        .unwrap();

        assert_eq!(ctx.get_str("cluster"), Some("c1"));
        assert_eq!(ctx.get_str("hosts.source"), Some("h1"));
        assert_eq!(ctx.get_str("hosts.targets.1"), Some("h3"));
        assert!(!ctx.contains("hosts.missing"));
    }

    #[test]
    fn test_rejects_non_object() {
        assert!(WorkflowContext::from_value(json!([1, 2])).is_err());
        assert!(WorkflowContext::from_value(Value::Null).unwrap().is_empty());
    }
}
