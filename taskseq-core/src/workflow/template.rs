//! `{placeholder}` substitution for declarative requests

use crate::error::TaskError;
use crate::models::{OperationRequest, RequestTemplate, WorkflowContext};
use crate::workflow::sequence::{LocalStep, RequestBuilder};
use serde_json::Value;

/// One piece of a parsed template string
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment<'a> {
    Literal(&'a str),
    Placeholder(&'a str),
    /// `{{` or `}}`
    Brace(char),
}

fn is_placeholder_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.'
}

fn parse(template: &str) -> Result<Vec<Segment<'_>>, TaskError> {
    let mut segments = Vec::new();
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        if pos > 0 {
            segments.push(Segment::Literal(&rest[..pos]));
        }
        let tail = &rest[pos..];

        if tail.starts_with("{{") {
            segments.push(Segment::Brace('{'));
            rest = &tail[2..];
        } else if tail.starts_with("}}") {
            segments.push(Segment::Brace('}'));
            rest = &tail[2..];
        } else if tail.starts_with('}') {
            return Err(TaskError::RequestBuild(format!(
                "Unmatched '}}' in template '{}'",
                template
            )));
        } else {
            let end = tail.find('}').ok_or_else(|| {
                TaskError::RequestBuild(format!("Unterminated placeholder in template '{}'", template))
            })?;
            let name = &tail[1..end];
            if name.is_empty() || !name.chars().all(is_placeholder_char) {
                return Err(TaskError::RequestBuild(format!(
                    "Invalid placeholder '{{{}}}' in template '{}'",
                    name, template
                )));
            }
            segments.push(Segment::Placeholder(name));
            rest = &tail[end + 1..];
        }
    }

    if !rest.is_empty() {
        segments.push(Segment::Literal(rest));
    }
    Ok(segments)
}

/// Names of the placeholders used by a template string
pub fn placeholders(template: &str) -> Result<Vec<String>, TaskError> {
    Ok(parse(template)?
        .into_iter()
        .filter_map(|segment| match segment {
            Segment::Placeholder(name) => Some(name.to_string()),
            _ => None,
        })
        .collect())
}

fn lookup<'c>(context: &'c WorkflowContext, name: &str) -> Result<&'c Value, TaskError> {
    context
        .get(name)
        .ok_or_else(|| TaskError::RequestBuild(format!("Unknown placeholder '{}'", name)))
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Substitute every placeholder of a string
pub fn render_str(template: &str, context: &WorkflowContext) -> Result<String, TaskError> {
    let mut out = String::with_capacity(template.len());
    for segment in parse(template)? {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Brace(c) => out.push(c),
            Segment::Placeholder(name) => out.push_str(&value_to_text(lookup(context, name)?)),
        }
    }
    Ok(out)
}

/// Substitute every placeholder of a request path, percent-encoding the values
///
/// A value can never add path segments or start a query string.
pub fn render_path(template: &str, context: &WorkflowContext) -> Result<String, TaskError> {
    let mut out = String::with_capacity(template.len());
    for segment in parse(template)? {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Brace(c) => out.push(c),
            Segment::Placeholder(name) => {
                let text = value_to_text(lookup(context, name)?);
                // form encoding turns spaces into '+' and escapes literal '+'
                let encoded: String = url::form_urlencoded::byte_serialize(text.as_bytes()).collect();
                out.push_str(&encoded.replace('+', "%20"));
            }
        }
    }
    Ok(out)
}

/// Substitute placeholders in every string of a JSON document
///
/// A string made of a single placeholder takes the context value as-is, so arrays
/// and objects can be spliced into a body.
pub fn render_value(template: &Value, context: &WorkflowContext) -> Result<Value, TaskError> {
    match template {
        Value::String(s) => {
            let segments = parse(s)?;
            if let [Segment::Placeholder(name)] = segments.as_slice() {
                return Ok(lookup(context, name)?.clone());
            }
            render_str(s, context).map(Value::String)
        }
        Value::Array(items) => items
            .iter()
            .map(|item| render_value(item, context))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut rendered = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                rendered.insert(render_str(key, context)?, render_value(item, context)?);
            }
            Ok(Value::Object(rendered))
        }
        other => Ok(other.clone()),
    }
}

impl RequestBuilder for RequestTemplate {
    fn build(&self, context: &WorkflowContext) -> Result<OperationRequest, TaskError> {
        let path = render_path(&self.path, context)?;
        let body = self
            .body
            .as_ref()
            .map(|body| render_value(body, context))
            .transpose()?;
        Ok(OperationRequest {
            method: self.method,
            path,
            body,
        })
    }
}

/// Sync step that fails unless the context carries the given keys
#[derive(Debug, Clone)]
pub struct RequireKeys(pub Vec<String>);

impl LocalStep for RequireKeys {
    fn run(&self, context: &WorkflowContext) -> Result<(), TaskError> {
        let missing: Vec<&str> = self
            .0
            .iter()
            .filter(|key| !context.contains(key))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(TaskError::LocalStep(format!(
                "Missing context keys: {}",
                missing.join(", ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HttpMethod;
    use serde_json::json;

    fn ctx() -> WorkflowContext {
        WorkflowContext::from_value(json!({
            "cluster": "c1",
            "port": 8020,
            "hosts": { "target": "h2", "journal": ["h1", "h2", "h3"] }
        }))
        .unwrap()
    }

    #[test]
    fn test_render_path() {
        let rendered = render_str("/clusters/{cluster}/hosts/{hosts.target}", &ctx()).unwrap();
        assert_eq!(rendered, "/clusters/c1/hosts/h2");
    }

    #[test]
    fn test_render_path_encodes_values() {
        let context = ctx().with("host", "h 1/a?b+c");
        let rendered = render_path("/clusters/{cluster}/hosts/{host}", &context).unwrap();
        assert_eq!(rendered, "/clusters/c1/hosts/h%201%2Fa%3Fb%2Bc");

        let plain = render_path("/clusters/{cluster}/hosts/{hosts.target}", &ctx()).unwrap();
        assert_eq!(plain, "/clusters/c1/hosts/h2");
    }

    #[test]
    fn test_render_numbers_and_escapes() {
        let rendered = render_str("hdfs://{hosts.target}:{port} {{literal}}", &ctx()).unwrap();
        assert_eq!(rendered, "hdfs://h2:8020 {literal}");
    }

    #[test]
    fn test_unknown_placeholder_fails() {
        let err = render_str("/clusters/{nope}", &ctx()).unwrap_err();
        assert!(matches!(err, TaskError::RequestBuild(msg) if msg.contains("nope")));
    }

    #[test]
    fn test_malformed_templates() {
        assert!(placeholders("/clusters/{cluster").is_err());
        assert!(placeholders("/clusters/{bad name}").is_err());
        assert!(placeholders("/clusters/}").is_err());
        assert_eq!(
            placeholders("/a/{x}/b/{y.z}").unwrap(),
            vec!["x".to_string(), "y.z".to_string()]
        );
    }

    #[test]
    fn test_render_body_splices_whole_values() {
        let body = json!({
            "RequestInfo": { "context": "Install JournalNodes on {cluster}" },
            "Body": { "hosts": "{hosts.journal}", "count": 3 }
        });
        let rendered = render_value(&body, &ctx()).unwrap();
        assert_eq!(
            rendered["RequestInfo"]["context"],
            "Install JournalNodes on c1"
        );
        assert_eq!(rendered["Body"]["hosts"], json!(["h1", "h2", "h3"]));
        assert_eq!(rendered["Body"]["count"], 3);
    }

    #[test]
    fn test_template_builder() {
        let template = RequestTemplate {
            method: HttpMethod::Post,
            path: "/clusters/{cluster}/requests".to_string(),
            body: Some(json!({"RequestInfo": {"command": "RESTART"}})),
        };
        let request = template.build(&ctx()).unwrap();
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.path, "/clusters/c1/requests");
        assert_eq!(request.body.unwrap()["RequestInfo"]["command"], "RESTART");

        let template = RequestTemplate {
            method: HttpMethod::Delete,
            path: "/clusters/{cluster}/hosts/{host}".to_string(),
            body: None,
        };
        let request = template.build(&ctx().with("host", "bad host/x")).unwrap();
        assert_eq!(request.path, "/clusters/c1/hosts/bad%20host%2Fx");
    }

    #[test]
    fn test_require_keys() {
        let step = RequireKeys(vec!["cluster".to_string(), "kdc.host".to_string()]);
        let err = step.run(&ctx()).unwrap_err();
        assert_eq!(
            err,
            TaskError::LocalStep("Missing context keys: kdc.host".to_string())
        );
        assert!(RequireKeys(vec!["hosts.target".to_string()]).run(&ctx()).is_ok());
    }
}
