use crate::graph::{Resource, ResolvedGraph, DEFAULT_REFERENCE};
use crate::registry::{ResourceKind, API_EVENT, HTTP_API_EVENT};
use lambda_models::{
    normalize_method, Function, HttpTrigger, LocalError, ValidationIssue, DEFAULT_MEMORY_MB,
    DEFAULT_STAGE, DEFAULT_TIMEOUT_SECS,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

const DEFAULT_CODE_URI: &str = ".";
const HTTP_API_DEFAULT_PATH: &str = "/{proxy+}";
const HTTP_API_DEFAULT_STAGE: &str = "$default";

/// Builds the typed function views from resolved property values.
///
/// `base_dir` is the directory relative code locations are taken from,
/// normally the template's own directory.
pub fn build_functions(
    graph: &ResolvedGraph,
    base_dir: &Path,
) -> Result<Vec<Function>, LocalError> {
    let mut functions = Vec::new();
    let mut issues = Vec::new();

    for resource in graph.of_kind(ResourceKind::Function) {
        match build_function(graph, resource, base_dir) {
            Ok(function) => functions.push(function),
            Err(found) => issues.extend(found),
        }
    }

    if issues.is_empty() {
        Ok(functions)
    } else {
        Err(LocalError::TemplateValidation { issues })
    }
}

fn build_function(
    graph: &ResolvedGraph,
    resource: &Resource,
    base_dir: &Path,
) -> Result<Function, Vec<ValidationIssue>> {
    let id = resource.logical_id.as_str();
    let mut issues = Vec::new();
    let mut issue = |property: &str, message: String| {
        issues.push(ValidationIssue {
            resource: id.to_string(),
            property: Some(property.to_string()),
            line: resource.line,
            message,
        })
    };
    let value = |property: &str| graph.value(id, property).filter(|v| !v.is_null());

    let handler = value("Handler").and_then(Value::as_str).map(str::to_string);
    if handler.is_none() {
        issue("Handler", "must resolve to a string".to_string());
    }
    let runtime = value("Runtime").and_then(Value::as_str).map(str::to_string);
    if runtime.is_none() {
        issue("Runtime", "must resolve to a string".to_string());
    }

    let code_uri = match value("CodeUri") {
        None => base_dir.join(DEFAULT_CODE_URI),
        Some(Value::String(uri)) => base_dir.join(uri),
        Some(_) => {
            issue(
                "CodeUri",
                "only local paths are supported; object code locations point at remote storage"
                    .to_string(),
            );
            base_dir.to_path_buf()
        }
    };

    let mut number = |property: &str, default: u64| match value(property) {
        None => default,
        Some(v) => match as_u64(v) {
            Some(n) if n > 0 => n,
            _ => {
                issue(property, format!("must be a positive integer, got {v}"));
                default
            }
        },
    };
    let memory_size = number("MemorySize", DEFAULT_MEMORY_MB);
    let timeout = number("Timeout", DEFAULT_TIMEOUT_SECS);

    let environment = value("Environment")
        .and_then(|env| env.get("Variables"))
        .and_then(Value::as_object)
        .map(|vars| {
            vars.iter()
                .filter_map(|(name, v)| scalar_text(v).map(|text| (name.clone(), text)))
                .collect::<BTreeMap<_, _>>()
        })
        .unwrap_or_default();

    let mut http_triggers = Vec::new();
    if let Some(events) = value("Events").and_then(Value::as_object) {
        for (event_id, event) in events {
            match build_trigger(graph, id, event_id, event) {
                Ok(Some(trigger)) => http_triggers.push(trigger),
                Ok(None) => {}
                Err(message) => issue(&format!("Events.{event_id}"), message),
            }
        }
    }

    if !issues.is_empty() {
        return Err(issues);
    }

    let table = graph.return_values(id);
    let function_name = table
        .and_then(|t| t.get(DEFAULT_REFERENCE))
        .cloned()
        .unwrap_or_else(|| id.to_string());
    let arn = table.and_then(|t| t.get("Arn")).cloned().unwrap_or_default();

    Ok(Function {
        logical_id: id.to_string(),
        function_name,
        arn,
        runtime: runtime.unwrap_or_default(),
        handler: handler.unwrap_or_default(),
        code_uri,
        memory_size,
        timeout,
        environment,
        http_triggers,
    })
}

/// `Ok(None)` for events that are not HTTP triggers.
fn build_trigger(
    graph: &ResolvedGraph,
    function: &str,
    event_id: &str,
    event: &Value,
) -> Result<Option<HttpTrigger>, String> {
    let event_type = event.get("Type").and_then(Value::as_str).unwrap_or_default();
    let properties = event.get("Properties");
    let text = |name: &str| {
        properties
            .and_then(|p| p.get(name))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    let (path, method, stage) = match event_type {
        API_EVENT => {
            let path = text("Path").ok_or("Path must resolve to a string")?;
            let method = text("Method").ok_or("Method must resolve to a string")?;
            let stage = linked_stage(graph, text("RestApiId"), ResourceKind::Api)
                .unwrap_or_else(|| DEFAULT_STAGE.to_string());
            (path, normalize_method(&method), stage)
        }
        HTTP_API_EVENT => {
            let path = text("Path").unwrap_or_else(|| HTTP_API_DEFAULT_PATH.to_string());
            let method = text("Method").and_then(|m| normalize_method(&m));
            let stage = linked_stage(graph, text("ApiId"), ResourceKind::HttpApi)
                .unwrap_or_else(|| HTTP_API_DEFAULT_STAGE.to_string());
            (path, method, stage)
        }
        _ => return Ok(None),
    };

    if !path.starts_with('/') {
        return Err(format!("Path {path} must start with '/'"));
    }

    Ok(Some(HttpTrigger {
        event_id: event_id.to_string(),
        function: function.to_string(),
        path,
        method,
        stage,
    }))
}

/// Stage name of the API resource an event points at, if any.
fn linked_stage(graph: &ResolvedGraph, api_id: Option<String>, kind: ResourceKind) -> Option<String> {
    let api = graph.resource(&api_id?)?;
    if api.kind != kind {
        return None;
    }
    graph
        .value(&api.logical_id, "StageName")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Environment values are always strings inside the sandbox.
pub(crate) fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_accept_numeric_strings() {
        assert_eq!(as_u64(&Value::from(30)), Some(30));
        assert_eq!(as_u64(&Value::from(" 512 ")), Some(512));
        assert_eq!(as_u64(&Value::from("many")), None);
    }

    #[test]
    fn scalar_text_skips_null_and_structures() {
        assert_eq!(scalar_text(&Value::from(true)), Some("true".into()));
        assert_eq!(scalar_text(&Value::Null), None);
        assert_eq!(scalar_text(&serde_json::json!({"a": 1})), None);
    }
}
