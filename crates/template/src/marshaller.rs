//! Template text to generic maps.
//!
//! YAML is read with tags preserved, so `!Sub` arguments spanning several
//! lines or `!Join` arguments holding nested lists reach us as one tagged
//! node. Each tag is rewritten to its explicit `{"Fn::Name": ...}` form before
//! anything downstream sees it. JSON templates already use the explicit form.

use crate::intrinsics::explicit_form;
use lambda_models::LocalError;
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use tracing::debug;

pub const RESOURCES: &str = "Resources";

/// Parsed template: `Resources` deep-parsed, every other section kept as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct MarshalledTemplate {
    pub resources: Map<String, Value>,
    pub sections: Map<String, Value>,
    pub lines: LineIndex,
}

impl MarshalledTemplate {
    pub fn section(&self, name: &str) -> Option<&Value> {
        self.sections.get(name)
    }
}

pub fn marshal(text: &str) -> Result<MarshalledTemplate, LocalError> {
    let document = if text.trim_start().starts_with('{') {
        serde_json::from_str::<Value>(text).map_err(|e| LocalError::TemplateParse {
            line: Some(e.line()),
            message: e.to_string(),
        })?
    } else {
        let yaml = serde_yaml::from_str::<serde_yaml::Value>(text).map_err(|e| {
            LocalError::TemplateParse {
                line: e.location().map(|l| l.line()),
                message: e.to_string(),
            }
        })?;
        normalize(yaml)?
    };

    let lines = LineIndex::build(text);
    let Value::Object(mut sections) = document else {
        return Err(LocalError::TemplateParse {
            line: None,
            message: "template root must be a mapping".to_string(),
        });
    };

    let resources = match sections.remove(RESOURCES) {
        Some(Value::Object(resources)) => resources,
        Some(_) => {
            return Err(LocalError::TemplateParse {
                line: lines.line(RESOURCES),
                message: "Resources must be a mapping of logical names to resources".to_string(),
            })
        }
        None => {
            return Err(LocalError::TemplateParse {
                line: None,
                message: "template has no Resources section".to_string(),
            })
        }
    };

    debug!(
        resources = resources.len(),
        sections = sections.len(),
        "Template marshalled"
    );

    Ok(MarshalledTemplate {
        resources,
        sections,
        lines,
    })
}

/// Converts a YAML tree to the uniform JSON representation.
fn normalize(value: serde_yaml::Value) -> Result<Value, LocalError> {
    Ok(match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => yaml_number(&n),
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(items) => Value::Array(
            items
                .into_iter()
                .map(normalize)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        serde_yaml::Value::Mapping(mapping) => {
            let mut object = Map::with_capacity(mapping.len());
            for (key, value) in mapping {
                object.insert(mapping_key(key)?, normalize(value)?);
            }
            Value::Object(object)
        }
        serde_yaml::Value::Tagged(tagged) => {
            let tag = tagged.tag.to_string();
            explicit_form(&tag, normalize(tagged.value)?)
        }
    })
}

fn yaml_number(n: &serde_yaml::Number) -> Value {
    if let Some(u) = n.as_u64() {
        Value::Number(u.into())
    } else if let Some(i) = n.as_i64() {
        Value::Number(i.into())
    } else {
        n.as_f64()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(n.to_string()))
    }
}

fn mapping_key(key: serde_yaml::Value) -> Result<String, LocalError> {
    match key {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Null => Ok("null".to_string()),
        other => Err(LocalError::TemplateParse {
            line: None,
            message: format!("unsupported mapping key: {other:?}"),
        }),
    }
}

/// Dotted key path (`Resources.Fn.Properties.Handler`) -> 1-based line.
///
/// Built from indentation, so it covers block YAML and pretty-printed JSON.
/// Only the first occurrence of a path is recorded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineIndex {
    lines: HashMap<String, usize>,
}

impl LineIndex {
    pub fn build(text: &str) -> Self {
        let mut lines = HashMap::new();
        let mut stack: Vec<(usize, String)> = Vec::new();

        for (number, raw) in text.lines().enumerate() {
            let content = raw.trim_start();
            if content.is_empty() || content.starts_with('#') {
                continue;
            }
            let mut indent = raw.len() - content.len();
            let mut rest = content;
            while let Some(item) = rest.strip_prefix('-') {
                let item_body = item.trim_start();
                if item.len() == item_body.len() && !item.is_empty() {
                    break;
                }
                indent += rest.len() - item_body.len();
                rest = item_body;
            }
            let Some(key) = leading_key(rest) else {
                continue;
            };
            while stack.last().is_some_and(|(depth, _)| *depth >= indent) {
                stack.pop();
            }
            stack.push((indent, key));
            let path = stack
                .iter()
                .map(|(_, key)| key.as_str())
                .collect::<Vec<_>>()
                .join(".");
            lines.entry(path).or_insert(number + 1);
        }

        Self { lines }
    }

    pub fn line(&self, path: &str) -> Option<usize> {
        self.lines.get(path).copied()
    }

    pub fn resource(&self, logical_id: &str) -> Option<usize> {
        self.line(&format!("{RESOURCES}.{logical_id}"))
    }

    pub fn property(&self, logical_id: &str, property: &str) -> Option<usize> {
        self.line(&format!("{RESOURCES}.{logical_id}.Properties.{property}"))
            .or_else(|| self.resource(logical_id))
    }
}

fn leading_key(content: &str) -> Option<String> {
    if let Some(quote) = content.chars().next().filter(|c| *c == '"' || *c == '\'') {
        let body = &content[1..];
        let end = body.find(quote)?;
        let after = body[end + 1..].trim_start();
        return after
            .starts_with(':')
            .then(|| body[..end].to_string());
    }
    if content.starts_with(['{', '[', '!', '&', '*', '|', '>']) {
        return None;
    }
    let bytes = content.as_bytes();
    let position = (0..bytes.len()).find(|&i| {
        bytes[i] == b':' && bytes.get(i + 1).map_or(true, |next| next.is_ascii_whitespace())
    })?;
    let key = content[..position].trim();
    (!key.is_empty()).then(|| key.to_string())
}
