use crate::graph::{ResourceGraph, SkippedResource};
use crate::marshaller::MarshalledTemplate;
use crate::registry::{ResourceKind, ResourceType};
use lambda_models::{LocalError, ValidationIssue};
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

const GLOBALS: &str = "Globals";
const ENVIRONMENT: &str = "Environment";
const VARIABLES: &str = "Variables";

/// Builds the typed, still unresolved, resource graph.
///
/// Unknown resource types are skipped with a warning. Every required-property
/// violation across the template is collected before failing.
#[instrument(skip(template))]
pub fn scaffold(template: &MarshalledTemplate) -> Result<ResourceGraph, LocalError> {
    let globals = template.section(GLOBALS).and_then(Value::as_object);
    let mut graph = ResourceGraph::default();
    let mut issues = Vec::new();

    for (logical_id, raw) in &template.resources {
        let line = template.lines.resource(logical_id);
        let issue = |message: &str| ValidationIssue {
            resource: logical_id.clone(),
            property: None,
            line,
            message: message.to_string(),
        };

        let Some(type_name) = raw.get("Type").and_then(Value::as_str) else {
            issues.push(issue("resource has no Type"));
            continue;
        };

        let kind = match ResourceType::lookup(type_name) {
            ResourceType::Known(kind) => kind,
            ResourceType::Unknown(type_name) => {
                warn!(
                    resource = %logical_id,
                    resource_type = %type_name,
                    "Skipping resource with a type that is not emulated locally"
                );
                graph.skipped.push(SkippedResource {
                    logical_id: logical_id.clone(),
                    type_name,
                    line,
                });
                continue;
            }
        };

        let mut properties = match raw.get("Properties") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(properties)) => properties.clone(),
            Some(_) => {
                issues.push(issue("Properties must be a mapping"));
                continue;
            }
        };

        if let Some(defaults) = globals
            .and_then(|g| g.get(kind.globals_key()))
            .and_then(Value::as_object)
        {
            apply_globals(&mut properties, defaults);
        }

        match kind.construct(logical_id, properties, &template.lines) {
            Ok(resource) => graph.resources.push(resource),
            Err(found) => issues.extend(found),
        }
    }

    if !issues.is_empty() {
        return Err(LocalError::TemplateValidation { issues });
    }

    info!(
        resources = graph.resources.len(),
        skipped = graph.skipped.len(),
        functions = graph
            .resources
            .iter()
            .filter(|r| r.kind == ResourceKind::Function)
            .count(),
        "Template scaffolded"
    );
    Ok(graph)
}

/// Fills properties the resource leaves unset from the `Globals` section.
/// Environment variables merge key by key, the resource's own value winning.
pub fn apply_globals(properties: &mut Map<String, Value>, defaults: &Map<String, Value>) {
    for (name, default) in defaults {
        match properties.get_mut(name) {
            None => {
                properties.insert(name.clone(), default.clone());
            }
            Some(Value::Object(existing)) if name == ENVIRONMENT => {
                let Some(Value::Object(global_vars)) = default.get(VARIABLES) else {
                    continue;
                };
                let vars = existing
                    .entry(VARIABLES)
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(vars) = vars {
                    for (key, value) in global_vars {
                        vars.entry(key.clone()).or_insert_with(|| value.clone());
                    }
                }
            }
            Some(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn globals_fill_gaps_without_overriding() {
        let mut props = json!({
            "Timeout": 10,
            "Environment": {"Variables": {"TABLE": "mine"}}
        })
        .as_object()
        .unwrap()
        .clone();
        let globals = json!({
            "Timeout": 30,
            "Runtime": "python3.11",
            "Environment": {"Variables": {"TABLE": "global", "STAGE": "dev"}}
        })
        .as_object()
        .unwrap()
        .clone();

        apply_globals(&mut props, &globals);

        assert_eq!(props["Timeout"], json!(10));
        assert_eq!(props["Runtime"], json!("python3.11"));
        assert_eq!(
            props["Environment"]["Variables"],
            json!({"TABLE": "mine", "STAGE": "dev"})
        );
    }
}
