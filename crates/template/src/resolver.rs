//! Fixed-point evaluation of intrinsic calls.
//!
//! Each pass reads the previous pass's resources and produces new ones; the
//! input graph is never mutated. A resource publishes its return values as
//! soon as all of its properties are resolved, so later resources in the same
//! pass can already see them. Forward references therefore need one extra
//! pass, and genuine cycles stop making progress and are reported.

use crate::graph::{Resource, ResolvedGraph, ResourceGraph, ReturnValues, DEFAULT_REFERENCE};
use crate::intrinsics::IntrinsicCall;
use crate::pseudo::PseudoParameters;
use lambda_models::{LocalError, UnresolvedProperty};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_MAX_PASSES: u32 = 3;

/// Why one property could not be resolved in the current pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Failure {
    /// The target resource exists but has not published its return values.
    Pending { resource: String },
    /// Neither a resource, parameter nor pseudo-parameter of that name.
    Missing { reference: String },
    Unsupported { function: String },
    Invalid { function: String, reason: String },
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Pending { resource } => write!(f, "waiting on {resource}"),
            Failure::Missing { reference } => write!(f, "unresolved reference {reference}"),
            Failure::Unsupported { function } => {
                write!(f, "unsupported intrinsic function {function}")
            }
            Failure::Invalid { function, reason } => write!(f, "invalid {function}: {reason}"),
        }
    }
}

pub struct Resolver<'a> {
    pseudo: &'a PseudoParameters,
    parameters: &'a BTreeMap<String, String>,
    max_passes: u32,
}

impl<'a> Resolver<'a> {
    pub fn new(pseudo: &'a PseudoParameters, parameters: &'a BTreeMap<String, String>) -> Self {
        Self {
            pseudo,
            parameters,
            max_passes: DEFAULT_MAX_PASSES,
        }
    }

    pub fn with_max_passes(mut self, max_passes: u32) -> Self {
        self.max_passes = max_passes.max(1);
        self
    }

    #[instrument(skip(self, graph), fields(max_passes = self.max_passes))]
    pub fn resolve(&self, graph: &ResourceGraph) -> Result<ResolvedGraph, LocalError> {
        let declared: BTreeSet<String> = graph
            .resources
            .iter()
            .map(|r| r.logical_id.clone())
            .collect();
        let mut tables: BTreeMap<String, ReturnValues> = BTreeMap::new();
        let mut current = graph.resources.clone();
        let mut unresolved = Vec::new();
        let mut passes = 0;

        while passes < self.max_passes {
            passes += 1;
            let mut progress = false;
            let mut next = Vec::with_capacity(current.len());
            unresolved.clear();

            for resource in &current {
                let scope = Scope {
                    pseudo: self.pseudo,
                    parameters: self.parameters,
                    tables: &tables,
                    declared: &declared,
                    resource: &resource.logical_id,
                };
                let (updated, failures, changed) = scope.resolve_resource(resource);
                progress |= changed;
                unresolved.extend(failures);

                if updated.is_resolved() && !tables.contains_key(&updated.logical_id) {
                    let values = updated.kind.return_values(&updated, self.pseudo);
                    debug!(resource = %updated.logical_id, ?values, "Return values published");
                    tables.insert(updated.logical_id.clone(), values);
                    progress = true;
                }
                next.push(updated);
            }

            current = next;
            debug!(pass = passes, remaining = unresolved.len(), "Resolution pass finished");

            if unresolved.is_empty() {
                info!(passes, resources = current.len(), "Template resolved");
                return Ok(ResolvedGraph::new(current, tables, passes));
            }
            if !progress {
                break;
            }
        }

        for property in &unresolved {
            warn!(
                resource = %property.resource,
                property = %property.property,
                reason = %property.reason,
                "Property left unresolved"
            );
        }
        Err(LocalError::UnresolvedReferences {
            passes,
            properties: unresolved,
        })
    }
}

struct Scope<'s> {
    pseudo: &'s PseudoParameters,
    parameters: &'s BTreeMap<String, String>,
    tables: &'s BTreeMap<String, ReturnValues>,
    declared: &'s BTreeSet<String>,
    resource: &'s str,
}

impl Scope<'_> {
    fn resolve_resource(&self, resource: &Resource) -> (Resource, Vec<UnresolvedProperty>, bool) {
        let mut failures = Vec::new();
        let mut changed = false;
        let mut properties = BTreeMap::new();

        for (name, property) in &resource.properties {
            if property.is_resolved() {
                properties.insert(name.clone(), property.clone());
                continue;
            }
            match self.evaluate(property.original()) {
                Ok(value) => {
                    changed = true;
                    properties.insert(name.clone(), property.with_resolved(value));
                }
                Err(failure) => {
                    failures.push(UnresolvedProperty {
                        resource: resource.logical_id.clone(),
                        property: name.clone(),
                        reason: failure.to_string(),
                    });
                    properties.insert(name.clone(), property.clone());
                }
            }
        }

        let updated = Resource {
            logical_id: resource.logical_id.clone(),
            kind: resource.kind,
            line: resource.line,
            properties,
        };
        (updated, failures, changed)
    }

    /// Children first, then the enclosing call if there is one.
    fn evaluate(&self, value: &Value) -> Result<Value, Failure> {
        match value {
            Value::Array(items) => items
                .iter()
                .map(|item| self.evaluate(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut resolved = Map::with_capacity(map.len());
                for (key, child) in map {
                    resolved.insert(key.clone(), self.evaluate(child)?);
                }
                match IntrinsicCall::detect(&resolved) {
                    Some(call) => self.apply(call),
                    None => Ok(Value::Object(resolved)),
                }
            }
            scalar => Ok(scalar.clone()),
        }
    }

    fn apply(&self, call: IntrinsicCall<'_>) -> Result<Value, Failure> {
        let invalid = |reason: &str| Failure::Invalid {
            function: call.name().to_string(),
            reason: reason.to_string(),
        };

        match call {
            IntrinsicCall::Reference(operand) => {
                let name = operand
                    .as_str()
                    .ok_or_else(|| invalid("operand must be a string"))?;
                self.reference(name)
            }
            IntrinsicCall::AttributeOf(operand) => match operand {
                Value::Array(parts) => match parts.as_slice() {
                    [Value::String(resource), Value::String(attribute)] => {
                        self.lookup(resource, Some(attribute))
                    }
                    _ => Err(invalid("operand must be [resource, attribute]")),
                },
                Value::String(dotted) => match dotted.split_once('.') {
                    Some((resource, attribute)) => self.lookup(resource, Some(attribute)),
                    None => Err(invalid("operand must be Resource.Attribute")),
                },
                _ => Err(invalid("operand must be [resource, attribute]")),
            },
            IntrinsicCall::Join(operand) => {
                let Some([Value::String(delimiter), Value::Array(items)]) =
                    operand.as_array().map(Vec::as_slice)
                else {
                    return Err(invalid("operand must be [delimiter, [values]]"));
                };
                let parts = items
                    .iter()
                    .map(|item| {
                        item.as_str()
                            .ok_or_else(|| invalid("list elements must be strings"))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::String(parts.join(delimiter.as_str())))
            }
            IntrinsicCall::Substitute(operand) => {
                let empty = Map::new();
                let (template, bindings) = match operand {
                    Value::String(template) => (template.as_str(), &empty),
                    Value::Array(parts) => match parts.as_slice() {
                        [Value::String(template), Value::Object(bindings)] => {
                            (template.as_str(), bindings)
                        }
                        _ => return Err(invalid("operand must be a string or [string, {vars}]")),
                    },
                    _ => return Err(invalid("operand must be a string or [string, {vars}]")),
                };
                self.substitute(template, bindings).map(Value::String)
            }
            IntrinsicCall::Unsupported(name) => Err(Failure::Unsupported {
                function: name.to_string(),
            }),
        }
    }

    fn reference(&self, name: &str) -> Result<Value, Failure> {
        if let Some(value) = self.pseudo.get(name) {
            return Ok(value.clone());
        }
        if let Some(value) = self.parameters.get(name) {
            return Ok(Value::String(value.clone()));
        }
        match name.split_once('.') {
            Some((resource, attribute)) => self.lookup(resource, Some(attribute)),
            None => self.lookup(name, None),
        }
    }

    fn lookup(&self, resource: &str, attribute: Option<&str>) -> Result<Value, Failure> {
        let key = attribute.unwrap_or(DEFAULT_REFERENCE);
        if let Some(table) = self.tables.get(resource) {
            return table
                .get(key)
                .map(|value| Value::String(value.clone()))
                .ok_or_else(|| Failure::Missing {
                    reference: format!("{resource}.{key}"),
                });
        }
        if self.declared.contains(resource) {
            return Err(Failure::Pending {
                resource: resource.to_string(),
            });
        }
        Err(Failure::Missing {
            reference: match attribute {
                Some(attribute) => format!("{resource}.{attribute}"),
                None => resource.to_string(),
            },
        })
    }

    fn substitute(&self, template: &str, bindings: &Map<String, Value>) -> Result<String, Failure> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                out.push_str(&rest[start..]);
                rest = "";
                break;
            };
            let name = after[..end].trim();
            if let Some(literal) = name.strip_prefix('!') {
                out.push_str("${");
                out.push_str(literal);
                out.push('}');
            } else {
                out.push_str(&self.placeholder(name, bindings)?);
            }
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }

    fn placeholder(&self, name: &str, bindings: &Map<String, Value>) -> Result<String, Failure> {
        let value = match bindings.get(name) {
            Some(value) => value.clone(),
            None => match self.reference(name) {
                Ok(value) => value,
                Err(Failure::Missing { reference }) => {
                    warn!(
                        resource = %self.resource,
                        placeholder = %name,
                        %reference,
                        "Unresolved Fn::Sub placeholder replaced with an empty string"
                    );
                    return Ok(String::new());
                }
                Err(other) => return Err(other),
            },
        };
        match value {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Null => Ok(String::new()),
            _ => Err(Failure::Invalid {
                function: crate::intrinsics::SUB.to_string(),
                reason: format!("placeholder {name} is not a scalar"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshaller::LineIndex;
    use crate::registry::ResourceKind;
    use serde_json::json;

    fn function(id: &str, props: Value) -> Resource {
        ResourceKind::Function
            .construct(id, props.as_object().unwrap().clone(), &LineIndex::default())
            .unwrap()
    }

    fn graph(resources: Vec<Resource>) -> ResourceGraph {
        ResourceGraph {
            resources,
            skipped: vec![],
        }
    }

    #[test]
    fn join_concatenates_resolved_elements() {
        let pseudo = PseudoParameters::default();
        let params = BTreeMap::new();
        let g = graph(vec![function(
            "F",
            json!({
                "Handler": "h",
                "Runtime": "python3.9",
                "Description": {"Fn::Join": ["-", ["a", {"Ref": "AWS::Region"}]]}
            }),
        )]);

        let resolved = Resolver::new(&pseudo, &params).resolve(&g).unwrap();
        assert_eq!(resolved.value("F", "Description"), Some(&json!("a-us-east-1")));
        assert_eq!(resolved.passes(), 1);
    }

    #[test]
    fn join_with_wrong_shape_is_reported() {
        let pseudo = PseudoParameters::default();
        let params = BTreeMap::new();
        let g = graph(vec![function(
            "F",
            json!({"Handler": "h", "Runtime": "r", "Description": {"Fn::Join": ["-", "ab"]}}),
        )]);

        let err = Resolver::new(&pseudo, &params).resolve(&g).unwrap_err();
        let LocalError::UnresolvedReferences { properties, .. } = err else {
            panic!("unexpected error");
        };
        assert_eq!(properties[0].property, "Description");
        assert!(properties[0].reason.contains("Fn::Join"));
    }

    #[test]
    fn sub_supports_bindings_and_escapes() {
        let pseudo = PseudoParameters::default();
        let params = BTreeMap::from([("Stage".to_string(), "dev".to_string())]);
        let g = graph(vec![function(
            "F",
            json!({
                "Handler": "h",
                "Runtime": "r",
                "Description": {"Fn::Sub": ["${Name}-${Stage}-${!Literal}-${AWS::AccountId}", {"Name": "api"}]}
            }),
        )]);

        let resolved = Resolver::new(&pseudo, &params).resolve(&g).unwrap();
        assert_eq!(
            resolved.value("F", "Description"),
            Some(&json!("api-dev-${Literal}-123456789012"))
        );
    }

    #[test]
    fn sub_blanks_unknown_placeholders() {
        let pseudo = PseudoParameters::default();
        let params = BTreeMap::new();
        let g = graph(vec![function(
            "F",
            json!({"Handler": "h", "Runtime": "r", "Description": {"Fn::Sub": "x${Nope}y"}}),
        )]);

        let resolved = Resolver::new(&pseudo, &params).resolve(&g).unwrap();
        assert_eq!(resolved.value("F", "Description"), Some(&json!("xy")));
    }

    #[test]
    fn unsupported_functions_are_named() {
        let pseudo = PseudoParameters::default();
        let params = BTreeMap::new();
        let g = graph(vec![function(
            "F",
            json!({"Handler": "h", "Runtime": "r", "Description": {"Fn::Select": [0, ["a"]]}}),
        )]);

        let err = Resolver::new(&pseudo, &params).resolve(&g).unwrap_err();
        assert!(err.to_string().contains("unsupported intrinsic function Fn::Select"));
    }
}
