use crate::graph::{Property, Resource, ReturnValues, DEFAULT_REFERENCE};
use crate::marshaller::LineIndex;
use crate::pseudo::PseudoParameters;
use lambda_models::ValidationIssue;
use serde_json::{Map, Value};
use tracing::debug;

/// Resource kinds the emulator knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Function,
    Api,
    HttpApi,
}

/// Result of looking a template `Type` up in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceType {
    Known(ResourceKind),
    Unknown(String),
}

impl ResourceType {
    pub fn lookup(type_name: &str) -> Self {
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.type_name() == type_name)
            .map(ResourceType::Known)
            .unwrap_or_else(|| ResourceType::Unknown(type_name.to_string()))
    }
}

#[derive(Debug)]
pub struct PropertySchema {
    pub required: &'static [&'static str],
    pub known: &'static [&'static str],
}

static FUNCTION_SCHEMA: PropertySchema = PropertySchema {
    required: &["Handler", "Runtime"],
    known: &[
        "Architectures",
        "CodeUri",
        "Description",
        "Environment",
        "Events",
        "FunctionName",
        "Handler",
        "Layers",
        "MemorySize",
        "Policies",
        "Role",
        "Runtime",
        "Tags",
        "Timeout",
        "Tracing",
    ],
};

static API_SCHEMA: PropertySchema = PropertySchema {
    required: &["StageName"],
    known: &[
        "BinaryMediaTypes",
        "Cors",
        "DefinitionBody",
        "DefinitionUri",
        "Name",
        "StageName",
        "Variables",
    ],
};

static HTTP_API_SCHEMA: PropertySchema = PropertySchema {
    required: &[],
    known: &["CorsConfiguration", "DefinitionBody", "StageName", "StageVariables"],
};

/// Function event types that become HTTP triggers.
pub const API_EVENT: &str = "Api";
pub const HTTP_API_EVENT: &str = "HttpApi";

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::Function,
        ResourceKind::Api,
        ResourceKind::HttpApi,
    ];

    pub fn type_name(self) -> &'static str {
        match self {
            ResourceKind::Function => "AWS::Serverless::Function",
            ResourceKind::Api => "AWS::Serverless::Api",
            ResourceKind::HttpApi => "AWS::Serverless::HttpApi",
        }
    }

    /// Key of this kind's defaults inside the `Globals` section.
    pub fn globals_key(self) -> &'static str {
        match self {
            ResourceKind::Function => "Function",
            ResourceKind::Api => "Api",
            ResourceKind::HttpApi => "HttpApi",
        }
    }

    pub fn schema(self) -> &'static PropertySchema {
        match self {
            ResourceKind::Function => &FUNCTION_SCHEMA,
            ResourceKind::Api => &API_SCHEMA,
            ResourceKind::HttpApi => &HTTP_API_SCHEMA,
        }
    }

    pub fn validate(
        self,
        logical_id: &str,
        properties: &Map<String, Value>,
        lines: &LineIndex,
    ) -> Vec<ValidationIssue> {
        let mut issues: Vec<ValidationIssue> = self
            .schema()
            .required
            .iter()
            .filter(|name| !properties.contains_key(**name))
            .map(|name| ValidationIssue {
                resource: logical_id.to_string(),
                property: Some(name.to_string()),
                line: lines.resource(logical_id),
                message: format!("required property {name} is missing"),
            })
            .collect();

        for name in properties.keys() {
            if !self.schema().known.contains(&name.as_str()) {
                debug!(resource = %logical_id, property = %name, "Property is not used locally");
            }
        }

        if self == ResourceKind::Function {
            if let Some(events) = properties.get("Events") {
                issues.extend(validate_events(logical_id, events, lines));
            }
        }

        issues
    }

    /// Validates the raw properties and builds the unresolved resource.
    pub fn construct(
        self,
        logical_id: &str,
        properties: Map<String, Value>,
        lines: &LineIndex,
    ) -> Result<Resource, Vec<ValidationIssue>> {
        let issues = self.validate(logical_id, &properties, lines);
        if !issues.is_empty() {
            return Err(issues);
        }
        Ok(Resource {
            logical_id: logical_id.to_string(),
            kind: self,
            line: lines.resource(logical_id),
            properties: properties
                .into_iter()
                .map(|(name, value)| (name, Property::new(value)))
                .collect(),
        })
    }

    /// Outputs other resources can reach through `Ref` / `Fn::GetAtt`.
    ///
    /// Only called once every property of `resource` is resolved.
    pub fn return_values(self, resource: &Resource, pseudo: &PseudoParameters) -> ReturnValues {
        let mut values = ReturnValues::new();
        match self {
            ResourceKind::Function => {
                let name = resource
                    .properties
                    .get("FunctionName")
                    .and_then(Property::resolved)
                    .and_then(Value::as_str)
                    .unwrap_or(resource.logical_id.as_str())
                    .to_string();
                values.insert("Arn".to_string(), function_arn(pseudo, &name));
                values.insert(DEFAULT_REFERENCE.to_string(), name);
            }
            ResourceKind::Api => {
                values.insert(
                    DEFAULT_REFERENCE.to_string(),
                    resource.logical_id.clone(),
                );
                values.insert("RootResourceId".to_string(), "root".to_string());
            }
            ResourceKind::HttpApi => {
                values.insert(
                    DEFAULT_REFERENCE.to_string(),
                    resource.logical_id.clone(),
                );
                values.insert(
                    "ApiEndpoint".to_string(),
                    format!(
                        "https://{}.execute-api.{}.amazonaws.com",
                        resource.logical_id.to_ascii_lowercase(),
                        pseudo.region()
                    ),
                );
            }
        }
        values
    }
}

pub fn function_arn(pseudo: &PseudoParameters, function_name: &str) -> String {
    format!(
        "arn:{}:lambda:{}:{}:function:{}",
        pseudo.partition(),
        pseudo.region(),
        pseudo.account_id(),
        function_name
    )
}

fn validate_events(logical_id: &str, events: &Value, lines: &LineIndex) -> Vec<ValidationIssue> {
    let issue = |event: Option<&str>, message: String| ValidationIssue {
        resource: logical_id.to_string(),
        property: Some(match event {
            Some(event) => format!("Events.{event}"),
            None => "Events".to_string(),
        }),
        line: lines.property(logical_id, "Events"),
        message,
    };

    let Value::Object(events) = events else {
        return vec![issue(None, "Events must be a mapping".to_string())];
    };

    let mut issues = Vec::new();
    for (event_id, event) in events {
        let Some(event_type) = event.get("Type").and_then(Value::as_str) else {
            issues.push(issue(Some(event_id), "event has no Type".to_string()));
            continue;
        };
        if event_type != API_EVENT {
            continue;
        }
        let properties = event.get("Properties");
        for required in ["Path", "Method"] {
            if properties.and_then(|p| p.get(required)).is_none() {
                issues.push(issue(
                    Some(event_id),
                    format!("Api event requires property {required}"),
                ));
            }
        }
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_distinguishes_known_and_unknown_types() {
        assert_eq!(
            ResourceType::lookup("AWS::Serverless::Function"),
            ResourceType::Known(ResourceKind::Function)
        );
        assert_eq!(
            ResourceType::lookup("AWS::DynamoDB::Table"),
            ResourceType::Unknown("AWS::DynamoDB::Table".to_string())
        );
    }

    #[test]
    fn construct_reports_each_missing_required_property() {
        let props = json!({"CodeUri": "."});
        let err = ResourceKind::Function
            .construct("Fn", props.as_object().unwrap().clone(), &LineIndex::default())
            .unwrap_err();
        let missing: Vec<_> = err.iter().filter_map(|i| i.property.clone()).collect();
        assert_eq!(missing, vec!["Handler", "Runtime"]);
    }

    #[test]
    fn api_events_need_path_and_method() {
        let props = json!({
            "Handler": "index.handler",
            "Runtime": "nodejs18.x",
            "Events": {
                "Get": {"Type": "Api", "Properties": {"Path": "/items"}},
                "Queue": {"Type": "SQS", "Properties": {}}
            }
        });
        let err = ResourceKind::Function
            .construct("Fn", props.as_object().unwrap().clone(), &LineIndex::default())
            .unwrap_err();
        assert_eq!(err.len(), 1);
        assert_eq!(err[0].property.as_deref(), Some("Events.Get"));
        assert!(err[0].message.contains("Method"));
    }

    #[test]
    fn function_return_values_use_function_name() {
        let props = json!({"Handler": "h", "Runtime": "python3.9"});
        let resource = ResourceKind::Function
            .construct("Fn", props.as_object().unwrap().clone(), &LineIndex::default())
            .unwrap();
        let values = ResourceKind::Function.return_values(&resource, &PseudoParameters::default());
        assert_eq!(values["Ref"], "Fn");
        assert_eq!(
            values["Arn"],
            "arn:aws:lambda:us-east-1:123456789012:function:Fn"
        );
    }
}
