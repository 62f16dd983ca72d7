use lambda_models::{Function, LocalError};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Key in the override file whose variables apply to every function.
pub const GLOBAL_OVERRIDES_KEY: &str = "Parameters";

const CREDENTIAL_VARIABLES: &[&str] = &[
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_SESSION_TOKEN",
];

/// Contents of the `--env-vars` style override file:
/// `{ "FunctionLogicalId": { "VAR": "value" }, "Parameters": { ... } }`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvironmentOverrides {
    global: BTreeMap<String, String>,
    functions: BTreeMap<String, BTreeMap<String, String>>,
}

impl EnvironmentOverrides {
    pub fn from_json(text: &str) -> Result<Self, LocalError> {
        let document: Value = serde_json::from_str(text).map_err(|e| LocalError::OverrideFile {
            reason: e.to_string(),
        })?;
        let Value::Object(entries) = document else {
            return Err(LocalError::OverrideFile {
                reason: "top level must be an object keyed by function logical id".to_string(),
            });
        };

        let mut overrides = Self::default();
        for (key, variables) in entries {
            let Value::Object(variables) = variables else {
                return Err(LocalError::OverrideFile {
                    reason: format!("entry {key} must be an object of variables"),
                });
            };
            let variables = variables
                .into_iter()
                .filter_map(|(name, value)| stringify(value).map(|value| (name, value)))
                .collect();
            if key == GLOBAL_OVERRIDES_KEY {
                overrides.global = variables;
            } else {
                overrides.functions.insert(key, variables);
            }
        }
        Ok(overrides)
    }

    pub async fn load(path: &Path) -> Result<Self, LocalError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| LocalError::OverrideFile {
                reason: format!("{}: {e}", path.display()),
            })?;
        Self::from_json(&text)
    }

    /// Global entries first, function-specific entries win.
    pub fn for_function(&self, logical_id: &str) -> BTreeMap<String, String> {
        let mut merged = self.global.clone();
        if let Some(specific) = self.functions.get(logical_id) {
            merged.extend(specific.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        merged
    }
}

fn stringify(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Variables the platform itself defines for every function.
pub fn reserved_variables(function: &Function, region: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("AWS_SAM_LOCAL".to_string(), "true".to_string()),
        ("AWS_REGION".to_string(), region.to_string()),
        ("AWS_DEFAULT_REGION".to_string(), region.to_string()),
        ("AWS_LAMBDA_FUNCTION_NAME".to_string(), function.function_name.clone()),
        ("AWS_LAMBDA_FUNCTION_VERSION".to_string(), "$LATEST".to_string()),
        (
            "AWS_LAMBDA_FUNCTION_MEMORY_SIZE".to_string(),
            function.memory_size.to_string(),
        ),
        ("AWS_LAMBDA_FUNCTION_TIMEOUT".to_string(), function.timeout.to_string()),
        ("AWS_LAMBDA_FUNCTION_HANDLER".to_string(), function.handler.clone()),
        (
            "AWS_LAMBDA_LOG_GROUP_NAME".to_string(),
            format!("/aws/lambda/{}", function.function_name),
        ),
    ])
}

/// Final container environment.
///
/// Priority, highest first: override file, host environment, template. The
/// host is only consulted for names the template declares or the platform
/// reserves; credentials are the one exception and only ever come from the
/// host (or an override).
pub fn assemble_environment(
    function: &Function,
    region: &str,
    host: &HashMap<String, String>,
    overrides: &EnvironmentOverrides,
) -> BTreeMap<String, String> {
    let mut env = reserved_variables(function, region);
    env.extend(
        function
            .environment
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );

    for (name, value) in env.iter_mut() {
        if let Some(host_value) = host.get(name) {
            *value = host_value.clone();
        }
    }
    for name in CREDENTIAL_VARIABLES {
        if let Some(value) = host.get(*name) {
            env.insert(name.to_string(), value.clone());
        }
    }

    env.extend(overrides.for_function(&function.logical_id));
    env
}
