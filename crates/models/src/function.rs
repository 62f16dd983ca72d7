use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const DEFAULT_MEMORY_MB: u64 = 128;
pub const DEFAULT_TIMEOUT_SECS: u64 = 3;
pub const DEFAULT_STAGE: &str = "Prod";

/// A function resource after every intrinsic call in it has been resolved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Function {
    pub logical_id: String,
    pub function_name: String,
    pub arn: String,
    pub runtime: String,
    pub handler: String,
    pub code_uri: PathBuf,
    pub memory_size: u64,
    pub timeout: u64,
    /// Variables literally present in the template (after Globals merge).
    pub environment: BTreeMap<String, String>,
    pub http_triggers: Vec<HttpTrigger>,
}

/// An HTTP route that invokes its owning function.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpTrigger {
    pub event_id: String,
    pub function: String,
    /// Path pattern such as `/items/{id}` or `/{proxy+}`.
    pub path: String,
    /// Upper-case method, `None` for any method.
    pub method: Option<String>,
    pub stage: String,
}

impl HttpTrigger {
    pub fn method_label(&self) -> &str {
        self.method.as_deref().unwrap_or("ANY")
    }
}

/// Normalizes a template method (`get`, `ANY`, `*`) to the trigger form.
pub fn normalize_method(method: &str) -> Option<String> {
    let upper = method.trim().to_ascii_uppercase();
    match upper.as_str() {
        "ANY" | "*" | "X-AMAZON-APIGATEWAY-ANY-METHOD" => None,
        _ => Some(upper),
    }
}
