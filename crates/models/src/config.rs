use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub server: ServerConfig,
    pub docker: DockerConfig,
    pub invoke: InvokeConfig,
    pub template: TemplateConfig,
    /// Runtime identifier -> image reference, layered over the built-in table.
    pub runtimes: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub static_dir: Option<String>,
    pub max_request_body_size_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct DockerConfig {
    pub host: String,
    pub network: Option<String>,
    pub skip_pull: bool,
    pub debug_host_ip: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct InvokeConfig {
    pub debug_port: Option<u16>,
    pub env_vars: Option<String>,
    pub region: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct TemplateConfig {
    pub path: String,
    pub max_resolve_passes: u32,
    pub parameter_overrides: HashMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3000,
            static_dir: Some("public".to_string()),
            max_request_body_size_mb: 6, // matches the hosted payload limit
        }
    }
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            host: "".to_string(),
            network: None,
            skip_pull: false,
            debug_host_ip: "127.0.0.1".to_string(),
        }
    }
}

impl Default for InvokeConfig {
    fn default() -> Self {
        Self {
            debug_port: None,
            env_vars: None,
            region: "us-east-1".to_string(),
        }
    }
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            path: "template.yaml".to_string(),
            max_resolve_passes: 3,
            parameter_overrides: HashMap::new(),
        }
    }
}
