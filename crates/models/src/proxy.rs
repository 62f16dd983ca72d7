use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// Proxy-integration event, field for field as deployed handlers receive it.

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRequestEvent {
    pub resource: String,
    pub path: String,
    pub http_method: String,
    pub headers: Option<HashMap<String, String>>,
    pub multi_value_headers: Option<HashMap<String, Vec<String>>>,
    pub query_string_parameters: Option<HashMap<String, String>>,
    pub multi_value_query_string_parameters: Option<HashMap<String, Vec<String>>>,
    pub path_parameters: Option<HashMap<String, String>>,
    pub stage_variables: Option<HashMap<String, String>>,
    pub request_context: ProxyRequestContext,
    pub body: Option<String>,
    pub is_base64_encoded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRequestContext {
    pub account_id: String,
    pub api_id: String,
    pub resource_id: String,
    pub resource_path: String,
    pub http_method: String,
    pub path: String,
    pub protocol: String,
    pub stage: String,
    pub domain_name: Option<String>,
    pub request_id: String,
    pub extended_request_id: Option<String>,
    pub request_time: String,
    pub request_time_epoch: i64,
    pub identity: ProxyRequestIdentity,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRequestIdentity {
    pub account_id: Option<String>,
    pub api_key: Option<String>,
    pub caller: Option<String>,
    pub cognito_authentication_provider: Option<String>,
    pub cognito_authentication_type: Option<String>,
    pub cognito_identity_id: Option<String>,
    pub cognito_identity_pool_id: Option<String>,
    pub source_ip: String,
    pub user: Option<String>,
    pub user_agent: Option<String>,
    pub user_arn: Option<String>,
}

/// The `statusCode`/`headers`/`body` object a proxied function returns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProxyResponseEnvelope {
    pub status_code: Option<u16>,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub is_base64_encoded: bool,
}

impl ProxyResponseEnvelope {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}
