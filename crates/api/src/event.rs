use axum::http::{HeaderMap, Method, Uri};
use base64::Engine;
use lambda_models::{ProxyRequestContext, ProxyRequestEvent, ProxyRequestIdentity};
use std::collections::HashMap;

const LOCAL_ACCOUNT_ID: &str = "123456789012";
const LOCAL_API_ID: &str = "1234567890";
const LOCAL_RESOURCE_ID: &str = "123456";

/// Everything about one HTTP request the event needs.
#[derive(Debug)]
pub struct IncomingRequest<'a> {
    pub method: &'a Method,
    pub uri: &'a Uri,
    pub headers: &'a HeaderMap,
    pub body: &'a [u8],
    pub source_ip: String,
}

/// Where the request landed in the route table.
#[derive(Debug)]
pub struct RouteContext<'a> {
    pub resource: &'a str,
    pub stage: &'a str,
    pub path_parameters: HashMap<String, String>,
}

pub fn build_proxy_event(request: &IncomingRequest<'_>, route: RouteContext<'_>) -> ProxyRequestEvent {
    let path = request.uri.path().to_string();
    let method = request.method.as_str().to_string();

    let (headers, multi_value_headers) = header_maps(request.headers);
    let (query, multi_value_query) = query_maps(request.uri.query());
    let (body, is_base64_encoded) = encode_body(request.body);

    let now = chrono::Utc::now();
    let request_id = uuid::Uuid::new_v4().to_string();
    let user_agent = headers.get("user-agent").cloned();

    ProxyRequestEvent {
        resource: route.resource.to_string(),
        path: path.clone(),
        http_method: method.clone(),
        headers: Some(headers),
        multi_value_headers: Some(multi_value_headers),
        query_string_parameters: (!query.is_empty()).then_some(query),
        multi_value_query_string_parameters: (!multi_value_query.is_empty())
            .then_some(multi_value_query),
        path_parameters: (!route.path_parameters.is_empty()).then_some(route.path_parameters),
        stage_variables: None,
        request_context: ProxyRequestContext {
            account_id: LOCAL_ACCOUNT_ID.to_string(),
            api_id: LOCAL_API_ID.to_string(),
            resource_id: LOCAL_RESOURCE_ID.to_string(),
            resource_path: route.resource.to_string(),
            http_method: method,
            path: format!("/{}{}", route.stage, path),
            protocol: "HTTP/1.1".to_string(),
            stage: route.stage.to_string(),
            domain_name: request
                .headers
                .get("host")
                .and_then(|h| h.to_str().ok())
                .map(str::to_string),
            extended_request_id: Some(request_id.clone()),
            request_id,
            request_time: now.format("%d/%b/%Y:%H:%M:%S %z").to_string(),
            request_time_epoch: now.timestamp_millis(),
            identity: ProxyRequestIdentity {
                source_ip: request.source_ip.clone(),
                user_agent,
                ..ProxyRequestIdentity::default()
            },
        },
        body,
        is_base64_encoded,
    }
}

/// Single-value view keeps the last value, as the hosted gateway does.
fn header_maps(headers: &HeaderMap) -> (HashMap<String, String>, HashMap<String, Vec<String>>) {
    let mut single = HashMap::new();
    let mut multi: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        single.insert(name.as_str().to_string(), value.to_string());
        multi
            .entry(name.as_str().to_string())
            .or_default()
            .push(value.to_string());
    }
    (single, multi)
}

fn query_maps(query: Option<&str>) -> (HashMap<String, String>, HashMap<String, Vec<String>>) {
    let mut single = HashMap::new();
    let mut multi: HashMap<String, Vec<String>> = HashMap::new();
    for (key, value) in form_urlencoded::parse(query.unwrap_or_default().as_bytes()).into_owned() {
        single.insert(key.clone(), value.clone());
        multi.entry(key).or_default().push(value);
    }
    (single, multi)
}

fn encode_body(body: &[u8]) -> (Option<String>, bool) {
    if body.is_empty() {
        return (None, false);
    }
    match std::str::from_utf8(body) {
        Ok(text) => (Some(text.to_string()), false),
        Err(_) => (
            Some(base64::engine::general_purpose::STANDARD.encode(body)),
            true,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_carries_query_method_path_and_identity() {
        let method = Method::GET;
        let uri: Uri = "/items?x=1&tag=a&tag=b".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", "curl/8.0".parse().unwrap());
        headers.append("x-multi", "one".parse().unwrap());
        headers.append("x-multi", "two".parse().unwrap());

        let request = IncomingRequest {
            method: &method,
            uri: &uri,
            headers: &headers,
            body: b"",
            source_ip: "10.0.0.7".to_string(),
        };
        let event = build_proxy_event(
            &request,
            RouteContext {
                resource: "/items",
                stage: "Prod",
                path_parameters: HashMap::new(),
            },
        );

        assert_eq!(event.http_method, "GET");
        assert_eq!(event.path, "/items");
        let query = event.query_string_parameters.unwrap();
        assert_eq!(query["x"], "1");
        assert_eq!(query["tag"], "b");
        assert_eq!(
            event.multi_value_query_string_parameters.unwrap()["tag"],
            vec!["a", "b"]
        );
        assert_eq!(event.headers.unwrap()["x-multi"], "two");
        assert_eq!(event.multi_value_headers.unwrap()["x-multi"], vec!["one", "two"]);
        assert_eq!(event.request_context.identity.source_ip, "10.0.0.7");
        assert_eq!(event.request_context.identity.user_agent.as_deref(), Some("curl/8.0"));
        assert_eq!(event.request_context.path, "/Prod/items");
        assert_eq!(event.body, None);
        assert!(event.path_parameters.is_none());
    }

    #[test]
    fn binary_bodies_are_base64_encoded() {
        assert_eq!(encode_body(b"hello"), (Some("hello".to_string()), false));
        let (body, encoded) = encode_body(&[0xff, 0xfe]);
        assert!(encoded);
        assert_eq!(body.as_deref(), Some("//4="));
    }
}
