use crate::envelope::{parse_envelope, EnvelopeError};
use crate::event::{build_proxy_event, IncomingRequest, RouteContext};
use crate::AppState;
use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use base64::Engine;
use bytes::Bytes;
use lambda_invoker::InvocationOutcome;
use lambda_models::{LocalError, ProxyResponseEnvelope};
use std::net::SocketAddr;
use tower::ServiceExt;
use tracing::{error, info, instrument, warn};

const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Routes every request: function triggers first, then static files.
#[instrument(skip(state, request), fields(method = %request.method(), path = %request.uri().path()))]
pub async fn proxy_request(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let Some(hit) = state.routes.resolve(parts.method.as_str(), parts.uri.path()) else {
        return match &state.static_files {
            Some(files) => serve_static(files.clone(), Request::from_parts(parts, body)).await,
            None => missing_authentication_token(),
        };
    };

    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, limit = state.max_body_bytes, "Request body rejected");
            return gateway_message(StatusCode::PAYLOAD_TOO_LARGE, "Request Too Long");
        }
    };

    let source_ip = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "127.0.0.1".to_string());

    let function = hit.route.function.clone();
    let event = build_proxy_event(
        &IncomingRequest {
            method: &parts.method,
            uri: &parts.uri,
            headers: &parts.headers,
            body: &body,
            source_ip,
        },
        RouteContext {
            resource: &hit.route.trigger.path,
            stage: &hit.route.trigger.stage,
            path_parameters: hit.path_parameters,
        },
    );
    let payload = match serde_json::to_string(&event) {
        Ok(payload) => payload,
        Err(e) => {
            error!(error = %e, "Failed to serialize proxy event");
            return internal_server_error();
        }
    };

    info!(function = %function.logical_id, "Invoking function");
    let result = match state
        .invoker
        .invoke(&function, &payload, state.shutdown.child_token())
        .await
    {
        Ok(result) => result,
        Err(e) => {
            error!(function = %function.logical_id, error = %e, "Invocation failed");
            return gateway_message(
                StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::BAD_GATEWAY),
                "Internal server error",
            );
        }
    };

    match result.outcome {
        InvocationOutcome::TimedOut { after } => {
            warn!(function = %function.logical_id, ?after, "Function timed out");
            gateway_message(StatusCode::GATEWAY_TIMEOUT, "Endpoint request timed out")
        }
        InvocationOutcome::Interrupted => {
            warn!(function = %function.logical_id, "Invocation interrupted");
            gateway_message(StatusCode::BAD_GATEWAY, "Internal server error")
        }
        InvocationOutcome::Completed { exit_code } => {
            if exit_code != 0 {
                warn!(function = %function.logical_id, exit_code, "Function exited with an error code");
            }
            match parse_envelope(&result.stdout_text()) {
                Ok(envelope) => envelope_response(envelope, &parts.headers),
                Err(e) => {
                    let err = LocalError::InvalidResponse {
                        function: function.logical_id.clone(),
                        reason: e.to_string(),
                    };
                    match e {
                        EnvelopeError::FunctionError { .. } => {
                            error!(error = %err, "Function returned an error instead of a response")
                        }
                        EnvelopeError::Malformed { .. } => {
                            error!(error = %err, "Function returned an invalid response")
                        }
                    }
                    gateway_message(StatusCode::BAD_GATEWAY, "Internal server error")
                }
            }
        }
    }
}

/// Turns the function's envelope into the HTTP response.
pub fn envelope_response(envelope: ProxyResponseEnvelope, request_headers: &HeaderMap) -> Response {
    let status = envelope
        .status_code
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or_else(|| {
            warn!(status_code = ?envelope.status_code, "Missing or invalid statusCode");
            StatusCode::BAD_GATEWAY
        });

    let mut headers = HeaderMap::new();
    for (name, value) in &envelope.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => warn!(header = %name, "Dropping invalid response header"),
        }
    }
    if !headers.contains_key(header::CONTENT_TYPE) {
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(DEFAULT_CONTENT_TYPE),
        );
    }

    let raw = envelope.body.unwrap_or_default();
    let body = if envelope.is_base64_encoded && accepts_content_type(request_headers, &headers) {
        match base64::engine::general_purpose::STANDARD.decode(raw.as_bytes()) {
            Ok(decoded) => Bytes::from(decoded),
            Err(e) => {
                error!(error = %e, "Response body is flagged base64 but does not decode");
                return gateway_message(StatusCode::BAD_GATEWAY, "Internal server error");
            }
        }
    } else {
        Bytes::from(raw)
    };

    (status, headers, Body::from(body)).into_response()
}

/// True when some `Accept` range covers the response's media type
/// (`image/png`, `image/*` and `*/*` all cover `image/png`).
fn accepts_content_type(request_headers: &HeaderMap, response_headers: &HeaderMap) -> bool {
    let Some(content_type) = response_headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(media_type)
    else {
        return false;
    };

    request_headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(media_type)
        .any(|range| media_range_covers(range, content_type))
}

fn media_range_covers(range: &str, content_type: &str) -> bool {
    if range == "*/*" || range.eq_ignore_ascii_case(content_type) {
        return true;
    }
    match (range.split_once('/'), content_type.split_once('/')) {
        (Some((range_type, "*")), Some((actual_type, _))) => {
            range_type.eq_ignore_ascii_case(actual_type)
        }
        _ => false,
    }
}

fn media_type(value: &str) -> &str {
    value.split(';').next().unwrap_or_default().trim()
}

async fn serve_static(files: tower_http::services::ServeDir, request: Request) -> Response {
    match files.oneshot(request).await {
        Ok(response) if response.status() == StatusCode::NOT_FOUND => missing_authentication_token(),
        Ok(response) => response.map(Body::new),
        Err(e) => {
            error!(error = %e, "Static file lookup failed");
            internal_server_error()
        }
    }
}

fn missing_authentication_token() -> Response {
    gateway_message(StatusCode::FORBIDDEN, "Missing Authentication Token")
}

fn internal_server_error() -> Response {
    gateway_message(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

fn gateway_message(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "message": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(headers: &[(&str, &str)], body: &str, encoded: bool) -> ProxyResponseEnvelope {
        ProxyResponseEnvelope {
            status_code: Some(200),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: Some(body.to_string()),
            is_base64_encoded: encoded,
        }
    }

    fn accept(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, value.parse().unwrap());
        headers
    }

    #[tokio::test]
    async fn base64_body_is_decoded_only_for_a_matching_accept() {
        let png = envelope(&[("Content-Type", "image/png")], "aGk=", true);

        let response = envelope_response(png.clone(), &accept("text/html, image/png;q=0.9"));
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"hi");

        let response = envelope_response(png, &accept("text/html"));
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"aGk=");
    }

    #[tokio::test]
    async fn wildcard_accept_ranges_decode_base64_bodies() {
        for range in ["*/*", "image/*", "text/html, image/*;q=0.8"] {
            let png = envelope(&[("Content-Type", "image/png")], "aGk=", true);
            let response = envelope_response(png, &accept(range));
            let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
            assert_eq!(&body[..], b"hi", "Accept: {range}");
        }

        let png = envelope(&[("Content-Type", "image/png")], "aGk=", true);
        let response = envelope_response(png, &accept("text/*"));
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"aGk=");
    }

    #[test]
    fn content_type_defaults_to_json() {
        let response = envelope_response(envelope(&[], "{}", false), &HeaderMap::new());
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            DEFAULT_CONTENT_TYPE
        );
    }

    #[test]
    fn missing_status_code_is_a_bad_gateway() {
        let mut missing = envelope(&[], "x", false);
        missing.status_code = None;
        let response = envelope_response(missing, &HeaderMap::new());
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
