use lambda_models::ProxyResponseEnvelope;
use serde_json::Value;
use std::fmt;

const ENVELOPE_KEYS: [&str; 3] = ["statusCode", "headers", "body"];

#[derive(Debug, Clone, PartialEq)]
pub enum EnvelopeError {
    /// The function failed and printed its error object.
    FunctionError { message: String, error_type: Option<String> },
    Malformed { reason: String },
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvelopeError::FunctionError {
                message,
                error_type: Some(error_type),
            } => write!(f, "function raised {error_type}: {message}"),
            EnvelopeError::FunctionError { message, .. } => {
                write!(f, "function raised an error: {message}")
            }
            EnvelopeError::Malformed { reason } => write!(f, "malformed response envelope: {reason}"),
        }
    }
}

/// Parses the last non-empty line of stdout as the response envelope.
pub fn parse_envelope(stdout: &str) -> Result<ProxyResponseEnvelope, EnvelopeError> {
    let line = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| EnvelopeError::Malformed {
            reason: "function produced no output".to_string(),
        })?;

    let value: Value = serde_json::from_str(line).map_err(|e| EnvelopeError::Malformed {
        reason: format!("not JSON ({e}): {}", truncate(line)),
    })?;
    let Value::Object(object) = value else {
        return Err(EnvelopeError::Malformed {
            reason: format!("expected an object, got {}", truncate(line)),
        });
    };

    if let Some(message) = object.get("errorMessage") {
        if !ENVELOPE_KEYS.iter().any(|key| object.contains_key(*key)) {
            return Err(EnvelopeError::FunctionError {
                message: text_of(message),
                error_type: object.get("errorType").map(text_of),
            });
        }
    }
    if !ENVELOPE_KEYS.iter().any(|key| object.contains_key(*key)) {
        return Err(EnvelopeError::Malformed {
            reason: "object has none of statusCode, headers, body".to_string(),
        });
    }

    let status_code = object
        .get("statusCode")
        .and_then(|v| match v {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        })
        .and_then(|code| u16::try_from(code).ok());

    let mut headers = Vec::new();
    if let Some(Value::Object(map)) = object.get("headers") {
        for (name, value) in map {
            headers.push((name.clone(), text_of(value)));
        }
    }
    if let Some(Value::Object(map)) = object.get("multiValueHeaders") {
        for (name, values) in map {
            if let Value::Array(values) = values {
                for value in values {
                    headers.push((name.clone(), text_of(value)));
                }
            }
        }
    }

    let body = match object.get("body") {
        None | Some(Value::Null) => None,
        Some(value) => Some(text_of(value)),
    };
    let is_base64_encoded = object
        .get("isBase64Encoded")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    Ok(ProxyResponseEnvelope {
        status_code,
        headers,
        body,
        is_base64_encoded,
    })
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate(line: &str) -> String {
    const LIMIT: usize = 120;
    match line.char_indices().nth(LIMIT) {
        Some((cut, _)) => format!("{}...", &line[..cut]),
        None => line.to_string(),
    }
}
