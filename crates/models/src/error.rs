use std::fmt;
use thiserror::Error;

/// A required-property or shape violation found while scaffolding a resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub resource: String,
    pub property: Option<String>,
    pub line: Option<usize>,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.resource)?;
        if let Some(property) = &self.property {
            write!(f, ".{property}")?;
        }
        if let Some(line) = self.line {
            write!(f, " (line {line})")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// A property that still held an intrinsic call when the resolver stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct UnresolvedProperty {
    pub resource: String,
    pub property: String,
    pub reason: String,
}

impl fmt::Display for UnresolvedProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}: {}", self.resource, self.property, self.reason)
    }
}

fn join_lines<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|item| format!("\n  - {item}"))
        .collect::<String>()
}

#[derive(Error, Debug)]
pub enum LocalError {
    #[error("Template parse error{}: {message}", .line.map(|l| format!(" at line {l}")).unwrap_or_default())]
    TemplateParse { line: Option<usize>, message: String },

    #[error("Template validation failed:{}", join_lines(.issues))]
    TemplateValidation { issues: Vec<ValidationIssue> },

    #[error("Unresolved references after {passes} pass(es):{}", join_lines(.properties))]
    UnresolvedReferences {
        passes: u32,
        properties: Vec<UnresolvedProperty>,
    },

    #[error("Runtime {runtime} is not supported (function {function})")]
    RuntimeNotSupported { function: String, runtime: String },

    #[error("Failed to pull image {image}: {reason}")]
    ImagePull { image: String, reason: String },

    #[error("Docker error: {message}")]
    DockerError { message: String },

    #[error("Docker is not reachable: {reason}")]
    DockerUnavailable { reason: String },

    #[error("Cannot mount code for function {function}: {reason}")]
    CodeMount { function: String, reason: String },

    #[error("Invalid ZIP file: {reason}")]
    InvalidZipFile { reason: String },

    #[error("Invalid environment override file: {reason}")]
    OverrideFile { reason: String },

    #[error("Function not found: {function}")]
    FunctionNotFound { function: String },

    #[error("Template does not contain any functions")]
    NoFunctions,

    #[error("Template contains functions but none of them have HTTP triggers")]
    NoHttpTriggers,

    #[error("All {count} function(s) with HTTP triggers failed to initialize")]
    AllFunctionsFailed { count: usize },

    #[error("Invalid response from function {function}: {reason}")]
    InvalidResponse { function: String, reason: String },

    #[error("Cannot bind {address}: {reason}")]
    ServerBind { address: String, reason: String },

    #[error("Configuration error: {reason}")]
    ConfigError { reason: String },
}

impl LocalError {
    pub fn error_type(&self) -> &'static str {
        match self {
            LocalError::TemplateParse { .. } => "TemplateParseError",
            LocalError::TemplateValidation { .. } => "TemplateValidationError",
            LocalError::UnresolvedReferences { .. } => "UnresolvedReferenceError",
            LocalError::RuntimeNotSupported { .. } => "RuntimeNotSupported",
            LocalError::ImagePull { .. } => "ImagePullError",
            LocalError::DockerError { .. } => "ServiceException",
            LocalError::DockerUnavailable { .. } => "ServiceException",
            LocalError::CodeMount { .. } => "CodeMountError",
            LocalError::InvalidZipFile { .. } => "InvalidParameterValueException",
            LocalError::OverrideFile { .. } => "InvalidParameterValueException",
            LocalError::FunctionNotFound { .. } => "ResourceNotFoundException",
            LocalError::NoFunctions => "NoFunctionsFound",
            LocalError::NoHttpTriggers => "NoHttpTriggers",
            LocalError::AllFunctionsFailed { .. } => "NoFunctionsMounted",
            LocalError::InvalidResponse { .. } => "InvalidResponse",
            LocalError::ServerBind { .. } => "ServiceException",
            LocalError::ConfigError { .. } => "ServiceException",
        }
    }

    /// Status the local gateway answers with when this error ends a request.
    pub fn http_status(&self) -> u16 {
        match self {
            LocalError::FunctionNotFound { .. } => 404,
            LocalError::RuntimeNotSupported { .. } => 502,
            LocalError::ImagePull { .. } => 502,
            LocalError::DockerError { .. } => 502,
            LocalError::DockerUnavailable { .. } => 502,
            LocalError::CodeMount { .. } => 502,
            LocalError::InvalidZipFile { .. } => 502,
            LocalError::InvalidResponse { .. } => 502,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_lists_every_issue() {
        let err = LocalError::TemplateValidation {
            issues: vec![
                ValidationIssue {
                    resource: "Hello".into(),
                    property: Some("Handler".into()),
                    line: Some(7),
                    message: "required property is missing".into(),
                },
                ValidationIssue {
                    resource: "Other".into(),
                    property: None,
                    line: None,
                    message: "Properties must be a mapping".into(),
                },
            ],
        };
        let text = err.to_string();
        assert!(text.contains("Hello.Handler (line 7): required property is missing"));
        assert!(text.contains("Other: Properties must be a mapping"));
    }

    #[test]
    fn parse_error_mentions_line() {
        let err = LocalError::TemplateParse {
            line: Some(3),
            message: "did not find expected key".into(),
        };
        assert_eq!(
            err.to_string(),
            "Template parse error at line 3: did not find expected key"
        );
        assert_eq!(err.error_type(), "TemplateParseError");
    }

    #[test]
    fn sandbox_failures_map_to_gateway_errors() {
        let err = LocalError::RuntimeNotSupported {
            function: "F".into(),
            runtime: "cobol85".into(),
        };
        assert_eq!(err.http_status(), 502);
        assert_eq!(LocalError::NoFunctions.http_status(), 500);
    }
}
