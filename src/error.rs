//! Typed errors that callers branch on. Everything else travels as `anyhow::Error`.

use serde::Deserialize;

/// Error code AWS APIs return when the addressed resource does not exist.
pub const RESOURCE_NOT_FOUND: &str = "ResourceNotFoundException";

/// Non-success reply from an AWS-style JSON API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{service} returned {status} {code}: {message}")]
pub struct AwsApiError {
    /// Logical service name used in messages (e.g. `opensearch`).
    pub service: &'static str,
    /// HTTP status code.
    pub status: u16,
    /// Error code, e.g. `ResourceNotFoundException`.
    pub code: String,
    /// Human readable message (or raw body when unparseable).
    pub message: String,
}

impl AwsApiError {
    /// True when the error reports a missing resource.
    pub fn is_resource_not_found(&self) -> bool {
        self.code == RESOURCE_NOT_FOUND
    }

    /// Builds an error from the status, the optional `x-amzn-ErrorType` header and the body.
    pub fn from_parts(
        service: &'static str,
        status: u16,
        error_type_header: Option<&str>,
        body: &str,
    ) -> Self {
        let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();
        let code = error_type_header
            .map(normalize_code)
            .filter(|code| !code.is_empty())
            .or_else(|| {
                parsed
                    .as_ref()
                    .and_then(|b| b.kind.as_deref().or(b.code.as_deref()))
                    .map(normalize_code)
                    .filter(|code| !code.is_empty())
            })
            .unwrap_or_else(|| format!("Http{status}"));
        let message = parsed
            .and_then(|b| b.message)
            .unwrap_or_else(|| body.trim().to_string());
        Self {
            service,
            status,
            code,
            message,
        }
    }
}

// `x-amzn-ErrorType` looks like `Code:http://...`; `__type` may be `namespace#Code`.
fn normalize_code(raw: &str) -> String {
    let head = raw.split(':').next().unwrap_or(raw);
    let tail = head.rsplit('#').next().unwrap_or(head);
    tail.trim().to_string()
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type")]
    kind: Option<String>,
    #[serde(alias = "Code")]
    code: Option<String>,
    #[serde(alias = "Message")]
    message: Option<String>,
}

/// Problems with user-submitted questions, handled locally without remote calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuestionError {
    /// The question was empty or whitespace only.
    #[error("please enter a question before submitting")]
    Empty,
}
