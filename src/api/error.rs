use std::collections::HashMap;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Message used when neither the server nor the transport says anything useful
pub const DEFAULT_ERROR_MESSAGE: &str = "An error occurred";

/// Status reported when no HTTP status is known
pub const DEFAULT_ERROR_STATUS: u16 = 500;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Broad classification of a failed call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorKind {
    /// 401: the session has been cleared
    Unauthorized,
    /// Server-reported input problems, usually with field details
    Validation,
    NotFound,
    Server,
    /// The request never produced a response
    Transport,
    /// A 2xx response whose body could not be decoded
    InvalidResponse,
    #[default]
    Unknown,
}

/// The normalized error envelope every API operation fails with.
///
/// Serializes as `{ "error": ..., "details"?: {...}, "status": ... }`.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{error} (status {status})")]
pub struct ApiError {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, Vec<String>>>,
    pub status: u16,
    #[serde(skip)]
    pub kind: ErrorKind,
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    fn kind_for(status: u16, has_details: bool) -> ErrorKind {
        match status {
            401 => ErrorKind::Unauthorized,
            _ if has_details => ErrorKind::Validation,
            400 | 422 => ErrorKind::Validation,
            404 => ErrorKind::NotFound,
            500..=599 => ErrorKind::Server,
            _ => ErrorKind::Unknown,
        }
    }

    /// Normalize a non-success response.
    ///
    /// The message prefers the server's `error` (then `detail`) string and
    /// falls back to a transport-style message. `details` is only kept when
    /// the server sent a mapping.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let payload: Option<Value> = serde_json::from_str(body).ok();
        let server_message = payload.as_ref().and_then(|p| {
            ["error", "detail"]
                .iter()
                .filter_map(|key| p.get(key).and_then(Value::as_str))
                .map(str::trim)
                .find(|msg| !msg.is_empty())
                .map(str::to_string)
        });
        let details = payload
            .as_ref()
            .and_then(|p| p.get("details"))
            .and_then(Self::field_details);

        let error = server_message.unwrap_or_else(|| {
            let body = body.trim();
            if payload.is_none() && !body.is_empty() {
                format!(
                    "Request failed with status code {}: {}",
                    status.as_u16(),
                    Self::truncate_body(body)
                )
            } else {
                format!("Request failed with status code {}", status.as_u16())
            }
        });

        let status = status.as_u16();
        Self {
            error,
            kind: Self::kind_for(status, details.is_some()),
            details,
            status,
        }
    }

    /// Normalize a failure that never produced a usable response
    pub fn transport(err: &reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        let message = err.to_string();
        Self {
            error: Self::non_empty(message),
            details: None,
            status: status.unwrap_or(DEFAULT_ERROR_STATUS),
            kind: if err.is_decode() {
                ErrorKind::InvalidResponse
            } else {
                ErrorKind::Transport
            },
        }
    }

    /// A success response whose body did not match the expected shape
    pub fn invalid_response(err: &serde_json::Error) -> Self {
        Self {
            error: Self::non_empty(format!("Invalid response: {}", err)),
            details: None,
            status: DEFAULT_ERROR_STATUS,
            kind: ErrorKind::InvalidResponse,
        }
    }

    /// Build an envelope with a caller-chosen message and classification
    pub fn new(error: impl Into<String>, status: u16, kind: ErrorKind) -> Self {
        Self {
            error: Self::non_empty(error.into()),
            details: None,
            status,
            kind,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.kind == ErrorKind::Unauthorized
    }

    /// Messages for one form field, if the server reported any
    pub fn field_errors(&self, field: &str) -> &[String] {
        self.details
            .as_ref()
            .and_then(|d| d.get(field))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn non_empty(message: String) -> String {
        if message.trim().is_empty() {
            DEFAULT_ERROR_MESSAGE.to_string()
        } else {
            message
        }
    }

    /// Accept `{field: [msg, ...]}`; a lone string per field becomes a
    /// one-element list. Anything that is not a mapping is dropped.
    fn field_details(value: &Value) -> Option<HashMap<String, Vec<String>>> {
        let map = value.as_object()?;
        let details = map
            .iter()
            .map(|(field, messages)| {
                let messages = match messages {
                    Value::Array(items) => items
                        .iter()
                        .map(|item| match item {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect(),
                    Value::String(s) => vec![s.clone()],
                    other => vec![other.to_string()],
                };
                (field.clone(), messages)
            })
            .collect();
        Some(details)
    }
}
