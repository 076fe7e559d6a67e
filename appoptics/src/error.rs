//! Error types for the AppOptics client.

use std::fmt;

use serde_json::Value;
use thiserror::Error;

/// The main error type for all client operations.
///
/// Server-reported failures (`Client`, `RetriesExhausted`) are kept apart from
/// local precondition violations (`InvalidArgument`), which are raised before
/// any request is sent.
#[derive(Error, Debug)]
pub enum AppOpticsError {
    /// The API answered with a 4xx status.
    #[error("client error: {0}")]
    Client(#[from] ClientError),

    /// The backoff policy gave up on a request that kept failing with 5xx
    /// statuses or connection resets.
    #[error("gave up after {attempts} attempts (last status: {last_status:?})")]
    RetriesExhausted {
        /// Number of requests sent before giving up.
        attempts: u32,
        /// Status of the last response, if the last attempt got one.
        last_status: Option<u16>,
    },

    /// The caller supplied something the client refuses to send.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// Description of what was wrong with the input.
        reason: String,
    },

    /// The transport failed to deliver the request.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The response decoded fine but did not have the expected shape.
    #[error("unexpected response: {reason}")]
    UnexpectedResponse {
        /// Description of what was missing or wrong.
        reason: String,
    },
}

impl AppOpticsError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub(crate) fn unexpected(reason: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            reason: reason.into(),
        }
    }

    /// Returns the HTTP status for server-reported errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Client(err) => Some(err.status),
            Self::RetriesExhausted { last_status, .. } => *last_status,
            _ => None,
        }
    }

    /// Returns `true` for a 404 client error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Client(err) if err.kind() == ClientErrorKind::NotFound)
    }
}

/// Classification of 4xx responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientErrorKind {
    /// 400
    BadRequest,
    /// 401
    Unauthorized,
    /// 403
    Forbidden,
    /// 404
    NotFound,
    /// Any other 4xx status.
    Other,
}

impl ClientErrorKind {
    /// Maps an HTTP status code to its kind.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            _ => Self::Other,
        }
    }
}

/// A 4xx response, carrying the status and the decoded error payload.
///
/// These are never retried: they indicate a problem with the request itself.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientError {
    /// The HTTP status code.
    pub status: u16,
    /// The decoded response body, if there was one.
    pub payload: Option<Value>,
}

impl ClientError {
    /// Creates a client error from a status and decoded payload.
    pub fn new(status: u16, payload: Option<Value>) -> Self {
        Self { status, payload }
    }

    /// The error class for this status.
    pub fn kind(&self) -> ClientErrorKind {
        ClientErrorKind::from_status(self.status)
    }

    /// Human-readable message flattened from the server's error payload.
    ///
    /// Handles the shapes the API uses: a bare string, `{"error": ..}`,
    /// `{"message": ..}`, and `{"errors": {field: messages}}` where messages
    /// may be a string, a list, or a nested object. Anything else falls back
    /// to the compact JSON text of the payload.
    pub fn message(&self) -> String {
        match &self.payload {
            None => String::new(),
            Some(payload) => flatten_payload(payload),
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.status, self.message())
    }
}

impl std::error::Error for ClientError {}

fn flatten_payload(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        Value::Object(map) => {
            if let Some(error) = map.get("error") {
                return scalar_text(error);
            }
            if let Some(message) = map.get("message") {
                return scalar_text(message);
            }
            match map.get("errors") {
                Some(Value::Array(items)) => join(items.iter().map(scalar_text)),
                Some(Value::Object(fields)) => {
                    let mut messages = Vec::new();
                    for (field, errors) in fields {
                        match errors {
                            Value::Array(items) => {
                                messages.extend(
                                    items.iter().map(|m| format!("{field}: {}", scalar_text(m))),
                                );
                            }
                            Value::Object(nested) => {
                                messages.extend(nested.iter().map(|(key, value)| {
                                    format!("{field}: {key}: {}", flatten_nested(value))
                                }));
                            }
                            other => messages.push(format!("{field}: {}", scalar_text(other))),
                        }
                    }
                    join(messages.into_iter())
                }
                Some(other) => scalar_text(other),
                None => payload.to_string(),
            }
        }
        other => other.to_string(),
    }
}

fn flatten_nested(value: &Value) -> String {
    match value {
        Value::Array(items) => join(items.iter().map(flatten_nested)),
        Value::Object(map) => join(
            map.iter()
                .map(|(key, value)| format!("{key}: {}", flatten_nested(value))),
        ),
        other => scalar_text(other),
    }
}

/// Strings print without quotes, everything else as compact JSON.
fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn join(parts: impl Iterator<Item = String>) -> String {
    parts.collect::<Vec<_>>().join(", ")
}

/// Errors reported by a [`Transport`](crate::transport::Transport).
#[derive(Error, Debug)]
pub enum TransportError {
    /// The connection was dropped before a response arrived. The driver
    /// reconnects and re-sends without consuming a backoff step.
    #[error("connection reset: {reason}")]
    ConnectionReset {
        /// Description of the reset.
        reason: String,
    },

    /// Failed to build the underlying HTTP client.
    #[error("failed to create HTTP client: {reason}")]
    ClientCreate {
        /// Description of the failure.
        reason: String,
    },

    /// The request could not be sent or the response could not be read.
    #[error("request to {uri} failed: {reason}")]
    RequestFailed {
        /// The request URI.
        uri: String,
        /// Description of the failure.
        reason: String,
    },
}

/// Errors raised while decoding a response body.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The declared charset is not one the client knows how to decode.
    #[error("unsupported charset '{charset}'")]
    UnsupportedCharset {
        /// The charset named in the Content-Type header.
        charset: String,
    },

    /// The body is not valid in the declared charset.
    #[error("body is not valid {charset}")]
    InvalidText {
        /// The charset the body was decoded with.
        charset: String,
    },

    /// The body was declared as JSON but did not parse.
    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),
}

/// Type alias for `Result<T, AppOpticsError>`.
pub type Result<T> = std::result::Result<T, AppOpticsError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(payload: Value) -> String {
        ClientError::new(400, Some(payload)).message()
    }

    #[test]
    fn test_kind_from_status() {
        assert_eq!(ClientErrorKind::from_status(400), ClientErrorKind::BadRequest);
        assert_eq!(ClientErrorKind::from_status(401), ClientErrorKind::Unauthorized);
        assert_eq!(ClientErrorKind::from_status(403), ClientErrorKind::Forbidden);
        assert_eq!(ClientErrorKind::from_status(404), ClientErrorKind::NotFound);
        assert_eq!(ClientErrorKind::from_status(422), ClientErrorKind::Other);
    }

    #[test]
    fn test_flat_string_payload() {
        assert_eq!(message(json!("nope")), "nope");
    }

    #[test]
    fn test_error_and_message_keys() {
        let rate_limited = json!({
            "request_time": 1_467_306_906,
            "error": "You have hit the API limit for measurements"
        });
        assert_eq!(
            message(rate_limited),
            "You have hit the API limit for measurements"
        );
        assert_eq!(message(json!({"message": "bad token"})), "bad token");
    }

    #[test]
    fn test_nested_params_errors() {
        let payload = json!({"errors": {"params": {"name": ["is not present"]}}});
        assert!(message(payload).contains("params: name: is not present"));
    }

    #[test]
    fn test_request_error_list() {
        let payload = json!({
            "errors": {
                "request": [
                    "Please use secured connection through https!",
                    "Please provide credentials for authentication."
                ]
            }
        });
        assert_eq!(
            message(payload),
            "request: Please use secured connection through https!, \
             request: Please provide credentials for authentication."
        );
    }

    #[test]
    fn test_request_error_scalar() {
        let payload = json!({"errors": {"request": "resolution unavailable"}});
        assert_eq!(message(payload), "request: resolution unavailable");
    }

    #[test]
    fn test_multiple_param_errors() {
        let payload = json!({
            "errors": {
                "params": {
                    "name": ["is not present"],
                    "start_time": ["is not a number", "is required"]
                }
            }
        });
        assert_eq!(
            message(payload),
            "params: name: is not present, \
             params: start_time: is not a number, is required"
        );
    }

    #[test]
    fn test_malformed_payloads_fall_back() {
        assert_eq!(message(json!({"weird": 1})), r#"{"weird":1}"#);
        assert_eq!(message(json!(42)), "42");
        assert_eq!(message(json!({"errors": 7})), "7");
        assert_eq!(ClientError::new(418, None).message(), "");
    }

    #[test]
    fn test_display_includes_status() {
        let err = ClientError::new(404, Some(json!({"message": "not found"})));
        assert_eq!(err.to_string(), "[404] not found");
    }

    #[test]
    fn test_top_level_helpers() {
        let err: AppOpticsError = ClientError::new(404, None).into();
        assert!(err.is_not_found());
        assert_eq!(err.status(), Some(404));
        assert_eq!(AppOpticsError::invalid("x").status(), None);
    }
}
