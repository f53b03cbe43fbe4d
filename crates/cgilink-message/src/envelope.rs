use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::kind::MessageKind;

/// A single message crossing the process boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Message name, e.g. `analyzeSolution`. Replies repeat the request's name.
    pub msg_type: String,
    /// Present for requests and replies, absent for notifications.
    pub correlation_id: Option<String>,
    pub kind: MessageKind,
    pub payload: Value,
}

impl Envelope {
    /// Interpret the payload of an `Error` envelope.
    ///
    /// A payload that is not an [`ErrorInfo`] object is kept as the message text.
    pub fn error_info(&self) -> ErrorInfo {
        if let Ok(info) = serde_json::from_value::<ErrorInfo>(self.payload.clone()) {
            return info;
        }
        match &self.payload {
            Value::String(text) => ErrorInfo::new(ErrorCode::HandlerFailed, text.clone()),
            other => ErrorInfo::new(ErrorCode::HandlerFailed, other.to_string()),
        }
    }
}

/// Machine-readable reason carried by an `Error` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// No handler is registered for the request's message type.
    UnknownMessageType,
    /// The request payload did not match what the handler expects.
    InvalidPayload,
    /// The handler returned a failure.
    HandlerFailed,
    /// The handler panicked.
    HandlerPanicked,
    /// A code this build does not know.
    #[serde(other)]
    Other,
}

/// Serializable failure description sent back to a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
    /// Rendered source chain or other diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// The reply for a request nobody handles.
    pub fn unknown_message_type(msg_type: &str) -> Self {
        Self::new(
            ErrorCode::UnknownMessageType,
            format!("unknown message type '{msg_type}'"),
        )
    }

    /// Convert into the JSON payload of an `Error` envelope.
    pub fn into_value(self) -> Value {
        let mut object = serde_json::Map::new();
        object.insert(
            "code".to_string(),
            serde_json::to_value(self.code).unwrap_or(Value::Null),
        );
        object.insert("message".to_string(), Value::String(self.message));
        if let Some(detail) = self.detail {
            object.insert("detail".to_string(), Value::String(detail));
        }
        Value::Object(object)
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)?;
        if let Some(detail) = &self.detail {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}
