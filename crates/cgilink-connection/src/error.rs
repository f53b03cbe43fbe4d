use cgilink_frame::FrameError;
use cgilink_message::{ErrorInfo, MessageError};

/// Errors that can occur on a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The connection is closed; pending and future calls fail with this.
    #[error("connection closed")]
    Closed,

    /// The underlying stream failed.
    #[error("I/O error: {0}")]
    Io(std::io::Error),

    /// Frame-level error that is not an I/O failure.
    #[error("frame error: {0}")]
    Frame(FrameError),

    /// Envelope could not be encoded.
    #[error("message error: {0}")]
    Message(#[from] MessageError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Request timed out.
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// `listen` was called on a connection that already listened.
    #[error("connection is already listening")]
    AlreadyListening,

    /// A request handler for this message type is already registered.
    #[error("handler already registered for message type '{0}'")]
    HandlerAlreadyRegistered(String),

    /// The backend process could not be started.
    #[error("failed to spawn backend process: {0}")]
    Spawn(#[source] std::io::Error),

    /// The peer has no handler for the requested message type.
    #[error("peer does not handle message type '{0}'")]
    UnknownMessageType(String),

    /// The peer's handler failed.
    #[error("remote handler failed: {0}")]
    Remote(ErrorInfo),
}

impl From<FrameError> for ConnectionError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(io) => Self::Io(io),
            FrameError::ConnectionClosed => Self::Closed,
            other => Self::Frame(other),
        }
    }
}

impl From<std::io::Error> for ConnectionError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

pub type Result<T> = std::result::Result<T, ConnectionError>;
