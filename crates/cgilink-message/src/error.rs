/// Errors that can occur while encoding or decoding an envelope.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// A required envelope field is absent.
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    /// The kind tag is not one of the known tags.
    #[error("unknown message kind '{0}'")]
    UnknownKind(String),

    /// A field is present but not usable.
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },

    /// The payload is not well-formed JSON.
    #[error("invalid payload JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MessageError>;
