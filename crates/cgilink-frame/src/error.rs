/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A line exceeded the configured maximum length. The line is discarded.
    #[error("line too long ({size} bytes, max {max})")]
    LineTooLong { size: usize, max: usize },

    /// A complete line was received but is not valid UTF-8. The line is discarded.
    #[error("line is not valid UTF-8 (valid up to byte {valid_up_to})")]
    InvalidUtf8 { valid_up_to: usize },

    /// An outbound line contains the frame delimiter.
    #[error("line contains a raw newline at byte {offset}")]
    EmbeddedDelimiter { offset: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream reached end-of-file.
    #[error("connection closed")]
    ConnectionClosed,
}

impl FrameError {
    /// True when the error only affects a single line and reading may continue.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FrameError::LineTooLong { .. } | FrameError::InvalidUtf8 { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
