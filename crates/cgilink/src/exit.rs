use std::fmt;
use std::io;

use cgilink::connection::ConnectionError;
use cgilink::frame::FrameError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound => USAGE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn connection_error(context: &str, err: ConnectionError) -> CliError {
    match err {
        ConnectionError::Io(source) | ConnectionError::Spawn(source) => io_error(context, source),
        ConnectionError::Frame(err) => frame_error(context, err),
        ConnectionError::UnknownMessageType(_) => CliError::new(USAGE, format!("{context}: {err}")),
        ConnectionError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        ConnectionError::Json(_) | ConnectionError::Message(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        ConnectionError::Remote(_) | ConnectionError::Closed => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cgilink::message::{ErrorCode, ErrorInfo};

    use super::*;

    #[test]
    fn connection_errors_map_to_exit_codes() {
        let cases = [
            (ConnectionError::UnknownMessageType("x".into()), USAGE),
            (ConnectionError::Timeout(Duration::from_secs(1)), TIMEOUT),
            (ConnectionError::Closed, FAILURE),
            (
                ConnectionError::Remote(ErrorInfo::new(ErrorCode::HandlerFailed, "boom")),
                FAILURE,
            ),
            (
                ConnectionError::Frame(FrameError::LineTooLong { size: 10, max: 5 }),
                DATA_INVALID,
            ),
            (
                ConnectionError::Spawn(io::Error::from(io::ErrorKind::NotFound)),
                USAGE,
            ),
            (ConnectionError::AlreadyListening, INTERNAL),
        ];
        for (err, code) in cases {
            assert_eq!(connection_error("call", err).code, code);
        }
    }
}
