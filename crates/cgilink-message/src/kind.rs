//! Envelope kinds and their wire tags.

use std::fmt;

/// Wire tag for [`MessageKind::Request`].
pub const REQUEST_TAG: &str = "req";
/// Wire tag for [`MessageKind::Response`].
pub const RESPONSE_TAG: &str = "res";
/// Wire tag for [`MessageKind::Error`].
pub const ERROR_TAG: &str = "err";
/// Wire tag for [`MessageKind::Notification`].
pub const NOTIFICATION_TAG: &str = "ntf";

/// What an envelope is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Expects exactly one `Response` or `Error` with the same correlation id.
    Request,
    /// Successful reply to a request.
    Response,
    /// Failed reply to a request.
    Error,
    /// One-way event; no correlation id, no reply.
    Notification,
}

impl MessageKind {
    /// The wire tag for this kind.
    pub fn tag(self) -> &'static str {
        match self {
            MessageKind::Request => REQUEST_TAG,
            MessageKind::Response => RESPONSE_TAG,
            MessageKind::Error => ERROR_TAG,
            MessageKind::Notification => NOTIFICATION_TAG,
        }
    }

    /// Parse a wire tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            REQUEST_TAG => Some(MessageKind::Request),
            RESPONSE_TAG => Some(MessageKind::Response),
            ERROR_TAG => Some(MessageKind::Error),
            NOTIFICATION_TAG => Some(MessageKind::Notification),
            _ => None,
        }
    }

    /// Returns true for the kinds that carry a correlation id.
    pub fn is_correlated(self) -> bool {
        !matches!(self, MessageKind::Notification)
    }

    /// Returns true for `Response` and `Error`.
    pub fn is_reply(self) -> bool {
        matches!(self, MessageKind::Response | MessageKind::Error)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}
