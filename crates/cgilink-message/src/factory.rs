use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

use crate::envelope::{Envelope, ErrorInfo};
use crate::kind::MessageKind;

/// Builds envelopes and hands out correlation ids.
///
/// Ids come from a counter starting at 1, unique for the factory's lifetime.
/// Each side of a connection matches replies only against ids it issued, so
/// the two peers' counters never need to be coordinated.
#[derive(Debug)]
pub struct MessageFactory {
    next_id: AtomicU64,
}

impl Default for MessageFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageFactory {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate a fresh correlation id.
    pub fn next_correlation_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }

    /// A request with a fresh correlation id.
    pub fn new_request(&self, msg_type: impl Into<String>, payload: Value) -> Envelope {
        Envelope {
            msg_type: msg_type.into(),
            correlation_id: Some(self.next_correlation_id()),
            kind: MessageKind::Request,
            payload,
        }
    }

    /// A successful reply; the correlation id is kept exactly as given.
    pub fn new_response(
        msg_type: impl Into<String>,
        correlation_id: impl Into<String>,
        payload: Value,
    ) -> Envelope {
        Envelope {
            msg_type: msg_type.into(),
            correlation_id: Some(correlation_id.into()),
            kind: MessageKind::Response,
            payload,
        }
    }

    /// A failed reply; the correlation id is kept exactly as given.
    pub fn new_error(
        msg_type: impl Into<String>,
        correlation_id: impl Into<String>,
        info: ErrorInfo,
    ) -> Envelope {
        Envelope {
            msg_type: msg_type.into(),
            correlation_id: Some(correlation_id.into()),
            kind: MessageKind::Error,
            payload: info.into_value(),
        }
    }

    /// A one-way notification.
    pub fn new_notification(msg_type: impl Into<String>, payload: Value) -> Envelope {
        Envelope {
            msg_type: msg_type.into(),
            correlation_id: None,
            kind: MessageKind::Notification,
            payload,
        }
    }
}
