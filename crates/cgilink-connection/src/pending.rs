//! Outbound requests waiting for a reply.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use cgilink_message::{Envelope, ErrorCode, MessageKind};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{ConnectionError, Result};

/// Outcome delivered to a waiting caller.
pub type Reply = Result<Value>;

struct PendingCall {
    msg_type: String,
    reply: oneshot::Sender<Reply>,
}

#[derive(Default)]
struct PendingState {
    calls: HashMap<String, PendingCall>,
    closed: bool,
}

/// Correlation id → waiting caller.
///
/// Once [`fail_all`](Self::fail_all) has run the table stays closed and
/// rejects new entries.
#[derive(Default)]
pub struct PendingCalls {
    state: Mutex<PendingState>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call and return the receiving end of its reply.
    pub fn insert(
        &self,
        correlation_id: String,
        msg_type: &str,
    ) -> Result<oneshot::Receiver<Reply>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return Err(ConnectionError::Closed);
        }
        let (tx, rx) = oneshot::channel();
        state.calls.insert(
            correlation_id,
            PendingCall {
                msg_type: msg_type.to_string(),
                reply: tx,
            },
        );
        Ok(rx)
    }

    /// Resolve the call a `Response` or `Error` envelope answers.
    ///
    /// Returns `false` when no call is waiting for it.
    pub fn complete(&self, envelope: Envelope) -> bool {
        let Some(correlation_id) = envelope.correlation_id.as_deref() else {
            return false;
        };
        let call = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .calls
            .remove(correlation_id);
        let Some(call) = call else {
            return false;
        };

        let reply = match envelope.kind {
            MessageKind::Error => {
                let info = envelope.error_info();
                if info.code == ErrorCode::UnknownMessageType {
                    Err(ConnectionError::UnknownMessageType(call.msg_type))
                } else {
                    Err(ConnectionError::Remote(info))
                }
            }
            _ => Ok(envelope.payload),
        };
        // The caller may have given up (timeout, dropped future).
        let _ = call.reply.send(reply);
        true
    }

    /// Drop a call without resolving it.
    pub fn remove(&self, correlation_id: &str) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .calls
            .remove(correlation_id)
            .is_some()
    }

    /// Close the table and fail every waiting call with `Closed`.
    pub fn fail_all(&self) -> usize {
        let calls: Vec<PendingCall> = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.closed = true;
            state.calls.drain().map(|(_, call)| call).collect()
        };
        let count = calls.len();
        for call in calls {
            let _ = call.reply.send(Err(ConnectionError::Closed));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .calls
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for PendingCalls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCalls")
            .field("len", &self.len())
            .finish()
    }
}
