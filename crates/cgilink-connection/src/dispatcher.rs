//! Inbound envelope routing.
//!
//! [`Dispatcher::route`] decides what an inbound envelope means without doing
//! any I/O: requests become a future producing the reply envelope, replies
//! resolve pending calls, notifications fan out to listeners.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;

use cgilink_message::{Envelope, ErrorInfo, MessageFactory, MessageKind};
use futures_util::FutureExt;
use tracing::{debug, warn};

use crate::handler::HandlerError;
use crate::pending::PendingCalls;
use crate::registry::{HandlerRegistry, ListenerRegistry};

/// Future resolving to the reply for one request.
pub type ReplyFuture = Pin<Box<dyn Future<Output = Envelope> + Send + 'static>>;

/// What the connection must do with a routed envelope.
pub enum Dispatch {
    /// Run the future, then write the envelope it yields.
    Reply(ReplyFuture),
    /// Nothing further to do.
    Done,
}

impl std::fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dispatch::Reply(_) => f.write_str("Dispatch::Reply(..)"),
            Dispatch::Done => f.write_str("Dispatch::Done"),
        }
    }
}

/// Handler registry, notification listeners and pending call table.
#[derive(Debug, Default)]
pub struct Dispatcher {
    handlers: HandlerRegistry,
    listeners: ListenerRegistry,
    pending: PendingCalls,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    pub fn pending(&self) -> &PendingCalls {
        &self.pending
    }

    /// Route one inbound envelope.
    pub fn route(&self, envelope: Envelope) -> Dispatch {
        match envelope.kind {
            MessageKind::Request => self.route_request(envelope),
            MessageKind::Response | MessageKind::Error => {
                let msg_type = envelope.msg_type.clone();
                let correlation_id = envelope.correlation_id.clone().unwrap_or_default();
                if !self.pending.complete(envelope) {
                    debug!(%msg_type, %correlation_id, "discarding reply with no pending call");
                }
                Dispatch::Done
            }
            MessageKind::Notification => {
                self.notify_listeners(envelope);
                Dispatch::Done
            }
        }
    }

    fn route_request(&self, envelope: Envelope) -> Dispatch {
        let Envelope {
            msg_type,
            correlation_id,
            payload,
            ..
        } = envelope;
        let Some(correlation_id) = correlation_id else {
            warn!(%msg_type, "dropping request without correlation id");
            return Dispatch::Done;
        };

        let Some(handler) = self.handlers.get(&msg_type) else {
            warn!(%msg_type, %correlation_id, "no handler registered");
            let info = ErrorInfo::unknown_message_type(&msg_type);
            let reply = MessageFactory::new_error(msg_type, correlation_id, info);
            return Dispatch::Reply(Box::pin(async move { reply }));
        };

        Dispatch::Reply(Box::pin(async move {
            let outcome = AssertUnwindSafe(async move { handler.call(payload).await })
                .catch_unwind()
                .await;
            let result = outcome.unwrap_or_else(|panic| Err(HandlerError::panicked(panic)));
            match result {
                Ok(value) => MessageFactory::new_response(msg_type, correlation_id, value),
                Err(err) => {
                    debug!(%msg_type, %correlation_id, error = %err, "handler failed");
                    MessageFactory::new_error(msg_type, correlation_id, err.into_info())
                }
            }
        }))
    }

    fn notify_listeners(&self, envelope: Envelope) {
        let listeners = self.listeners.listeners_for(&envelope.msg_type);
        if listeners.is_empty() {
            debug!(msg_type = %envelope.msg_type, "no listener for notification");
            return;
        }
        for listener in listeners {
            let payload = envelope.payload.clone();
            if std::panic::catch_unwind(AssertUnwindSafe(|| listener(payload))).is_err() {
                warn!(msg_type = %envelope.msg_type, "notification listener panicked");
            }
        }
    }
}
