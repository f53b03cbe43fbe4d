//! Request routing and connection lifecycle for cgilink.
//!
//! A [`Connection`] owns one duplex byte stream. It reads frames, routes
//! requests to registered [`Handler`]s, matches replies to outstanding
//! requests by correlation id, delivers notifications to listeners, and
//! funnels every outbound frame through a single writer task.
//!
//! Handlers run concurrently with the read loop; a slow handler never holds
//! up the frames behind it.

pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod pending;
pub mod registry;
pub mod transport;

pub use connection::{
    CloseReason, Connection, ConnectionConfig, ConnectionState, Notifier,
    DEFAULT_DRAIN_TIMEOUT, DEFAULT_FLUSH_TIMEOUT, DEFAULT_OUTBOUND_CAPACITY,
};
pub use dispatcher::{Dispatch, Dispatcher, ReplyFuture};
pub use error::{ConnectionError, Result};
pub use handler::{Handler, HandlerError, HandlerFuture};
pub use pending::PendingCalls;
pub use registry::{HandlerRegistry, Listener, ListenerRegistry};
pub use transport::{connect_child, BackendProcess};
