//! Typed request/response messaging between a UI process and its backend.
//!
//! The two processes exchange one message per line over the backend's
//! stdin/stdout. Requests are matched to replies by correlation id, and the
//! backend can push notifications (progress, partial results) at any time.
//!
//! # Crate Structure
//!
//! - [`frame`]: newline framing over byte streams
//! - [`message`]: envelopes, the tab-separated wire format, the message factory
//! - [`connection`]: handler routing, pending calls, the connection lifecycle
//!   (behind `connection` feature)
//! - [`backend`]: the porting-assistant backend's message handlers wired to
//!   injected services (behind `connection` feature)

/// Re-export frame types.
pub mod frame {
    pub use cgilink_frame::*;
}

/// Re-export message types.
pub mod message {
    pub use cgilink_message::*;
}

/// Re-export connection types (requires `connection` feature).
#[cfg(feature = "connection")]
pub mod connection {
    pub use cgilink_connection::*;
}

#[cfg(feature = "connection")]
pub mod backend;
