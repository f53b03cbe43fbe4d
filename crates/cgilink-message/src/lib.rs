//! Message envelopes for cgilink.
//!
//! An [`Envelope`] is what travels in one frame: a message type, a
//! correlation id (absent for notifications), a [`MessageKind`] and a JSON
//! payload. [`encode`]/[`decode`] convert it to and from one tab-separated
//! line; [`MessageFactory`] builds envelopes with fresh or propagated ids.

pub mod envelope;
pub mod error;
pub mod factory;
pub mod kind;
pub mod serializer;

pub use envelope::{Envelope, ErrorCode, ErrorInfo};
pub use error::{MessageError, Result};
pub use factory::MessageFactory;
pub use kind::MessageKind;
pub use serializer::{decode, encode, FIELD_SEPARATOR};
