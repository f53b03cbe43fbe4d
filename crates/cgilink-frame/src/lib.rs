//! Newline-delimited message framing for stdio IPC.
//!
//! Every message is one UTF-8 line terminated by `\n`. Payload encoders must
//! guarantee that a message never contains a raw newline; the framing layer
//! rejects one on the way out.
//!
//! No partial reads, no buffer management in user code. A malformed line
//! (too long, not UTF-8) is reported and dropped without poisoning the stream.

pub mod codec;
pub mod error;
#[cfg(feature = "async")]
pub mod line_codec;
pub mod reader;
pub mod writer;

pub use codec::{encode_frame, Frame, FrameConfig, LineDecoder, DEFAULT_MAX_LINE_LENGTH, DELIMITER};
pub use error::{FrameError, Result};
#[cfg(feature = "async")]
pub use line_codec::{LineCodec, LineEvent};
pub use reader::FrameReader;
pub use writer::FrameWriter;
