//! `tokio_util::codec` adapter over [`LineDecoder`].

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{encode_frame, Frame, FrameConfig, LineDecoder};
use crate::error::{FrameError, Result};

/// One decoded item from the inbound stream.
///
/// A malformed line is an item, not a stream error: `FramedRead` ends the
/// stream after yielding an `Err`, and a bad line must not do that.
#[derive(Debug)]
pub enum LineEvent {
    /// A complete, well-formed line.
    Frame(Frame),
    /// A line that was consumed and dropped.
    Malformed(FrameError),
}

/// Newline codec for `FramedRead` / `FramedWrite`.
#[derive(Debug, Clone, Default)]
pub struct LineCodec {
    decoder: LineDecoder,
}

impl LineCodec {
    /// Create a codec with an explicit line length limit.
    pub fn new(max_line_length: usize) -> Self {
        Self {
            decoder: LineDecoder::new(max_line_length),
        }
    }

    /// Create a codec from a [`FrameConfig`].
    pub fn with_config(config: &FrameConfig) -> Self {
        Self::new(config.max_line_length)
    }

    fn lift(result: Result<Option<Frame>>) -> Result<Option<LineEvent>> {
        match result {
            Ok(frame) => Ok(frame.map(LineEvent::Frame)),
            Err(err) if err.is_recoverable() => Ok(Some(LineEvent::Malformed(err))),
            Err(err) => Err(err),
        }
    }
}

impl Decoder for LineCodec {
    type Item = LineEvent;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<LineEvent>> {
        Self::lift(self.decoder.decode(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<LineEvent>> {
        Self::lift(self.decoder.decode_eof(src))
    }
}

impl Encoder<Frame> for LineCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        let max = self.decoder.max_line_length();
        if item.as_str().len() > max {
            return Err(FrameError::LineTooLong {
                size: item.as_str().len(),
                max,
            });
        }
        encode_frame(item.as_str(), dst)
    }
}
