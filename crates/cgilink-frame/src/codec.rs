use bytes::{Buf, BufMut, BytesMut};

use crate::error::{FrameError, Result};

/// Frame delimiter.
pub const DELIMITER: u8 = b'\n';

/// Default maximum line length: 16 MiB.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// One line of the stream, without its terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    line: String,
}

impl Frame {
    /// Create a new frame.
    pub fn new(line: impl Into<String>) -> Self {
        Self { line: line.into() }
    }

    /// The line text.
    pub fn as_str(&self) -> &str {
        &self.line
    }

    /// Consume the frame and return the line text.
    pub fn into_string(self) -> String {
        self.line
    }

    /// The total wire size of this frame (line + delimiter).
    pub fn wire_size(&self) -> usize {
        self.line.len() + 1
    }
}

impl From<String> for Frame {
    fn from(line: String) -> Self {
        Self::new(line)
    }
}

/// Encode a line into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────────────────────┬──────┐
/// │ Line (UTF-8, no raw newline) │ '\n' │
/// └──────────────────────────────┴──────┘
/// ```
pub fn encode_frame(line: &str, dst: &mut BytesMut) -> Result<()> {
    if let Some(offset) = line.bytes().position(|b| b == DELIMITER) {
        return Err(FrameError::EmbeddedDelimiter { offset });
    }
    dst.reserve(line.len() + 1);
    dst.put_slice(line.as_bytes());
    dst.put_u8(DELIMITER);
    Ok(())
}

/// Incremental line splitter.
///
/// Keeps the scan position between calls so a line arriving over many reads
/// is searched only once. After an over-long line the decoder discards input
/// up to the next delimiter and then resumes normally.
#[derive(Debug, Clone)]
pub struct LineDecoder {
    max_line_length: usize,
    next_index: usize,
    discarding: bool,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_LENGTH)
    }
}

impl LineDecoder {
    /// Create a decoder that rejects lines longer than `max_line_length` bytes.
    pub fn new(max_line_length: usize) -> Self {
        Self {
            max_line_length,
            next_index: 0,
            discarding: false,
        }
    }

    /// Current maximum line length.
    pub fn max_line_length(&self) -> usize {
        self.max_line_length
    }

    /// Update the maximum line length for subsequent lines.
    pub fn set_max_line_length(&mut self, max_line_length: usize) {
        self.max_line_length = max_line_length;
    }

    /// Decode the next line from a buffer.
    ///
    /// Returns `Ok(None)` if the buffer doesn't contain a complete line yet.
    /// Blank lines are skipped. On error the offending bytes have already been
    /// consumed, so the caller may keep decoding.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        loop {
            let start = self.next_index.min(src.len());
            let newline = src[start..]
                .iter()
                .position(|b| *b == DELIMITER)
                .map(|offset| start + offset);

            match (self.discarding, newline) {
                (true, Some(idx)) => {
                    src.advance(idx + 1);
                    self.discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    let len = src.len();
                    src.advance(len);
                    self.next_index = 0;
                    return Ok(None);
                }
                (false, Some(idx)) => {
                    self.next_index = 0;
                    let raw = src.split_to(idx + 1);
                    let line = strip_cr(&raw[..idx]);
                    if line.len() > self.max_line_length {
                        return Err(FrameError::LineTooLong {
                            size: line.len(),
                            max: self.max_line_length,
                        });
                    }
                    match line_to_frame(line)? {
                        Some(frame) => return Ok(Some(frame)),
                        None => continue,
                    }
                }
                // A trailing CR may still turn out to be part of the terminator.
                (false, None) if strip_cr(src).len() > self.max_line_length => {
                    let size = src.len();
                    src.advance(size);
                    self.discarding = true;
                    self.next_index = 0;
                    return Err(FrameError::LineTooLong {
                        size,
                        max: self.max_line_length,
                    });
                }
                (false, None) => {
                    self.next_index = src.len();
                    return Ok(None);
                }
            }
        }
    }

    /// Decode at end of stream: an unterminated trailing line is still a frame.
    pub fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        self.next_index = 0;
        if self.discarding {
            self.discarding = false;
            src.clear();
            return Ok(None);
        }
        if src.is_empty() {
            return Ok(None);
        }

        let raw = src.split();
        line_to_frame(strip_cr(&raw))
    }
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn line_to_frame(line: &[u8]) -> Result<Option<Frame>> {
    if line.is_empty() {
        return Ok(None);
    }
    match std::str::from_utf8(line) {
        Ok(text) => Ok(Some(Frame::new(text))),
        Err(err) => Err(FrameError::InvalidUtf8 {
            valid_up_to: err.valid_up_to(),
        }),
    }
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum line length in bytes. Default: 16 MiB.
    pub max_line_length: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut buf = BytesMut::new();
        let line = "ping\t1\treq\tnull";

        encode_frame(line, &mut buf).unwrap();
        assert_eq!(buf.len(), line.len() + 1);

        let frame = LineDecoder::default().decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.as_str(), line);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_encode_rejects_embedded_newline() {
        let mut buf = BytesMut::new();
        let err = encode_frame("a\nb", &mut buf).unwrap_err();
        assert!(matches!(err, FrameError::EmbeddedDelimiter { offset: 1 }));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_incomplete_line() {
        let mut buf = BytesMut::from(&b"ping\t1"[..]);
        let mut decoder = LineDecoder::default();
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 6);

        buf.extend_from_slice(b"\treq\tnull\n");
        let frame = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.as_str(), "ping\t1\treq\tnull");
    }

    #[test]
    fn test_multiple_frames() {
        let mut buf = BytesMut::new();
        encode_frame("first", &mut buf).unwrap();
        encode_frame("second", &mut buf).unwrap();

        let mut decoder = LineDecoder::default();
        let f1 = decoder.decode(&mut buf).unwrap().unwrap();
        let f2 = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(f1.as_str(), "first");
        assert_eq!(f2.as_str(), "second");
        assert!(decoder.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_crlf_and_blank_lines() {
        let mut buf = BytesMut::from(&b"\n\r\none\r\n\ntwo\n"[..]);
        let mut decoder = LineDecoder::default();

        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap().as_str(), "one");
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap().as_str(), "two");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_line_too_long_with_delimiter_is_skipped() {
        let mut buf = BytesMut::from(&b"0123456789\nok\n"[..]);
        let mut decoder = LineDecoder::new(4);

        let err = decoder.decode(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::LineTooLong { size: 10, max: 4 }));
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap().as_str(), "ok");
    }

    #[test]
    fn test_crlf_line_at_exact_limit_is_accepted() {
        let mut decoder = LineDecoder::new(4);
        let mut buf = BytesMut::from(&b"abcd\r\nabcde\r\nwxyz\n"[..]);

        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap().as_str(), "abcd");
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(FrameError::LineTooLong { size: 5, max: 4 })
        ));
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap().as_str(), "wxyz");
    }

    #[test]
    fn test_crlf_split_across_reads_at_limit() {
        let mut decoder = LineDecoder::new(4);
        let mut buf = BytesMut::from(&b"abcd\r"[..]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"\n");
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap().as_str(), "abcd");
    }

    #[test]
    fn test_line_too_long_across_reads_resyncs() {
        let mut decoder = LineDecoder::new(4);
        let mut buf = BytesMut::from(&b"0123456"[..]);

        let err = decoder.decode(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::LineTooLong { .. }));
        assert!(buf.is_empty());

        buf.extend_from_slice(b"789");
        assert!(decoder.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"tail\nnext\n");
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap().as_str(), "next");
    }

    #[test]
    fn test_invalid_utf8_is_skipped() {
        let mut buf = BytesMut::from(&b"ok\xff\xfe\nafter\n"[..]);
        let mut decoder = LineDecoder::default();

        let err = decoder.decode(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::InvalidUtf8 { valid_up_to: 2 }));
        assert!(err.is_recoverable());
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap().as_str(), "after");
    }

    #[test]
    fn test_decode_eof_yields_trailing_line() {
        let mut buf = BytesMut::from(&b"done\ntrailing"[..]);
        let mut decoder = LineDecoder::default();

        assert_eq!(decoder.decode_eof(&mut buf).unwrap().unwrap().as_str(), "done");
        assert_eq!(
            decoder.decode_eof(&mut buf).unwrap().unwrap().as_str(),
            "trailing"
        );
        assert!(decoder.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_frame_wire_size() {
        let frame = Frame::new("test");
        assert_eq!(frame.wire_size(), 5);
    }
}
