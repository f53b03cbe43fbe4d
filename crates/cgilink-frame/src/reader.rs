use std::io::{ErrorKind, Read};

use bytes::BytesMut;

use crate::codec::{Frame, FrameConfig, LineDecoder};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete lines from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete frames.
/// Recoverable errors ([`FrameError::is_recoverable`]) leave the reader usable.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    decoder: LineDecoder,
    eof: bool,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            decoder: LineDecoder::new(config.max_line_length),
            eof: false,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if self.eof {
                return match self.decoder.decode_eof(&mut self.buf)? {
                    Some(frame) => Ok(frame),
                    None => Err(FrameError::ConnectionClosed),
                };
            }

            if let Some(frame) = self.decoder.decode(&mut self.buf)? {
                return Ok(frame);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                self.eof = true;
                continue;
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum line length for subsequent frame decoding.
    pub fn set_max_line_length(&mut self, max_line_length: usize) {
        self.decoder.set_max_line_length(max_line_length);
    }
}

impl<T: Read> Iterator for FrameReader<T> {
    type Item = Result<Frame>;

    /// Yields frames until end of stream; recoverable errors are yielded too.
    fn next(&mut self) -> Option<Self::Item> {
        match self.read_frame() {
            Err(FrameError::ConnectionClosed) => None,
            other => Some(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    use bytes::BytesMut;

    use super::*;
    use crate::codec::encode_frame;

    #[test]
    fn read_single_frame() {
        let mut wire = BytesMut::new();
        encode_frame("hello", &mut wire).unwrap();

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));
        let frame = reader.read_frame().unwrap();

        assert_eq!(frame.as_str(), "hello");
    }

    #[test]
    fn read_multiple_frames() {
        let mut wire = BytesMut::new();
        encode_frame("one", &mut wire).unwrap();
        encode_frame("two", &mut wire).unwrap();
        encode_frame("three", &mut wire).unwrap();

        let reader = FrameReader::new(Cursor::new(wire.to_vec()));
        let lines: Vec<String> = reader.map(|f| f.unwrap().into_string()).collect();

        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[test]
    fn read_frame_with_large_payload() {
        let line = "x".repeat(64 * 1024);
        let mut wire = BytesMut::new();
        encode_frame(&line, &mut wire).unwrap();

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));
        let frame = reader.read_frame().unwrap();

        assert_eq!(frame.as_str().len(), line.len());
    }

    #[test]
    fn partial_read_handling() {
        let mut wire = BytesMut::new();
        encode_frame("slow", &mut wire).unwrap();
        encode_frame("slower", &mut wire).unwrap();

        let byte_reader = ByteByByteReader {
            bytes: wire.to_vec(),
            pos: 0,
        };
        let mut reader = FrameReader::new(byte_reader);

        assert_eq!(reader.read_frame().unwrap().as_str(), "slow");
        assert_eq!(reader.read_frame().unwrap().as_str(), "slower");
    }

    #[test]
    fn connection_closed_cleanly() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn unterminated_trailing_line_is_delivered() {
        let mut reader = FrameReader::new(Cursor::new(b"first\nlast".to_vec()));
        assert_eq!(reader.read_frame().unwrap().as_str(), "first");
        assert_eq!(reader.read_frame().unwrap().as_str(), "last");
        assert!(matches!(
            reader.read_frame().unwrap_err(),
            FrameError::ConnectionClosed
        ));
    }

    #[test]
    fn malformed_line_between_valid_lines() {
        let wire = b"good-1\n\xc3\x28bad\ngood-2\n".to_vec();
        let mut reader = FrameReader::new(Cursor::new(wire));

        assert_eq!(reader.read_frame().unwrap().as_str(), "good-1");
        let err = reader.read_frame().unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(reader.read_frame().unwrap().as_str(), "good-2");
    }

    #[test]
    fn oversized_line_in_stream() {
        let cfg = FrameConfig {
            max_line_length: 16,
        };
        let mut wire = "y".repeat(1024).into_bytes();
        wire.extend_from_slice(b"\nsmall\n");

        let mut reader = FrameReader::with_config(Cursor::new(wire), cfg);
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::LineTooLong { .. }));
        assert_eq!(reader.read_frame().unwrap().as_str(), "small");
    }

    #[derive(Debug)]
    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() {
                return Ok(0);
            }
            if buf.is_empty() {
                return Ok(0);
            }

            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    #[test]
    #[cfg(unix)]
    fn roundtrip_over_pipe() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = crate::writer::FrameWriter::new(left);
        let mut reader = FrameReader::new(right);

        writer.send("ping").unwrap();
        let frame = reader.read_frame().unwrap();

        assert_eq!(frame.as_str(), "ping");
    }

    #[test]
    #[cfg(unix)]
    fn concurrent_reader_writer_threads() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = crate::writer::FrameWriter::new(left);
        let reader = FrameReader::new(right);
        let reader = Arc::new(Mutex::new(reader));

        let reader_thread = {
            let reader = Arc::clone(&reader);
            std::thread::spawn(move || {
                for expected in 0..64u16 {
                    let frame = reader.lock().unwrap().read_frame().unwrap();
                    assert_eq!(frame.as_str(), format!("msg-{expected}"));
                }
            })
        };

        for i in 0..64u16 {
            writer.send(&format!("msg-{i}")).unwrap();
        }

        reader_thread.join().unwrap();
    }

    #[test]
    fn accessors_and_into_inner() {
        let cursor = Cursor::new(Vec::<u8>::new());
        let mut reader = FrameReader::new(cursor);

        let _ = reader.get_ref();
        let _ = reader.get_mut();
        let _inner = reader.into_inner();
    }

    #[test]
    fn read_would_block_propagates_io_error() {
        let reader = WouldBlockThenData {
            state: 0,
            bytes: b"ok\n".to_vec(),
            pos: 0,
        };
        let mut framed = FrameReader::new(reader);
        let err = framed.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::WouldBlock));
    }

    struct WouldBlockThenData {
        state: u8,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for WouldBlockThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.state == 0 {
                self.state = 1;
                return Err(std::io::Error::from(ErrorKind::WouldBlock));
            }
            if self.pos >= self.bytes.len() {
                return Ok(0);
            }
            let remaining = self.bytes.len() - self.pos;
            let n = remaining.min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn interrupted_read_retries() {
        let reader = InterruptedThenData {
            state: 0,
            bytes: b"ok\n".to_vec(),
            pos: 0,
        };
        let mut framed = FrameReader::new(reader);
        let frame = framed.read_frame().unwrap();

        assert_eq!(frame.as_str(), "ok");
    }

    struct InterruptedThenData {
        state: u8,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.state == 0 {
                self.state = 1;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            if self.pos >= self.bytes.len() {
                return Ok(0);
            }
            let remaining = self.bytes.len() - self.pos;
            let n = remaining.min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }
}
