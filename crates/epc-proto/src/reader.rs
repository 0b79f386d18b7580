use std::io::{ErrorKind, Read};

use bytes::{Bytes, BytesMut};

use crate::codec::{decode_frame, FrameConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Handles partial reads internally — callers always get complete frame
/// payloads with the length header and trailing newline already removed.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
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
            config,
        }
    }

    /// Read the next complete frame payload (blocking).
    ///
    /// Returns `Err(FrameError::Eof)` when the stream ends at a frame
    /// boundary and `Err(FrameError::Truncated)` when it ends mid-frame.
    pub fn read_frame(&mut self) -> Result<Bytes> {
        loop {
            if let Some(payload) = decode_frame(&mut self.buf, self.config.max_payload_size)? {
                return Ok(payload);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                if self.buf.is_empty() {
                    return Err(FrameError::Eof);
                }
                return Err(FrameError::Truncated {
                    buffered: self.buf.len(),
                });
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::codec::encode_frame;

    fn wire(payloads: &[&str]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for p in payloads {
            encode_frame(p, &mut buf).unwrap();
        }
        buf.to_vec()
    }

    #[test]
    fn read_single_frame() {
        let mut reader = FrameReader::new(Cursor::new(wire(&["(methods 4)"])));
        let payload = reader.read_frame().unwrap();
        assert_eq!(payload.as_ref(), b"(methods 4)");
    }

    #[test]
    fn read_multiple_frames() {
        let mut reader = FrameReader::new(Cursor::new(wire(&["(a)", "(b)", "(c)"])));
        assert_eq!(reader.read_frame().unwrap().as_ref(), b"(a)");
        assert_eq!(reader.read_frame().unwrap().as_ref(), b"(b)");
        assert_eq!(reader.read_frame().unwrap().as_ref(), b"(c)");
    }

    #[test]
    fn read_large_payload() {
        let big = format!("(\"{}\")", "x".repeat(64 * 1024));
        let mut reader = FrameReader::new(Cursor::new(wire(&[&big])));
        let payload = reader.read_frame().unwrap();
        assert_eq!(payload.len(), big.len());
    }

    #[test]
    fn partial_read_handling() {
        let mut reader = FrameReader::new(ByteByByteReader {
            bytes: wire(&["(slow 1)"]),
            pos: 0,
        });
        assert_eq!(reader.read_frame().unwrap().as_ref(), b"(slow 1)");
    }

    #[test]
    fn clean_close_yields_eof() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        assert!(matches!(reader.read_frame(), Err(FrameError::Eof)));
    }

    #[test]
    fn eof_after_complete_frames_is_clean() {
        let mut reader = FrameReader::new(Cursor::new(wire(&["(a)"])));
        reader.read_frame().unwrap();
        assert!(matches!(reader.read_frame(), Err(FrameError::Eof)));
    }

    #[test]
    fn close_mid_frame_is_truncation() {
        let mut bytes = wire(&["(truncated 99)"]);
        bytes.truncate(bytes.len() - 4);
        let mut reader = FrameReader::new(Cursor::new(bytes));
        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::Truncated { .. })
        ));
    }

    #[test]
    fn close_mid_header_is_truncation() {
        let mut reader = FrameReader::new(Cursor::new(b"0004".to_vec()));
        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::Truncated { buffered: 4 })
        ));
    }

    #[test]
    fn bad_header_in_stream() {
        let mut reader = FrameReader::new(Cursor::new(b"nothex(nil)\n".to_vec()));
        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::BadHeader { .. })
        ));
    }

    #[test]
    fn oversized_frame_in_stream() {
        let cfg = FrameConfig {
            max_payload_size: 8,
        };
        let mut reader = FrameReader::with_config(Cursor::new(wire(&["(way too big now)"])), cfg);
        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn interrupted_read_retries() {
        let mut reader = FrameReader::new(InterruptedThenData {
            interrupted: false,
            bytes: wire(&["(ok)"]),
            pos: 0,
        });
        assert_eq!(reader.read_frame().unwrap().as_ref(), b"(ok)");
    }

    #[test]
    fn would_block_propagates_io_error() {
        struct WouldBlock;
        impl Read for WouldBlock {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::from(ErrorKind::WouldBlock))
            }
        }
        let mut reader = FrameReader::new(WouldBlock);
        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::Io(e)) if e.kind() == ErrorKind::WouldBlock
        ));
    }

    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct InterruptedThenData {
        interrupted: bool,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            let remaining = self.bytes.len() - self.pos;
            let n = remaining.min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }
}
