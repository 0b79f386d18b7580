use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: six ASCII lowercase-hex digits.
pub const HEADER_SIZE: usize = 6;

/// Largest body length the 6-digit header can express.
pub const MAX_BODY_LEN: usize = 0xFF_FFFF;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Encode one frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────────────┬───────────────┬──────┐
/// │ Header (6B)          │ Payload       │ LF   │
/// │ lowercase hex length │ UTF-8 sexp    │ 0x0A │
/// └──────────────────────┴───────────────┴──────┘
/// ```
/// The header value counts the payload plus the trailing newline, i.e.
/// `len(payload) + 1`.
pub fn encode_frame(payload: &str, dst: &mut BytesMut) -> Result<()> {
    let body_len = payload.len() + 1;
    if body_len > MAX_BODY_LEN {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_BODY_LEN - 1,
        });
    }
    dst.reserve(HEADER_SIZE + body_len);
    let mut header = [0u8; HEADER_SIZE];
    write_hex(&mut header, body_len);
    dst.put_slice(&header);
    dst.put_slice(payload.as_bytes());
    dst.put_u8(b'\n');
    Ok(())
}

fn write_hex(out: &mut [u8; HEADER_SIZE], mut value: usize) {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    for slot in out.iter_mut().rev() {
        *slot = DIGITS[value & 0xF];
        value >>= 4;
    }
}

/// Decode one frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer and returns the
/// payload with the trailing newline stripped.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Bytes>> {
    if src.len() < HEADER_SIZE {
        return Ok(None); // Need more data
    }

    let body_len = parse_header(&src[..HEADER_SIZE])?;
    if body_len - 1 > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: body_len - 1,
            max: max_payload,
        });
    }

    let total = HEADER_SIZE + body_len;
    if src.len() < total {
        return Ok(None); // Need more data
    }

    src.advance(HEADER_SIZE);
    let mut body = src.split_to(body_len);
    if body.last() == Some(&b'\n') {
        body.truncate(body_len - 1);
    } else {
        // The peer omitted the terminator but the length was consistent;
        // pass the body through and let the sexp parser judge it.
        tracing::warn!(body_len, "frame body does not end with a newline");
    }
    Ok(Some(body.freeze()))
}

fn parse_header(header: &[u8]) -> Result<usize> {
    let mut value = 0usize;
    for &b in header {
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => {
                return Err(FrameError::BadHeader {
                    header: String::from_utf8_lossy(header).into_owned(),
                })
            }
        };
        value = (value << 4) | digit as usize;
    }
    if value == 0 {
        // The body always contains at least the trailing newline.
        return Err(FrameError::BadHeader {
            header: String::from_utf8_lossy(header).into_owned(),
        });
    }
    Ok(value)
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_produces_exact_wire_bytes() {
        let mut buf = BytesMut::new();
        encode_frame("(call 1 echo (55))", &mut buf).unwrap();
        assert_eq!(buf.as_ref(), b"000013(call 1 echo (55))\n");
    }

    #[test]
    fn encode_counts_utf8_bytes_not_chars() {
        let mut buf = BytesMut::new();
        encode_frame("(\"日本\")", &mut buf).unwrap();
        // 4 ASCII bytes + 6 UTF-8 bytes + newline = 0x0b
        assert_eq!(&buf[..HEADER_SIZE], b"00000b");
    }

    #[test]
    fn encode_decode_roundtrip() {
        let mut buf = BytesMut::new();
        encode_frame("(return 1 (55))", &mut buf).unwrap();

        let payload = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert_eq!(payload.as_ref(), b"(return 1 (55))");
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_incomplete_header() {
        let mut buf = BytesMut::from(&b"0000"[..]);
        assert!(decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().is_none());
    }

    #[test]
    fn decode_incomplete_body() {
        let mut buf = BytesMut::new();
        encode_frame("(methods 4)", &mut buf).unwrap();
        buf.truncate(HEADER_SIZE + 3);
        assert!(decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().is_none());
    }

    #[test]
    fn decode_rejects_non_hex_header() {
        let mut buf = BytesMut::from(&b"00x00a(nil)\n"[..]);
        let err = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap_err();
        assert!(matches!(err, FrameError::BadHeader { .. }));
    }

    #[test]
    fn decode_rejects_zero_length() {
        let mut buf = BytesMut::from(&b"000000"[..]);
        let err = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap_err();
        assert!(matches!(err, FrameError::BadHeader { .. }));
    }

    #[test]
    fn decode_accepts_uppercase_hex() {
        let mut buf = BytesMut::from(&b"00000C(methods 4)\n"[..]);
        let payload = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert_eq!(payload.as_ref(), b"(methods 4)");
    }

    #[test]
    fn decode_payload_too_large() {
        let mut buf = BytesMut::from(&b"ffffff"[..]);
        let err = decode_frame(&mut buf, 16).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
    }

    #[test]
    fn decode_multiple_frames() {
        let mut buf = BytesMut::new();
        encode_frame("(methods 1)", &mut buf).unwrap();
        encode_frame("(methods 2)", &mut buf).unwrap();

        let first = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        let second = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert_eq!(first.as_ref(), b"(methods 1)");
        assert_eq!(second.as_ref(), b"(methods 2)");
        assert!(buf.is_empty());
    }

    #[test]
    fn missing_terminator_is_tolerated() {
        // Header says 4 bytes but the body's last byte is not a newline.
        let mut buf = BytesMut::from(&b"000004(ok)"[..]);
        let payload = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert_eq!(payload.as_ref(), b"(ok)");
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let huge = "x".repeat(MAX_BODY_LEN);
        let mut buf = BytesMut::new();
        let err = encode_frame(&huge, &mut buf).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
    }

    #[test]
    fn header_is_zero_padded_lowercase() {
        let mut buf = BytesMut::new();
        encode_frame(&"y".repeat(0xab - 1), &mut buf).unwrap();
        assert_eq!(&buf[..HEADER_SIZE], b"0000ab");
    }
}
