//! miIO frame layout and the checksum-by-substitution algorithm.
//!
//! ```text
//! 0      2        4             8           12          16                32
//! +------+--------+-------------+-----------+-----------+-----------------+----------+
//! |magic | length | flags       | device id | timestamp | token/checksum  | payload  |
//! |0x2131| (BE)   | 0xFFFFFFFF  |           |           | (16 bytes)      | AES-CBC  |
//! +------+--------+-------------+-----------+-----------+-----------------+----------+
//! ```
//!
//! ## Integrity
//! For frames that carry a payload and are not hello frames, bytes 16..32 hold
//! `MD5(frame with the token substituted into bytes 16..32)`. Verifying that
//! digest proves both that the frame is intact and that the receiver holds the
//! right token. Hello frames and bare 32-byte frames carry a literal token
//! value in that field instead.
//!
//! ## Payload text
//! The decrypted payload is ISO-8859-1 text terminated by a NUL byte inside
//! the plaintext; everything from the first NUL onward is ignored.

use crate::core::token::{Token, TOKEN_LEN};
use crate::error::{constants, MiioError, Result};
use bytes::{Buf, BufMut, BytesMut};

/// Frame magic, big-endian on the wire
pub const MAGIC: u16 = 0x2131;

/// Fixed header size
pub const HEADER_LEN: usize = 32;

/// Flags value that marks a hello frame
pub const HELLO_FLAGS: u32 = 0xFFFF_FFFF;

/// Device id / timestamp value meaning "unknown"
pub const UNKNOWN_FIELD: u32 = 0xFFFF_FFFF;

/// Largest payload a single UDP datagram can carry
pub const MAX_FRAME_SIZE: usize = 65_507;

const INTEGRITY_RANGE: std::ops::Range<usize> = 16..32;

/// The fixed fields of a frame header (everything but magic, length and integrity).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub flags: u32,
    pub device_id: u32,
    pub timestamp: u32,
}

impl FrameHeader {
    /// Header of a hello request: every field is the unknown sentinel.
    pub const HELLO: FrameHeader = FrameHeader {
        flags: HELLO_FLAGS,
        device_id: UNKNOWN_FIELD,
        timestamp: UNKNOWN_FIELD,
    };

    /// Header of a normal (flags = 0) frame
    pub fn normal(device_id: u32, timestamp: u32) -> Self {
        Self {
            flags: 0,
            device_id,
            timestamp,
        }
    }

    pub fn is_hello(&self) -> bool {
        self.flags == HELLO_FLAGS
    }

    /// True if either the device id or the timestamp is the unknown sentinel
    pub fn has_unknown_identity(&self) -> bool {
        self.device_id == UNKNOWN_FIELD || self.timestamp == UNKNOWN_FIELD
    }
}

/// A decoded (or to-be-encoded) frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    /// Bytes 16..32 as received. Zero for frames built locally.
    pub integrity: [u8; TOKEN_LEN],
    /// Payload text, without its NUL terminator
    pub payload: Option<String>,
}

impl Frame {
    pub fn new(header: FrameHeader, payload: Option<String>) -> Self {
        Self {
            header,
            integrity: [0u8; TOKEN_LEN],
            payload,
        }
    }

    /// A bare hello request
    pub fn hello() -> Self {
        Self::new(FrameHeader::HELLO, None)
    }

    /// Whether bytes 16..32 carry a literal token rather than a checksum.
    fn integrity_is_literal(header: &FrameHeader, has_payload: bool) -> bool {
        header.is_hello() || !has_payload
    }

    /// The token carried in clear by a hello or bare frame, unless it is a sentinel.
    pub fn token_candidate(&self) -> Option<Token> {
        if !Self::integrity_is_literal(&self.header, self.payload.is_some()) {
            return None;
        }
        Some(Token::from(self.integrity)).filter(|t| !t.is_sentinel())
    }

    /// Serialize the frame, encrypting the payload and sealing the checksum.
    ///
    /// `token` is staged into bytes 16..32. Frames that carry a payload and are
    /// not hello frames then get that field replaced by the checksum.
    pub fn encode(&self, token: &Token) -> Result<Vec<u8>> {
        let ciphertext = match &self.payload {
            Some(text) => {
                let mut plain = latin1_bytes(text);
                plain.push(0);
                token.encrypt(&plain)
            }
            None => Vec::new(),
        };

        let total = HEADER_LEN + ciphertext.len();
        if total > MAX_FRAME_SIZE {
            return Err(MiioError::InvalidParameters(format!(
                "{}: {total} bytes",
                constants::ERR_FRAME_TOO_LARGE
            )));
        }

        let mut buf = BytesMut::with_capacity(total);
        buf.put_u16(MAGIC);
        buf.put_u16(total as u16);
        buf.put_u32(self.header.flags);
        buf.put_u32(self.header.device_id);
        buf.put_u32(self.header.timestamp);
        buf.put_slice(&token.header_field());
        buf.put_slice(&ciphertext);

        if !Self::integrity_is_literal(&self.header, self.payload.is_some()) {
            let digest = checksum(&buf, token);
            buf[INTEGRITY_RANGE].copy_from_slice(&digest);
        }

        Ok(buf.to_vec())
    }

    /// Parse and validate a datagram.
    ///
    /// `token` is required when the frame carries a checksummed payload.
    /// Hello frames with a payload fall back to the literal token they carry.
    pub fn decode(buf: &[u8], token: Option<&Token>) -> Result<Frame> {
        if buf.len() < HEADER_LEN {
            return Err(MiioError::InvalidFrame(constants::ERR_FRAME_TOO_SHORT.into()));
        }
        if buf.len() > MAX_FRAME_SIZE {
            return Err(MiioError::InvalidFrame(constants::ERR_FRAME_TOO_LARGE.into()));
        }

        let mut cursor = buf;
        if cursor.get_u16() != MAGIC {
            return Err(MiioError::InvalidFrame(constants::ERR_BAD_MAGIC.into()));
        }
        let declared = cursor.get_u16() as usize;
        if declared != buf.len() {
            return Err(MiioError::InvalidFrame(format!(
                "{}: declared {declared}, received {}",
                constants::ERR_LENGTH_MISMATCH,
                buf.len()
            )));
        }
        let header = FrameHeader {
            flags: cursor.get_u32(),
            device_id: cursor.get_u32(),
            timestamp: cursor.get_u32(),
        };
        let mut integrity = [0u8; TOKEN_LEN];
        cursor.copy_to_slice(&mut integrity);

        let has_payload = !cursor.is_empty();
        if !has_payload {
            return Ok(Frame {
                header,
                integrity,
                payload: None,
            });
        }

        let literal = Token::from(integrity);
        let key = if Self::integrity_is_literal(&header, has_payload) {
            token.unwrap_or(&literal)
        } else {
            let token =
                token.ok_or_else(|| MiioError::InvalidFrame(constants::ERR_MISSING_TOKEN.into()))?;
            if checksum(buf, token) != integrity {
                return Err(MiioError::ChecksumMismatch);
            }
            token
        };

        let plain = key.decrypt(cursor)?;
        let end = plain.iter().position(|&b| b == 0).unwrap_or(plain.len());

        Ok(Frame {
            header,
            integrity,
            payload: Some(latin1_string(&plain[..end])),
        })
    }
}

/// MD5 over a scratch copy of `frame` with `token` substituted into bytes 16..32.
///
/// The caller's buffer is never modified.
pub fn checksum(frame: &[u8], token: &Token) -> [u8; TOKEN_LEN] {
    let mut scratch = frame.to_vec();
    scratch[INTEGRITY_RANGE].copy_from_slice(&token.header_field());
    md5::compute(&scratch).0
}

/// ISO-8859-1 encode; characters outside the range become `?`.
fn latin1_bytes(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

fn latin1_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn token() -> Token {
        Token::from_hex("000102030405060708090a0b0c0d0e0f").unwrap()
    }

    #[test]
    fn test_hello_frame_layout() {
        let bytes = Frame::hello().encode(&Token::unknown()).unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[..4], &[0x21, 0x31, 0x00, 0x20]);
        assert!(bytes[4..].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_payload_frame_carries_checksum() {
        let frame = Frame::new(FrameHeader::normal(7, 9), Some("{}".into()));
        let bytes = frame.encode(&token()).unwrap();
        assert_eq!(bytes.len(), 32 + 16);
        assert_ne!(&bytes[16..32], token().as_bytes());
        assert_eq!(checksum(&bytes, &token()), bytes[16..32]);
    }

    #[test]
    fn test_checksum_leaves_input_untouched() {
        let frame = Frame::new(FrameHeader::normal(1, 2), Some("x".into()));
        let bytes = frame.encode(&token()).unwrap();
        let copy = bytes.clone();
        let _ = checksum(&bytes, &Token::unknown());
        assert_eq!(bytes, copy);
    }

    #[test]
    fn test_nul_terminator_ends_payload() {
        let token = token();
        let mut plain = b"{\"id\":1}".to_vec();
        plain.push(0);
        plain.extend_from_slice(b"trailing garbage");
        let ciphertext = token.encrypt(&plain);

        let mut buf = BytesMut::new();
        buf.put_u16(MAGIC);
        buf.put_u16((HEADER_LEN + ciphertext.len()) as u16);
        buf.put_u32(0);
        buf.put_u32(1);
        buf.put_u32(2);
        buf.put_slice(token.as_bytes());
        buf.put_slice(&ciphertext);
        let digest = checksum(&buf, &token);
        buf[16..32].copy_from_slice(&digest);

        let frame = Frame::decode(&buf, Some(&token)).unwrap();
        assert_eq!(frame.payload.as_deref(), Some("{\"id\":1}"));
    }

    #[test]
    fn test_latin1_payload_text() {
        let frame = Frame::new(FrameHeader::normal(1, 1), Some("caf\u{e9}".into()));
        let bytes = frame.encode(&token()).unwrap();
        let decoded = Frame::decode(&bytes, Some(&token())).unwrap();
        assert_eq!(decoded.payload.as_deref(), Some("caf\u{e9}"));

        assert_eq!(latin1_bytes("\u{20ac}"), b"?");
    }

    #[test]
    fn test_rejects_structural_violations() {
        assert!(matches!(
            Frame::decode(&[0u8; 31], None),
            Err(MiioError::InvalidFrame(_))
        ));

        let mut bytes = Frame::hello().encode(&Token::unknown()).unwrap();
        bytes[0] = 0x22;
        assert!(matches!(
            Frame::decode(&bytes, None),
            Err(MiioError::InvalidFrame(_))
        ));

        let mut bytes = Frame::hello().encode(&Token::unknown()).unwrap();
        bytes.push(0);
        assert!(matches!(
            Frame::decode(&bytes, None),
            Err(MiioError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_payload_without_token_is_rejected() {
        let frame = Frame::new(FrameHeader::normal(1, 1), Some("{}".into()));
        let bytes = frame.encode(&token()).unwrap();
        assert!(matches!(
            Frame::decode(&bytes, None),
            Err(MiioError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_bare_reply_exposes_token_candidate() {
        let reply = Frame::new(FrameHeader::normal(0x1234, 0x10), None);
        let bytes = reply.encode(&token()).unwrap();
        let decoded = Frame::decode(&bytes, None).unwrap();
        assert_eq!(decoded.token_candidate(), Some(token()));

        let hidden = reply.encode(&Token::unknown()).unwrap();
        let decoded = Frame::decode(&hidden, None).unwrap();
        assert_eq!(decoded.token_candidate(), None);
    }

    #[test]
    fn test_oversized_payload_rejected_on_encode() {
        let frame = Frame::new(FrameHeader::normal(1, 1), Some("a".repeat(MAX_FRAME_SIZE)));
        assert!(matches!(
            frame.encode(&token()),
            Err(MiioError::InvalidParameters(_))
        ));
    }
}
