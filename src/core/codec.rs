//! Datagram codec that turns whole UDP payloads into [`Frame`]s and back.

use crate::core::packet::{Frame, MAX_FRAME_SIZE};
use crate::core::token::Token;
use crate::error::{constants, MiioError};
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

/// Datagram codec for [`Frame`], for use with `tokio_util::udp::UdpFramed`.
///
/// Each datagram is one frame; the decoder always consumes the whole buffer.
#[derive(Debug, Clone, Default)]
pub struct FrameCodec {
    token: Option<Token>,
    conceal_token: bool,
}

impl FrameCodec {
    pub fn new(token: Option<Token>) -> Self {
        Self {
            token,
            conceal_token: false,
        }
    }

    /// Stage the all-`0xFF` sentinel instead of the token in frames that carry it in clear.
    pub fn concealing(mut self) -> Self {
        self.conceal_token = true;
        self
    }

    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = MiioError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        let datagram = src.split();
        Frame::decode(&datagram, self.token.as_ref()).map(Some)
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = MiioError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let clear_text_field = frame.header.is_hello() || frame.payload.is_none();
        let staged = match &self.token {
            Some(token) if !(clear_text_field && self.conceal_token) => token.clone(),
            _ => Token::unknown(),
        };
        let bytes = frame.encode(&staged)?;
        if bytes.len() > MAX_FRAME_SIZE {
            return Err(MiioError::InvalidFrame(constants::ERR_FRAME_TOO_LARGE.into()));
        }
        dst.reserve(bytes.len());
        dst.extend_from_slice(&bytes);
        Ok(())
    }
}
