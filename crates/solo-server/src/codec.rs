//! Server-side WebSocket framing (RFC 6455 §5).
//!
//! Frame headers are parsed and formatted by tungstenite. This layer only
//! enforces the server's rules on client frames (masked, no reserved bits,
//! bounded size) and unmasks payloads. Message assembly lives one layer up in
//! [`crate::connection`].

use std::io::Cursor;

use bytes::{Buf, BufMut, BytesMut};
use tokio_tungstenite::tungstenite::protocol::frame::coding::{CloseCode, OpCode};
use tokio_tungstenite::tungstenite::protocol::frame::{CloseFrame, FrameHeader};
use tokio_util::codec::{Decoder, Encoder};

pub use tokio_tungstenite::tungstenite::protocol::frame::coding::{Control, Data};
pub use tokio_tungstenite::tungstenite::protocol::frame::Frame;

const MAX_CONTROL_PAYLOAD: usize = 125;

pub fn text_frame(text: impl Into<String>) -> Frame {
    Frame::message(text.into(), OpCode::Data(Data::Text), true)
}

/// Close frame carrying a status code and reason. The reason is cut at a
/// char boundary so the payload fits a control frame.
pub fn close_frame(code: u16, reason: &str) -> Frame {
    let mut end = reason.len().min(MAX_CONTROL_PAYLOAD - 2);
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    Frame::close(Some(CloseFrame {
        code: CloseCode::from(code),
        reason: reason[..end].into(),
    }))
}

pub fn is_close(frame: &Frame) -> bool {
    frame.header().opcode == OpCode::Control(Control::Close)
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed frame: {0}")]
    Frame(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("protocol error: {0}")]
    Protocol(&'static str),
    #[error("frame of {0} bytes exceeds the size limit")]
    TooLarge(u64),
}

impl CodecError {
    /// Close code to answer the peer with, if the socket is still usable.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::Io(_) => None,
            Self::Frame(_) | Self::Protocol(_) => Some(CloseCode::Protocol.into()),
            Self::TooLarge(_) => Some(CloseCode::Size.into()),
        }
    }
}

pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        let mut cursor = Cursor::new(&src[..]);
        let Some((mut header, len)) = FrameHeader::parse(&mut cursor)? else {
            return Ok(None);
        };
        let header_len = cursor.position() as usize;

        if header.rsv1 || header.rsv2 || header.rsv3 {
            return Err(CodecError::Protocol("reserved bits set"));
        }
        let Some(mask) = header.mask.take() else {
            return Err(CodecError::Protocol("client frame not masked"));
        };
        if matches!(header.opcode, OpCode::Control(_))
            && (!header.is_final || len > MAX_CONTROL_PAYLOAD as u64)
        {
            return Err(CodecError::Protocol("invalid control frame"));
        }
        if len > self.max_frame_size as u64 {
            return Err(CodecError::TooLarge(len));
        }

        let total = header_len + len as usize;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(header_len);
        let mut payload = src.split_to(len as usize);
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[i & 3];
        }
        Ok(Some(Frame::from_payload(header, payload.freeze())))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), CodecError> {
        dst.reserve(frame.len());
        frame.format(&mut dst.writer())?;
        Ok(())
    }
}
