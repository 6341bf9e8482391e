use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use solo_core::{CloseError, ConnectionId, Payload};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::{CloseCode, OpCode};
use tokio_util::codec::Framed;
use tracing::{debug, info_span, Instrument};

use crate::codec::{self, CodecError, Control, Data, Frame, FrameCodec};
use crate::handler::SessionHandler;

/// How long the writer may take to flush the close frame once close handling finished.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Status reported to the close handler when the socket ended without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;
/// Status reported when the peer's close frame carried no code.
pub const NO_STATUS: u16 = 1005;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Pending = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Pending,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// The actor's handle on one accepted socket. Frames queued here are written
/// by the connection's writer task.
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<Frame>,
    state: AtomicU8,
}

impl ConnectionHandle {
    pub fn new(tx: mpsc::Sender<Frame>) -> Self {
        Self {
            id: ConnectionId::new(),
            tx,
            state: AtomicU8::new(ConnectionState::Pending as u8),
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Queue a text frame. Returns false once the connection is no longer open.
    pub async fn send_text(&self, text: String) -> bool {
        if self.state() != ConnectionState::Open {
            return false;
        }
        self.tx.send(codec::text_frame(text)).await.is_ok()
    }

    /// Queue the local close frame. The writer stops after sending it.
    pub async fn close(&self, code: u16, reason: &str) -> Result<(), CloseError> {
        self.tx
            .send(codec::close_frame(code, reason))
            .await
            .map_err(|_| CloseError("socket writer already stopped".into()))
    }

    async fn send_frame(&self, frame: Frame) -> bool {
        self.tx.send(frame).await.is_ok()
    }
}

/// Why the read side stopped.
#[derive(Debug, PartialEq, Eq)]
pub struct PeerClose {
    pub code: u16,
    pub reason: String,
    pub clean: bool,
}

/// A violation that ends the connection with the given close code.
#[derive(Debug, PartialEq, Eq)]
pub struct Violation {
    pub code: u16,
    pub message: &'static str,
}

impl Violation {
    fn new(code: u16, message: &'static str) -> Self {
        Self { code, message }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Event {
    Data(Payload),
    Ping(Bytes),
    Close { code: u16, reason: String },
}

/// Reassembles fragmented data frames into whole messages.
pub struct MessageAssembler {
    partial: Option<(Data, BytesMut)>,
    max_message_size: usize,
}

impl MessageAssembler {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            partial: None,
            max_message_size,
        }
    }

    pub fn push(&mut self, frame: Frame) -> Result<Option<Event>, Violation> {
        let fin = frame.header().is_final;
        let opcode = frame.header().opcode;
        match opcode {
            OpCode::Data(kind @ (Data::Text | Data::Binary)) => {
                if self.partial.is_some() {
                    return Err(Violation::new(1002, "new message before previous finished"));
                }
                let buf = BytesMut::from(frame.payload());
                if fin {
                    return finish(kind, buf).map(Some);
                }
                self.partial = Some((kind, buf));
                Ok(None)
            }
            OpCode::Data(Data::Continue) => {
                let Some((_, buf)) = self.partial.as_mut() else {
                    return Err(Violation::new(1002, "continuation without a message"));
                };
                if buf.len() + frame.payload().len() > self.max_message_size {
                    return Err(Violation::new(1009, "message too large"));
                }
                buf.extend_from_slice(frame.payload());
                if !fin {
                    return Ok(None);
                }
                match self.partial.take() {
                    Some((kind, buf)) => finish(kind, buf).map(Some),
                    None => Ok(None),
                }
            }
            OpCode::Control(Control::Ping) => Ok(Some(Event::Ping(frame.into_payload()))),
            OpCode::Control(Control::Pong) => Ok(None),
            OpCode::Control(Control::Close) => parse_close(frame.payload()).map(Some),
            OpCode::Data(Data::Reserved(_)) | OpCode::Control(Control::Reserved(_)) => {
                Err(Violation::new(1002, "reserved opcode"))
            }
        }
    }
}

fn finish(kind: Data, buf: BytesMut) -> Result<Event, Violation> {
    match kind {
        Data::Text => String::from_utf8(buf.to_vec())
            .map(|text| Event::Data(Payload::Text(text)))
            .map_err(|_| Violation::new(1007, "text message is not valid UTF-8")),
        _ => Ok(Event::Data(Payload::Binary(buf.freeze()))),
    }
}

fn parse_close(payload: &[u8]) -> Result<Event, Violation> {
    match payload.len() {
        0 => Ok(Event::Close {
            code: NO_STATUS,
            reason: String::new(),
        }),
        1 => Err(Violation::new(1002, "truncated close payload")),
        _ => {
            let code = CloseCode::from(u16::from_be_bytes([payload[0], payload[1]]));
            if !code.is_allowed() {
                return Err(Violation::new(1002, "invalid close code"));
            }
            let reason = std::str::from_utf8(&payload[2..])
                .map_err(|_| Violation::new(1007, "close reason is not valid UTF-8"))?;
            Ok(Event::Close {
                code: code.into(),
                reason: reason.to_string(),
            })
        }
    }
}

/// Drive one accepted connection until it is closed.
///
/// Data messages are dispatched to the handler as independent tasks, so
/// replies may be written in a different order than messages arrived.
pub async fn run<T>(
    framed: Framed<T, FrameCodec>,
    connection: Arc<ConnectionHandle>,
    mut rx: mpsc::Receiver<Frame>,
    handler: Arc<dyn SessionHandler>,
    max_message_size: usize,
) where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (mut sink, mut stream) = framed.split();
    let span = info_span!("connection", connection_id = %connection.id());

    let writer_id = connection.id().clone();
    let mut writer = tokio::spawn(
        async move {
            while let Some(frame) = rx.recv().await {
                let is_close = codec::is_close(&frame);
                if let Err(e) = sink.send(frame).await {
                    debug!(connection_id = %writer_id, error = %e, "socket write failed");
                    break;
                }
                if is_close {
                    break;
                }
            }
            let _ = sink.close().await;
        }
        .instrument(span.clone()),
    );

    let mut assembler = MessageAssembler::new(max_message_size);
    let peer_close = async {
        loop {
            let frame = match stream.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => break violation_close(&e),
                None => {
                    break PeerClose {
                        code: ABNORMAL_CLOSURE,
                        reason: String::new(),
                        clean: false,
                    }
                }
            };
            match assembler.push(frame) {
                Ok(Some(Event::Data(payload))) => {
                    let handler = Arc::clone(&handler);
                    let connection = Arc::clone(&connection);
                    tokio::spawn(
                        async move {
                            if let Err(error) = handler.on_message(&connection, payload).await {
                                handler.on_error(&connection, error).await;
                            }
                        }
                        .in_current_span(),
                    );
                }
                Ok(Some(Event::Ping(payload))) => {
                    connection.send_frame(Frame::pong(payload)).await;
                }
                Ok(Some(Event::Close { code, reason })) => {
                    break PeerClose {
                        code,
                        reason,
                        clean: true,
                    }
                }
                Ok(None) => {}
                Err(v) => {
                    debug!(code = v.code, reason = v.message, "protocol violation");
                    break PeerClose {
                        code: v.code,
                        reason: String::new(),
                        clean: false,
                    };
                }
            }
        }
    }
    .instrument(span.clone())
    .await;

    connection.set_state(ConnectionState::Closing);
    handler
        .on_close(&connection, peer_close.code, &peer_close.reason, peer_close.clean)
        .instrument(span.clone())
        .await;

    if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }
    connection.set_state(ConnectionState::Closed);
}

fn violation_close(error: &CodecError) -> PeerClose {
    debug!(error = %error, "socket read failed");
    PeerClose {
        code: error.close_code().unwrap_or(ABNORMAL_CLOSURE),
        reason: String::new(),
        clean: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio_tungstenite::tungstenite::protocol::frame::FrameHeader;

    fn frame(fin: bool, opcode: OpCode, payload: &[u8]) -> Frame {
        let header = FrameHeader {
            is_final: fin,
            opcode,
            ..FrameHeader::default()
        };
        Frame::from_payload(header, Bytes::copy_from_slice(payload))
    }

    const TEXT: OpCode = OpCode::Data(Data::Text);
    const BINARY: OpCode = OpCode::Data(Data::Binary);
    const CONTINUE: OpCode = OpCode::Data(Data::Continue);
    const PING: OpCode = OpCode::Control(Control::Ping);

    #[test]
    fn single_frame_text_message() {
        let mut a = MessageAssembler::new(1024);
        let event = a.push(frame(true, TEXT, b"hello")).unwrap();
        assert_eq!(event, Some(Event::Data(Payload::Text("hello".into()))));
    }

    #[test]
    fn fragmented_message_with_interleaved_ping() {
        let mut a = MessageAssembler::new(1024);
        assert_eq!(a.push(frame(false, BINARY, b"ab")).unwrap(), None);
        assert_eq!(
            a.push(frame(true, PING, b"p")).unwrap(),
            Some(Event::Ping(Bytes::from_static(b"p")))
        );
        assert_eq!(a.push(frame(false, CONTINUE, b"cd")).unwrap(), None);
        let event = a.push(frame(true, CONTINUE, b"e")).unwrap();
        assert_eq!(
            event,
            Some(Event::Data(Payload::Binary(Bytes::from_static(b"abcde"))))
        );
    }

    #[test]
    fn continuation_without_start_is_violation() {
        let mut a = MessageAssembler::new(1024);
        let v = a.push(frame(true, CONTINUE, b"x")).unwrap_err();
        assert_eq!(v.code, 1002);
    }

    #[test]
    fn invalid_utf8_text_is_violation() {
        let mut a = MessageAssembler::new(1024);
        let v = a.push(frame(true, TEXT, &[0xff, 0xfe])).unwrap_err();
        assert_eq!(v.code, 1007);
    }

    #[test]
    fn oversized_fragmented_message_is_violation() {
        let mut a = MessageAssembler::new(4);
        a.push(frame(false, TEXT, b"abc")).unwrap();
        let v = a.push(frame(true, CONTINUE, b"de")).unwrap_err();
        assert_eq!(v.code, 1009);
    }

    #[test]
    fn close_payload_parsing() {
        assert_eq!(
            parse_close(&[]).unwrap(),
            Event::Close {
                code: NO_STATUS,
                reason: String::new()
            }
        );
        let mut payload = 4000u16.to_be_bytes().to_vec();
        payload.extend_from_slice(b"bye");
        assert_eq!(
            parse_close(&payload).unwrap(),
            Event::Close {
                code: 4000,
                reason: "bye".into()
            }
        );
        for code in [1012u16, 1013] {
            assert_eq!(
                parse_close(&code.to_be_bytes()).unwrap(),
                Event::Close {
                    code,
                    reason: String::new()
                }
            );
        }
        assert_eq!(parse_close(&[0x03]).unwrap_err().code, 1002);
        assert_eq!(parse_close(&999u16.to_be_bytes()).unwrap_err().code, 1002);
        assert_eq!(parse_close(&5000u16.to_be_bytes()).unwrap_err().code, 1002);
        assert_eq!(parse_close(&1005u16.to_be_bytes()).unwrap_err().code, 1002);
    }

    #[tokio::test]
    async fn handle_refuses_text_unless_open() {
        let (tx, mut rx) = mpsc::channel(4);
        let handle = ConnectionHandle::new(tx);
        assert_eq!(handle.state(), ConnectionState::Pending);
        assert!(!handle.send_text("early".into()).await);

        handle.set_state(ConnectionState::Open);
        assert!(handle.send_text("hi".into()).await);
        assert_eq!(rx.recv().await.unwrap(), codec::text_frame("hi"));

        handle.set_state(ConnectionState::Closing);
        assert!(!handle.send_text("late".into()).await);
        assert!(handle.close(1000, "bye").await.is_ok());
    }

    #[tokio::test]
    async fn close_after_writer_stopped_is_error() {
        let (tx, rx) = mpsc::channel(1);
        let handle = ConnectionHandle::new(tx);
        drop(rx);
        assert!(handle.close(1000, "bye").await.is_err());
    }
}
