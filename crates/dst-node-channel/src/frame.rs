//! Frame-level socket abstraction.
//!
//! A frame socket is the transport underneath a
//! [`GenericChannelAdapter`](crate::adapter::GenericChannelAdapter). It is
//! split into a [`FrameSink`] owned by the write handler and a
//! [`FrameSource`] owned by the read handler.
//!
//! On the wire each frame is a one-byte kind tag followed by the payload.
//! The tags reuse the WebSocket opcodes.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ChannelError, Result};

const TAG_TEXT: u8 = 0x1;
const TAG_BINARY: u8 = 0x2;
const TAG_CLOSE: u8 = 0x8;
const TAG_PING: u8 = 0x9;
const TAG_PONG: u8 = 0xA;

/// A transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    Ping,
    Pong,
    Close,
}

impl Frame {
    /// Wire tag of the frame kind.
    pub fn tag(&self) -> u8 {
        match self {
            Frame::Text(_) => TAG_TEXT,
            Frame::Binary(_) => TAG_BINARY,
            Frame::Ping => TAG_PING,
            Frame::Pong => TAG_PONG,
            Frame::Close => TAG_CLOSE,
        }
    }

    /// Payload length in bytes.
    pub fn payload_len(&self) -> usize {
        match self {
            Frame::Text(s) => s.len(),
            Frame::Binary(b) => b.len(),
            _ => 0,
        }
    }

    /// Encode as tag followed by payload.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + self.payload_len());
        buf.put_u8(self.tag());
        match self {
            Frame::Text(s) => buf.put_slice(s.as_bytes()),
            Frame::Binary(b) => buf.put_slice(b),
            _ => {}
        }
        buf.freeze()
    }

    /// Decode a tagged frame.
    pub fn decode(mut raw: Bytes) -> Result<Self> {
        if raw.is_empty() {
            return Err(ChannelError::Handler("empty frame".into()));
        }
        let tag = raw[0];
        let payload = raw.split_off(1);
        match tag {
            TAG_TEXT => String::from_utf8(payload.to_vec())
                .map(Frame::Text)
                .map_err(|_| ChannelError::NonBinaryFrame),
            TAG_BINARY => Ok(Frame::Binary(payload)),
            TAG_PING => Ok(Frame::Ping),
            TAG_PONG => Ok(Frame::Pong),
            TAG_CLOSE => Ok(Frame::Close),
            other => Err(ChannelError::Handler(format!("unknown frame tag {other:#x}"))),
        }
    }
}

/// Writing half of a frame socket.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one frame.
    async fn send(&mut self, frame: Frame) -> Result<()>;

    /// Flush and close the underlying transport.
    async fn close(&mut self) -> Result<()>;
}

/// Reading half of a frame socket.
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, `None` once the peer has gone away.
    async fn next(&mut self) -> Option<Result<Frame>>;
}

/// In-process frame sockets, for tests and the loopback self-check.
pub mod memory {
    use super::*;
    use tokio::sync::mpsc;

    /// Sending end of an in-memory socket.
    pub struct MemorySink {
        tx: Option<mpsc::UnboundedSender<Frame>>,
    }

    /// Receiving end of an in-memory socket.
    pub struct MemorySource {
        rx: mpsc::UnboundedReceiver<Frame>,
    }

    /// One side of a connected in-memory socket pair.
    pub type MemoryEnd = (MemorySink, MemorySource);

    /// Create two connected socket ends.
    pub fn pair() -> (MemoryEnd, MemoryEnd) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            (MemorySink { tx: Some(a_tx) }, MemorySource { rx: b_rx }),
            (MemorySink { tx: Some(b_tx) }, MemorySource { rx: a_rx }),
        )
    }

    #[async_trait]
    impl FrameSink for MemorySink {
        async fn send(&mut self, frame: Frame) -> Result<()> {
            let tx = self.tx.as_ref().ok_or(ChannelError::AlreadyClosed)?;
            tx.send(frame).map_err(|_| {
                ChannelError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "peer dropped",
                ))
            })
        }

        async fn close(&mut self) -> Result<()> {
            self.tx.take();
            Ok(())
        }
    }

    #[async_trait]
    impl FrameSource for MemorySource {
        async fn next(&mut self) -> Option<Result<Frame>> {
            self.rx.recv().await.map(Ok)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::pair;
    use super::*;

    #[test]
    fn test_frame_tags() {
        let frames = [
            Frame::Text("hi".into()),
            Frame::Binary(Bytes::from_static(b"\x00\x01")),
            Frame::Ping,
            Frame::Pong,
            Frame::Close,
        ];
        for frame in frames {
            let encoded = frame.encode();
            assert_eq!(encoded[0], frame.tag());
            assert_eq!(Frame::decode(encoded).unwrap(), frame);
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Frame::decode(Bytes::new()).is_err());
        assert!(Frame::decode(Bytes::from_static(&[0x7f, 1, 2])).is_err());
    }

    #[tokio::test]
    async fn test_memory_pair() {
        let ((mut a_sink, _a_source), (_b_sink, mut b_source)) = pair();
        a_sink.send(Frame::Binary(Bytes::from_static(b"abc"))).await.unwrap();
        assert_eq!(
            b_source.next().await.unwrap().unwrap(),
            Frame::Binary(Bytes::from_static(b"abc"))
        );

        a_sink.close().await.unwrap();
        assert!(b_source.next().await.is_none());
        assert!(a_sink.send(Frame::Ping).await.is_err());
    }
}
