//! TCP frame sockets.
//!
//! Frames are length-delimited; each carries the one-byte kind tag of
//! [`Frame::encode`].

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::Span;

use crate::adapter::{AdapterConfig, GenericChannelAdapter};
use crate::error::{ChannelError, Result};
use crate::frame::{Frame, FrameSink, FrameSource};

type Transport = Framed<TcpStream, LengthDelimitedCodec>;

/// Writing half of a TCP socket.
pub struct TcpSink(SplitSink<Transport, bytes::Bytes>);

/// Reading half of a TCP socket.
pub struct TcpSource(SplitStream<Transport>);

/// Split a connected stream into frame halves.
///
/// Frames longer than `max_message_size` plus the tag byte are refused by
/// the codec.
pub fn split(stream: TcpStream, max_message_size: usize) -> (TcpSink, TcpSource) {
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(max_message_size + 1)
        .new_codec();
    let (sink, source) = Framed::new(stream, codec).split();
    (TcpSink(sink), TcpSource(source))
}

/// Wrap a connected stream in a [`GenericChannelAdapter`].
pub fn adapter(stream: TcpStream, config: AdapterConfig, span: Span) -> GenericChannelAdapter {
    let (sink, source) = split(stream, config.max_message_size);
    GenericChannelAdapter::new(sink, source, config, span)
}

/// Connect to a peer listener.
pub async fn dial<A: ToSocketAddrs>(
    addr: A,
    config: AdapterConfig,
    span: Span,
) -> Result<GenericChannelAdapter> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(adapter(stream, config, span))
}

#[async_trait]
impl FrameSink for TcpSink {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        self.0.send(frame.encode()).await.map_err(ChannelError::Io)
    }

    async fn close(&mut self) -> Result<()> {
        SinkExt::close(&mut self.0).await.map_err(ChannelError::Io)
    }
}

#[async_trait]
impl FrameSource for TcpSource {
    async fn next(&mut self) -> Option<Result<Frame>> {
        let raw = self.0.next().await?;
        Some(
            raw.map_err(ChannelError::Io)
                .and_then(|buf| Frame::decode(buf.freeze())),
        )
    }
}
