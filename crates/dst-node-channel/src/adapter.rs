//! Handler-based message channel adapter.
//!
//! ## Overview
//!
//! The adapter turns a frame socket into a [`MessageChannel`]. Protocol
//! code never touches the socket; it talks to two background tasks:
//!
//! ```text
//!             read()                         write(bytes)
//!               ^                                 |
//!     packets (bounded 1)               request + ack rendezvous
//!               |                                 v
//!        +--------------+                 +---------------+
//!        | read handler |---- pongs ---->| write handler |--- ping every ping_period
//!        +--------------+                 +---------------+
//!               ^    \                        /     |
//!          FrameSource `--> handler errors <-'   FrameSink
//! ```
//!
//! Every ping from the peer is answered with a pong by the write handler.
//!
//! A handler that fails posts its error to the side channel and starts an
//! asynchronous close. The next `read` or `write` returns that error.
//!
//! `close` signals both handlers and waits for each acknowledgement,
//! bounded by `close_timeout`.

use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{interval_at, timeout, Instant};
use tracing::{Instrument, Span};

use crate::conn_state::{ConnState, ConnectionState};
use crate::error::{ChannelError, Result};
use crate::frame::{Frame, FrameSink, FrameSource};

/// Byte-level channel to one peer.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Whether the channel is usable.
    fn connected(&self) -> bool;

    /// Read the next message.
    async fn read(&self) -> Result<Bytes>;

    /// Write a message. Returns once the transport accepted it.
    async fn write(&self, message: Bytes) -> Result<()>;

    /// Close the channel. A second close fails with
    /// [`ChannelError::AlreadyClosed`].
    async fn close(&self) -> Result<()>;
}

/// Adapter timing and size limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Upper bound for a single frame write.
    pub write_wait: Duration,
    /// The connection fails when nothing arrives within this period.
    pub pong_wait: Duration,
    /// Interval of keep-alive pings. Must be less than `pong_wait`.
    pub ping_period: Duration,
    /// Maximum payload size of a message.
    pub max_message_size: usize,
    /// How long `close` waits for each handler.
    pub close_timeout: Duration,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            write_wait: Duration::from_secs(10),
            pong_wait: Duration::from_secs(60),
            ping_period: Duration::from_secs(54),
            max_message_size: 4096,
            close_timeout: Duration::from_secs(5),
        }
    }
}

type QuitSignal = oneshot::Sender<oneshot::Sender<()>>;
type QuitReceiver = oneshot::Receiver<oneshot::Sender<()>>;

struct WriteRequest {
    frame: Frame,
    ack: oneshot::Sender<()>,
}

struct Inner {
    state: ConnState,
    packets: Mutex<mpsc::Receiver<Result<Bytes>>>,
    requests: mpsc::Sender<WriteRequest>,
    handler_errors: StdMutex<mpsc::Receiver<ChannelError>>,
    read_quit: StdMutex<Option<QuitSignal>>,
    write_quit: StdMutex<Option<QuitSignal>>,
    config: AdapterConfig,
    span: Span,
}

impl Inner {
    fn take_handler_error(&self) -> Option<ChannelError> {
        self.handler_errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_recv()
            .ok()
    }

    async fn close(&self) -> Result<()> {
        self.state.begin_close()?;

        // Write handler first so that it can still send the close frame.
        for slot in [&self.write_quit, &self.read_quit] {
            let quit = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
            let Some(quit) = quit else { continue };
            let (ack_tx, ack_rx) = oneshot::channel();
            if quit.send(ack_tx).is_ok()
                && timeout(self.config.close_timeout, ack_rx).await.is_err()
            {
                tracing::warn!(parent: &self.span, "handler did not acknowledge close");
            }
        }

        self.state.finish_close();
        tracing::debug!(parent: &self.span, "channel closed");
        Ok(())
    }
}

/// [`MessageChannel`] over any frame socket.
///
/// Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct GenericChannelAdapter {
    inner: Arc<Inner>,
}

impl GenericChannelAdapter {
    /// Start the read and write handlers on a connected socket.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<W, R>(sink: W, source: R, config: AdapterConfig, span: Span) -> Self
    where
        W: FrameSink + 'static,
        R: FrameSource + 'static,
    {
        let (packets_tx, packets_rx) = mpsc::channel(1);
        let (requests_tx, requests_rx) = mpsc::channel(1);
        let (errors_tx, errors_rx) = mpsc::channel(2);
        let (pongs_tx, pongs_rx) = mpsc::channel(1);
        let (read_quit_tx, read_quit_rx) = oneshot::channel();
        let (write_quit_tx, write_quit_rx) = oneshot::channel();

        let inner = Arc::new(Inner {
            state: ConnState::new(ConnectionState::Connected),
            packets: Mutex::new(packets_rx),
            requests: requests_tx,
            handler_errors: StdMutex::new(errors_rx),
            read_quit: StdMutex::new(Some(read_quit_tx)),
            write_quit: StdMutex::new(Some(write_quit_tx)),
            config,
            span: span.clone(),
        });

        let reader = ReadHandler {
            source: Box::new(source),
            packets: packets_tx,
            pongs: pongs_tx,
            errors: errors_tx.clone(),
            inner: Arc::downgrade(&inner),
            config,
        };
        tokio::spawn(reader.run(read_quit_rx).instrument(span.clone()));

        let writer = WriteHandler {
            sink: Box::new(sink),
            requests: requests_rx,
            pongs: pongs_rx,
            errors: errors_tx,
            inner: Arc::downgrade(&inner),
            config,
        };
        tokio::spawn(writer.run(write_quit_rx).instrument(span));

        Self { inner }
    }

    /// Configuration in use.
    pub fn config(&self) -> &AdapterConfig {
        &self.inner.config
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state.load()
    }
}

#[async_trait]
impl MessageChannel for GenericChannelAdapter {
    fn connected(&self) -> bool {
        self.inner.state.is_connected()
    }

    async fn read(&self) -> Result<Bytes> {
        if !self.connected() {
            return Err(ChannelError::AlreadyClosed);
        }
        let mut packets = self.inner.packets.lock().await;
        match packets.recv().await {
            Some(packet) => packet,
            None => Err(self
                .inner
                .take_handler_error()
                .unwrap_or(ChannelError::AlreadyClosed)),
        }
    }

    async fn write(&self, message: Bytes) -> Result<()> {
        if !self.connected() {
            return Err(ChannelError::AlreadyClosed);
        }
        if let Some(err) = self.inner.take_handler_error() {
            return Err(err);
        }
        let max = self.inner.config.max_message_size;
        if message.len() > max {
            return Err(ChannelError::MessageTooLarge {
                size: message.len(),
                max,
            });
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        let request = WriteRequest {
            frame: Frame::Binary(message),
            ack: ack_tx,
        };
        self.inner
            .requests
            .send(request)
            .await
            .map_err(|_| ChannelError::AlreadyClosed)?;

        ack_rx.await.map_err(|_| {
            self.inner
                .take_handler_error()
                .unwrap_or(ChannelError::AlreadyClosed)
        })
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

/// Post a handler failure and close the channel in the background.
fn report_handler_error(errors: &mpsc::Sender<ChannelError>, inner: &Weak<Inner>, err: ChannelError) {
    tracing::warn!(error = %err, "channel handler stopped");
    let _ = errors.try_send(err);
    if let Some(inner) = inner.upgrade() {
        tokio::spawn(async move {
            let _ = inner.close().await;
        });
    }
}

fn acknowledge(quit: std::result::Result<oneshot::Sender<()>, oneshot::error::RecvError>) {
    if let Ok(ack) = quit {
        let _ = ack.send(());
    }
}

struct ReadHandler {
    source: Box<dyn FrameSource>,
    packets: mpsc::Sender<Result<Bytes>>,
    /// Pings waiting for an answer; one pending pong is enough.
    pongs: mpsc::Sender<()>,
    errors: mpsc::Sender<ChannelError>,
    inner: Weak<Inner>,
    config: AdapterConfig,
}

impl ReadHandler {
    async fn run(mut self, mut quit: QuitReceiver) {
        loop {
            let next = tokio::select! {
                biased;
                signal = &mut quit => {
                    acknowledge(signal);
                    return;
                }
                next = timeout(self.config.pong_wait, self.source.next()) => next,
            };

            let packet = match next {
                Ok(Some(Ok(Frame::Binary(payload)))) => Ok(payload),
                Ok(Some(Ok(Frame::Text(_)))) => Err(ChannelError::NonBinaryFrame),
                Ok(Some(Ok(Frame::Ping))) => {
                    let _ = self.pongs.try_send(());
                    continue;
                }
                Ok(Some(Ok(Frame::Pong))) => continue,
                Ok(Some(Ok(Frame::Close))) => {
                    return self.fail(ChannelError::Handler("peer closed the connection".into()))
                }
                Ok(Some(Err(err))) => return self.fail(err),
                Ok(None) => {
                    return self.fail(ChannelError::Handler("connection lost".into()))
                }
                Err(_) => {
                    let err = ChannelError::Timeout(format!(
                        "no frame received within {:?}",
                        self.config.pong_wait
                    ));
                    return self.fail(err);
                }
            };

            tokio::select! {
                biased;
                signal = &mut quit => {
                    acknowledge(signal);
                    return;
                }
                sent = self.packets.send(packet) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
    }

    fn fail(self, err: ChannelError) {
        report_handler_error(&self.errors, &self.inner, err);
    }
}

struct WriteHandler {
    sink: Box<dyn FrameSink>,
    requests: mpsc::Receiver<WriteRequest>,
    pongs: mpsc::Receiver<()>,
    errors: mpsc::Sender<ChannelError>,
    inner: Weak<Inner>,
    config: AdapterConfig,
}

impl WriteHandler {
    async fn run(mut self, mut quit: QuitReceiver) {
        let period = self.config.ping_period;
        let mut ping = interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                biased;
                signal = &mut quit => {
                    let _ = timeout(self.config.write_wait, self.sink.send(Frame::Close)).await;
                    let _ = self.sink.close().await;
                    acknowledge(signal);
                    return;
                }
                request = self.requests.recv() => {
                    let Some(WriteRequest { frame, ack }) = request else {
                        let _ = self.sink.close().await;
                        return;
                    };
                    if let Err(err) = self.send(frame).await {
                        report_handler_error(&self.errors, &self.inner, err);
                        drop(ack);
                        let _ = self.sink.close().await;
                        return;
                    }
                    let _ = ack.send(());
                }
                Some(()) = self.pongs.recv() => {
                    if let Err(err) = self.send(Frame::Pong).await {
                        report_handler_error(&self.errors, &self.inner, err);
                        let _ = self.sink.close().await;
                        return;
                    }
                }
                _ = ping.tick() => {
                    if let Err(err) = self.send(Frame::Ping).await {
                        report_handler_error(&self.errors, &self.inner, err);
                        let _ = self.sink.close().await;
                        return;
                    }
                }
            }
        }
    }

    async fn send(&mut self, frame: Frame) -> Result<()> {
        timeout(self.config.write_wait, self.sink.send(frame))
            .await
            .map_err(|_| ChannelError::Timeout("write wait exceeded".into()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::memory::pair;

    fn connected_pair(config: AdapterConfig) -> (GenericChannelAdapter, GenericChannelAdapter) {
        let ((a_sink, a_source), (b_sink, b_source)) = pair();
        (
            GenericChannelAdapter::new(a_sink, a_source, config, Span::none()),
            GenericChannelAdapter::new(b_sink, b_source, config, Span::none()),
        )
    }

    #[tokio::test]
    async fn test_write_read() {
        let (a, b) = connected_pair(AdapterConfig::default());
        assert!(a.connected());

        a.write(Bytes::from_static(b"hello")).await.unwrap();
        a.write(Bytes::from_static(b"world")).await.unwrap();
        assert_eq!(b.read().await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(b.read().await.unwrap(), Bytes::from_static(b"world"));

        b.write(Bytes::from_static(b"back")).await.unwrap();
        assert_eq!(a.read().await.unwrap(), Bytes::from_static(b"back"));
    }

    #[tokio::test]
    async fn test_double_close() {
        let (a, _b) = connected_pair(AdapterConfig::default());
        a.close().await.unwrap();
        assert_eq!(a.state(), ConnectionState::Closed);
        assert!(matches!(a.close().await, Err(ChannelError::AlreadyClosed)));
        assert!(matches!(a.read().await, Err(ChannelError::AlreadyClosed)));
        assert!(matches!(
            a.write(Bytes::from_static(b"x")).await,
            Err(ChannelError::AlreadyClosed)
        ));
    }

    #[tokio::test]
    async fn test_peer_close_fails_reader() {
        let (a, b) = connected_pair(AdapterConfig::default());
        a.close().await.unwrap();
        assert!(b.read().await.is_err());

        // The background close settles shortly after.
        for _ in 0..50 {
            if !b.connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!b.connected());
    }

    #[tokio::test]
    async fn test_oversize_message_rejected() {
        let config = AdapterConfig {
            max_message_size: 8,
            ..AdapterConfig::default()
        };
        let (a, _b) = connected_pair(config);
        let err = a.write(Bytes::from(vec![0u8; 9])).await.unwrap_err();
        assert!(matches!(err, ChannelError::MessageTooLarge { size: 9, max: 8 }));
        assert!(a.connected());
    }

    #[tokio::test]
    async fn test_text_frame_is_protocol_error() {
        let ((a_sink, a_source), (mut raw_sink, _raw_source)) = pair();
        let a = GenericChannelAdapter::new(a_sink, a_source, AdapterConfig::default(), Span::none());

        raw_sink.send(Frame::Text("nope".into())).await.unwrap();
        raw_sink.send(Frame::Ping).await.unwrap();
        raw_sink
            .send(Frame::Binary(Bytes::from_static(b"ok")))
            .await
            .unwrap();

        assert!(matches!(a.read().await, Err(ChannelError::NonBinaryFrame)));
        assert_eq!(a.read().await.unwrap(), Bytes::from_static(b"ok"));
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let config = AdapterConfig {
            pong_wait: Duration::from_millis(50),
            ping_period: Duration::from_secs(3600),
            ..AdapterConfig::default()
        };
        let ((a_sink, a_source), _raw) = pair();
        let a = GenericChannelAdapter::new(a_sink, a_source, config, Span::none());

        assert!(matches!(a.read().await, Err(ChannelError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_ping_is_answered_with_pong() {
        let ((a_sink, a_source), (mut raw_sink, mut raw_source)) = pair();
        let a = GenericChannelAdapter::new(a_sink, a_source, AdapterConfig::default(), Span::none());

        raw_sink.send(Frame::Ping).await.unwrap();
        let answer = timeout(Duration::from_secs(1), raw_source.next()).await.unwrap();
        assert_eq!(answer.unwrap().unwrap(), Frame::Pong);

        // A pong from the peer is not answered.
        raw_sink.send(Frame::Pong).await.unwrap();
        raw_sink
            .send(Frame::Binary(Bytes::from_static(b"after")))
            .await
            .unwrap();
        assert_eq!(a.read().await.unwrap(), Bytes::from_static(b"after"));
        a.close().await.unwrap();
        assert_eq!(raw_source.next().await.unwrap().unwrap(), Frame::Close);
    }

    #[tokio::test]
    async fn test_close_sends_close_frame() {
        let ((a_sink, a_source), (_raw_sink, mut raw_source)) = pair();
        let a = GenericChannelAdapter::new(a_sink, a_source, AdapterConfig::default(), Span::none());
        a.close().await.unwrap();
        assert_eq!(raw_source.next().await.unwrap().unwrap(), Frame::Close);
        assert!(raw_source.next().await.is_none());
    }
}
