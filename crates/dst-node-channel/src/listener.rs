//! Listener for incoming channels and dialing of outgoing ones.
//!
//! ## Usage
//!
//! ```ignore
//! let (listener, mut incoming) = new_session(&mut self_id, &config, span.clone()).await?;
//!
//! // Outgoing: dial the peer and verify its identity.
//! let instance = new_channel(&self_id, &peer_id, &config, span).await?;
//!
//! // Incoming: identity already exchanged, role is receiver.
//! let instance = incoming.recv().await;
//!
//! listener.shutdown(Duration::from_secs(1)).await;
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{Instrument, Span};

use dst_node_core::{OffChainId, Role};

use crate::adapter::AdapterConfig;
use crate::error::{ChannelError, Result};
use crate::instance::Instance;
use crate::tcp;

/// Listener limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Identified connections queued for the caller at most.
    pub max_conn: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self { max_conn: 100 }
    }
}

/// Settings for channels of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub adapter: AdapterConfig,
    pub listener: ListenerConfig,
    /// How long an instance waits for each peer message.
    pub message_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            adapter: AdapterConfig::default(),
            listener: ListenerConfig::default(),
            message_timeout: Duration::from_secs(30),
        }
    }
}

/// Queue of identified incoming channels.
pub type Incoming = mpsc::Receiver<Instance>;

/// Background accept loop.
pub struct Listener {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Listener {
    /// Bind the listener of `self_id` and start accepting.
    ///
    /// Binds the loopback interface on the port of the identity's listener
    /// address. Port zero picks a free port, which is written back into
    /// `self_id`.
    pub async fn start(
        self_id: &mut OffChainId,
        config: &ChannelConfig,
        span: Span,
    ) -> Result<(Self, Incoming)> {
        let bind_addr = self_id
            .listener_local_addr()?
            .replacen("localhost", "127.0.0.1", 1);
        let listener = TcpListener::bind(&bind_addr).await?;
        let local_addr = listener.local_addr()?;

        if let Some((host, "0")) = self_id.listener_ip_addr.rsplit_once(':') {
            self_id.listener_ip_addr = format!("{host}:{}", local_addr.port());
        }
        tracing::info!(parent: &span, %local_addr, "listener started");

        let mut id = self_id.clone();
        id.clear_credentials();

        let (incoming_tx, incoming_rx) = mpsc::channel(config.listener.max_conn.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept = AcceptLoop {
            listener,
            self_id: id,
            config: *config,
            incoming: incoming_tx,
            span: span.clone(),
        };
        let task = tokio::spawn(accept.run(shutdown_rx).instrument(span));

        Ok((
            Self {
                local_addr,
                shutdown: shutdown_tx,
                task,
            },
            incoming_rx,
        ))
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and wait for the loop to exit, at most `deadline`.
    ///
    /// Connections still in their identity exchange are dropped.
    pub async fn shutdown(self, deadline: Duration) -> Result<()> {
        let _ = self.shutdown.send(true);
        let mut task = self.task;
        match tokio::time::timeout(deadline, &mut task).await {
            Ok(_) => Ok(()),
            Err(_) => {
                task.abort();
                Err(ChannelError::Timeout("listener shutdown".into()))
            }
        }
    }
}

struct AcceptLoop {
    listener: TcpListener,
    self_id: OffChainId,
    config: ChannelConfig,
    incoming: mpsc::Sender<Instance>,
    span: Span,
}

impl AcceptLoop {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut pending = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                Some(_) = pending.join_next(), if !pending.is_empty() => {}
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        let identify = identify(
                            stream,
                            self.self_id.clone(),
                            self.config,
                            self.incoming.clone(),
                            self.span.clone(),
                        );
                        pending.spawn(identify.instrument(tracing::debug_span!("incoming", %peer_addr)));
                    }
                    Err(err) => tracing::warn!(error = %err, "accept failed"),
                },
            }
        }
        tracing::info!("listener stopped");
    }
}

/// Exchange identities on an accepted connection and queue the instance.
async fn identify(
    stream: TcpStream,
    self_id: OffChainId,
    config: ChannelConfig,
    incoming: mpsc::Sender<Instance>,
    span: Span,
) {
    let _ = stream.set_nodelay(true);
    let adapter = tcp::adapter(stream, config.adapter, span.clone());
    let mut instance = Instance::new(
        Arc::new(adapter),
        self_id,
        Role::Receiver,
        config.message_timeout,
        span,
    );

    let exchanged = async {
        let peer = instance.identity_read().await?;
        instance.identity_respond().await?;
        Ok::<_, ChannelError>(peer)
    }
    .await;

    match exchanged {
        Ok(peer) => {
            tracing::debug!(peer = %peer.on_chain_id, "incoming channel identified");
            match incoming.try_send(instance) {
                Ok(()) => {}
                Err(TrySendError::Full(mut instance)) => {
                    tracing::warn!("connection limit reached, dropping channel");
                    let _ = instance.close().await;
                }
                Err(TrySendError::Closed(mut instance)) => {
                    let _ = instance.close().await;
                }
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "identity exchange failed");
            let _ = instance.close().await;
        }
    }
}

/// Dial `peer_id` and verify it is who it claims to be.
///
/// The returned instance has the sender role.
pub async fn new_channel(
    self_id: &OffChainId,
    peer_id: &OffChainId,
    config: &ChannelConfig,
    span: Span,
) -> Result<Instance> {
    let adapter = tcp::dial(peer_id.listener_ip_addr.as_str(), config.adapter, span.clone()).await?;
    let mut id = self_id.clone();
    id.clear_credentials();
    let mut instance = Instance::new(Arc::new(adapter), id, Role::Sender, config.message_timeout, span);

    let got = match instance.identity_request().await {
        Ok(got) => got,
        Err(err) => {
            let _ = instance.close().await;
            return Err(err);
        }
    };
    if got != *peer_id {
        let _ = instance.close().await;
        return Err(ChannelError::PeerIdentityMismatch {
            expected: peer_id.on_chain_id,
            got: got.on_chain_id,
        });
    }
    tracing::debug!(parent: instance.span(), peer = %got.on_chain_id, "outgoing channel identified");
    Ok(instance)
}

/// Start the listener and check it by connecting to itself.
pub async fn new_session(
    self_id: &mut OffChainId,
    config: &ChannelConfig,
    span: Span,
) -> Result<(Listener, Incoming)> {
    let (listener, mut incoming) = Listener::start(self_id, config, span.clone()).await?;
    let self_id: &OffChainId = self_id;

    let loopback = async {
        let mut channel = new_channel(self_id, self_id, config, span.clone()).await?;
        channel.close().await?;
        let mut accepted = tokio::time::timeout(config.message_timeout, incoming.recv())
            .await
            .map_err(|_| ChannelError::Timeout("loopback connection".into()))?
            .ok_or(ChannelError::ListenerClosed)?;
        let _ = accepted.close().await;
        Ok::<_, ChannelError>(())
    }
    .await;

    if let Err(err) = loopback {
        tracing::error!(parent: &span, error = %err, "channel self check failed");
        let _ = listener.shutdown(Duration::from_secs(1)).await;
        return Err(err);
    }
    tracing::debug!(parent: &span, "channel self check passed");
    Ok((listener, incoming))
}
