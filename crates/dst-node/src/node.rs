//! The node: listener, chain connection and channel factory.

use std::sync::Arc;
use std::time::Duration;

use tracing::Span;

use dst_node_chain::{BlockchainInstance, ChainClient};
use dst_node_channel::{new_channel, new_session, Incoming, Instance, Listener};
use dst_node_core::{ContractStore, OffChainId};

use crate::config::NodeConfig;
use crate::error::{NodeError, Result};
use crate::party::Party;
use crate::payment::PaymentChannel;

/// A participant that opens and accepts payment channels.
///
/// Channels come out of [`open_channel`](Node::open_channel) or
/// [`accept_channel`](Node::accept_channel) in status `Init`, with all
/// contracts bound; funding is left to the caller.
pub struct Node {
    party: Party,
    client: Arc<dyn ChainClient>,
    config: NodeConfig,
    contract_store: ContractStore,
    listener: Option<Listener>,
    incoming: Option<Incoming>,
    span: Span,
}

impl Node {
    pub fn new(party: Party, client: Arc<dyn ChainClient>, config: NodeConfig, span: Span) -> Self {
        Self {
            party,
            client,
            config,
            contract_store: ContractStore::default(),
            listener: None,
            incoming: None,
            span,
        }
    }

    /// Use `store` to verify contract code and announce in new channels.
    pub fn with_contract_store(mut self, store: ContractStore) -> Self {
        self.contract_store = store;
        self
    }

    /// Identity peers dial; the listener port is known after
    /// [`listen`](Node::listen).
    pub fn id(&self) -> &OffChainId {
        self.party.id()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Start accepting channels.
    pub async fn listen(&mut self) -> Result<()> {
        if self.listener.is_some() {
            return Err(NodeError::InvalidState("already listening".into()));
        }
        let (listener, incoming) =
            new_session(self.party.id_mut(), &self.config.channel(), self.span.clone()).await?;
        tracing::info!(parent: &self.span, addr = %self.party.id().listener_ip_addr, "node listening");
        self.listener = Some(listener);
        self.incoming = Some(incoming);
        Ok(())
    }

    /// Open a channel to `peer` as sender.
    pub async fn open_channel(&self, peer: &OffChainId) -> Result<PaymentChannel> {
        let instance =
            new_channel(self.party.id(), peer, &self.config.channel(), self.span.clone()).await?;
        let mut channel = self.payment_channel(instance);
        if let Err(err) = channel.propose(self.config.lib_signatures_addr).await {
            channel.abort(&err).await;
            return Err(err);
        }
        Ok(channel)
    }

    /// Accept the next incoming channel as receiver.
    pub async fn accept_channel(&mut self) -> Result<PaymentChannel> {
        let timeout = self.config.message_timeout;
        let incoming = self
            .incoming
            .as_mut()
            .ok_or_else(|| NodeError::InvalidState("node is not listening".into()))?;
        let instance = tokio::time::timeout(timeout, incoming.recv())
            .await
            .map_err(|_| NodeError::Timeout("incoming channel"))?
            .ok_or_else(|| NodeError::InvalidState("listener stopped".into()))?;

        let mut channel = self.payment_channel(instance);
        if let Err(err) = channel.accept().await {
            channel.abort(&err).await;
            return Err(err);
        }
        Ok(channel)
    }

    fn payment_channel(&self, mut instance: Instance) -> PaymentChannel {
        instance.set_contract_store(self.contract_store.clone());
        let chain = BlockchainInstance::new(
            self.client.clone(),
            self.party.id().clone(),
            self.contract_store.clone(),
            self.config.chain,
            instance.span().clone(),
        )
        .with_watcher_config(self.config.watcher);
        let span = instance.span().clone();
        PaymentChannel::new(instance, chain, self.party.clone(), self.config.event_timeout, span)
    }

    /// Stop the listener, if any.
    pub async fn shutdown(mut self) -> Result<()> {
        self.incoming = None;
        if let Some(listener) = self.listener.take() {
            listener.shutdown(Duration::from_secs(1)).await?;
        }
        tracing::info!(parent: &self.span, "node stopped");
        Ok(())
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", self.party.id())
            .field("listening", &self.listener.is_some())
            .finish_non_exhaustive()
    }
}
