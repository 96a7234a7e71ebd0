//! # DST Node
//!
//! Direct state transfer between two parties: an off-chain payment
//! channel backed by a settlement contract and a VPC contract that
//! decides disputes.
//!
//! ## Overview
//!
//! ```text
//! Node ---------- listen / open_channel / accept_channel
//!   |
//! PaymentChannel  handshake -> fund -> state rounds -> close -> execute
//!   |         \
//! Instance    BlockchainInstance
//! (TCP peer)  (contracts + events)
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let mut bob = Node::new(bob_party, client.clone(), NodeConfig::default(), span.clone());
//! bob.listen().await?;
//! let alice = Node::new(alice_party, client, NodeConfig::default(), span);
//!
//! let (a, b) = tokio::join!(alice.open_channel(bob.id()), bob.accept_channel());
//! let (mut a, mut b) = (a?, b?);
//! tokio::try_join!(a.fund(deposit), b.fund(deposit))?;
//!
//! tokio::try_join!(a.transfer(amount), b.respond_state())?;
//!
//! tokio::try_join!(a.close(), b.respond_close())?;
//! tokio::try_join!(a.execute(), b.await_closed())?;
//! ```

pub mod config;
pub mod error;
pub mod handshake;
pub mod node;
pub mod party;
pub mod payment;
pub mod settlement;

pub use dst_node_chain as chain;
pub use dst_node_channel as channel;
pub use dst_node_core as core;

pub use config::NodeConfig;
pub use error::{NodeError, Result};
pub use handshake::{STAGE_CONTRACT_ADDR, STAGE_MSC_BASE_STATE, STAGE_NEW_CHANNEL, STAGE_SESSION_ID};
pub use node::Node;
pub use party::Party;
pub use payment::{PaymentChannel, STAGE_VPC_STATE};
