//! Error types for the node.

use dst_node_chain::ChainError;
use dst_node_channel::ChannelError;
use dst_node_core::CoreError;
use thiserror::Error;

/// Errors that can occur while running a channel.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Primitive error (session ID, signatures, credentials).
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Off-chain channel error.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// On-chain settlement error.
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    /// The peer, or this node, declined a handshake step.
    #[error("{stage} declined: {reason}")]
    Declined { stage: &'static str, reason: String },

    /// An operation does not fit the channel's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Waiting for a peer or the listener timed out.
    #[error("timed out: {0}")]
    Timeout(&'static str),

    /// Configuration could not be parsed.
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeError {
    /// Whether this error is a decline at `stage`.
    pub fn is_declined_at(&self, stage: &str) -> bool {
        matches!(self, NodeError::Declined { stage: s, .. } if *s == stage)
    }
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
