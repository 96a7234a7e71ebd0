//! Error types for the channel module.

use thiserror::Error;

use dst_node_core::{Address, CoreError};

use crate::messages::{MessageId, MessageStatus};
use crate::status::{ChannelStatus, HandshakePhase};

/// Errors that can occur on a channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Read, write or close on a channel that is no longer connected.
    #[error("channel already closed")]
    AlreadyClosed,

    /// A text or otherwise non-binary frame was received.
    #[error("only binary frames are supported")]
    NonBinaryFrame,

    /// Frame exceeds the configured maximum message size.
    #[error("message of {size} bytes exceeds limit of {max}")]
    MessageTooLarge { size: usize, max: usize },

    /// A read or write handler stopped on a transport failure.
    #[error("handler error: {0}")]
    Handler(String),

    /// Transport I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Packet could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Packet carries an unsupported protocol version.
    #[error("unsupported packet version: {0}")]
    UnsupportedVersion(String),

    /// Peer sent a different message than the protocol expects.
    #[error("unexpected message: expected {expected}, got {got}")]
    UnexpectedMessage { expected: MessageId, got: MessageId },

    /// Message status is not allowed in this position.
    #[error("invalid status {status} in {context}")]
    InvalidStatus {
        status: MessageStatus,
        context: &'static str,
    },

    /// Peer altered a field it was supposed to echo back.
    #[error("{0} modified by peer")]
    ModifiedByPeer(&'static str),

    /// A state's version does not exceed the confirmed one.
    #[error("stale version: received {received}, confirmed {confirmed}")]
    StaleVersion { received: u64, confirmed: u64 },

    /// A state failed validation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Session ID failed validation.
    #[error("invalid session id")]
    InvalidSessionId,

    /// Operation not allowed in the current handshake phase.
    #[error("{operation} not allowed in phase {phase:?}")]
    InvalidPhase {
        operation: &'static str,
        phase: HandshakePhase,
    },

    /// Lifecycle status transition not allowed.
    #[error("status transition {from:?} -> {to:?} not allowed")]
    InvalidStatusTransition { from: ChannelStatus, to: ChannelStatus },

    /// Identity returned by the peer is not the one dialed.
    #[error("peer identity mismatch: expected {expected}, got {got}")]
    PeerIdentityMismatch { expected: Address, got: Address },

    /// Timed out waiting for the peer or a handler.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The listener stopped accepting connections.
    #[error("listener closed")]
    ListenerClosed,

    /// Core primitive failure.
    #[error("core error: {0}")]
    Core(#[from] CoreError),
}

/// Result type for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;
