//! Error types for settlement coordination.

use thiserror::Error;

use dst_node_core::{Address, ContractKind, CoreError, Hash256, MatchStatus};

use crate::events::EventKind;

/// Errors raised while talking to the chain.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Code at an address does not match the contract store.
    #[error("{kind} at {address} does not match expected version: {status:?}")]
    VerificationFailed {
        kind: ContractKind,
        address: Address,
        status: MatchStatus,
    },

    /// A contract address is needed but was never set.
    #[error("{0} address not set")]
    AddressNotSet(ContractKind),

    /// The transaction was mined but reverted.
    #[error("{operation}: transaction {tx_hash} failed (status 0)")]
    ReceiptStatusFailed {
        operation: &'static str,
        tx_hash: Hash256,
    },

    /// No receipt appeared within the mining timeout.
    #[error("transaction {0} not mined in time")]
    MiningTimeout(Hash256),

    /// A deployment receipt carried no contract address.
    #[error("deployment {0} produced no contract address")]
    NoContractAddress(Hash256),

    /// Setting up or reading a log subscription failed.
    #[error("subscription error: {0}")]
    Subscription(String),

    /// The node rejected a request.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// No event of a kind arrived in time.
    #[error("timed out waiting for {0} event")]
    EventTimeout(EventKind),

    /// The event stream of a kind has ended.
    #[error("{0} event stream closed")]
    EventStreamClosed(EventKind),

    /// A state does not fit the bound contracts.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Contract events are read before the watcher was started.
    #[error("event watcher not started")]
    WatcherNotStarted,

    /// Transaction encoding failed.
    #[error("encoding error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for chain operations.
pub type Result<T> = std::result::Result<T, ChainError>;
