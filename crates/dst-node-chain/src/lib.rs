//! # DST Node Chain
//!
//! Settlement coordination: binding the channel's contracts, submitting
//! the owner's transactions and turning contract logs into typed event
//! streams.
//!
//! ## Overview
//!
//! ```text
//! BlockchainInstance (verify-then-set, confirm, register, close, execute)
//!    |  SignedTx / ReadCall            ^  EventsChan (bounded, per kind)
//! ChainClient (JSON-RPC node or in-process simulation)
//! ```
//!
//! The chain itself is reached only through [`ChainClient`]; this crate
//! never talks to a node directly.

pub mod bindings;
pub mod client;
pub mod error;
pub mod events;
pub mod instance;
pub mod tx;
pub mod watcher;

pub use bindings::{MsContract, Vpc};
pub use client::{
    ChainClient, LogFilter, LogSubscription, ReadCall, ReadValue, VpcOnChainState,
    RECEIPT_POLL_INTERVAL,
};
pub use error::{ChainError, Result};
pub use events::{
    ContractEvent, EventKind, EventLog, FromEvent, MscClosed, MscClosing, MscInitialized,
    MscInitializing, MscStateRegistered, MscStateRegistering, VpcClosed, VpcClosing,
};
pub use instance::{BlockchainInstance, ChainConfig};
pub use tx::{ContractCall, DeployParams, SignedTx, TxPayload, TxReceipt, TxRequest};
pub use watcher::{EventStream, EventsChan, WatcherConfig};
