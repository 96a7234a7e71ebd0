//! # DST Node Core
//!
//! Pure primitives for the direct-state-transfer node: on-chain
//! identifiers, session ID derivation, signed channel states and the
//! contract store.
//!
//! This crate contains no I/O and no networking. It is pure computation
//! over the data the channel protocol exchanges and the contracts verify.
//!
//! ## Key Types
//!
//! - [`Address`] / [`Hash256`] - 20-byte accounts and 32-byte digests
//! - [`SessionId`] - two-party identifier negotiated per channel
//! - [`MscBaseStateSigned`] / [`VpcStateSigned`] - countersigned channel states
//! - [`OffChainId`] - participant identity with single-use credentials
//! - [`ContractStore`] - reference hashes of the settlement contracts
//!
//! ## Encoding
//!
//! States are hashed with the packed encoding of the settlement
//! contracts. See [`hash`] module.

pub mod contract;
pub mod error;
pub mod hash;
pub mod identity;
pub mod keystore;
pub mod session_id;
pub mod signature;
pub mod state;
pub mod types;

pub use contract::{
    match_code, runtime_code_hash, ContractKind, ContractStore, ContractTimeouts, Handler,
    MatchStatus,
};
pub use error::{CoreError, Result};
pub use hash::{keccak256, sha256, PackedEncoder};
pub use identity::{Credentials, OffChainId};
pub use keystore::{Keystore, LocalKeystore};
pub use session_id::SessionId;
pub use signature::{
    address_of, recover_address, rehash_with_ethereum_prefix, sign_digest, sign_hash_eth,
    verify_signature_eth, Signature,
};
pub use state::{
    MscBaseState, MscBaseStateSigned, SignableState, Signed, VpcState, VpcStateId,
    VpcStateSigned,
};
pub use types::{Address, Hash256, Role};
