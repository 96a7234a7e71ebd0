//! Contract store: the reference set of settlement contracts.
//!
//! Every channel relies on three contracts. Their runtime bytecode is
//! pinned by hash so that an address handed over by a peer can be
//! checked before it is trusted. Both parties must run the same store;
//! the store checksum is compared during the new-channel handshake.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::hash::{sha256, PackedEncoder};
use crate::types::Hash256;

/// Kinds of contracts used by a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ContractKind {
    /// Shared signature-verification library.
    #[serde(rename = "LibSignatures")]
    LibSignatures,
    /// Multi-signature settlement contract.
    #[serde(rename = "MSContract")]
    MsContract,
    /// Virtual payment channel contract.
    #[serde(rename = "VPC")]
    Vpc,
}

impl ContractKind {
    /// All kinds, in the order their addresses are exchanged.
    pub const ALL: [ContractKind; 3] = [
        ContractKind::LibSignatures,
        ContractKind::Vpc,
        ContractKind::MsContract,
    ];

    /// Contract name.
    pub const fn name(self) -> &'static str {
        match self {
            ContractKind::LibSignatures => "LibSignatures",
            ContractKind::MsContract => "MSContract",
            ContractKind::Vpc => "VPC",
        }
    }

    /// Whether the contract is deployed as a library.
    ///
    /// Library runtime code embeds its own address, which is masked out
    /// before hashing.
    pub const fn is_library(self) -> bool {
        matches!(self, ContractKind::LibSignatures)
    }

    const fn index(self) -> usize {
        match self {
            ContractKind::LibSignatures => 0,
            ContractKind::MsContract => 1,
            ContractKind::Vpc => 2,
        }
    }
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of comparing on-chain code against a reference hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchStatus {
    Match,
    NoMatch,
    /// No code at the address.
    Missing,
    Unknown,
}

/// Reference data for one contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handler {
    pub kind: ContractKind,
    pub version: String,
    pub gas_units: u64,
    /// SHA-256 of the runtime bytecode (library address masked).
    pub runtime_hash: Hash256,
}

/// Protocol timeouts enforced by the contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractTimeouts {
    pub ms_contract: Duration,
    pub vpc_validity: Duration,
    pub vpc_extended_validity: Duration,
}

impl Default for ContractTimeouts {
    fn default() -> Self {
        Self {
            ms_contract: Duration::from_secs(100 * 60),
            vpc_validity: Duration::from_secs(10 * 60),
            vpc_extended_validity: Duration::from_secs(20 * 60),
        }
    }
}

/// Lookup table of contract handlers keyed by [`ContractKind`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractStore {
    handlers: [Handler; 3],
    pub timeouts: ContractTimeouts,
}

/// Version tag shared by the bundled contracts.
pub const CONTRACT_VERSION: &str = "0.0.1";

/// Default gas units for contract deployment.
pub const DEPLOY_GAS_UNITS: u64 = 4_000_000;

const LIB_SIGNATURES_HASH: &str = "3c0f29dfe76fd55ab0b023b26c97d2a306805a03788277cd0c7d2817cb7a9bf9";
const MS_CONTRACT_HASH: &str = "4fb304c42b1bad1b03417c72e925d87488dea1d22e13ed0601abbe8d86c8e8ad";
const VPC_HASH: &str = "978bc824e314529d620afb0c1f07770dad5e36b11ad0060102f67fc29e3a60fe";

impl ContractStore {
    /// Build a store from runtime hashes.
    pub fn new(lib_signatures: Hash256, ms_contract: Hash256, vpc: Hash256) -> Self {
        let handler = |kind, runtime_hash| Handler {
            kind,
            version: CONTRACT_VERSION.to_owned(),
            gas_units: DEPLOY_GAS_UNITS,
            runtime_hash,
        };
        Self {
            handlers: [
                handler(ContractKind::LibSignatures, lib_signatures),
                handler(ContractKind::MsContract, ms_contract),
                handler(ContractKind::Vpc, vpc),
            ],
            timeouts: ContractTimeouts::default(),
        }
    }

    /// Handler for a contract kind.
    pub fn handler(&self, kind: ContractKind) -> &Handler {
        &self.handlers[kind.index()]
    }

    /// Shorthand for the library handler.
    pub fn lib_signatures(&self) -> &Handler {
        self.handler(ContractKind::LibSignatures)
    }

    /// Shorthand for the settlement contract handler.
    pub fn ms_contract(&self) -> &Handler {
        self.handler(ContractKind::MsContract)
    }

    /// Shorthand for the VPC handler.
    pub fn vpc(&self) -> &Handler {
        self.handler(ContractKind::Vpc)
    }

    /// Checksum identifying this store version.
    ///
    /// `sha256(hash(LibSignatures) ‖ hash(VPC) ‖ hash(MSContract))`.
    pub fn sha256_sum(&self) -> Hash256 {
        let bytes = PackedEncoder::new()
            .bytes32(&self.lib_signatures().runtime_hash)
            .bytes32(&self.vpc().runtime_hash)
            .bytes32(&self.ms_contract().runtime_hash)
            .into_bytes();
        sha256(&bytes)
    }
}

impl Default for ContractStore {
    /// The store of the released contract binaries.
    fn default() -> Self {
        // Constants are 64 hex digits, so parsing cannot fail.
        let parse = |s: &str| Hash256::from_hex(s).unwrap_or(Hash256::ZERO);
        Self::new(parse(LIB_SIGNATURES_HASH), parse(MS_CONTRACT_HASH), parse(VPC_HASH))
    }
}

/// Opcode of PUSH20, which starts the runtime code of a linked library.
const PUSH20: u8 = 0x73;

/// Hash runtime bytecode for comparison with a [`Handler::runtime_hash`].
///
/// For libraries the 20-byte self address following the leading PUSH20 is
/// zeroed first, so that the hash does not depend on where the library was
/// deployed.
pub fn runtime_code_hash(code: &[u8], is_library: bool) -> Hash256 {
    if is_library && code.len() > 21 && code[0] == PUSH20 {
        let mut masked = code.to_vec();
        masked[1..21].fill(0);
        return sha256(&masked);
    }
    sha256(code)
}

/// Compare runtime bytecode against an expected hash.
pub fn match_code(code: &[u8], expected: &Hash256, is_library: bool) -> MatchStatus {
    if code.is_empty() {
        return MatchStatus::Missing;
    }
    if &runtime_code_hash(code, is_library) == expected {
        MatchStatus::Match
    } else {
        MatchStatus::NoMatch
    }
}
