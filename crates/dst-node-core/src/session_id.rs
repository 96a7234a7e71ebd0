//! Session ID negotiation.
//!
//! A session ID identifies one instantiation of a channel between two
//! on-chain addresses. Each party contributes a half derived from a fresh
//! 32-byte nonce and its own address:
//!
//! ```text
//! sender_part   = keccak256(nonce_sender   || addr_sender)
//! receiver_part = keccak256(nonce_receiver || addr_receiver)
//! sid           = keccak256(sender_part || receiver_part)
//! ```
//!
//! The sender generates its half and sends it; the receiver adds its half
//! and completes the ID. Completing locks the session ID, after which no
//! part can be regenerated. Either side can re-derive every part from the
//! nonces with [`SessionId::validate`].

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::hash::PackedEncoder;
use crate::state::VpcStateId;
use crate::types::{Address, Hash256};

/// Size of the per-party nonce in bytes.
pub const NONCE_SIZE: usize = 32;

/// Two-party session identifier under negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionId {
    pub sid_sender_part: Option<Hash256>,
    pub sid_receiver_part: Option<Hash256>,
    pub addr_sender: Address,
    pub addr_receiver: Address,
    pub nonce_sender: Option<Hash256>,
    pub nonce_receiver: Option<Hash256>,
    pub sid_complete: Option<Hash256>,
    pub locked: bool,
}

fn random_nonce() -> Hash256 {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    Hash256(nonce)
}

fn part(nonce: &Hash256, addr: &Address) -> Hash256 {
    PackedEncoder::new().bytes32(nonce).address(addr).keccak()
}

fn combine(sender_part: &Hash256, receiver_part: &Hash256) -> Hash256 {
    PackedEncoder::new()
        .bytes32(sender_part)
        .bytes32(receiver_part)
        .keccak()
}

impl SessionId {
    /// Start negotiating a session between two addresses.
    pub fn new(addr_sender: Address, addr_receiver: Address) -> Self {
        Self {
            sid_sender_part: None,
            sid_receiver_part: None,
            addr_sender,
            addr_receiver,
            nonce_sender: None,
            nonce_receiver: None,
            sid_complete: None,
            locked: false,
        }
    }

    /// Generate the sender half from a fresh nonce.
    pub fn generate_sender_part(&mut self, addr_sender: Address) -> Result<()> {
        self.generate_sender_part_with_nonce(addr_sender, random_nonce())
    }

    /// Generate the sender half from a given nonce.
    pub fn generate_sender_part_with_nonce(&mut self, addr_sender: Address, nonce: Hash256) -> Result<()> {
        if self.locked {
            return Err(CoreError::SessionIdLocked);
        }
        self.addr_sender = addr_sender;
        self.nonce_sender = Some(nonce);
        self.sid_sender_part = Some(part(&nonce, &addr_sender));
        Ok(())
    }

    /// Generate the receiver half from a fresh nonce.
    pub fn generate_receiver_part(&mut self, addr_receiver: Address) -> Result<()> {
        self.generate_receiver_part_with_nonce(addr_receiver, random_nonce())
    }

    /// Generate the receiver half from a given nonce.
    pub fn generate_receiver_part_with_nonce(
        &mut self,
        addr_receiver: Address,
        nonce: Hash256,
    ) -> Result<()> {
        if self.locked {
            return Err(CoreError::SessionIdLocked);
        }
        self.addr_receiver = addr_receiver;
        self.nonce_receiver = Some(nonce);
        self.sid_receiver_part = Some(part(&nonce, &addr_receiver));
        Ok(())
    }

    /// Combine both halves into the final session ID and lock it.
    pub fn generate_complete_sid(&mut self) -> Result<Hash256> {
        if self.locked {
            return Err(CoreError::SessionIdLocked);
        }
        let sender = self
            .sid_sender_part
            .ok_or(CoreError::IncompleteSessionId("sender part"))?;
        let receiver = self
            .sid_receiver_part
            .ok_or(CoreError::IncompleteSessionId("receiver part"))?;
        let sid = combine(&sender, &receiver);
        self.sid_complete = Some(sid);
        self.locked = true;
        Ok(sid)
    }

    /// The completed session ID.
    pub fn complete(&self) -> Result<Hash256> {
        self.sid_complete
            .ok_or(CoreError::IncompleteSessionId("complete sid"))
    }

    /// Re-derive every part from the nonces and addresses.
    ///
    /// Returns `Ok(false)` if any stored part disagrees with the derivation
    /// or the ID is not locked, and an error if a part is missing.
    pub fn validate(&self) -> Result<bool> {
        let nonce_sender = self
            .nonce_sender
            .ok_or(CoreError::IncompleteSessionId("sender nonce"))?;
        let nonce_receiver = self
            .nonce_receiver
            .ok_or(CoreError::IncompleteSessionId("receiver nonce"))?;
        let sender_part = self
            .sid_sender_part
            .ok_or(CoreError::IncompleteSessionId("sender part"))?;
        let receiver_part = self
            .sid_receiver_part
            .ok_or(CoreError::IncompleteSessionId("receiver part"))?;
        let complete = self.complete()?;

        Ok(self.locked
            && part(&nonce_sender, &self.addr_sender) == sender_part
            && part(&nonce_receiver, &self.addr_receiver) == receiver_part
            && combine(&sender_part, &receiver_part) == complete)
    }

    /// Whether the sender halves of two session IDs match.
    pub fn equal_sender(&self, other: &SessionId) -> bool {
        self.addr_sender == other.addr_sender
            && self.nonce_sender == other.nonce_sender
            && self.sid_sender_part == other.sid_sender_part
    }

    /// Whether the receiver halves of two session IDs match.
    pub fn equal_receiver(&self, other: &SessionId) -> bool {
        self.addr_receiver == other.addr_receiver
            && self.nonce_receiver == other.nonce_receiver
            && self.sid_receiver_part == other.sid_receiver_part
    }

    /// Identifier of this session's VPC, as emitted by VPC contract events.
    pub fn vpc_id(&self) -> Result<Hash256> {
        Ok(VpcStateId {
            addr_sender: self.addr_sender,
            addr_receiver: self.addr_receiver,
            sid: self.complete()?,
        }
        .hash())
    }
}
