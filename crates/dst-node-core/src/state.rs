//! Signed channel states.
//!
//! Two documents are countersigned by both parties: the MSC base state
//! (initial funding commitment registered with the settlement contract)
//! and the VPC state (one off-chain balance snapshot). Both are hashed
//! with a packed encoding identical to the on-chain one, and each carries a
//! sender and a receiver signature slot.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::hash::PackedEncoder;
use crate::identity::OffChainId;
use crate::signature::{sign_hash_eth, verify_signature_eth, Signature};
use crate::types::{Address, Hash256, Role};

/// A channel state that can be hashed for signing.
pub trait SignableState {
    /// Canonical hash covered by both signatures.
    fn signing_hash(&self) -> Hash256;

    /// Version of the state.
    fn version(&self) -> u64;
}

/// Funding commitment of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MscBaseState {
    pub vpc_address: Address,
    pub sid: Hash256,
    pub blocked_sender: u128,
    pub blocked_receiver: u128,
    pub version: u64,
}

impl MscBaseState {
    /// `keccak(vpc_address ‖ sid ‖ blocked_sender ‖ blocked_receiver ‖ version)`.
    pub fn hash(&self) -> Hash256 {
        PackedEncoder::new()
            .address(&self.vpc_address)
            .bytes32(&self.sid)
            .uint(self.blocked_sender)
            .uint(self.blocked_receiver)
            .uint(self.version)
            .keccak()
    }
}

impl SignableState for MscBaseState {
    fn signing_hash(&self) -> Hash256 {
        self.hash()
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Identifier of a VPC, derived from both addresses and the session ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpcStateId {
    pub addr_sender: Address,
    pub addr_receiver: Address,
    pub sid: Hash256,
}

impl VpcStateId {
    /// `keccak(addr_sender ‖ addr_receiver ‖ sid)`.
    pub fn hash(&self) -> Hash256 {
        PackedEncoder::new()
            .address(&self.addr_sender)
            .address(&self.addr_receiver)
            .bytes32(&self.sid)
            .keccak()
    }
}

/// One off-chain balance snapshot of a VPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpcState {
    pub id: Hash256,
    pub version: u64,
    pub blocked_sender: u128,
    pub blocked_receiver: u128,
}

impl VpcState {
    /// `keccak(id ‖ version ‖ blocked_sender ‖ blocked_receiver)`.
    pub fn hash(&self) -> Hash256 {
        PackedEncoder::new()
            .bytes32(&self.id)
            .uint(self.version)
            .uint(self.blocked_sender)
            .uint(self.blocked_receiver)
            .keccak()
    }

    /// Total amount held in the channel, `None` on overflow.
    pub fn total(&self) -> Option<u128> {
        self.blocked_sender.checked_add(self.blocked_receiver)
    }
}

impl SignableState for VpcState {
    fn signing_hash(&self) -> Hash256 {
        self.hash()
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// A state together with its two signature slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signed<S> {
    pub state: S,
    pub sign_sender: Option<Signature>,
    pub sign_receiver: Option<Signature>,
}

/// MSC base state with signatures.
pub type MscBaseStateSigned = Signed<MscBaseState>;

/// VPC state with signatures.
pub type VpcStateSigned = Signed<VpcState>;

impl<S: SignableState> Signed<S> {
    /// Wrap an unsigned state.
    pub fn new(state: S) -> Self {
        Self {
            state,
            sign_sender: None,
            sign_receiver: None,
        }
    }

    /// The signature slot for `role`.
    pub fn signature(&self, role: Role) -> Option<&Signature> {
        match role {
            Role::Sender => self.sign_sender.as_ref(),
            Role::Receiver => self.sign_receiver.as_ref(),
        }
    }

    /// Sign the state with `identity`'s credentials into the `role` slot.
    ///
    /// The identity's credentials are consumed.
    pub fn add_sign(&mut self, identity: &mut OffChainId, role: Role) -> Result<()> {
        let sig = sign_hash_eth(identity, &self.state.signing_hash())?;
        match role {
            Role::Sender => self.sign_sender = Some(sig),
            Role::Receiver => self.sign_receiver = Some(sig),
        }
        tracing::debug!(%role, version = self.state.version(), "state signed");
        Ok(())
    }

    /// Check the `role` slot against `signer`.
    ///
    /// An empty slot verifies as `false`.
    pub fn verify_sign(&self, signer: &Address, role: Role) -> Result<bool> {
        match self.signature(role) {
            Some(sig) => verify_signature_eth(&self.state.signing_hash(), sig, signer),
            None => Ok(false),
        }
    }

    /// Check both slots against the expected signers.
    pub fn verify_signatures(&self, sender: &Address, receiver: &Address) -> Result<bool> {
        Ok(self.verify_sign(sender, Role::Sender)? && self.verify_sign(receiver, Role::Receiver)?)
    }

    /// Require both slots to verify, naming the first failing role.
    pub fn require_signatures(&self, sender: &Address, receiver: &Address) -> Result<()> {
        for (role, signer) in [(Role::Sender, sender), (Role::Receiver, receiver)] {
            if !self.verify_sign(signer, role)? {
                return Err(CoreError::MissingSignature(role));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::LocalKeystore;
    use std::sync::Arc;

    struct Party {
        id: OffChainId,
        keystore: Arc<LocalKeystore>,
    }

    impl Party {
        fn new(seed: u8) -> Self {
            let keystore = Arc::new(LocalKeystore::new());
            let addr = keystore.import_key(&[seed; 32], "pw").unwrap();
            Self {
                id: OffChainId::new(addr, "localhost:1", "/"),
                keystore,
            }
        }

        fn armed(&self) -> OffChainId {
            let mut id = self.id.clone();
            id.set_credentials(self.keystore.clone(), "pw");
            id
        }

        fn addr(&self) -> Address {
            self.id.on_chain_id
        }
    }

    fn base_state() -> MscBaseState {
        MscBaseState {
            vpc_address: Address::from_bytes([3; 20]),
            sid: Hash256::from_bytes([4; 32]),
            blocked_sender: 10_000_000_000_000_000_000,
            blocked_receiver: 10_000_000_000_000_000_000,
            version: 1,
        }
    }

    #[test]
    fn test_add_sign_both_roles() {
        let (alice, bob) = (Party::new(1), Party::new(2));
        let mut signed = Signed::new(base_state());

        signed.add_sign(&mut alice.armed(), Role::Sender).unwrap();
        assert!(signed.verify_sign(&alice.addr(), Role::Sender).unwrap());
        assert!(!signed.verify_signatures(&alice.addr(), &bob.addr()).unwrap());

        signed.add_sign(&mut bob.armed(), Role::Receiver).unwrap();
        assert!(signed.verify_signatures(&alice.addr(), &bob.addr()).unwrap());
        assert!(signed.require_signatures(&alice.addr(), &bob.addr()).is_ok());
    }

    #[test]
    fn test_add_sign_without_credentials() {
        let alice = Party::new(1);
        let mut signed = Signed::new(base_state());
        let mut id = alice.id.clone();
        assert!(matches!(
            signed.add_sign(&mut id, Role::Sender),
            Err(CoreError::CredentialsNotSet(_))
        ));
        assert!(signed.sign_sender.is_none());
    }

    #[test]
    fn test_signature_bound_to_fields() {
        let alice = Party::new(1);
        let mut signed = Signed::new(base_state());
        signed.add_sign(&mut alice.armed(), Role::Sender).unwrap();

        signed.state.blocked_sender += 1;
        assert!(!signed.verify_sign(&alice.addr(), Role::Sender).unwrap());
    }

    #[test]
    fn test_swapped_roles_fail() {
        let (alice, bob) = (Party::new(1), Party::new(2));
        let mut signed = Signed::new(base_state());
        signed.add_sign(&mut alice.armed(), Role::Sender).unwrap();
        signed.add_sign(&mut bob.armed(), Role::Receiver).unwrap();
        assert!(!signed.verify_signatures(&bob.addr(), &alice.addr()).unwrap());
        assert!(matches!(
            signed.require_signatures(&bob.addr(), &alice.addr()),
            Err(CoreError::MissingSignature(Role::Sender))
        ));
    }

    #[test]
    fn test_vpc_hash_changes_with_version() {
        let s1 = VpcState {
            id: Hash256::from_bytes([1; 32]),
            version: 1,
            blocked_sender: 9,
            blocked_receiver: 11,
        };
        let mut s2 = s1.clone();
        s2.version = 2;
        assert_ne!(s1.hash(), s2.hash());
        assert_eq!(s1.total(), Some(20));
    }

    #[test]
    fn test_vpc_total_overflow() {
        let s = VpcState {
            id: Hash256::ZERO,
            version: 1,
            blocked_sender: u128::MAX,
            blocked_receiver: 1,
        };
        assert_eq!(s.total(), None);
    }

    #[test]
    fn test_signed_state_json() {
        let alice = Party::new(1);
        let mut signed = Signed::new(base_state());
        signed.add_sign(&mut alice.armed(), Role::Sender).unwrap();

        let json = serde_json::to_string(&signed).unwrap();
        let back: MscBaseStateSigned = serde_json::from_str(&json).unwrap();
        assert_eq!(back, signed);
        assert!(back.verify_sign(&alice.addr(), Role::Sender).unwrap());
    }
}
