//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: parties with deterministic
//! keys, completed session IDs and countersigned states.

use std::fmt;
use std::sync::Arc;

use dst_node_core::{
    Address, Hash256, LocalKeystore, MscBaseState, MscBaseStateSigned, OffChainId, Role,
    SessionId, Signed, VpcState, VpcStateSigned,
};

/// Password every fixture account is stored under.
pub const PASSWORD: &str = "test-password";

/// One ETH in wei.
pub const ETHER: u128 = 1_000_000_000_000_000_000;

/// A party with its own keystore and identity.
#[derive(Clone)]
pub struct TestParty {
    pub id: OffChainId,
    pub keystore: Arc<LocalKeystore>,
}

impl TestParty {
    /// Create a party from a deterministic secret, listening on a free port.
    pub fn with_seed(seed: [u8; 32]) -> Self {
        let keystore = Arc::new(LocalKeystore::new());
        let address = keystore
            .import_key(&seed, PASSWORD)
            .expect("fixture seed is a valid secret key");
        Self {
            id: OffChainId::new(address, "127.0.0.1:0", "/"),
            keystore,
        }
    }

    /// Create a party with a fresh random key.
    pub fn random() -> Self {
        let keystore = Arc::new(LocalKeystore::new());
        let address = keystore.generate_account(PASSWORD);
        Self {
            id: OffChainId::new(address, "127.0.0.1:0", "/"),
            keystore,
        }
    }

    /// On-chain address.
    pub fn address(&self) -> Address {
        self.id.on_chain_id
    }

    /// Attach credentials to `id` for one signing operation.
    pub fn arm(&self, id: &mut OffChainId) {
        id.set_credentials(self.keystore.clone(), PASSWORD);
    }

    /// A copy of this party's identity with credentials attached.
    pub fn armed(&self) -> OffChainId {
        let mut id = self.id.clone();
        self.arm(&mut id);
        id
    }
}

impl fmt::Debug for TestParty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestParty")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Alice, the channel sender in most tests.
pub fn alice() -> TestParty {
    TestParty::with_seed([0xa1; 32])
}

/// Bob, the channel receiver in most tests.
pub fn bob() -> TestParty {
    TestParty::with_seed([0xb0; 32])
}

/// Carol, a third party for identity checks.
pub fn carol() -> TestParty {
    TestParty::with_seed([0xc4; 32])
}

/// A completed, locked session ID with fixed nonces.
pub fn session_id(sender: &TestParty, receiver: &TestParty) -> SessionId {
    let mut sid = SessionId::new(sender.address(), receiver.address());
    sid.generate_sender_part_with_nonce(sender.address(), Hash256::from_bytes([0x11; 32]))
        .expect("fresh session id");
    sid.generate_receiver_part_with_nonce(receiver.address(), Hash256::from_bytes([0x22; 32]))
        .expect("fresh session id");
    sid.generate_complete_sid().expect("both parts present");
    sid
}

/// A VPC state of `sid` with the given balances.
pub fn vpc_state(sid: &SessionId, version: u64, blocked_sender: u128, blocked_receiver: u128) -> VpcState {
    VpcState {
        id: sid.vpc_id().expect("complete session id"),
        version,
        blocked_sender,
        blocked_receiver,
    }
}

/// Sign `state` by whichever parties are given.
pub fn sign<S: dst_node_core::SignableState>(
    state: S,
    sender: Option<&TestParty>,
    receiver: Option<&TestParty>,
) -> Signed<S> {
    let mut signed = Signed::new(state);
    if let Some(party) = sender {
        signed
            .add_sign(&mut party.armed(), Role::Sender)
            .expect("fixture signing");
    }
    if let Some(party) = receiver {
        signed
            .add_sign(&mut party.armed(), Role::Receiver)
            .expect("fixture signing");
    }
    signed
}

/// A VPC state signed by both parties.
pub fn signed_vpc_state(
    sid: &SessionId,
    sender: &TestParty,
    receiver: &TestParty,
    version: u64,
    blocked_sender: u128,
    blocked_receiver: u128,
) -> VpcStateSigned {
    sign(
        vpc_state(sid, version, blocked_sender, blocked_receiver),
        Some(sender),
        Some(receiver),
    )
}

/// A funding commitment of `sid` signed by both parties.
pub fn signed_msc_base_state(
    sid: &SessionId,
    vpc_address: Address,
    sender: &TestParty,
    receiver: &TestParty,
    blocked_sender: u128,
    blocked_receiver: u128,
) -> MscBaseStateSigned {
    let state = MscBaseState {
        vpc_address,
        sid: sid.complete().expect("complete session id"),
        blocked_sender,
        blocked_receiver,
        version: 1,
    };
    sign(state, Some(sender), Some(receiver))
}
