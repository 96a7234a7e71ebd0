//! Proptest generators for property-based testing.

use proptest::prelude::*;

use dst_node_core::{Address, Hash256, VpcState};

use crate::fixtures::TestParty;

/// Generate a random address.
pub fn address() -> impl Strategy<Value = Address> {
    any::<[u8; 20]>().prop_map(Address::from_bytes)
}

/// Generate a random 32-byte value.
pub fn hash256() -> impl Strategy<Value = Hash256> {
    any::<[u8; 32]>().prop_map(Hash256::from_bytes)
}

/// Generate a valid secp256k1 secret key.
///
/// The top byte is kept in `1..=0x7f`, so the scalar is non-zero and below
/// the group order.
pub fn secret_key() -> impl Strategy<Value = [u8; 32]> {
    any::<[u8; 32]>().prop_map(|mut key| {
        key[0] = (key[0] & 0x7f).max(1);
        key
    })
}

/// Generate a party from a random secret.
pub fn party() -> impl Strategy<Value = TestParty> {
    secret_key().prop_map(TestParty::with_seed)
}

/// Generate blocked balances whose sum cannot overflow.
pub fn balances() -> impl Strategy<Value = (u128, u128)> {
    (0u128..=u64::MAX as u128, 0u128..=u64::MAX as u128)
}

/// Generate signed amounts moved from sender to receiver, one per round.
pub fn transfers(max_rounds: usize) -> impl Strategy<Value = Vec<i128>> {
    prop::collection::vec(-(1i128 << 70)..(1i128 << 70), 0..=max_rounds)
}

/// Successive states of a VPC after applying `transfers` to `initial`.
///
/// Each transfer is clamped to what the paying side holds, so every state
/// keeps the initial total.
pub fn vpc_states(id: Hash256, initial: (u128, u128), transfers: &[i128]) -> Vec<VpcState> {
    let (mut sender, mut receiver) = initial;
    let mut states = Vec::with_capacity(transfers.len());
    for (round, amount) in transfers.iter().enumerate() {
        let moved = amount.unsigned_abs();
        if *amount >= 0 {
            let moved = moved.min(sender);
            sender -= moved;
            receiver += moved;
        } else {
            let moved = moved.min(receiver);
            receiver -= moved;
            sender += moved;
        }
        states.push(VpcState {
            id,
            version: round as u64 + 1,
            blocked_sender: sender,
            blocked_receiver: receiver,
        });
    }
    states
}
