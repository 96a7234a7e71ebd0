//! Golden test vectors for deterministic verification.
//!
//! These vectors pin the packed encodings, address derivation and session
//! ID derivation to the values the settlement contracts compute.

use dst_node_core::{
    rehash_with_ethereum_prefix, Address, ContractStore, Hash256, LocalKeystore, MscBaseState,
    SessionId, VpcState,
};

use crate::fixtures::ETHER;

/// Inputs of a golden vector.
#[derive(Debug, Clone)]
pub enum VectorInput {
    /// Address of a secret key.
    Address { seed: [u8; 32] },
    /// Session ID parts and result from two seeds and two nonces.
    SessionId {
        sender_seed: [u8; 32],
        receiver_seed: [u8; 32],
        nonce_sender: [u8; 32],
        nonce_receiver: [u8; 32],
        output: SidOutput,
    },
    /// Hash of a funding commitment of the fixture session.
    MscBaseState {
        vpc_address: [u8; 20],
        blocked_sender: u128,
        blocked_receiver: u128,
        version: u64,
    },
    /// Hash of a VPC state of the fixture session.
    VpcState {
        version: u64,
        blocked_sender: u128,
        blocked_receiver: u128,
        ethereum_prefix: bool,
    },
    /// Checksum of the released contract store.
    ContractStoreSum,
}

/// Which session ID value a vector pins.
#[derive(Debug, Clone, Copy)]
pub enum SidOutput {
    SenderPart,
    ReceiverPart,
    Complete,
    VpcId,
}

/// A golden test vector.
#[derive(Debug, Clone)]
pub struct GoldenVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    pub input: VectorInput,
    /// Expected output (hex, no prefix).
    pub expected: &'static str,
}

const ALICE_SEED: [u8; 32] = [0xa1; 32];
const BOB_SEED: [u8; 32] = [0xb0; 32];
const NONCE_SENDER: [u8; 32] = [0x11; 32];
const NONCE_RECEIVER: [u8; 32] = [0x22; 32];

fn fixture_sid(output: SidOutput) -> VectorInput {
    VectorInput::SessionId {
        sender_seed: ALICE_SEED,
        receiver_seed: BOB_SEED,
        nonce_sender: NONCE_SENDER,
        nonce_receiver: NONCE_RECEIVER,
        output,
    }
}

/// Get all golden test vectors.
pub fn all_vectors() -> Vec<GoldenVector> {
    let mut key_one = [0u8; 32];
    key_one[31] = 1;
    vec![
        GoldenVector {
            name: "address of secret key 1",
            input: VectorInput::Address { seed: key_one },
            expected: "7e5f4552091a69125d5dfcb7b8c2659029395bdf",
        },
        GoldenVector {
            name: "alice address",
            input: VectorInput::Address { seed: ALICE_SEED },
            expected: "5d5c99edf529335160ff180fa141dd4967fc00d2",
        },
        GoldenVector {
            name: "bob address",
            input: VectorInput::Address { seed: BOB_SEED },
            expected: "af295d3c842bc1145e818d7fef2c929726625620",
        },
        GoldenVector {
            name: "carol address",
            input: VectorInput::Address { seed: [0xc4; 32] },
            expected: "ac1a4312f46af5398919d76506043ec83b56725a",
        },
        GoldenVector {
            name: "session id sender part",
            input: fixture_sid(SidOutput::SenderPart),
            expected: "1c80486c07311000d06f727d3991127b61225c38e8fda3f2111eebd9c1a80d90",
        },
        GoldenVector {
            name: "session id receiver part",
            input: fixture_sid(SidOutput::ReceiverPart),
            expected: "15036f9bb6b72408f0c1612efbf0cbf9072b12d65ffa34454b20c7f64175265f",
        },
        GoldenVector {
            name: "complete session id",
            input: fixture_sid(SidOutput::Complete),
            expected: "c6278c29065366a8fd4faae244c0ac3907f360dff0bec394959db747a978872b",
        },
        GoldenVector {
            name: "vpc id",
            input: fixture_sid(SidOutput::VpcId),
            expected: "90786fce0fadd3968273dd691017a3c56f3fb28cd031436bff49f4db36c91052",
        },
        GoldenVector {
            name: "msc base state, 10 ETH each",
            input: VectorInput::MscBaseState {
                vpc_address: [0x09; 20],
                blocked_sender: 10 * ETHER,
                blocked_receiver: 10 * ETHER,
                version: 1,
            },
            expected: "649c8b44159bb0b13a3abb9b13052ef6a84250f1a84b5d3bd847a98f2d538f74",
        },
        GoldenVector {
            name: "vpc state v1",
            input: VectorInput::VpcState {
                version: 1,
                blocked_sender: 9 * ETHER,
                blocked_receiver: 11 * ETHER,
                ethereum_prefix: false,
            },
            expected: "8b9b029e4e611e1377647edeabbf8a89a458890caa03c97563bb42ea219aa964",
        },
        GoldenVector {
            name: "vpc state v1, ethereum prefixed",
            input: VectorInput::VpcState {
                version: 1,
                blocked_sender: 9 * ETHER,
                blocked_receiver: 11 * ETHER,
                ethereum_prefix: true,
            },
            expected: "cd22f57498c7b0f84aa2d6d4d33d8ddd9136ce2036e61404054b9fab47a28a3d",
        },
        GoldenVector {
            name: "contract store checksum",
            input: VectorInput::ContractStoreSum,
            expected: "8b9df51d7a7343a92133f24aaa1ba544d92eac1ccd66c731aa243e3273cb0f69",
        },
    ]
}

fn address_of_seed(seed: &[u8; 32]) -> Address {
    LocalKeystore::new()
        .import_key(seed, "golden")
        .expect("golden seeds are valid secret keys")
}

fn session(sender_seed: &[u8; 32], receiver_seed: &[u8; 32], ns: [u8; 32], nr: [u8; 32]) -> SessionId {
    let (sender, receiver) = (address_of_seed(sender_seed), address_of_seed(receiver_seed));
    let mut sid = SessionId::new(sender, receiver);
    sid.generate_sender_part_with_nonce(sender, Hash256::from_bytes(ns))
        .expect("fresh session id");
    sid.generate_receiver_part_with_nonce(receiver, Hash256::from_bytes(nr))
        .expect("fresh session id");
    sid.generate_complete_sid().expect("both parts present");
    sid
}

fn fixture_session() -> SessionId {
    session(&ALICE_SEED, &BOB_SEED, NONCE_SENDER, NONCE_RECEIVER)
}

/// Compute the output of a vector as hex.
pub fn compute(vector: &GoldenVector) -> String {
    match &vector.input {
        VectorInput::Address { seed } => hex::encode(address_of_seed(seed).as_bytes()),
        VectorInput::SessionId {
            sender_seed,
            receiver_seed,
            nonce_sender,
            nonce_receiver,
            output,
        } => {
            let sid = session(sender_seed, receiver_seed, *nonce_sender, *nonce_receiver);
            let value = match output {
                SidOutput::SenderPart => sid.sid_sender_part,
                SidOutput::ReceiverPart => sid.sid_receiver_part,
                SidOutput::Complete => sid.sid_complete,
                SidOutput::VpcId => sid.vpc_id().ok(),
            };
            value.map(|h| h.to_hex()).unwrap_or_default()
        }
        VectorInput::MscBaseState {
            vpc_address,
            blocked_sender,
            blocked_receiver,
            version,
        } => MscBaseState {
            vpc_address: Address::from_bytes(*vpc_address),
            sid: fixture_session().complete().expect("complete"),
            blocked_sender: *blocked_sender,
            blocked_receiver: *blocked_receiver,
            version: *version,
        }
        .hash()
        .to_hex(),
        VectorInput::VpcState {
            version,
            blocked_sender,
            blocked_receiver,
            ethereum_prefix,
        } => {
            let hash = VpcState {
                id: fixture_session().vpc_id().expect("complete"),
                version: *version,
                blocked_sender: *blocked_sender,
                blocked_receiver: *blocked_receiver,
            }
            .hash();
            if *ethereum_prefix {
                rehash_with_ethereum_prefix(hash.as_bytes()).to_hex()
            } else {
                hash.to_hex()
            }
        }
        VectorInput::ContractStoreSum => ContractStore::default().sha256_sum().to_hex(),
    }
}

/// Names of the vectors whose computed output differs from the expected one.
pub fn verify_all_vectors() -> Vec<&'static str> {
    all_vectors()
        .into_iter()
        .filter(|v| compute(v) != v.expected)
        .map(|v| v.name)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_names_unique() {
        let vectors = all_vectors();
        let mut names: Vec<_> = vectors.iter().map(|v| v.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), vectors.len());
    }

    #[test]
    fn test_vectors_match() {
        assert!(verify_all_vectors().is_empty(), "{:?}", verify_all_vectors());
    }
}
