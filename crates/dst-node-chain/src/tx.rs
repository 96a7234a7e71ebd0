//! Transactions: typed deployments, contract calls and receipts.
//!
//! A [`TxRequest`] is hashed over its JSON encoding and signed with the
//! Ethereum message prefix by the owner's credentials. The resulting
//! [`SignedTx`] is what a [`ChainClient`](crate::ChainClient) accepts.

use serde::{Deserialize, Serialize};

use dst_node_core::{
    keccak256, sign_hash_eth, verify_signature_eth, Address, ContractKind, Hash256, OffChainId,
    Signature,
};

use crate::error::Result;

/// Constructor arguments of each contract kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeployParams {
    LibSignatures,
    Vpc {
        lib_signatures: Address,
    },
    MsContract {
        lib_signatures: Address,
        sender: Address,
        receiver: Address,
    },
}

impl DeployParams {
    /// Contract kind created by these parameters.
    pub fn kind(&self) -> ContractKind {
        match self {
            DeployParams::LibSignatures => ContractKind::LibSignatures,
            DeployParams::Vpc { .. } => ContractKind::Vpc,
            DeployParams::MsContract { .. } => ContractKind::MsContract,
        }
    }
}

/// State-changing calls on the settlement contracts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractCall {
    /// Lock the transferred value as this party's deposit.
    Confirm,
    /// Register the countersigned funding commitment.
    StateRegister {
        vpc_address: Address,
        sid: Hash256,
        blocked_sender: u128,
        blocked_receiver: u128,
        version: u64,
        sign_sender: Signature,
        sign_receiver: Signature,
    },
    /// Submit a countersigned VPC state for closing.
    VpcClose {
        sender: Address,
        receiver: Address,
        sid: Hash256,
        version: u64,
        blocked_sender: u128,
        blocked_receiver: u128,
        sign_sender: Signature,
        sign_receiver: Signature,
    },
    /// Pay out according to the closed VPC.
    Execute { sender: Address, receiver: Address },
}

impl ContractCall {
    /// Function name, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            ContractCall::Confirm => "confirm",
            ContractCall::StateRegister { .. } => "stateRegister",
            ContractCall::VpcClose { .. } => "close",
            ContractCall::Execute { .. } => "execute",
        }
    }
}

/// What a transaction does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxPayload {
    Deploy(DeployParams),
    Call { to: Address, call: ContractCall },
}

/// An unsigned transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRequest {
    pub from: Address,
    pub nonce: u64,
    /// Wei transferred along with the call.
    pub value: u128,
    pub gas_limit: u64,
    pub payload: TxPayload,
}

impl TxRequest {
    /// Hash covered by the sender's signature.
    pub fn signing_hash(&self) -> Result<Hash256> {
        Ok(keccak256(&serde_json::to_vec(self)?))
    }

    /// Sign with the credentials attached to `identity`.
    ///
    /// The credentials are consumed.
    pub fn sign(self, identity: &mut OffChainId) -> Result<SignedTx> {
        let hash = self.signing_hash()?;
        let signature = sign_hash_eth(identity, &hash)?;
        Ok(SignedTx {
            request: self,
            signature,
        })
    }
}

/// A transaction ready for submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTx {
    pub request: TxRequest,
    pub signature: Signature,
}

impl SignedTx {
    /// Transaction hash, covering the signature.
    pub fn hash(&self) -> Result<Hash256> {
        Ok(keccak256(&serde_json::to_vec(self)?))
    }

    /// Whether the signature was made by `request.from`.
    pub fn verify(&self) -> Result<bool> {
        let hash = self.request.signing_hash()?;
        Ok(verify_signature_eth(&hash, &self.signature, &self.request.from)?)
    }
}

/// Outcome of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: Hash256,
    pub block_number: u64,
    /// 1 on success, 0 when the transaction reverted.
    pub status: u64,
    pub contract_address: Option<Address>,
    pub gas_used: u64,
}

impl TxReceipt {
    pub fn succeeded(&self) -> bool {
        self.status == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dst_node_core::LocalKeystore;
    use std::sync::Arc;

    fn owner() -> OffChainId {
        let keystore = Arc::new(LocalKeystore::new());
        let address = keystore.import_key(&[0x42; 32], "pw").unwrap();
        let mut id = OffChainId::new(address, "127.0.0.1:0", "/");
        id.set_credentials(keystore, "pw");
        id
    }

    fn request(from: Address) -> TxRequest {
        TxRequest {
            from,
            nonce: 3,
            value: 10,
            gas_limit: 2_000_000,
            payload: TxPayload::Call {
                to: Address::from_bytes([7; 20]),
                call: ContractCall::Confirm,
            },
        }
    }

    #[test]
    fn test_sign_and_verify() {
        let mut id = owner();
        let signed = request(id.on_chain_id).sign(&mut id).unwrap();
        assert!(signed.verify().unwrap());
        assert!(!id.has_credentials());
    }

    #[test]
    fn test_tampered_request_fails_verification() {
        let mut id = owner();
        let mut signed = request(id.on_chain_id).sign(&mut id).unwrap();
        signed.request.value = 11;
        assert!(!signed.verify().unwrap());
    }

    #[test]
    fn test_sign_without_credentials() {
        let mut id = owner();
        id.clear_credentials();
        assert!(request(id.on_chain_id).sign(&mut id).is_err());
    }

    #[test]
    fn test_tx_hash_depends_on_nonce() {
        let mut id = owner();
        let a = request(id.on_chain_id).sign(&mut id).unwrap();
        let mut id = owner();
        let mut req = request(id.on_chain_id);
        req.nonce += 1;
        let b = req.sign(&mut id).unwrap();
        assert_ne!(a.hash().unwrap(), b.hash().unwrap());
    }

    #[test]
    fn test_deploy_params_kind() {
        assert_eq!(DeployParams::LibSignatures.kind(), ContractKind::LibSignatures);
        let lib = Address::from_bytes([1; 20]);
        assert_eq!(DeployParams::Vpc { lib_signatures: lib }.kind(), ContractKind::Vpc);
        let ms = DeployParams::MsContract {
            lib_signatures: lib,
            sender: Address::ZERO,
            receiver: Address::ZERO,
        };
        assert_eq!(ms.kind(), ContractKind::MsContract);
    }
}
