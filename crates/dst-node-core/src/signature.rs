//! Ethereum-style recoverable ECDSA signatures over secp256k1.
//!
//! Signatures are 65 bytes `[R | S | V]`. Raw signatures produced by a
//! keystore carry `V ∈ {0, 1}`; the Ethereum variant used for channel
//! states first rehashes the digest with the personal-message prefix and
//! carries `V ∈ {27, 28}`, matching what `ecrecover` expects on-chain.

use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::PublicKey;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};
use crate::hash::keccak256;
use crate::identity::OffChainId;
use crate::types::{hex_serde, Address, Hash256};

/// Prefix prepended before hashing in the Ethereum signing scheme.
pub const ETHEREUM_MESSAGE_PREFIX: &str = "\x19Ethereum Signed Message:\n";

/// Offset added to the recovery byte at the Ethereum boundary.
const V_OFFSET: u8 = 27;

/// A 65-byte recoverable signature `[R | S | V]`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature(#[serde(with = "hex_serde")] pub [u8; 65]);

impl Signature {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 65]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 65] {
        &self.0
    }

    /// The recovery byte.
    pub const fn v(&self) -> u8 {
        self.0[64]
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}..)", &self.to_hex()[..16])
    }
}

impl TryFrom<&[u8]> for Signature {
    type Error = CoreError;

    fn try_from(slice: &[u8]) -> Result<Self> {
        let arr: [u8; 65] = slice.try_into().map_err(|_| CoreError::InvalidLength {
            expected: 65,
            actual: slice.len(),
        })?;
        Ok(Self(arr))
    }
}

/// Derive the on-chain address of a verifying key.
///
/// The address is the last 20 bytes of the Keccak-256 hash of the
/// uncompressed public key without its `0x04` tag.
pub fn address_of(key: &VerifyingKey) -> Address {
    let point = PublicKey::from(key).to_encoded_point(false);
    let digest = keccak256(&point.as_bytes()[1..]);
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&digest.as_bytes()[12..]);
    Address(addr)
}

/// Sign a 32-byte digest, producing a raw signature with `V ∈ {0, 1}`.
pub fn sign_digest(key: &SigningKey, digest: &Hash256) -> Result<Signature> {
    let (sig, recid) = key.sign_prehash_recoverable(digest.as_bytes())?;
    let mut out = [0u8; 65];
    out[..64].copy_from_slice(&sig.to_bytes());
    out[64] = recid.to_byte();
    Ok(Signature(out))
}

/// Recover the signer address of a raw signature (`V ∈ {0, 1}`).
pub fn recover_address(digest: &Hash256, signature: &Signature) -> Result<Address> {
    let recid = RecoveryId::from_byte(signature.v()).ok_or_else(|| {
        CoreError::InvalidSignature(format!("recovery byte {} out of range", signature.v()))
    })?;
    let sig = EcdsaSignature::from_slice(&signature.0[..64])
        .map_err(|e| CoreError::InvalidSignature(e.to_string()))?;
    let key = VerifyingKey::recover_from_prehash(digest.as_bytes(), &sig, recid)
        .map_err(|e| CoreError::InvalidSignature(e.to_string()))?;
    Ok(address_of(&key))
}

/// Rehash `data` with the Ethereum personal-message prefix.
///
/// Computes `keccak256("\x19Ethereum Signed Message:\n" || len(data) || data)`
/// where the length is written in decimal.
pub fn rehash_with_ethereum_prefix(data: &[u8]) -> Hash256 {
    let mut msg = Vec::with_capacity(ETHEREUM_MESSAGE_PREFIX.len() + 2 + data.len());
    msg.extend_from_slice(ETHEREUM_MESSAGE_PREFIX.as_bytes());
    msg.extend_from_slice(data.len().to_string().as_bytes());
    msg.extend_from_slice(data);
    keccak256(&msg)
}

/// Sign `hash` with the credentials attached to `identity`.
///
/// The hash is rehashed with the Ethereum prefix and the recovery byte is
/// moved into `{27, 28}`. The credentials are removed from the identity
/// before signing, so they are gone afterwards whether or not signing
/// succeeded.
pub fn sign_hash_eth(identity: &mut OffChainId, hash: &Hash256) -> Result<Signature> {
    let account = identity.on_chain_id;
    let credentials = identity
        .take_credentials()
        .ok_or(CoreError::CredentialsNotSet(account))?;

    let prefixed = rehash_with_ethereum_prefix(hash.as_bytes());
    let mut sig = credentials.sign_hash(&account, &prefixed)?;
    sig.0[64] += V_OFFSET;
    Ok(sig)
}

/// Verify an Ethereum-style signature over `hash` against `signer`.
///
/// Returns `Ok(false)` when the signature is well formed but recovers to a
/// different address, and an error when it is malformed.
pub fn verify_signature_eth(hash: &Hash256, signature: &Signature, signer: &Address) -> Result<bool> {
    let v = signature.v();
    if v != V_OFFSET && v != V_OFFSET + 1 {
        return Err(CoreError::InvalidSignature(format!(
            "recovery byte {} is not 27 or 28",
            v
        )));
    }
    let mut raw = *signature;
    raw.0[64] -= V_OFFSET;

    let prefixed = rehash_with_ethereum_prefix(hash.as_bytes());
    let recovered = recover_address(&prefixed, &raw)?;
    Ok(&recovered == signer)
}
