//! Hashing and tightly packed encoding.
//!
//! Signed channel states are hashed exactly the way the settlement
//! contracts hash them on-chain: fields are concatenated without padding
//! between them, addresses take 20 bytes and every integer takes a full
//! 32-byte big-endian word. The result is then hashed with Keccak-256.
//!
//! **CRITICAL**: the field order and widths used by callers of
//! [`PackedEncoder`] are FROZEN. Changing them invalidates every signature.

use sha2::Sha256;
use sha3::{Digest, Keccak256};

use crate::types::{Address, Hash256};

/// Keccak-256 of the given bytes.
pub fn keccak256(data: &[u8]) -> Hash256 {
    Hash256(Keccak256::digest(data).into())
}

/// SHA-256 of the given bytes.
pub fn sha256(data: &[u8]) -> Hash256 {
    Hash256(Sha256::digest(data).into())
}

/// Builder for packed encodings.
///
/// ```rust
/// use dst_node_core::{Address, PackedEncoder};
///
/// let digest = PackedEncoder::new()
///     .address(&Address::ZERO)
///     .uint(1u64)
///     .keccak();
/// assert_eq!(digest.as_bytes().len(), 32);
/// ```
#[derive(Debug, Default, Clone)]
pub struct PackedEncoder {
    buf: Vec<u8>,
}

impl PackedEncoder {
    /// Start an empty encoding.
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(160),
        }
    }

    /// Append a 20-byte address.
    pub fn address(mut self, addr: &Address) -> Self {
        self.buf.extend_from_slice(addr.as_bytes());
        self
    }

    /// Append a 32-byte value verbatim.
    pub fn bytes32(mut self, value: &Hash256) -> Self {
        self.buf.extend_from_slice(value.as_bytes());
        self
    }

    /// Append an unsigned integer as a 32-byte big-endian word.
    pub fn uint(mut self, value: impl Into<u128>) -> Self {
        self.buf.extend_from_slice(&[0u8; 16]);
        self.buf.extend_from_slice(&value.into().to_be_bytes());
        self
    }

    /// Append raw bytes.
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    /// The encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Keccak-256 of the encoded bytes.
    pub fn keccak(self) -> Hash256 {
        keccak256(&self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak_empty() {
        // Well-known Keccak-256 of the empty string.
        assert_eq!(
            keccak256(b"").to_hex(),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_sha256_known() {
        assert_eq!(
            sha256(b"abc").to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_uint_is_32_byte_word() {
        let bytes = PackedEncoder::new().uint(0x0102u64).into_bytes();
        assert_eq!(bytes.len(), 32);
        assert_eq!(bytes[30], 0x01);
        assert_eq!(bytes[31], 0x02);
        assert!(bytes[..30].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_packed_layout() {
        let addr = Address::from_bytes([0x11; 20]);
        let word = Hash256::from_bytes([0x22; 32]);
        let bytes = PackedEncoder::new()
            .address(&addr)
            .bytes32(&word)
            .uint(7u128)
            .into_bytes();
        assert_eq!(bytes.len(), 20 + 32 + 32);
        assert_eq!(&bytes[..20], addr.as_bytes());
        assert_eq!(&bytes[20..52], word.as_bytes());
        assert_eq!(bytes[83], 7);
    }
}
