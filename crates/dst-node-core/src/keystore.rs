//! Keystore abstraction.
//!
//! A keystore holds secp256k1 keys unlocked by a per-account password and
//! signs 32-byte digests with them. Keys never leave the keystore.

use k256::ecdsa::SigningKey;
use std::collections::HashMap;
use std::sync::RwLock;
use zeroize::Zeroizing;

use crate::error::{CoreError, Result};
use crate::signature::{address_of, sign_digest, Signature};
use crate::types::{Address, Hash256};

/// Signing capability backed by password-protected accounts.
///
/// Implementations must be thread-safe (Send + Sync).
pub trait Keystore: Send + Sync {
    /// Sign `digest` with the key of `account`.
    ///
    /// Returns a raw signature with `V ∈ {0, 1}`.
    fn sign_hash(&self, account: &Address, password: &str, digest: &Hash256) -> Result<Signature>;

    /// Whether the keystore holds a key for `account`.
    fn has_account(&self, account: &Address) -> bool;
}

struct LocalAccount {
    key: SigningKey,
    password: Zeroizing<String>,
}

/// In-memory keystore.
#[derive(Default)]
pub struct LocalKeystore {
    accounts: RwLock<HashMap<Address, LocalAccount>>,
}

impl LocalKeystore {
    /// Create an empty keystore.
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a new random account protected by `password`.
    pub fn generate_account(&self, password: &str) -> Address {
        let key = SigningKey::random(&mut rand::rngs::OsRng);
        self.insert(key, password)
    }

    /// Import a raw 32-byte secret key.
    pub fn import_key(&self, secret: &[u8; 32], password: &str) -> Result<Address> {
        let key = SigningKey::from_slice(secret)?;
        Ok(self.insert(key, password))
    }

    /// Number of accounts held.
    pub fn len(&self) -> usize {
        self.accounts
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Whether the keystore is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, key: SigningKey, password: &str) -> Address {
        let address = address_of(key.verifying_key());
        let account = LocalAccount {
            key,
            password: Zeroizing::new(password.to_owned()),
        };
        self.accounts
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(address, account);
        address
    }
}

impl Keystore for LocalKeystore {
    fn sign_hash(&self, account: &Address, password: &str, digest: &Hash256) -> Result<Signature> {
        let accounts = self
            .accounts
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = accounts
            .get(account)
            .ok_or(CoreError::UnknownAccount(*account))?;
        if entry.password.as_str() != password {
            return Err(CoreError::WrongPassword(*account));
        }
        sign_digest(&entry.key, digest)
    }

    fn has_account(&self, account: &Address) -> bool {
        self.accounts
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_account() {
        let ks = LocalKeystore::new();
        let a = ks.generate_account("a");
        let b = ks.generate_account("b");
        assert_ne!(a, b);
        assert_eq!(ks.len(), 2);
        assert!(ks.has_account(&a));
    }

    #[test]
    fn test_import_is_deterministic() {
        let ks1 = LocalKeystore::new();
        let ks2 = LocalKeystore::new();
        assert_eq!(
            ks1.import_key(&[7; 32], "x").unwrap(),
            ks2.import_key(&[7; 32], "y").unwrap()
        );
    }

    #[test]
    fn test_unknown_account() {
        let ks = LocalKeystore::new();
        let err = ks
            .sign_hash(&Address::ZERO, "pw", &Hash256::ZERO)
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownAccount(_)));
    }

    #[test]
    fn test_wrong_password() {
        let ks = LocalKeystore::new();
        let addr = ks.generate_account("right");
        let err = ks.sign_hash(&addr, "wrong", &Hash256::ZERO).unwrap_err();
        assert!(matches!(err, CoreError::WrongPassword(_)));
    }
}
