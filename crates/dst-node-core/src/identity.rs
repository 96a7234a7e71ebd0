//! Off-chain participant identities.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use zeroize::Zeroizing;

use crate::error::{CoreError, Result};
use crate::keystore::Keystore;
use crate::signature::Signature;
use crate::types::{Address, Hash256};

/// Signing credentials: a keystore handle and the account password.
///
/// Never serialized; `Debug` output is redacted.
#[derive(Clone)]
pub struct Credentials {
    keystore: Arc<dyn Keystore>,
    password: Zeroizing<String>,
}

impl Credentials {
    /// Bundle a keystore with a password.
    pub fn new(keystore: Arc<dyn Keystore>, password: &str) -> Self {
        Self {
            keystore,
            password: Zeroizing::new(password.to_owned()),
        }
    }

    /// Sign a digest for `account` (raw signature, `V ∈ {0, 1}`).
    pub fn sign_hash(&self, account: &Address, digest: &Hash256) -> Result<Signature> {
        self.keystore.sign_hash(account, &self.password, digest)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credentials(<redacted>)")
    }
}

/// Identity of a channel participant.
///
/// Carries the on-chain address, where the participant listens for
/// off-chain connections, and optionally signing credentials. Signing
/// consumes the credentials; they must be set again before the next
/// signing operation.
#[derive(Clone, Serialize, Deserialize)]
pub struct OffChainId {
    /// On-chain account address.
    pub on_chain_id: Address,
    /// Listener address as `host:port`.
    pub listener_ip_addr: String,
    /// Listener endpoint path.
    pub listener_endpoint: String,
    #[serde(skip)]
    credentials: Option<Credentials>,
}

impl OffChainId {
    /// Create an identity without credentials.
    pub fn new(
        on_chain_id: Address,
        listener_ip_addr: impl Into<String>,
        listener_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            on_chain_id,
            listener_ip_addr: listener_ip_addr.into(),
            listener_endpoint: listener_endpoint.into(),
            credentials: None,
        }
    }

    /// Attach signing credentials.
    pub fn set_credentials(&mut self, keystore: Arc<dyn Keystore>, password: &str) {
        self.credentials = Some(Credentials::new(keystore, password));
    }

    /// Attach an existing credentials bundle.
    pub fn set_credentials_from(&mut self, credentials: Credentials) {
        self.credentials = Some(credentials);
    }

    /// The attached credentials, if any.
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Remove and return the credentials.
    pub fn take_credentials(&mut self) -> Option<Credentials> {
        self.credentials.take()
    }

    /// Drop any attached credentials.
    pub fn clear_credentials(&mut self) {
        self.credentials = None;
    }

    /// Whether credentials are attached.
    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    /// Local bind address for the listener: `localhost:<port>`.
    pub fn listener_local_addr(&self) -> Result<String> {
        let (_, port) = self
            .listener_ip_addr
            .rsplit_once(':')
            .ok_or_else(|| CoreError::InvalidListenerAddr(self.listener_ip_addr.clone()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| CoreError::InvalidListenerAddr(self.listener_ip_addr.clone()))?;
        Ok(format!("localhost:{}", port))
    }
}

impl PartialEq for OffChainId {
    /// Identities are equal when on-chain ID and listener address match.
    fn eq(&self, other: &Self) -> bool {
        self.on_chain_id == other.on_chain_id && self.listener_ip_addr == other.listener_ip_addr
    }
}

impl Eq for OffChainId {}

impl fmt::Debug for OffChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OffChainId")
            .field("on_chain_id", &self.on_chain_id)
            .field("listener_ip_addr", &self.listener_ip_addr)
            .field("listener_endpoint", &self.listener_endpoint)
            .field("has_credentials", &self.has_credentials())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::LocalKeystore;

    fn sample() -> OffChainId {
        OffChainId::new(Address::from_bytes([1; 20]), "127.0.0.1:9605", "/")
    }

    #[test]
    fn test_credentials_not_serialized() {
        let mut id = sample();
        id.set_credentials(Arc::new(LocalKeystore::new()), "hunter2");
        let json = serde_json::to_string(&id).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(!json.contains("credentials"));

        let back: OffChainId = serde_json::from_str(&json).unwrap();
        assert!(!back.has_credentials());
        assert_eq!(back, id);
    }

    #[test]
    fn test_debug_redacts() {
        let mut id = sample();
        id.set_credentials(Arc::new(LocalKeystore::new()), "hunter2");
        let debug = format!("{:?} {:?}", id, id.credentials());
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn test_listener_local_addr() {
        assert_eq!(sample().listener_local_addr().unwrap(), "localhost:9605");

        let bad = OffChainId::new(Address::ZERO, "no-port", "/");
        assert!(bad.listener_local_addr().is_err());
    }

    #[test]
    fn test_equality_ignores_endpoint() {
        let a = sample();
        let mut b = sample();
        b.listener_endpoint = "/other".into();
        assert_eq!(a, b);

        b.listener_ip_addr = "127.0.0.1:1".into();
        assert_ne!(a, b);
    }

    #[test]
    fn test_clear_credentials() {
        let mut id = sample();
        id.set_credentials(Arc::new(LocalKeystore::new()), "pw");
        assert!(id.has_credentials());
        id.clear_credentials();
        assert!(!id.has_credentials());
    }
}
