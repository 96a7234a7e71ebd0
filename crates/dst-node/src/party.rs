//! The local participant: identity plus the credentials it signs with.

use std::sync::Arc;

use dst_node_core::{Address, Credentials, Keystore, OffChainId};

/// This node's participant.
///
/// Identities handed to the channel and chain layers never carry
/// credentials; [`arm`](Party::arm) attaches them for exactly one signing
/// operation.
#[derive(Debug, Clone)]
pub struct Party {
    id: OffChainId,
    credentials: Credentials,
}

impl Party {
    pub fn new(mut id: OffChainId, keystore: Arc<dyn Keystore>, password: &str) -> Self {
        id.clear_credentials();
        Self {
            id,
            credentials: Credentials::new(keystore, password),
        }
    }

    /// Identity without credentials.
    pub fn id(&self) -> &OffChainId {
        &self.id
    }

    pub(crate) fn id_mut(&mut self) -> &mut OffChainId {
        &mut self.id
    }

    pub fn address(&self) -> Address {
        self.id.on_chain_id
    }

    /// Attach credentials to `id` for its next signing operation.
    pub fn arm(&self, id: &mut OffChainId) {
        id.set_credentials_from(self.credentials.clone());
    }

    /// A copy of the identity ready to sign once.
    pub fn armed(&self) -> OffChainId {
        let mut id = self.id.clone();
        self.arm(&mut id);
        id
    }
}
