//! A payment channel: the off-chain instance and the settlement
//! contracts behind it.
//!
//! ## Lifecycle
//!
//! ```text
//! PreSetup --handshake--> Setup --contracts--> Init --funding--> Open
//!    Open --state rounds--> Open
//!    Open --close--> ... --> VpcClosed --execute--> Closed
//! ```
//!
//! The handshake lives in [`crate::handshake`], closing in
//! [`crate::settlement`]. This module holds the channel itself and the
//! state rounds.

use std::time::Duration;

use tracing::Span;

use dst_node_chain::BlockchainInstance;
use dst_node_channel::{ChannelStatus, Instance, MessageStatus};
use dst_node_core::{Address, Role, SessionId, Signed, VpcState, VpcStateSigned};

use crate::error::{NodeError, Result};
use crate::party::Party;

/// Stage name of a declined state round.
pub const STAGE_VPC_STATE: &str = "vpc state";

/// One channel to one peer.
pub struct PaymentChannel {
    pub(crate) instance: Instance,
    pub(crate) chain: BlockchainInstance,
    pub(crate) party: Party,
    pub(crate) event_timeout: Duration,
    pub(crate) span: Span,
}

impl PaymentChannel {
    /// Pair an identified connection with a chain instance of the same
    /// owner.
    pub fn new(
        instance: Instance,
        chain: BlockchainInstance,
        party: Party,
        event_timeout: Duration,
        span: Span,
    ) -> Self {
        Self {
            instance,
            chain,
            party,
            event_timeout,
            span,
        }
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn instance_mut(&mut self) -> &mut Instance {
        &mut self.instance
    }

    pub fn chain(&self) -> &BlockchainInstance {
        &self.chain
    }

    pub fn chain_mut(&mut self) -> &mut BlockchainInstance {
        &mut self.chain
    }

    pub fn role(&self) -> Role {
        self.instance.role_channel()
    }

    pub fn status(&self) -> ChannelStatus {
        self.instance.status()
    }

    pub fn session_id(&self) -> Result<&SessionId> {
        self.instance
            .session_id()
            .ok_or_else(|| NodeError::InvalidState("session id not agreed".into()))
    }

    /// Latest countersigned VPC state.
    pub fn current_state(&self) -> Option<&VpcStateSigned> {
        self.instance.current_vpc_state()
    }

    /// Addresses of sender and receiver.
    pub fn parties(&self) -> Result<(Address, Address)> {
        match (self.instance.sender_id(), self.instance.receiver_id()) {
            (Some(sender), Some(receiver)) => Ok((sender.on_chain_id, receiver.on_chain_id)),
            _ => Err(NodeError::InvalidState("peer identity not exchanged".into())),
        }
    }

    /// Current balances of sender and receiver: the latest VPC state, or
    /// the funding commitment before the first round.
    pub fn balances(&self) -> Result<(u128, u128)> {
        if let Some(state) = self.instance.current_vpc_state() {
            return Ok((state.state.blocked_sender, state.state.blocked_receiver));
        }
        self.instance
            .msc_base_state()
            .map(|base| (base.state.blocked_sender, base.state.blocked_receiver))
            .ok_or_else(|| NodeError::InvalidState("channel not funded".into()))
    }

    /// Move through `path`, one legal transition at a time.
    pub(crate) fn advance(&mut self, path: &[ChannelStatus]) -> Result<()> {
        for status in path {
            if self.instance.status() != *status {
                self.instance.set_status(*status)?;
            }
        }
        Ok(())
    }

    fn require_open(&self, operation: &str) -> Result<()> {
        match self.instance.status() {
            ChannelStatus::Open => Ok(()),
            status => Err(NodeError::InvalidState(format!(
                "{operation} in status {status}"
            ))),
        }
    }

    // -------------------------------------------------------------------------
    // State rounds
    // -------------------------------------------------------------------------

    /// Pay `amount` to the peer.
    pub async fn transfer(&mut self, amount: u128) -> Result<VpcStateSigned> {
        let (sender, receiver) = pay(self.balances()?, self.role(), amount)
            .ok_or_else(|| NodeError::InvalidState(format!("balance too low to pay {amount}")))?;
        self.propose_state(sender, receiver).await
    }

    /// Propose the next VPC state with the given balances.
    ///
    /// Returns the countersigned state, which is then the current one.
    pub async fn propose_state(
        &mut self,
        blocked_sender: u128,
        blocked_receiver: u128,
    ) -> Result<VpcStateSigned> {
        self.require_open("propose state")?;
        let state = VpcState {
            id: self.session_id()?.vpc_id()?,
            version: self.instance.confirmed_version() + 1,
            blocked_sender,
            blocked_receiver,
        };
        let mut signed = Signed::new(state);
        signed.add_sign(&mut self.party.armed(), self.role())?;

        let reply = self.instance.vpc_state_request(&signed).await?;
        if !reply.accepted() {
            return Err(NodeError::Declined {
                stage: STAGE_VPC_STATE,
                reason: reply.reason,
            });
        }
        tracing::debug!(
            parent: &self.span,
            version = reply.value.state.version,
            blocked_sender,
            blocked_receiver,
            "vpc state agreed"
        );
        Ok(reply.value)
    }

    /// Read the peer's next VPC state, countersign it if it is valid.
    ///
    /// A state that fails validation or lowers this party's balance is
    /// declined with the reason.
    pub async fn respond_state(&mut self) -> Result<VpcStateSigned> {
        self.require_open("respond state")?;
        let mut state = self.instance.vpc_state_read().await?;
        if let Err(reason) = self.check_incoming_state(&state) {
            tracing::warn!(parent: &self.span, %reason, "declining vpc state");
            self.instance
                .vpc_state_respond(&state, MessageStatus::Decline, &reason)
                .await?;
            return Err(NodeError::Declined {
                stage: STAGE_VPC_STATE,
                reason,
            });
        }
        state.add_sign(&mut self.party.armed(), self.role())?;
        self.instance
            .vpc_state_respond(&state, MessageStatus::Accept, "")
            .await?;
        tracing::debug!(parent: &self.span, version = state.state.version, "vpc state countersigned");
        Ok(state)
    }

    /// `Err(reason)` to decline a proposed state.
    fn check_incoming_state(&self, signed: &VpcStateSigned) -> std::result::Result<(), String> {
        self.instance
            .validate_incoming_state(signed)
            .map_err(|err| err.to_string())?;
        let current = self.balances().map_err(|err| err.to_string())?;
        let proposed = (signed.state.blocked_sender, signed.state.blocked_receiver);
        if !keeps_own_share(current, proposed, self.role()) {
            return Err("proposal lowers own balance".into());
        }
        Ok(())
    }

    /// Close the off-chain connection.
    pub async fn disconnect(&mut self) -> Result<()> {
        self.instance.close().await?;
        Ok(())
    }

    /// Close the connection after a failed step, logging instead of failing.
    pub(crate) async fn abort(&mut self, err: &NodeError) {
        tracing::warn!(parent: &self.span, error = %err, "channel aborted");
        if let Err(close_err) = self.instance.close().await {
            tracing::debug!(parent: &self.span, error = %close_err, "close after abort failed");
        }
    }
}

/// Balances after `payer` moved `amount` to its peer; `None` on overdraft.
fn pay((sender, receiver): (u128, u128), payer: Role, amount: u128) -> Option<(u128, u128)> {
    match payer {
        Role::Sender => Some((sender.checked_sub(amount)?, receiver.checked_add(amount)?)),
        Role::Receiver => Some((sender.checked_add(amount)?, receiver.checked_sub(amount)?)),
    }
}

/// Whether `own` loses nothing moving from `current` to `proposed`.
/// Only the payer may propose a lower balance for itself.
fn keeps_own_share(current: (u128, u128), proposed: (u128, u128), own: Role) -> bool {
    match own {
        Role::Sender => proposed.0 >= current.0,
        Role::Receiver => proposed.1 >= current.1,
    }
}

impl std::fmt::Debug for PaymentChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentChannel")
            .field("instance", &self.instance)
            .field("chain", &self.chain)
            .field("party", &self.party.address())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dst_node_testkit::generators::balances;
    use proptest::prelude::*;

    #[test]
    fn test_pay_moves_towards_peer() {
        assert_eq!(pay((10, 5), Role::Sender, 3), Some((7, 8)));
        assert_eq!(pay((10, 5), Role::Receiver, 5), Some((15, 0)));
        assert_eq!(pay((10, 5), Role::Receiver, 6), None);
        assert_eq!(pay((u128::MAX, 1), Role::Receiver, 1), None);
    }

    #[test]
    fn test_only_the_payer_lowers_its_share() {
        // Sender pays 3.
        assert!(keeps_own_share((10, 5), (7, 8), Role::Receiver));
        assert!(!keeps_own_share((10, 5), (7, 8), Role::Sender));
        // Receiver pays 5.
        assert!(keeps_own_share((10, 5), (15, 0), Role::Sender));
        assert!(!keeps_own_share((10, 5), (15, 0), Role::Receiver));
        assert!(keeps_own_share((10, 5), (10, 5), Role::Sender));
        assert!(keeps_own_share((10, 5), (10, 5), Role::Receiver));
    }

    proptest! {
        #[test]
        fn test_pay_conserves_total((sender, receiver) in balances(), amount in 0u128..=u64::MAX as u128) {
            for payer in [Role::Sender, Role::Receiver] {
                let funds = match payer {
                    Role::Sender => sender,
                    Role::Receiver => receiver,
                };
                match pay((sender, receiver), payer, amount) {
                    Some((s, r)) => {
                        prop_assert!(amount <= funds);
                        prop_assert_eq!(s + r, sender + receiver);
                    }
                    None => prop_assert!(amount > funds),
                }
            }
        }
    }
}
