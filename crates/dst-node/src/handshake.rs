//! Channel handshake and funding.
//!
//! ## Proposer (sender)
//!
//! ```text
//! new channel -> session id -> deploy + hand over LibSignatures, VPC, MSContract
//!   -> confirm deposit -> propose funding commitment -> register it
//!   -> propose opening vpc state
//! ```
//!
//! ## Responder (receiver)
//!
//! ```text
//! check versions -> complete session id -> verify each contract address
//!   -> confirm deposit -> countersign funding commitment -> register it
//!   -> countersign opening vpc state
//! ```
//!
//! The opening VPC state (version 1) repeats the deposits, so a funded
//! channel can be closed before any payment.
//!
//! A decline at any step ends the handshake with [`NodeError::Declined`].

use dst_node_chain::MscInitializing;
use dst_node_channel::{ChannelStatus, MessageStatus};
use dst_node_core::{
    Address, ContractKind, MscBaseState, MscBaseStateSigned, Role, SessionId, Signed,
};

use crate::error::{NodeError, Result};
use crate::payment::PaymentChannel;

pub const STAGE_NEW_CHANNEL: &str = "new channel";
pub const STAGE_SESSION_ID: &str = "session id";
pub const STAGE_CONTRACT_ADDR: &str = "contract address";
pub const STAGE_MSC_BASE_STATE: &str = "msc base state";

impl PaymentChannel {
    /// Run the proposer side of the handshake, up to bound contracts.
    ///
    /// Deploys the contracts, reusing `lib_signatures` if it verifies.
    pub async fn propose(&mut self, lib_signatures: Option<Address>) -> Result<()> {
        let reply = self.instance.new_channel_request().await?;
        if !reply.accepted() {
            return Err(NodeError::Declined {
                stage: STAGE_NEW_CHANNEL,
                reason: reply.reason,
            });
        }
        self.advance(&[ChannelStatus::Setup])?;

        let (sender, receiver) = self.parties()?;
        let mut sid = SessionId::new(sender, receiver);
        sid.generate_sender_part(sender)?;
        let reply = self.instance.session_id_request(&sid).await?;
        if !reply.accepted() {
            return Err(NodeError::Declined {
                stage: STAGE_SESSION_ID,
                reason: reply.reason,
            });
        }
        tracing::info!(parent: &self.span, sid = %reply.value.complete()?, "session id agreed");

        self.party.arm(self.chain.owner_mut());
        let lib = self.chain.setup_lib_signatures(lib_signatures).await?;
        self.offer_contract(lib, ContractKind::LibSignatures).await?;

        self.party.arm(self.chain.owner_mut());
        let vpc = self.chain.deploy_vpc().await?;
        self.offer_contract(vpc, ContractKind::Vpc).await?;

        self.party.arm(self.chain.owner_mut());
        let ms = self.chain.deploy_ms_contract(sender, receiver).await?;
        self.offer_contract(ms, ContractKind::MsContract).await?;

        self.advance(&[ChannelStatus::Init])
    }

    async fn offer_contract(&mut self, addr: Address, kind: ContractKind) -> Result<()> {
        let reply = self.instance.contract_addr_request(addr, kind).await?;
        if !reply.accepted() {
            return Err(NodeError::Declined {
                stage: STAGE_CONTRACT_ADDR,
                reason: format!("{kind} at {addr} rejected by peer"),
            });
        }
        tracing::debug!(parent: &self.span, %kind, %addr, "contract address accepted");
        Ok(())
    }

    /// Run the responder side of the handshake, up to bound contracts.
    pub async fn accept(&mut self) -> Result<()> {
        let request = self.instance.new_channel_read().await?;
        if let Err(reason) = self.instance.check_new_channel(&request) {
            tracing::warn!(parent: &self.span, %reason, "declining new channel");
            self.instance
                .new_channel_respond(&request, MessageStatus::Decline, &reason)
                .await?;
            return Err(NodeError::Declined {
                stage: STAGE_NEW_CHANNEL,
                reason,
            });
        }
        self.instance
            .new_channel_respond(&request, MessageStatus::Accept, "")
            .await?;
        self.advance(&[ChannelStatus::Setup])?;

        let mut sid = self.instance.session_id_read().await?;
        let (sender, receiver) = self.parties()?;
        let completed = complete_session_id(&mut sid, sender, receiver);
        if let Err(err) = completed {
            self.instance
                .session_id_respond(&sid, MessageStatus::Decline)
                .await?;
            return Err(NodeError::Declined {
                stage: STAGE_SESSION_ID,
                reason: err.to_string(),
            });
        }
        self.instance
            .session_id_respond(&sid, MessageStatus::Accept)
            .await?;

        for _ in ContractKind::ALL {
            let (addr, kind) = self.instance.contract_addr_read().await?;
            if let Err(err) = self.chain.set_contract_addr(kind, addr).await {
                self.instance
                    .contract_addr_respond(addr, kind, MessageStatus::Decline)
                    .await?;
                return Err(NodeError::Declined {
                    stage: STAGE_CONTRACT_ADDR,
                    reason: err.to_string(),
                });
            }
            self.instance
                .contract_addr_respond(addr, kind, MessageStatus::Accept)
                .await?;
        }
        self.chain.start_watcher().await?;

        self.advance(&[ChannelStatus::Init])
    }

    /// Lock `deposit` and agree on the funding commitment.
    ///
    /// The sender proposes the commitment from the locked amounts, the
    /// receiver countersigns it; both register it. Ends in status `Open`.
    pub async fn fund(&mut self, deposit: u128) -> Result<()> {
        if self.instance.status() != ChannelStatus::Init {
            return Err(NodeError::InvalidState(format!(
                "fund in status {}",
                self.instance.status()
            )));
        }
        let timeout = self.event_timeout;
        let initializing = self
            .chain
            .events()?
            .ms_initializing
            .recv_timeout(timeout)
            .await?;
        check_initializing(&initializing, self.parties()?)?;
        tracing::debug!(
            parent: &self.span,
            sender = %initializing.sender,
            receiver = %initializing.receiver,
            "settlement contract initializing"
        );

        self.party.arm(self.chain.owner_mut());
        self.chain.confirm(deposit).await?;
        let initialized = self
            .chain
            .events()?
            .ms_initialized
            .recv_timeout(timeout)
            .await?;

        let base = match self.role() {
            Role::Sender => {
                let state = MscBaseState {
                    vpc_address: self.vpc_address()?,
                    sid: self.session_id()?.complete()?,
                    blocked_sender: initialized.cash_sender,
                    blocked_receiver: initialized.cash_receiver,
                    version: 1,
                };
                let mut signed = Signed::new(state);
                signed.add_sign(&mut self.party.armed(), Role::Sender)?;
                let reply = self.instance.msc_base_state_request(&signed).await?;
                if !reply.accepted() {
                    return Err(NodeError::Declined {
                        stage: STAGE_MSC_BASE_STATE,
                        reason: reply.reason,
                    });
                }
                reply.value
            }
            Role::Receiver => {
                let mut signed = self.instance.msc_base_state_read().await?;
                let expected = (initialized.cash_sender, initialized.cash_receiver);
                if let Err(reason) = self.check_base_state(&signed, expected) {
                    self.instance
                        .msc_base_state_respond(&signed, MessageStatus::Decline, &reason)
                        .await?;
                    return Err(NodeError::Declined {
                        stage: STAGE_MSC_BASE_STATE,
                        reason,
                    });
                }
                signed.add_sign(&mut self.party.armed(), Role::Receiver)?;
                self.instance
                    .msc_base_state_respond(&signed, MessageStatus::Accept, "")
                    .await?;
                // The sender registers first.
                self.chain
                    .events()?
                    .ms_state_registering
                    .recv_timeout(timeout)
                    .await?;
                signed
            }
        };

        self.party.arm(self.chain.owner_mut());
        self.chain.state_register(&base).await?;
        if self.role() == Role::Sender {
            self.chain
                .events()?
                .ms_state_registering
                .recv_timeout(timeout)
                .await?;
        }
        let registered = self
            .chain
            .events()?
            .ms_state_registered
            .recv_timeout(timeout)
            .await?;
        tracing::info!(
            parent: &self.span,
            blocked_sender = registered.blocked_sender,
            blocked_receiver = registered.blocked_receiver,
            "channel funded"
        );
        self.advance(&[ChannelStatus::Open])?;

        let opening = match self.role() {
            Role::Sender => {
                self.propose_state(registered.blocked_sender, registered.blocked_receiver)
                    .await?
            }
            Role::Receiver => self.respond_state().await?,
        };
        tracing::debug!(parent: &self.span, version = opening.state.version, "opening vpc state agreed");
        Ok(())
    }

    fn vpc_address(&self) -> Result<Address> {
        self.chain
            .vpc_addr()
            .ok_or_else(|| NodeError::InvalidState("vpc address not set".into()))
    }

    /// Check a proposed funding commitment: `Err(reason)` to decline.
    fn check_base_state(
        &self,
        signed: &MscBaseStateSigned,
        (cash_sender, cash_receiver): (u128, u128),
    ) -> std::result::Result<(), String> {
        self.instance
            .validate_incoming_msc_base_state(signed)
            .map_err(|err| err.to_string())?;
        let state = &signed.state;
        if Some(state.vpc_address) != self.chain.vpc_addr() {
            return Err(format!("unknown vpc contract {}", state.vpc_address));
        }
        if state.version != 1 {
            return Err(format!("funding commitment version {}", state.version));
        }
        if (state.blocked_sender, state.blocked_receiver) != (cash_sender, cash_receiver) {
            return Err("blocked amounts differ from deposits".into());
        }
        Ok(())
    }
}

/// The settlement contract must be initializing for this channel's parties.
fn check_initializing(event: &MscInitializing, (sender, receiver): (Address, Address)) -> Result<()> {
    if event.sender != sender || event.receiver != receiver {
        return Err(NodeError::InvalidState(format!(
            "settlement contract initializing for {} and {}",
            event.sender, event.receiver
        )));
    }
    Ok(())
}

/// Add the receiver half to a proposed session ID and complete it.
fn complete_session_id(sid: &mut SessionId, sender: Address, receiver: Address) -> Result<()> {
    if sid.addr_sender != sender || sid.addr_receiver != receiver {
        return Err(NodeError::InvalidState("session id of other parties".into()));
    }
    sid.generate_receiver_part(receiver)?;
    sid.generate_complete_sid()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dst_node_testkit::fixtures::{alice, bob, carol};

    #[test]
    fn test_complete_session_id() {
        let (alice, bob) = (alice(), bob());
        let mut sid = SessionId::new(alice.address(), bob.address());
        sid.generate_sender_part(alice.address()).unwrap();
        complete_session_id(&mut sid, alice.address(), bob.address()).unwrap();
        assert!(sid.validate().unwrap());
    }

    #[test]
    fn test_session_id_of_other_parties_is_refused() {
        let (alice, bob, carol) = (alice(), bob(), carol());
        let mut sid = SessionId::new(alice.address(), carol.address());
        sid.generate_sender_part(alice.address()).unwrap();
        let err = complete_session_id(&mut sid, alice.address(), bob.address()).unwrap_err();
        assert!(matches!(err, NodeError::InvalidState(_)));
        assert!(sid.sid_receiver_part.is_none());
    }

    #[test]
    fn test_initializing_for_other_parties_is_refused() {
        let (alice, bob, carol) = (alice(), bob(), carol());
        let parties = (alice.address(), bob.address());
        let ours = MscInitializing {
            sender: alice.address(),
            receiver: bob.address(),
        };
        check_initializing(&ours, parties).unwrap();

        let swapped = MscInitializing {
            sender: bob.address(),
            receiver: alice.address(),
        };
        let other = MscInitializing {
            sender: alice.address(),
            receiver: carol.address(),
        };
        for event in [swapped, other] {
            let err = check_initializing(&event, parties).unwrap_err();
            assert!(matches!(err, NodeError::InvalidState(_)), "{err}");
        }
    }
}
