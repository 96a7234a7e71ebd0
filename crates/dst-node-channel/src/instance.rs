//! Channel instance: the per-peer protocol state.
//!
//! ## Overview
//!
//! An [`Instance`] owns one [`MessageChannel`] to a peer and everything the
//! two parties have agreed on over it: identities and roles, the session
//! ID, the funding commitment and the list of countersigned VPC states.
//!
//! The message exchanges live in [`crate::request_response`]; this module
//! holds the state they update and the checks every incoming state must
//! pass.
//!
//! ## Invariants
//!
//! - A session ID is stored only after it validates.
//! - The MSC base state is stored only with both signatures valid.
//! - Stored VPC states carry both signatures, strictly increasing versions
//!   and the same blocked total as the state before them.

use std::sync::Arc;
use std::time::Duration;

use tracing::Span;

use dst_node_core::{
    ContractKind, ContractStore, Hash256, MscBaseStateSigned, OffChainId, Role, SessionId,
    VpcStateSigned,
};

use crate::adapter::MessageChannel;
use crate::error::{ChannelError, Result};
use crate::status::{ChannelStatus, ClosingMode, HandshakePhase};

/// Protocol state of one channel to one peer.
pub struct Instance {
    pub(crate) adapter: Arc<dyn MessageChannel>,
    pub(crate) closing_mode: ClosingMode,
    pub(crate) self_id: OffChainId,
    pub(crate) peer_id: Option<OffChainId>,
    pub(crate) role_channel: Role,
    pub(crate) role_closing: Option<Role>,
    pub(crate) status: ChannelStatus,
    pub(crate) phase: HandshakePhase,
    pub(crate) contract_store: ContractStore,
    pub(crate) contracts_exchanged: usize,
    pub(crate) session_id: Option<SessionId>,
    pub(crate) msc_base_state: Option<MscBaseStateSigned>,
    pub(crate) vpc_states: Vec<VpcStateSigned>,
    pub(crate) message_timeout: Duration,
    pub(crate) span: Span,
}

impl Instance {
    /// Wrap a connected channel.
    pub fn new(
        adapter: Arc<dyn MessageChannel>,
        self_id: OffChainId,
        role_channel: Role,
        message_timeout: Duration,
        span: Span,
    ) -> Self {
        Self {
            adapter,
            closing_mode: ClosingMode::default(),
            self_id,
            peer_id: None,
            role_channel,
            role_closing: None,
            status: ChannelStatus::PreSetup,
            phase: HandshakePhase::Disconnected,
            contract_store: ContractStore::default(),
            contracts_exchanged: 0,
            session_id: None,
            msc_base_state: None,
            vpc_states: Vec::new(),
            message_timeout,
            span,
        }
    }

    /// Whether the underlying channel is usable.
    pub fn connected(&self) -> bool {
        self.adapter.connected()
    }

    /// Close the underlying channel.
    pub async fn close(&mut self) -> Result<()> {
        self.phase = HandshakePhase::Closed;
        self.adapter.close().await
    }

    pub fn adapter(&self) -> &Arc<dyn MessageChannel> {
        &self.adapter
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn closing_mode(&self) -> ClosingMode {
        self.closing_mode
    }

    pub fn set_closing_mode(&mut self, mode: ClosingMode) {
        self.closing_mode = mode;
    }

    pub fn self_id(&self) -> &OffChainId {
        &self.self_id
    }

    /// Mutable access, e.g. to attach credentials before signing.
    pub fn self_id_mut(&mut self) -> &mut OffChainId {
        &mut self.self_id
    }

    pub fn peer_id(&self) -> Option<&OffChainId> {
        self.peer_id.as_ref()
    }

    pub(crate) fn set_peer_id(&mut self, peer_id: OffChainId) {
        self.peer_id = Some(peer_id);
    }

    pub(crate) fn peer(&self) -> Result<&OffChainId> {
        self.peer_id
            .as_ref()
            .ok_or_else(|| ChannelError::InvalidState("peer identity not exchanged".into()))
    }

    pub fn role_channel(&self) -> Role {
        self.role_channel
    }

    pub fn set_role_channel(&mut self, role: Role) {
        self.role_channel = role;
    }

    /// Role in the closing procedure: sender if this party closes first.
    pub fn role_closing(&self) -> Option<Role> {
        self.role_closing
    }

    pub fn set_role_closing(&mut self, role: Role) {
        self.role_closing = Some(role);
    }

    /// Identity of the channel sender.
    pub fn sender_id(&self) -> Option<&OffChainId> {
        match self.role_channel {
            Role::Sender => Some(&self.self_id),
            Role::Receiver => self.peer_id.as_ref(),
        }
    }

    /// Identity of the channel receiver.
    pub fn receiver_id(&self) -> Option<&OffChainId> {
        match self.role_channel {
            Role::Receiver => Some(&self.self_id),
            Role::Sender => self.peer_id.as_ref(),
        }
    }

    fn parties(&self) -> Result<(&OffChainId, &OffChainId)> {
        match (self.sender_id(), self.receiver_id()) {
            (Some(sender), Some(receiver)) => Ok((sender, receiver)),
            _ => Err(ChannelError::InvalidState("peer identity not exchanged".into())),
        }
    }

    pub fn status(&self) -> ChannelStatus {
        self.status
    }

    /// Move to `status`. Illegal transitions leave the status unchanged.
    pub fn set_status(&mut self, status: ChannelStatus) -> Result<()> {
        if !self.status.can_transition_to(status) {
            return Err(ChannelError::InvalidStatusTransition {
                from: self.status,
                to: status,
            });
        }
        tracing::debug!(parent: &self.span, from = %self.status, to = %status, "channel status");
        self.status = status;
        Ok(())
    }

    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    pub(crate) fn require_phase(
        &self,
        operation: &'static str,
        allowed: impl Fn(HandshakePhase) -> bool,
    ) -> Result<()> {
        if allowed(self.phase) {
            Ok(())
        } else {
            Err(ChannelError::InvalidPhase {
                operation,
                phase: self.phase,
            })
        }
    }

    pub fn contract_store(&self) -> &ContractStore {
        &self.contract_store
    }

    pub fn set_contract_store(&mut self, store: ContractStore) {
        self.contract_store = store;
    }

    /// Contract whose address is exchanged next, if any.
    pub fn next_contract(&self) -> Option<ContractKind> {
        ContractKind::ALL.get(self.contracts_exchanged).copied()
    }

    pub(crate) fn mark_contract_exchanged(&mut self) {
        self.contracts_exchanged += 1;
        if self.next_contract().is_none() {
            self.phase = HandshakePhase::StateNegotiating(0);
        }
    }

    /// Validate and store the session ID.
    pub fn set_session_id(&mut self, session_id: SessionId) -> Result<()> {
        if !session_id.validate()? {
            return Err(ChannelError::InvalidSessionId);
        }
        self.session_id = Some(session_id);
        Ok(())
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    fn sid(&self) -> Result<Hash256> {
        let session = self
            .session_id
            .as_ref()
            .ok_or_else(|| ChannelError::InvalidState("session id not agreed".into()))?;
        Ok(session.complete()?)
    }

    /// Check a base state proposed by the peer: session and peer signature.
    pub fn validate_incoming_msc_base_state(&self, state: &MscBaseStateSigned) -> Result<()> {
        if state.state.sid != self.sid()? {
            return Err(ChannelError::InvalidState("base state for another session".into()));
        }
        if state.state.blocked_sender.checked_add(state.state.blocked_receiver).is_none() {
            return Err(ChannelError::InvalidState("blocked amounts overflow".into()));
        }
        let peer_role = self.role_channel.peer();
        if !state.verify_sign(&self.peer()?.on_chain_id, peer_role)? {
            return Err(ChannelError::InvalidState("invalid peer signature".into()));
        }
        Ok(())
    }

    /// Store the funding commitment once both signatures verify.
    pub fn set_msc_base_state(&mut self, state: MscBaseStateSigned) -> Result<()> {
        let (sender, receiver) = self.parties()?;
        state.require_signatures(&sender.on_chain_id, &receiver.on_chain_id)?;
        tracing::debug!(parent: &self.span, version = state.state.version, "msc base state set");
        self.msc_base_state = Some(state);
        Ok(())
    }

    pub fn msc_base_state(&self) -> Option<&MscBaseStateSigned> {
        self.msc_base_state.as_ref()
    }

    /// Highest version both parties have signed, zero before the first.
    pub fn confirmed_version(&self) -> u64 {
        self.vpc_states.last().map_or(0, |s| s.state.version)
    }

    fn check_version(&self, version: u64) -> Result<()> {
        let confirmed = self.confirmed_version();
        if version <= confirmed {
            return Err(ChannelError::StaleVersion {
                received: version,
                confirmed,
            });
        }
        Ok(())
    }

    /// Blocked total the next state must carry, if one is fixed yet.
    fn expected_total(&self) -> Option<u128> {
        if let Some(last) = self.vpc_states.last() {
            return last.state.total();
        }
        self.msc_base_state.as_ref().and_then(|base| {
            base.state
                .blocked_sender
                .checked_add(base.state.blocked_receiver)
        })
    }

    fn check_body(&self, state: &VpcStateSigned) -> Result<()> {
        if let Some(session) = &self.session_id {
            if state.state.id != session.vpc_id()? {
                return Err(ChannelError::InvalidState("state for another channel".into()));
            }
        }
        self.check_version(state.state.version)?;
        let total = state
            .state
            .total()
            .ok_or_else(|| ChannelError::InvalidState("blocked amounts overflow".into()))?;
        if let Some(expected) = self.expected_total() {
            if total != expected {
                return Err(ChannelError::InvalidState(format!(
                    "blocked total {total} differs from {expected}"
                )));
            }
        }
        Ok(())
    }

    /// Check a state proposed by the peer before countersigning it.
    ///
    /// Only the peer's signature is required.
    pub fn validate_incoming_state(&self, state: &VpcStateSigned) -> Result<()> {
        let peer_role = self.role_channel.peer();
        if !state.verify_sign(&self.peer()?.on_chain_id, peer_role)? {
            return Err(ChannelError::InvalidState("invalid peer signature".into()));
        }
        self.check_body(state)
    }

    /// Check a fully signed state.
    pub fn validate_full_state(&self, state: &VpcStateSigned) -> Result<()> {
        let (sender, receiver) = self.parties()?;
        if !state.verify_sign(&sender.on_chain_id, Role::Sender)? {
            return Err(ChannelError::InvalidState("invalid sender signature".into()));
        }
        if !state.verify_sign(&receiver.on_chain_id, Role::Receiver)? {
            return Err(ChannelError::InvalidState("invalid receiver signature".into()));
        }
        self.check_body(state)
    }

    /// Append a fully validated state.
    pub fn set_current_vpc_state(&mut self, state: VpcStateSigned) -> Result<()> {
        self.validate_full_state(&state)?;
        let version = state.state.version;
        self.vpc_states.push(state);
        if let HandshakePhase::StateNegotiating(_) = self.phase {
            self.phase = HandshakePhase::StateNegotiating(version);
        }
        tracing::debug!(parent: &self.span, version, "vpc state set");
        Ok(())
    }

    /// Latest countersigned state.
    pub fn current_vpc_state(&self) -> Option<&VpcStateSigned> {
        self.vpc_states.last()
    }

    /// Every countersigned state, oldest first.
    pub fn vpc_states(&self) -> &[VpcStateSigned] {
        &self.vpc_states
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("self_id", &self.self_id)
            .field("peer_id", &self.peer_id)
            .field("role_channel", &self.role_channel)
            .field("status", &self.status)
            .field("phase", &self.phase)
            .field("vpc_states", &self.vpc_states.len())
            .finish_non_exhaustive()
    }
}
