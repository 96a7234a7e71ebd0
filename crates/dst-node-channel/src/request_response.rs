//! Request, read and respond operations of the channel protocol.
//!
//! ## Message Flow
//!
//! ```text
//! Proposer                                   Responder
//!    |-- IdentityRequest {id} ----------------->|  identity_request / identity_read
//!    |<-------------------- IdentityResponse ---|  identity_respond
//!    |-- NewChannelRequest {checksum, ver} ---->|  Disconnected -> HandshakeProposed
//!    |<----------- NewChannelResponse {status} -|  -> SessionNegotiating
//!    |-- SessionIdRequest {sender half} ------->|
//!    |<------ SessionIdResponse {complete sid} -|  -> ContractsExchanging
//!    |-- ContractAddrRequest x3 --------------->|  LibSignatures, VPC, MSContract
//!    |<--------------- ContractAddrResponse x3 -|  -> StateNegotiating(0)
//!    |-- MscBaseStateRequest / VpcStateRequest >|  partially signed
//!    |<-------- ...Response {countersigned} ----|  -> StateNegotiating(v)
//! ```
//!
//! Every request carries status `require`. Responses carry `accept` or
//! `decline`; a decline on any handshake step closes the negotiation.
//! A requester rejects a response that altered what it sent.

use tokio::time::timeout;

use dst_node_core::{Address, ContractKind, MscBaseStateSigned, OffChainId, SessionId, VpcStateSigned};

use crate::error::{ChannelError, Result};
use crate::instance::Instance;
use crate::messages::{
    ChMessage, ChMsgPkt, JsonMsgContractAddr, JsonMsgIdentity, JsonMsgMscBaseState,
    JsonMsgNewChannel, JsonMsgSessionId, JsonMsgVpcState, MessageId, MessageStatus, VERSION,
};
use crate::status::HandshakePhase;

/// A peer's answer to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply<T> {
    pub value: T,
    pub status: MessageStatus,
    pub reason: String,
}

impl<T> Reply<T> {
    /// Whether the peer accepted.
    pub fn accepted(&self) -> bool {
        self.status == MessageStatus::Accept
    }
}

/// Unwrap the expected variant or fail with the id actually received.
macro_rules! expect_message {
    ($msg:expr, $variant:ident) => {
        match $msg {
            ChMessage::$variant(inner) => inner,
            other => {
                return Err(ChannelError::UnexpectedMessage {
                    expected: MessageId::$variant,
                    got: other.id(),
                })
            }
        }
    };
}

impl Instance {
    async fn send(&self, message: ChMessage) -> Result<()> {
        tracing::trace!(parent: &self.span, message_id = %message.id(), "send");
        let bytes = ChMsgPkt::new(message).encode()?;
        self.adapter.write(bytes).await
    }

    async fn receive(&self) -> Result<ChMessage> {
        let bytes = timeout(self.message_timeout, self.adapter.read())
            .await
            .map_err(|_| ChannelError::Timeout("waiting for peer message".into()))??;
        let pkt = ChMsgPkt::decode(&bytes)?;
        tracing::trace!(parent: &self.span, message_id = %pkt.body.id(), "received");
        Ok(pkt.body)
    }

    fn after_response(&mut self, status: MessageStatus, next: HandshakePhase) {
        self.phase = match status {
            MessageStatus::Accept => next,
            _ => HandshakePhase::Closed,
        };
    }

    // Identity

    /// Send this node's identity and return the peer's.
    pub async fn identity_request(&mut self) -> Result<OffChainId> {
        self.send(ChMessage::IdentityRequest(JsonMsgIdentity {
            id: self.self_id.clone(),
        }))
        .await?;
        let msg = expect_message!(self.receive().await?, IdentityResponse);
        self.set_peer_id(msg.id.clone());
        Ok(msg.id)
    }

    /// Read the identity a connecting peer sends first.
    pub async fn identity_read(&mut self) -> Result<OffChainId> {
        let msg = expect_message!(self.receive().await?, IdentityRequest);
        self.set_peer_id(msg.id.clone());
        Ok(msg.id)
    }

    /// Answer an identity request with this node's identity.
    pub async fn identity_respond(&self) -> Result<()> {
        self.send(ChMessage::IdentityResponse(JsonMsgIdentity {
            id: self.self_id.clone(),
        }))
        .await
    }

    // New channel

    /// Propose a channel using this instance's contract store.
    pub async fn new_channel_request(&mut self) -> Result<Reply<()>> {
        self.require_phase("new channel request", |p| p == HandshakePhase::Disconnected)?;
        let contract_store_version = self.contract_store.sha256_sum();
        self.send(ChMessage::NewChannelRequest(JsonMsgNewChannel {
            contract_store_version,
            msg_protocol_version: VERSION.to_owned(),
            status: MessageStatus::Require,
            reason: String::new(),
        }))
        .await?;
        self.phase = HandshakePhase::HandshakeProposed;

        let msg = expect_message!(self.receive().await?, NewChannelResponse);
        msg.status.require_response()?;
        if msg.contract_store_version != contract_store_version {
            return Err(ChannelError::ModifiedByPeer("contract store version"));
        }
        if msg.msg_protocol_version != VERSION {
            return Err(ChannelError::ModifiedByPeer("message protocol version"));
        }

        self.after_response(msg.status, HandshakePhase::SessionNegotiating);
        Ok(Reply {
            value: (),
            status: msg.status,
            reason: msg.reason,
        })
    }

    /// Read a channel proposal.
    pub async fn new_channel_read(&mut self) -> Result<JsonMsgNewChannel> {
        self.require_phase("new channel read", |p| p == HandshakePhase::Disconnected)?;
        let msg = expect_message!(self.receive().await?, NewChannelRequest);
        msg.status.require_request()?;
        self.phase = HandshakePhase::HandshakeProposed;
        Ok(msg)
    }

    /// Check a proposal against this node: `Err(reason)` to decline.
    pub fn check_new_channel(&self, request: &JsonMsgNewChannel) -> std::result::Result<(), String> {
        if request.msg_protocol_version != VERSION {
            return Err(format!(
                "unsupported message protocol version {}",
                request.msg_protocol_version
            ));
        }
        if request.contract_store_version != self.contract_store.sha256_sum() {
            return Err("contract store version mismatch".to_owned());
        }
        Ok(())
    }

    /// Answer a channel proposal, echoing its versions.
    pub async fn new_channel_respond(
        &mut self,
        request: &JsonMsgNewChannel,
        status: MessageStatus,
        reason: &str,
    ) -> Result<()> {
        self.require_phase("new channel respond", |p| p == HandshakePhase::HandshakeProposed)?;
        status.require_response()?;
        self.send(ChMessage::NewChannelResponse(JsonMsgNewChannel {
            contract_store_version: request.contract_store_version,
            msg_protocol_version: request.msg_protocol_version.clone(),
            status,
            reason: reason.to_owned(),
        }))
        .await?;
        self.after_response(status, HandshakePhase::SessionNegotiating);
        Ok(())
    }

    // Session ID

    /// Send the sender half and receive the completed session ID.
    ///
    /// On accept the returned ID is validated and stored.
    pub async fn session_id_request(&mut self, sid: &SessionId) -> Result<Reply<SessionId>> {
        self.require_phase("session id request", |p| p == HandshakePhase::SessionNegotiating)?;
        self.send(ChMessage::SessionIdRequest(JsonMsgSessionId {
            sid: sid.clone(),
            status: MessageStatus::Require,
        }))
        .await?;

        let msg = expect_message!(self.receive().await?, SessionIdResponse);
        msg.status.require_response()?;
        if !sid.equal_sender(&msg.sid) {
            return Err(ChannelError::ModifiedByPeer("session id sender part"));
        }
        if msg.status == MessageStatus::Accept {
            self.set_session_id(msg.sid.clone())?;
        }

        self.after_response(msg.status, HandshakePhase::ContractsExchanging);
        Ok(Reply {
            value: msg.sid,
            status: msg.status,
            reason: String::new(),
        })
    }

    /// Read the peer's session ID half.
    pub async fn session_id_read(&mut self) -> Result<SessionId> {
        self.require_phase("session id read", |p| p == HandshakePhase::SessionNegotiating)?;
        let msg = expect_message!(self.receive().await?, SessionIdRequest);
        msg.status.require_request()?;
        Ok(msg.sid)
    }

    /// Answer with the completed session ID.
    ///
    /// On accept the ID is validated and stored before it is sent.
    pub async fn session_id_respond(&mut self, sid: &SessionId, status: MessageStatus) -> Result<()> {
        self.require_phase("session id respond", |p| p == HandshakePhase::SessionNegotiating)?;
        status.require_response()?;
        if status == MessageStatus::Accept {
            self.set_session_id(sid.clone())?;
        }
        self.send(ChMessage::SessionIdResponse(JsonMsgSessionId {
            sid: sid.clone(),
            status,
        }))
        .await?;
        self.after_response(status, HandshakePhase::ContractsExchanging);
        Ok(())
    }

    // Contract addresses

    fn require_next_contract(&self, kind: ContractKind) -> Result<()> {
        match self.next_contract() {
            Some(next) if next == kind => Ok(()),
            next => Err(ChannelError::InvalidState(format!(
                "expected address of {}, got {kind}",
                next.map_or("no contract", ContractKind::name)
            ))),
        }
    }

    /// Hand over the address of a deployed contract.
    pub async fn contract_addr_request(
        &mut self,
        addr: Address,
        kind: ContractKind,
    ) -> Result<Reply<Address>> {
        self.require_phase("contract address request", |p| {
            p == HandshakePhase::ContractsExchanging
        })?;
        self.require_next_contract(kind)?;
        self.send(ChMessage::ContractAddrRequest(JsonMsgContractAddr {
            addr,
            contract_type: kind,
            status: MessageStatus::Require,
        }))
        .await?;

        let msg = expect_message!(self.receive().await?, ContractAddrResponse);
        msg.status.require_response()?;
        if msg.contract_type != kind {
            return Err(ChannelError::ModifiedByPeer("contract type"));
        }
        if msg.addr != addr {
            return Err(ChannelError::ModifiedByPeer("contract address"));
        }

        if msg.status == MessageStatus::Accept {
            self.mark_contract_exchanged();
        } else {
            self.phase = HandshakePhase::Closed;
        }
        Ok(Reply {
            value: msg.addr,
            status: msg.status,
            reason: String::new(),
        })
    }

    /// Read a contract address, which must be the next one in order.
    pub async fn contract_addr_read(&mut self) -> Result<(Address, ContractKind)> {
        self.require_phase("contract address read", |p| {
            p == HandshakePhase::ContractsExchanging
        })?;
        let msg = expect_message!(self.receive().await?, ContractAddrRequest);
        msg.status.require_request()?;
        self.require_next_contract(msg.contract_type)?;
        Ok((msg.addr, msg.contract_type))
    }

    /// Accept or decline a contract address.
    pub async fn contract_addr_respond(
        &mut self,
        addr: Address,
        kind: ContractKind,
        status: MessageStatus,
    ) -> Result<()> {
        self.require_phase("contract address respond", |p| {
            p == HandshakePhase::ContractsExchanging
        })?;
        status.require_response()?;
        self.send(ChMessage::ContractAddrResponse(JsonMsgContractAddr {
            addr,
            contract_type: kind,
            status,
        }))
        .await?;
        if status == MessageStatus::Accept {
            self.mark_contract_exchanged();
        } else {
            self.phase = HandshakePhase::Closed;
        }
        Ok(())
    }

    // MSC base state

    fn require_negotiating(&self, operation: &'static str) -> Result<()> {
        self.require_phase(operation, |p| matches!(p, HandshakePhase::StateNegotiating(_)))
    }

    /// Propose a partially signed funding commitment.
    ///
    /// On accept the countersigned state is verified and stored.
    pub async fn msc_base_state_request(
        &mut self,
        state: &MscBaseStateSigned,
    ) -> Result<Reply<MscBaseStateSigned>> {
        self.require_negotiating("msc base state request")?;
        self.send(ChMessage::MscBaseStateRequest(JsonMsgMscBaseState {
            signed_state_val: state.clone(),
            status: MessageStatus::Require,
            reason: String::new(),
        }))
        .await?;

        let msg = expect_message!(self.receive().await?, MscBaseStateResponse);
        msg.status.require_response()?;
        if msg.signed_state_val.state != state.state {
            return Err(ChannelError::ModifiedByPeer("msc base state"));
        }
        if msg.status == MessageStatus::Accept {
            self.set_msc_base_state(msg.signed_state_val.clone())?;
        }
        Ok(Reply {
            value: msg.signed_state_val,
            status: msg.status,
            reason: msg.reason,
        })
    }

    /// Read a proposed funding commitment.
    pub async fn msc_base_state_read(&mut self) -> Result<MscBaseStateSigned> {
        self.require_negotiating("msc base state read")?;
        let msg = expect_message!(self.receive().await?, MscBaseStateRequest);
        msg.status.require_request()?;
        Ok(msg.signed_state_val)
    }

    /// Answer a proposed funding commitment.
    ///
    /// To accept, `state` must carry both signatures; it is stored before
    /// the response is sent.
    pub async fn msc_base_state_respond(
        &mut self,
        state: &MscBaseStateSigned,
        status: MessageStatus,
        reason: &str,
    ) -> Result<()> {
        self.require_negotiating("msc base state respond")?;
        status.require_response()?;
        if status == MessageStatus::Accept {
            self.set_msc_base_state(state.clone())?;
        }
        self.send(ChMessage::MscBaseStateResponse(JsonMsgMscBaseState {
            signed_state_val: state.clone(),
            status,
            reason: reason.to_owned(),
        }))
        .await
    }

    // VPC state

    /// Propose a partially signed VPC state.
    ///
    /// On accept the countersigned state is validated and appended.
    pub async fn vpc_state_request(&mut self, state: &VpcStateSigned) -> Result<Reply<VpcStateSigned>> {
        self.require_negotiating("vpc state request")?;
        let confirmed = self.confirmed_version();
        if state.state.version <= confirmed {
            return Err(ChannelError::StaleVersion {
                received: state.state.version,
                confirmed,
            });
        }
        self.send(ChMessage::VpcStateRequest(JsonMsgVpcState {
            signed_state_val: state.clone(),
            status: MessageStatus::Require,
            reason: String::new(),
        }))
        .await?;

        let msg = expect_message!(self.receive().await?, VpcStateResponse);
        msg.status.require_response()?;
        if msg.signed_state_val.state != state.state {
            return Err(ChannelError::ModifiedByPeer("vpc state"));
        }
        if msg.status == MessageStatus::Accept {
            self.set_current_vpc_state(msg.signed_state_val.clone())?;
        }
        Ok(Reply {
            value: msg.signed_state_val,
            status: msg.status,
            reason: msg.reason,
        })
    }

    /// Read a proposed VPC state.
    pub async fn vpc_state_read(&mut self) -> Result<VpcStateSigned> {
        self.require_negotiating("vpc state read")?;
        let msg = expect_message!(self.receive().await?, VpcStateRequest);
        msg.status.require_request()?;
        Ok(msg.signed_state_val)
    }

    /// Answer a proposed VPC state.
    ///
    /// To accept, `state` must carry both signatures; it is appended
    /// before the response is sent.
    pub async fn vpc_state_respond(
        &mut self,
        state: &VpcStateSigned,
        status: MessageStatus,
        reason: &str,
    ) -> Result<()> {
        self.require_negotiating("vpc state respond")?;
        status.require_response()?;
        if status == MessageStatus::Accept {
            self.set_current_vpc_state(state.clone())?;
        }
        self.send(ChMessage::VpcStateResponse(JsonMsgVpcState {
            signed_state_val: state.clone(),
            status,
            reason: reason.to_owned(),
        }))
        .await
    }
}
