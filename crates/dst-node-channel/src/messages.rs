//! Channel protocol messages.
//!
//! Every message travels in a [`ChMsgPkt`] encoded as JSON:
//!
//! ```text
//! {
//!   "version": "0.1",
//!   "body": { "message_id": "MsgSessionIdRequest", "message": { ... } },
//!   "timestamp": 1700000000000
//! }
//! ```

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use dst_node_core::{
    Address, ContractKind, Hash256, MscBaseStateSigned, OffChainId, SessionId, VpcStateSigned,
};

use crate::error::{ChannelError, Result};

/// Wire protocol version.
pub const VERSION: &str = "0.1";

/// Status of a request or response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Require,
    Accept,
    Decline,
    Unknown,
}

impl MessageStatus {
    /// Statuses a request may carry.
    pub const REQUEST: &'static [MessageStatus] = &[MessageStatus::Require];

    /// Statuses a response may carry.
    pub const RESPONSE: &'static [MessageStatus] = &[MessageStatus::Accept, MessageStatus::Decline];

    /// Check the status is valid for a request.
    pub fn require_request(self) -> Result<()> {
        if Self::REQUEST.contains(&self) {
            Ok(())
        } else {
            Err(ChannelError::InvalidStatus {
                status: self,
                context: "request",
            })
        }
    }

    /// Check the status is valid for a response.
    pub fn require_response(self) -> Result<()> {
        if Self::RESPONSE.contains(&self) {
            Ok(())
        } else {
            Err(ChannelError::InvalidStatus {
                status: self,
                context: "response",
            })
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageStatus::Require => "require",
            MessageStatus::Accept => "accept",
            MessageStatus::Decline => "decline",
            MessageStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Identity of a participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonMsgIdentity {
    pub id: OffChainId,
}

/// New channel proposal and its answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonMsgNewChannel {
    /// Checksum of the proposer's contract store.
    pub contract_store_version: Hash256,
    pub msg_protocol_version: String,
    pub status: MessageStatus,
    #[serde(default)]
    pub reason: String,
}

/// Session ID halves, and the combined ID in the response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonMsgSessionId {
    pub sid: SessionId,
    pub status: MessageStatus,
}

/// Address of one deployed contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonMsgContractAddr {
    pub addr: Address,
    pub contract_type: ContractKind,
    pub status: MessageStatus,
}

/// A funding commitment under negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonMsgMscBaseState {
    pub signed_state_val: MscBaseStateSigned,
    pub status: MessageStatus,
    #[serde(default)]
    pub reason: String,
}

/// A VPC state under negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonMsgVpcState {
    pub signed_state_val: VpcStateSigned,
    pub status: MessageStatus,
    #[serde(default)]
    pub reason: String,
}

/// Body of a channel packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_id", content = "message")]
pub enum ChMessage {
    #[serde(rename = "MsgIdentityRequest")]
    IdentityRequest(JsonMsgIdentity),
    #[serde(rename = "MsgIdentityResponse")]
    IdentityResponse(JsonMsgIdentity),
    #[serde(rename = "MsgNewChannelRequest")]
    NewChannelRequest(JsonMsgNewChannel),
    #[serde(rename = "MsgNewChannelResponse")]
    NewChannelResponse(JsonMsgNewChannel),
    #[serde(rename = "MsgSessionIdRequest")]
    SessionIdRequest(JsonMsgSessionId),
    #[serde(rename = "MsgSessionIdResponse")]
    SessionIdResponse(JsonMsgSessionId),
    #[serde(rename = "MsgContractAddrRequest")]
    ContractAddrRequest(JsonMsgContractAddr),
    #[serde(rename = "MsgContractAddrResponse")]
    ContractAddrResponse(JsonMsgContractAddr),
    #[serde(rename = "MsgMSCBaseStateRequest")]
    MscBaseStateRequest(JsonMsgMscBaseState),
    #[serde(rename = "MsgMSCBaseStateResponse")]
    MscBaseStateResponse(JsonMsgMscBaseState),
    #[serde(rename = "MsgVPCStateRequest")]
    VpcStateRequest(JsonMsgVpcState),
    #[serde(rename = "MsgVPCStateResponse")]
    VpcStateResponse(JsonMsgVpcState),
}

/// Identifier of a [`ChMessage`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    IdentityRequest,
    IdentityResponse,
    NewChannelRequest,
    NewChannelResponse,
    SessionIdRequest,
    SessionIdResponse,
    ContractAddrRequest,
    ContractAddrResponse,
    MscBaseStateRequest,
    MscBaseStateResponse,
    VpcStateRequest,
    VpcStateResponse,
}

impl MessageId {
    /// Wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            MessageId::IdentityRequest => "MsgIdentityRequest",
            MessageId::IdentityResponse => "MsgIdentityResponse",
            MessageId::NewChannelRequest => "MsgNewChannelRequest",
            MessageId::NewChannelResponse => "MsgNewChannelResponse",
            MessageId::SessionIdRequest => "MsgSessionIdRequest",
            MessageId::SessionIdResponse => "MsgSessionIdResponse",
            MessageId::ContractAddrRequest => "MsgContractAddrRequest",
            MessageId::ContractAddrResponse => "MsgContractAddrResponse",
            MessageId::MscBaseStateRequest => "MsgMSCBaseStateRequest",
            MessageId::MscBaseStateResponse => "MsgMSCBaseStateResponse",
            MessageId::VpcStateRequest => "MsgVPCStateRequest",
            MessageId::VpcStateResponse => "MsgVPCStateResponse",
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ChMessage {
    /// Identifier of this message.
    pub fn id(&self) -> MessageId {
        match self {
            ChMessage::IdentityRequest(_) => MessageId::IdentityRequest,
            ChMessage::IdentityResponse(_) => MessageId::IdentityResponse,
            ChMessage::NewChannelRequest(_) => MessageId::NewChannelRequest,
            ChMessage::NewChannelResponse(_) => MessageId::NewChannelResponse,
            ChMessage::SessionIdRequest(_) => MessageId::SessionIdRequest,
            ChMessage::SessionIdResponse(_) => MessageId::SessionIdResponse,
            ChMessage::ContractAddrRequest(_) => MessageId::ContractAddrRequest,
            ChMessage::ContractAddrResponse(_) => MessageId::ContractAddrResponse,
            ChMessage::MscBaseStateRequest(_) => MessageId::MscBaseStateRequest,
            ChMessage::MscBaseStateResponse(_) => MessageId::MscBaseStateResponse,
            ChMessage::VpcStateRequest(_) => MessageId::VpcStateRequest,
            ChMessage::VpcStateResponse(_) => MessageId::VpcStateResponse,
        }
    }
}

/// A versioned, timestamped channel packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChMsgPkt {
    pub version: String,
    pub body: ChMessage,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl ChMsgPkt {
    /// Wrap a message with the current version and time.
    pub fn new(body: ChMessage) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        Self {
            version: VERSION.to_owned(),
            body,
            timestamp,
        }
    }

    /// Serialize to JSON bytes.
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Parse JSON bytes, rejecting other protocol versions.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let pkt: ChMsgPkt = serde_json::from_slice(bytes)?;
        if pkt.version != VERSION {
            return Err(ChannelError::UnsupportedVersion(pkt.version));
        }
        Ok(pkt)
    }
}
