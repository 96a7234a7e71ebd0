//! # DST Node Channel
//!
//! Off-chain channel layer: the byte-level [`MessageChannel`], the JSON
//! wire messages, and the per-peer protocol [`Instance`].
//!
//! ## Overview
//!
//! ```text
//! Instance (handshake phases, signed states)
//!    |  ChMsgPkt (JSON)
//! MessageChannel  <- GenericChannelAdapter (read/write handler tasks)
//!    |  Frame
//! FrameSink / FrameSource  <- TCP (length-delimited) or in-memory
//! ```
//!
//! Incoming connections are accepted by a [`Listener`]; outgoing ones are
//! opened with [`new_channel`]. Both exchange identities before the
//! instance is handed out.

pub mod adapter;
pub mod conn_state;
pub mod error;
pub mod frame;
pub mod instance;
pub mod listener;
pub mod messages;
pub mod request_response;
pub mod status;
pub mod tcp;

pub use adapter::{AdapterConfig, GenericChannelAdapter, MessageChannel};
pub use conn_state::{ConnState, ConnectionState};
pub use error::{ChannelError, Result};
pub use frame::{Frame, FrameSink, FrameSource};
pub use instance::Instance;
pub use listener::{new_channel, new_session, ChannelConfig, Incoming, Listener, ListenerConfig};
pub use messages::{ChMessage, ChMsgPkt, MessageId, MessageStatus, VERSION};
pub use request_response::Reply;
pub use status::{ChannelStatus, ClosingMode, HandshakePhase};
