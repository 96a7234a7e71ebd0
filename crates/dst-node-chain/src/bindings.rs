//! Typed calls of the settlement and VPC contracts.

use dst_node_core::{
    Address, CoreError, Hash256, MscBaseStateSigned, Role, SessionId, Signature, VpcStateSigned,
};

use crate::client::{LogFilter, ReadCall};
use crate::error::Result;
use crate::events::EventKind;
use crate::tx::{ContractCall, TxPayload};

fn both_signatures<S>(signed: &dst_node_core::Signed<S>) -> Result<(Signature, Signature)> {
    let sender = signed
        .sign_sender
        .ok_or(CoreError::MissingSignature(Role::Sender))?;
    let receiver = signed
        .sign_receiver
        .ok_or(CoreError::MissingSignature(Role::Receiver))?;
    Ok((sender, receiver))
}

/// The multi-signature settlement contract of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsContract {
    address: Address,
}

impl MsContract {
    pub fn at(address: Address) -> Self {
        Self { address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn confirm(&self) -> TxPayload {
        self.call(ContractCall::Confirm)
    }

    /// Register a funding commitment carrying both signatures.
    pub fn state_register(&self, state: &MscBaseStateSigned) -> Result<TxPayload> {
        let (sign_sender, sign_receiver) = both_signatures(state)?;
        let base = &state.state;
        Ok(self.call(ContractCall::StateRegister {
            vpc_address: base.vpc_address,
            sid: base.sid,
            blocked_sender: base.blocked_sender,
            blocked_receiver: base.blocked_receiver,
            version: base.version,
            sign_sender,
            sign_receiver,
        }))
    }

    pub fn execute(&self, sender: Address, receiver: Address) -> TxPayload {
        self.call(ContractCall::Execute { sender, receiver })
    }

    pub fn filter(&self, kind: EventKind) -> LogFilter {
        LogFilter {
            address: self.address,
            kind,
        }
    }

    fn call(&self, call: ContractCall) -> TxPayload {
        TxPayload::Call {
            to: self.address,
            call,
        }
    }
}

/// The VPC contract shared by channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vpc {
    address: Address,
}

impl Vpc {
    pub fn at(address: Address) -> Self {
        Self { address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Submit the VPC state of session `sid` for closing.
    pub fn close(&self, sid: &SessionId, state: &VpcStateSigned) -> Result<TxPayload> {
        let (sign_sender, sign_receiver) = both_signatures(state)?;
        Ok(TxPayload::Call {
            to: self.address,
            call: ContractCall::VpcClose {
                sender: sid.addr_sender,
                receiver: sid.addr_receiver,
                sid: sid.complete()?,
                version: state.state.version,
                blocked_sender: state.state.blocked_sender,
                blocked_receiver: state.state.blocked_receiver,
                sign_sender,
                sign_receiver,
            },
        })
    }

    /// Query the on-chain record of VPC `id`.
    pub fn states(&self, id: Hash256) -> ReadCall {
        ReadCall::VpcStates { id }
    }

    pub fn filter(&self, kind: EventKind) -> LogFilter {
        LogFilter {
            address: self.address,
            kind,
        }
    }
}
