//! Contract events.
//!
//! The settlement contract emits six events over a channel's life and
//! the VPC contract two. Each has a payload type implementing
//! [`FromEvent`], so that watchers can hand out typed values.

use std::fmt;

use serde::{Deserialize, Serialize};

use dst_node_core::{Address, ContractKind, Hash256};

/// Kinds of watched contract events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    MscInitializing,
    MscInitialized,
    MscStateRegistering,
    MscStateRegistered,
    MscClosing,
    MscClosed,
    VpcClosing,
    VpcClosed,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::MscInitializing,
        EventKind::MscInitialized,
        EventKind::MscStateRegistering,
        EventKind::MscStateRegistered,
        EventKind::MscClosing,
        EventKind::MscClosed,
        EventKind::VpcClosing,
        EventKind::VpcClosed,
    ];

    /// Contract that emits events of this kind.
    pub const fn contract(self) -> ContractKind {
        match self {
            EventKind::VpcClosing | EventKind::VpcClosed => ContractKind::Vpc,
            _ => ContractKind::MsContract,
        }
    }

    /// Event name as declared by the contract.
    pub const fn name(self) -> &'static str {
        match self {
            EventKind::MscInitializing => "EventInitializing",
            EventKind::MscInitialized => "EventInitialized",
            EventKind::MscStateRegistering => "EventStateRegistering",
            EventKind::MscStateRegistered => "EventStateRegistered",
            EventKind::MscClosing => "EventClosing",
            EventKind::MscClosed => "EventClosed",
            EventKind::VpcClosing => "EventVpcClosing",
            EventKind::VpcClosed => "EventVpcClosed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.contract(), self.name())
    }
}

/// Settlement contract deployed for a pair of parties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MscInitializing {
    pub sender: Address,
    pub receiver: Address,
}

/// Both deposits are locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MscInitialized {
    pub cash_sender: u128,
    pub cash_receiver: u128,
}

/// One party registered the funding commitment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MscStateRegistering;

/// Both parties registered the funding commitment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MscStateRegistered {
    pub blocked_sender: u128,
    pub blocked_receiver: u128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MscClosing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MscClosed;

/// A first state was submitted for closing VPC `id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpcClosing {
    pub id: Hash256,
}

/// VPC `id` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpcClosed {
    pub id: Hash256,
    pub cash_sender: u128,
    pub cash_receiver: u128,
}

/// Any contract event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractEvent {
    MscInitializing(MscInitializing),
    MscInitialized(MscInitialized),
    MscStateRegistering(MscStateRegistering),
    MscStateRegistered(MscStateRegistered),
    MscClosing(MscClosing),
    MscClosed(MscClosed),
    VpcClosing(VpcClosing),
    VpcClosed(VpcClosed),
}

/// A mined event with its position on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLog {
    /// Emitting contract.
    pub address: Address,
    pub block_number: u64,
    pub tx_hash: Hash256,
    /// Index within the block.
    pub log_index: u64,
    pub event: ContractEvent,
}

/// Payload types that can be extracted from a [`ContractEvent`].
pub trait FromEvent: Sized + Send + 'static {
    const KIND: EventKind;

    /// Extract the payload, `None` for other kinds.
    fn from_event(event: ContractEvent) -> Option<Self>;
}

macro_rules! contract_events {
    ($($name:ident),* $(,)?) => {
        impl ContractEvent {
            pub fn kind(&self) -> EventKind {
                match self {
                    $(ContractEvent::$name(_) => EventKind::$name,)*
                }
            }
        }

        $(
            impl FromEvent for $name {
                const KIND: EventKind = EventKind::$name;

                fn from_event(event: ContractEvent) -> Option<Self> {
                    match event {
                        ContractEvent::$name(inner) => Some(inner),
                        _ => None,
                    }
                }
            }

            impl From<$name> for ContractEvent {
                fn from(inner: $name) -> Self {
                    ContractEvent::$name(inner)
                }
            }
        )*
    };
}

contract_events!(
    MscInitializing,
    MscInitialized,
    MscStateRegistering,
    MscStateRegistered,
    MscClosing,
    MscClosed,
    VpcClosing,
    VpcClosed,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_of_event() {
        let event = ContractEvent::from(VpcClosing {
            id: Hash256::from_bytes([1; 32]),
        });
        assert_eq!(event.kind(), EventKind::VpcClosing);
        assert_eq!(event.kind().contract(), ContractKind::Vpc);
        assert_eq!(EventKind::MscClosed.contract(), ContractKind::MsContract);
    }

    #[test]
    fn test_from_event_filters_kind() {
        let event = ContractEvent::from(MscInitialized {
            cash_sender: 1,
            cash_receiver: 2,
        });
        assert!(MscInitializing::from_event(event.clone()).is_none());
        assert_eq!(
            MscInitialized::from_event(event),
            Some(MscInitialized {
                cash_sender: 1,
                cash_receiver: 2
            })
        );
    }

    #[test]
    fn test_all_kinds_distinct() {
        let mut names: Vec<_> = EventKind::ALL.iter().map(|k| k.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), EventKind::ALL.len());
        assert_eq!(EventKind::MscInitializing.to_string(), "MSContract.EventInitializing");
    }
}
