//! Channel lifecycle status and handshake phase.
//!
//! The two are orthogonal: [`HandshakePhase`] tracks where the message
//! exchange with the peer stands, [`ChannelStatus`] tracks the channel's
//! life from setup through on-chain settlement.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    PreSetup,
    Setup,
    Init,
    Open,
    InConflict,
    Settled,
    WaitingToClose,
    VpcClosing,
    VpcClosed,
    Closed,
}

impl ChannelStatus {
    /// Statuses from which `self` may be entered.
    pub fn predecessors(self) -> &'static [ChannelStatus] {
        use ChannelStatus::*;
        match self {
            PreSetup => &[],
            Setup => &[PreSetup],
            Init => &[Setup],
            Open => &[Init],
            InConflict => &[Open, WaitingToClose],
            Settled => &[InConflict],
            WaitingToClose => &[Open],
            VpcClosing => &[Settled],
            VpcClosed => &[VpcClosing],
            Closed => &[Init, VpcClosing, VpcClosed, WaitingToClose],
        }
    }

    /// Whether `self -> to` is legal.
    pub fn can_transition_to(self, to: ChannelStatus) -> bool {
        to.predecessors().contains(&self)
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The user's preference for answering a close started by the peer.
///
/// The instance only records it; acting on it is up to the caller that
/// owns the chain side of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosingMode {
    /// Answer only when told to.
    #[default]
    Manual,
    /// Answer the peer's close with the latest state.
    AutoNormal,
    /// Answer on the first closing event of any channel contract.
    AutoImmediate,
}

/// Position in the channel handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakePhase {
    #[default]
    Disconnected,
    HandshakeProposed,
    SessionNegotiating,
    ContractsExchanging,
    /// Highest version both sides have signed.
    StateNegotiating(u64),
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ChannelStatus::*;

    const ALL: [ChannelStatus; 10] = [
        PreSetup,
        Setup,
        Init,
        Open,
        InConflict,
        Settled,
        WaitingToClose,
        VpcClosing,
        VpcClosed,
        Closed,
    ];

    #[test]
    fn test_happy_lifecycle() {
        let path = [PreSetup, Setup, Init, Open, WaitingToClose, Closed];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_conflict_lifecycle() {
        let path = [Open, InConflict, Settled, VpcClosing, VpcClosed, Closed];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]));
        }
    }

    #[test]
    fn test_rejected_transitions() {
        assert!(!PreSetup.can_transition_to(Open));
        assert!(!Closed.can_transition_to(Open));
        assert!(!Open.can_transition_to(Settled));
        assert!(!Settled.can_transition_to(Closed));
    }

    #[test]
    fn test_closing_mode_names() {
        assert_eq!(ClosingMode::default(), ClosingMode::Manual);
        assert_eq!(serde_json::to_string(&ClosingMode::AutoNormal).unwrap(), "\"auto_normal\"");
        let mode: ClosingMode = serde_json::from_str("\"auto_immediate\"").unwrap();
        assert_eq!(mode, ClosingMode::AutoImmediate);
    }

    #[test]
    fn test_pre_setup_is_initial() {
        for status in ALL {
            assert!(!status.can_transition_to(PreSetup));
        }
    }
}
