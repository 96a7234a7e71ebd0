//! Atomic connection state.
//!
//! ```text
//! Disconnected --connect--> Connected --begin_close--> Closing --finish_close--> Closed
//!       \______________________________________________________________________/^
//!                                    abandon
//! ```

use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::{ChannelError, Result};

/// State of a message channel's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connected = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::Disconnected,
            1 => ConnectionState::Connected,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }

    /// Whether `self -> to` is a legal transition.
    pub fn can_transition_to(self, to: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, to),
            (Disconnected, Connected)
                | (Disconnected, Closed)
                | (Connected, Closing)
                | (Closing, Closed)
        )
    }
}

/// Lock-free holder of a [`ConnectionState`].
#[derive(Debug)]
pub struct ConnState(AtomicU8);

impl ConnState {
    /// Start in the given state.
    pub fn new(initial: ConnectionState) -> Self {
        Self(AtomicU8::new(initial as u8))
    }

    /// Current state.
    pub fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Whether the connection is usable.
    pub fn is_connected(&self) -> bool {
        self.load() == ConnectionState::Connected
    }

    /// Atomically move from `from` to `to`.
    ///
    /// Fails with the actual state if it was not `from` or the transition
    /// is not legal.
    pub fn transition(
        &self,
        from: ConnectionState,
        to: ConnectionState,
    ) -> std::result::Result<(), ConnectionState> {
        if !from.can_transition_to(to) {
            return Err(self.load());
        }
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(ConnectionState::from_u8)
    }

    /// Disconnected -> Connected.
    pub fn connect(&self) -> Result<()> {
        self.transition(ConnectionState::Disconnected, ConnectionState::Connected)
            .map_err(|_| ChannelError::AlreadyClosed)
    }

    /// Connected -> Closing. Only one caller wins.
    pub fn begin_close(&self) -> Result<()> {
        self.transition(ConnectionState::Connected, ConnectionState::Closing)
            .map_err(|_| ChannelError::AlreadyClosed)
    }

    /// Closing -> Closed.
    pub fn finish_close(&self) {
        let _ = self.transition(ConnectionState::Closing, ConnectionState::Closed);
    }
}
