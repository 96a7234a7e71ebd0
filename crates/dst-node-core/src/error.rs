//! Error types for the DST node core.

use thiserror::Error;

use crate::types::{Address, Role};

/// Errors raised by core primitives.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A hex string could not be decoded into the expected byte width.
    #[error("invalid hex value: {0}")]
    InvalidHex(String),

    /// A byte slice had the wrong length.
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// A session ID part is missing.
    #[error("incomplete session id: {0} is missing")]
    IncompleteSessionId(&'static str),

    /// The session ID was already finalised.
    #[error("session id is locked")]
    SessionIdLocked,

    /// Signing was requested on an identity without credentials.
    #[error("credentials not set for {0}")]
    CredentialsNotSet(Address),

    /// The keystore rejected the password for an account.
    #[error("wrong password for account {0}")]
    WrongPassword(Address),

    /// The keystore has no key for an account.
    #[error("unknown account {0}")]
    UnknownAccount(Address),

    /// A signature is malformed (bad recovery byte or scalar values).
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// A signature slot required for the operation is empty.
    #[error("missing {0} signature")]
    MissingSignature(Role),

    /// Underlying ECDSA failure.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// A listener address could not be parsed.
    #[error("invalid listener address: {0}")]
    InvalidListenerAddr(String),
}

impl From<hex::FromHexError> for CoreError {
    fn from(e: hex::FromHexError) -> Self {
        CoreError::InvalidHex(e.to_string())
    }
}

impl From<k256::ecdsa::Error> for CoreError {
    fn from(e: k256::ecdsa::Error) -> Self {
        CoreError::Crypto(e.to_string())
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
