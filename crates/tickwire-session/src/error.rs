//! Session-layer error types.
//!
//! Strongly typed per failure class so the channel engine can decide
//! what survives: a bad frame kills one message, a handshake rejection
//! or ping timeout kills the session.

use std::time::Duration;

use thiserror::Error;

/// Result alias used throughout the session layer.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Reason codes a connection nak can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RejectReason {
    /// Version proposed by the peer is not supported.
    UnsupportedVersion = 1,
    /// Proposed ping timeout is unusable (zero).
    BadPingTimeout = 2,
    /// No common compression algorithm.
    NoCommonCompression = 3,
    /// Server is at capacity.
    AtCapacity = 4,
}

impl RejectReason {
    /// Parse the wire value.
    #[must_use]
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::UnsupportedVersion),
            2 => Some(Self::BadPingTimeout),
            3 => Some(Self::NoCommonCompression),
            4 => Some(Self::AtCapacity),
            _ => None,
        }
    }
}

/// Errors surfaced by the session state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// A frame violated the protocol: bad length, reserved construct,
    /// malformed handshake body. Fatal to the session.
    #[error("invalid frame: {0}")]
    InvalidFrame(&'static str),

    /// A frame or handshake body ended early.
    #[error("incomplete frame: need {needed} more bytes")]
    IncompleteFrame {
        /// Additional bytes required.
        needed: usize,
    },

    /// The peer proposed a connection version outside the supported
    /// range.
    #[error("unsupported connection version {0:#06x}")]
    UnsupportedVersion(u32),

    /// The peer rejected our connection request.
    #[error("connection rejected: {text} ({code})")]
    Rejected {
        /// Numeric reason code from the nak.
        code: u8,
        /// Text carried by the nak.
        text: String,
    },

    /// Nothing was received for the full negotiated timeout.
    #[error("ping timeout after {elapsed:?}")]
    PingTimeout {
        /// How long the inbound side was silent.
        elapsed: Duration,
    },

    /// The key exchange failed or produced an unusable key.
    #[error("key exchange failed: {0}")]
    KeyExchange(&'static str),

    /// A compressed payload failed to inflate.
    #[error("decompression failed: {0}")]
    Decompress(String),

    /// An operation was issued in a state that does not allow it.
    #[error("invalid operation in state {state}: {operation}")]
    InvalidState {
        /// State name at the time of the call.
        state: &'static str,
        /// Operation attempted.
        operation: &'static str,
    },

    /// An argument violated the call contract.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

impl SessionError {
    /// Stable numeric sub-code for programmatic discrimination.
    #[must_use]
    pub fn sub_code(&self) -> i32 {
        match self {
            Self::InvalidFrame(_) => -41,
            Self::IncompleteFrame { .. } => -42,
            Self::UnsupportedVersion(_) => -43,
            Self::Rejected { .. } => -44,
            Self::PingTimeout { .. } => -45,
            Self::KeyExchange(_) => -46,
            Self::Decompress(_) => -47,
            Self::InvalidState { .. } => -48,
            Self::InvalidArgument(_) => -49,
        }
    }

    /// True when retrying the same operation later can succeed.
    ///
    /// Protocol violations and rejections are never transient.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::IncompleteFrame { .. })
    }
}
