//! Codec error types.
//!
//! Every failure carries a stable sub-code so embedders can discriminate
//! programmatically, plus enough context for a single human-readable line.
//! Encode errors leave the iterator untouched; decode errors are fatal to
//! the message being decoded, never to the channel.

use thiserror::Error;

/// Result alias used throughout the codec.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors produced while encoding or decoding wire data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The encode buffer cannot hold the next value.
    ///
    /// Transient from the encoder's point of view: the caller may realign
    /// onto a larger buffer and retry the same operation.
    #[error("buffer too small: need {needed} bytes, {available} available")]
    BufferTooSmall {
        /// Bytes the operation required
        needed: usize,
        /// Bytes remaining in the buffer
        available: usize,
    },

    /// Self-inconsistent wire data: bad length, reserved bit set, size-mark
    /// overflow on complete, or a value that violates its declared format.
    #[error("invalid data: {0}")]
    InvalidData(&'static str),

    /// The buffer ended in the middle of a value.
    #[error("incomplete data: need {needed} more bytes")]
    IncompleteData {
        /// Additional bytes required to finish the current value
        needed: usize,
    },

    /// A declared container or primitive type outside the known set.
    #[error("unsupported data type {0}")]
    UnsupportedDataType(u8),

    /// A set-defined value does not fit the width its definition declares.
    #[error("value out of range for set-defined width: {0}")]
    ValueOutOfRange(&'static str),

    /// An argument violates the call contract (bad nesting, missing init,
    /// completing a level that was never opened).
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

impl CodecError {
    /// Stable numeric sub-code for programmatic discrimination.
    ///
    /// These values are part of the public contract and never reused.
    #[must_use]
    pub fn sub_code(&self) -> i32 {
        match self {
            Self::BufferTooSmall { .. } => -21,
            Self::InvalidData(_) => -22,
            Self::IncompleteData { .. } => -23,
            Self::UnsupportedDataType(_) => -24,
            Self::ValueOutOfRange(_) => -25,
            Self::InvalidArgument(_) => -26,
        }
    }

    /// True when the caller can retry after enlarging the buffer.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::BufferTooSmall { .. })
    }
}
