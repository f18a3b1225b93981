//! ripc framing and session protocol for the tickwire runtime.
//!
//! Everything here is Sans-IO: the [`session::Session`] state machine
//! consumes raw bytes and time, and emits [`session::SessionAction`]s
//! for a driver to execute. The channel engine (`tickwire-channel`)
//! owns the sockets; deterministic tests drive the same machine with a
//! virtual clock and in-memory byte shuttling.
//!
//! Layers:
//!
//! - [`wire`] — frame layout, flag bits, connection-version constants;
//! - [`handshake`] — connection request / ack / nak and negotiation;
//! - [`keyx`] — the optional version-14 key exchange;
//! - [`fragment`] — splitting and reassembly of oversized messages;
//! - [`compress`] — zlib / LZ4 plug-in points;
//! - [`pack`] — multi-message packed buffers;
//! - [`session`] — the lifecycle state machine tying it together.

pub mod compress;
pub mod error;
pub mod fragment;
pub mod handshake;
pub mod keyx;
pub mod pack;
pub mod session;
pub mod wire;

pub use compress::{CompressionType, Compressor};
pub use error::{RejectReason, Result, SessionError};
pub use session::{
    NegotiatedInfo, Session, SessionAction, SessionConfig, SessionRole, SessionState,
};
