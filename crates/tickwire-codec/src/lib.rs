//! Length-specified binary wire codec for the tickwire runtime.
//!
//! Three layers, bottom up:
//!
//! - **Primitives** ([`prim`], [`value`]): integers in the narrowest
//!   width that preserves them, decimals with scaling hints, calendar
//!   values with truncated precision, QoS, state, strings. Every
//!   primitive has a blank sentinel that round-trips.
//! - **Containers** ([`field_list`], [`element_list`], [`map`],
//!   [`vector`], [`series`], [`filter_list`], [`array`]): recursive,
//!   self-delimited structures with flag-driven optional sections and
//!   inline set-definition databases ([`set_def`]).
//! - **Messages** ([`msg`]): eight classes over a common envelope, with
//!   per-class optional fields, validation, and a deep copy that
//!   re-homes a decoded message into one owned allocation.
//!
//! Encoding goes through an [`iter::EncodeIterator`] that owns the
//! output buffer and back-patches deferred size marks as nested scopes
//! complete. Decoding borrows the input frame and copies nothing until
//! a copy is requested explicitly.
//!
//! The codec never blocks and never logs; errors carry stable sub-codes
//! (see [`error::CodecError`]).

pub mod array;
pub mod element_list;
pub mod error;
pub mod field_list;
pub mod filter_list;
pub mod iter;
pub mod map;
pub mod msg;
pub mod prim;
pub mod series;
pub mod set_def;
pub mod types;
pub mod value;

pub use error::{CodecError, Result};
pub use iter::{DecodeIterator, EncodeIterator, MAX_ENCODE_DEPTH};
pub use types::{DataType, MsgClass};
