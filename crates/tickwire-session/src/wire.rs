//! ripc frame layout and wire constants.
//!
//! Every unit on an active connection is a frame:
//!
//! ```text
//! [length u16]          // includes the two length bytes
//! [flags u8]            // extended | data | comp | comp-frag | packed
//! [extended flags u8]   // conn-ack | conn-nak | frag-id | frag-header
//! [total length u30, fragment id u8]   // when frag-header
//! [fragment id u8]                     // when frag-id only
//! [payload ...]
//! ```
//!
//! The fragment-header total length is the same reserved-bit U30 the
//! codec uses for count hints (see [`tickwire_codec::prim::put_u30`]).
//! A bare three-byte frame with the data flag is a ping. Flag bits not
//! assigned here are ignored on decode so that frames from a newer
//! protocol revision still parse.

use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};
use tickwire_codec::{DecodeIterator, EncodeIterator, prim};

use crate::error::{Result, SessionError};

/// Connection versions as they appear in the handshake, newest first.
pub const CONN_VERSION_14: u32 = 0x0017;
/// Version 13.
pub const CONN_VERSION_13: u32 = 0x0016;
/// Version 12.
pub const CONN_VERSION_12: u32 = 0x0015;
/// Version 11.
pub const CONN_VERSION_11: u32 = 0x0014;
/// Version 10, the oldest accepted.
pub const CONN_VERSION_10: u32 = 0x0013;

/// Human-readable protocol number for a connection version.
#[must_use]
pub fn version_number(version: u32) -> Option<u8> {
    match version {
        CONN_VERSION_10 => Some(10),
        CONN_VERSION_11 => Some(11),
        CONN_VERSION_12 => Some(12),
        CONN_VERSION_13 => Some(13),
        CONN_VERSION_14 => Some(14),
        _ => None,
    }
}

/// True when `version` is one we can speak.
#[must_use]
pub fn version_supported(version: u32) -> bool {
    version_number(version).is_some()
}

bitflags! {
    /// Standard frame flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FrameFlags: u8 {
        /// An extended flags byte follows.
        const EXTENDED = 0x01;
        /// Plain application data.
        const DATA = 0x02;
        /// Payload is compressed.
        const COMP_DATA = 0x04;
        /// Fragment of a compressed message.
        const COMP_FRAG = 0x08;
        /// Payload packs several application messages.
        const PACKED = 0x10;
        /// Compression forced on regardless of threshold.
        const FORCE_COMP = 0x80;
    }
}

bitflags! {
    /// Extended frame flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExtFlags: u8 {
        /// Connection acknowledged; body is the ack.
        const CONN_ACK = 0x01;
        /// Connection refused; body is the nak.
        const CONN_NAK = 0x02;
        /// A one-byte fragment id follows (continuation).
        const FRAG_ID = 0x04;
        /// A fragment header (total length + id) follows (first part).
        const FRAG_HEADER = 0x08;
    }
}

/// Shortest legal frame: length + flags, nothing else.
pub const MIN_FRAME_LEN: usize = 3;
/// Largest frame the u16 length can express.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Parsed frame header plus its payload slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Standard flags.
    pub flags: FrameFlags,
    /// Extended flags; empty when the extended bit was clear.
    pub ext: ExtFlags,
    /// Total message length from a fragment header.
    pub total_len: u32,
    /// Fragment id, from either fragment construct.
    pub frag_id: u8,
    /// Payload bytes.
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// True for a bare keep-alive frame.
    #[must_use]
    pub fn is_ping(&self) -> bool {
        self.payload.is_empty() && self.ext.is_empty() && !self.flags.contains(FrameFlags::PACKED)
    }

    /// True when this frame opens a fragmented message.
    #[must_use]
    pub fn is_first_fragment(&self) -> bool {
        self.ext.contains(ExtFlags::FRAG_HEADER)
    }

    /// True when this frame continues a fragmented message.
    #[must_use]
    pub fn is_continuation(&self) -> bool {
        self.ext.contains(ExtFlags::FRAG_ID) && !self.ext.contains(ExtFlags::FRAG_HEADER)
    }
}

/// Bytes of header a frame with these flags needs. The fragment
/// header's U30 total length varies with the value, so it is an input.
#[must_use]
pub fn header_len(flags: FrameFlags, ext: ExtFlags, total_len: u32) -> usize {
    let mut len = 3;
    if flags.contains(FrameFlags::EXTENDED) {
        len += 1;
        if ext.contains(ExtFlags::FRAG_HEADER) {
            len += prim::u30_len(total_len) + 1;
        } else if ext.contains(ExtFlags::FRAG_ID) {
            len += 1;
        }
    }
    len
}

/// Encode one frame into a fresh buffer.
///
/// # Errors
///
/// `SessionError::InvalidArgument` when the payload cannot fit the
/// 16-bit frame length.
pub fn encode_frame(
    flags: FrameFlags,
    ext: ExtFlags,
    total_len: u32,
    frag_id: u8,
    payload: &[u8],
) -> Result<Bytes> {
    let mut flags = flags;
    if !ext.is_empty() {
        flags |= FrameFlags::EXTENDED;
    }
    let header = header_len(flags, ext, total_len);
    let frame_len = header + payload.len();
    if frame_len > MAX_FRAME_LEN {
        return Err(SessionError::InvalidArgument("payload exceeds frame capacity"));
    }
    let mut buf = BytesMut::with_capacity(frame_len);
    buf.put_u16(frame_len as u16);
    buf.put_u8(flags.bits());
    if flags.contains(FrameFlags::EXTENDED) {
        buf.put_u8(ext.bits());
        if ext.contains(ExtFlags::FRAG_HEADER) {
            let mut scratch = EncodeIterator::new(BytesMut::with_capacity(4), (0, 0));
            prim::put_u30(&mut scratch, total_len)
                .map_err(|_| SessionError::InvalidArgument("fragment total exceeds U30"))?;
            buf.put_slice(scratch.written());
            buf.put_u8(frag_id);
        } else if ext.contains(ExtFlags::FRAG_ID) {
            buf.put_u8(frag_id);
        }
    }
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Encode a keep-alive ping frame.
#[must_use]
pub fn encode_ping() -> Bytes {
    const PING_FRAME: [u8; 3] = [0x00, 0x03, FrameFlags::DATA.bits()];
    Bytes::from_static(&PING_FRAME)
}

/// Parse one frame from the front of `buf`.
///
/// Returns the frame and the bytes it consumed, or `None` when the
/// buffer does not yet hold a complete frame.
///
/// # Errors
///
/// `SessionError::InvalidFrame` for lengths below the fixed header.
pub fn decode_frame(buf: &[u8]) -> Result<Option<(Frame<'_>, usize)>> {
    if buf.len() < 2 {
        return Ok(None);
    }
    let frame_len = usize::from(u16::from_be_bytes([buf[0], buf[1]]));
    if frame_len < MIN_FRAME_LEN {
        return Err(SessionError::InvalidFrame("frame length below minimum"));
    }
    if buf.len() < frame_len {
        return Ok(None);
    }
    let frame = &buf[..frame_len];
    // Unknown flag bits are tolerated: mask to the bits we know.
    let raw_flags = frame[2];
    let flags = FrameFlags::from_bits_truncate(raw_flags);
    let mut cursor = 3;
    let mut ext = ExtFlags::default();
    let mut total_len = 0u32;
    let mut frag_id = 0u8;
    if flags.contains(FrameFlags::EXTENDED) {
        let Some(&ext_byte) = frame.get(cursor) else {
            return Err(SessionError::InvalidFrame("extended flag without extended byte"));
        };
        ext = ExtFlags::from_bits_truncate(ext_byte);
        cursor += 1;
        if ext.contains(ExtFlags::FRAG_HEADER) {
            let mut it = DecodeIterator::new(&frame[cursor..], (0, 0));
            total_len = prim::get_u30(&mut it)
                .map_err(|_| SessionError::InvalidFrame("truncated fragment header"))?;
            cursor = frame.len() - it.remaining().len();
            let Some(&id) = frame.get(cursor) else {
                return Err(SessionError::InvalidFrame("truncated fragment id"));
            };
            frag_id = id;
            cursor += 1;
        } else if ext.contains(ExtFlags::FRAG_ID) {
            let Some(&id) = frame.get(cursor) else {
                return Err(SessionError::InvalidFrame("truncated fragment id"));
            };
            frag_id = id;
            cursor += 1;
        }
    }
    let payload = &frame[cursor..];
    Ok(Some((Frame { flags, ext, total_len, frag_id, payload }, frame_len)))
}
