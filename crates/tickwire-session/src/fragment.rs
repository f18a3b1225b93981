//! Message fragmentation and reassembly.
//!
//! A message larger than the negotiated fragment size is split: the
//! first frame carries a fragment header (total length + id), the rest
//! carry only the id. Ids are one byte, assigned round-robin and
//! recycled once their message completes. Receivers accumulate into a
//! slot per id; slots idle longer than the ping interval are dropped,
//! and everything is discarded when the channel closes.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use tickwire_codec::prim;

use crate::{
    error::{Result, SessionError},
    wire::{self, ExtFlags, Frame, FrameFlags},
};

/// Worst-case frame overhead of the first fragment: length, flags,
/// extended flags, the U30 total length at its widest, and the id.
pub const FIRST_FRAGMENT_OVERHEAD: usize = 9;
/// Fixed frame overhead of a continuation (length, flags, extended
/// flags, id).
pub const CONTINUATION_OVERHEAD: usize = 5;

/// Splits oversized messages into fragment frames.
#[derive(Debug, Default)]
pub struct Fragmenter {
    next_id: u8,
}

impl Fragmenter {
    /// Frame a message, fragmenting when `payload` exceeds
    /// `max_fragment_size`. `comp` marks the payload as compressed.
    ///
    /// Returns the frames in send order.
    pub fn frame_message(
        &mut self,
        payload: &[u8],
        max_fragment_size: usize,
        comp: bool,
    ) -> Result<Vec<Bytes>> {
        if max_fragment_size == 0 {
            return Err(SessionError::InvalidArgument("zero fragment size"));
        }
        let data_flags =
            if comp { FrameFlags::DATA | FrameFlags::COMP_DATA } else { FrameFlags::DATA };
        // The fragment size bounds payload bytes per frame; the frame
        // length must additionally fit its u16, header included.
        let single_cap = max_fragment_size.min(wire::MAX_FRAME_LEN - 3);
        if payload.len() <= single_cap {
            return Ok(vec![wire::encode_frame(
                data_flags,
                ExtFlags::default(),
                0,
                0,
                payload,
            )?]);
        }

        if payload.len() > prim::U30_MAX as usize {
            return Err(SessionError::InvalidArgument("message too large to fragment"));
        }
        let frag_flags =
            if comp { FrameFlags::DATA | FrameFlags::COMP_FRAG } else { FrameFlags::DATA };
        let id = self.next_id;
        // Id 0 is never assigned so a continuation with id 0 is always
        // recognizable as corrupt.
        self.next_id = self.next_id.wrapping_add(1);
        if self.next_id == 0 {
            self.next_id = 1;
        }
        let id = if id == 0 { 1 } else { id };

        let mut frames = Vec::new();
        let first_room = max_fragment_size.min(wire::MAX_FRAME_LEN - FIRST_FRAGMENT_OVERHEAD);
        let cont_room = max_fragment_size.min(wire::MAX_FRAME_LEN - CONTINUATION_OVERHEAD);
        let (first, mut rest) = payload.split_at(first_room.min(payload.len()));
        frames.push(wire::encode_frame(
            frag_flags,
            ExtFlags::FRAG_HEADER,
            payload.len() as u32,
            id,
            first,
        )?);
        while !rest.is_empty() {
            let take = cont_room.min(rest.len());
            let (chunk, tail) = rest.split_at(take);
            frames.push(wire::encode_frame(frag_flags, ExtFlags::FRAG_ID, 0, id, chunk)?);
            rest = tail;
        }
        Ok(frames)
    }
}

#[derive(Debug)]
struct Slot {
    total: usize,
    data: BytesMut,
    compressed: bool,
    /// Ticks since the slot last grew; purged after `STALE_TICKS`.
    idle_ticks: u8,
}

const STALE_TICKS: u8 = 2;

/// A fully reassembled message.
#[derive(Debug, PartialEq, Eq)]
pub struct Reassembled {
    /// The message bytes.
    pub payload: Bytes,
    /// The fragments carried the compressed-fragment flag; inflate
    /// before delivery.
    pub compressed: bool,
}

/// Accumulates fragment frames into whole messages.
#[derive(Debug, Default)]
pub struct Reassembler {
    slots: HashMap<u8, Slot>,
}

impl Reassembler {
    /// Feed one fragment frame. Returns the completed message once the
    /// last continuation arrives.
    ///
    /// # Errors
    ///
    /// `SessionError::InvalidFrame` for continuations without a first
    /// fragment, overruns past the declared total, or a zero total.
    pub fn feed(&mut self, frame: &Frame<'_>) -> Result<Option<Reassembled>> {
        if frame.is_first_fragment() {
            if frame.total_len == 0 {
                return Err(SessionError::InvalidFrame("fragmented message of zero length"));
            }
            let total = frame.total_len as usize;
            if frame.payload.len() > total {
                return Err(SessionError::InvalidFrame("fragment exceeds declared total"));
            }
            let mut data = BytesMut::with_capacity(total);
            data.extend_from_slice(frame.payload);
            let slot = Slot {
                total,
                data,
                compressed: frame.flags.contains(FrameFlags::COMP_FRAG),
                idle_ticks: 0,
            };
            // A new first fragment with a live id replaces the stale
            // half-built message; the id was recycled by the sender.
            self.slots.insert(frame.frag_id, slot);
            return Ok(self.try_complete(frame.frag_id));
        }

        let Some(slot) = self.slots.get_mut(&frame.frag_id) else {
            return Err(SessionError::InvalidFrame("continuation for unknown fragment id"));
        };
        if slot.data.len() + frame.payload.len() > slot.total {
            self.slots.remove(&frame.frag_id);
            return Err(SessionError::InvalidFrame("fragment exceeds declared total"));
        }
        slot.data.extend_from_slice(frame.payload);
        slot.idle_ticks = 0;
        Ok(self.try_complete(frame.frag_id))
    }

    fn try_complete(&mut self, id: u8) -> Option<Reassembled> {
        let done = self.slots.get(&id).is_some_and(|s| s.data.len() == s.total);
        if !done {
            return None;
        }
        let slot = self.slots.remove(&id)?;
        Some(Reassembled { payload: slot.data.freeze(), compressed: slot.compressed })
    }

    /// Age the slots; called once per ping interval. Slots that saw no
    /// growth for two ticks are dropped.
    pub fn tick(&mut self) {
        self.slots.retain(|_, slot| {
            slot.idle_ticks = slot.idle_ticks.saturating_add(1);
            slot.idle_ticks < STALE_TICKS
        });
    }

    /// Number of messages currently mid-reassembly.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Drop everything; used when the channel closes. Incomplete
    /// messages are never surfaced.
    pub fn clear(&mut self) {
        self.slots.clear();
    }
}
