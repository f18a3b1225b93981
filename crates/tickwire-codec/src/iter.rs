//! Encode and decode iterators.
//!
//! The encode iterator owns the output buffer and a stack of level
//! records, one per container currently open. Opening a container
//! reserves a size mark; completing it back-patches the mark with the
//! actual length. All positions are offsets into the buffer, so swapping
//! the buffer for a larger one (`realign`) only needs a prefix copy.
//!
//! Failed encode operations leave the cursor and the level stack exactly
//! as they were, so a caller can realign and retry, or abandon the
//! partial write by releasing the buffer.

use bytes::BytesMut;

use crate::{
    error::{CodecError, Result},
    types::DataType,
};

/// Maximum container nesting depth.
pub const MAX_ENCODE_DEPTH: usize = 16;

/// Width reserved for a deferred size mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MarkWidth {
    /// One byte, U15 short form; lengths up to 0x7F.
    U15One,
    /// Two bytes, U15 long form (high bit set); lengths up to 0x7FFF.
    U15Two,
    /// Three bytes, U16 escaped form (0xFE prefix); lengths up to 0xFFFF.
    U16Opt,
}

impl MarkWidth {
    pub(crate) fn reserved_bytes(self) -> usize {
        match self {
            Self::U15One => 1,
            Self::U15Two => 2,
            Self::U16Opt => 3,
        }
    }
}

/// A deferred length that will be written once its scope completes.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SizeMark {
    /// Offset of the first reserved byte.
    pub pos: usize,
    /// Reserved width.
    pub width: MarkWidth,
}

/// Per-level encoding progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LevelState {
    /// Container header written; waiting for sections or entries.
    Init,
    /// Streamed summary-data sub-container in progress.
    Summary,
    /// Set-encoded row in progress.
    SetData,
    /// Ready to accept the next entry.
    Entries,
    /// An entry's child scope is open (nested container or deferred
    /// payload).
    EntryOpen,
    /// Completed; kept until popped for the double-complete check.
    Complete,
}

/// One open container on the encode stack.
#[derive(Debug, Clone)]
pub(crate) struct EncodeLevel {
    /// Container type that opened this level.
    pub container: DataType,
    /// Progress state.
    pub state: LevelState,
    /// Offset where this container's content starts (after its size
    /// mark, if any).
    pub start: usize,
    /// Deferred total-length mark.
    pub size_mark: Option<SizeMark>,
    /// Second mark for scopes that patch both a header length and an
    /// entry-payload length.
    pub entry_mark: Option<SizeMark>,
    /// Offset of the two-byte entry count, patched on complete.
    pub count_pos: Option<usize>,
    /// Entries written so far.
    pub count: u16,
    /// Container flags, stashed for completion-time decisions.
    pub flags: u16,
    /// Per-container extra: entry container type, or map key type.
    pub sub_type: u8,
}

/// Mutable cursor over an encode buffer.
///
/// Owns the buffer; `take()` recovers it once encoding is done. The
/// buffer's capacity at construction is the hard end: the iterator never
/// grows it.
#[derive(Debug)]
pub struct EncodeIterator {
    buf: BytesMut,
    limit: usize,
    major: u8,
    minor: u8,
    pub(crate) levels: Vec<EncodeLevel>,
}

impl EncodeIterator {
    /// Wrap a buffer for encoding at the given protocol version.
    ///
    /// Encoding appends after any bytes already present; the buffer's
    /// current capacity is the hard end.
    #[must_use]
    pub fn new(buf: BytesMut, version: (u8, u8)) -> Self {
        let limit = buf.capacity();
        Self::with_limit(buf, limit, version)
    }

    /// Wrap a buffer with an explicit byte limit, for pools whose slabs
    /// carry extra capacity beyond the negotiated fragment size.
    #[must_use]
    pub fn with_limit(buf: BytesMut, limit: usize, version: (u8, u8)) -> Self {
        Self { buf, limit, major: version.0, minor: version.1, levels: Vec::new() }
    }

    /// Protocol version this iterator encodes for.
    #[must_use]
    pub fn version(&self) -> (u8, u8) {
        (self.major, self.minor)
    }

    /// Bytes written so far.
    #[must_use]
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    /// Bytes still available.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.limit - self.buf.len()
    }

    /// Current nesting depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Recover the buffer, truncated to the written length.
    ///
    /// # Errors
    ///
    /// `CodecError::InvalidArgument` when containers are still open.
    pub fn take(self) -> Result<BytesMut> {
        if !self.levels.is_empty() {
            return Err(CodecError::InvalidArgument("container still open"));
        }
        Ok(self.buf)
    }

    /// View of the bytes written so far.
    #[must_use]
    pub fn written(&self) -> &[u8] {
        &self.buf
    }

    /// Replace the backing buffer with a larger one, carrying over
    /// everything written so far. All recorded marks stay valid because
    /// they are offsets.
    ///
    /// Returns the old buffer so the caller can release it to its pool.
    ///
    /// # Errors
    ///
    /// `CodecError::BufferTooSmall` when the replacement is smaller than
    /// the original.
    pub fn realign(&mut self, mut replacement: BytesMut) -> Result<BytesMut> {
        if replacement.capacity() < self.limit {
            return Err(CodecError::BufferTooSmall {
                needed: self.limit,
                available: replacement.capacity(),
            });
        }
        replacement.clear();
        replacement.extend_from_slice(&self.buf);
        self.limit = replacement.capacity();
        Ok(std::mem::replace(&mut self.buf, replacement))
    }

    // Byte-level writers. Every writer checks space up front so a failed
    // operation leaves the buffer untouched.

    pub(crate) fn ensure(&self, needed: usize) -> Result<()> {
        let available = self.remaining();
        if needed > available {
            return Err(CodecError::BufferTooSmall { needed, available });
        }
        Ok(())
    }

    pub(crate) fn put_u8(&mut self, v: u8) -> Result<()> {
        self.ensure(1)?;
        self.buf.extend_from_slice(&[v]);
        Ok(())
    }

    pub(crate) fn put_u16(&mut self, v: u16) -> Result<()> {
        self.ensure(2)?;
        self.buf.extend_from_slice(&v.to_be_bytes());
        Ok(())
    }

    pub(crate) fn put_u32(&mut self, v: u32) -> Result<()> {
        self.ensure(4)?;
        self.buf.extend_from_slice(&v.to_be_bytes());
        Ok(())
    }

    pub(crate) fn put_i16(&mut self, v: i16) -> Result<()> {
        self.ensure(2)?;
        self.buf.extend_from_slice(&v.to_be_bytes());
        Ok(())
    }

    pub(crate) fn put_i32(&mut self, v: i32) -> Result<()> {
        self.ensure(4)?;
        self.buf.extend_from_slice(&v.to_be_bytes());
        Ok(())
    }

    pub(crate) fn put_slice(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure(bytes.len())?;
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Overwrite bytes already written. `pos + bytes.len()` must lie
    /// within the written region; this is an internal patching primitive
    /// and the bound is a caller invariant.
    pub(crate) fn patch(&mut self, pos: usize, bytes: &[u8]) -> Result<()> {
        let end = pos + bytes.len();
        if end > self.buf.len() {
            return Err(CodecError::InvalidArgument("patch outside written region"));
        }
        self.buf[pos..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Reserve a size mark of the given width, filled with zeros.
    pub(crate) fn reserve_mark(&mut self, width: MarkWidth) -> Result<SizeMark> {
        let needed = width.reserved_bytes();
        self.ensure(needed)?;
        let pos = self.buf.len();
        match width {
            MarkWidth::U15One => self.buf.extend_from_slice(&[0]),
            MarkWidth::U15Two => self.buf.extend_from_slice(&[0x80, 0]),
            MarkWidth::U16Opt => self.buf.extend_from_slice(&[0xFE, 0, 0]),
        }
        Ok(SizeMark { pos, width })
    }

    /// Back-patch a size mark with the actual length of its scope.
    ///
    /// # Errors
    ///
    /// `CodecError::InvalidData` when the length exceeds what the
    /// reserved width can express.
    pub(crate) fn complete_mark(&mut self, mark: SizeMark, len: usize) -> Result<()> {
        match mark.width {
            MarkWidth::U15One => {
                if len > 0x7F {
                    return Err(CodecError::InvalidData("length overflows one-byte size mark"));
                }
                self.patch(mark.pos, &[len as u8])
            }
            MarkWidth::U15Two => {
                if len > 0x7FFF {
                    return Err(CodecError::InvalidData("length overflows two-byte size mark"));
                }
                let v = (len as u16) | 0x8000;
                self.patch(mark.pos, &v.to_be_bytes())
            }
            MarkWidth::U16Opt => {
                if len > 0xFFFF {
                    return Err(CodecError::InvalidData("length overflows escaped size mark"));
                }
                let v = len as u16;
                let pos = mark.pos + 1;
                self.patch(pos, &v.to_be_bytes())
            }
        }
    }

    /// Discard everything written after `pos`. Used when a container
    /// completes unsuccessfully and its bytes are rolled back.
    pub(crate) fn truncate(&mut self, pos: usize) {
        self.buf.truncate(pos);
    }

    // Level-stack management.

    pub(crate) fn push_level(&mut self, level: EncodeLevel) -> Result<()> {
        if self.levels.len() >= MAX_ENCODE_DEPTH {
            return Err(CodecError::InvalidArgument("container nesting too deep"));
        }
        self.levels.push(level);
        Ok(())
    }

    pub(crate) fn level_mut(&mut self) -> Result<&mut EncodeLevel> {
        self.levels.last_mut().ok_or(CodecError::InvalidArgument("no container open"))
    }

    pub(crate) fn level(&self) -> Result<&EncodeLevel> {
        self.levels.last().ok_or(CodecError::InvalidArgument("no container open"))
    }

    pub(crate) fn pop_level(&mut self) -> Result<EncodeLevel> {
        self.levels.pop().ok_or(CodecError::InvalidArgument("no container open"))
    }

    /// Expect the current level to be the given container in one of the
    /// given states.
    pub(crate) fn expect_level(
        &mut self,
        container: DataType,
        states: &[LevelState],
    ) -> Result<&mut EncodeLevel> {
        let level = self.level_mut()?;
        if level.container != container {
            return Err(CodecError::InvalidArgument("operation targets a different container"));
        }
        if !states.contains(&level.state) {
            return Err(CodecError::InvalidData("operation invalid in current encode state"));
        }
        Ok(level)
    }
}

/// Read cursor over a received buffer.
///
/// Decoded buffers borrow the input; nothing is copied until a message
/// copy is requested explicitly.
#[derive(Debug, Clone)]
pub struct DecodeIterator<'a> {
    buf: &'a [u8],
    pos: usize,
    major: u8,
    minor: u8,
}

impl<'a> DecodeIterator<'a> {
    /// Wrap a received buffer for decoding at the given protocol version.
    #[must_use]
    pub fn new(buf: &'a [u8], version: (u8, u8)) -> Self {
        Self { buf, pos: 0, major: version.0, minor: version.1 }
    }

    /// Protocol version this iterator decodes for.
    #[must_use]
    pub fn version(&self) -> (u8, u8) {
        (self.major, self.minor)
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    /// True when the cursor reached the end.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pos == self.buf.len()
    }

    /// Open a nested iterator over a sub-buffer at the same version.
    #[must_use]
    pub fn child(&self, buf: &'a [u8]) -> DecodeIterator<'a> {
        DecodeIterator { buf, pos: 0, major: self.major, minor: self.minor }
    }

    /// Consume `n` bytes.
    ///
    /// # Errors
    ///
    /// `CodecError::IncompleteData` when fewer than `n` bytes remain.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let available = self.buf.len() - self.pos;
        if n > available {
            return Err(CodecError::IncompleteData { needed: n - available });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Consume the rest of the buffer.
    pub fn take_rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }

    pub(crate) fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn get_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub(crate) fn get_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn get_i16(&mut self) -> Result<i16> {
        let b = self.take(2)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    pub(crate) fn get_i32(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(cap: usize) -> EncodeIterator {
        EncodeIterator::with_limit(BytesMut::with_capacity(cap), cap, (14, 1))
    }

    #[test]
    fn overrun_leaves_cursor_unchanged() {
        let mut it = fresh(2);
        it.put_u8(0xAB).unwrap();
        let before = it.position();
        let err = it.put_u32(1).unwrap_err();
        assert!(matches!(err, CodecError::BufferTooSmall { .. }));
        assert_eq!(it.position(), before);
        assert_eq!(it.written(), &[0xAB]);
    }

    #[test]
    fn size_marks_patch_in_place() {
        let mut it = fresh(64);
        let mark = it.reserve_mark(MarkWidth::U15Two).unwrap();
        it.put_slice(b"hello").unwrap();
        it.complete_mark(mark, 5).unwrap();
        assert_eq!(it.written(), &[0x80, 0x05, b'h', b'e', b'l', b'l', b'o']);
    }

    #[test]
    fn one_byte_mark_overflow_is_invalid_data() {
        let mut it = fresh(256);
        let mark = it.reserve_mark(MarkWidth::U15One).unwrap();
        it.put_slice(&[0u8; 200]).unwrap();
        assert!(matches!(it.complete_mark(mark, 200), Err(CodecError::InvalidData(_))));
    }

    #[test]
    fn realign_preserves_prefix_and_rejects_smaller() {
        let mut it = fresh(8);
        it.put_slice(b"abcd").unwrap();

        let err = it.realign(BytesMut::with_capacity(4)).unwrap_err();
        assert!(matches!(err, CodecError::BufferTooSmall { .. }));

        let old = it.realign(BytesMut::with_capacity(64)).unwrap();
        assert_eq!(&old[..], b"abcd");
        it.put_slice(b"efgh").unwrap();
        assert_eq!(it.written(), b"abcdefgh");
    }

    #[test]
    fn decode_reports_missing_bytes() {
        let mut it = DecodeIterator::new(&[1, 2], (14, 1));
        assert_eq!(it.get_u8().unwrap(), 1);
        let err = it.get_u32().unwrap_err();
        assert_eq!(err, CodecError::IncompleteData { needed: 3 });
    }
}
