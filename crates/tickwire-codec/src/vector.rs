//! Vectors: index-keyed entries with per-entry actions.
//!
//! Like a map keyed by a 30-bit position. The sortable flag tells
//! receivers the provider maintains index order across inserts and
//! deletes.
//!
//! Wire layout follows the map, with a `u30` index in place of the
//! primitive key and five actions instead of three.

use bitflags::bitflags;

use crate::{
    error::{CodecError, Result},
    iter::{DecodeIterator, EncodeIterator, EncodeLevel, LevelState, MarkWidth},
    prim,
    types::DataType,
};

bitflags! {
    /// Vector header flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct VectorFlags: u8 {
        /// An inline set-definition database precedes the entries.
        const HAS_SET_DEFS = 0x01;
        /// A summary-data sub-container precedes the entries.
        const HAS_SUMMARY_DATA = 0x02;
        /// Entries may carry permission data.
        const HAS_PER_ENTRY_PERM_DATA = 0x04;
        /// A total-count hint helps receivers size their structures.
        const HAS_TOTAL_COUNT_HINT = 0x08;
        /// The provider keeps entries sorted by index.
        const SUPPORTS_SORTING = 0x10;
    }
}

/// Action attached to a vector entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VectorEntryAction {
    /// Replace the payload at this index.
    Update = 1,
    /// Set the payload at this index, growing the vector if needed.
    Set = 2,
    /// Empty the payload at this index; no payload bytes.
    Clear = 3,
    /// Insert before this index, shifting later entries.
    Insert = 4,
    /// Remove this index, shifting later entries; no payload bytes.
    Delete = 5,
}

impl VectorEntryAction {
    fn from_wire(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::Update),
            2 => Ok(Self::Set),
            3 => Ok(Self::Clear),
            4 => Ok(Self::Insert),
            5 => Ok(Self::Delete),
            _ => Err(CodecError::InvalidData("unknown vector entry action")),
        }
    }

    /// True when entries with this action carry payload bytes.
    #[must_use]
    pub fn carries_payload(self) -> bool {
        !matches!(self, Self::Clear | Self::Delete)
    }
}

const ENTRY_HAS_PERM_DATA: u8 = 0x10;

/// Vector header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vector<B> {
    /// Header flags.
    pub flags: VectorFlags,
    /// Container type of every entry payload.
    pub container_type: DataType,
    /// Pre-encoded set-definition database.
    pub set_defs: Option<B>,
    /// Pre-encoded summary data.
    pub summary: Option<B>,
    /// Expected total entry count across all parts.
    pub total_count_hint: u32,
}

impl<B> Default for Vector<B> {
    fn default() -> Self {
        Self {
            flags: VectorFlags::default(),
            container_type: DataType::NoData,
            set_defs: None,
            summary: None,
            total_count_hint: 0,
        }
    }
}

fn finish_header(it: &mut EncodeIterator, flags: VectorFlags, hint: u32) -> Result<()> {
    if flags.contains(VectorFlags::HAS_TOTAL_COUNT_HINT) {
        prim::put_u30(it, hint)?;
    }
    let pos = it.position();
    it.put_u16(0)?;
    let level = it.level_mut()?;
    level.count_pos = Some(pos);
    level.state = LevelState::Entries;
    Ok(())
}

impl<B: AsRef<[u8]>> Vector<B> {
    /// Begin encoding. Pair with [`encode_complete`].
    pub fn encode_init(&self, it: &mut EncodeIterator) -> Result<()> {
        if !self.container_type.is_container() {
            return Err(CodecError::InvalidArgument("vector payload must be a container type"));
        }
        let start = it.position();
        it.put_u8(self.flags.bits())?;
        it.put_u8(self.container_type.to_wire())?;
        it.push_level(EncodeLevel {
            container: DataType::Vector,
            state: LevelState::Init,
            start,
            size_mark: None,
            entry_mark: None,
            count_pos: None,
            count: 0,
            flags: u16::from(self.flags.bits()),
            sub_type: self.container_type.to_wire(),
        })?;
        if self.flags.contains(VectorFlags::HAS_SET_DEFS) {
            let defs = self
                .set_defs
                .as_ref()
                .ok_or(CodecError::InvalidArgument("set-defs flag without set defs"))?;
            prim::put_buffer16(it, defs.as_ref())?;
        }
        if self.flags.contains(VectorFlags::HAS_SUMMARY_DATA) {
            if let Some(summary) = &self.summary {
                prim::put_buffer16(it, summary.as_ref())?;
            } else {
                it.level_mut()?.state = LevelState::Summary;
                return Ok(());
            }
        }
        finish_header(it, self.flags, self.total_count_hint)
    }

    /// Open the streamed summary sub-container.
    pub fn encode_summary_init(&self, it: &mut EncodeIterator) -> Result<()> {
        it.expect_level(DataType::Vector, &[LevelState::Summary])?;
        let mark = it.reserve_mark(MarkWidth::U16Opt)?;
        it.level_mut()?.size_mark = Some(mark);
        Ok(())
    }

    /// Close the streamed summary and finish the header.
    pub fn encode_summary_complete(&self, it: &mut EncodeIterator) -> Result<()> {
        let level = it.expect_level(DataType::Vector, &[LevelState::Summary])?;
        let mark = level
            .size_mark
            .take()
            .ok_or(CodecError::InvalidArgument("summary was not opened"))?;
        let len = it.position() - (mark.pos + mark.width.reserved_bytes());
        it.complete_mark(mark, len)?;
        finish_header(it, self.flags, self.total_count_hint)
    }
}

fn entry_header(
    it: &mut EncodeIterator,
    action: VectorEntryAction,
    index: u32,
    perm_data: Option<&[u8]>,
) -> Result<()> {
    let level = it.expect_level(DataType::Vector, &[LevelState::Entries])?;
    let vec_flags = VectorFlags::from_bits_truncate(level.flags as u8);
    if perm_data.is_some() && !vec_flags.contains(VectorFlags::HAS_PER_ENTRY_PERM_DATA) {
        return Err(CodecError::InvalidArgument(
            "permission data requires the per-entry-perm-data flag",
        ));
    }
    let flags = if perm_data.is_some() { ENTRY_HAS_PERM_DATA } else { 0 };
    it.put_u8(flags | action as u8)?;
    if let Some(perm) = perm_data {
        prim::put_buffer15(it, perm)?;
    }
    prim::put_u30(it, index)
}

/// Append one entry with a pre-encoded payload.
pub fn encode_entry(
    it: &mut EncodeIterator,
    action: VectorEntryAction,
    index: u32,
    perm_data: Option<&[u8]>,
    payload: Option<&[u8]>,
) -> Result<()> {
    let wants_payload =
        action.carries_payload() && it.level()?.sub_type != DataType::NoData.to_wire();
    if wants_payload != payload.is_some() {
        return Err(CodecError::InvalidArgument("payload presence does not match action"));
    }
    entry_header(it, action, index, perm_data)?;
    if let Some(body) = payload {
        prim::put_buffer16(it, body)?;
    }
    bump_count(it)
}

/// Open an entry whose payload is encoded in place. Pair with
/// [`encode_entry_end`].
pub fn encode_entry_begin(
    it: &mut EncodeIterator,
    action: VectorEntryAction,
    index: u32,
    perm_data: Option<&[u8]>,
) -> Result<()> {
    if !action.carries_payload() || it.level()?.sub_type == DataType::NoData.to_wire() {
        return Err(CodecError::InvalidArgument("entry action carries no payload"));
    }
    entry_header(it, action, index, perm_data)?;
    let mark = it.reserve_mark(MarkWidth::U16Opt)?;
    let level = it.level_mut()?;
    level.entry_mark = Some(mark);
    level.state = LevelState::EntryOpen;
    Ok(())
}

/// Close an entry opened with [`encode_entry_begin`].
pub fn encode_entry_end(it: &mut EncodeIterator) -> Result<()> {
    let level = it.expect_level(DataType::Vector, &[LevelState::EntryOpen])?;
    let mark =
        level.entry_mark.take().ok_or(CodecError::InvalidArgument("no entry open"))?;
    level.state = LevelState::Entries;
    let len = it.position() - (mark.pos + mark.width.reserved_bytes());
    it.complete_mark(mark, len)?;
    bump_count(it)
}

fn bump_count(it: &mut EncodeIterator) -> Result<()> {
    let level = it.level_mut()?;
    level.count = level
        .count
        .checked_add(1)
        .ok_or(CodecError::InvalidData("entry count overflow"))?;
    Ok(())
}

/// Finish the vector. With `success == false` everything written since
/// `encode_init` is rolled back.
pub fn encode_complete(it: &mut EncodeIterator, success: bool) -> Result<()> {
    it.expect_level(DataType::Vector, &[LevelState::Init, LevelState::Entries])?;
    let level = it.pop_level()?;
    if !success {
        it.truncate(level.start);
        return Ok(());
    }
    if let Some(pos) = level.count_pos {
        it.patch(pos, &level.count.to_be_bytes())?;
    }
    Ok(())
}

/// One decoded vector entry.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorEntry<'a> {
    /// Entry action.
    pub action: VectorEntryAction,
    /// Position the action applies to.
    pub index: u32,
    /// Permission data, when present.
    pub perm_data: Option<&'a [u8]>,
    /// Entry payload; empty for clear and delete entries.
    pub payload: &'a [u8],
}

/// Streaming reader over a vector's entries. `Clone` to re-enter.
#[derive(Debug, Clone)]
pub struct VectorReader<'a> {
    cursor: DecodeIterator<'a>,
    remaining: u16,
    container_type: DataType,
}

impl<'a> Vector<&'a [u8]> {
    /// Decode the header and return a reader positioned at the first
    /// entry.
    pub fn decode(it: &mut DecodeIterator<'a>) -> Result<(Self, VectorReader<'a>)> {
        let flags = VectorFlags::from_bits(it.get_u8()?)
            .ok_or(CodecError::InvalidData("unknown vector flags"))?;
        let container_type = DataType::from_wire(it.get_u8()?)?;
        let mut header = Self { flags, container_type, ..Self::default() };
        if flags.contains(VectorFlags::HAS_SET_DEFS) {
            header.set_defs = Some(prim::get_buffer16(it)?);
        }
        if flags.contains(VectorFlags::HAS_SUMMARY_DATA) {
            header.summary = Some(prim::get_buffer16(it)?);
        }
        if flags.contains(VectorFlags::HAS_TOTAL_COUNT_HINT) {
            header.total_count_hint = prim::get_u30(it)?;
        }
        let remaining = it.get_u16()?;
        let rest = it.take_rest();
        let reader = VectorReader { cursor: it.child(rest), remaining, container_type };
        Ok((header, reader))
    }
}

impl<'a> VectorReader<'a> {
    /// Next entry, or `None` at the end of the container.
    pub fn next_entry(&mut self) -> Result<Option<VectorEntry<'a>>> {
        if self.remaining == 0 {
            if !self.cursor.is_empty() {
                return Err(CodecError::InvalidData("trailing bytes after last entry"));
            }
            return Ok(None);
        }
        self.remaining -= 1;
        let byte = self.cursor.get_u8()?;
        let action = VectorEntryAction::from_wire(byte & 0x0F)?;
        let perm_data = if byte & ENTRY_HAS_PERM_DATA != 0 {
            Some(prim::get_buffer15(&mut self.cursor)?)
        } else {
            None
        };
        let index = prim::get_u30(&mut self.cursor)?;
        let payload = if action.carries_payload() && self.container_type != DataType::NoData
        {
            prim::get_buffer16(&mut self.cursor)?
        } else {
            &[]
        };
        Ok(Some(VectorEntry { action, index, perm_data, payload }))
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::element_list::{self, ElementList, ElementListFlags};

    fn enc() -> EncodeIterator {
        EncodeIterator::new(BytesMut::with_capacity(1024), (14, 1))
    }

    fn tiny_element_list() -> Vec<u8> {
        let mut it = enc();
        let el = ElementList {
            flags: ElementListFlags::HAS_STANDARD_DATA,
            ..ElementList::default()
        };
        el.encode_init(&mut it).unwrap();
        element_list::encode_entry_preencoded(&mut it, b"row", DataType::AsciiString, b"x")
            .unwrap();
        element_list::encode_complete(&mut it, true).unwrap();
        it.take().unwrap().to_vec()
    }

    #[test]
    fn sorted_vector_round_trip() {
        let payload = tiny_element_list();
        let vector = Vector::<&[u8]> {
            flags: VectorFlags::SUPPORTS_SORTING | VectorFlags::HAS_TOTAL_COUNT_HINT,
            container_type: DataType::ElementList,
            total_count_hint: 3,
            ..Vector::default()
        };

        let mut it = enc();
        vector.encode_init(&mut it).unwrap();
        encode_entry(&mut it, VectorEntryAction::Set, 0, None, Some(&payload)).unwrap();
        encode_entry(&mut it, VectorEntryAction::Insert, 1, None, Some(&payload)).unwrap();
        encode_entry(&mut it, VectorEntryAction::Delete, 7, None, None).unwrap();
        encode_complete(&mut it, true).unwrap();

        let buf = it.take().unwrap();
        let mut dec = DecodeIterator::new(&buf, (14, 1));
        let (header, mut reader) = Vector::decode(&mut dec).unwrap();
        assert!(header.flags.contains(VectorFlags::SUPPORTS_SORTING));
        assert_eq!(header.total_count_hint, 3);

        let actions: Vec<_> = std::iter::from_fn(|| reader.next_entry().unwrap())
            .map(|e| (e.action, e.index, e.payload.is_empty()))
            .collect();
        assert_eq!(
            actions,
            vec![
                (VectorEntryAction::Set, 0, false),
                (VectorEntryAction::Insert, 1, false),
                (VectorEntryAction::Delete, 7, true),
            ]
        );
    }

    #[test]
    fn large_index_uses_u30() {
        let vector = Vector::<&[u8]> {
            container_type: DataType::NoData,
            ..Vector::default()
        };
        let mut it = enc();
        vector.encode_init(&mut it).unwrap();
        encode_entry(&mut it, VectorEntryAction::Set, prim::U30_MAX, None, None).unwrap();
        encode_complete(&mut it, true).unwrap();

        let buf = it.take().unwrap();
        let mut dec = DecodeIterator::new(&buf, (14, 1));
        let (_, mut reader) = Vector::decode(&mut dec).unwrap();
        let entry = reader.next_entry().unwrap().unwrap();
        assert_eq!(entry.index, prim::U30_MAX);
    }
}
