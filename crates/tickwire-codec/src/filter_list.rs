//! Filter lists: id-keyed entries a consumer can subscribe to
//! selectively.
//!
//! Entry ids line up with the filter bits of a message key, so a
//! consumer asking for filter `0b0101` receives entries 0 and 2. Each
//! entry may override the list's container type.
//!
//! Wire layout:
//!
//! ```text
//! [flags u8][container type u8]
//! [count hint u8]                       (HAS_TOTAL_COUNT_HINT)
//! [count u8]
//! entries: [entry flags/action u8][id u8][container type u8?]
//!          [perm rb15?][payload u16opt?]
//! ```

use bitflags::bitflags;

use crate::{
    error::{CodecError, Result},
    iter::{DecodeIterator, EncodeIterator, EncodeLevel, LevelState, MarkWidth},
    prim,
    types::DataType,
};

bitflags! {
    /// Filter list header flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FilterListFlags: u8 {
        /// Entries may carry permission data.
        const HAS_PER_ENTRY_PERM_DATA = 0x01;
        /// A total-count hint helps receivers size their structures.
        const HAS_TOTAL_COUNT_HINT = 0x02;
    }
}

bitflags! {
    /// Per-entry flags (high nibble of the entry's first byte).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FilterEntryFlags: u8 {
        /// Entry carries permission data.
        const HAS_PERM_DATA = 0x01;
        /// Entry overrides the list's container type.
        const HAS_CONTAINER_TYPE = 0x02;
    }
}

/// Action attached to a filter entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FilterEntryAction {
    /// Replace the entry's payload.
    Update = 1,
    /// Set the entry's payload, creating it if absent.
    Set = 2,
    /// Empty the entry; no payload bytes.
    Clear = 3,
}

impl FilterEntryAction {
    fn from_wire(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::Update),
            2 => Ok(Self::Set),
            3 => Ok(Self::Clear),
            _ => Err(CodecError::InvalidData("unknown filter entry action")),
        }
    }
}

/// Filter list header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterList {
    /// Header flags.
    pub flags: FilterListFlags,
    /// Default container type for entries without an override.
    pub container_type: DataType,
    /// Expected total entry count.
    pub total_count_hint: u8,
}

impl Default for FilterList {
    fn default() -> Self {
        Self {
            flags: FilterListFlags::default(),
            container_type: DataType::NoData,
            total_count_hint: 0,
        }
    }
}

impl FilterList {
    /// Begin encoding. Pair with [`encode_complete`].
    pub fn encode_init(&self, it: &mut EncodeIterator) -> Result<()> {
        if !self.container_type.is_container() {
            return Err(CodecError::InvalidArgument(
                "filter list payload must be a container type",
            ));
        }
        let start = it.position();
        it.put_u8(self.flags.bits())?;
        it.put_u8(self.container_type.to_wire())?;
        if self.flags.contains(FilterListFlags::HAS_TOTAL_COUNT_HINT) {
            it.put_u8(self.total_count_hint)?;
        }
        let pos = it.position();
        it.put_u8(0)?; // count, patched on complete
        it.push_level(EncodeLevel {
            container: DataType::FilterList,
            state: LevelState::Entries,
            start,
            size_mark: None,
            entry_mark: None,
            count_pos: Some(pos),
            count: 0,
            flags: u16::from(self.flags.bits()),
            sub_type: self.container_type.to_wire(),
        })
    }
}

fn entry_header(
    it: &mut EncodeIterator,
    action: FilterEntryAction,
    id: u8,
    container_type: Option<DataType>,
    perm_data: Option<&[u8]>,
) -> Result<()> {
    let level = it.expect_level(DataType::FilterList, &[LevelState::Entries])?;
    let list_flags = FilterListFlags::from_bits_truncate(level.flags as u8);
    if perm_data.is_some() && !list_flags.contains(FilterListFlags::HAS_PER_ENTRY_PERM_DATA)
    {
        return Err(CodecError::InvalidArgument(
            "permission data requires the per-entry-perm-data flag",
        ));
    }
    let mut entry_flags = FilterEntryFlags::default();
    if perm_data.is_some() {
        entry_flags |= FilterEntryFlags::HAS_PERM_DATA;
    }
    if container_type.is_some() {
        entry_flags |= FilterEntryFlags::HAS_CONTAINER_TYPE;
    }
    it.put_u8((entry_flags.bits() << 4) | action as u8)?;
    it.put_u8(id)?;
    if let Some(ty) = container_type {
        if !ty.is_container() {
            return Err(CodecError::InvalidArgument("override must be a container type"));
        }
        it.put_u8(ty.to_wire())?;
    }
    if let Some(perm) = perm_data {
        prim::put_buffer15(it, perm)?;
    }
    Ok(())
}

fn effective_type(it: &EncodeIterator, container_type: Option<DataType>) -> Result<DataType> {
    match container_type {
        Some(ty) => Ok(ty),
        None => DataType::from_wire(it.level()?.sub_type),
    }
}

/// Append one entry with a pre-encoded payload.
pub fn encode_entry(
    it: &mut EncodeIterator,
    action: FilterEntryAction,
    id: u8,
    container_type: Option<DataType>,
    perm_data: Option<&[u8]>,
    payload: Option<&[u8]>,
) -> Result<()> {
    let wants_payload = action != FilterEntryAction::Clear
        && effective_type(it, container_type)? != DataType::NoData;
    if wants_payload != payload.is_some() {
        return Err(CodecError::InvalidArgument("payload presence does not match action"));
    }
    entry_header(it, action, id, container_type, perm_data)?;
    if let Some(body) = payload {
        prim::put_buffer16(it, body)?;
    }
    bump_count(it)
}

/// Open an entry whose payload is encoded in place. Pair with
/// [`encode_entry_end`].
pub fn encode_entry_begin(
    it: &mut EncodeIterator,
    action: FilterEntryAction,
    id: u8,
    container_type: Option<DataType>,
    perm_data: Option<&[u8]>,
) -> Result<()> {
    if action == FilterEntryAction::Clear
        || effective_type(it, container_type)? == DataType::NoData
    {
        return Err(CodecError::InvalidArgument("entry action carries no payload"));
    }
    entry_header(it, action, id, container_type, perm_data)?;
    let mark = it.reserve_mark(MarkWidth::U16Opt)?;
    let level = it.level_mut()?;
    level.entry_mark = Some(mark);
    level.state = LevelState::EntryOpen;
    Ok(())
}

/// Close an entry opened with [`encode_entry_begin`].
pub fn encode_entry_end(it: &mut EncodeIterator) -> Result<()> {
    let level = it.expect_level(DataType::FilterList, &[LevelState::EntryOpen])?;
    let mark =
        level.entry_mark.take().ok_or(CodecError::InvalidArgument("no entry open"))?;
    level.state = LevelState::Entries;
    let len = it.position() - (mark.pos + mark.width.reserved_bytes());
    it.complete_mark(mark, len)?;
    bump_count(it)
}

fn bump_count(it: &mut EncodeIterator) -> Result<()> {
    let level = it.level_mut()?;
    if level.count == u16::from(u8::MAX) {
        return Err(CodecError::InvalidData("entry count overflow"));
    }
    level.count += 1;
    Ok(())
}

/// Finish the filter list. With `success == false` everything written
/// since `encode_init` is rolled back.
pub fn encode_complete(it: &mut EncodeIterator, success: bool) -> Result<()> {
    it.expect_level(DataType::FilterList, &[LevelState::Entries])?;
    let level = it.pop_level()?;
    if !success {
        it.truncate(level.start);
        return Ok(());
    }
    if let Some(pos) = level.count_pos {
        it.patch(pos, &[level.count as u8])?;
    }
    Ok(())
}

/// One decoded filter entry.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterEntry<'a> {
    /// Entry action.
    pub action: FilterEntryAction,
    /// Filter id, matching a bit position in the message-key filter.
    pub id: u8,
    /// Effective container type (the list default unless overridden).
    pub container_type: DataType,
    /// Permission data, when present.
    pub perm_data: Option<&'a [u8]>,
    /// Entry payload; empty for clear entries.
    pub payload: &'a [u8],
}

/// Streaming reader over a filter list's entries. `Clone` to re-enter.
#[derive(Debug, Clone)]
pub struct FilterListReader<'a> {
    cursor: DecodeIterator<'a>,
    remaining: u8,
    default_type: DataType,
}

impl FilterList {
    /// Decode the header and return a reader positioned at the first
    /// entry.
    pub fn decode<'a>(it: &mut DecodeIterator<'a>) -> Result<(Self, FilterListReader<'a>)> {
        let flags = FilterListFlags::from_bits(it.get_u8()?)
            .ok_or(CodecError::InvalidData("unknown filter list flags"))?;
        let container_type = DataType::from_wire(it.get_u8()?)?;
        let mut header = Self { flags, container_type, ..Self::default() };
        if flags.contains(FilterListFlags::HAS_TOTAL_COUNT_HINT) {
            header.total_count_hint = it.get_u8()?;
        }
        let remaining = it.get_u8()?;
        let rest = it.take_rest();
        let reader =
            FilterListReader { cursor: it.child(rest), remaining, default_type: container_type };
        Ok((header, reader))
    }
}

impl<'a> FilterListReader<'a> {
    /// Next entry, or `None` at the end of the container.
    pub fn next_entry(&mut self) -> Result<Option<FilterEntry<'a>>> {
        if self.remaining == 0 {
            if !self.cursor.is_empty() {
                return Err(CodecError::InvalidData("trailing bytes after last entry"));
            }
            return Ok(None);
        }
        self.remaining -= 1;
        let byte = self.cursor.get_u8()?;
        let action = FilterEntryAction::from_wire(byte & 0x0F)?;
        let entry_flags = FilterEntryFlags::from_bits_truncate(byte >> 4);
        let id = self.cursor.get_u8()?;
        let container_type = if entry_flags.contains(FilterEntryFlags::HAS_CONTAINER_TYPE) {
            DataType::from_wire(self.cursor.get_u8()?)?
        } else {
            self.default_type
        };
        let perm_data = if entry_flags.contains(FilterEntryFlags::HAS_PERM_DATA) {
            Some(prim::get_buffer15(&mut self.cursor)?)
        } else {
            None
        };
        let payload = if action != FilterEntryAction::Clear && container_type != DataType::NoData
        {
            prim::get_buffer16(&mut self.cursor)?
        } else {
            &[]
        };
        Ok(Some(FilterEntry { action, id, container_type, perm_data, payload }))
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
        element_list::encode_entry_preencoded(&mut it, b"svc", DataType::AsciiString, b"EQ")
            .unwrap();
        element_list::encode_complete(&mut it, true).unwrap();
        it.take().unwrap().to_vec()
    }

    #[test]
    fn entries_round_trip_with_override() {
        let payload = tiny_element_list();
        let list = FilterList {
            flags: FilterListFlags::HAS_TOTAL_COUNT_HINT,
            container_type: DataType::ElementList,
            total_count_hint: 2,
        };
        let mut it = enc();
        list.encode_init(&mut it).unwrap();
        encode_entry(&mut it, FilterEntryAction::Set, 1, None, None, Some(&payload)).unwrap();
        encode_entry(
            &mut it,
            FilterEntryAction::Update,
            2,
            Some(DataType::FieldList),
            None,
            Some(b"\x08\x00\x00"),
        )
        .unwrap();
        encode_entry(&mut it, FilterEntryAction::Clear, 3, None, None, None).unwrap();
        encode_complete(&mut it, true).unwrap();

        let buf = it.take().unwrap();
        let mut dec = DecodeIterator::new(&buf, (14, 1));
        let (header, mut reader) = FilterList::decode(&mut dec).unwrap();
        assert_eq!(header.total_count_hint, 2);

        let first = reader.next_entry().unwrap().unwrap();
        assert_eq!((first.id, first.container_type), (1, DataType::ElementList));
        assert_eq!(first.payload, payload.as_slice());

        let second = reader.next_entry().unwrap().unwrap();
        assert_eq!((second.id, second.container_type), (2, DataType::FieldList));

        let third = reader.next_entry().unwrap().unwrap();
        assert_eq!(third.action, FilterEntryAction::Clear);
        assert!(third.payload.is_empty());

        assert!(reader.next_entry().unwrap().is_none());
    }
}
