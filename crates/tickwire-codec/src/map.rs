//! Maps: primitive-keyed entries with per-entry actions.
//!
//! Wire layout:
//!
//! ```text
//! [flags u8][key type u8][container type u8]
//! [key field id i16]                  (HAS_KEY_FIELD_ID)
//! [set defs u16opt-prefixed]          (HAS_SET_DEFS)
//! [summary u16opt-prefixed]           (HAS_SUMMARY_DATA)
//! [total count hint u30]              (HAS_TOTAL_COUNT_HINT)
//! [count u16]
//! entries: [action/flags u8][perm rb15?][key rb15][payload u16opt?]
//! ```
//!
//! A delete entry never carries a payload; add and update always do
//! unless the container type is `NoData`.

use bitflags::bitflags;

use crate::{
    error::{CodecError, Result},
    iter::{DecodeIterator, EncodeIterator, EncodeLevel, LevelState, MarkWidth},
    prim,
    types::DataType,
    value::PrimitiveValue,
};

bitflags! {
    /// Map header flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MapFlags: u8 {
        /// An inline set-definition database precedes the entries.
        const HAS_SET_DEFS = 0x01;
        /// A summary-data sub-container precedes the entries.
        const HAS_SUMMARY_DATA = 0x02;
        /// Entries may carry permission data.
        const HAS_PER_ENTRY_PERM_DATA = 0x04;
        /// A total-count hint helps receivers size their structures.
        const HAS_TOTAL_COUNT_HINT = 0x08;
        /// The key is also carried as this field inside each payload.
        const HAS_KEY_FIELD_ID = 0x10;
    }
}

/// Action attached to a map entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MapEntryAction {
    /// Replace the entry's payload.
    Update = 1,
    /// Add a new entry.
    Add = 2,
    /// Remove the entry; no payload.
    Delete = 3,
}

impl MapEntryAction {
    fn from_wire(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::Update),
            2 => Ok(Self::Add),
            3 => Ok(Self::Delete),
            _ => Err(CodecError::InvalidData("unknown map entry action")),
        }
    }
}

const ENTRY_HAS_PERM_DATA: u8 = 0x10;

/// Map header.
///
/// The optional sections are carried as pre-encoded buffers, except the
/// summary, which may also be streamed with
/// [`Map::encode_summary_init`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Map<B> {
    /// Header flags.
    pub flags: MapFlags,
    /// Primitive type of every entry key.
    pub key_type: DataType,
    /// Container type of every entry payload.
    pub container_type: DataType,
    /// Field id duplicating the key inside payloads.
    pub key_field_id: i16,
    /// Pre-encoded set-definition database.
    pub set_defs: Option<B>,
    /// Pre-encoded summary data.
    pub summary: Option<B>,
    /// Expected total entry count across all parts.
    pub total_count_hint: u32,
}

impl<B> Default for Map<B> {
    fn default() -> Self {
        Self {
            flags: MapFlags::default(),
            key_type: DataType::Buffer,
            container_type: DataType::NoData,
            key_field_id: 0,
            set_defs: None,
            summary: None,
            total_count_hint: 0,
        }
    }
}

fn finish_header(it: &mut EncodeIterator, flags: MapFlags, hint: u32) -> Result<()> {
    if flags.contains(MapFlags::HAS_TOTAL_COUNT_HINT) {
        prim::put_u30(it, hint)?;
    }
    let pos = it.position();
    it.put_u16(0)?;
    let level = it.level_mut()?;
    level.count_pos = Some(pos);
    level.state = LevelState::Entries;
    Ok(())
}

impl<B: AsRef<[u8]>> Map<B> {
    /// Begin encoding. Pair with [`encode_complete`].
    ///
    /// When `HAS_SUMMARY_DATA` is set and `summary` is `None`, the
    /// summary must be streamed next via [`Map::encode_summary_init`].
    pub fn encode_init(&self, it: &mut EncodeIterator) -> Result<()> {
        if !self.key_type.is_primitive() {
            return Err(CodecError::InvalidArgument("map key must be a primitive type"));
        }
        if !self.container_type.is_container() {
            return Err(CodecError::InvalidArgument("map payload must be a container type"));
        }
        let start = it.position();
        it.put_u8(self.flags.bits())?;
        it.put_u8(self.key_type.to_wire())?;
        it.put_u8(self.container_type.to_wire())?;
        if self.flags.contains(MapFlags::HAS_KEY_FIELD_ID) {
            it.put_i16(self.key_field_id)?;
        }
        it.push_level(EncodeLevel {
            container: DataType::Map,
            state: LevelState::Init,
            start,
            size_mark: None,
            entry_mark: None,
            count_pos: None,
            count: 0,
            flags: u16::from(self.flags.bits()),
            sub_type: self.container_type.to_wire(),
        })?;
        if self.flags.contains(MapFlags::HAS_SET_DEFS) {
            let defs = self
                .set_defs
                .as_ref()
                .ok_or(CodecError::InvalidArgument("set-defs flag without set defs"))?;
            prim::put_buffer16(it, defs.as_ref())?;
        }
        if self.flags.contains(MapFlags::HAS_SUMMARY_DATA) {
            if let Some(summary) = &self.summary {
                prim::put_buffer16(it, summary.as_ref())?;
            } else {
                // Summary will be streamed; header finishes afterwards.
                it.level_mut()?.state = LevelState::Summary;
                return Ok(());
            }
        }
        finish_header(it, self.flags, self.total_count_hint)
    }

    /// Open the streamed summary sub-container.
    pub fn encode_summary_init(&self, it: &mut EncodeIterator) -> Result<()> {
        it.expect_level(DataType::Map, &[LevelState::Summary])?;
        let mark = it.reserve_mark(MarkWidth::U16Opt)?;
        it.level_mut()?.size_mark = Some(mark);
        Ok(())
    }

    /// Close the streamed summary and finish the header.
    pub fn encode_summary_complete(&self, it: &mut EncodeIterator) -> Result<()> {
        let level = it.expect_level(DataType::Map, &[LevelState::Summary])?;
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
    action: u8,
    perm_data: Option<&[u8]>,
) -> Result<()> {
    let level = it.expect_level(DataType::Map, &[LevelState::Entries])?;
    let map_flags = MapFlags::from_bits_truncate(level.flags as u8);
    if perm_data.is_some() && !map_flags.contains(MapFlags::HAS_PER_ENTRY_PERM_DATA) {
        return Err(CodecError::InvalidArgument(
            "permission data requires the per-entry-perm-data flag",
        ));
    }
    let flags = if perm_data.is_some() { ENTRY_HAS_PERM_DATA } else { 0 };
    it.put_u8(flags | action)?;
    if let Some(perm) = perm_data {
        prim::put_buffer15(it, perm)?;
    }
    Ok(())
}

/// Append one entry with a pre-encoded payload.
///
/// `payload` must be `None` for delete entries and for `NoData`
/// containers, and present otherwise.
pub fn encode_entry<K: AsRef<[u8]>>(
    it: &mut EncodeIterator,
    action: MapEntryAction,
    key: &PrimitiveValue<K>,
    perm_data: Option<&[u8]>,
    payload: Option<&[u8]>,
) -> Result<()> {
    let wants_payload = entry_wants_payload(it, action)?;
    if wants_payload != payload.is_some() {
        return Err(CodecError::InvalidArgument("payload presence does not match action"));
    }
    entry_header(it, action as u8, perm_data)?;
    prim::put_primitive_ls(it, key)?;
    if let Some(body) = payload {
        prim::put_buffer16(it, body)?;
    }
    bump_count(it)
}

/// Open an entry whose payload is encoded in place. Pair with
/// [`encode_entry_end`]. Delete entries cannot be streamed; they carry
/// no payload.
pub fn encode_entry_begin<K: AsRef<[u8]>>(
    it: &mut EncodeIterator,
    action: MapEntryAction,
    key: &PrimitiveValue<K>,
    perm_data: Option<&[u8]>,
) -> Result<()> {
    if !entry_wants_payload(it, action)? {
        return Err(CodecError::InvalidArgument("entry action carries no payload"));
    }
    entry_header(it, action as u8, perm_data)?;
    prim::put_primitive_ls(it, key)?;
    let mark = it.reserve_mark(MarkWidth::U16Opt)?;
    let level = it.level_mut()?;
    level.entry_mark = Some(mark);
    level.state = LevelState::EntryOpen;
    Ok(())
}

/// Close an entry opened with [`encode_entry_begin`].
pub fn encode_entry_end(it: &mut EncodeIterator) -> Result<()> {
    let level = it.expect_level(DataType::Map, &[LevelState::EntryOpen])?;
    let mark =
        level.entry_mark.take().ok_or(CodecError::InvalidArgument("no entry open"))?;
    level.state = LevelState::Entries;
    let len = it.position() - (mark.pos + mark.width.reserved_bytes());
    it.complete_mark(mark, len)?;
    bump_count(it)
}

fn entry_wants_payload(it: &mut EncodeIterator, action: MapEntryAction) -> Result<bool> {
    let level = it.level()?;
    let container = level.sub_type;
    Ok(action != MapEntryAction::Delete && container != DataType::NoData.to_wire())
}

fn bump_count(it: &mut EncodeIterator) -> Result<()> {
    let level = it.level_mut()?;
    level.count = level
        .count
        .checked_add(1)
        .ok_or(CodecError::InvalidData("entry count overflow"))?;
    Ok(())
}

/// Finish the map. With `success == false` everything written since
/// `encode_init` is rolled back.
pub fn encode_complete(it: &mut EncodeIterator, success: bool) -> Result<()> {
    it.expect_level(DataType::Map, &[LevelState::Init, LevelState::Entries])?;
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

/// One decoded map entry.
#[derive(Debug, Clone, PartialEq)]
pub struct MapEntry<'a> {
    /// Entry action.
    pub action: MapEntryAction,
    /// Raw key content; interpret with the map's `key_type` via
    /// [`prim::primitive_from_content`].
    pub key: &'a [u8],
    /// Permission data, when present.
    pub perm_data: Option<&'a [u8]>,
    /// Entry payload; empty for delete entries and `NoData` payloads.
    pub payload: &'a [u8],
}

/// Streaming reader over a map's entries. `Clone` to re-enter.
#[derive(Debug, Clone)]
pub struct MapReader<'a> {
    cursor: DecodeIterator<'a>,
    remaining: u16,
    container_type: DataType,
}

impl<'a> Map<&'a [u8]> {
    /// Decode the header and return a reader positioned at the first
    /// entry.
    pub fn decode(it: &mut DecodeIterator<'a>) -> Result<(Self, MapReader<'a>)> {
        let flags = MapFlags::from_bits(it.get_u8()?)
            .ok_or(CodecError::InvalidData("unknown map flags"))?;
        let key_type = DataType::from_wire(it.get_u8()?)?;
        let container_type = DataType::from_wire(it.get_u8()?)?;
        let mut header = Self { flags, key_type, container_type, ..Self::default() };
        if flags.contains(MapFlags::HAS_KEY_FIELD_ID) {
            header.key_field_id = it.get_i16()?;
        }
        if flags.contains(MapFlags::HAS_SET_DEFS) {
            header.set_defs = Some(prim::get_buffer16(it)?);
        }
        if flags.contains(MapFlags::HAS_SUMMARY_DATA) {
            header.summary = Some(prim::get_buffer16(it)?);
        }
        if flags.contains(MapFlags::HAS_TOTAL_COUNT_HINT) {
            header.total_count_hint = prim::get_u30(it)?;
        }
        let remaining = it.get_u16()?;
        let rest = it.take_rest();
        let reader = MapReader { cursor: it.child(rest), remaining, container_type };
        Ok((header, reader))
    }
}

impl<'a> MapReader<'a> {
    /// Next entry, or `None` at the end of the container.
    pub fn next_entry(&mut self) -> Result<Option<MapEntry<'a>>> {
        if self.remaining == 0 {
            if !self.cursor.is_empty() {
                return Err(CodecError::InvalidData("trailing bytes after last entry"));
            }
            return Ok(None);
        }
        self.remaining -= 1;
        let byte = self.cursor.get_u8()?;
        let action = MapEntryAction::from_wire(byte & 0x0F)?;
        let perm_data = if byte & ENTRY_HAS_PERM_DATA != 0 {
            Some(prim::get_buffer15(&mut self.cursor)?)
        } else {
            None
        };
        let key = prim::get_buffer15(&mut self.cursor)?;
        let payload = if action != MapEntryAction::Delete
            && self.container_type != DataType::NoData
        {
            prim::get_buffer16(&mut self.cursor)?
        } else {
            &[]
        };
        Ok(Some(MapEntry { action, key, perm_data, payload }))
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::field_list::{self, FieldList, FieldListFlags};

    fn enc() -> EncodeIterator {
        EncodeIterator::new(BytesMut::with_capacity(1024), (14, 1))
    }

    fn tiny_field_list() -> Vec<u8> {
        let mut it = enc();
        let fl = FieldList { flags: FieldListFlags::HAS_STANDARD_DATA, ..FieldList::default() };
        fl.encode_init(&mut it).unwrap();
        field_list::encode_entry_preencoded(&mut it, 1, b"v").unwrap();
        field_list::encode_complete(&mut it, true).unwrap();
        it.take().unwrap().to_vec()
    }

    #[test]
    fn round_trip_with_summary_and_hint() {
        let payload = tiny_field_list();
        let summary = tiny_field_list();

        let map = Map {
            flags: MapFlags::HAS_SUMMARY_DATA
                | MapFlags::HAS_TOTAL_COUNT_HINT
                | MapFlags::HAS_PER_ENTRY_PERM_DATA,
            key_type: DataType::Buffer,
            container_type: DataType::FieldList,
            summary: Some(summary.as_slice()),
            total_count_hint: 2,
            ..Map::default()
        };

        let mut it = enc();
        map.encode_init(&mut it).unwrap();
        encode_entry(
            &mut it,
            MapEntryAction::Add,
            &PrimitiveValue::Buffer(b"AAA.N".as_slice()),
            Some(b"\x01\x02"),
            Some(&payload),
        )
        .unwrap();
        encode_entry(
            &mut it,
            MapEntryAction::Delete,
            &PrimitiveValue::Buffer(b"BBB.N".as_slice()),
            None,
            None,
        )
        .unwrap();
        encode_complete(&mut it, true).unwrap();

        let buf = it.take().unwrap();
        let mut dec = DecodeIterator::new(&buf, (14, 1));
        let (header, mut reader) = Map::decode(&mut dec).unwrap();
        assert_eq!(header.container_type, DataType::FieldList);
        assert_eq!(header.summary, Some(summary.as_slice()));
        assert_eq!(header.total_count_hint, 2);

        let first = reader.next_entry().unwrap().unwrap();
        assert_eq!(first.action, MapEntryAction::Add);
        assert_eq!(first.key, b"AAA.N");
        assert_eq!(first.perm_data, Some(b"\x01\x02".as_slice()));
        assert_eq!(first.payload, payload.as_slice());

        let second = reader.next_entry().unwrap().unwrap();
        assert_eq!(second.action, MapEntryAction::Delete);
        assert!(second.payload.is_empty());

        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn streamed_summary_decodes_like_buffered() {
        let summary = tiny_field_list();

        let map: Map<&[u8]> = Map {
            flags: MapFlags::HAS_SUMMARY_DATA,
            key_type: DataType::UInt,
            container_type: DataType::FieldList,
            ..Map::default()
        };
        let mut it = enc();
        map.encode_init(&mut it).unwrap();
        map.encode_summary_init(&mut it).unwrap();
        let fl =
            FieldList { flags: FieldListFlags::HAS_STANDARD_DATA, ..FieldList::default() };
        fl.encode_init(&mut it).unwrap();
        field_list::encode_entry_preencoded(&mut it, 1, b"v").unwrap();
        field_list::encode_complete(&mut it, true).unwrap();
        map.encode_summary_complete(&mut it).unwrap();
        encode_complete(&mut it, true).unwrap();

        let buf = it.take().unwrap();
        let mut dec = DecodeIterator::new(&buf, (14, 1));
        let (header, mut reader) = Map::decode(&mut dec).unwrap();
        assert_eq!(header.summary, Some(summary.as_slice()));
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn delete_with_payload_is_rejected() {
        let map: Map<&[u8]> = Map {
            key_type: DataType::UInt,
            container_type: DataType::FieldList,
            ..Map::default()
        };
        let mut it = enc();
        map.encode_init(&mut it).unwrap();
        let err = encode_entry(
            &mut it,
            MapEntryAction::Delete,
            &PrimitiveValue::<&[u8]>::UInt(9),
            None,
            Some(b"payload"),
        )
        .unwrap_err();
        assert!(matches!(err, CodecError::InvalidArgument(_)));

        let err = encode_entry(
            &mut it,
            MapEntryAction::Add,
            &PrimitiveValue::<&[u8]>::UInt(9),
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, CodecError::InvalidArgument(_)));
    }
}
