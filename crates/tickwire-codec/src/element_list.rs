//! Element lists: ordered `(name, value)` records.
//!
//! Self-describing sibling of the field list: each entry carries its
//! name and type inline, so no dictionary is needed. Used heavily for
//! message-key attributes and administrative payloads.
//!
//! Wire layout mirrors the field list, with
//! `[name rb15][type u8][value rb15-prefixed]` entries.

use bitflags::bitflags;

use crate::{
    error::{CodecError, Result},
    iter::{DecodeIterator, EncodeIterator, EncodeLevel, LevelState, MarkWidth},
    prim,
    set_def::{self, ElementSetDef, LocalElementSetDefDb},
    types::DataType,
    value::PrimitiveValue,
};

bitflags! {
    /// Element list header flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ElementListFlags: u8 {
        /// An element list number precedes the entries.
        const HAS_INFO = 0x01;
        /// A set-encoded row precedes the standard entries.
        const HAS_SET_DATA = 0x02;
        /// A non-zero set id selects the definition for the set row.
        const HAS_SET_ID = 0x04;
        /// Standard `(name, value)` entries are present.
        const HAS_STANDARD_DATA = 0x08;
    }
}

/// Element list header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ElementList {
    /// Header flags.
    pub flags: ElementListFlags,
    /// Record-template number, meaningful to the embedder.
    pub element_list_num: u16,
    /// Set id for the set row; 0 when `HAS_SET_ID` is absent.
    pub set_id: u16,
}

impl ElementList {
    /// Begin encoding. Pair with [`encode_complete`].
    pub fn encode_init(&self, it: &mut EncodeIterator) -> Result<()> {
        let start = it.position();
        it.put_u8(self.flags.bits())?;
        if self.flags.contains(ElementListFlags::HAS_INFO) {
            it.put_u16(self.element_list_num)?;
        }
        if self.flags.contains(ElementListFlags::HAS_SET_ID) {
            prim::put_u15(it, self.set_id)?;
        }
        let state = if self.flags.contains(ElementListFlags::HAS_SET_DATA) {
            LevelState::SetData
        } else {
            LevelState::Init
        };
        it.push_level(EncodeLevel {
            container: DataType::ElementList,
            state,
            start,
            size_mark: None,
            entry_mark: None,
            count_pos: None,
            count: 0,
            flags: u16::from(self.flags.bits()),
            sub_type: 0,
        })
    }
}

/// Encode the set row: one value per column of `def`, in order.
pub fn encode_set_row<B: AsRef<[u8]>, N: AsRef<[u8]>>(
    it: &mut EncodeIterator,
    def: &ElementSetDef<N>,
    values: &[PrimitiveValue<B>],
) -> Result<()> {
    if values.len() != def.entries.len() {
        return Err(CodecError::InvalidArgument("set row width does not match definition"));
    }
    it.expect_level(DataType::ElementList, &[LevelState::SetData])?;
    for (column, value) in def.entries.iter().zip(values) {
        set_def::put_set_value(it, column.data_type, value)?;
    }
    let level = it.level_mut()?;
    level.state = LevelState::Init;
    Ok(())
}

fn begin_standard_entries(it: &mut EncodeIterator) -> Result<()> {
    let level =
        it.expect_level(DataType::ElementList, &[LevelState::Init, LevelState::Entries])?;
    if level.state == LevelState::Init {
        if level.flags & u16::from(ElementListFlags::HAS_STANDARD_DATA.bits()) == 0 {
            return Err(CodecError::InvalidData("element list has no standard-data section"));
        }
        level.state = LevelState::Entries;
        let pos = it.position();
        it.put_u16(0)?;
        it.level_mut()?.count_pos = Some(pos);
    }
    Ok(())
}

/// Append one entry with a primitive value.
pub fn encode_entry<B: AsRef<[u8]>, V: AsRef<[u8]>>(
    it: &mut EncodeIterator,
    name: B,
    data_type: DataType,
    value: &PrimitiveValue<V>,
) -> Result<()> {
    begin_standard_entries(it)?;
    prim::put_buffer15(it, name.as_ref())?;
    it.put_u8(data_type.to_wire())?;
    prim::put_primitive_ls(it, value)?;
    bump_count(it)
}

/// Append one entry whose value bytes are already encoded.
pub fn encode_entry_preencoded<B: AsRef<[u8]>>(
    it: &mut EncodeIterator,
    name: B,
    data_type: DataType,
    content: &[u8],
) -> Result<()> {
    begin_standard_entries(it)?;
    prim::put_buffer15(it, name.as_ref())?;
    it.put_u8(data_type.to_wire())?;
    prim::put_buffer15(it, content)?;
    bump_count(it)
}

/// Open an entry whose value is a nested container encoded in place.
/// Pair with [`encode_entry_end`].
pub fn encode_entry_begin<B: AsRef<[u8]>>(
    it: &mut EncodeIterator,
    name: B,
    data_type: DataType,
) -> Result<()> {
    begin_standard_entries(it)?;
    prim::put_buffer15(it, name.as_ref())?;
    it.put_u8(data_type.to_wire())?;
    let mark = it.reserve_mark(MarkWidth::U15Two)?;
    let level = it.level_mut()?;
    level.entry_mark = Some(mark);
    level.state = LevelState::EntryOpen;
    Ok(())
}

/// Close an entry opened with [`encode_entry_begin`].
pub fn encode_entry_end(it: &mut EncodeIterator) -> Result<()> {
    let level = it.expect_level(DataType::ElementList, &[LevelState::EntryOpen])?;
    let mark =
        level.entry_mark.take().ok_or(CodecError::InvalidArgument("no entry open"))?;
    level.state = LevelState::Entries;
    let len = it.position() - (mark.pos + 2);
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

/// Finish the element list. With `success == false` everything written
/// since `encode_init` is rolled back.
pub fn encode_complete(it: &mut EncodeIterator, success: bool) -> Result<()> {
    it.expect_level(
        DataType::ElementList,
        &[LevelState::Init, LevelState::Entries, LevelState::SetData],
    )?;
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

/// One decoded element entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementEntry<'a> {
    /// Entry name.
    pub name: &'a [u8],
    /// Declared type of the value.
    pub data_type: DataType,
    /// Entry value.
    pub data: ElementEntryData<'a>,
}

/// Value of a decoded element entry.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementEntryData<'a> {
    /// Raw content, typed by `data_type`.
    Raw(&'a [u8]),
    /// Value decoded through a set definition.
    Decoded(PrimitiveValue<&'a [u8]>),
}

/// Streaming reader over an element list's entries. `Clone` to re-enter
/// without disturbing the enclosing pass.
#[derive(Debug, Clone)]
pub struct ElementListReader<'a, 'd> {
    cursor: DecodeIterator<'a>,
    set_def: Option<&'d ElementSetDef<&'a [u8]>>,
    set_column: usize,
    standard_remaining: u16,
    standard_started: bool,
    has_standard: bool,
}

impl ElementList {
    /// Decode the header and return a reader positioned at the first
    /// entry.
    pub fn decode<'a, 'd>(
        it: &mut DecodeIterator<'a>,
        set_db: Option<&'d LocalElementSetDefDb<&'a [u8]>>,
    ) -> Result<(Self, ElementListReader<'a, 'd>)> {
        let flags = ElementListFlags::from_bits(it.get_u8()?)
            .ok_or(CodecError::InvalidData("unknown element list flags"))?;
        let mut header = Self { flags, ..Self::default() };
        if flags.contains(ElementListFlags::HAS_INFO) {
            header.element_list_num = it.get_u16()?;
        }
        if flags.contains(ElementListFlags::HAS_SET_ID) {
            header.set_id = prim::get_u15(it)?;
        }
        let set_def = if flags.contains(ElementListFlags::HAS_SET_DATA) {
            let def = set_db
                .and_then(|db| db.find(header.set_id))
                .ok_or(CodecError::InvalidData("set id has no definition"))?;
            Some(def)
        } else {
            None
        };
        let rest = it.take_rest();
        let reader = ElementListReader {
            cursor: it.child(rest),
            set_def,
            set_column: 0,
            standard_remaining: 0,
            standard_started: false,
            has_standard: flags.contains(ElementListFlags::HAS_STANDARD_DATA),
        };
        Ok((header, reader))
    }
}

impl<'a> ElementListReader<'a, '_> {
    /// Next entry, or `None` at the end of the container.
    pub fn next_entry(&mut self) -> Result<Option<ElementEntry<'a>>> {
        if let Some(def) = self.set_def {
            if self.set_column < def.entries.len() {
                let column = &def.entries[self.set_column];
                self.set_column += 1;
                let value = set_def::get_set_value(&mut self.cursor, column.data_type)?;
                return Ok(Some(ElementEntry {
                    name: column.name,
                    data_type: column.data_type,
                    data: ElementEntryData::Decoded(value),
                }));
            }
        }
        if !self.has_standard {
            return Ok(None);
        }
        if !self.standard_started {
            self.standard_started = true;
            self.standard_remaining = self.cursor.get_u16()?;
        }
        if self.standard_remaining == 0 {
            if !self.cursor.is_empty() {
                return Err(CodecError::InvalidData("trailing bytes after last entry"));
            }
            return Ok(None);
        }
        self.standard_remaining -= 1;
        let name = prim::get_buffer15(&mut self.cursor)?;
        let data_type = DataType::from_wire(self.cursor.get_u8()?)?;
        let content = prim::get_buffer15(&mut self.cursor)?;
        Ok(Some(ElementEntry { name, data_type, data: ElementEntryData::Raw(content) }))
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;

    fn enc() -> EncodeIterator {
        EncodeIterator::new(BytesMut::with_capacity(512), (14, 1))
    }

    #[test]
    fn round_trip_mixed_types() {
        let header = ElementList {
            flags: ElementListFlags::HAS_STANDARD_DATA,
            ..ElementList::default()
        };
        let mut it = enc();
        header.encode_init(&mut it).unwrap();
        encode_entry(&mut it, b"ApplicationId", DataType::AsciiString, &PrimitiveValue::Buffer(b"256".as_slice())).unwrap();
        encode_entry(&mut it, b"SingleOpen", DataType::UInt, &PrimitiveValue::<&[u8]>::UInt(1)).unwrap();
        encode_complete(&mut it, true).unwrap();

        let buf = it.take().unwrap();
        let mut dec = DecodeIterator::new(&buf, (14, 1));
        let (_, mut reader) = ElementList::decode(&mut dec, None).unwrap();

        let first = reader.next_entry().unwrap().unwrap();
        assert_eq!(first.name, b"ApplicationId");
        assert_eq!(first.data_type, DataType::AsciiString);
        assert_eq!(first.data, ElementEntryData::Raw(b"256".as_slice()));

        let second = reader.next_entry().unwrap().unwrap();
        assert_eq!(second.name, b"SingleOpen");
        match second.data {
            ElementEntryData::Raw(content) => {
                let value = prim::primitive_from_content(DataType::UInt, content).unwrap();
                assert_eq!(value, PrimitiveValue::UInt(1));
            }
            ElementEntryData::Decoded(_) => unreachable!(),
        }
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn nested_container_entry() {
        use crate::field_list::{self, FieldList, FieldListFlags};

        let outer = ElementList {
            flags: ElementListFlags::HAS_STANDARD_DATA,
            ..ElementList::default()
        };
        let mut it = enc();
        outer.encode_init(&mut it).unwrap();
        encode_entry_begin(&mut it, b"Payload", DataType::FieldList).unwrap();
        let inner =
            FieldList { flags: FieldListFlags::HAS_STANDARD_DATA, ..FieldList::default() };
        inner.encode_init(&mut it).unwrap();
        field_list::encode_entry_preencoded(&mut it, 1, b"v").unwrap();
        field_list::encode_complete(&mut it, true).unwrap();
        encode_entry_end(&mut it).unwrap();
        encode_complete(&mut it, true).unwrap();

        let buf = it.take().unwrap();
        let mut dec = DecodeIterator::new(&buf, (14, 1));
        let (_, mut reader) = ElementList::decode(&mut dec, None).unwrap();
        let entry = reader.next_entry().unwrap().unwrap();
        assert_eq!(entry.data_type, DataType::FieldList);

        let ElementEntryData::Raw(content) = entry.data else { unreachable!() };
        let mut inner_dec = dec.child(content);
        let (_, mut inner_reader) = FieldList::decode(&mut inner_dec, None).unwrap();
        let field = inner_reader.next_entry().unwrap().unwrap();
        assert_eq!(field.field_id, 1);
    }
}
