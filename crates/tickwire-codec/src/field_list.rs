//! Field lists: ordered `(field id, value)` records.
//!
//! The workhorse container for market-data payloads. Field ids are
//! dictionary-resolved by the embedder; the codec carries values as raw
//! content and only interprets them when the caller supplies a type.
//!
//! Wire layout:
//!
//! ```text
//! [flags u8]
//! [info: dictionary id rb15, field list number u16]   (HAS_INFO)
//! [set id rb15]                                       (HAS_SET_ID)
//! [set row: one value per set-definition column]      (HAS_SET_DATA)
//! [count u16, entries]                                (HAS_STANDARD_DATA)
//! ```
//!
//! A standard entry is `[field id i16][value rb15-prefixed]`.

use bitflags::bitflags;

use crate::{
    error::{CodecError, Result},
    iter::{DecodeIterator, EncodeIterator, EncodeLevel, LevelState, MarkWidth},
    prim,
    set_def::{self, FieldSetDef, LocalFieldSetDefDb},
    types::DataType,
    value::PrimitiveValue,
};

bitflags! {
    /// Field list header flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FieldListFlags: u8 {
        /// Dictionary id and field list number precede the entries.
        const HAS_INFO = 0x01;
        /// A set-encoded row precedes the standard entries.
        const HAS_SET_DATA = 0x02;
        /// A non-zero set id selects the definition for the set row.
        const HAS_SET_ID = 0x04;
        /// Standard `(id, value)` entries are present.
        const HAS_STANDARD_DATA = 0x08;
    }
}

/// Field list header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FieldList {
    /// Header flags.
    pub flags: FieldListFlags,
    /// Dictionary needed to interpret the field ids.
    pub dictionary_id: u16,
    /// Record-template number within that dictionary.
    pub field_list_num: u16,
    /// Set id for the set row; 0 when `HAS_SET_ID` is absent.
    pub set_id: u16,
}

impl FieldList {
    /// Begin encoding. Writes the header and opens an encode level; pair
    /// with [`encode_complete`].
    pub fn encode_init(&self, it: &mut EncodeIterator) -> Result<()> {
        let start = it.position();
        it.put_u8(self.flags.bits())?;
        if self.flags.contains(FieldListFlags::HAS_INFO) {
            prim::put_u15(it, self.dictionary_id)?;
            it.put_u16(self.field_list_num)?;
        }
        if self.flags.contains(FieldListFlags::HAS_SET_ID) {
            prim::put_u15(it, self.set_id)?;
        }
        let state = if self.flags.contains(FieldListFlags::HAS_SET_DATA) {
            LevelState::SetData
        } else {
            LevelState::Init
        };
        it.push_level(EncodeLevel {
            container: DataType::FieldList,
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
///
/// Legal once, immediately after `encode_init`, when `HAS_SET_DATA` was
/// set.
pub fn encode_set_row<B: AsRef<[u8]>>(
    it: &mut EncodeIterator,
    def: &FieldSetDef,
    values: &[PrimitiveValue<B>],
) -> Result<()> {
    if values.len() != def.entries.len() {
        return Err(CodecError::InvalidArgument("set row width does not match definition"));
    }
    it.expect_level(DataType::FieldList, &[LevelState::SetData])?;
    for (column, value) in def.entries.iter().zip(values) {
        set_def::put_set_value(it, column.data_type, value)?;
    }
    let level = it.level_mut()?;
    level.state = LevelState::Init;
    Ok(())
}

fn begin_standard_entries(it: &mut EncodeIterator) -> Result<()> {
    let level = it.expect_level(DataType::FieldList, &[LevelState::Init, LevelState::Entries])?;
    if level.state == LevelState::Init {
        if level.flags & u16::from(FieldListFlags::HAS_STANDARD_DATA.bits()) == 0 {
            return Err(CodecError::InvalidData("field list has no standard-data section"));
        }
        level.state = LevelState::Entries;
        let pos = it.position();
        it.put_u16(0)?;
        it.level_mut()?.count_pos = Some(pos);
    }
    Ok(())
}

/// Append one entry with an already-decoded primitive value.
pub fn encode_entry<B: AsRef<[u8]>>(
    it: &mut EncodeIterator,
    field_id: i16,
    value: &PrimitiveValue<B>,
) -> Result<()> {
    begin_standard_entries(it)?;
    it.put_i16(field_id)?;
    prim::put_primitive_ls(it, value)?;
    bump_count(it)
}

/// Append one entry whose value bytes are already encoded.
pub fn encode_entry_preencoded(
    it: &mut EncodeIterator,
    field_id: i16,
    content: &[u8],
) -> Result<()> {
    begin_standard_entries(it)?;
    it.put_i16(field_id)?;
    prim::put_buffer15(it, content)?;
    bump_count(it)
}

/// Append one blank entry.
pub fn encode_entry_blank(it: &mut EncodeIterator, field_id: i16) -> Result<()> {
    begin_standard_entries(it)?;
    it.put_i16(field_id)?;
    prim::put_blank_ls(it)?;
    bump_count(it)
}

/// Open an entry whose value is a nested container encoded in place.
/// Pair with [`encode_entry_end`].
pub fn encode_entry_begin(it: &mut EncodeIterator, field_id: i16) -> Result<()> {
    begin_standard_entries(it)?;
    it.put_i16(field_id)?;
    let mark = it.reserve_mark(MarkWidth::U15Two)?;
    let level = it.level_mut()?;
    level.entry_mark = Some(mark);
    level.state = LevelState::EntryOpen;
    Ok(())
}

/// Close an entry opened with [`encode_entry_begin`].
pub fn encode_entry_end(it: &mut EncodeIterator) -> Result<()> {
    let level = it.expect_level(DataType::FieldList, &[LevelState::EntryOpen])?;
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

/// Finish the field list. With `success == false` everything written
/// since `encode_init` is rolled back.
pub fn encode_complete(it: &mut EncodeIterator, success: bool) -> Result<()> {
    it.expect_level(
        DataType::FieldList,
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

/// One decoded field entry.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldEntry<'a> {
    /// Field id; the dictionary gives it a name and type.
    pub field_id: i16,
    /// Entry value.
    pub data: FieldEntryData<'a>,
}

/// Value of a decoded field entry.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldEntryData<'a> {
    /// Raw content; the caller interprets it once the dictionary names
    /// the field's type (see [`prim::primitive_from_content`]).
    Raw(&'a [u8]),
    /// Value decoded through a set definition, which carries its type.
    Decoded(PrimitiveValue<&'a [u8]>),
}

/// Streaming reader over a field list's entries.
///
/// Cloning the reader clones the iteration state, so a sub-container can
/// be walked (for dumps, say) without disturbing the enclosing pass.
#[derive(Debug, Clone)]
pub struct FieldListReader<'a, 'd> {
    cursor: DecodeIterator<'a>,
    set_def: Option<&'d FieldSetDef>,
    set_column: usize,
    standard_remaining: u16,
    standard_started: bool,
    has_standard: bool,
}

impl FieldList {
    /// Decode the header and return a reader positioned at the first
    /// entry. `set_db` must be supplied when the enclosing container
    /// carried set definitions.
    pub fn decode<'a, 'd>(
        it: &mut DecodeIterator<'a>,
        set_db: Option<&'d LocalFieldSetDefDb>,
    ) -> Result<(Self, FieldListReader<'a, 'd>)> {
        let flags = FieldListFlags::from_bits(it.get_u8()?)
            .ok_or(CodecError::InvalidData("unknown field list flags"))?;
        let mut header = Self { flags, ..Self::default() };
        if flags.contains(FieldListFlags::HAS_INFO) {
            header.dictionary_id = prim::get_u15(it)?;
            header.field_list_num = it.get_u16()?;
        }
        if flags.contains(FieldListFlags::HAS_SET_ID) {
            header.set_id = prim::get_u15(it)?;
        }
        let set_def = if flags.contains(FieldListFlags::HAS_SET_DATA) {
            let def = set_db
                .and_then(|db| db.find(header.set_id))
                .ok_or(CodecError::InvalidData("set id has no definition"))?;
            Some(def)
        } else {
            None
        };
        let rest = it.take_rest();
        let reader = FieldListReader {
            cursor: it.child(rest),
            set_def,
            set_column: 0,
            standard_remaining: 0,
            standard_started: false,
            has_standard: flags.contains(FieldListFlags::HAS_STANDARD_DATA),
        };
        Ok((header, reader))
    }
}

impl<'a> FieldListReader<'a, '_> {
    /// Next entry, or `None` at the end of the container.
    pub fn next_entry(&mut self) -> Result<Option<FieldEntry<'a>>> {
        // Set-bound columns come first and bind positionally.
        if let Some(def) = self.set_def {
            if self.set_column < def.entries.len() {
                let column = &def.entries[self.set_column];
                self.set_column += 1;
                let value = set_def::get_set_value(&mut self.cursor, column.data_type)?;
                return Ok(Some(FieldEntry {
                    field_id: column.field_id,
                    data: FieldEntryData::Decoded(value),
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
        let field_id = self.cursor.get_i16()?;
        let content = prim::get_buffer15(&mut self.cursor)?;
        Ok(Some(FieldEntry { field_id, data: FieldEntryData::Raw(content) }))
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::set_def::FieldSetDefEntry;

    fn enc() -> EncodeIterator {
        EncodeIterator::new(BytesMut::with_capacity(512), (14, 1))
    }

    #[test]
    fn quote_record_wire_bytes() {
        // One symbol field and one enumerated field: fifteen bytes.
        let header =
            FieldList { flags: FieldListFlags::HAS_STANDARD_DATA, ..FieldList::default() };
        let mut it = enc();
        header.encode_init(&mut it).unwrap();
        encode_entry_preencoded(&mut it, 22, b"AAA.N").unwrap();
        encode_entry(&mut it, 4, &PrimitiveValue::<&[u8]>::Enum(1)).unwrap();
        encode_complete(&mut it, true).unwrap();

        let expected = [
            0x08, // flags: standard data
            0x00, 0x02, // count
            0x00, 0x16, // field 22
            0x05, b'A', b'A', b'A', b'.', b'N', // "AAA.N"
            0x00, 0x04, // field 4
            0x01, 0x01, // enum 1
        ];
        assert_eq!(it.written(), expected);
        assert_eq!(it.written().len(), 15);
    }

    #[test]
    fn info_block_precedes_the_entries() {
        let header = FieldList {
            flags: FieldListFlags::HAS_INFO | FieldListFlags::HAS_STANDARD_DATA,
            dictionary_id: 1,
            field_list_num: 3,
            set_id: 0,
        };
        let mut it = enc();
        header.encode_init(&mut it).unwrap();
        encode_entry(&mut it, 4, &PrimitiveValue::<&[u8]>::Enum(1)).unwrap();
        encode_complete(&mut it, true).unwrap();

        // flags, dictionary id (rb15), list number, count, one entry.
        assert_eq!(it.written()[..4], [0x09, 0x01, 0x00, 0x03]);

        let buf = it.take().unwrap();
        let mut dec = DecodeIterator::new(&buf, (14, 1));
        let (round, _) = FieldList::decode(&mut dec, None).unwrap();
        assert_eq!(round.dictionary_id, 1);
        assert_eq!(round.field_list_num, 3);
    }

    #[test]
    fn round_trip_with_blank() {
        let header = FieldList {
            flags: FieldListFlags::HAS_STANDARD_DATA,
            ..FieldList::default()
        };
        let mut it = enc();
        header.encode_init(&mut it).unwrap();
        encode_entry(&mut it, 6, &PrimitiveValue::<&[u8]>::Real(crate::value::Real::from_exponent(395, -1))).unwrap();
        encode_entry_blank(&mut it, 19).unwrap();
        encode_complete(&mut it, true).unwrap();

        let buf = it.take().unwrap();
        let mut dec = DecodeIterator::new(&buf, (14, 1));
        let (round, mut reader) = FieldList::decode(&mut dec, None).unwrap();
        assert_eq!(round.flags, header.flags);

        let first = reader.next_entry().unwrap().unwrap();
        assert_eq!(first.field_id, 6);
        match first.data {
            FieldEntryData::Raw(content) => {
                let value = prim::primitive_from_content(DataType::Real, content).unwrap();
                assert_eq!(
                    value,
                    PrimitiveValue::Real(crate::value::Real::from_exponent(395, -1))
                );
            }
            FieldEntryData::Decoded(_) => unreachable!("standard entries decode raw"),
        }

        let second = reader.next_entry().unwrap().unwrap();
        assert_eq!(second.field_id, 19);
        assert_eq!(second.data, FieldEntryData::Raw(&[][..]));

        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn set_row_binds_positionally() {
        let def = FieldSetDef {
            set_id: 0,
            entries: vec![
                FieldSetDefEntry { field_id: 22, data_type: DataType::Real4Rb },
                FieldSetDefEntry { field_id: 25, data_type: DataType::UInt2 },
            ],
        };
        let db = LocalFieldSetDefDb { defs: vec![def.clone()] };

        let header =
            FieldList { flags: FieldListFlags::HAS_SET_DATA, ..FieldList::default() };
        let mut it = enc();
        header.encode_init(&mut it).unwrap();
        let row: Vec<PrimitiveValue<&[u8]>> = vec![
            PrimitiveValue::Real(crate::value::Real::from_exponent(995, -2)),
            PrimitiveValue::UInt(1200),
        ];
        encode_set_row(&mut it, &def, &row).unwrap();
        encode_complete(&mut it, true).unwrap();

        let buf = it.take().unwrap();
        let mut dec = DecodeIterator::new(&buf, (14, 1));
        let (_, mut reader) = FieldList::decode(&mut dec, Some(&db)).unwrap();

        let first = reader.next_entry().unwrap().unwrap();
        assert_eq!(first.field_id, 22);
        let second = reader.next_entry().unwrap().unwrap();
        assert_eq!(second.field_id, 25);
        assert_eq!(second.data, FieldEntryData::Decoded(PrimitiveValue::UInt(1200)));
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn unsuccessful_complete_rolls_back() {
        let mut it = enc();
        it.put_u8(0xEE).unwrap();
        let header =
            FieldList { flags: FieldListFlags::HAS_STANDARD_DATA, ..FieldList::default() };
        header.encode_init(&mut it).unwrap();
        encode_entry_preencoded(&mut it, 1, b"x").unwrap();
        encode_complete(&mut it, false).unwrap();
        assert_eq!(it.written(), &[0xEE]);
    }

    #[test]
    fn completing_twice_is_an_error() {
        let header =
            FieldList { flags: FieldListFlags::HAS_STANDARD_DATA, ..FieldList::default() };
        let mut it = enc();
        header.encode_init(&mut it).unwrap();
        encode_entry_blank(&mut it, 2).unwrap();
        encode_complete(&mut it, true).unwrap();
        assert!(encode_complete(&mut it, true).is_err());
    }

    #[test]
    fn clone_of_reader_does_not_disturb_iteration() {
        let header =
            FieldList { flags: FieldListFlags::HAS_STANDARD_DATA, ..FieldList::default() };
        let mut it = enc();
        header.encode_init(&mut it).unwrap();
        encode_entry_preencoded(&mut it, 1, b"a").unwrap();
        encode_entry_preencoded(&mut it, 2, b"b").unwrap();
        encode_complete(&mut it, true).unwrap();

        let buf = it.take().unwrap();
        let mut dec = DecodeIterator::new(&buf, (14, 1));
        let (_, mut reader) = FieldList::decode(&mut dec, None).unwrap();

        let mut probe = reader.clone();
        while probe.next_entry().unwrap().is_some() {}

        // Original still at the first entry.
        assert_eq!(reader.next_entry().unwrap().unwrap().field_id, 1);
        assert_eq!(reader.next_entry().unwrap().unwrap().field_id, 2);
    }
}
