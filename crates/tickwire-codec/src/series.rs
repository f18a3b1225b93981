//! Series: uniform unkeyed records.
//!
//! The bulk-transfer container: dictionary payloads, symbol lists,
//! historical rows. Entries have no key and no action; set definitions
//! carried here are referenced by the field or element lists nested in
//! each entry.

use bitflags::bitflags;

use crate::{
    error::{CodecError, Result},
    iter::{DecodeIterator, EncodeIterator, EncodeLevel, LevelState, MarkWidth},
    prim,
    types::DataType,
};

bitflags! {
    /// Series header flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SeriesFlags: u8 {
        /// An inline set-definition database precedes the entries.
        const HAS_SET_DEFS = 0x01;
        /// A summary-data sub-container precedes the entries.
        const HAS_SUMMARY_DATA = 0x02;
        /// A total-count hint helps receivers size their structures.
        const HAS_TOTAL_COUNT_HINT = 0x04;
    }
}

/// Series header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Series<B> {
    /// Header flags.
    pub flags: SeriesFlags,
    /// Container type of every entry payload.
    pub container_type: DataType,
    /// Pre-encoded set-definition database.
    pub set_defs: Option<B>,
    /// Pre-encoded summary data.
    pub summary: Option<B>,
    /// Expected total entry count across all parts.
    pub total_count_hint: u32,
}

impl<B> Default for Series<B> {
    fn default() -> Self {
        Self {
            flags: SeriesFlags::default(),
            container_type: DataType::NoData,
            set_defs: None,
            summary: None,
            total_count_hint: 0,
        }
    }
}

fn finish_header(it: &mut EncodeIterator, flags: SeriesFlags, hint: u32) -> Result<()> {
    if flags.contains(SeriesFlags::HAS_TOTAL_COUNT_HINT) {
        prim::put_u30(it, hint)?;
    }
    let pos = it.position();
    it.put_u16(0)?;
    let level = it.level_mut()?;
    level.count_pos = Some(pos);
    level.state = LevelState::Entries;
    Ok(())
}

impl<B: AsRef<[u8]>> Series<B> {
    /// Begin encoding. Pair with [`encode_complete`].
    pub fn encode_init(&self, it: &mut EncodeIterator) -> Result<()> {
        if !self.container_type.is_container() {
            return Err(CodecError::InvalidArgument("series payload must be a container type"));
        }
        let start = it.position();
        it.put_u8(self.flags.bits())?;
        it.put_u8(self.container_type.to_wire())?;
        it.push_level(EncodeLevel {
            container: DataType::Series,
            state: LevelState::Init,
            start,
            size_mark: None,
            entry_mark: None,
            count_pos: None,
            count: 0,
            flags: u16::from(self.flags.bits()),
            sub_type: self.container_type.to_wire(),
        })?;
        if self.flags.contains(SeriesFlags::HAS_SET_DEFS) {
            let defs = self
                .set_defs
                .as_ref()
                .ok_or(CodecError::InvalidArgument("set-defs flag without set defs"))?;
            prim::put_buffer16(it, defs.as_ref())?;
        }
        if self.flags.contains(SeriesFlags::HAS_SUMMARY_DATA) {
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
        it.expect_level(DataType::Series, &[LevelState::Summary])?;
        let mark = it.reserve_mark(MarkWidth::U16Opt)?;
        it.level_mut()?.size_mark = Some(mark);
        Ok(())
    }

    /// Close the streamed summary and finish the header.
    pub fn encode_summary_complete(&self, it: &mut EncodeIterator) -> Result<()> {
        let level = it.expect_level(DataType::Series, &[LevelState::Summary])?;
        let mark = level
            .size_mark
            .take()
            .ok_or(CodecError::InvalidArgument("summary was not opened"))?;
        let len = it.position() - (mark.pos + mark.width.reserved_bytes());
        it.complete_mark(mark, len)?;
        finish_header(it, self.flags, self.total_count_hint)
    }
}

/// Append one entry with a pre-encoded payload.
pub fn encode_entry(it: &mut EncodeIterator, payload: &[u8]) -> Result<()> {
    it.expect_level(DataType::Series, &[LevelState::Entries])?;
    prim::put_buffer16(it, payload)?;
    bump_count(it)
}

/// Open an entry whose payload is encoded in place. Pair with
/// [`encode_entry_end`].
pub fn encode_entry_begin(it: &mut EncodeIterator) -> Result<()> {
    it.expect_level(DataType::Series, &[LevelState::Entries])?;
    let mark = it.reserve_mark(MarkWidth::U16Opt)?;
    let level = it.level_mut()?;
    level.entry_mark = Some(mark);
    level.state = LevelState::EntryOpen;
    Ok(())
}

/// Close an entry opened with [`encode_entry_begin`].
pub fn encode_entry_end(it: &mut EncodeIterator) -> Result<()> {
    let level = it.expect_level(DataType::Series, &[LevelState::EntryOpen])?;
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

/// Finish the series. With `success == false` everything written since
/// `encode_init` is rolled back.
pub fn encode_complete(it: &mut EncodeIterator, success: bool) -> Result<()> {
    it.expect_level(DataType::Series, &[LevelState::Init, LevelState::Entries])?;
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

/// Streaming reader over a series' entries. `Clone` to re-enter.
#[derive(Debug, Clone)]
pub struct SeriesReader<'a> {
    cursor: DecodeIterator<'a>,
    remaining: u16,
}

impl<'a> Series<&'a [u8]> {
    /// Decode the header and return a reader positioned at the first
    /// entry.
    pub fn decode(it: &mut DecodeIterator<'a>) -> Result<(Self, SeriesReader<'a>)> {
        let flags = SeriesFlags::from_bits(it.get_u8()?)
            .ok_or(CodecError::InvalidData("unknown series flags"))?;
        let container_type = DataType::from_wire(it.get_u8()?)?;
        let mut header = Self { flags, container_type, ..Self::default() };
        if flags.contains(SeriesFlags::HAS_SET_DEFS) {
            header.set_defs = Some(prim::get_buffer16(it)?);
        }
        if flags.contains(SeriesFlags::HAS_SUMMARY_DATA) {
            header.summary = Some(prim::get_buffer16(it)?);
        }
        if flags.contains(SeriesFlags::HAS_TOTAL_COUNT_HINT) {
            header.total_count_hint = prim::get_u30(it)?;
        }
        let remaining = it.get_u16()?;
        let rest = it.take_rest();
        let reader = SeriesReader { cursor: it.child(rest), remaining };
        Ok((header, reader))
    }
}

impl<'a> SeriesReader<'a> {
    /// Next entry payload, or `None` at the end of the container.
    pub fn next_entry(&mut self) -> Result<Option<&'a [u8]>> {
        if self.remaining == 0 {
            if !self.cursor.is_empty() {
                return Err(CodecError::InvalidData("trailing bytes after last entry"));
            }
            return Ok(None);
        }
        self.remaining -= 1;
        Ok(Some(prim::get_buffer16(&mut self.cursor)?))
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::{
        field_list::{self, FieldList, FieldListFlags},
        set_def::{FieldSetDef, FieldSetDefEntry, LocalFieldSetDefDb},
        value::PrimitiveValue,
    };

    fn enc() -> EncodeIterator {
        EncodeIterator::new(BytesMut::with_capacity(2048), (14, 1))
    }

    #[test]
    fn set_encoded_rows_share_the_series_database() {
        let def = FieldSetDef {
            set_id: 0,
            entries: vec![
                FieldSetDefEntry { field_id: 6, data_type: DataType::Real4Rb },
                FieldSetDefEntry { field_id: 25, data_type: DataType::UInt4 },
            ],
        };
        let db = LocalFieldSetDefDb { defs: vec![def.clone()] };
        let db_bytes = {
            let mut it = enc();
            db.encode(&mut it).unwrap();
            it.take().unwrap().to_vec()
        };

        let series = Series {
            flags: SeriesFlags::HAS_SET_DEFS | SeriesFlags::HAS_TOTAL_COUNT_HINT,
            container_type: DataType::FieldList,
            set_defs: Some(db_bytes.as_slice()),
            total_count_hint: 2,
            ..Series::default()
        };

        let mut it = enc();
        series.encode_init(&mut it).unwrap();
        for price in [995i64, 1005] {
            encode_entry_begin(&mut it).unwrap();
            let fl = FieldList {
                flags: FieldListFlags::HAS_SET_DATA,
                ..FieldList::default()
            };
            fl.encode_init(&mut it).unwrap();
            let row: Vec<PrimitiveValue<&[u8]>> = vec![
                PrimitiveValue::Real(crate::value::Real::from_exponent(price, -2)),
                PrimitiveValue::UInt(100),
            ];
            field_list::encode_set_row(&mut it, &def, &row).unwrap();
            field_list::encode_complete(&mut it, true).unwrap();
            encode_entry_end(&mut it).unwrap();
        }
        encode_complete(&mut it, true).unwrap();

        let buf = it.take().unwrap();
        let mut dec = DecodeIterator::new(&buf, (14, 1));
        let (header, mut reader) = Series::decode(&mut dec).unwrap();

        // The database decodes out of the header section...
        let mut db_dec = dec.child(header.set_defs.unwrap());
        let decoded_db = LocalFieldSetDefDb::decode(&mut db_dec).unwrap();
        assert_eq!(decoded_db, db);

        // ...and each entry's field list binds against it.
        let mut prices = Vec::new();
        while let Some(entry) = reader.next_entry().unwrap() {
            let mut entry_dec = dec.child(entry);
            let (_, mut fields) = FieldList::decode(&mut entry_dec, Some(&decoded_db)).unwrap();
            let first = fields.next_entry().unwrap().unwrap();
            assert_eq!(first.field_id, 6);
            prices.push(first.data);
        }
        assert_eq!(prices.len(), 2);
    }
}
