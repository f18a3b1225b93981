//! Arrays: homogeneous primitive items.
//!
//! Items either share a fixed content width (item length non-zero) or
//! carry individual rb15 length prefixes (item length zero). Used for
//! batch request name lists, view field lists, and QoS lists.
//!
//! Wire layout: `[item type u8][item length rb15][count u16][items]`.

use crate::{
    error::{CodecError, Result},
    iter::{DecodeIterator, EncodeIterator, EncodeLevel, LevelState},
    prim,
    types::DataType,
    value::PrimitiveValue,
};

/// Array header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Array {
    /// Primitive type of every item.
    pub item_type: DataType,
    /// Fixed content width per item; 0 means variable, each item
    /// rb15-prefixed.
    pub item_length: u16,
}

impl Default for Array {
    fn default() -> Self {
        Self { item_type: DataType::Buffer, item_length: 0 }
    }
}

impl Array {
    /// Begin encoding. Pair with [`encode_complete`].
    pub fn encode_init(&self, it: &mut EncodeIterator) -> Result<()> {
        if self.item_type.is_container() {
            return Err(CodecError::InvalidArgument("array items must be primitives"));
        }
        let start = it.position();
        it.put_u8(self.item_type.to_wire())?;
        prim::put_u15(it, self.item_length)?;
        let pos = it.position();
        it.put_u16(0)?;
        it.push_level(EncodeLevel {
            container: DataType::Array,
            state: LevelState::Entries,
            start,
            size_mark: None,
            entry_mark: None,
            count_pos: Some(pos),
            count: 0,
            flags: self.item_length,
            sub_type: self.item_type.to_wire(),
        })
    }
}

/// Append one item.
///
/// Fixed-width arrays require the value to fit the declared width;
/// variable-width arrays emit an rb15 length per item.
pub fn encode_item<B: AsRef<[u8]>>(
    it: &mut EncodeIterator,
    value: &PrimitiveValue<B>,
) -> Result<()> {
    let level = it.expect_level(DataType::Array, &[LevelState::Entries])?;
    let item_length = level.flags;
    let item_type = DataType::from_wire(level.sub_type)?;
    if item_length == 0 {
        prim::put_primitive_ls(it, value)?;
    } else {
        encode_fixed_item(it, item_type, usize::from(item_length), value)?;
    }
    let level = it.level_mut()?;
    level.count =
        level.count.checked_add(1).ok_or(CodecError::InvalidData("item count overflow"))?;
    Ok(())
}

fn encode_fixed_item<B: AsRef<[u8]>>(
    it: &mut EncodeIterator,
    item_type: DataType,
    width: usize,
    value: &PrimitiveValue<B>,
) -> Result<()> {
    match (item_type, value) {
        (DataType::Int, PrimitiveValue::Int(v)) => {
            if prim::int_content_len(*v) > width || width > 8 {
                return Err(CodecError::ValueOutOfRange("signed item exceeds fixed width"));
            }
            it.put_slice(&prim::int_content(*v, width)[..width])
        }
        (DataType::UInt, PrimitiveValue::UInt(v)) => {
            if prim::uint_content_len(*v) > width || width > 8 {
                return Err(CodecError::ValueOutOfRange("unsigned item exceeds fixed width"));
            }
            it.put_slice(&prim::uint_content(*v, width)[..width])
        }
        (DataType::Enum, PrimitiveValue::Enum(v)) => {
            if prim::uint_content_len(u64::from(*v)) > width || width > 2 {
                return Err(CodecError::ValueOutOfRange("enum item exceeds fixed width"));
            }
            it.put_slice(&prim::uint_content(u64::from(*v), width)[..width])
        }
        (DataType::Float, PrimitiveValue::Float(v)) if width == 4 => {
            it.put_slice(&v.to_bits().to_be_bytes())
        }
        (DataType::Double, PrimitiveValue::Double(v)) if width == 8 => {
            it.put_slice(&v.to_bits().to_be_bytes())
        }
        (DataType::Date, PrimitiveValue::Date(v)) if width == 4 => {
            prim::put_date_content(it, *v)
        }
        (
            DataType::Buffer | DataType::AsciiString | DataType::Utf8String
            | DataType::RmtesString,
            PrimitiveValue::Buffer(bytes),
        ) => {
            let bytes = bytes.as_ref();
            if bytes.len() != width {
                return Err(CodecError::ValueOutOfRange("buffer item width mismatch"));
            }
            it.put_slice(bytes)
        }
        _ => Err(CodecError::InvalidData("item does not match array type and width")),
    }
}

/// Finish the array. With `success == false` everything written since
/// `encode_init` is rolled back.
pub fn encode_complete(it: &mut EncodeIterator, success: bool) -> Result<()> {
    it.expect_level(DataType::Array, &[LevelState::Entries])?;
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

/// Streaming reader over an array's items. `Clone` to re-enter.
#[derive(Debug, Clone)]
pub struct ArrayReader<'a> {
    cursor: DecodeIterator<'a>,
    remaining: u16,
    item_type: DataType,
    item_length: u16,
}

impl Array {
    /// Decode the header and return a reader positioned at the first
    /// item.
    pub fn decode<'a>(it: &mut DecodeIterator<'a>) -> Result<(Self, ArrayReader<'a>)> {
        let item_type = DataType::from_wire(it.get_u8()?)?;
        if item_type.is_container() {
            return Err(CodecError::InvalidData("array items must be primitives"));
        }
        let item_length = prim::get_u15(it)?;
        let remaining = it.get_u16()?;
        let header = Self { item_type, item_length };
        let rest = it.take_rest();
        let reader =
            ArrayReader { cursor: it.child(rest), remaining, item_type, item_length };
        Ok((header, reader))
    }
}

impl<'a> ArrayReader<'a> {
    /// Next item's raw content, or `None` at the end.
    pub fn next_content(&mut self) -> Result<Option<&'a [u8]>> {
        if self.remaining == 0 {
            if !self.cursor.is_empty() {
                return Err(CodecError::InvalidData("trailing bytes after last item"));
            }
            return Ok(None);
        }
        self.remaining -= 1;
        let content = if self.item_length == 0 {
            prim::get_buffer15(&mut self.cursor)?
        } else {
            self.cursor.take(usize::from(self.item_length))?
        };
        Ok(Some(content))
    }

    /// Next item decoded as a primitive value, or `None` at the end.
    pub fn next_item(&mut self) -> Result<Option<PrimitiveValue<&'a [u8]>>> {
        match self.next_content()? {
            None => Ok(None),
            Some(content) => Ok(Some(prim::primitive_from_content(self.item_type, content)?)),
        }
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
    fn variable_width_string_items() {
        let array = Array { item_type: DataType::AsciiString, item_length: 0 };
        let mut it = enc();
        array.encode_init(&mut it).unwrap();
        for name in ["IBM.N", "MSFT.O", "A"] {
            encode_item(&mut it, &PrimitiveValue::Buffer(name.as_bytes())).unwrap();
        }
        encode_complete(&mut it, true).unwrap();

        let buf = it.take().unwrap();
        let mut dec = DecodeIterator::new(&buf, (14, 1));
        let (header, mut reader) = Array::decode(&mut dec).unwrap();
        assert_eq!(header.item_length, 0);

        let mut names = Vec::new();
        while let Some(content) = reader.next_content().unwrap() {
            names.push(content);
        }
        assert_eq!(names, vec![b"IBM.N".as_slice(), b"MSFT.O", b"A"]);
    }

    #[test]
    fn fixed_width_uint_items() {
        let array = Array { item_type: DataType::UInt, item_length: 4 };
        let mut it = enc();
        array.encode_init(&mut it).unwrap();
        encode_item(&mut it, &PrimitiveValue::<&[u8]>::UInt(7)).unwrap();
        encode_item(&mut it, &PrimitiveValue::<&[u8]>::UInt(0xFFFF_FFFF)).unwrap();
        encode_complete(&mut it, true).unwrap();

        // type + item length + count + two 4-byte items
        assert_eq!(it.written().len(), 1 + 1 + 2 + 8);

        let buf = it.take().unwrap();
        let mut dec = DecodeIterator::new(&buf, (14, 1));
        let (_, mut reader) = Array::decode(&mut dec).unwrap();
        assert_eq!(reader.next_item().unwrap(), Some(PrimitiveValue::UInt(7)));
        assert_eq!(reader.next_item().unwrap(), Some(PrimitiveValue::UInt(0xFFFF_FFFF)));
        assert_eq!(reader.next_item().unwrap(), None);
    }

    #[test]
    fn oversized_fixed_item_rejected() {
        let array = Array { item_type: DataType::UInt, item_length: 1 };
        let mut it = enc();
        array.encode_init(&mut it).unwrap();
        let err = encode_item(&mut it, &PrimitiveValue::<&[u8]>::UInt(300)).unwrap_err();
        assert!(matches!(err, CodecError::ValueOutOfRange(_)));
    }
}
