//! Set-definition databases.
//!
//! A set definition fixes the column layout of repeated rows inside a
//! container: each row then elides per-value ids and (for the narrow
//! variants) per-value lengths, binding values to definitions by
//! position. Databases ride inline in the container header and live only
//! while the container is being decoded.

use crate::{
    error::{CodecError, Result},
    iter::{DecodeIterator, EncodeIterator},
    prim,
    types::DataType,
    value::PrimitiveValue,
};

/// Highest set id a database may carry.
pub const MAX_SET_ID: u16 = 15;
/// Most definitions one database may carry.
pub const MAX_LOCAL_DEFS: usize = 255;

/// One column of a field-list set definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSetDefEntry {
    /// Field id the column binds to.
    pub field_id: i16,
    /// Value type; a set-defined narrow variant or a plain primitive.
    pub data_type: DataType,
}

/// A field-list set definition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldSetDef {
    /// Id entries reference via the container's set-id section.
    pub set_id: u16,
    /// Columns, in row order.
    pub entries: Vec<FieldSetDefEntry>,
}

/// Inline database of field-list set definitions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocalFieldSetDefDb {
    /// Definitions carried by the enclosing container.
    pub defs: Vec<FieldSetDef>,
}

impl LocalFieldSetDefDb {
    /// Look up a definition by set id.
    #[must_use]
    pub fn find(&self, set_id: u16) -> Option<&FieldSetDef> {
        self.defs.iter().find(|d| d.set_id == set_id)
    }

    /// Encode the database at the iterator's cursor.
    pub fn encode(&self, it: &mut EncodeIterator) -> Result<()> {
        if self.defs.len() > MAX_LOCAL_DEFS {
            return Err(CodecError::InvalidData("too many set definitions"));
        }
        it.put_u8(0)?; // db flags, reserved
        it.put_u8(self.defs.len() as u8)?;
        for def in &self.defs {
            if def.set_id > MAX_SET_ID {
                return Err(CodecError::InvalidData("set id out of range"));
            }
            if def.entries.len() > 255 {
                return Err(CodecError::InvalidData("set definition too wide"));
            }
            prim::put_u15(it, def.set_id)?;
            it.put_u8(def.entries.len() as u8)?;
            for entry in &def.entries {
                it.put_i16(entry.field_id)?;
                it.put_u8(entry.data_type.to_wire())?;
            }
        }
        Ok(())
    }

    /// Decode a database.
    pub fn decode(it: &mut DecodeIterator<'_>) -> Result<Self> {
        let _flags = it.get_u8()?;
        let num = it.get_u8()?;
        let mut defs = Vec::with_capacity(usize::from(num));
        for _ in 0..num {
            let set_id = prim::get_u15(it)?;
            if set_id > MAX_SET_ID {
                return Err(CodecError::InvalidData("set id out of range"));
            }
            let count = it.get_u8()?;
            let mut entries = Vec::with_capacity(usize::from(count));
            for _ in 0..count {
                let field_id = it.get_i16()?;
                let data_type = DataType::from_wire(it.get_u8()?)?;
                entries.push(FieldSetDefEntry { field_id, data_type });
            }
            defs.push(FieldSetDef { set_id, entries });
        }
        Ok(Self { defs })
    }
}

/// One column of an element-list set definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementSetDefEntry<B> {
    /// Element name the column binds to.
    pub name: B,
    /// Value type; a set-defined narrow variant or a plain primitive.
    pub data_type: DataType,
}

/// An element-list set definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementSetDef<B> {
    /// Id entries reference via the container's set-id section.
    pub set_id: u16,
    /// Columns, in row order.
    pub entries: Vec<ElementSetDefEntry<B>>,
}

/// Inline database of element-list set definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalElementSetDefDb<B> {
    /// Definitions carried by the enclosing container.
    pub defs: Vec<ElementSetDef<B>>,
}

impl<B> Default for LocalElementSetDefDb<B> {
    fn default() -> Self {
        Self { defs: Vec::new() }
    }
}

impl<B: AsRef<[u8]>> LocalElementSetDefDb<B> {
    /// Look up a definition by set id.
    #[must_use]
    pub fn find(&self, set_id: u16) -> Option<&ElementSetDef<B>> {
        self.defs.iter().find(|d| d.set_id == set_id)
    }

    /// Encode the database at the iterator's cursor.
    pub fn encode(&self, it: &mut EncodeIterator) -> Result<()> {
        if self.defs.len() > MAX_LOCAL_DEFS {
            return Err(CodecError::InvalidData("too many set definitions"));
        }
        it.put_u8(0)?;
        it.put_u8(self.defs.len() as u8)?;
        for def in &self.defs {
            if def.set_id > MAX_SET_ID {
                return Err(CodecError::InvalidData("set id out of range"));
            }
            if def.entries.len() > 255 {
                return Err(CodecError::InvalidData("set definition too wide"));
            }
            prim::put_u15(it, def.set_id)?;
            it.put_u8(def.entries.len() as u8)?;
            for entry in &def.entries {
                prim::put_buffer15(it, entry.name.as_ref())?;
                it.put_u8(entry.data_type.to_wire())?;
            }
        }
        Ok(())
    }
}

impl<'a> LocalElementSetDefDb<&'a [u8]> {
    /// Decode a database borrowing names from the input buffer.
    pub fn decode(it: &mut DecodeIterator<'a>) -> Result<Self> {
        let _flags = it.get_u8()?;
        let num = it.get_u8()?;
        let mut defs = Vec::with_capacity(usize::from(num));
        for _ in 0..num {
            let set_id = prim::get_u15(it)?;
            if set_id > MAX_SET_ID {
                return Err(CodecError::InvalidData("set id out of range"));
            }
            let count = it.get_u8()?;
            let mut entries = Vec::with_capacity(usize::from(count));
            for _ in 0..count {
                let name = prim::get_buffer15(it)?;
                let data_type = DataType::from_wire(it.get_u8()?)?;
                entries.push(ElementSetDefEntry { name, data_type });
            }
            defs.push(ElementSetDef { set_id, entries });
        }
        Ok(Self { defs })
    }
}

/// Encode one set-bound value in the width its definition declares.
///
/// # Errors
///
/// `CodecError::ValueOutOfRange` when the value does not fit the
/// declared width; `CodecError::InvalidData` for type mismatches.
pub fn put_set_value<B: AsRef<[u8]>>(
    it: &mut EncodeIterator,
    ty: DataType,
    value: &PrimitiveValue<B>,
) -> Result<()> {
    match (ty, value) {
        (DataType::Int1 | DataType::Int2 | DataType::Int4 | DataType::Int8, PrimitiveValue::Int(v)) => {
            let width = ty.set_width().ok_or(CodecError::InvalidData("bad set type"))?;
            if prim::int_content_len(*v) > width {
                return Err(CodecError::ValueOutOfRange("signed value too wide for set column"));
            }
            it.put_slice(&prim::int_content(*v, width)[..width])
        }
        (
            DataType::UInt1 | DataType::UInt2 | DataType::UInt4 | DataType::UInt8,
            PrimitiveValue::UInt(v),
        ) => {
            let width = ty.set_width().ok_or(CodecError::InvalidData("bad set type"))?;
            if prim::uint_content_len(*v) > width {
                return Err(CodecError::ValueOutOfRange("unsigned value too wide for set column"));
            }
            it.put_slice(&prim::uint_content(*v, width)[..width])
        }
        (DataType::Float4, PrimitiveValue::Float(v)) => it.put_slice(&v.to_bits().to_be_bytes()),
        (DataType::Double8, PrimitiveValue::Double(v)) => it.put_slice(&v.to_bits().to_be_bytes()),
        (DataType::Real4Rb, PrimitiveValue::Real(v)) => {
            if !v.hint.is_special() && prim::int_content_len(v.mantissa) > 4 {
                return Err(CodecError::ValueOutOfRange("real mantissa too wide for set column"));
            }
            prim::put_real_ls(it, *v)
        }
        (DataType::Real8Rb, PrimitiveValue::Real(v)) => prim::put_real_ls(it, *v),
        (DataType::Real4Rb | DataType::Real8Rb, PrimitiveValue::Blank(_)) => prim::put_blank_ls(it),
        (DataType::Date4, PrimitiveValue::Date(v)) => prim::put_date_content(it, *v),
        (DataType::Time3, PrimitiveValue::Time(v)) => {
            if prim::time_content_len(*v) > 3 {
                return Err(CodecError::ValueOutOfRange("time precision too fine for set column"));
            }
            it.put_u8(v.hour)?;
            it.put_u8(v.minute)?;
            it.put_u8(v.second)
        }
        (DataType::Time5, PrimitiveValue::Time(v)) => {
            if prim::time_content_len(*v) > 5 {
                return Err(CodecError::ValueOutOfRange("time precision too fine for set column"));
            }
            it.put_u8(v.hour)?;
            it.put_u8(v.minute)?;
            it.put_u8(v.second)?;
            it.put_u16(v.millisecond)
        }
        (DataType::DateTime7, PrimitiveValue::DateTime(v)) => {
            if prim::time_content_len(v.time) > 3 {
                return Err(CodecError::ValueOutOfRange("time precision too fine for set column"));
            }
            prim::put_date_content(it, v.date)?;
            it.put_u8(v.time.hour)?;
            it.put_u8(v.time.minute)?;
            it.put_u8(v.time.second)
        }
        (DataType::DateTime9, PrimitiveValue::DateTime(v)) => {
            if prim::time_content_len(v.time) > 5 {
                return Err(CodecError::ValueOutOfRange("time precision too fine for set column"));
            }
            prim::put_date_content(it, v.date)?;
            it.put_u8(v.time.hour)?;
            it.put_u8(v.time.minute)?;
            it.put_u8(v.time.second)?;
            it.put_u16(v.time.millisecond)
        }
        // Plain primitives in a set definition fall back to the
        // length-specified encoding.
        (plain, value) if plain.is_primitive() => prim::put_primitive_ls(it, value),
        _ => Err(CodecError::InvalidData("set value does not match definition type")),
    }
}

/// Decode one set-bound value in the width its definition declares.
pub fn get_set_value<'a>(
    it: &mut DecodeIterator<'a>,
    ty: DataType,
) -> Result<PrimitiveValue<&'a [u8]>> {
    if let Some(width) = ty.set_width() {
        let base = ty.base_primitive().ok_or(CodecError::UnsupportedDataType(ty.to_wire()))?;
        let content = it.take(width)?;
        return match base {
            DataType::Int => Ok(PrimitiveValue::Int(prim::int_from_content(content)?)),
            DataType::UInt => Ok(PrimitiveValue::UInt(prim::uint_from_content(content)?)),
            DataType::Float | DataType::Double | DataType::Date | DataType::Time
            | DataType::DateTime => prim::primitive_from_content(base, content),
            _ => Err(CodecError::UnsupportedDataType(ty.to_wire())),
        };
    }
    // Length-prefixed set variants and plain primitives.
    let base = ty.base_primitive().ok_or(CodecError::UnsupportedDataType(ty.to_wire()))?;
    let content = prim::get_buffer15(it)?;
    prim::primitive_from_content(base, content)
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;

    fn enc() -> EncodeIterator {
        EncodeIterator::new(BytesMut::with_capacity(256), (14, 1))
    }

    #[test]
    fn field_db_round_trip() {
        let db = LocalFieldSetDefDb {
            defs: vec![FieldSetDef {
                set_id: 3,
                entries: vec![
                    FieldSetDefEntry { field_id: 22, data_type: DataType::Real4Rb },
                    FieldSetDefEntry { field_id: 25, data_type: DataType::UInt2 },
                ],
            }],
        };
        let mut it = enc();
        db.encode(&mut it).unwrap();

        let mut dec = DecodeIterator::new(it.written(), (14, 1));
        let round = LocalFieldSetDefDb::decode(&mut dec).unwrap();
        assert_eq!(round, db);
        assert!(dec.is_empty());
    }

    #[test]
    fn narrow_column_rejects_wide_value() {
        let mut it = enc();
        let err = put_set_value::<&[u8]>(&mut it, DataType::UInt1, &PrimitiveValue::UInt(256))
            .unwrap_err();
        assert!(matches!(err, CodecError::ValueOutOfRange(_)));
        // Failed encode wrote nothing.
        assert!(it.written().is_empty());
    }

    #[test]
    fn set_values_round_trip_in_declared_width() {
        let cases: Vec<(DataType, PrimitiveValue<&[u8]>)> = vec![
            (DataType::Int1, PrimitiveValue::Int(-5)),
            (DataType::UInt2, PrimitiveValue::UInt(40_000)),
            (DataType::Int8, PrimitiveValue::Int(i64::MIN)),
            (DataType::Float4, PrimitiveValue::Float(1.5)),
            (
                DataType::Real4Rb,
                PrimitiveValue::Real(crate::value::Real::from_exponent(1995, -2)),
            ),
            (
                DataType::Time5,
                PrimitiveValue::Time(crate::value::Time {
                    hour: 9,
                    minute: 30,
                    second: 1,
                    millisecond: 250,
                    ..crate::value::Time::MIDNIGHT
                }),
            ),
        ];
        for (ty, value) in cases {
            let mut it = enc();
            put_set_value(&mut it, ty, &value).unwrap();
            let mut dec = DecodeIterator::new(it.written(), (14, 1));
            let round = get_set_value(&mut dec, ty).unwrap();
            assert_eq!(round, value, "type {ty:?}");
            assert!(dec.is_empty());
        }
    }
}
