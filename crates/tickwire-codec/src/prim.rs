//! Byte-level primitive encodings.
//!
//! Three length disciplines appear on the wire:
//!
//! - *reserved-bit U15* (`rb15`): one byte below 0x80, otherwise two
//!   bytes with the high bit set;
//! - *optional-byte U16* (`u16opt`): one byte below 0xFE, otherwise the
//!   0xFE escape followed by two bytes;
//! - *reserved-bit U30* (`rb30`): the top two bits of the first byte
//!   select a total width of 1, 2, 3, or 4 bytes.
//!
//! Primitive *content* encodings carry no length of their own; a
//! length-specified value is an rb15 length followed by content. A zero
//! length is the blank sentinel for every primitive.

use crate::{
    error::{CodecError, Result},
    iter::{DecodeIterator, EncodeIterator},
    types::DataType,
    value::{
        Date, DateTime, PrimitiveValue, Qos, QosRate, QosTimeliness, Real, RealHint, State,
        Time,
    },
};

/// Largest value an rb15 length can carry.
pub const U15_MAX: u16 = 0x7FFF;
/// Largest value an rb30 can carry.
pub const U30_MAX: u32 = 0x3FFF_FFFF;

// --- variable-width unsigned helpers ---

/// Encoded width of an rb15 value.
#[must_use]
pub fn u15_len(v: u16) -> usize {
    if v < 0x80 { 1 } else { 2 }
}

pub(crate) fn put_u15(it: &mut EncodeIterator, v: u16) -> Result<()> {
    if v < 0x80 {
        it.put_u8(v as u8)
    } else if v <= U15_MAX {
        it.put_u16(v | 0x8000)
    } else {
        Err(CodecError::InvalidData("value exceeds U15 range"))
    }
}

pub(crate) fn get_u15(it: &mut DecodeIterator<'_>) -> Result<u16> {
    let first = it.get_u8()?;
    if first & 0x80 == 0 {
        Ok(u16::from(first))
    } else {
        let second = it.get_u8()?;
        Ok((u16::from(first & 0x7F) << 8) | u16::from(second))
    }
}

/// Encoded width of a u16opt value.
#[must_use]
pub fn u16opt_len(v: u16) -> usize {
    if v < 0xFE { 1 } else { 3 }
}

pub(crate) fn put_u16opt(it: &mut EncodeIterator, v: u16) -> Result<()> {
    if v < 0xFE {
        it.put_u8(v as u8)
    } else {
        it.ensure(3)?;
        it.put_u8(0xFE)?;
        it.put_u16(v)
    }
}

pub(crate) fn get_u16opt(it: &mut DecodeIterator<'_>) -> Result<u16> {
    let first = it.get_u8()?;
    if first == 0xFE { it.get_u16() } else { Ok(u16::from(first)) }
}

/// Encoded width of an rb30 value.
#[must_use]
pub fn u30_len(v: u32) -> usize {
    if v < 1 << 6 {
        1
    } else if v < 1 << 14 {
        2
    } else if v < 1 << 22 {
        3
    } else {
        4
    }
}

/// Encode a reserved-bit U30: the top two bits of the first byte select
/// a total width of 1, 2, 3, or 4 bytes. Used for total-count hints,
/// vector indices, and the fragment-header total length.
pub fn put_u30(it: &mut EncodeIterator, v: u32) -> Result<()> {
    if v > U30_MAX {
        return Err(CodecError::InvalidData("value exceeds U30 range"));
    }
    if v < 1 << 6 {
        it.put_u8(v as u8)
    } else if v < 1 << 14 {
        it.put_u16((v as u16) | 0x4000)
    } else if v < 1 << 22 {
        it.ensure(3)?;
        it.put_u8(((v >> 16) as u8) | 0x80)?;
        it.put_u16(v as u16)
    } else {
        it.put_u32(v | 0xC000_0000)
    }
}

/// Decode a reserved-bit U30.
pub fn get_u30(it: &mut DecodeIterator<'_>) -> Result<u32> {
    let first = it.get_u8()?;
    match first >> 6 {
        0 => Ok(u32::from(first)),
        1 => {
            let second = it.get_u8()?;
            Ok((u32::from(first & 0x3F) << 8) | u32::from(second))
        }
        2 => {
            let rest = it.get_u16()?;
            Ok((u32::from(first & 0x3F) << 16) | u32::from(rest))
        }
        _ => {
            let b = it.take(3)?;
            Ok((u32::from(first & 0x3F) << 24)
                | (u32::from(b[0]) << 16)
                | (u32::from(b[1]) << 8)
                | u32::from(b[2]))
        }
    }
}

// --- integer content ---

/// Narrowest of 1/2/4/8 bytes that preserves a signed value.
#[must_use]
pub fn int_content_len(v: i64) -> usize {
    if i64::from(v as i8) == v {
        1
    } else if i64::from(v as i16) == v {
        2
    } else if i64::from(v as i32) == v {
        4
    } else {
        8
    }
}

/// Narrowest of 1/2/4/8 bytes that preserves an unsigned value.
#[must_use]
pub fn uint_content_len(v: u64) -> usize {
    if v <= u64::from(u8::MAX) {
        1
    } else if v <= u64::from(u16::MAX) {
        2
    } else if v <= u64::from(u32::MAX) {
        4
    } else {
        8
    }
}

pub(crate) fn int_content(v: i64, width: usize) -> [u8; 8] {
    // Big-endian, truncated from the right of the full encoding.
    let full = v.to_be_bytes();
    let mut out = [0u8; 8];
    out[..width].copy_from_slice(&full[8 - width..]);
    out
}

pub(crate) fn uint_content(v: u64, width: usize) -> [u8; 8] {
    let full = v.to_be_bytes();
    let mut out = [0u8; 8];
    out[..width].copy_from_slice(&full[8 - width..]);
    out
}

/// Sign-extend big-endian content of any width 1..=8.
pub(crate) fn int_from_content(content: &[u8]) -> Result<i64> {
    if content.is_empty() || content.len() > 8 {
        return Err(CodecError::InvalidData("bad integer width"));
    }
    let negative = content[0] & 0x80 != 0;
    let mut out = [if negative { 0xFF } else { 0 }; 8];
    out[8 - content.len()..].copy_from_slice(content);
    Ok(i64::from_be_bytes(out))
}

pub(crate) fn uint_from_content(content: &[u8]) -> Result<u64> {
    if content.is_empty() || content.len() > 8 {
        return Err(CodecError::InvalidData("bad integer width"));
    }
    let mut out = [0u8; 8];
    out[8 - content.len()..].copy_from_slice(content);
    Ok(u64::from_be_bytes(out))
}

// --- length-specified primitives ---

/// Encode a length-specified signed integer.
pub fn put_int_ls(it: &mut EncodeIterator, v: i64) -> Result<()> {
    let width = int_content_len(v);
    it.ensure(1 + width)?;
    it.put_u8(width as u8)?;
    it.put_slice(&int_content(v, width)[..width])
}

/// Encode a length-specified unsigned integer.
pub fn put_uint_ls(it: &mut EncodeIterator, v: u64) -> Result<()> {
    let width = uint_content_len(v);
    it.ensure(1 + width)?;
    it.put_u8(width as u8)?;
    it.put_slice(&uint_content(v, width)[..width])
}

/// Encode a blank of any length-specified primitive.
pub fn put_blank_ls(it: &mut EncodeIterator) -> Result<()> {
    it.put_u8(0)
}

/// Encode a length-specified enumerated value.
pub fn put_enum_ls(it: &mut EncodeIterator, v: u16) -> Result<()> {
    put_uint_ls(it, u64::from(v))
}

/// Encode a length-specified 4-byte float.
pub fn put_float_ls(it: &mut EncodeIterator, v: f32) -> Result<()> {
    it.ensure(5)?;
    it.put_u8(4)?;
    it.put_slice(&v.to_bits().to_be_bytes())
}

/// Encode a length-specified 8-byte double.
pub fn put_double_ls(it: &mut EncodeIterator, v: f64) -> Result<()> {
    it.ensure(9)?;
    it.put_u8(8)?;
    it.put_slice(&v.to_bits().to_be_bytes())
}

// --- real ---

/// Content length of a real (hint byte plus mantissa).
#[must_use]
pub fn real_content_len(v: Real) -> usize {
    if v.hint.is_special() { 1 } else { 1 + int_content_len(v.mantissa) }
}

pub(crate) fn put_real_content(it: &mut EncodeIterator, v: Real) -> Result<()> {
    v.hint.validate()?;
    if v.hint.is_special() {
        return it.put_u8(v.hint.to_wire());
    }
    let width = int_content_len(v.mantissa);
    it.ensure(1 + width)?;
    it.put_u8(v.hint.to_wire())?;
    it.put_slice(&int_content(v.mantissa, width)[..width])
}

/// Encode a length-specified real.
pub fn put_real_ls(it: &mut EncodeIterator, v: Real) -> Result<()> {
    let len = real_content_len(v);
    it.ensure(1 + len)?;
    it.put_u8(len as u8)?;
    put_real_content(it, v)
}

pub(crate) fn real_from_content(content: &[u8]) -> Result<Real> {
    let hint = RealHint::from_wire(content[0])?;
    if hint.is_special() {
        if content.len() != 1 {
            return Err(CodecError::InvalidData("special real carries a mantissa"));
        }
        return Ok(Real { hint, mantissa: 0 });
    }
    let mantissa = if content.len() == 1 { 0 } else { int_from_content(&content[1..])? };
    Ok(Real { hint, mantissa })
}

// --- date / time / date-time ---

pub(crate) fn put_date_content(it: &mut EncodeIterator, v: Date) -> Result<()> {
    if !v.is_valid() {
        return Err(CodecError::InvalidData("date out of range"));
    }
    it.ensure(4)?;
    it.put_u8(v.day)?;
    it.put_u8(v.month)?;
    it.put_u16(v.year)
}

pub(crate) fn date_from_content(content: &[u8]) -> Result<Date> {
    if content.len() != 4 {
        return Err(CodecError::InvalidData("bad date width"));
    }
    let date =
        Date { day: content[0], month: content[1], year: u16::from_be_bytes([content[2], content[3]]) };
    if !date.is_valid() {
        return Err(CodecError::InvalidData("date out of range"));
    }
    Ok(date)
}

/// Content length of a time value: trailing zero precision truncates.
#[must_use]
pub fn time_content_len(v: Time) -> usize {
    if v.nanosecond != 0 {
        8
    } else if v.microsecond != 0 {
        7
    } else if v.millisecond != 0 {
        5
    } else if v.second != 0 {
        3
    } else {
        2
    }
}

pub(crate) fn put_time_content(it: &mut EncodeIterator, v: Time) -> Result<()> {
    if v.is_blank() || !v.is_valid() {
        return Err(CodecError::InvalidData("time out of range"));
    }
    let len = time_content_len(v);
    it.ensure(len)?;
    it.put_u8(v.hour)?;
    it.put_u8(v.minute)?;
    if len >= 3 {
        it.put_u8(v.second)?;
    }
    if len >= 5 {
        it.put_u16(v.millisecond)?;
    }
    if len >= 7 {
        // Upper nanosecond bits ride in the top three bits of the
        // microsecond field; the low byte follows separately.
        let micro = v.microsecond | ((v.nanosecond >> 8) << 13);
        it.put_u16(micro)?;
    }
    if len == 8 {
        it.put_u8((v.nanosecond & 0xFF) as u8)?;
    }
    Ok(())
}

pub(crate) fn time_from_content(content: &[u8]) -> Result<Time> {
    let mut t = Time::MIDNIGHT;
    match content.len() {
        2 | 3 | 5 | 7 | 8 => {}
        _ => return Err(CodecError::InvalidData("bad time width")),
    }
    t.hour = content[0];
    t.minute = content[1];
    if content.len() >= 3 {
        t.second = content[2];
    }
    if content.len() >= 5 {
        t.millisecond = u16::from_be_bytes([content[3], content[4]]);
    }
    if content.len() >= 7 {
        let micro = u16::from_be_bytes([content[5], content[6]]);
        t.microsecond = micro & 0x1FFF;
        t.nanosecond = (micro >> 13) << 8;
    }
    if content.len() == 8 {
        t.nanosecond |= u16::from(content[7]);
    }
    if !t.is_valid() {
        return Err(CodecError::InvalidData("time out of range"));
    }
    Ok(t)
}

/// Content length of a date-time value.
#[must_use]
pub fn datetime_content_len(v: DateTime) -> usize {
    4 + time_content_len(v.time)
}

pub(crate) fn put_datetime_content(it: &mut EncodeIterator, v: DateTime) -> Result<()> {
    put_date_content(it, v.date)?;
    put_time_content(it, v.time)
}

pub(crate) fn datetime_from_content(content: &[u8]) -> Result<DateTime> {
    if content.len() < 6 {
        return Err(CodecError::InvalidData("bad date-time width"));
    }
    let date = date_from_content(&content[..4])?;
    let time = time_from_content(&content[4..])?;
    Ok(DateTime { date, time })
}

/// Encode a length-specified date.
pub fn put_date_ls(it: &mut EncodeIterator, v: Date) -> Result<()> {
    if v.is_blank() {
        return put_blank_ls(it);
    }
    it.ensure(5)?;
    it.put_u8(4)?;
    put_date_content(it, v)
}

/// Encode a length-specified time.
pub fn put_time_ls(it: &mut EncodeIterator, v: Time) -> Result<()> {
    if v.is_blank() {
        return put_blank_ls(it);
    }
    let len = time_content_len(v);
    it.ensure(1 + len)?;
    it.put_u8(len as u8)?;
    put_time_content(it, v)
}

/// Encode a length-specified date-time.
pub fn put_datetime_ls(it: &mut EncodeIterator, v: DateTime) -> Result<()> {
    if v.is_blank() {
        return put_blank_ls(it);
    }
    let len = datetime_content_len(v);
    it.ensure(1 + len)?;
    it.put_u8(len as u8)?;
    put_datetime_content(it, v)
}

// --- qos ---

/// Content length of a QoS value.
#[must_use]
pub fn qos_content_len(v: Qos) -> usize {
    let mut len = 1;
    if v.timeliness == QosTimeliness::Delayed {
        len += 2;
    }
    if v.rate == QosRate::TimeConflated {
        len += 2;
    }
    len
}

pub(crate) fn put_qos_content(it: &mut EncodeIterator, v: Qos) -> Result<()> {
    let len = qos_content_len(v);
    it.ensure(len)?;
    let byte =
        ((v.timeliness as u8) << 5) | ((v.rate as u8) << 1) | u8::from(v.dynamic);
    it.put_u8(byte)?;
    if v.timeliness == QosTimeliness::Delayed {
        it.put_u16(v.time_info)?;
    }
    if v.rate == QosRate::TimeConflated {
        it.put_u16(v.rate_info)?;
    }
    Ok(())
}

pub(crate) fn get_qos(it: &mut DecodeIterator<'_>) -> Result<Qos> {
    let byte = it.get_u8()?;
    let timeliness = match (byte >> 5) & 0x07 {
        0 => QosTimeliness::Unspecified,
        1 => QosTimeliness::Realtime,
        2 => QosTimeliness::DelayedUnknown,
        3 => QosTimeliness::Delayed,
        _ => return Err(CodecError::InvalidData("unknown qos timeliness")),
    };
    let rate = match (byte >> 1) & 0x0F {
        0 => QosRate::Unspecified,
        1 => QosRate::TickByTick,
        2 => QosRate::JustInTimeConflated,
        3 => QosRate::TimeConflated,
        _ => return Err(CodecError::InvalidData("unknown qos rate")),
    };
    let mut qos = Qos { timeliness, rate, dynamic: byte & 0x01 != 0, ..Qos::default() };
    if timeliness == QosTimeliness::Delayed {
        qos.time_info = it.get_u16()?;
    }
    if rate == QosRate::TimeConflated {
        qos.rate_info = it.get_u16()?;
    }
    Ok(qos)
}

/// Encode a QoS as it appears in message headers (no length prefix).
pub fn put_qos(it: &mut EncodeIterator, v: Qos) -> Result<()> {
    put_qos_content(it, v)
}

pub(crate) fn qos_from_content(content: &[u8]) -> Result<Qos> {
    let mut it = DecodeIterator::new(content, (0, 0));
    let qos = get_qos(&mut it)?;
    if !it.is_empty() {
        return Err(CodecError::InvalidData("trailing qos bytes"));
    }
    Ok(qos)
}

// --- state ---

/// Content length of a state value.
#[must_use]
pub fn state_content_len(text_len: usize) -> usize {
    2 + u15_len(text_len as u16) + text_len
}

pub(crate) fn put_state_content<B: AsRef<[u8]>>(
    it: &mut EncodeIterator,
    v: &State<B>,
) -> Result<()> {
    let text = v.text.as_ref();
    if text.len() > usize::from(U15_MAX) {
        return Err(CodecError::InvalidData("state text too long"));
    }
    it.ensure(state_content_len(text.len()))?;
    it.put_u8(((v.stream_state as u8) << 3) | (v.data_state as u8))?;
    it.put_u8(v.code)?;
    put_u15(it, text.len() as u16)?;
    it.put_slice(text)
}

/// Encode a state as it appears in message headers (no length prefix).
pub fn put_state<B: AsRef<[u8]>>(it: &mut EncodeIterator, v: &State<B>) -> Result<()> {
    put_state_content(it, v)
}

pub(crate) fn get_state<'a>(it: &mut DecodeIterator<'a>) -> Result<State<&'a [u8]>> {
    let byte = it.get_u8()?;
    let stream_state = crate::value::StreamState::from_wire(byte >> 3)?;
    let data_state = crate::value::DataState::from_wire(byte & 0x07)?;
    let code = it.get_u8()?;
    let text_len = get_u15(it)?;
    let text = it.take(usize::from(text_len))?;
    Ok(State { stream_state, data_state, code, text })
}

pub(crate) fn state_from_content(content: &[u8]) -> Result<State<&[u8]>> {
    let mut it = DecodeIterator::new(content, (0, 0));
    let state = get_state(&mut it)?;
    if !it.is_empty() {
        return Err(CodecError::InvalidData("trailing state bytes"));
    }
    Ok(state)
}

// --- buffers ---

/// Encode an rb15-length-prefixed buffer.
pub fn put_buffer15(it: &mut EncodeIterator, bytes: &[u8]) -> Result<()> {
    if bytes.len() > usize::from(U15_MAX) {
        return Err(CodecError::InvalidData("buffer exceeds U15 length"));
    }
    it.ensure(u15_len(bytes.len() as u16) + bytes.len())?;
    put_u15(it, bytes.len() as u16)?;
    it.put_slice(bytes)
}

/// Encode a u16opt-length-prefixed buffer.
pub fn put_buffer16(it: &mut EncodeIterator, bytes: &[u8]) -> Result<()> {
    if bytes.len() > usize::from(u16::MAX) {
        return Err(CodecError::InvalidData("buffer exceeds U16 length"));
    }
    it.ensure(u16opt_len(bytes.len() as u16) + bytes.len())?;
    put_u16opt(it, bytes.len() as u16)?;
    it.put_slice(bytes)
}

/// Decode an rb15-length-prefixed buffer.
pub fn get_buffer15<'a>(it: &mut DecodeIterator<'a>) -> Result<&'a [u8]> {
    let len = get_u15(it)?;
    it.take(usize::from(len))
}

/// Decode a u16opt-length-prefixed buffer.
pub fn get_buffer16<'a>(it: &mut DecodeIterator<'a>) -> Result<&'a [u8]> {
    let len = get_u16opt(it)?;
    it.take(usize::from(len))
}

// --- the type-dispatch table ---

/// Encode any primitive value with its rb15 length prefix.
///
/// This is the encode half of the per-type dispatch table: a pure
/// mapping from tag to codec, fixed at compile time.
pub fn put_primitive_ls<B: AsRef<[u8]>>(
    it: &mut EncodeIterator,
    value: &PrimitiveValue<B>,
) -> Result<()> {
    match value {
        PrimitiveValue::Int(v) => put_int_ls(it, *v),
        PrimitiveValue::UInt(v) => put_uint_ls(it, *v),
        PrimitiveValue::Float(v) => put_float_ls(it, *v),
        PrimitiveValue::Double(v) => put_double_ls(it, *v),
        PrimitiveValue::Real(v) => put_real_ls(it, *v),
        PrimitiveValue::Date(v) => put_date_ls(it, *v),
        PrimitiveValue::Time(v) => put_time_ls(it, *v),
        PrimitiveValue::DateTime(v) => put_datetime_ls(it, *v),
        PrimitiveValue::Qos(v) => {
            let len = qos_content_len(*v);
            it.ensure(1 + len)?;
            it.put_u8(len as u8)?;
            put_qos_content(it, *v)
        }
        PrimitiveValue::State(v) => {
            let len = state_content_len(v.text.as_ref().len());
            if len > usize::from(U15_MAX) {
                return Err(CodecError::InvalidData("state too long"));
            }
            it.ensure(u15_len(len as u16) + len)?;
            put_u15(it, len as u16)?;
            put_state_content(it, v)
        }
        PrimitiveValue::Enum(v) => put_enum_ls(it, *v),
        PrimitiveValue::Buffer(v) => put_buffer15(it, v.as_ref()),
        PrimitiveValue::Blank(_) => put_blank_ls(it),
    }
}

/// Decode primitive content of a known type.
///
/// `content` is the byte range a length prefix delimited; empty content
/// is the blank sentinel.
pub fn primitive_from_content<'a>(
    ty: DataType,
    content: &'a [u8],
) -> Result<PrimitiveValue<&'a [u8]>> {
    if content.is_empty() {
        return Ok(PrimitiveValue::Blank(ty));
    }
    let base = ty.base_primitive().ok_or(CodecError::UnsupportedDataType(ty.to_wire()))?;
    let value = match base {
        DataType::Int => PrimitiveValue::Int(int_from_content(content)?),
        DataType::UInt => PrimitiveValue::UInt(uint_from_content(content)?),
        DataType::Float => {
            if content.len() != 4 {
                return Err(CodecError::InvalidData("bad float width"));
            }
            PrimitiveValue::Float(f32::from_bits(u32::from_be_bytes([
                content[0], content[1], content[2], content[3],
            ])))
        }
        DataType::Double => {
            if content.len() != 8 {
                return Err(CodecError::InvalidData("bad double width"));
            }
            let mut bits = [0u8; 8];
            bits.copy_from_slice(content);
            PrimitiveValue::Double(f64::from_bits(u64::from_be_bytes(bits)))
        }
        DataType::Real => PrimitiveValue::Real(real_from_content(content)?),
        DataType::Date => PrimitiveValue::Date(date_from_content(content)?),
        DataType::Time => PrimitiveValue::Time(time_from_content(content)?),
        DataType::DateTime => PrimitiveValue::DateTime(datetime_from_content(content)?),
        DataType::Qos => PrimitiveValue::Qos(qos_from_content(content)?),
        DataType::State => PrimitiveValue::State(state_from_content(content)?),
        DataType::Enum => {
            let v = uint_from_content(content)?;
            if v > u64::from(u16::MAX) {
                return Err(CodecError::InvalidData("enum exceeds u16"));
            }
            PrimitiveValue::Enum(v as u16)
        }
        DataType::Buffer | DataType::AsciiString | DataType::Utf8String
        | DataType::RmtesString => PrimitiveValue::Buffer(content),
        other => return Err(CodecError::UnsupportedDataType(other.to_wire())),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;

    fn enc() -> EncodeIterator {
        EncodeIterator::new(BytesMut::with_capacity(256), (14, 1))
    }

    #[test]
    fn int_minus_one_is_01_ff() {
        let mut it = enc();
        put_int_ls(&mut it, -1).unwrap();
        assert_eq!(it.written(), &[0x01, 0xFF]);

        let value = primitive_from_content(DataType::Int, &it.written()[1..]).unwrap();
        assert_eq!(value, PrimitiveValue::Int(-1));
    }

    #[test]
    fn blank_real_is_single_zero() {
        let mut it = enc();
        put_blank_ls(&mut it).unwrap();
        assert_eq!(it.written(), &[0x00]);
        let value = primitive_from_content(DataType::Real, &[]).unwrap();
        assert_eq!(value, PrimitiveValue::Blank(DataType::Real));
    }

    #[test]
    fn u15_boundary_widths() {
        for (v, expect) in [
            (0u16, vec![0x00]),
            (0x7F, vec![0x7F]),
            (0x80, vec![0x80, 0x80]),
            (0x7FFF, vec![0xFF, 0xFF]),
        ] {
            let mut it = enc();
            put_u15(&mut it, v).unwrap();
            assert_eq!(it.written(), &expect[..], "value {v:#x}");

            let mut dec = DecodeIterator::new(it.written(), (14, 1));
            assert_eq!(get_u15(&mut dec).unwrap(), v);
            assert!(dec.is_empty());
        }
    }

    #[test]
    fn u16opt_escape() {
        let mut it = enc();
        put_u16opt(&mut it, 0xFD).unwrap();
        put_u16opt(&mut it, 0xFE).unwrap();
        assert_eq!(it.written(), &[0xFD, 0xFE, 0x00, 0xFE]);

        let mut dec = DecodeIterator::new(it.written(), (14, 1));
        assert_eq!(get_u16opt(&mut dec).unwrap(), 0xFD);
        assert_eq!(get_u16opt(&mut dec).unwrap(), 0xFE);
    }

    #[test]
    fn u30_widths() {
        for (v, len) in [(0x3Fu32, 1usize), (0x40, 2), (0x3FFF, 2), (0x4000, 3), (0x3F_FFFF, 3), (0x40_0000, 4), (U30_MAX, 4)] {
            let mut it = enc();
            put_u30(&mut it, v).unwrap();
            assert_eq!(it.written().len(), len, "value {v:#x}");
            let mut dec = DecodeIterator::new(it.written(), (14, 1));
            assert_eq!(get_u30(&mut dec).unwrap(), v);
        }
        assert!(put_u30(&mut enc(), U30_MAX + 1).is_err());
    }

    #[test]
    fn real_specials_are_single_byte() {
        for hint in [RealHint::Infinity, RealHint::NegInfinity, RealHint::NotANumber] {
            let mut it = enc();
            put_real_ls(&mut it, Real { hint, mantissa: 0 }).unwrap();
            assert_eq!(it.written().len(), 2);
            assert_eq!(it.written()[0], 1);
            let round = primitive_from_content(DataType::Real, &it.written()[1..]).unwrap();
            assert_eq!(round, PrimitiveValue::Real(Real { hint, mantissa: 0 }));
        }
    }

    #[test]
    fn real_exponent_extremes_round_trip() {
        for exponent in [-14i8, 7] {
            let real = Real::from_exponent(123_456, exponent);
            let mut it = enc();
            put_real_ls(&mut it, real).unwrap();
            let round = primitive_from_content(DataType::Real, &it.written()[1..]).unwrap();
            assert_eq!(round, PrimitiveValue::Real(real));
        }
    }

    #[test]
    fn reserved_real_hints_fail_decode() {
        assert!(primitive_from_content(DataType::Real, &[31, 0x01]).is_err());
        assert!(primitive_from_content(DataType::Real, &[32, 0x01]).is_err());
    }

    #[test]
    fn time_precision_truncation() {
        let base = Time { hour: 13, minute: 7, ..Time::MIDNIGHT };
        assert_eq!(time_content_len(base), 2);
        assert_eq!(time_content_len(Time { second: 5, ..base }), 3);
        assert_eq!(time_content_len(Time { millisecond: 1, ..base }), 5);
        assert_eq!(time_content_len(Time { microsecond: 1, ..base }), 7);
        assert_eq!(time_content_len(Time { nanosecond: 1, ..base }), 8);
    }

    #[test]
    fn time_nanosecond_packing_round_trips() {
        let time = Time {
            hour: 23,
            minute: 59,
            second: 59,
            millisecond: 999,
            microsecond: 999,
            nanosecond: 999,
        };
        let mut it = enc();
        put_time_ls(&mut it, time).unwrap();
        let round = primitive_from_content(DataType::Time, &it.written()[1..]).unwrap();
        assert_eq!(round, PrimitiveValue::Time(time));
    }

    #[test]
    fn qos_extensions() {
        let qos = Qos {
            timeliness: QosTimeliness::Delayed,
            rate: QosRate::TimeConflated,
            dynamic: true,
            time_info: 15,
            rate_info: 500,
        };
        let mut it = enc();
        put_qos(&mut it, qos).unwrap();
        assert_eq!(it.written().len(), 5);
        assert_eq!(qos_from_content(it.written()).unwrap(), qos);
    }

    #[test]
    fn state_round_trip() {
        let state = State {
            stream_state: crate::value::StreamState::Open,
            data_state: crate::value::DataState::Suspect,
            code: 12,
            text: b"source down".as_slice(),
        };
        let mut it = enc();
        put_state(&mut it, &state).unwrap();
        let decoded = state_from_content(it.written()).unwrap();
        assert_eq!(decoded, state);
    }
}
