//! The wire data-type registry.
//!
//! Every value on the wire is tagged (directly or by context) with one of
//! these types. Values 64..=127 are the set-defined variants: the same
//! logical primitives pinned to a fixed narrow width so that set-encoded
//! rows can elide per-value headers. Values 128..=255 are containers;
//! unknown containers in the reserved range 224..=255 are passed through
//! as opaque payloads so future peers can extend the registry.

use crate::error::CodecError;

/// Numeric type tags used on the wire.
///
/// The discriminants are part of the wire format and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    /// Signed integer, length-specified up to 8 bytes.
    Int = 3,
    /// Unsigned integer, length-specified up to 8 bytes.
    UInt = 4,
    /// IEEE 754 single, fixed 4 bytes.
    Float = 5,
    /// IEEE 754 double, fixed 8 bytes.
    Double = 6,
    /// Decimal: signed mantissa plus a power-of-ten or fraction hint.
    Real = 8,
    /// Calendar date (day/month/year).
    Date = 9,
    /// Time of day with variable sub-second precision.
    Time = 10,
    /// Date and time combined.
    DateTime = 11,
    /// Quality of service (rate, timeliness, dynamic bit).
    Qos = 12,
    /// Stream/data state with status code and text.
    State = 13,
    /// Enumerated value, length-specified u16.
    Enum = 14,
    /// Homogeneous primitive array.
    Array = 15,
    /// Opaque byte buffer.
    Buffer = 16,
    /// ASCII string.
    AsciiString = 17,
    /// UTF-8 string.
    Utf8String = 18,
    /// RMTES-encoded string (partial-update marketfeed encoding).
    RmtesString = 19,

    /// Set-defined: 1-byte signed integer.
    Int1 = 64,
    /// Set-defined: 1-byte unsigned integer.
    UInt1 = 65,
    /// Set-defined: 2-byte signed integer.
    Int2 = 66,
    /// Set-defined: 2-byte unsigned integer.
    UInt2 = 67,
    /// Set-defined: 4-byte signed integer.
    Int4 = 68,
    /// Set-defined: 4-byte unsigned integer.
    UInt4 = 69,
    /// Set-defined: 8-byte signed integer.
    Int8 = 70,
    /// Set-defined: 8-byte unsigned integer.
    UInt8 = 71,
    /// Set-defined: 4-byte float.
    Float4 = 72,
    /// Set-defined: 8-byte double.
    Double8 = 73,
    /// Set-defined: real with 4-byte mantissa cap, length-prefixed.
    Real4Rb = 74,
    /// Set-defined: real with 8-byte mantissa cap, length-prefixed.
    Real8Rb = 75,
    /// Set-defined: 4-byte date.
    Date4 = 76,
    /// Set-defined: 3-byte time (hh:mm:ss).
    Time3 = 77,
    /// Set-defined: 5-byte time (hh:mm:ss + millis).
    Time5 = 78,
    /// Set-defined: 7-byte date-time.
    DateTime7 = 79,
    /// Set-defined: 9-byte date-time.
    DateTime9 = 80,

    /// Container: no payload.
    NoData = 128,
    /// Container: opaque pass-through payload.
    Opaque = 130,
    /// Container: XML text payload.
    Xml = 131,
    /// Container: ordered `(field id, value)` records.
    FieldList = 132,
    /// Container: ordered `(name, value)` records.
    ElementList = 133,
    /// Container: ANSI page update payload.
    AnsiPage = 134,
    /// Container: id-keyed entries with per-entry actions.
    FilterList = 135,
    /// Container: index-keyed entries, optionally sortable.
    Vector = 136,
    /// Container: primitive-keyed entries.
    Map = 137,
    /// Container: uniform unkeyed records sharing set definitions.
    Series = 138,
    /// Container: a nested message.
    Msg = 141,
    /// Container: JSON text payload.
    Json = 142,
}

/// First container tag; the message header stores container types
/// relative to this base so they fit alongside flags.
pub const CONTAINER_TYPE_MIN: u8 = 128;

/// Last tag the registry itself defines; 224..=255 decode as opaque.
pub const CONTAINER_TYPE_RESERVED_MIN: u8 = 224;

impl DataType {
    /// Map a wire tag to a known type.
    ///
    /// # Errors
    ///
    /// `CodecError::UnsupportedDataType` for tags that are neither known
    /// nor in the opaque pass-through range.
    pub fn from_wire(tag: u8) -> Result<Self, CodecError> {
        let ty = match tag {
            3 => Self::Int,
            4 => Self::UInt,
            5 => Self::Float,
            6 => Self::Double,
            8 => Self::Real,
            9 => Self::Date,
            10 => Self::Time,
            11 => Self::DateTime,
            12 => Self::Qos,
            13 => Self::State,
            14 => Self::Enum,
            15 => Self::Array,
            16 => Self::Buffer,
            17 => Self::AsciiString,
            18 => Self::Utf8String,
            19 => Self::RmtesString,
            64 => Self::Int1,
            65 => Self::UInt1,
            66 => Self::Int2,
            67 => Self::UInt2,
            68 => Self::Int4,
            69 => Self::UInt4,
            70 => Self::Int8,
            71 => Self::UInt8,
            72 => Self::Float4,
            73 => Self::Double8,
            74 => Self::Real4Rb,
            75 => Self::Real8Rb,
            76 => Self::Date4,
            77 => Self::Time3,
            78 => Self::Time5,
            79 => Self::DateTime7,
            80 => Self::DateTime9,
            128 => Self::NoData,
            130 => Self::Opaque,
            131 => Self::Xml,
            132 => Self::FieldList,
            133 => Self::ElementList,
            134 => Self::AnsiPage,
            135 => Self::FilterList,
            136 => Self::Vector,
            137 => Self::Map,
            138 => Self::Series,
            141 => Self::Msg,
            142 => Self::Json,
            t if t >= CONTAINER_TYPE_RESERVED_MIN => Self::Opaque,
            t => return Err(CodecError::UnsupportedDataType(t)),
        };
        Ok(ty)
    }

    /// Wire tag for this type.
    #[must_use]
    pub fn to_wire(self) -> u8 {
        self as u8
    }

    /// True for container types (field list, map, ...).
    #[must_use]
    pub fn is_container(self) -> bool {
        self.to_wire() >= CONTAINER_TYPE_MIN
    }

    /// True for the plain primitives (not set-defined variants).
    #[must_use]
    pub fn is_primitive(self) -> bool {
        self.to_wire() < 64
    }

    /// The plain primitive a set-defined variant narrows; identity for
    /// plain primitives, `None` for containers.
    #[must_use]
    pub fn base_primitive(self) -> Option<Self> {
        let base = match self {
            Self::Int1 | Self::Int2 | Self::Int4 | Self::Int8 => Self::Int,
            Self::UInt1 | Self::UInt2 | Self::UInt4 | Self::UInt8 => Self::UInt,
            Self::Float4 => Self::Float,
            Self::Double8 => Self::Double,
            Self::Real4Rb | Self::Real8Rb => Self::Real,
            Self::Date4 => Self::Date,
            Self::Time3 | Self::Time5 => Self::Time,
            Self::DateTime7 | Self::DateTime9 => Self::DateTime,
            other if other.is_primitive() => other,
            _ => return None,
        };
        Some(base)
    }

    /// Fixed content width of a set-defined variant, `None` when the
    /// variant is itself length-prefixed (the `Real*Rb` pair) or the type
    /// is not set-defined.
    #[must_use]
    pub fn set_width(self) -> Option<usize> {
        match self {
            Self::Int1 | Self::UInt1 => Some(1),
            Self::Int2 | Self::UInt2 => Some(2),
            Self::Int4 | Self::UInt4 | Self::Float4 | Self::Date4 => Some(4),
            Self::Int8 | Self::UInt8 | Self::Double8 => Some(8),
            Self::Time3 => Some(3),
            Self::Time5 => Some(5),
            Self::DateTime7 => Some(7),
            Self::DateTime9 => Some(9),
            _ => None,
        }
    }
}

/// Message classes.
///
/// Discriminants are the wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgClass {
    /// Consumer request opening, reissuing, or pausing a stream.
    Request = 1,
    /// Provider refresh: full image for a stream.
    Refresh = 2,
    /// Provider status: stream state change without data.
    Status = 3,
    /// Provider update: incremental change.
    Update = 4,
    /// Either side closing a stream.
    Close = 5,
    /// Acknowledgement (or negative acknowledgement) of a post or close.
    Ack = 6,
    /// Bidirectional free-form message on an open stream.
    Generic = 7,
    /// Consumer post: contributed data flowing upstream.
    Post = 8,
}

impl MsgClass {
    /// Map a wire value to a message class.
    ///
    /// # Errors
    ///
    /// `CodecError::InvalidData` for out-of-range classes.
    pub fn from_wire(value: u8) -> Result<Self, CodecError> {
        match value {
            1 => Ok(Self::Request),
            2 => Ok(Self::Refresh),
            3 => Ok(Self::Status),
            4 => Ok(Self::Update),
            5 => Ok(Self::Close),
            6 => Ok(Self::Ack),
            7 => Ok(Self::Generic),
            8 => Ok(Self::Post),
            _ => Err(CodecError::InvalidData("unknown message class")),
        }
    }

    /// Wire value for this class.
    #[must_use]
    pub fn to_wire(self) -> u8 {
        self as u8
    }
}

/// Well-known domain types.
///
/// The registry is open: the codec accepts and forwards unknown domains
/// intact, so this enum only names the values the runtime itself needs.
pub mod domain {
    /// Login domain (stream 1 by convention).
    pub const LOGIN: u8 = 1;
    /// Source directory domain.
    pub const SOURCE: u8 = 4;
    /// Dictionary domain.
    pub const DICTIONARY: u8 = 5;
    /// Market price domain: the workhorse for quote/trade items.
    pub const MARKET_PRICE: u8 = 6;
    /// Market-by-order domain.
    pub const MARKET_BY_ORDER: u8 = 7;
    /// Market-by-price domain.
    pub const MARKET_BY_PRICE: u8 = 8;
    /// First value available for embedder-defined domains.
    pub const USER_MIN: u8 = 128;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_tags_round_trip() {
        for tag in 0u8..=255 {
            if let Ok(ty) = DataType::from_wire(tag) {
                if tag < CONTAINER_TYPE_RESERVED_MIN {
                    assert_eq!(ty.to_wire(), tag);
                } else {
                    // Reserved range folds to opaque pass-through.
                    assert_eq!(ty, DataType::Opaque);
                }
            }
        }
    }

    #[test]
    fn set_variants_know_their_base() {
        assert_eq!(DataType::Int4.base_primitive(), Some(DataType::Int));
        assert_eq!(DataType::Real8Rb.base_primitive(), Some(DataType::Real));
        assert_eq!(DataType::Map.base_primitive(), None);
        assert_eq!(DataType::Time5.set_width(), Some(5));
        assert_eq!(DataType::Real4Rb.set_width(), None);
    }

    #[test]
    fn message_classes_are_stable() {
        assert_eq!(MsgClass::Request.to_wire(), 1);
        assert_eq!(MsgClass::Post.to_wire(), 8);
        assert!(MsgClass::from_wire(0).is_err());
        assert!(MsgClass::from_wire(9).is_err());
    }
}
