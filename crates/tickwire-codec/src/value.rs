//! Primitive value types carried by the codec.
//!
//! Each type knows its blank sentinel and renders with `Display` the way
//! the dump tooling expects. The byte layouts live in [`crate::prim`];
//! these types are pure values.

use std::fmt;

use crate::error::CodecError;

/// Scaling hint attached to a [`Real`] mantissa.
///
/// Wire values: exponents −14..=+7 map to 0..=21, fraction denominators
/// 1,2,4,...,256 map to 22..=30. 31 and 32 are reserved and rejected on
/// both encode and decode. 33..=35 are the single-byte specials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RealHint {
    /// Power-of-ten exponent in −14..=+7.
    Exponent(i8),
    /// Fraction denominator: 1, 2, 4, ..., 256 (a power of two).
    Fraction(u16),
    /// Positive infinity; no mantissa bytes follow.
    Infinity,
    /// Negative infinity; no mantissa bytes follow.
    NegInfinity,
    /// Not a number; no mantissa bytes follow.
    NotANumber,
}

impl RealHint {
    const EXPONENT_BASE: i8 = -14;
    const FRACTION_BASE_WIRE: u8 = 22;
    const INFINITY_WIRE: u8 = 33;
    const NEG_INFINITY_WIRE: u8 = 34;
    const NAN_WIRE: u8 = 35;

    /// Wire value of this hint.
    #[must_use]
    pub fn to_wire(self) -> u8 {
        match self {
            Self::Exponent(e) => (e - Self::EXPONENT_BASE) as u8,
            Self::Fraction(denom) => {
                Self::FRACTION_BASE_WIRE + (denom.trailing_zeros() as u8)
            }
            Self::Infinity => Self::INFINITY_WIRE,
            Self::NegInfinity => Self::NEG_INFINITY_WIRE,
            Self::NotANumber => Self::NAN_WIRE,
        }
    }

    /// Parse a wire hint value.
    ///
    /// # Errors
    ///
    /// `CodecError::InvalidData` for the reserved values 31 and 32 and for
    /// anything past 35.
    pub fn from_wire(value: u8) -> Result<Self, CodecError> {
        match value {
            0..=21 => Ok(Self::Exponent(Self::EXPONENT_BASE + value as i8)),
            22..=30 => Ok(Self::Fraction(1 << (value - Self::FRACTION_BASE_WIRE))),
            31 | 32 => Err(CodecError::InvalidData("reserved real hint")),
            33 => Ok(Self::Infinity),
            34 => Ok(Self::NegInfinity),
            35 => Ok(Self::NotANumber),
            _ => Err(CodecError::InvalidData("real hint out of range")),
        }
    }

    /// True for the single-byte specials (no mantissa on the wire).
    #[must_use]
    pub fn is_special(self) -> bool {
        matches!(self, Self::Infinity | Self::NegInfinity | Self::NotANumber)
    }

    /// Validate an `Exponent`/`Fraction` payload before encode.
    pub(crate) fn validate(self) -> Result<(), CodecError> {
        match self {
            Self::Exponent(e) if !(-14..=7).contains(&e) => {
                Err(CodecError::InvalidData("real exponent hint out of range"))
            }
            Self::Fraction(d) if !d.is_power_of_two() || d > 256 => {
                Err(CodecError::InvalidData("real fraction hint out of range"))
            }
            _ => Ok(()),
        }
    }
}

/// Decimal value: a signed mantissa scaled by a hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Real {
    /// Scaling hint.
    pub hint: RealHint,
    /// Signed mantissa; ignored for special hints.
    pub mantissa: i64,
}

impl Real {
    /// A real holding `mantissa * 10^exponent`.
    #[must_use]
    pub fn from_exponent(mantissa: i64, exponent: i8) -> Self {
        Self { hint: RealHint::Exponent(exponent), mantissa }
    }

    /// Approximate floating-point rendering of this value.
    #[must_use]
    pub fn to_f64(self) -> f64 {
        match self.hint {
            RealHint::Exponent(e) => (self.mantissa as f64) * 10f64.powi(i32::from(e)),
            RealHint::Fraction(d) => (self.mantissa as f64) / f64::from(d),
            RealHint::Infinity => f64::INFINITY,
            RealHint::NegInfinity => f64::NEG_INFINITY,
            RealHint::NotANumber => f64::NAN,
        }
    }
}

impl fmt::Display for Real {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.hint {
            RealHint::Infinity => write!(f, "Inf"),
            RealHint::NegInfinity => write!(f, "-Inf"),
            RealHint::NotANumber => write!(f, "NaN"),
            _ => write!(f, "{}", self.to_f64()),
        }
    }
}

/// Calendar date. Zero pieces are individually blank; all-zero is the
/// blank sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Date {
    /// Day of month, 1..=31, 0 = blank.
    pub day: u8,
    /// Month, 1..=12, 0 = blank.
    pub month: u8,
    /// Four-digit year, 0 = blank.
    pub year: u16,
}

impl Date {
    /// The blank date.
    pub const BLANK: Self = Self { day: 0, month: 0, year: 0 };

    /// True when every piece is blank.
    #[must_use]
    pub fn is_blank(self) -> bool {
        self == Self::BLANK
    }

    /// Structural validity: pieces in range (blank pieces allowed).
    #[must_use]
    pub fn is_valid(self) -> bool {
        self.day <= 31 && self.month <= 12
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_blank() {
            return write!(f, "(blank)");
        }
        write!(f, "{:02}/{:02}/{:04}", self.day, self.month, self.year)
    }
}

/// Time of day with up-to-nanosecond precision.
///
/// The wire form truncates trailing zero precision; see
/// [`crate::prim::put_time_content`]. 255 in every field is blank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Time {
    /// Hour, 0..=23.
    pub hour: u8,
    /// Minute, 0..=59.
    pub minute: u8,
    /// Second, 0..=60 (leap seconds allowed).
    pub second: u8,
    /// Milliseconds, 0..=999.
    pub millisecond: u16,
    /// Microseconds within the millisecond, 0..=999.
    pub microsecond: u16,
    /// Nanoseconds within the microsecond, 0..=999.
    pub nanosecond: u16,
}

impl Time {
    /// The blank time.
    pub const BLANK: Self = Self {
        hour: 255,
        minute: 255,
        second: 255,
        millisecond: 65_535,
        microsecond: 65_535,
        nanosecond: 65_535,
    };

    /// Midnight, full precision zero.
    pub const MIDNIGHT: Self =
        Self { hour: 0, minute: 0, second: 0, millisecond: 0, microsecond: 0, nanosecond: 0 };

    /// True for the blank sentinel.
    #[must_use]
    pub fn is_blank(self) -> bool {
        self == Self::BLANK
    }

    /// Structural validity (blank allowed).
    #[must_use]
    pub fn is_valid(self) -> bool {
        self.is_blank()
            || (self.hour <= 23
                && self.minute <= 59
                && self.second <= 60
                && self.millisecond <= 999
                && self.microsecond <= 999
                && self.nanosecond <= 999)
    }
}

impl Default for Time {
    fn default() -> Self {
        Self::MIDNIGHT
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_blank() {
            return write!(f, "(blank)");
        }
        write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)?;
        if self.millisecond != 0 || self.microsecond != 0 || self.nanosecond != 0 {
            write!(f, ".{:03}{:03}{:03}", self.millisecond, self.microsecond, self.nanosecond)?;
        }
        Ok(())
    }
}

/// Combined date and time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DateTime {
    /// Date part.
    pub date: Date,
    /// Time part.
    pub time: Time,
}

impl DateTime {
    /// The blank date-time.
    pub const BLANK: Self = Self { date: Date::BLANK, time: Time::BLANK };

    /// True when both parts are blank.
    #[must_use]
    pub fn is_blank(self) -> bool {
        self.date.is_blank() && self.time.is_blank()
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.date, self.time)
    }
}

/// Update rate class of a [`Qos`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum QosRate {
    /// Rate not specified.
    #[default]
    Unspecified = 0,
    /// Every tick delivered.
    TickByTick = 1,
    /// Conflated only under pressure.
    JustInTimeConflated = 2,
    /// Conflated on a fixed interval; carries `rate_info` milliseconds.
    TimeConflated = 3,
}

/// Timeliness class of a [`Qos`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum QosTimeliness {
    /// Timeliness not specified.
    #[default]
    Unspecified = 0,
    /// Real-time data.
    Realtime = 1,
    /// Delayed by an unknown amount.
    DelayedUnknown = 2,
    /// Delayed; carries `time_info` seconds.
    Delayed = 3,
}

/// Quality of service attached to streams and requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Qos {
    /// Timeliness class.
    pub timeliness: QosTimeliness,
    /// Rate class.
    pub rate: QosRate,
    /// True when the provider may change the QoS mid-stream.
    pub dynamic: bool,
    /// Delay in seconds when `timeliness` is `Delayed`.
    pub time_info: u16,
    /// Conflation interval in milliseconds when `rate` is `TimeConflated`.
    pub rate_info: u16,
}

impl Qos {
    /// Realtime, tick-by-tick, static.
    #[must_use]
    pub fn realtime_tick_by_tick() -> Self {
        Self {
            timeliness: QosTimeliness::Realtime,
            rate: QosRate::TickByTick,
            ..Self::default()
        }
    }

    /// Ordering used to pick "best" QoS: realtime beats delayed, then
    /// faster rates beat slower ones.
    #[must_use]
    pub fn is_better_than(self, other: Self) -> bool {
        let rank = |q: Self| {
            (u8::from(q.timeliness != QosTimeliness::Realtime), q.rate as u8, q.time_info)
        };
        rank(self) < rank(other)
    }
}

impl fmt::Display for Qos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}", self.timeliness, self.rate)?;
        if self.dynamic {
            write!(f, " (dynamic)")?;
        }
        Ok(())
    }
}

/// Stream half of a [`State`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum StreamState {
    /// State not specified (only legal in some status messages).
    #[default]
    Unspecified = 0,
    /// Stream open, more data expected.
    Open = 1,
    /// Stream delivers one refresh, then closes.
    NonStreaming = 2,
    /// Closed, but re-requesting later may succeed.
    ClosedRecover = 3,
    /// Closed for good.
    Closed = 4,
    /// Closed here; re-request elsewhere (text names the host).
    Redirected = 5,
}

impl StreamState {
    /// Parse the 3-bit wire value.
    pub(crate) fn from_wire(value: u8) -> Result<Self, CodecError> {
        match value {
            0 => Ok(Self::Unspecified),
            1 => Ok(Self::Open),
            2 => Ok(Self::NonStreaming),
            3 => Ok(Self::ClosedRecover),
            4 => Ok(Self::Closed),
            5 => Ok(Self::Redirected),
            _ => Err(CodecError::InvalidData("unknown stream state")),
        }
    }
}

/// Data half of a [`State`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum DataState {
    /// Data state unchanged from the previous message.
    #[default]
    NoChange = 0,
    /// Data is current and trustworthy.
    Ok = 1,
    /// Data may be stale.
    Suspect = 2,
}

impl DataState {
    pub(crate) fn from_wire(value: u8) -> Result<Self, CodecError> {
        match value {
            0 => Ok(Self::NoChange),
            1 => Ok(Self::Ok),
            2 => Ok(Self::Suspect),
            _ => Err(CodecError::InvalidData("unknown data state")),
        }
    }
}

/// Well-known status codes carried in [`State::code`].
///
/// The field is an open u8; these are the values the runtime itself
/// interprets.
pub mod status_code {
    /// No special code.
    pub const NONE: u8 = 0;
    /// Item not found by any source.
    pub const NOT_FOUND: u8 = 1;
    /// Request timed out upstream.
    pub const TIMEOUT: u8 = 2;
    /// Access denied by entitlement.
    pub const NOT_ENTITLED: u8 = 3;
    /// Invalid argument in the request.
    pub const INVALID_ARGUMENT: u8 = 4;
    /// Usage error.
    pub const USAGE_ERROR: u8 = 5;
    /// Item already open on another stream.
    pub const ALREADY_OPEN: u8 = 6;
    /// Source is down.
    pub const NO_RESOURCES: u8 = 12;
}

/// Stream and data condition attached to refresh and status messages.
///
/// Generic over the text buffer so decoded states can borrow the frame
/// while copied states own their bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct State<B> {
    /// Stream half.
    pub stream_state: StreamState,
    /// Data half.
    pub data_state: DataState,
    /// Open status code, see [`status_code`].
    pub code: u8,
    /// Human-readable explanation, possibly empty.
    pub text: B,
}

impl<B: AsRef<[u8]>> State<B> {
    /// True for an Open/Ok state with no code.
    #[must_use]
    pub fn is_open_ok(&self) -> bool {
        self.stream_state == StreamState::Open
            && self.data_state == DataState::Ok
            && self.code == status_code::NONE
    }
}

impl<B: AsRef<[u8]>> fmt::Display for State<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}/{:?}/{} - {}",
            self.stream_state,
            self.data_state,
            self.code,
            String::from_utf8_lossy(self.text.as_ref())
        )
    }
}

/// A decoded primitive of any type.
///
/// This is the variant side of the type-dispatch table: one tag, one
/// value shape, used by array items, map keys, and generic dumps.
#[derive(Debug, Clone, PartialEq)]
pub enum PrimitiveValue<B> {
    /// Signed integer.
    Int(i64),
    /// Unsigned integer.
    UInt(u64),
    /// Single float.
    Float(f32),
    /// Double float.
    Double(f64),
    /// Decimal.
    Real(Real),
    /// Date.
    Date(Date),
    /// Time.
    Time(Time),
    /// Date-time.
    DateTime(DateTime),
    /// Quality of service.
    Qos(Qos),
    /// State.
    State(State<B>),
    /// Enumerated value.
    Enum(u16),
    /// Raw buffer (also ASCII/UTF-8/RMTES strings).
    Buffer(B),
    /// The blank sentinel for the given type.
    Blank(crate::types::DataType),
}

impl<B: AsRef<[u8]>> fmt::Display for PrimitiveValue<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Real(v) => write!(f, "{v}"),
            Self::Date(v) => write!(f, "{v}"),
            Self::Time(v) => write!(f, "{v}"),
            Self::DateTime(v) => write!(f, "{v}"),
            Self::Qos(v) => write!(f, "{v}"),
            Self::State(v) => write!(f, "{v}"),
            Self::Enum(v) => write!(f, "{v}"),
            Self::Buffer(v) => write!(f, "{}", String::from_utf8_lossy(v.as_ref())),
            Self::Blank(_) => write!(f, "(blank)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_hint_wire_values() {
        assert_eq!(RealHint::Exponent(-14).to_wire(), 0);
        assert_eq!(RealHint::Exponent(0).to_wire(), 14);
        assert_eq!(RealHint::Exponent(7).to_wire(), 21);
        assert_eq!(RealHint::Fraction(1).to_wire(), 22);
        assert_eq!(RealHint::Fraction(256).to_wire(), 30);
        assert_eq!(RealHint::Infinity.to_wire(), 33);
    }

    #[test]
    fn reserved_real_hints_rejected() {
        assert!(RealHint::from_wire(31).is_err());
        assert!(RealHint::from_wire(32).is_err());
        assert!(RealHint::from_wire(36).is_err());
    }

    #[test]
    fn real_hint_round_trip() {
        for wire in (0u8..=30).chain(33..=35) {
            let hint = RealHint::from_wire(wire).unwrap();
            assert_eq!(hint.to_wire(), wire);
        }
    }

    #[test]
    fn qos_ordering() {
        let realtime = Qos::realtime_tick_by_tick();
        let delayed = Qos {
            timeliness: QosTimeliness::Delayed,
            rate: QosRate::TimeConflated,
            time_info: 15,
            rate_info: 1000,
            ..Qos::default()
        };
        assert!(realtime.is_better_than(delayed));
        assert!(!delayed.is_better_than(realtime));
    }

    #[test]
    fn blank_sentinels() {
        assert!(Date::BLANK.is_blank());
        assert!(Time::BLANK.is_blank());
        assert!(DateTime::BLANK.is_blank());
        assert!(!Time::MIDNIGHT.is_blank());
    }
}
