//! Connection handshake: request, ack, nak.
//!
//! The initiator opens with a connection request whose first four bytes
//! are the connection version, readable before any framing is in place:
//!
//! ```text
//! [conn version u32][total length u16][session flags u8]
//! [ping timeout u8, seconds][major u8][minor u8]
//! [max fragment size u16]
//! [compression bitmap length u8][bitmap ...]
//! [hostname length u8][hostname][component length u8][component]
//! ```
//!
//! The responder replies inside a ripc frame flagged `conn-ack` or
//! `conn-nak` (see [`crate::wire::ExtFlags`]). The ack pins the
//! negotiated version, fragment size, ping timeout, and compression;
//! the nak carries a reason code and text.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    compress::CompressionType,
    error::{RejectReason, Result, SessionError},
    wire,
};

/// Session flag: the sender wants the post-ack key exchange.
pub const SESSION_FLAG_KEY_EXCHANGE: u8 = 0x08;

/// Default ping timeout carried in requests, seconds.
pub const DEFAULT_PING_TIMEOUT_SECS: u8 = 60;

/// Connection request sent by the initiator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequest {
    /// Proposed connection version (always the newest we speak).
    pub version: u32,
    /// Session flags; see [`SESSION_FLAG_KEY_EXCHANGE`].
    pub session_flags: u8,
    /// Proposed ping timeout in seconds; zero is rejected.
    pub ping_timeout_secs: u8,
    /// Protocol major version of the payload codec.
    pub major: u8,
    /// Protocol minor version of the payload codec.
    pub minor: u8,
    /// Largest frame payload the sender will accept.
    pub max_fragment_size: u16,
    /// Compression algorithms the sender can decode.
    pub compression: CompressionType,
    /// Hostname of the sender, for diagnostics.
    pub hostname: Bytes,
    /// Opaque component version blob.
    pub component: Bytes,
}

impl ConnectionRequest {
    /// Serialize for the wire.
    pub fn encode(&self) -> Result<Bytes> {
        if self.hostname.len() > 255 || self.component.len() > 255 {
            return Err(SessionError::InvalidArgument("handshake string too long"));
        }
        let bitmap = self.compression.to_bitmap();
        let total = 4 + 2 + 1 + 1 + 1 + 1 + 2 + 1 + bitmap.len() + 1 + self.hostname.len()
            + 1
            + self.component.len();
        if total > u16::MAX as usize {
            return Err(SessionError::InvalidArgument("handshake too long"));
        }
        let mut buf = BytesMut::with_capacity(total);
        buf.put_u32(self.version);
        buf.put_u16(total as u16);
        buf.put_u8(self.session_flags);
        buf.put_u8(self.ping_timeout_secs);
        buf.put_u8(self.major);
        buf.put_u8(self.minor);
        buf.put_u16(self.max_fragment_size);
        buf.put_u8(bitmap.len() as u8);
        buf.put_slice(&bitmap);
        buf.put_u8(self.hostname.len() as u8);
        buf.put_slice(&self.hostname);
        buf.put_u8(self.component.len() as u8);
        buf.put_slice(&self.component);
        Ok(buf.freeze())
    }

    /// Parse a request from the front of `buf`; `None` until the whole
    /// request has arrived.
    pub fn decode(buf: &[u8]) -> Result<Option<(Self, usize)>> {
        if buf.len() < 6 {
            return Ok(None);
        }
        let version = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let total = usize::from(u16::from_be_bytes([buf[4], buf[5]]));
        if total < 13 {
            return Err(SessionError::InvalidFrame("connection request too short"));
        }
        if buf.len() < total {
            return Ok(None);
        }
        let mut c = Cursor { buf: &buf[..total], pos: 6 };
        let session_flags = c.u8()?;
        let ping_timeout_secs = c.u8()?;
        let major = c.u8()?;
        let minor = c.u8()?;
        let max_fragment_size = c.u16()?;
        let bitmap_len = c.u8()?;
        let bitmap = c.bytes(usize::from(bitmap_len))?;
        let compression = CompressionType::from_bitmap(bitmap);
        let host_len = c.u8()?;
        let hostname = Bytes::copy_from_slice(c.bytes(usize::from(host_len))?);
        let comp_len = c.u8()?;
        let component = Bytes::copy_from_slice(c.bytes(usize::from(comp_len))?);
        Ok(Some((
            Self {
                version,
                session_flags,
                ping_timeout_secs,
                major,
                minor,
                max_fragment_size,
                compression,
                hostname,
                component,
            },
            total,
        )))
    }
}

/// Connection ack sent by the responder on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionAck {
    /// Version both sides will speak.
    pub version: u32,
    /// Session flags actually in effect (key exchange echo).
    pub session_flags: u8,
    /// Final ping timeout in seconds.
    pub ping_timeout_secs: u8,
    /// Protocol major version.
    pub major: u8,
    /// Protocol minor version.
    pub minor: u8,
    /// Negotiated max fragment payload size.
    pub max_fragment_size: u16,
    /// Selected compression algorithm.
    pub compression: CompressionType,
    /// Byte threshold below which payloads stay uncompressed.
    pub compression_threshold: u16,
    /// Responder's component version blob.
    pub component: Bytes,
}

impl ConnectionAck {
    /// Serialize the ack body (the caller frames it with `conn-ack`).
    pub fn encode_body(&self) -> Result<Bytes> {
        if self.component.len() > 255 {
            return Err(SessionError::InvalidArgument("component version too long"));
        }
        let mut buf = BytesMut::with_capacity(14 + self.component.len());
        buf.put_u32(self.version);
        buf.put_u8(self.session_flags);
        buf.put_u8(self.ping_timeout_secs);
        buf.put_u8(self.major);
        buf.put_u8(self.minor);
        buf.put_u16(self.max_fragment_size);
        buf.put_u8(self.compression.to_wire());
        buf.put_u16(self.compression_threshold);
        buf.put_u8(self.component.len() as u8);
        buf.put_slice(&self.component);
        Ok(buf.freeze())
    }

    /// Parse an ack body.
    pub fn decode_body(body: &[u8]) -> Result<Self> {
        let mut c = Cursor { buf: body, pos: 0 };
        let version = c.u32()?;
        let session_flags = c.u8()?;
        let ping_timeout_secs = c.u8()?;
        let major = c.u8()?;
        let minor = c.u8()?;
        let max_fragment_size = c.u16()?;
        let compression = CompressionType::from_wire(c.u8()?)?;
        let compression_threshold = c.u16()?;
        let comp_len = c.u8()?;
        let component = Bytes::copy_from_slice(c.bytes(usize::from(comp_len))?);
        Ok(Self {
            version,
            session_flags,
            ping_timeout_secs,
            major,
            minor,
            max_fragment_size,
            compression,
            compression_threshold,
            component,
        })
    }
}

/// Connection nak sent by the responder on refusal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionNak {
    /// Refusal reason.
    pub reason: RejectReason,
    /// Human-readable explanation.
    pub text: String,
}

impl ConnectionNak {
    /// Serialize the nak body (the caller frames it with `conn-nak`).
    pub fn encode_body(&self) -> Result<Bytes> {
        if self.text.len() > u16::MAX as usize {
            return Err(SessionError::InvalidArgument("nak text too long"));
        }
        let mut buf = BytesMut::with_capacity(3 + self.text.len());
        buf.put_u8(self.reason as u8);
        buf.put_u16(self.text.len() as u16);
        buf.put_slice(self.text.as_bytes());
        Ok(buf.freeze())
    }

    /// Parse a nak body.
    pub fn decode_body(body: &[u8]) -> Result<Self> {
        let mut c = Cursor { buf: body, pos: 0 };
        let code = c.u8()?;
        let reason = RejectReason::from_wire(code)
            .ok_or(SessionError::InvalidFrame("unknown nak reason"))?;
        let len = usize::from(c.u16()?);
        let text = String::from_utf8_lossy(c.bytes(len)?).into_owned();
        Ok(Self { reason, text })
    }
}

/// Negotiation outcome the responder computes from a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    /// Version both sides speak: the older of the two proposals.
    pub version: u32,
    /// Final ping timeout in seconds.
    pub ping_timeout_secs: u8,
    /// Final max fragment payload size: the smaller proposal.
    pub max_fragment_size: u16,
    /// Selected compression (the best common algorithm).
    pub compression: CompressionType,
    /// Key exchange goes ahead (both sides asked, version 14).
    pub key_exchange: bool,
}

/// Responder-side negotiation.
///
/// # Errors
///
/// `SessionError::UnsupportedVersion` for versions outside 10..=14,
/// `SessionError::InvalidFrame` for a zero ping timeout.
pub fn negotiate(
    request: &ConnectionRequest,
    local_max_fragment: u16,
    local_compression: CompressionType,
    local_key_exchange: bool,
) -> Result<Negotiated> {
    if !wire::version_supported(request.version) {
        return Err(SessionError::UnsupportedVersion(request.version));
    }
    if request.ping_timeout_secs == 0 {
        return Err(SessionError::InvalidFrame("zero ping timeout proposal"));
    }
    let version = request.version.min(wire::CONN_VERSION_14);
    let key_exchange = version == wire::CONN_VERSION_14
        && local_key_exchange
        && request.session_flags & SESSION_FLAG_KEY_EXCHANGE != 0;
    Ok(Negotiated {
        version,
        ping_timeout_secs: request.ping_timeout_secs,
        max_fragment_size: request.max_fragment_size.min(local_max_fragment),
        compression: request.compression.intersect_best(local_compression),
        key_exchange,
    })
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let available = self.buf.len() - self.pos;
        if n > available {
            return Err(SessionError::IncompleteFrame { needed: n - available });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}
