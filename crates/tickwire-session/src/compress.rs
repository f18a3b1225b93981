//! Compression plug-in points.
//!
//! The handshake advertises algorithms as a bitmap (bit 0 = zlib,
//! bit 1 = LZ4); the ack pins one. Handshake frames themselves are
//! never compressed, and a per-channel override can force compression
//! off regardless of what was negotiated.

use std::io::Write;

use flate2::{Compression, write::ZlibDecoder, write::ZlibEncoder};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// Compression algorithms on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum CompressionType {
    /// No compression.
    #[default]
    None = 0,
    /// zlib (RFC 1950).
    Zlib = 1,
    /// LZ4 block format.
    Lz4 = 2,
}

impl CompressionType {
    /// Wire value used in the connection ack.
    #[must_use]
    pub fn to_wire(self) -> u8 {
        self as u8
    }

    /// Parse the ack's wire value.
    pub fn from_wire(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Zlib),
            2 => Ok(Self::Lz4),
            _ => Err(SessionError::InvalidFrame("unknown compression type")),
        }
    }

    /// Bitmap advertised in the connection request.
    #[must_use]
    pub fn to_bitmap(self) -> Vec<u8> {
        match self {
            Self::None => vec![0],
            Self::Zlib => vec![0x01],
            Self::Lz4 => vec![0x02],
        }
    }

    /// Parse a request bitmap; unknown bits are ignored.
    #[must_use]
    pub fn from_bitmap(bitmap: &[u8]) -> Self {
        let first = bitmap.first().copied().unwrap_or(0);
        if first & 0x01 != 0 {
            Self::Zlib
        } else if first & 0x02 != 0 {
            Self::Lz4
        } else {
            Self::None
        }
    }

    /// Best algorithm both sides can decode. zlib wins over LZ4 when
    /// both are available, matching the responder's preference order.
    #[must_use]
    pub fn intersect_best(self, other: Self) -> Self {
        if self == other { self } else { Self::None }
    }
}

/// A configured compressor for one channel.
///
/// Stateless between messages: each payload compresses and inflates on
/// its own, so fragments can reassemble before inflation.
#[derive(Debug, Clone)]
pub struct Compressor {
    ty: CompressionType,
    /// zlib level, 0..=9.
    level: u32,
}

impl Compressor {
    /// Build a compressor for the negotiated algorithm.
    #[must_use]
    pub fn new(ty: CompressionType, level: u32) -> Self {
        Self { ty, level: level.min(9) }
    }

    /// The algorithm in use.
    #[must_use]
    pub fn compression_type(&self) -> CompressionType {
        self.ty
    }

    /// Compress a payload. `None` passes data through untouched.
    pub fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        match self.ty {
            CompressionType::None => Ok(input.to_vec()),
            CompressionType::Zlib => {
                let mut encoder =
                    ZlibEncoder::new(Vec::new(), Compression::new(self.level));
                encoder
                    .write_all(input)
                    .and_then(|()| encoder.finish())
                    .map_err(|e| SessionError::Decompress(format!("zlib deflate: {e}")))
            }
            CompressionType::Lz4 => Ok(lz4_flex::compress_prepend_size(input)),
        }
    }

    /// Inflate a payload.
    pub fn decompress(&self, input: &[u8]) -> Result<Vec<u8>> {
        match self.ty {
            CompressionType::None => Ok(input.to_vec()),
            CompressionType::Zlib => {
                let mut decoder = ZlibDecoder::new(Vec::new());
                decoder
                    .write_all(input)
                    .and_then(|()| decoder.finish())
                    .map_err(|e| SessionError::Decompress(format!("zlib inflate: {e}")))
            }
            CompressionType::Lz4 => lz4_flex::decompress_size_prepended(input)
                .map_err(|e| SessionError::Decompress(format!("lz4: {e}"))),
        }
    }
}
