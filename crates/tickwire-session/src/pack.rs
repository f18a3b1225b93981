//! Packed buffers: several application messages in one frame.
//!
//! Each inner message is preceded by its own two-byte length; the frame
//! carries the packed flag. Packed frames are built under the fragment
//! size, so they never fragment, and the receiver yields the inner
//! messages in order.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, SessionError};

/// Accumulates messages for a packed frame.
#[derive(Debug)]
pub struct PackWriter {
    buf: BytesMut,
    capacity: usize,
    count: usize,
    max_count: usize,
}

impl PackWriter {
    /// A writer bounded by the negotiated fragment size and the
    /// per-pack message limit.
    #[must_use]
    pub fn new(capacity: usize, max_count: usize) -> Self {
        Self { buf: BytesMut::with_capacity(capacity), capacity, count: 0, max_count }
    }

    /// Bytes a message of `len` would add.
    #[must_use]
    pub fn cost(len: usize) -> usize {
        2 + len
    }

    /// Room left for the next message's bytes.
    #[must_use]
    pub fn remaining(&self) -> usize {
        (self.capacity - self.buf.len()).saturating_sub(2)
    }

    /// Messages packed so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Append one message.
    ///
    /// # Errors
    ///
    /// `SessionError::InvalidArgument` when the message does not fit or
    /// the pack already holds the maximum count.
    pub fn push(&mut self, message: &[u8]) -> Result<()> {
        if self.count >= self.max_count {
            return Err(SessionError::InvalidArgument("pack message limit reached"));
        }
        if message.len() > u16::MAX as usize || Self::cost(message.len()) > self.capacity - self.buf.len()
        {
            return Err(SessionError::InvalidArgument("message does not fit the pack"));
        }
        self.buf.put_u16(message.len() as u16);
        self.buf.put_slice(message);
        self.count += 1;
        Ok(())
    }

    /// Take the packed payload, resetting the writer.
    ///
    /// Empty when nothing was pushed.
    pub fn finish(&mut self) -> Bytes {
        self.count = 0;
        self.buf.split().freeze()
    }
}

/// Iterate the inner messages of a packed payload.
#[derive(Debug, Clone)]
pub struct PackReader<'a> {
    buf: &'a [u8],
}

impl<'a> PackReader<'a> {
    /// Wrap a packed frame payload.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }
}

impl<'a> Iterator for PackReader<'a> {
    type Item = Result<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.is_empty() {
            return None;
        }
        if self.buf.len() < 2 {
            self.buf = &[];
            return Some(Err(SessionError::InvalidFrame("truncated pack length")));
        }
        let len = usize::from(u16::from_be_bytes([self.buf[0], self.buf[1]]));
        if self.buf.len() < 2 + len {
            self.buf = &[];
            return Some(Err(SessionError::InvalidFrame("truncated packed message")));
        }
        let (message, rest) = self.buf[2..].split_at(len);
        self.buf = rest;
        Some(Ok(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_and_unpack_in_order() {
        let mut writer = PackWriter::new(64, 10);
        writer.push(b"one").unwrap();
        writer.push(b"two").unwrap();
        writer.push(b"three").unwrap();
        let payload = writer.finish();

        let messages: Vec<_> =
            PackReader::new(&payload).collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(messages, vec![b"one".as_slice(), b"two", b"three"]);
    }

    #[test]
    fn writer_respects_capacity_and_count() {
        let mut writer = PackWriter::new(10, 2);
        writer.push(b"abcd").unwrap(); // 6 bytes used
        assert!(writer.push(b"toolong").is_err()); // needs 9 more
        writer.push(b"ef").unwrap(); // exactly fills
        assert!(writer.push(b"").is_err()); // count limit

        let payload = writer.finish();
        assert_eq!(payload.len(), 10);
        assert_eq!(writer.count(), 0);
    }

    #[test]
    fn truncated_pack_surfaces_an_error() {
        let mut writer = PackWriter::new(64, 4);
        writer.push(b"hello").unwrap();
        let payload = writer.finish();

        let mut reader = PackReader::new(&payload[..payload.len() - 1]);
        assert!(matches!(reader.next(), Some(Err(SessionError::InvalidFrame(_)))));
        assert!(reader.next().is_none());
    }
}
