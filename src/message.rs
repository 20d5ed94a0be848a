use bytes::BufMut;

use crate::{DecodeError, EncodeError};

/// A Protobuf message writer.
///
/// Generated writer types implement `calc_size` and `encode_to`; the two walk
/// the populated fields in declaration order with identical per-field size
/// formulas, so `encode` can allocate exactly once.
pub trait WireMessage {
    /// Returns the exact number of bytes [`encode_to`](WireMessage::encode_to)
    /// will write.
    fn calc_size(&self) -> usize;

    /// Writes every populated field, in declaration order, to `buf`.
    ///
    /// The buffer must have at least [`calc_size`](WireMessage::calc_size)
    /// bytes of remaining capacity.
    fn encode_to(&self, buf: &mut impl BufMut);

    /// Encodes the message into a freshly allocated buffer of exactly
    /// [`calc_size`](WireMessage::calc_size) bytes.
    ///
    /// An empty message yields an empty, non-allocating `Vec`.
    fn encode(&self) -> Vec<u8>
    where
        Self: Sized,
    {
        let size = self.calc_size();
        let mut buf = Vec::with_capacity(size);
        self.encode_to(&mut buf);
        debug_assert_eq!(buf.len(), size);
        buf
    }

    /// Encodes the message to `buf`, failing instead of panicking when the
    /// buffer is too small.
    fn encode_checked(&self, buf: &mut impl BufMut) -> Result<(), EncodeError>
    where
        Self: Sized,
    {
        let required = self.calc_size();
        let remaining = buf.remaining_mut();
        if required > remaining {
            return Err(EncodeError::new(required, remaining));
        }
        self.encode_to(buf);
        Ok(())
    }
}

/// A lazy Protobuf message reader over a borrowed buffer.
///
/// Construction performs a single scan that records scalar values and the
/// byte ranges of length-delimited fields; payloads of nested messages are
/// not decoded until their accessor is called.
pub trait WireReader<'a>: Sized {
    /// Scans `buf` and returns a reader over it.
    fn parse(buf: &'a [u8]) -> Result<Self, DecodeError>;
}
