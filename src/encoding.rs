//! Wire-format primitives shared by generated writers and readers.
//!
//! The `encode_*`/`sizeof_*` halves are used by generated writer types, and
//! must agree byte for byte: `calc_size` sums `sizeof_*` results in field
//! order, and `encode_to` writes with the matching `encode_*` calls in the
//! same order. The `read_*_at`/`skip_field_at` half is used by generated lazy
//! readers, which index into a borrowed slice rather than consuming a `Buf`.

use std::ops::Range;

use bytes::{Buf, BufMut};

use crate::DecodeError;

/// The smallest valid field number.
pub const MIN_TAG: u32 = 1;
/// The largest valid field number; field numbers occupy 29 bits of the key.
pub const MAX_TAG: u32 = (1 << 29) - 1;

/// The wire type of a Protobuf field, as carried in the low three bits of
/// every field key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum WireType {
    Varint = 0,
    SixtyFourBit = 1,
    LengthDelimited = 2,
    StartGroup = 3,
    EndGroup = 4,
    ThirtyTwoBit = 5,
}

impl TryFrom<u64> for WireType {
    type Error = DecodeError;

    #[inline]
    fn try_from(value: u64) -> Result<WireType, DecodeError> {
        match value {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::SixtyFourBit),
            2 => Ok(WireType::LengthDelimited),
            3 => Ok(WireType::StartGroup),
            4 => Ok(WireType::EndGroup),
            5 => Ok(WireType::ThirtyTwoBit),
            _ => Err(DecodeError::new(format!(
                "invalid wire type value: {}",
                value
            ))),
        }
    }
}

/// Fails with a decode error unless `actual` is the wire type a field's
/// schema calls for.
#[inline]
pub fn check_wire_type(expected: WireType, actual: WireType) -> Result<(), DecodeError> {
    if expected != actual {
        return Err(DecodeError::new(format!(
            "invalid wire type: {:?} (expected {:?})",
            actual, expected
        )));
    }
    Ok(())
}

/// Writes `value` as a varint: seven bits per byte, least significant group
/// first, with the high bit flagging a continuation. A `u64` takes at most
/// ten bytes.
#[inline]
pub fn encode_varint(mut value: u64, buf: &mut impl BufMut) {
    while value >= 0x80 {
        buf.put_u8(0x80 | (value as u8 & 0x7F));
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Returns the varint width of `value`: one byte per started 7-bit group,
/// between 1 and 10 inclusive. `value | 1` keeps zero at one significant
/// bit, so it also costs one byte.
#[inline]
pub fn encoded_len_varint(value: u64) -> usize {
    let significant_bits = 64 - (value | 1).leading_zeros() as usize;
    (significant_bits + 6) / 7
}

/// Decodes a varint from the buffer, consuming its bytes.
///
/// A tenth byte above `0x01` would overflow 64 bits, and with it any run of
/// ten or more continuation bytes; both are rejected as corrupt.
#[inline]
pub fn decode_varint(buf: &mut impl Buf) -> Result<u64, DecodeError> {
    let mut value = 0u64;
    let mut shift = 0u32;
    while buf.has_remaining() {
        let byte = buf.get_u8();
        if shift == 63 && byte > 0x01 {
            return Err(DecodeError::new("invalid varint"));
        }
        value |= u64::from(byte & 0x7F) << shift;
        if byte < 0x80 {
            return Ok(value);
        }
        shift += 7;
    }
    Err(DecodeError::new("invalid varint"))
}

/// Maps a signed 32-bit value to its zig-zag wire representation.
#[inline]
pub fn encode_zigzag32(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

/// Maps a signed 64-bit value to its zig-zag wire representation.
#[inline]
pub fn encode_zigzag64(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Inverse of [`encode_zigzag32`].
#[inline]
pub fn decode_zigzag32(value: u32) -> i32 {
    ((value >> 1) as i32) ^ (-((value & 1) as i32))
}

/// Inverse of [`encode_zigzag64`].
#[inline]
pub fn decode_zigzag64(value: u64) -> i64 {
    ((value >> 1) as i64) ^ (-((value & 1) as i64))
}

/// Writes a field key: the field number shifted over the three wire-type
/// bits, as a varint.
#[inline]
pub fn encode_key(tag: u32, wire_type: WireType, buf: &mut impl BufMut) {
    debug_assert!((MIN_TAG..=MAX_TAG).contains(&tag));
    let key = (tag << 3) | wire_type as u32;
    encode_varint(u64::from(key), buf);
}

/// Reads a field key from the buffer, splitting it into field number and
/// wire type. Zero field numbers and keys past `u32` range are corrupt.
#[inline]
pub fn decode_key(buf: &mut impl Buf) -> Result<(u32, WireType), DecodeError> {
    let key = decode_varint(buf)?;
    if key > u64::from(u32::MAX) {
        return Err(DecodeError::new(format!("invalid key value: {}", key)));
    }
    let wire_type = WireType::try_from(key & 0x07)?;
    let tag = key as u32 >> 3;

    if tag < MIN_TAG {
        return Err(DecodeError::new("invalid tag value: 0"));
    }

    Ok((tag, wire_type))
}

/// The encoded width of a field key with the given number: one byte through
/// five, since field numbers stop at 29 bits.
#[inline]
pub fn key_len(tag: u32) -> usize {
    encoded_len_varint(u64::from(tag << 3))
}

/// Skips one field of the given wire type without interpreting its payload.
///
/// Legacy groups are skipped by consuming keys until the matching end-group
/// key, recursing for nested groups.
pub fn skip_field(wire_type: WireType, tag: u32, buf: &mut impl Buf) -> Result<(), DecodeError> {
    let len = match wire_type {
        WireType::Varint => decode_varint(buf).map(|_| 0)?,
        WireType::ThirtyTwoBit => 4,
        WireType::SixtyFourBit => 8,
        WireType::LengthDelimited => decode_varint(buf)?,
        WireType::StartGroup => loop {
            let (inner_tag, inner_wire_type) = decode_key(buf)?;
            match inner_wire_type {
                WireType::EndGroup => {
                    if inner_tag != tag {
                        return Err(DecodeError::new("unexpected end group tag"));
                    }
                    break 0;
                }
                _ => skip_field(inner_wire_type, inner_tag, buf)?,
            }
        },
        WireType::EndGroup => return Err(DecodeError::new("unexpected end group tag")),
    };

    if len > buf.remaining() as u64 {
        return Err(DecodeError::new("buffer underflow"));
    }

    buf.advance(len as usize);
    Ok(())
}

/// Decodes a varint at `pos`, returning the value and the offset just past
/// it. Same overflow policy as [`decode_varint`].
#[inline]
pub fn read_varint_at(buf: &[u8], pos: usize) -> Result<(u64, usize), DecodeError> {
    let bytes = buf
        .get(pos..)
        .ok_or_else(|| DecodeError::new("buffer underflow"))?;
    let mut value = 0u64;
    let mut shift = 0u32;
    for (offset, &byte) in bytes.iter().enumerate() {
        if shift == 63 && byte > 0x01 {
            return Err(DecodeError::new("invalid varint"));
        }
        value |= u64::from(byte & 0x7F) << shift;
        if byte < 0x80 {
            return Ok((value, pos + offset + 1));
        }
        shift += 7;
    }
    Err(DecodeError::new("invalid varint"))
}

/// Decodes a field key at `pos`, returning the field number, wire type, and
/// the offset just past the key.
#[inline]
pub fn read_key_at(buf: &[u8], pos: usize) -> Result<(u32, WireType, usize), DecodeError> {
    let (key, pos) = read_varint_at(buf, pos)?;
    if key > u64::from(u32::MAX) {
        return Err(DecodeError::new(format!("invalid key value: {}", key)));
    }
    let wire_type = WireType::try_from(key & 0x07)?;
    let tag = key as u32 >> 3;
    if tag < MIN_TAG {
        return Err(DecodeError::new("invalid tag value: 0"));
    }
    Ok((tag, wire_type, pos))
}

/// Reads a little-endian fixed 32-bit value at `pos`.
#[inline]
pub fn read_fixed32_at(buf: &[u8], pos: usize) -> Result<(u32, usize), DecodeError> {
    match buf.get(pos..pos + 4) {
        Some(bytes) => {
            let value = u32::from_le_bytes(bytes.try_into().expect("4-byte slice"));
            Ok((value, pos + 4))
        }
        None => Err(DecodeError::new("buffer underflow")),
    }
}

/// Reads a little-endian fixed 64-bit value at `pos`.
#[inline]
pub fn read_fixed64_at(buf: &[u8], pos: usize) -> Result<(u64, usize), DecodeError> {
    match buf.get(pos..pos + 8) {
        Some(bytes) => {
            let value = u64::from_le_bytes(bytes.try_into().expect("8-byte slice"));
            Ok((value, pos + 8))
        }
        None => Err(DecodeError::new("buffer underflow")),
    }
}

/// Reads a length-delimited payload at `pos`, returning the byte range of the
/// payload within `buf`. The next field begins at the range's end.
#[inline]
pub fn read_len_prefixed_at(buf: &[u8], pos: usize) -> Result<Range<usize>, DecodeError> {
    let (len, start) = read_varint_at(buf, pos)?;
    if len > (buf.len() - start) as u64 {
        return Err(DecodeError::new("buffer underflow"));
    }
    Ok(start..start + len as usize)
}

/// Skips one field at `pos` given its wire type, returning the offset of the
/// next key. The key itself must already have been consumed.
pub fn skip_field_at(
    buf: &[u8],
    pos: usize,
    tag: u32,
    wire_type: WireType,
) -> Result<usize, DecodeError> {
    match wire_type {
        WireType::Varint => read_varint_at(buf, pos).map(|(_, pos)| pos),
        WireType::ThirtyTwoBit => {
            if buf.len().saturating_sub(pos) < 4 {
                return Err(DecodeError::new("buffer underflow"));
            }
            Ok(pos + 4)
        }
        WireType::SixtyFourBit => {
            if buf.len().saturating_sub(pos) < 8 {
                return Err(DecodeError::new("buffer underflow"));
            }
            Ok(pos + 8)
        }
        WireType::LengthDelimited => read_len_prefixed_at(buf, pos).map(|range| range.end),
        WireType::StartGroup => {
            let mut pos = pos;
            loop {
                let (inner_tag, inner_wire_type, next) = read_key_at(buf, pos)?;
                if inner_wire_type == WireType::EndGroup {
                    if inner_tag != tag {
                        return Err(DecodeError::new("unexpected end group tag"));
                    }
                    return Ok(next);
                }
                pos = skip_field_at(buf, next, inner_tag, inner_wire_type)?;
            }
        }
        WireType::EndGroup => Err(DecodeError::new("unexpected end group tag")),
    }
}

/// Writes an `int32` payload; negative values sign-extend to ten bytes.
#[inline]
pub fn encode_int32(value: i32, buf: &mut impl BufMut) {
    encode_varint(value as i64 as u64, buf);
}

/// Writes an `int64` payload.
#[inline]
pub fn encode_int64(value: i64, buf: &mut impl BufMut) {
    encode_varint(value as u64, buf);
}

/// Writes a `uint32` payload.
#[inline]
pub fn encode_uint32(value: u32, buf: &mut impl BufMut) {
    encode_varint(u64::from(value), buf);
}

/// Writes a `uint64` payload.
#[inline]
pub fn encode_uint64(value: u64, buf: &mut impl BufMut) {
    encode_varint(value, buf);
}

/// Writes a `sint32` payload in zig-zag form.
#[inline]
pub fn encode_sint32(value: i32, buf: &mut impl BufMut) {
    encode_varint(u64::from(encode_zigzag32(value)), buf);
}

/// Writes a `sint64` payload in zig-zag form.
#[inline]
pub fn encode_sint64(value: i64, buf: &mut impl BufMut) {
    encode_varint(encode_zigzag64(value), buf);
}

/// Writes a `bool` payload.
#[inline]
pub fn encode_bool(value: bool, buf: &mut impl BufMut) {
    buf.put_u8(u8::from(value));
}

/// Payload size of an `int32` value.
#[inline]
pub fn sizeof_int32(value: i32) -> usize {
    encoded_len_varint(value as i64 as u64)
}

/// Payload size of an `int64` value.
#[inline]
pub fn sizeof_int64(value: i64) -> usize {
    encoded_len_varint(value as u64)
}

/// Payload size of a `uint32` value.
#[inline]
pub fn sizeof_uint32(value: u32) -> usize {
    encoded_len_varint(u64::from(value))
}

/// Payload size of a `uint64` value.
#[inline]
pub fn sizeof_uint64(value: u64) -> usize {
    encoded_len_varint(value)
}

/// Payload size of a `sint32` value.
#[inline]
pub fn sizeof_sint32(value: i32) -> usize {
    encoded_len_varint(u64::from(encode_zigzag32(value)))
}

/// Payload size of a `sint64` value.
#[inline]
pub fn sizeof_sint64(value: i64) -> usize {
    encoded_len_varint(encode_zigzag64(value))
}

/// Size of a length-delimited payload including its length prefix but not its
/// key.
#[inline]
pub fn sizeof_len_prefixed(len: usize) -> usize {
    encoded_len_varint(len as u64) + len
}
