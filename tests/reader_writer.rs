//! Contract tests for the generated-code templates.
//!
//! `Unit`, `Legacy`, and `Holder` below are hand expansions of what
//! `protowire-build` emits for small proto3/proto2 messages. They are kept
//! textually in step with the generator so the wire contract (size/encode
//! agreement, lazy reading, packed/unpacked acceptance, defaults) is
//! exercised without running the generator inside this crate's tests.

// The expansions keep the generator's shape even where this test binary
// does not reach every member.
#![allow(dead_code)]

use protowire::bytes::BufMut;
use protowire::encoding as wire;
use protowire::{DecodeError, WireMessage, WireReader};

// message Unit {
//     string name = 1;
//     uint64 id = 2;
//     repeated int32 values = 3;
//     repeated string tags = 10;
// }

pub mod unit_wire {
    pub const NAME_WIRE: &[u8] = &[10];
    pub const ID_WIRE: &[u8] = &[16];
    pub const VALUES_WIRE: &[u8] = &[26];
    pub const TAGS_WIRE: &[u8] = &[82];
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Unit {
    pub name: String,
    pub id: u64,
    pub values: Vec<i32>,
    pub tags: Vec<String>,
}

impl WireMessage for Unit {
    fn calc_size(&self) -> usize {
        let mut size = 0;
        if !self.name.is_empty() {
            size += 1 + wire::sizeof_len_prefixed(self.name.len());
        }
        if self.id != 0 {
            size += 1 + wire::sizeof_uint64(self.id);
        }
        if !self.values.is_empty() {
            let packed: usize = self.values.iter().map(|value| wire::sizeof_int32(*value)).sum();
            size += 1 + wire::sizeof_len_prefixed(packed);
        }
        for value in &self.tags {
            size += 1 + wire::sizeof_len_prefixed(value.len());
        }
        size
    }

    fn encode_to(&self, buf: &mut impl BufMut) {
        if !self.name.is_empty() {
            buf.put_slice(unit_wire::NAME_WIRE);
            wire::encode_varint(self.name.len() as u64, buf);
            buf.put_slice(self.name.as_bytes());
        }
        if self.id != 0 {
            buf.put_slice(unit_wire::ID_WIRE);
            wire::encode_uint64(self.id, buf);
        }
        if !self.values.is_empty() {
            buf.put_slice(unit_wire::VALUES_WIRE);
            let packed: usize = self.values.iter().map(|value| wire::sizeof_int32(*value)).sum();
            wire::encode_varint(packed as u64, buf);
            for value in &self.values {
                wire::encode_int32(*value, buf);
            }
        }
        for value in &self.tags {
            buf.put_slice(unit_wire::TAGS_WIRE);
            wire::encode_varint(value.len() as u64, buf);
            buf.put_slice(value.as_bytes());
        }
    }
}

#[derive(Clone, Debug)]
pub struct UnitReader<'a> {
    buf: &'a [u8],
    name: &'a str,
    id: u64,
    values_head: usize,
    values_at: usize,
    values_run_pos: usize,
    values_run_end: usize,
    tags_head: usize,
    tags_at: usize,
}

impl<'a> UnitReader<'a> {
    pub fn new(buf: &'a [u8]) -> Result<UnitReader<'a>, DecodeError> {
        let mut reader = UnitReader {
            buf,
            name: "",
            id: 0,
            values_head: usize::MAX,
            values_at: usize::MAX,
            values_run_pos: 0,
            values_run_end: 0,
            tags_head: usize::MAX,
            tags_at: usize::MAX,
        };
        let mut pos = 0;
        while pos < buf.len() {
            let (tag, wire_type, next) = wire::read_key_at(buf, pos)?;
            pos = match tag {
                1 => {
                    wire::check_wire_type(wire::WireType::LengthDelimited, wire_type)?;
                    let range = wire::read_len_prefixed_at(buf, next)?;
                    let end = range.end;
                    reader.name = core::str::from_utf8(&buf[range])
                        .map_err(|_| DecodeError::new("string field contains invalid UTF-8"))?;
                    end
                }
                2 => {
                    wire::check_wire_type(wire::WireType::Varint, wire_type)?;
                    let (value, end) = wire::read_varint_at(buf, next)?;
                    reader.id = value;
                    end
                }
                3 => {
                    if reader.values_head == usize::MAX {
                        reader.values_head = pos;
                    }
                    if wire_type != wire::WireType::LengthDelimited {
                        wire::check_wire_type(wire::WireType::Varint, wire_type)?;
                    }
                    wire::skip_field_at(buf, next, tag, wire_type)?
                }
                10 => {
                    wire::check_wire_type(wire::WireType::LengthDelimited, wire_type)?;
                    if reader.tags_head == usize::MAX {
                        reader.tags_head = pos;
                    }
                    let range = wire::read_len_prefixed_at(buf, next)?;
                    let end = range.end;
                    core::str::from_utf8(&buf[range])
                        .map_err(|_| DecodeError::new("string field contains invalid UTF-8"))?;
                    end
                }
                _ => wire::skip_field_at(buf, next, tag, wire_type)?,
            };
        }
        reader.values_at = reader.values_head;
        reader.tags_at = reader.tags_head;
        Ok(reader)
    }

    pub fn get_name(&self) -> &'a str {
        self.name
    }

    pub fn get_id(&self) -> u64 {
        self.id
    }

    pub fn values_next(&mut self) -> Option<i32> {
        let buf = self.buf;
        loop {
            if self.values_run_pos < self.values_run_end {
                let (value, end) = wire::read_varint_at(buf, self.values_run_pos).ok()?;
                self.values_run_pos = end;
                return Some(value as i32);
            }
            if self.values_at >= buf.len() {
                return None;
            }
            let (tag, wire_type, next) = wire::read_key_at(buf, self.values_at).ok()?;
            if tag != 3 {
                self.values_at = wire::skip_field_at(buf, next, tag, wire_type).ok()?;
                continue;
            }
            if wire_type == wire::WireType::LengthDelimited {
                let range = wire::read_len_prefixed_at(buf, next).ok()?;
                self.values_at = range.end;
                self.values_run_pos = range.start;
                self.values_run_end = range.end;
            } else {
                let (value, end) = wire::read_varint_at(buf, next).ok()?;
                self.values_at = end;
                return Some(value as i32);
            }
        }
    }

    pub fn values_count(&self) -> usize {
        let buf = self.buf;
        let mut count = 0;
        let mut pos = self.values_head;
        while pos < buf.len() {
            let (tag, wire_type, next) = match wire::read_key_at(buf, pos) {
                Ok(key) => key,
                Err(_) => break,
            };
            let skipped = match wire::skip_field_at(buf, next, tag, wire_type) {
                Ok(skipped) => skipped,
                Err(_) => break,
            };
            if tag == 3 {
                if wire_type == wire::WireType::LengthDelimited {
                    if let Ok(range) = wire::read_len_prefixed_at(buf, next) {
                        let mut at = range.start;
                        while at < range.end {
                            match wire::read_varint_at(buf, at) {
                                Ok((_, end)) => {
                                    count += 1;
                                    at = end;
                                }
                                Err(_) => break,
                            }
                        }
                    }
                } else {
                    count += 1;
                }
            }
            pos = skipped;
        }
        count
    }

    pub fn values_rewind(&mut self) {
        self.values_at = self.values_head;
        self.values_run_pos = 0;
        self.values_run_end = 0;
    }

    pub fn tags_next(&mut self) -> Option<&'a str> {
        let buf = self.buf;
        while self.tags_at < buf.len() {
            let (tag, wire_type, next) = wire::read_key_at(buf, self.tags_at).ok()?;
            if tag == 10 && wire_type == wire::WireType::LengthDelimited {
                let range = wire::read_len_prefixed_at(buf, next).ok()?;
                self.tags_at = range.end;
                return core::str::from_utf8(&buf[range]).ok();
            }
            self.tags_at = wire::skip_field_at(buf, next, tag, wire_type).ok()?;
        }
        None
    }

    pub fn tags_count(&self) -> usize {
        let buf = self.buf;
        let mut count = 0;
        let mut pos = self.tags_head;
        while pos < buf.len() {
            let (tag, wire_type, next) = match wire::read_key_at(buf, pos) {
                Ok(key) => key,
                Err(_) => break,
            };
            if tag == 10 {
                count += 1;
            }
            pos = match wire::skip_field_at(buf, next, tag, wire_type) {
                Ok(pos) => pos,
                Err(_) => break,
            };
        }
        count
    }

    pub fn tags_rewind(&mut self) {
        self.tags_at = self.tags_head;
    }
}

impl<'a> WireReader<'a> for UnitReader<'a> {
    fn parse(buf: &'a [u8]) -> Result<UnitReader<'a>, DecodeError> {
        UnitReader::new(buf)
    }
}

// message Legacy (proto2) {
//     optional int32 spin = 1 [default = 42];
//     optional string label = 2 [default = "unnamed"];
// }

pub mod legacy_wire {
    pub const SPIN_WIRE: &[u8] = &[8];
    pub const LABEL_WIRE: &[u8] = &[18];
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Legacy {
    pub spin: Option<i32>,
    pub label: Option<String>,
}

impl WireMessage for Legacy {
    fn calc_size(&self) -> usize {
        let mut size = 0;
        if let Some(value) = &self.spin {
            size += 1 + wire::sizeof_int32(*value);
        }
        if let Some(value) = &self.label {
            size += 1 + wire::sizeof_len_prefixed(value.len());
        }
        size
    }

    fn encode_to(&self, buf: &mut impl BufMut) {
        if let Some(value) = &self.spin {
            buf.put_slice(legacy_wire::SPIN_WIRE);
            wire::encode_int32(*value, buf);
        }
        if let Some(value) = &self.label {
            buf.put_slice(legacy_wire::LABEL_WIRE);
            wire::encode_varint(value.len() as u64, buf);
            buf.put_slice(value.as_bytes());
        }
    }
}

#[derive(Clone, Debug)]
pub struct LegacyReader<'a> {
    buf: &'a [u8],
    spin: Option<i32>,
    label: Option<&'a str>,
}

impl<'a> LegacyReader<'a> {
    pub fn new(buf: &'a [u8]) -> Result<LegacyReader<'a>, DecodeError> {
        let mut reader = LegacyReader {
            buf,
            spin: None,
            label: None,
        };
        let mut pos = 0;
        while pos < buf.len() {
            let (tag, wire_type, next) = wire::read_key_at(buf, pos)?;
            pos = match tag {
                1 => {
                    wire::check_wire_type(wire::WireType::Varint, wire_type)?;
                    let (value, end) = wire::read_varint_at(buf, next)?;
                    reader.spin = Some(value as i32);
                    end
                }
                2 => {
                    wire::check_wire_type(wire::WireType::LengthDelimited, wire_type)?;
                    let range = wire::read_len_prefixed_at(buf, next)?;
                    let end = range.end;
                    reader.label = Some(
                        core::str::from_utf8(&buf[range])
                            .map_err(|_| DecodeError::new("string field contains invalid UTF-8"))?,
                    );
                    end
                }
                _ => wire::skip_field_at(buf, next, tag, wire_type)?,
            };
        }
        Ok(reader)
    }

    pub fn get_spin(&self) -> i32 {
        self.spin.unwrap_or(42)
    }

    pub fn has_spin(&self) -> bool {
        self.spin.is_some()
    }

    pub fn get_label(&self) -> &'a str {
        self.label.unwrap_or("unnamed")
    }

    pub fn has_label(&self) -> bool {
        self.label.is_some()
    }
}

impl<'a> WireReader<'a> for LegacyReader<'a> {
    fn parse(buf: &'a [u8]) -> Result<LegacyReader<'a>, DecodeError> {
        LegacyReader::new(buf)
    }
}

// message Holder { Unit unit = 1; }

pub mod holder_wire {
    pub const UNIT_WIRE: &[u8] = &[10];
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Holder {
    pub unit: Option<Unit>,
}

impl WireMessage for Holder {
    fn calc_size(&self) -> usize {
        let mut size = 0;
        if let Some(value) = &self.unit {
            size += 1 + wire::sizeof_len_prefixed(value.calc_size());
        }
        size
    }

    fn encode_to(&self, buf: &mut impl BufMut) {
        if let Some(value) = &self.unit {
            buf.put_slice(holder_wire::UNIT_WIRE);
            wire::encode_varint(value.calc_size() as u64, buf);
            value.encode_to(buf);
        }
    }
}

#[derive(Clone, Debug)]
pub struct HolderReader<'a> {
    buf: &'a [u8],
    unit: Option<&'a [u8]>,
}

impl<'a> HolderReader<'a> {
    pub fn new(buf: &'a [u8]) -> Result<HolderReader<'a>, DecodeError> {
        let mut reader = HolderReader { buf, unit: None };
        let mut pos = 0;
        while pos < buf.len() {
            let (tag, wire_type, next) = wire::read_key_at(buf, pos)?;
            pos = match tag {
                1 => {
                    wire::check_wire_type(wire::WireType::LengthDelimited, wire_type)?;
                    let range = wire::read_len_prefixed_at(buf, next)?;
                    let end = range.end;
                    reader.unit = Some(&buf[range]);
                    end
                }
                _ => wire::skip_field_at(buf, next, tag, wire_type)?,
            };
        }
        Ok(reader)
    }

    pub fn get_unit(&self) -> Result<UnitReader<'a>, DecodeError> {
        UnitReader::new(self.unit.unwrap_or_default())
    }

    pub fn has_unit(&self) -> bool {
        self.unit.is_some()
    }
}

// --------------------------------------------------------------------------

fn sample() -> Unit {
    Unit {
        name: "Alice".to_string(),
        id: 12345,
        values: vec![1, 2, 300],
        tags: vec!["admin".to_string(), "verified".to_string()],
    }
}

#[test]
fn size_and_encode_agree() {
    let unit = sample();
    let encoded = unit.encode();
    assert_eq!(encoded.len(), unit.calc_size());

    let mut buf = Vec::new();
    unit.encode_to(&mut buf);
    assert_eq!(buf.len(), unit.calc_size());
    assert_eq!(buf, encoded);
}

#[test]
fn empty_message_encodes_to_nothing() {
    let unit = Unit::default();
    assert_eq!(unit.calc_size(), 0);
    assert_eq!(unit.encode(), Vec::<u8>::new());
}

#[test]
fn scenario_bytes_match_the_wire_spec() {
    let encoded = sample().encode();
    let expected: &[u8] = &[
        0x0A, 0x05, b'A', b'l', b'i', b'c', b'e', // name
        0x10, 0xB9, 0x60, // id = 12345
        0x1A, 0x04, 0x01, 0x02, 0xAC, 0x02, // values packed
        0x52, 0x05, b'a', b'd', b'm', b'i', b'n', // tags[0]
        0x52, 0x08, b'v', b'e', b'r', b'i', b'f', b'i', b'e', b'd', // tags[1]
    ];
    assert_eq!(encoded, expected);
}

#[test]
fn round_trip_preserves_every_field() {
    let unit = sample();
    let encoded = unit.encode();
    let mut reader = UnitReader::new(&encoded).unwrap();

    assert_eq!(reader.get_name(), "Alice");
    assert_eq!(reader.get_id(), 12345);
    assert_eq!(reader.values_count(), 3);
    assert_eq!(reader.values_next(), Some(1));
    assert_eq!(reader.values_next(), Some(2));
    assert_eq!(reader.values_next(), Some(300));
    assert_eq!(reader.values_next(), None);
    assert_eq!(reader.tags_next(), Some("admin"));
    assert_eq!(reader.tags_next(), Some("verified"));
    assert_eq!(reader.tags_next(), None);
    assert_eq!(reader.tags_count(), 2);
}

#[test]
fn repeated_encode_decode_cycles_are_byte_stable() {
    let first = sample().encode();
    let reader = UnitReader::new(&first).unwrap();
    let mut reencode = Unit {
        name: reader.get_name().to_string(),
        id: reader.get_id(),
        values: Vec::new(),
        tags: Vec::new(),
    };
    let mut reader = reader;
    while let Some(value) = reader.values_next() {
        reencode.values.push(value);
    }
    while let Some(tag) = reader.tags_next() {
        reencode.tags.push(tag.to_string());
    }
    assert_eq!(reencode.encode(), first);
}

#[test]
fn unpacked_elements_decode_like_packed_ones() {
    // The same repeated field, written one tag per element as proto2
    // encoders do: (3 << 3) | 0 == 24.
    let mut buf = Vec::new();
    for value in [1i32, 2, 300] {
        buf.push(24);
        wire::encode_int32(value, &mut buf);
    }

    let mut reader = UnitReader::new(&buf).unwrap();
    assert_eq!(reader.values_count(), 3);
    assert_eq!(reader.values_next(), Some(1));
    assert_eq!(reader.values_next(), Some(2));
    assert_eq!(reader.values_next(), Some(300));
    assert_eq!(reader.values_next(), None);
}

#[test]
fn mixed_packed_and_unpacked_runs_concatenate() {
    let mut buf = Vec::new();
    // Unpacked occurrence.
    buf.push(24);
    wire::encode_int32(7, &mut buf);
    // Packed run.
    buf.extend_from_slice(&[0x1A, 0x02, 0x08, 0x09]);
    // Another unpacked occurrence after unrelated data.
    buf.push(16); // field 2 varint
    wire::encode_uint64(1, &mut buf);
    buf.push(24);
    wire::encode_int32(10, &mut buf);

    let mut reader = UnitReader::new(&buf).unwrap();
    let collected: Vec<i32> = std::iter::from_fn(|| reader.values_next()).collect();
    assert_eq!(collected, [7, 8, 9, 10]);
    assert_eq!(reader.values_count(), 4);
}

#[test]
fn unknown_fields_are_skipped_not_stored() {
    let mut buf = Vec::new();
    // Unknown field 99 (varint) before known data.
    wire::encode_key(99, wire::WireType::Varint, &mut buf);
    wire::encode_varint(123456, &mut buf);
    let body = sample().encode();
    buf.extend_from_slice(&body[..7]); // name field
    // Unknown length-delimited field interleaved.
    wire::encode_key(50, wire::WireType::LengthDelimited, &mut buf);
    wire::encode_varint(3, &mut buf);
    buf.extend_from_slice(b"???");
    buf.extend_from_slice(&body[7..]); // the rest

    let mut reader = UnitReader::new(&buf).unwrap();
    assert_eq!(reader.get_name(), "Alice");
    assert_eq!(reader.get_id(), 12345);
    assert_eq!(reader.tags_next(), Some("admin"));
}

#[test]
fn non_iterator_accessors_are_idempotent() {
    let encoded = sample().encode();
    let mut reader = UnitReader::new(&encoded).unwrap();

    assert_eq!(reader.get_name(), reader.get_name());
    assert_eq!(reader.get_id(), reader.get_id());

    // A getter between iterator calls must not disturb the cursor.
    assert_eq!(reader.values_next(), Some(1));
    assert_eq!(reader.get_name(), "Alice");
    assert_eq!(reader.values_next(), Some(2));

    reader.values_rewind();
    assert_eq!(reader.values_next(), Some(1));
    reader.tags_rewind();
    assert_eq!(reader.tags_next(), Some("admin"));
}

#[test]
fn proto2_defaults_read_through_absent_fields() {
    let reader = LegacyReader::new(&[]).unwrap();
    assert_eq!(reader.get_spin(), 42);
    assert!(!reader.has_spin());
    assert_eq!(reader.get_label(), "unnamed");
    assert!(!reader.has_label());

    // An explicit zero is present, not defaulted.
    let legacy = Legacy {
        spin: Some(0),
        label: None,
    };
    let encoded = legacy.encode();
    let reader = LegacyReader::new(&encoded).unwrap();
    assert_eq!(reader.get_spin(), 0);
    assert!(reader.has_spin());
}

#[test]
fn nested_messages_decode_lazily() {
    let holder = Holder {
        unit: Some(sample()),
    };
    let encoded = holder.encode();
    assert_eq!(encoded.len(), holder.calc_size());

    let reader = HolderReader::new(&encoded).unwrap();
    assert!(reader.has_unit());
    let mut unit = reader.get_unit().unwrap();
    assert_eq!(unit.get_name(), "Alice");
    assert_eq!(unit.values_next(), Some(1));

    // A second accessor call yields a fresh sub-reader with its own cursor.
    let mut again = reader.get_unit().unwrap();
    assert_eq!(again.values_next(), Some(1));

    let empty = HolderReader::new(&[]).unwrap();
    assert!(!empty.has_unit());
    assert_eq!(empty.get_unit().unwrap().get_name(), "");
}

#[test]
fn malformed_nested_payloads_fail_at_access_time() {
    let mut buf = Vec::new();
    buf.put_slice(holder_wire::UNIT_WIRE);
    // Claims a 3-byte submessage whose content is a truncated field.
    wire::encode_varint(3, &mut buf);
    buf.put_slice(&[0x0A, 0xFF, 0xFF]);

    // Construction records the range without decoding it.
    let reader = HolderReader::new(&buf).unwrap();
    reader.get_unit().expect_err("malformed nested payload decoded");
}

#[test]
fn encode_checked_reports_insufficient_capacity() {
    let unit = sample();
    let mut small = [0u8; 4];
    let error = unit
        .encode_checked(&mut small.as_mut_slice())
        .expect_err("encode into a 4-byte buffer succeeded");
    assert_eq!(error.required_capacity(), unit.calc_size());
    assert_eq!(error.remaining(), 4);

    let mut exact = Vec::with_capacity(unit.calc_size());
    unit.encode_checked(&mut exact).unwrap();
    assert_eq!(exact.len(), unit.calc_size());
}

#[test]
fn wire_reader_trait_parse_matches_new() {
    let encoded = sample().encode();
    let via_trait = <UnitReader as WireReader>::parse(&encoded).unwrap();
    assert_eq!(via_trait.get_id(), 12345);
}
