//! Lazy-reader emission.
//!
//! A reader borrows the encoded buffer and scans it exactly once at
//! construction: scalars are stored inline, length-delimited payloads as
//! sub-slices, and repeated/map fields as the offset of their first
//! occurrence plus a forward cursor. Accessors never allocate; nested
//! readers are built on demand from the recorded slices.

use protowire::encoding::WireType;

use super::{plurality, CodeGenerator, Plurality};
use crate::ast::{FieldType, MapField, Message, MessageField, NamedType, NormalField, OptionValue};
use crate::ident::{escape_keyword, to_snake_raw, NameSet};

/// One stored field of a reader struct.
struct Slot {
    name: String,
    ty: String,
    init: String,
}

/// How a proto field maps onto reader state.
enum Access {
    /// Scalar stored inline; absent reads as zero.
    Plain { field: NormalField },
    /// Explicit presence: `Option` stored, getter applies the default.
    Tracked { field: NormalField },
    /// Message payload slice; getter builds a sub-reader lazily.
    Lazy { field: NormalField },
    /// Oneof member: `Option` stored, scan clears the sibling members.
    Member { field: NormalField },
    /// Repeated scalar accepting packed and unpacked encodings.
    Packed { field: NormalField },
    /// Repeated length-delimited values.
    Elements { field: NormalField },
    Map { map: MapField },
}

impl Access {
    fn of(field: &NormalField, generator: &CodeGenerator, in_oneof: bool) -> Access {
        let field = field.clone();
        let is_message = matches!(
            &field.typ,
            FieldType::Named(named) if !CodeGenerator::is_enum(named)
        );
        if in_oneof {
            return Access::Member { field };
        }
        match plurality(&field, generator.syntax) {
            // Readers accept both wire forms whatever the schema says, so
            // repeated fields split by element kind, not by the packed flag.
            Plurality::Repeated { .. } => {
                if field.typ.is_packable() {
                    Access::Packed { field }
                } else {
                    Access::Elements { field }
                }
            }
            _ if is_message => Access::Lazy { field },
            Plurality::Explicit => Access::Tracked { field },
            _ => Access::Plain { field },
        }
    }
}

impl<'a> CodeGenerator<'a> {
    /// Borrowed Rust type of one decoded value.
    fn reader_value_type(&self, typ: &FieldType) -> String {
        match typ {
            FieldType::Int32 | FieldType::Sint32 | FieldType::Sfixed32 => "i32",
            FieldType::Int64 | FieldType::Sint64 | FieldType::Sfixed64 => "i64",
            FieldType::Uint32 | FieldType::Fixed32 => "u32",
            FieldType::Uint64 | FieldType::Fixed64 => "u64",
            FieldType::Float => "f32",
            FieldType::Double => "f64",
            FieldType::Bool => "bool",
            FieldType::String => "&'a str",
            FieldType::Bytes | FieldType::Named(_) => "&'a [u8]",
        }
        .to_string()
    }

    fn reader_zero(typ: &FieldType) -> &'static str {
        match typ {
            FieldType::Float | FieldType::Double => "0.0",
            FieldType::Bool => "false",
            FieldType::String => "\"\"",
            FieldType::Bytes | FieldType::Named(_) => "b\"\"",
            _ => "0",
        }
    }

    /// Enum values are stored as their raw `i32` wire value.
    fn reader_stored_type(&self, typ: &FieldType) -> String {
        match typ {
            FieldType::Named(named) if Self::is_enum(named) => "i32".to_string(),
            other => self.reader_value_type(other),
        }
    }

    fn reader_stored_zero(typ: &FieldType) -> &'static str {
        match typ {
            // Only enums reach here among named types; messages are lazy.
            FieldType::Named(_) => "0",
            other => Self::reader_zero(other),
        }
    }

    /// Raw-u64-to-value cast for varint payloads, over a local `value`.
    fn varint_cast(typ: &FieldType) -> &'static str {
        match typ {
            FieldType::Int32 => "value as i32",
            FieldType::Int64 => "value as i64",
            FieldType::Uint32 => "value as u32",
            FieldType::Uint64 => "value",
            FieldType::Sint32 => "wire::decode_zigzag32(value as u32)",
            FieldType::Sint64 => "wire::decode_zigzag64(value)",
            FieldType::Bool => "value != 0",
            FieldType::Named(_) => "value as i32",
            other => unreachable!("{:?} is not a varint type", other),
        }
    }

    fn fixed32_cast(typ: &FieldType) -> &'static str {
        match typ {
            FieldType::Fixed32 => "value",
            FieldType::Sfixed32 => "value as i32",
            FieldType::Float => "f32::from_bits(value)",
            other => unreachable!("{:?} is not a fixed32 type", other),
        }
    }

    fn fixed64_cast(typ: &FieldType) -> &'static str {
        match typ {
            FieldType::Fixed64 => "value",
            FieldType::Sfixed64 => "value as i64",
            FieldType::Double => "f64::from_bits(value)",
            other => unreachable!("{:?} is not a fixed64 type", other),
        }
    }

    /// Storage names for every field of a message, in declaration order.
    /// Deterministic, so the struct and its impls agree.
    fn reader_slot_names(message: &Message) -> Vec<String> {
        let mut names = NameSet::new();
        names.reserve("buf");
        let mut out = Vec::new();
        for field in &message.fields {
            match field {
                MessageField::Normal(field) => out.push(names.claim(&to_snake_raw(&field.name))),
                MessageField::Map(map) => out.push(names.claim(&to_snake_raw(&map.name))),
                MessageField::OneOf(oneof) => {
                    for field in &oneof.fields {
                        out.push(names.claim(&to_snake_raw(&field.name)));
                    }
                }
            }
        }
        out
    }

    /// Flattened per-field access plans, aligned with
    /// [`reader_slot_names`](Self::reader_slot_names). Oneof members carry
    /// their siblings' storage names for last-one-wins clearing.
    fn reader_accesses(&self, message: &Message) -> Vec<(String, Access, Vec<String>)> {
        let slot_names = Self::reader_slot_names(message);
        let mut out = Vec::new();
        let mut cursor = 0;
        for field in &message.fields {
            match field {
                MessageField::Normal(field) => {
                    out.push((
                        slot_names[cursor].clone(),
                        Access::of(field, self, false),
                        Vec::new(),
                    ));
                    cursor += 1;
                }
                MessageField::Map(map) => {
                    out.push((
                        slot_names[cursor].clone(),
                        Access::Map { map: map.clone() },
                        Vec::new(),
                    ));
                    cursor += 1;
                }
                MessageField::OneOf(oneof) => {
                    let members: Vec<String> =
                        slot_names[cursor..cursor + oneof.fields.len()].to_vec();
                    for (offset, field) in oneof.fields.iter().enumerate() {
                        let siblings = members
                            .iter()
                            .enumerate()
                            .filter(|&(index, _)| index != offset)
                            .map(|(_, name)| name.clone())
                            .collect();
                        out.push((
                            members[offset].clone(),
                            Access::of(field, self, true),
                            siblings,
                        ));
                    }
                    cursor += oneof.fields.len();
                }
            }
        }
        out
    }

    fn slots_for(&self, name: &str, access: &Access) -> Vec<Slot> {
        // Derived names (`x_head`, `x_at`) never collide with keywords, but
        // a bare storage field might.
        let plain = |ty: String, init: &str| {
            vec![Slot {
                name: escape_keyword(name),
                ty,
                init: init.to_string(),
            }]
        };
        let cursor_pair = || {
            vec![
                Slot {
                    name: format!("{}_head", name),
                    ty: "usize".to_string(),
                    init: "usize::MAX".to_string(),
                },
                Slot {
                    name: format!("{}_at", name),
                    ty: "usize".to_string(),
                    init: "usize::MAX".to_string(),
                },
            ]
        };

        match access {
            Access::Plain { field } => plain(
                self.reader_stored_type(&field.typ),
                Self::reader_stored_zero(&field.typ),
            ),
            Access::Tracked { field } | Access::Member { field } => {
                let inner = match &field.typ {
                    FieldType::Named(named) if !Self::is_enum(named) => "&'a [u8]".to_string(),
                    other => self.reader_stored_type(other),
                };
                plain(format!("Option<{}>", inner), "None")
            }
            Access::Lazy { .. } => plain("Option<&'a [u8]>".to_string(), "None"),
            Access::Packed { .. } => {
                let mut slots = cursor_pair();
                slots.push(Slot {
                    name: format!("{}_run_pos", name),
                    ty: "usize".to_string(),
                    init: "0".to_string(),
                });
                slots.push(Slot {
                    name: format!("{}_run_end", name),
                    ty: "usize".to_string(),
                    init: "0".to_string(),
                });
                slots
            }
            Access::Elements { .. } | Access::Map { .. } => cursor_pair(),
        }
    }

    pub(super) fn append_reader(&mut self, message: &Message) {
        let msg_names = self.names.of(self.file_id, &message.fq_name);
        let reader_name = msg_names.reader.clone();
        let accesses = self.reader_accesses(message);

        let mut slots = Vec::new();
        for (name, access, _) in &accesses {
            slots.extend(self.slots_for(name, access));
        }

        self.w.doc(format!(
            "Lazy reader for `{}` over a borrowed buffer.",
            message.fq_name
        ));
        self.w.line("#[derive(Clone, Debug)]");
        self.w.open(format!("pub struct {}<'a>", reader_name));
        self.w.line("buf: &'a [u8],");
        for slot in &slots {
            self.w.line(format!("{}: {},", slot.name, slot.ty));
        }
        self.w.close();
        self.w.blank();

        self.w.open(format!("impl<'a> {}<'a>", reader_name));
        self.append_reader_new(&reader_name, &accesses, &slots);
        for (name, access, _) in &accesses {
            self.append_accessors(name, access);
        }
        self.w.close();
        self.w.blank();

        self.w
            .open(format!("impl<'a> WireReader<'a> for {}<'a>", reader_name));
        self.w.open(format!(
            "fn parse(buf: &'a [u8]) -> Result<{}<'a>, DecodeError>",
            reader_name
        ));
        self.w.line(format!("{}::new(buf)", reader_name));
        self.w.close();
        self.w.close();
        self.w.blank();
    }

    fn append_reader_new(
        &mut self,
        reader_name: &str,
        accesses: &[(String, Access, Vec<String>)],
        slots: &[Slot],
    ) {
        self.w
            .doc("Scans `buf` once, recording scalar values and payload ranges.");
        self.w.open(format!(
            "pub fn new(buf: &'a [u8]) -> Result<{}<'a>, DecodeError>",
            reader_name
        ));
        self.w.open(format!("let mut reader = {}", reader_name));
        self.w.line("buf,");
        for slot in slots {
            self.w.line(format!("{}: {},", slot.name, slot.init));
        }
        self.w.close_with("};");

        self.w.line("let mut pos = 0;");
        self.w.open("while pos < buf.len()");
        self.w
            .line("let (tag, wire_type, next) = wire::read_key_at(buf, pos)?;");
        self.w.open("pos = match tag");
        for (name, access, siblings) in accesses {
            self.append_scan_arm(name, access, siblings);
        }
        self.w
            .line("_ => wire::skip_field_at(buf, next, tag, wire_type)?,");
        self.w.close_with("};");
        self.w.close();

        for (name, access, _) in accesses {
            match access {
                Access::Packed { .. } | Access::Elements { .. } | Access::Map { .. } => {
                    self.w
                        .line(format!("reader.{}_at = reader.{}_head;", name, name));
                }
                _ => {}
            }
        }
        self.w.line("Ok(reader)");
        self.w.close();
        self.w.blank();
    }

    fn append_scan_arm(&mut self, name: &str, access: &Access, siblings: &[String]) {
        match access {
            Access::Plain { field } => {
                self.w.open(format!("{} =>", field.number));
                self.append_scan_store(&field.typ, name, false, siblings);
                self.w.close();
            }
            Access::Tracked { field } | Access::Member { field } => {
                self.w.open(format!("{} =>", field.number));
                match &field.typ {
                    FieldType::Named(named) if !Self::is_enum(named) => {
                        self.append_scan_slice(name, siblings);
                    }
                    typ => self.append_scan_store(typ, name, true, siblings),
                }
                self.w.close();
            }
            Access::Lazy { field } => {
                self.w.open(format!("{} =>", field.number));
                self.append_scan_slice(name, siblings);
                self.w.close();
            }
            Access::Packed { field } => {
                let element_wire = self.wire_type_of(&field.typ);
                self.w.open(format!("{} =>", field.number));
                self.w.open(format!("if reader.{}_head == usize::MAX", name));
                self.w.line(format!("reader.{}_head = pos;", name));
                self.w.close();
                self.w
                    .open("if wire_type != wire::WireType::LengthDelimited");
                self.w.line(format!(
                    "wire::check_wire_type(wire::WireType::{:?}, wire_type)?;",
                    element_wire
                ));
                self.w.close();
                self.w
                    .line("wire::skip_field_at(buf, next, tag, wire_type)?");
                self.w.close();
            }
            Access::Elements { field } => {
                self.w.open(format!("{} =>", field.number));
                self.w
                    .line("wire::check_wire_type(wire::WireType::LengthDelimited, wire_type)?;");
                self.w.open(format!("if reader.{}_head == usize::MAX", name));
                self.w.line(format!("reader.{}_head = pos;", name));
                self.w.close();
                self.w
                    .line("let range = wire::read_len_prefixed_at(buf, next)?;");
                self.w.line("let end = range.end;");
                if matches!(field.typ, FieldType::String) {
                    self.w.line(
                        "core::str::from_utf8(&buf[range]).map_err(|_| \
                         DecodeError::new(\"string field contains invalid UTF-8\"))?;",
                    );
                }
                self.w.line("end");
                self.w.close();
            }
            Access::Map { map } => {
                self.w.open(format!("{} =>", map.number));
                self.w
                    .line("wire::check_wire_type(wire::WireType::LengthDelimited, wire_type)?;");
                self.w.open(format!("if reader.{}_head == usize::MAX", name));
                self.w.line(format!("reader.{}_head = pos;", name));
                self.w.close();
                self.w
                    .line("let range = wire::read_len_prefixed_at(buf, next)?;");
                self.w.line("range.end");
                self.w.close();
            }
        }
    }

    /// Scan body for a scalar value: wire check, decode, store, yield the
    /// next offset.
    fn append_scan_store(
        &mut self,
        typ: &FieldType,
        name: &str,
        optional: bool,
        siblings: &[String],
    ) {
        let ident = escape_keyword(name);
        let store = |value: &str| {
            if optional {
                format!("reader.{} = Some({});", ident, value)
            } else {
                format!("reader.{} = {};", ident, value)
            }
        };

        for sibling in siblings {
            self.w
                .line(format!("reader.{} = None;", escape_keyword(sibling)));
        }
        match self.wire_type_of(typ) {
            WireType::Varint => {
                self.w
                    .line("wire::check_wire_type(wire::WireType::Varint, wire_type)?;");
                self.w
                    .line("let (value, end) = wire::read_varint_at(buf, next)?;");
                self.w.line(store(Self::varint_cast(typ)));
                self.w.line("end");
            }
            WireType::ThirtyTwoBit => {
                self.w
                    .line("wire::check_wire_type(wire::WireType::ThirtyTwoBit, wire_type)?;");
                self.w
                    .line("let (value, end) = wire::read_fixed32_at(buf, next)?;");
                self.w.line(store(Self::fixed32_cast(typ)));
                self.w.line("end");
            }
            WireType::SixtyFourBit => {
                self.w
                    .line("wire::check_wire_type(wire::WireType::SixtyFourBit, wire_type)?;");
                self.w
                    .line("let (value, end) = wire::read_fixed64_at(buf, next)?;");
                self.w.line(store(Self::fixed64_cast(typ)));
                self.w.line("end");
            }
            WireType::LengthDelimited => {
                self.w
                    .line("wire::check_wire_type(wire::WireType::LengthDelimited, wire_type)?;");
                self.w
                    .line("let range = wire::read_len_prefixed_at(buf, next)?;");
                self.w.line("let end = range.end;");
                let value = match typ {
                    FieldType::String => "core::str::from_utf8(&buf[range]).map_err(|_| \
                                          DecodeError::new(\"string field contains invalid UTF-8\"))?",
                    _ => "&buf[range]",
                };
                self.w.line(store(value));
                self.w.line("end");
            }
            other => unreachable!("fields never use wire type {:?}", other),
        }
    }

    /// Scan body recording a length-delimited payload slice into an
    /// `Option` slot.
    fn append_scan_slice(&mut self, name: &str, siblings: &[String]) {
        for sibling in siblings {
            self.w
                .line(format!("reader.{} = None;", escape_keyword(sibling)));
        }
        self.w
            .line("wire::check_wire_type(wire::WireType::LengthDelimited, wire_type)?;");
        self.w
            .line("let range = wire::read_len_prefixed_at(buf, next)?;");
        self.w.line("let end = range.end;");
        self.w.line(format!(
            "reader.{} = Some(&buf[range]);",
            escape_keyword(name)
        ));
        self.w.line("end");
    }

    // Accessors ----------------------------------------------------------

    fn append_accessors(&mut self, name: &str, access: &Access) {
        match access {
            Access::Plain { field } => self.append_plain_getter(name, field),
            Access::Tracked { field } => self.append_tracked_getter(name, field),
            Access::Lazy { field } => self.append_lazy_getter(name, field),
            Access::Member { field } => self.append_member_getter(name, field),
            Access::Packed { field } => self.append_packed_iter(name, field),
            Access::Elements { field } => self.append_elements_iter(name, field),
            Access::Map { map } => self.append_map_iter(name, map),
        }
    }

    fn append_plain_getter(&mut self, name: &str, field: &NormalField) {
        let ident = escape_keyword(name);
        match &field.typ {
            FieldType::Named(named) if Self::is_enum(named) => {
                let path = self.type_path(named);
                self.w
                    .open(format!("pub fn get_{}(&self) -> {}", name, path));
                self.w.line(format!("{}::from_wire(self.{})", path, ident));
                self.w.close();
            }
            typ => {
                let ty = self.reader_value_type(typ);
                self.w.open(format!("pub fn get_{}(&self) -> {}", name, ty));
                self.w.line(format!("self.{}", ident));
                self.w.close();
            }
        }
        self.w.blank();
    }

    /// The unset-value expression for a tracked field: the declared
    /// `default` when present, the type's zero otherwise.
    fn default_literal(&self, field: &NormalField) -> String {
        let declared = field.default_value();
        match &field.typ {
            FieldType::Float | FieldType::Double => match declared {
                Some(OptionValue::Float(value)) => format!("{:?}", value),
                Some(OptionValue::Int(value)) => format!("{}.0", value),
                _ => "0.0".to_string(),
            },
            FieldType::Bool => match declared {
                Some(OptionValue::Bool(value)) => value.to_string(),
                _ => "false".to_string(),
            },
            FieldType::String => match declared {
                Some(OptionValue::String(value)) => format!("{:?}", value),
                _ => "\"\"".to_string(),
            },
            FieldType::Bytes => match declared {
                Some(OptionValue::String(value)) => format!("{:?}.as_bytes()", value),
                _ => "b\"\"".to_string(),
            },
            FieldType::Named(named) => {
                // Enum defaults render through `from_wire`, so variant
                // naming never matters here.
                let number = match declared {
                    Some(OptionValue::Ident(ident)) => {
                        self.enum_value_number(named, ident).unwrap_or(0)
                    }
                    _ => 0,
                };
                number.to_string()
            }
            _ => match declared {
                Some(OptionValue::Int(value)) => value.to_string(),
                Some(OptionValue::Uint(value)) => value.to_string(),
                _ => "0".to_string(),
            },
        }
    }

    /// Looks up a declared enum value number by name.
    fn enum_value_number(&self, named: &NamedType, ident: &str) -> Option<i32> {
        let type_ref = named.type_ref();
        let decl = self.set.files[type_ref.file].enum_by_fq(&type_ref.fq_name)?;
        decl.values
            .iter()
            .find(|value| value.name == ident)
            .map(|value| value.number)
    }

    fn append_tracked_getter(&mut self, name: &str, field: &NormalField) {
        let ident = escape_keyword(name);
        match &field.typ {
            FieldType::Named(named) if Self::is_enum(named) => {
                let path = self.type_path(named);
                let default = self.default_literal(field);
                self.w
                    .open(format!("pub fn get_{}(&self) -> {}", name, path));
                self.w.line(format!(
                    "{}::from_wire(self.{}.unwrap_or({}))",
                    path, ident, default
                ));
                self.w.close();
            }
            typ => {
                let ty = self.reader_value_type(typ);
                let default = self.default_literal(field);
                self.w.open(format!("pub fn get_{}(&self) -> {}", name, ty));
                self.w.line(format!("self.{}.unwrap_or({})", ident, default));
                self.w.close();
            }
        }
        self.w.blank();
        self.w.open(format!("pub fn has_{}(&self) -> bool", name));
        self.w.line(format!("self.{}.is_some()", ident));
        self.w.close();
        self.w.blank();
    }

    fn append_lazy_getter(&mut self, name: &str, field: &NormalField) {
        let named = match &field.typ {
            FieldType::Named(named) => named,
            other => unreachable!("lazy field with type {:?}", other),
        };
        let reader = self.reader_path(named);
        let ident = escape_keyword(name);
        self.w
            .doc("Builds the nested reader on demand; an absent field reads as empty.");
        self.w.open(format!(
            "pub fn get_{}(&self) -> Result<{}<'a>, DecodeError>",
            name, reader
        ));
        self.w
            .line(format!("{}::new(self.{}.unwrap_or_default())", reader, ident));
        self.w.close();
        self.w.blank();
        self.w.open(format!("pub fn has_{}(&self) -> bool", name));
        self.w.line(format!("self.{}.is_some()", ident));
        self.w.close();
        self.w.blank();
    }

    fn append_member_getter(&mut self, name: &str, field: &NormalField) {
        let ident = escape_keyword(name);
        match &field.typ {
            FieldType::Named(named) if !Self::is_enum(named) => {
                let reader = self.reader_path(named);
                self.w.open(format!(
                    "pub fn get_{}(&self) -> Result<Option<{}<'a>>, DecodeError>",
                    name, reader
                ));
                self.w.open(format!("match self.{}", ident));
                self.w
                    .line(format!("Some(bytes) => {}::new(bytes).map(Some),", reader));
                self.w.line("None => Ok(None),");
                self.w.close();
                self.w.close();
            }
            FieldType::Named(named) => {
                let path = self.type_path(named);
                self.w
                    .open(format!("pub fn get_{}(&self) -> Option<{}>", name, path));
                self.w
                    .line(format!("self.{}.map({}::from_wire)", ident, path));
                self.w.close();
            }
            typ => {
                let ty = self.reader_value_type(typ);
                self.w
                    .open(format!("pub fn get_{}(&self) -> Option<{}>", name, ty));
                self.w.line(format!("self.{}", ident));
                self.w.close();
            }
        }
        self.w.blank();
    }

    /// Element decode for packed-capable repeated fields: the read call and
    /// the expression turning a raw `value` into the element type.
    fn element_read(&self, typ: &FieldType) -> (&'static str, String) {
        match self.wire_type_of(typ) {
            WireType::Varint => {
                let cast = match typ {
                    FieldType::Named(named) => {
                        format!("{}::from_wire(value as i32)", self.type_path(named))
                    }
                    other => Self::varint_cast(other).to_string(),
                };
                ("wire::read_varint_at", cast)
            }
            WireType::ThirtyTwoBit => ("wire::read_fixed32_at", Self::fixed32_cast(typ).to_string()),
            WireType::SixtyFourBit => ("wire::read_fixed64_at", Self::fixed64_cast(typ).to_string()),
            other => unreachable!("packed elements never use {:?}", other),
        }
    }

    fn element_type(&self, typ: &FieldType) -> String {
        match typ {
            FieldType::Named(named) => self.type_path(named),
            other => self.reader_value_type(other),
        }
    }

    fn append_packed_iter(&mut self, name: &str, field: &NormalField) {
        let (read_call, cast) = self.element_read(&field.typ);
        let element = self.element_type(&field.typ);

        self.w.doc(
            "Yields the next element, walking packed runs and single\n\
             occurrences alike; `None` once the field is exhausted.",
        );
        self.w.open(format!(
            "pub fn {}_next(&mut self) -> Option<{}>",
            name, element
        ));
        self.w.line("let buf = self.buf;");
        self.w.open("loop");

        self.w
            .open(format!("if self.{}_run_pos < self.{}_run_end", name, name));
        self.w.line(format!(
            "let (value, end) = {}(buf, self.{}_run_pos).ok()?;",
            read_call, name
        ));
        self.w.line(format!("self.{}_run_pos = end;", name));
        self.w.line(format!("return Some({});", cast));
        self.w.close();

        self.w.open(format!("if self.{}_at >= buf.len()", name));
        self.w.line("return None;");
        self.w.close();

        self.w.line(format!(
            "let (tag, wire_type, next) = wire::read_key_at(buf, self.{}_at).ok()?;",
            name
        ));
        self.w.open(format!("if tag != {}", field.number));
        self.w.line(format!(
            "self.{}_at = wire::skip_field_at(buf, next, tag, wire_type).ok()?;",
            name
        ));
        self.w.line("continue;");
        self.w.close();
        self.w
            .open("if wire_type == wire::WireType::LengthDelimited");
        self.w
            .line("let range = wire::read_len_prefixed_at(buf, next).ok()?;");
        self.w.line(format!("self.{}_at = range.end;", name));
        self.w.line(format!("self.{}_run_pos = range.start;", name));
        self.w.line(format!("self.{}_run_end = range.end;", name));
        self.w.open_else();
        self.w
            .line(format!("let (value, end) = {}(buf, next).ok()?;", read_call));
        self.w.line(format!("self.{}_at = end;", name));
        self.w.line(format!("return Some({});", cast));
        self.w.close();

        self.w.close();
        self.w.close();
        self.w.blank();

        self.append_packed_count(name, field);
        self.append_rewind(name, true);
    }

    fn append_packed_count(&mut self, name: &str, field: &NormalField) {
        let fixed_width = match self.wire_type_of(&field.typ) {
            WireType::ThirtyTwoBit => Some(4),
            WireType::SixtyFourBit => Some(8),
            _ => None,
        };

        self.w.doc("Walks the field without advancing the cursor.");
        self.w.open(format!("pub fn {}_count(&self) -> usize", name));
        self.w.line("let buf = self.buf;");
        self.w.line("let mut count = 0;");
        self.w.line(format!("let mut pos = self.{}_head;", name));
        self.w.open("while pos < buf.len()");
        self.w
            .open("let (tag, wire_type, next) = match wire::read_key_at(buf, pos)");
        self.w.line("Ok(key) => key,");
        self.w.line("Err(_) => break,");
        self.w.close_with("};");
        self.w
            .open("let skipped = match wire::skip_field_at(buf, next, tag, wire_type)");
        self.w.line("Ok(skipped) => skipped,");
        self.w.line("Err(_) => break,");
        self.w.close_with("};");
        self.w.open(format!("if tag == {}", field.number));
        self.w
            .open("if wire_type == wire::WireType::LengthDelimited");
        match fixed_width {
            Some(width) => {
                self.w.open("if let Ok(range) = wire::read_len_prefixed_at(buf, next)");
                self.w.line(format!("count += range.len() / {};", width));
                self.w.close();
            }
            None => {
                self.w
                    .open("if let Ok(range) = wire::read_len_prefixed_at(buf, next)");
                self.w.line("let mut at = range.start;");
                self.w.open("while at < range.end");
                self.w.open("match wire::read_varint_at(buf, at)");
                self.w.open("Ok((_, end)) =>");
                self.w.line("count += 1;");
                self.w.line("at = end;");
                self.w.close();
                self.w.line("Err(_) => break,");
                self.w.close();
                self.w.close();
                self.w.close();
            }
        }
        self.w.open_else();
        self.w.line("count += 1;");
        self.w.close();
        self.w.close();
        self.w.line("pos = skipped;");
        self.w.close();
        self.w.line("count");
        self.w.close();
        self.w.blank();
    }

    fn append_elements_iter(&mut self, name: &str, field: &NormalField) {
        let (ret, yield_line): (String, String) = match &field.typ {
            FieldType::String => (
                "Option<&'a str>".to_string(),
                "return core::str::from_utf8(&buf[range]).ok();".to_string(),
            ),
            FieldType::Bytes => (
                "Option<&'a [u8]>".to_string(),
                "return Some(&buf[range]);".to_string(),
            ),
            FieldType::Named(named) => {
                let reader = self.reader_path(named);
                (
                    format!("Option<Result<{}<'a>, DecodeError>>", reader),
                    format!("return Some({}::new(&buf[range]));", reader),
                )
            }
            other => unreachable!("{:?} elements are packed-capable", other),
        };

        self.w
            .doc("Yields the next occurrence; `None` once the field is exhausted.");
        self.w
            .open(format!("pub fn {}_next(&mut self) -> {}", name, ret));
        self.w.line("let buf = self.buf;");
        self.w.open(format!("while self.{}_at < buf.len()", name));
        self.w.line(format!(
            "let (tag, wire_type, next) = wire::read_key_at(buf, self.{}_at).ok()?;",
            name
        ));
        self.w.open(format!(
            "if tag == {} && wire_type == wire::WireType::LengthDelimited",
            field.number
        ));
        self.w
            .line("let range = wire::read_len_prefixed_at(buf, next).ok()?;");
        self.w.line(format!("self.{}_at = range.end;", name));
        self.w.line(yield_line);
        self.w.close();
        self.w.line(format!(
            "self.{}_at = wire::skip_field_at(buf, next, tag, wire_type).ok()?;",
            name
        ));
        self.w.close();
        self.w.line("None");
        self.w.close();
        self.w.blank();

        self.append_elements_count(name, field.number);
        self.append_rewind(name, false);
    }

    fn append_elements_count(&mut self, name: &str, number: i32) {
        self.w.doc("Walks the field without advancing the cursor.");
        self.w.open(format!("pub fn {}_count(&self) -> usize", name));
        self.w.line("let buf = self.buf;");
        self.w.line("let mut count = 0;");
        self.w.line(format!("let mut pos = self.{}_head;", name));
        self.w.open("while pos < buf.len()");
        self.w
            .open("let (tag, wire_type, next) = match wire::read_key_at(buf, pos)");
        self.w.line("Ok(key) => key,");
        self.w.line("Err(_) => break,");
        self.w.close_with("};");
        self.w.open(format!("if tag == {}", number));
        self.w.line("count += 1;");
        self.w.close();
        self.w
            .open("pos = match wire::skip_field_at(buf, next, tag, wire_type)");
        self.w.line("Ok(pos) => pos,");
        self.w.line("Err(_) => break,");
        self.w.close_with("};");
        self.w.close();
        self.w.line("count");
        self.w.close();
        self.w.blank();
    }

    fn append_rewind(&mut self, name: &str, packed: bool) {
        self.w.doc("Re-seeks the cursor to the first occurrence.");
        self.w.open(format!("pub fn {}_rewind(&mut self)", name));
        self.w.line(format!("self.{}_at = self.{}_head;", name, name));
        if packed {
            self.w.line(format!("self.{}_run_pos = 0;", name));
            self.w.line(format!("self.{}_run_end = 0;", name));
        }
        self.w.close();
        self.w.blank();
    }

    fn append_map_iter(&mut self, name: &str, map: &MapField) {
        let key_ty = match &map.key_type {
            FieldType::String => "&'a str".to_string(),
            other => self.reader_value_type(other),
        };
        let key_init = match &map.key_type {
            FieldType::String => "\"\"",
            other => Self::reader_zero(other),
        };
        let (value_ty, value_decl_ty, value_init, value_return) = match &map.value_type {
            FieldType::Named(named) if !Self::is_enum(named) => {
                let reader = self.reader_path(named);
                (
                    format!("{}<'a>", reader),
                    "&'a [u8]".to_string(),
                    "b\"\"",
                    format!(
                        "return {}::new(value).ok().map(|value| (key, value));",
                        reader
                    ),
                )
            }
            FieldType::Named(named) => {
                let path = self.type_path(named);
                (
                    path.clone(),
                    "i32".to_string(),
                    "0",
                    format!("return Some((key, {}::from_wire(value)));", path),
                )
            }
            other => (
                self.reader_value_type(other),
                self.reader_value_type(other),
                Self::reader_zero(other),
                "return Some((key, value));".to_string(),
            ),
        };

        self.w.doc(
            "Yields the next map entry. Missing entry components read as\n\
             their type's default, per the wire contract for maps.",
        );
        self.w.open(format!(
            "pub fn next_{}(&mut self) -> Option<({}, {})>",
            name, key_ty, value_ty
        ));
        self.w.line("let buf = self.buf;");
        self.w.open(format!("while self.{}_at < buf.len()", name));
        self.w.line(format!(
            "let (tag, wire_type, next) = wire::read_key_at(buf, self.{}_at).ok()?;",
            name
        ));
        self.w.open(format!(
            "if tag == {} && wire_type == wire::WireType::LengthDelimited",
            map.number
        ));
        self.w
            .line("let range = wire::read_len_prefixed_at(buf, next).ok()?;");
        self.w.line(format!("self.{}_at = range.end;", name));
        self.w.line("let entry = &buf[range];");
        self.w
            .line(format!("let mut key: {} = {};", key_ty, key_init));
        self.w.line(format!(
            "let mut value: {} = {};",
            value_decl_ty, value_init
        ));
        self.w.line("let mut at = 0;");
        self.w.open("while at < entry.len()");
        self.w
            .line("let (tag, wire_type, next) = wire::read_key_at(entry, at).ok()?;");
        self.w.open("at = match tag");
        self.w.open("1 =>");
        self.append_entry_decode(&map.key_type, "key");
        self.w.close();
        self.w.open("2 =>");
        match &map.value_type {
            FieldType::Named(named) if !Self::is_enum(named) => {
                self.w
                    .line("let range = wire::read_len_prefixed_at(entry, next).ok()?;");
                self.w.line("let end = range.end;");
                self.w.line("value = &entry[range];");
                self.w.line("end");
            }
            typ => self.append_entry_decode(typ, "value"),
        }
        self.w.close();
        self.w
            .line("_ => wire::skip_field_at(entry, next, tag, wire_type).ok()?,");
        self.w.close_with("};");
        self.w.close();
        self.w.line(value_return);
        self.w.close();
        self.w.line(format!(
            "self.{}_at = wire::skip_field_at(buf, next, tag, wire_type).ok()?;",
            name
        ));
        self.w.close();
        self.w.line("None");
        self.w.close();
        self.w.blank();

        self.append_elements_count(name, map.number);
        self.append_rewind(name, false);
    }

    /// Decode of one map-entry component into the local named `target`.
    fn append_entry_decode(&mut self, typ: &FieldType, target: &str) {
        match self.wire_type_of(typ) {
            WireType::Varint => {
                self.w
                    .line("let (raw, end) = wire::read_varint_at(entry, next).ok()?;");
                let cast = match typ {
                    FieldType::Named(_) => "raw as i32".to_string(),
                    other => Self::varint_cast(other).replace("value", "raw"),
                };
                self.w.line(format!("{} = {};", target, cast));
                self.w.line("end");
            }
            WireType::ThirtyTwoBit => {
                self.w
                    .line("let (raw, end) = wire::read_fixed32_at(entry, next).ok()?;");
                self.w.line(format!(
                    "{} = {};",
                    target,
                    Self::fixed32_cast(typ).replace("value", "raw")
                ));
                self.w.line("end");
            }
            WireType::SixtyFourBit => {
                self.w
                    .line("let (raw, end) = wire::read_fixed64_at(entry, next).ok()?;");
                self.w.line(format!(
                    "{} = {};",
                    target,
                    Self::fixed64_cast(typ).replace("value", "raw")
                ));
                self.w.line("end");
            }
            WireType::LengthDelimited => {
                self.w
                    .line("let range = wire::read_len_prefixed_at(entry, next).ok()?;");
                self.w.line("let end = range.end;");
                match typ {
                    FieldType::String => self.w.line(format!(
                        "{} = core::str::from_utf8(&entry[range]).ok()?;",
                        target
                    )),
                    _ => self.w.line(format!("{} = &entry[range];", target)),
                }
                self.w.line("end");
            }
            other => unreachable!("map components never use {:?}", other),
        }
    }
}
