//! Per-file Rust emission.
//!
//! Every input `.proto` becomes one `.rs` file: `#[path]` modules for the
//! generated files it references, enums, and for each message a
//! precomputed-tag module, a writer struct whose `calc_size`/`encode_to`
//! walk fields in declaration order with shared size formulas, and a lazy
//! reader over a borrowed slice. Nested types are emitted into a module
//! named after their parent message.

use std::path::Path;

use itertools::Itertools;
use log::debug;
use protowire::encoding::{encode_key, WireType};

use crate::ast::{
    Enum, FieldType, FileId, Label, MapField, Message, MessageField, NamedType, NormalField,
    OneOf, Syntax, TypeKind,
};
use crate::code_writer::CodeWriter;
use crate::ident::{to_snake, to_snake_raw, to_upper_camel, NameSet};
use crate::message_graph::MessageGraph;
use crate::names::{render_path, Names};
use crate::path::{output_rel_path, relative_import};
use crate::resolver::{path_key, FileSet};
use crate::Error;

/// How many times a field may occur and with what presence tracking.
#[derive(Clone, Copy, PartialEq)]
enum Plurality {
    /// proto3 implicit: absent means default, defaults are skipped.
    Singular,
    /// Explicit presence: proto2 `optional` and proto3 `optional`.
    Explicit,
    Required,
    Repeated { packed: bool },
}

fn plurality(field: &NormalField, syntax: Syntax) -> Plurality {
    match field.label {
        Label::Repeated => Plurality::Repeated {
            packed: field.is_packed(syntax),
        },
        Label::Required => Plurality::Required,
        Label::Optional => Plurality::Explicit,
        Label::Singular => Plurality::Singular,
    }
}

/// Generates the Rust source for one file of a resolved set.
pub fn generate_file(
    set: &FileSet,
    names: &Names,
    graph: &MessageGraph,
    file_id: FileId,
) -> Result<String, Error> {
    let file = set.files[file_id].clone();
    debug!("generating {}", file.rel_path.display());

    let mut generator = CodeGenerator {
        set,
        names,
        graph,
        file_id,
        syntax: file.syntax,
        mod_path: Vec::new(),
        w: CodeWriter::new(),
    };

    generator
        .w
        .comment("@generated by protowire-build. Do not edit.");
    generator
        .w
        .comment(format!("Source: {}", path_key(&file.rel_path)));
    generator.w.blank();
    generator.w.line(
        "#![allow(dead_code, unused_imports, unused_mut, unused_variables, deprecated, clippy::all)]",
    );
    generator.w.blank();
    generator.append_uses();

    let out_rel = output_rel_path(&file.rel_path);
    let from_dir = out_rel.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
    for (target, alias) in names.aliases(file_id) {
        let to_file = output_rel_path(&set.files[*target].rel_path);
        let import = relative_import(&from_dir, &to_file)?;
        generator
            .w
            .line(format!("#[path = {:?}]", path_key(&import)));
        generator.w.line(format!("pub mod {};", alias));
        generator.w.blank();
    }

    for decl in file.enums {
        generator.append_enum(&decl);
    }
    for message in file.messages {
        generator.append_message(&message);
    }
    Ok(generator.w.into_string())
}

struct CodeGenerator<'a> {
    set: &'a FileSet,
    names: &'a Names,
    graph: &'a MessageGraph,
    file_id: FileId,
    syntax: Syntax,
    /// Module chain from the generated file root to the current scope.
    mod_path: Vec<String>,
    w: CodeWriter,
}

impl<'a> CodeGenerator<'a> {
    fn append_uses(&mut self) {
        self.w.line("use protowire::bytes::BufMut;");
        self.w.line("use protowire::encoding as wire;");
        self.w
            .line("use protowire::{DecodeError, WireMessage, WireReader};");
        self.w.blank();
    }

    // Type plumbing ------------------------------------------------------

    /// The Rust path of a resolved type, as seen from the current module.
    fn type_path(&self, named: &NamedType) -> String {
        let type_ref = named.type_ref();
        let target = self.names.of(type_ref.file, &type_ref.fq_name);
        let alias = if type_ref.file == self.file_id {
            None
        } else {
            Some(
                self.names
                    .alias_for(self.file_id, type_ref.file)
                    .expect("referenced file has an alias"),
            )
        };
        render_path(&self.mod_path, alias, &target.mods, &target.name)
    }

    /// The Rust path of a resolved message's reader type.
    fn reader_path(&self, named: &NamedType) -> String {
        let type_ref = named.type_ref();
        let target = self.names.of(type_ref.file, &type_ref.fq_name);
        let alias = if type_ref.file == self.file_id {
            None
        } else {
            Some(
                self.names
                    .alias_for(self.file_id, type_ref.file)
                    .expect("referenced file has an alias"),
            )
        };
        render_path(&self.mod_path, alias, &target.mods, &target.reader)
    }

    fn is_enum(named: &NamedType) -> bool {
        named.type_ref().kind == TypeKind::Enum
    }

    /// Whether a singular field of this message type must be boxed to keep
    /// the writer struct finite.
    fn must_box(&self, container_fq: &str, named: &NamedType) -> bool {
        let type_ref = named.type_ref();
        type_ref.kind == TypeKind::Message
            && self.graph.must_box(
                (self.file_id, container_fq),
                (type_ref.file, &type_ref.fq_name),
            )
    }

    /// Owned Rust type of one field value in writer position.
    fn writer_element_type(&self, typ: &FieldType) -> String {
        match typ {
            FieldType::Int32 | FieldType::Sint32 | FieldType::Sfixed32 => "i32".to_string(),
            FieldType::Int64 | FieldType::Sint64 | FieldType::Sfixed64 => "i64".to_string(),
            FieldType::Uint32 | FieldType::Fixed32 => "u32".to_string(),
            FieldType::Uint64 | FieldType::Fixed64 => "u64".to_string(),
            FieldType::Float => "f32".to_string(),
            FieldType::Double => "f64".to_string(),
            FieldType::Bool => "bool".to_string(),
            FieldType::String => "String".to_string(),
            FieldType::Bytes => "Vec<u8>".to_string(),
            FieldType::Named(named) => self.type_path(named),
        }
    }

    fn wire_type_of(&self, typ: &FieldType) -> WireType {
        match typ {
            FieldType::Int32
            | FieldType::Int64
            | FieldType::Uint32
            | FieldType::Uint64
            | FieldType::Sint32
            | FieldType::Sint64
            | FieldType::Bool => WireType::Varint,
            FieldType::Fixed32 | FieldType::Sfixed32 | FieldType::Float => WireType::ThirtyTwoBit,
            FieldType::Fixed64 | FieldType::Sfixed64 | FieldType::Double => WireType::SixtyFourBit,
            FieldType::String | FieldType::Bytes => WireType::LengthDelimited,
            FieldType::Named(named) => {
                if Self::is_enum(named) {
                    WireType::Varint
                } else {
                    WireType::LengthDelimited
                }
            }
        }
    }

    fn tag_literal(number: i32, wire_type: WireType) -> (String, usize) {
        let mut bytes = Vec::new();
        encode_key(number as u32, wire_type, &mut bytes);
        let len = bytes.len();
        let literal = format!("&[{}]", bytes.iter().map(|byte| byte.to_string()).join(", "));
        (literal, len)
    }

    /// Payload size expression. `expr` is the value itself for numeric and
    /// bool types, and a place expression (auto-ref/deref applies) for
    /// length-delimited types and enums.
    fn payload_size_expr(&self, typ: &FieldType, expr: &str) -> String {
        match typ {
            FieldType::Int32 => format!("wire::sizeof_int32({})", expr),
            FieldType::Int64 => format!("wire::sizeof_int64({})", expr),
            FieldType::Uint32 => format!("wire::sizeof_uint32({})", expr),
            FieldType::Uint64 => format!("wire::sizeof_uint64({})", expr),
            FieldType::Sint32 => format!("wire::sizeof_sint32({})", expr),
            FieldType::Sint64 => format!("wire::sizeof_sint64({})", expr),
            FieldType::Fixed32 | FieldType::Sfixed32 | FieldType::Float => "4".to_string(),
            FieldType::Fixed64 | FieldType::Sfixed64 | FieldType::Double => "8".to_string(),
            FieldType::Bool => "1".to_string(),
            FieldType::String | FieldType::Bytes => {
                format!("wire::sizeof_len_prefixed({}.len())", expr)
            }
            FieldType::Named(named) => {
                if Self::is_enum(named) {
                    format!("wire::sizeof_int32({}.value())", expr)
                } else {
                    format!("wire::sizeof_len_prefixed({}.calc_size())", expr)
                }
            }
        }
    }

    /// Emits the payload write for one value; same `expr` conventions as
    /// [`payload_size_expr`](Self::payload_size_expr).
    fn append_payload_encode(&mut self, typ: &FieldType, expr: &str) {
        match typ {
            FieldType::Int32 => self.w.line(format!("wire::encode_int32({}, buf);", expr)),
            FieldType::Int64 => self.w.line(format!("wire::encode_int64({}, buf);", expr)),
            FieldType::Uint32 => self.w.line(format!("wire::encode_uint32({}, buf);", expr)),
            FieldType::Uint64 => self.w.line(format!("wire::encode_uint64({}, buf);", expr)),
            FieldType::Sint32 => self.w.line(format!("wire::encode_sint32({}, buf);", expr)),
            FieldType::Sint64 => self.w.line(format!("wire::encode_sint64({}, buf);", expr)),
            FieldType::Fixed32 => self.w.line(format!("buf.put_u32_le({});", expr)),
            FieldType::Sfixed32 => self.w.line(format!("buf.put_i32_le({});", expr)),
            FieldType::Float => self.w.line(format!("buf.put_f32_le({});", expr)),
            FieldType::Fixed64 => self.w.line(format!("buf.put_u64_le({});", expr)),
            FieldType::Sfixed64 => self.w.line(format!("buf.put_i64_le({});", expr)),
            FieldType::Double => self.w.line(format!("buf.put_f64_le({});", expr)),
            FieldType::Bool => self.w.line(format!("wire::encode_bool({}, buf);", expr)),
            FieldType::String => {
                self.w
                    .line(format!("wire::encode_varint({}.len() as u64, buf);", expr));
                self.w.line(format!("buf.put_slice({}.as_bytes());", expr));
            }
            FieldType::Bytes => {
                self.w
                    .line(format!("wire::encode_varint({}.len() as u64, buf);", expr));
                self.w.line(format!("buf.put_slice(&{});", expr));
            }
            FieldType::Named(named) => {
                if Self::is_enum(named) {
                    self.w
                        .line(format!("wire::encode_int32({}.value(), buf);", expr));
                } else {
                    self.w.line(format!(
                        "wire::encode_varint({}.calc_size() as u64, buf);",
                        expr
                    ));
                    self.w.line(format!("{}.encode_to(buf);", expr));
                }
            }
        }
    }

    /// The emptiness / default test guarding a proto3 implicit field.
    fn singular_guard(&self, typ: &FieldType, expr: &str) -> String {
        match typ {
            FieldType::Float | FieldType::Double => format!("{} != 0.0", expr),
            FieldType::Bool => expr.to_string(),
            FieldType::String | FieldType::Bytes => format!("!{}.is_empty()", expr),
            FieldType::Named(named) if Self::is_enum(named) => {
                format!("{}.value() != 0", expr)
            }
            FieldType::Named(_) => unreachable!("message fields always track presence"),
            _ => format!("{} != 0", expr),
        }
    }

    // Enums --------------------------------------------------------------

    fn append_enum(&mut self, decl: &Enum) {
        let enum_name = self.names.of(self.file_id, &decl.fq_name).name.clone();

        // First name per number becomes the variant; later names become
        // associated constants. A zero entry is synthesized when missing.
        let mut variant_names = NameSet::new();
        let mut variants: Vec<(String, i32)> = Vec::new();
        let mut aliases: Vec<(String, String)> = Vec::new();
        if !decl.values.iter().any(|value| value.number == 0) {
            variants.push((variant_names.claim("Unknown"), 0));
        }
        for value in &decl.values {
            let rust_name = variant_names.claim(&to_upper_camel(&value.name));
            match variants.iter().find(|(_, number)| *number == value.number) {
                Some((canonical, _)) => aliases.push((rust_name, canonical.clone())),
                None => variants.push((rust_name, value.number)),
            }
        }
        let zero_name = variants
            .iter()
            .find(|(_, number)| *number == 0)
            .map(|(name, _)| name.clone())
            .expect("a zero entry always exists");

        self.w
            .doc(format!("`{}` from the schema.", decl.fq_name));
        self.w
            .line("#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]");
        self.w.line("#[repr(i32)]");
        self.w.open(format!("pub enum {}", enum_name));
        for (name, number) in &variants {
            if name == &zero_name {
                self.w.line("#[default]");
            }
            self.w.line(format!("{} = {},", name, number));
        }
        self.w.close();
        self.w.blank();

        self.w.open(format!("impl {}", enum_name));
        for (alias, canonical) in &aliases {
            self.w.line(format!(
                "pub const {}: {} = {}::{};",
                to_snake_raw(alias).to_uppercase(),
                enum_name,
                enum_name,
                canonical
            ));
        }
        if !aliases.is_empty() {
            self.w.blank();
        }
        self.w.doc("The declared wire value.");
        self.w.open("pub fn value(self) -> i32");
        self.w.line("self as i32");
        self.w.close();
        self.w.blank();
        self.w
            .doc("Maps a wire value to the enum; unknown values fall back to the zero entry.");
        self.w
            .open(format!("pub fn from_wire(value: i32) -> {}", enum_name));
        self.w.open("match value");
        for (name, number) in &variants {
            if *number != 0 {
                self.w
                    .line(format!("{} => {}::{},", number, enum_name, name));
            }
        }
        self.w.line(format!("_ => {}::{},", enum_name, zero_name));
        self.w.close();
        self.w.close();
        self.w.close();
        self.w.blank();
    }

    // Messages -----------------------------------------------------------

    fn append_message(&mut self, message: &Message) {
        debug!("message {}", message.fq_name);
        self.append_wire_mod(message);
        self.append_writer(message);
        self.append_reader(message);

        let child_mod = self
            .names
            .of(self.file_id, &message.fq_name)
            .child_mod
            .clone();
        if !child_mod.is_empty() {
            self.w
                .doc(format!("Nested types of `{}`.", message.fq_name));
            self.w.open(format!("pub mod {}", child_mod));
            self.mod_path.push(child_mod);
            self.append_uses();

            for decl in &message.enums {
                self.append_enum(decl);
            }
            for nested in &message.messages {
                self.append_message(nested);
            }
            for field in &message.fields {
                if let MessageField::OneOf(oneof) = field {
                    self.append_oneof_enum(message, oneof);
                }
            }

            self.mod_path.pop();
            self.w.close();
            self.w.blank();
        }
    }

    /// Variant names of a oneof, in declaration order. Deterministic, so
    /// every emission site agrees.
    fn oneof_variants(oneof: &OneOf) -> Vec<String> {
        let mut names = NameSet::new();
        oneof
            .fields
            .iter()
            .map(|field| names.claim(&to_upper_camel(&field.name)))
            .collect()
    }

    /// Path of a oneof's enum from the message's own scope.
    fn oneof_enum_path(&self, message: &Message, oneof: &OneOf) -> String {
        let msg_names = self.names.of(self.file_id, &message.fq_name);
        let enum_name = msg_names
            .oneofs
            .get(&oneof.name)
            .expect("oneof names are pre-assigned");
        format!("{}::{}", msg_names.child_mod, enum_name)
    }

    fn append_oneof_enum(&mut self, message: &Message, oneof: &OneOf) {
        let enum_name = self
            .names
            .of(self.file_id, &message.fq_name)
            .oneofs
            .get(&oneof.name)
            .expect("oneof names are pre-assigned")
            .clone();
        let variants = Self::oneof_variants(oneof);

        self.w.doc(format!(
            "Values of the `{}` oneof of `{}`.",
            oneof.name, message.fq_name
        ));
        self.w.line("#[derive(Clone, Debug, PartialEq)]");
        self.w.open(format!("pub enum {}", enum_name));
        for (field, variant) in oneof.fields.iter().zip(&variants) {
            let mut element = self.writer_element_type(&field.typ);
            if let FieldType::Named(named) = &field.typ {
                if self.must_box(&message.fq_name, named) {
                    element = format!("Box<{}>", element);
                }
            }
            self.w.line(format!("{}({}),", variant, element));
        }
        self.w.close();
        self.w.blank();
    }

    // Wire constants -----------------------------------------------------

    fn wire_const(field_name: &str) -> String {
        format!("{}_WIRE", to_snake_raw(field_name).to_uppercase())
    }

    fn append_wire_mod(&mut self, message: &Message) {
        let msg_names = self.names.of(self.file_id, &message.fq_name);
        let wire_mod = msg_names.wire_mod.clone();
        let msg_name = msg_names.name.clone();

        self.w
            .doc(format!("Precomputed field keys for `{}`.", msg_name));
        self.w.open(format!("pub mod {}", wire_mod));
        for field in &message.fields {
            match field {
                MessageField::Normal(field) => {
                    let wire_type = match plurality(field, self.syntax) {
                        Plurality::Repeated { packed: true } => WireType::LengthDelimited,
                        _ => self.wire_type_of(&field.typ),
                    };
                    let (literal, _) = Self::tag_literal(field.number, wire_type);
                    self.w.line(format!(
                        "pub const {}: &[u8] = {};",
                        Self::wire_const(&field.name),
                        literal
                    ));
                }
                MessageField::Map(map) => {
                    let (entry, _) = Self::tag_literal(map.number, WireType::LengthDelimited);
                    let (key, _) = Self::tag_literal(1, self.wire_type_of(&map.key_type));
                    let (value, _) = Self::tag_literal(2, self.wire_type_of(&map.value_type));
                    let base = to_snake_raw(&map.name).to_uppercase();
                    self.w
                        .line(format!("pub const {}_WIRE: &[u8] = {};", base, entry));
                    self.w
                        .line(format!("pub const {}_KEY_WIRE: &[u8] = {};", base, key));
                    self.w
                        .line(format!("pub const {}_VALUE_WIRE: &[u8] = {};", base, value));
                }
                MessageField::OneOf(oneof) => {
                    for field in &oneof.fields {
                        let (literal, _) =
                            Self::tag_literal(field.number, self.wire_type_of(&field.typ));
                        self.w.line(format!(
                            "pub const {}: &[u8] = {};",
                            Self::wire_const(&field.name),
                            literal
                        ));
                    }
                }
            }
        }
        self.w.close();
        self.w.blank();
    }

    // Writer -------------------------------------------------------------

    fn writer_field_type(&self, message: &Message, field: &NormalField) -> String {
        let mut element = self.writer_element_type(&field.typ);
        if let FieldType::Named(named) = &field.typ {
            if self.must_box(&message.fq_name, named) {
                element = format!("Box<{}>", element);
            }
        }
        match plurality(field, self.syntax) {
            Plurality::Repeated { .. } => format!("Vec<{}>", element),
            Plurality::Required => element,
            Plurality::Explicit => format!("Option<{}>", element),
            Plurality::Singular => match &field.typ {
                FieldType::Named(named) if !Self::is_enum(named) => {
                    format!("Option<{}>", element)
                }
                _ => element,
            },
        }
    }

    /// Presence is an `Option` wrapper for explicit-presence fields and for
    /// singular message fields.
    fn writer_is_option(&self, field: &NormalField) -> bool {
        match plurality(field, self.syntax) {
            Plurality::Explicit => true,
            Plurality::Singular => {
                matches!(&field.typ, FieldType::Named(named) if !Self::is_enum(named))
            }
            _ => false,
        }
    }

    fn map_key_rust(&self, key_type: &FieldType) -> String {
        match key_type {
            FieldType::String => "String".to_string(),
            other => self.writer_element_type(other),
        }
    }

    fn append_writer(&mut self, message: &Message) {
        let msg_names = self.names.of(self.file_id, &message.fq_name);
        let msg_name = msg_names.name.clone();
        let wire_mod = msg_names.wire_mod.clone();

        self.w.doc(format!(
            "Writer for `{}`. Populate the fields, then call [`encode`](WireMessage::encode) \
             or [`encode_to`](WireMessage::encode_to).",
            message.fq_name
        ));
        self.w
            .line("#[derive(Clone, Debug, Default, PartialEq)]");
        self.w.open(format!("pub struct {}", msg_name));
        for field in &message.fields {
            match field {
                MessageField::Normal(field) => {
                    if field.is_deprecated() {
                        self.w.line("#[deprecated]");
                    }
                    self.w.line(format!(
                        "pub {}: {},",
                        to_snake(&field.name),
                        self.writer_field_type(message, field)
                    ));
                }
                MessageField::Map(map) => {
                    self.w.line(format!(
                        "pub {}: ::std::collections::BTreeMap<{}, {}>,",
                        to_snake(&map.name),
                        self.map_key_rust(&map.key_type),
                        self.writer_element_type(&map.value_type)
                    ));
                }
                MessageField::OneOf(oneof) => {
                    self.w.line(format!(
                        "pub {}: Option<{}>,",
                        to_snake(&oneof.name),
                        self.oneof_enum_path(message, oneof)
                    ));
                }
            }
        }
        self.w.close();
        self.w.blank();

        self.w.open(format!("impl WireMessage for {}", msg_name));

        // calc_size and encode_to walk the same fields in the same order
        // with the same per-field formulas; only the statement kind differs.
        self.w.open("fn calc_size(&self) -> usize");
        self.w.line("let mut size = 0;");
        for field in &message.fields {
            self.append_field_size(message, field);
        }
        self.w.line("size");
        self.w.close();
        self.w.blank();

        self.w.open("fn encode_to(&self, buf: &mut impl BufMut)");
        for field in &message.fields {
            self.append_field_encode(message, field, &wire_mod);
        }
        self.w.close();
        self.w.close();
        self.w.blank();
    }

    fn append_field_size(&mut self, message: &Message, field: &MessageField) {
        match field {
            MessageField::Normal(field) => {
                let snake = to_snake(&field.name);
                let tag_len = Self::tag_literal(field.number, self.wire_type_of(&field.typ)).1;
                match plurality(field, self.syntax) {
                    Plurality::Repeated { packed: true } => {
                        let packed_tag_len =
                            Self::tag_literal(field.number, WireType::LengthDelimited).1;
                        self.w.open(format!("if !self.{}.is_empty()", snake));
                        self.append_packed_len(field, &snake);
                        self.w.line(format!(
                            "size += {} + wire::sizeof_len_prefixed(packed);",
                            packed_tag_len
                        ));
                        self.w.close();
                    }
                    Plurality::Repeated { packed: false } => {
                        self.w.open(format!("for value in &self.{}", snake));
                        let expr = Self::loop_value_expr(&field.typ);
                        self.w.line(format!(
                            "size += {} + {};",
                            tag_len,
                            self.payload_size_expr(&field.typ, expr)
                        ));
                        self.w.close();
                    }
                    Plurality::Required => {
                        let expr = format!("self.{}", snake);
                        self.w.line(format!(
                            "size += {} + {};",
                            tag_len,
                            self.payload_size_expr(&field.typ, &expr)
                        ));
                    }
                    Plurality::Explicit => {
                        self.w
                            .open(format!("if let Some(value) = &self.{}", snake));
                        let expr = Self::loop_value_expr(&field.typ);
                        self.w.line(format!(
                            "size += {} + {};",
                            tag_len,
                            self.payload_size_expr(&field.typ, expr)
                        ));
                        self.w.close();
                    }
                    Plurality::Singular => {
                        if self.writer_is_option(field) {
                            self.w
                                .open(format!("if let Some(value) = &self.{}", snake));
                            let expr = Self::loop_value_expr(&field.typ);
                            self.w.line(format!(
                                "size += {} + {};",
                                tag_len,
                                self.payload_size_expr(&field.typ, expr)
                            ));
                            self.w.close();
                        } else {
                            let expr = format!("self.{}", snake);
                            self.w
                                .open(format!("if {}", self.singular_guard(&field.typ, &expr)));
                            self.w.line(format!(
                                "size += {} + {};",
                                tag_len,
                                self.payload_size_expr(&field.typ, &expr)
                            ));
                            self.w.close();
                        }
                    }
                }
            }
            MessageField::Map(map) => {
                let snake = to_snake(&map.name);
                let entry_tag_len = Self::tag_literal(map.number, WireType::LengthDelimited).1;
                self.w.open(format!("for (key, value) in &self.{}", snake));
                self.append_map_entry_len(map);
                self.w.line(format!(
                    "size += {} + wire::sizeof_len_prefixed(entry);",
                    entry_tag_len
                ));
                self.w.close();
            }
            MessageField::OneOf(oneof) => {
                let snake = to_snake(&oneof.name);
                let enum_path = self.oneof_enum_path(message, oneof);
                let variants = Self::oneof_variants(oneof);
                self.w
                    .open(format!("if let Some(value) = &self.{}", snake));
                self.w.open("match value");
                for (field, variant) in oneof.fields.iter().zip(&variants) {
                    let tag_len = Self::tag_literal(field.number, self.wire_type_of(&field.typ)).1;
                    let expr = Self::loop_value_expr(&field.typ);
                    self.w.line(format!(
                        "{}::{}(value) => size += {} + {},",
                        enum_path,
                        variant,
                        tag_len,
                        self.payload_size_expr(&field.typ, expr)
                    ));
                }
                self.w.close();
                self.w.close();
            }
        }
    }

    /// Value expression for a loop/`if let` binding `value: &T`: numeric and
    /// bool payloads are passed by value, the rest by place.
    fn loop_value_expr(typ: &FieldType) -> &'static str {
        match typ {
            FieldType::String | FieldType::Bytes | FieldType::Named(_) => "value",
            _ => "*value",
        }
    }

    /// Emits `let packed: usize = ...;` for a packed run's payload length.
    fn append_packed_len(&mut self, field: &NormalField, snake: &str) {
        match &field.typ {
            FieldType::Fixed32 | FieldType::Sfixed32 | FieldType::Float => self
                .w
                .line(format!("let packed = self.{}.len() * 4;", snake)),
            FieldType::Fixed64 | FieldType::Sfixed64 | FieldType::Double => self
                .w
                .line(format!("let packed = self.{}.len() * 8;", snake)),
            FieldType::Bool => self.w.line(format!("let packed = self.{}.len();", snake)),
            typ => {
                let element = self.payload_size_expr(typ, Self::loop_value_expr(typ));
                self.w.line(format!(
                    "let packed: usize = self.{}.iter().map(|value| {}).sum();",
                    snake, element
                ));
            }
        }
    }

    /// Emits `let entry = ...;` summing a map entry's key and value parts.
    fn append_map_entry_len(&mut self, map: &MapField) {
        let key_tag_len = Self::tag_literal(1, self.wire_type_of(&map.key_type)).1;
        let value_tag_len = Self::tag_literal(2, self.wire_type_of(&map.value_type)).1;
        let key_expr = match &map.key_type {
            FieldType::String => "key",
            _ => "*key",
        };
        let value_expr = Self::loop_value_expr(&map.value_type);
        self.w.line(format!(
            "let entry = {} + {} + {} + {};",
            key_tag_len,
            self.payload_size_expr(&map.key_type, key_expr),
            value_tag_len,
            self.payload_size_expr(&map.value_type, value_expr)
        ));
    }

    fn append_field_encode(&mut self, message: &Message, field: &MessageField, wire_mod: &str) {
        match field {
            MessageField::Normal(field) => {
                let snake = to_snake(&field.name);
                let tag = format!("{}::{}", wire_mod, Self::wire_const(&field.name));
                match plurality(field, self.syntax) {
                    Plurality::Repeated { packed: true } => {
                        self.w.open(format!("if !self.{}.is_empty()", snake));
                        self.w.line(format!("buf.put_slice({});", tag));
                        self.append_packed_len(field, &snake);
                        self.w
                            .line("wire::encode_varint(packed as u64, buf);");
                        self.w.open(format!("for value in &self.{}", snake));
                        self.append_payload_encode(&field.typ, Self::loop_value_expr(&field.typ));
                        self.w.close();
                        self.w.close();
                    }
                    Plurality::Repeated { packed: false } => {
                        self.w.open(format!("for value in &self.{}", snake));
                        self.w.line(format!("buf.put_slice({});", tag));
                        self.append_payload_encode(&field.typ, Self::loop_value_expr(&field.typ));
                        self.w.close();
                    }
                    Plurality::Required => {
                        self.w.line(format!("buf.put_slice({});", tag));
                        let expr = format!("self.{}", snake);
                        self.append_payload_encode(&field.typ, &expr);
                    }
                    Plurality::Explicit => {
                        self.w
                            .open(format!("if let Some(value) = &self.{}", snake));
                        self.w.line(format!("buf.put_slice({});", tag));
                        self.append_payload_encode(&field.typ, Self::loop_value_expr(&field.typ));
                        self.w.close();
                    }
                    Plurality::Singular => {
                        if self.writer_is_option(field) {
                            self.w
                                .open(format!("if let Some(value) = &self.{}", snake));
                            self.w.line(format!("buf.put_slice({});", tag));
                            self.append_payload_encode(
                                &field.typ,
                                Self::loop_value_expr(&field.typ),
                            );
                            self.w.close();
                        } else {
                            let expr = format!("self.{}", snake);
                            self.w
                                .open(format!("if {}", self.singular_guard(&field.typ, &expr)));
                            self.w.line(format!("buf.put_slice({});", tag));
                            self.append_payload_encode(&field.typ, &expr);
                            self.w.close();
                        }
                    }
                }
            }
            MessageField::Map(map) => {
                let snake = to_snake(&map.name);
                let base = to_snake_raw(&map.name).to_uppercase();
                self.w.open(format!("for (key, value) in &self.{}", snake));
                self.append_map_entry_len(map);
                self.w
                    .line(format!("buf.put_slice({}::{}_WIRE);", wire_mod, base));
                self.w.line("wire::encode_varint(entry as u64, buf);");
                self.w
                    .line(format!("buf.put_slice({}::{}_KEY_WIRE);", wire_mod, base));
                let key_expr = match &map.key_type {
                    FieldType::String => "key",
                    _ => "*key",
                };
                self.append_payload_encode(&map.key_type, key_expr);
                self.w
                    .line(format!("buf.put_slice({}::{}_VALUE_WIRE);", wire_mod, base));
                self.append_payload_encode(&map.value_type, Self::loop_value_expr(&map.value_type));
                self.w.close();
            }
            MessageField::OneOf(oneof) => {
                let snake = to_snake(&oneof.name);
                let enum_path = self.oneof_enum_path(message, oneof);
                let variants = Self::oneof_variants(oneof);
                self.w
                    .open(format!("if let Some(value) = &self.{}", snake));
                self.w.open("match value");
                for (field, variant) in oneof.fields.iter().zip(&variants) {
                    let tag = format!("{}::{}", wire_mod, Self::wire_const(&field.name));
                    self.w
                        .open(format!("{}::{}(value) =>", enum_path, variant));
                    self.w.line(format!("buf.put_slice({});", tag));
                    self.append_payload_encode(&field.typ, Self::loop_value_expr(&field.typ));
                    self.w.close();
                }
                self.w.close();
                self.w.close();
            }
        }
    }
}

mod reader_gen;

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::*;
    use crate::parser::parse_file;

    fn generate(sources: &[(&str, &str)]) -> Vec<String> {
        let files = sources
            .iter()
            .map(|&(rel, src)| {
                let mut file = parse_file(Path::new(rel), src).unwrap();
                file.rel_path = PathBuf::from(rel);
                file
            })
            .collect();
        let mut set = FileSet::new(files);
        set.resolve().unwrap();
        let names = Names::build(&set);
        let graph = MessageGraph::new(&set.files);
        (0..set.files.len())
            .map(|file_id| generate_file(&set, &names, &graph, file_id).unwrap())
            .collect()
    }

    #[test]
    fn emits_wire_consts_writer_and_reader() {
        let out = generate(&[(
            "user.proto",
            r#"syntax = "proto3";
            message User {
                string name = 1;
                uint64 id = 2;
                repeated string tags = 10;
            }"#,
        )]);
        let src = &out[0];

        assert!(src.contains("pub mod user_wire {"));
        assert!(src.contains("pub const NAME_WIRE: &[u8] = &[10];"));
        assert!(src.contains("pub const ID_WIRE: &[u8] = &[16];"));
        // (10 << 3) | 2 == 82.
        assert!(src.contains("pub const TAGS_WIRE: &[u8] = &[82];"));
        assert!(src.contains("pub struct User {"));
        assert!(src.contains("pub name: String,"));
        assert!(src.contains("pub id: u64,"));
        assert!(src.contains("pub tags: Vec<String>,"));
        assert!(src.contains("impl WireMessage for User {"));
        assert!(src.contains("pub struct UserReader<'a> {"));
        assert!(src.contains("pub fn tags_next(&mut self) -> Option<&'a str>"));
        assert!(src.contains("pub fn tags_count(&self) -> usize"));
    }

    #[test]
    fn proto3_scalars_skip_defaults() {
        let out = generate(&[(
            "t.proto",
            "syntax = \"proto3\"; message T { uint32 n = 1; bool b = 2; }",
        )]);
        assert!(out[0].contains("if self.n != 0 {"));
        assert!(out[0].contains("if self.b {"));
    }

    #[test]
    fn packed_fields_use_length_delimited_tags() {
        let out = generate(&[(
            "t.proto",
            "syntax = \"proto3\"; message T { repeated int32 values = 3; }",
        )]);
        let src = &out[0];
        // (3 << 3) | 2 == 26.
        assert!(src.contains("pub const VALUES_WIRE: &[u8] = &[26];"));
        assert!(src.contains("let packed: usize = self.values.iter()"));
    }

    #[test]
    fn proto2_repeated_scalars_default_to_unpacked() {
        let out = generate(&[(
            "t.proto",
            "message T { repeated int32 values = 3; }",
        )]);
        // (3 << 3) | 0 == 24.
        assert!(out[0].contains("pub const VALUES_WIRE: &[u8] = &[24];"));
    }

    #[test]
    fn enums_synthesize_unknown_and_saturate() {
        let out = generate(&[(
            "e.proto",
            r#"syntax = "proto2";
            enum NoZero { FIRST = 5; SECOND = 9; }
            enum Aliased {
                option allow_alias = true;
                ZERO = 0;
                ONE = 1;
                UNO = 1;
            }"#,
        )]);
        let src = &out[0];
        assert!(src.contains("Unknown = 0,"));
        assert!(src.contains("5 => NoZero::First,"));
        assert!(src.contains("_ => NoZero::Unknown,"));
        assert!(src.contains("pub const UNO: Aliased = Aliased::One;"));
    }

    #[test]
    fn cross_file_references_use_path_imports() {
        let out = generate(&[
            (
                "a.proto",
                "syntax = \"proto3\"; package shared; enum E { FIRST = 0; }",
            ),
            (
                "b.proto",
                "syntax = \"proto3\";\nimport \"a.proto\";\nmessage M { shared.E e = 1; }",
            ),
        ]);
        let src = &out[1];
        assert!(src.contains("#[path = \"a.rs\"]"));
        assert!(src.contains("pub mod a_proto;"));
        assert!(src.contains("pub e: a_proto::E,"));
    }

    #[test]
    fn cross_directory_imports_are_relative() {
        let out = generate(&[
            (
                "common/shared.proto",
                "syntax = \"proto3\"; package shared; enum E { FIRST = 0; }",
            ),
            (
                "api/v1/svc.proto",
                "syntax = \"proto3\";\nimport \"common/shared.proto\";\nmessage M { shared.E e = 1; }",
            ),
        ]);
        assert!(out[1].contains("#[path = \"../../common/shared.rs\"]"));
    }

    #[test]
    fn nested_messages_live_in_child_modules() {
        let out = generate(&[(
            "n.proto",
            r#"syntax = "proto3";
            message Outer {
                message Inner { uint32 x = 1; }
                Inner inner = 1;
            }"#,
        )]);
        let src = &out[0];
        assert!(src.contains("pub mod outer {"));
        assert!(src.contains("pub inner: Option<outer::Inner>,"));
        assert!(src.contains(
            "pub fn get_inner(&self) -> Result<outer::InnerReader<'a>, DecodeError>"
        ));
    }

    #[test]
    fn recursive_messages_are_boxed() {
        let out = generate(&[(
            "r.proto",
            "syntax = \"proto3\"; message Node { Node next = 1; }",
        )]);
        assert!(out[0].contains("pub next: Option<Box<Node>>,"));
    }

    #[test]
    fn oneofs_become_enums() {
        let out = generate(&[(
            "o.proto",
            r#"syntax = "proto3";
            message Event {
                oneof payload {
                    string text = 1;
                    bytes blob = 2;
                }
            }"#,
        )]);
        let src = &out[0];
        assert!(src.contains("pub payload: Option<event::Payload>,"));
        assert!(src.contains("pub enum Payload {"));
        assert!(src.contains("Text(String),"));
        assert!(src.contains("Blob(Vec<u8>),"));
        assert!(src.contains("event::Payload::Text(value) =>"));
    }

    #[test]
    fn maps_use_btree_maps_and_entry_tags() {
        let out = generate(&[(
            "m.proto",
            "syntax = \"proto3\"; message M { map<string, int64> counts = 5; }",
        )]);
        let src = &out[0];
        assert!(src.contains("pub counts: ::std::collections::BTreeMap<String, i64>,"));
        assert!(src.contains("pub const COUNTS_WIRE: &[u8] = &[42];"));
        assert!(src.contains("pub const COUNTS_KEY_WIRE: &[u8] = &[10];"));
        assert!(src.contains("pub const COUNTS_VALUE_WIRE: &[u8] = &[16];"));
        assert!(src.contains("pub fn next_counts(&mut self) -> Option<(&'a str, i64)>"));
    }

    #[test]
    fn proto2_defaults_flow_into_getters() {
        let out = generate(&[(
            "d.proto",
            "message M { optional int32 x = 1 [default = 42]; optional string s = 2 [default = \"hi\"]; }",
        )]);
        let src = &out[0];
        assert!(src.contains("self.x.unwrap_or(42)"));
        assert!(src.contains("self.s.unwrap_or(\"hi\")"));
        assert!(src.contains("pub fn has_x(&self) -> bool"));
    }

    #[test]
    fn deprecated_fields_are_annotated() {
        let out = generate(&[(
            "dep.proto",
            "syntax = \"proto3\"; message M { uint32 old = 1 [deprecated = true]; }",
        )]);
        assert!(out[0].contains("#[deprecated]"));
    }
}
