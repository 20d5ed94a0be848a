//! In-memory schema model produced by the parser and annotated by the
//! resolver.
//!
//! Files own their messages, messages own their nested types; every
//! cross-file or cross-type relation is expressed as a [`FileId`] plus a
//! fully-qualified dotted name, never as a pointer, so the whole forest can
//! be moved and dropped as a unit.

use crate::ParseError;

/// Index of a file within the parsed [`FileSet`](crate::resolver::FileSet).
pub type FileId = usize;

/// The declared syntax edition of a file. Absent `syntax` lines mean proto2.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Syntax {
    #[default]
    Proto2,
    Proto3,
}

/// A dotted name as written in source, with a flag for the leading-dot
/// absolute form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScopedName {
    /// Dotted segments; no segment contains `.`.
    pub name: String,
    /// True when the source form began with `.`.
    pub absolute: bool,
}

impl ScopedName {
    pub fn new(name: impl Into<String>, absolute: bool) -> ScopedName {
        let name = name.into();
        debug_assert!(!name.starts_with('.'));
        ScopedName { name, absolute }
    }

    /// Qualifies this name within `parent`; absolute names ignore the parent.
    pub fn to_scope(&self, parent: &str) -> String {
        if self.absolute || parent.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", parent, self.name)
        }
    }

    /// The enclosing scope of the name, or `None` for a single segment.
    pub fn parent(&self) -> Option<&str> {
        self.name.rfind('.').map(|dot| &self.name[..dot])
    }

    /// The final segment.
    pub fn simple(&self) -> &str {
        match self.name.rfind('.') {
            Some(dot) => &self.name[dot + 1..],
            None => &self.name,
        }
    }
}

/// Whether a type reference resolved to an enum or a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeKind {
    Enum,
    Message,
}

/// A resolved type reference: the defining file and the package-qualified
/// dotted name of the definition within it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeRef {
    pub kind: TypeKind,
    pub file: FileId,
    pub fq_name: String,
}

/// An unresolved (then resolved) reference to a message or enum by name.
#[derive(Clone, Debug, PartialEq)]
pub struct NamedType {
    pub name: ScopedName,
    /// The dotted scope enclosing the use site, relative to the file's
    /// package (empty at top level). The resolver prepends the package of
    /// whichever file governs resolution.
    pub scope: String,
    /// The file whose scope governs resolution when this field was copied in
    /// by an `extend` block; `None` means the containing file.
    pub scope_file: Option<FileId>,
    pub resolved: Option<TypeRef>,
}

impl NamedType {
    pub fn new(name: ScopedName, scope: String) -> NamedType {
        NamedType {
            name,
            scope,
            scope_file: None,
            resolved: None,
        }
    }

    /// The resolved reference; panics in debug builds when resolution has not
    /// run.
    pub fn type_ref(&self) -> &TypeRef {
        self.resolved
            .as_ref()
            .expect("type reference used before resolution")
    }
}

/// The declared type of a field.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldType {
    Int32,
    Int64,
    Uint32,
    Uint64,
    Sint32,
    Sint64,
    Fixed32,
    Fixed64,
    Sfixed32,
    Sfixed64,
    Float,
    Double,
    Bool,
    String,
    Bytes,
    /// A reference to a message or enum.
    Named(NamedType),
}

impl FieldType {
    /// Parses a scalar type keyword.
    pub fn from_keyword(keyword: &str) -> Option<FieldType> {
        Some(match keyword {
            "int32" => FieldType::Int32,
            "int64" => FieldType::Int64,
            "uint32" => FieldType::Uint32,
            "uint64" => FieldType::Uint64,
            "sint32" => FieldType::Sint32,
            "sint64" => FieldType::Sint64,
            "fixed32" => FieldType::Fixed32,
            "fixed64" => FieldType::Fixed64,
            "sfixed32" => FieldType::Sfixed32,
            "sfixed64" => FieldType::Sfixed64,
            "float" => FieldType::Float,
            "double" => FieldType::Double,
            "bool" => FieldType::Bool,
            "string" => FieldType::String,
            "bytes" => FieldType::Bytes,
            _ => return None,
        })
    }

    /// True for types that may be packed when repeated: every scalar except
    /// `string` and `bytes`. Enum references also qualify, but only once
    /// resolution has established what they are; see [`is_packable`].
    ///
    /// [`is_packable`]: FieldType::is_packable
    pub fn is_packable_scalar(&self) -> bool {
        !matches!(
            self,
            FieldType::String | FieldType::Bytes | FieldType::Named(_)
        )
    }

    /// [`is_packable_scalar`](FieldType::is_packable_scalar) extended to
    /// resolved enum references, which travel as varints.
    pub fn is_packable(&self) -> bool {
        match self {
            FieldType::Named(named) => matches!(
                &named.resolved,
                Some(type_ref) if type_ref.kind == TypeKind::Enum
            ),
            other => other.is_packable_scalar(),
        }
    }

    /// True for types permitted as map keys.
    pub fn is_valid_map_key(&self) -> bool {
        matches!(
            self,
            FieldType::Int32
                | FieldType::Int64
                | FieldType::Uint32
                | FieldType::Uint64
                | FieldType::Sint32
                | FieldType::Sint64
                | FieldType::Fixed32
                | FieldType::Fixed64
                | FieldType::Sfixed32
                | FieldType::Sfixed64
                | FieldType::Bool
                | FieldType::String
        )
    }
}

/// A field rule. `Singular` is the implicit proto3 form (no presence
/// tracking); proto3 `optional` parses as `Optional`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Label {
    Optional,
    Required,
    Repeated,
    Singular,
}

/// The value of an option as written.
#[derive(Clone, Debug, PartialEq)]
pub enum OptionValue {
    Int(i64),
    Uint(u64),
    Float(f64),
    Bool(bool),
    String(String),
    /// A bare identifier, e.g. an enum value name.
    Ident(String),
    /// A braced aggregate for custom options, kept verbatim.
    Aggregate(String),
}

impl OptionValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Bool(value) => Some(*value),
            _ => None,
        }
    }
}

/// A single `option name = value`, or a `[name = value]` list entry.
/// Extension option names keep their parenthesized spelling verbatim.
#[derive(Clone, Debug, PartialEq)]
pub struct ProtoOption {
    pub name: String,
    pub value: OptionValue,
}

/// Searches an option list by name.
pub fn find_option<'a>(options: &'a [ProtoOption], name: &str) -> Option<&'a OptionValue> {
    options
        .iter()
        .find(|option| option.name == name)
        .map(|option| &option.value)
}

/// A plain (non-map) field.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalField {
    pub name: String,
    pub number: i32,
    pub typ: FieldType,
    pub label: Label,
    pub options: Vec<ProtoOption>,
}

impl NormalField {
    /// Whether a repeated occurrence of this field encodes packed: an
    /// explicit `[packed = ...]` wins, proto3 packs scalars and enums by
    /// default.
    pub fn is_packed(&self, syntax: Syntax) -> bool {
        if self.label != Label::Repeated || !self.typ.is_packable() {
            return false;
        }
        match find_option(&self.options, "packed").and_then(OptionValue::as_bool) {
            Some(explicit) => explicit,
            None => syntax == Syntax::Proto3,
        }
    }

    pub fn default_value(&self) -> Option<&OptionValue> {
        find_option(&self.options, "default")
    }

    pub fn is_deprecated(&self) -> bool {
        find_option(&self.options, "deprecated")
            .and_then(OptionValue::as_bool)
            .unwrap_or(false)
    }
}

/// A `map<K, V>` field. The key is restricted to integral, bool, and string
/// scalars; the value may be any non-map type.
#[derive(Clone, Debug, PartialEq)]
pub struct MapField {
    pub name: String,
    pub number: i32,
    pub key_type: FieldType,
    pub value_type: FieldType,
    pub options: Vec<ProtoOption>,
}

/// A `oneof` group. Members share the enclosing message's number space and
/// have no label of their own.
#[derive(Clone, Debug, PartialEq)]
pub struct OneOf {
    pub name: String,
    pub fields: Vec<NormalField>,
    pub options: Vec<ProtoOption>,
}

/// One `reserved` declaration: number ranges (inclusive) or field names.
#[derive(Clone, Debug, PartialEq)]
pub enum Reserved {
    Ranges(Vec<(i32, i32)>),
    Names(Vec<String>),
}

/// An `extend Base { ... }` block, replaced by field copies on the base
/// during resolution.
#[derive(Clone, Debug, PartialEq)]
pub struct Extend {
    pub base: ScopedName,
    /// Scope enclosing the block, for locating the base.
    pub scope: String,
    pub fields: Vec<NormalField>,
}

/// A message body item, in declaration order. Declaration order is also
/// emission order, so the categories are kept interleaved rather than
/// bucketed.
#[derive(Clone, Debug, PartialEq)]
pub enum MessageField {
    Normal(NormalField),
    Map(MapField),
    OneOf(OneOf),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Message {
    pub name: String,
    /// Package-qualified dotted name; filled during resolution.
    pub fq_name: String,
    pub fields: Vec<MessageField>,
    pub messages: Vec<Message>,
    pub enums: Vec<Enum>,
    pub extends: Vec<Extend>,
    pub reserved: Vec<Reserved>,
    pub options: Vec<ProtoOption>,
}

impl Message {
    /// Plain fields, in declaration order, including `extend` copies.
    pub fn normal_fields(&self) -> impl Iterator<Item = &NormalField> {
        self.fields.iter().filter_map(|field| match field {
            MessageField::Normal(field) => Some(field),
            _ => None,
        })
    }

    /// Every field that owns a number: plain, map, and oneof members.
    pub fn numbered_fields(&self) -> Vec<(&str, i32)> {
        let mut numbered = Vec::new();
        for field in &self.fields {
            match field {
                MessageField::Normal(field) => numbered.push((field.name.as_str(), field.number)),
                MessageField::Map(field) => numbered.push((field.name.as_str(), field.number)),
                MessageField::OneOf(oneof) => {
                    for field in &oneof.fields {
                        numbered.push((field.name.as_str(), field.number));
                    }
                }
            }
        }
        numbered
    }

    pub fn has_field_named(&self, name: &str) -> bool {
        self.numbered_fields().iter().any(|&(field, _)| field == name)
    }

    /// Whether `number` falls in a reserved range.
    pub fn is_reserved_number(&self, number: i32) -> bool {
        self.reserved.iter().any(|reserved| match reserved {
            Reserved::Ranges(ranges) => ranges
                .iter()
                .any(|&(from, to)| number >= from && number <= to),
            Reserved::Names(_) => false,
        })
    }

    /// Whether `name` is a reserved field name.
    pub fn is_reserved_name(&self, name: &str) -> bool {
        self.reserved.iter().any(|reserved| match reserved {
            Reserved::Ranges(_) => false,
            Reserved::Names(names) => names.iter().any(|reserved| reserved == name),
        })
    }
}

/// One enum value. Numbers are i32 and may repeat when `allow_alias` is set.
#[derive(Clone, Debug, PartialEq)]
pub struct EnumValue {
    pub name: String,
    pub number: i32,
    pub options: Vec<ProtoOption>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Enum {
    pub name: String,
    /// Package-qualified dotted name; filled during resolution.
    pub fq_name: String,
    pub values: Vec<EnumValue>,
    pub options: Vec<ProtoOption>,
}

impl Enum {
    pub fn allow_alias(&self) -> bool {
        find_option(&self.options, "allow_alias")
            .and_then(OptionValue::as_bool)
            .unwrap_or(false)
    }
}

/// Visibility of an import statement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ImportKind {
    #[default]
    Normal,
    /// Re-exported to this file's importers.
    Public,
    Weak,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Import {
    /// The path string as written in source.
    pub path: String,
    pub kind: ImportKind,
    /// The imported file, linked during resolution.
    pub target: Option<FileId>,
}

/// An RPC method. Recorded for completeness; generation emits nothing for
/// services.
#[derive(Clone, Debug, PartialEq)]
pub struct Method {
    pub name: String,
    pub input_type: ScopedName,
    pub output_type: ScopedName,
    pub client_streaming: bool,
    pub server_streaming: bool,
    pub options: Vec<ProtoOption>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Service {
    pub name: String,
    pub methods: Vec<Method>,
    pub options: Vec<ProtoOption>,
}

/// A parsed `.proto` file. Owns every AST node beneath it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProtoFile {
    /// Path the file was read from; the canonical `google/protobuf/...` path
    /// for bundled well-known types.
    pub path: std::path::PathBuf,
    /// Path relative to the proto root: the import-resolution key and the
    /// output-file mapping.
    pub rel_path: std::path::PathBuf,
    pub syntax: Syntax,
    pub package: Option<String>,
    pub imports: Vec<Import>,
    pub messages: Vec<Message>,
    pub enums: Vec<Enum>,
    pub extends: Vec<Extend>,
    pub services: Vec<Service>,
    pub options: Vec<ProtoOption>,
}

impl ProtoFile {
    pub fn package_scope(&self) -> &str {
        self.package.as_deref().unwrap_or("")
    }
}

/// Checks a parsed field number against the wire-format bounds.
pub fn check_field_number(number: u64) -> Result<i32, ParseError> {
    const MAX: u64 = (1 << 29) - 1;
    if number < 1 || number > MAX {
        return Err(ParseError::InvalidNumber);
    }
    Ok(number as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_name_scoping() {
        let name = ScopedName::new("Inner.Leaf", false);
        assert_eq!(name.to_scope("pkg.Outer"), "pkg.Outer.Inner.Leaf");
        assert_eq!(name.to_scope(""), "Inner.Leaf");
        assert_eq!(name.parent(), Some("Inner"));
        assert_eq!(name.simple(), "Leaf");

        let absolute = ScopedName::new("pkg.Type", true);
        assert_eq!(absolute.to_scope("elsewhere"), "pkg.Type");
    }

    #[test]
    fn packed_defaults() {
        let mut field = NormalField {
            name: "values".to_string(),
            number: 1,
            typ: FieldType::Int32,
            label: Label::Repeated,
            options: Vec::new(),
        };
        assert!(field.is_packed(Syntax::Proto3));
        assert!(!field.is_packed(Syntax::Proto2));

        field.options.push(ProtoOption {
            name: "packed".to_string(),
            value: OptionValue::Bool(true),
        });
        assert!(field.is_packed(Syntax::Proto2));

        field.typ = FieldType::String;
        assert!(!field.is_packed(Syntax::Proto3));
    }

    #[test]
    fn reserved_lookup() {
        let message = Message {
            reserved: vec![
                Reserved::Ranges(vec![(2, 4), (9, 9)]),
                Reserved::Names(vec!["legacy".to_string()]),
            ],
            ..Message::default()
        };
        assert!(message.is_reserved_number(3));
        assert!(message.is_reserved_number(9));
        assert!(!message.is_reserved_number(5));
        assert!(message.is_reserved_name("legacy"));
        assert!(!message.is_reserved_name("fresh"));
    }

    #[test]
    fn field_number_bounds() {
        assert_eq!(check_field_number(1).unwrap(), 1);
        assert_eq!(check_field_number((1 << 29) - 1).unwrap(), (1 << 29) - 1);
        check_field_number(0).unwrap_err();
        check_field_number(1 << 29).unwrap_err();
    }
}
