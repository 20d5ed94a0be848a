//! Recursive-descent parsers for `.proto` entities.
//!
//! One function per entity, composing the transactional token readers in
//! [`Lexer`]. A failed parse aborts the file; the caller renders the error
//! with the position the lexer was left at.

use std::path::Path;

use log::debug;

use crate::ast::{
    check_field_number, find_option, Enum, EnumValue, Extend, FieldType, Import, ImportKind, Label,
    MapField, Message, MessageField, Method, NamedType, NormalField, OneOf, OptionValue,
    ProtoFile, ProtoOption, Reserved, ScopedName, Service, Syntax,
};
use crate::lexer::Lexer;
use crate::{ParseError, ParseErrorWithLocation};

/// Parses one `.proto` source into a [`ProtoFile`]. `path` is only recorded
/// for error reports and output mapping.
pub fn parse_file(path: &Path, src: &str) -> Result<ProtoFile, ParseErrorWithLocation> {
    let mut parser = Parser::new(src);
    match parser.parse_proto() {
        Ok(mut file) => {
            file.path = path.to_path_buf();
            Ok(file)
        }
        Err(error) => {
            let offset = parser.lexer.pos();
            let location = parser.lexer.location_of(offset);
            Err(ParseErrorWithLocation {
                path: path.to_path_buf(),
                offset,
                line: location.line,
                col: location.col,
                line_text: location.line_text,
                error,
            })
        }
    }
}

/// Where a field declaration appears; labels are only legal in message and
/// extend bodies.
#[derive(Clone, Copy, PartialEq)]
enum FieldContext {
    Message,
    OneOf,
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    syntax: Syntax,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Parser<'a> {
        Parser {
            lexer: Lexer::new(src),
            syntax: Syntax::Proto2,
        }
    }

    fn parse_proto(&mut self) -> Result<ProtoFile, ParseError> {
        let mut file = ProtoFile::default();
        let mut first_statement = true;
        while !self.lexer.at_end()? {
            if self.lexer.try_punct(';') {
                continue;
            }
            if self.lexer.try_keyword("syntax") {
                if !first_statement {
                    return Err(ParseError::InvalidSyntax(
                        "`syntax` must be the first statement".to_string(),
                    ));
                }
                first_statement = false;
                file.syntax = self.parse_syntax_value()?;
                self.syntax = file.syntax;
                continue;
            }
            first_statement = false;

            if self.lexer.try_keyword("package") {
                if file.package.is_some() {
                    return Err(ParseError::InvalidSyntax(
                        "duplicate `package` statement".to_string(),
                    ));
                }
                let (name, absolute) = self.lexer.read_scoped_ident()?;
                if absolute {
                    return Err(ParseError::InvalidSyntax(
                        "package names may not begin with `.`".to_string(),
                    ));
                }
                self.lexer.expect_punct(';')?;
                file.package = Some(name);
            } else if self.lexer.try_keyword("import") {
                file.imports.push(self.parse_import()?);
            } else if self.lexer.try_keyword("option") {
                file.options.push(self.parse_option_statement()?);
            } else if self.lexer.try_keyword("message") {
                file.messages.push(self.parse_message("")?);
            } else if self.lexer.try_keyword("enum") {
                file.enums.push(self.parse_enum()?);
            } else if self.lexer.try_keyword("extend") {
                file.extends.push(self.parse_extend("")?);
            } else if self.lexer.try_keyword("service") {
                file.services.push(self.parse_service()?);
            } else {
                return Err(ParseError::Unexpected(
                    "a top-level declaration".to_string(),
                ));
            }
        }

        check_type_namespace(
            file.messages.iter().map(|message| message.name.as_str()),
            file.enums.iter().map(|inner| inner.name.as_str()),
        )?;
        Ok(file)
    }

    fn parse_syntax_value(&mut self) -> Result<Syntax, ParseError> {
        self.lexer.expect_punct('=')?;
        let value = self.lexer.read_string()?;
        self.lexer.expect_punct(';')?;
        match value.as_str() {
            "proto2" => Ok(Syntax::Proto2),
            "proto3" => Ok(Syntax::Proto3),
            other => Err(ParseError::InvalidSyntax(format!(
                "unknown syntax `{}`",
                other
            ))),
        }
    }

    fn parse_import(&mut self) -> Result<Import, ParseError> {
        let kind = if self.lexer.try_keyword("public") {
            ImportKind::Public
        } else if self.lexer.try_keyword("weak") {
            ImportKind::Weak
        } else {
            ImportKind::Normal
        };
        let path = self.lexer.read_string()?;
        self.lexer.expect_punct(';')?;
        Ok(Import {
            path,
            kind,
            target: None,
        })
    }

    fn parse_message(&mut self, scope: &str) -> Result<Message, ParseError> {
        let name = self.lexer.read_ident()?.to_string();
        let inner_scope = join_scope(scope, &name);
        debug!("message {}", inner_scope);
        self.lexer.expect_punct('{')?;

        let mut message = Message {
            name,
            ..Message::default()
        };
        loop {
            if self.lexer.try_punct('}') {
                break;
            }
            if self.lexer.try_punct(';') {
                continue;
            }
            if self.lexer.try_keyword("message") {
                message.messages.push(self.parse_message(&inner_scope)?);
            } else if self.lexer.try_keyword("enum") {
                message.enums.push(self.parse_enum()?);
            } else if self.lexer.try_keyword("oneof") {
                message
                    .fields
                    .push(MessageField::OneOf(self.parse_oneof(&inner_scope)?));
            } else if self.lexer.try_keyword("map") {
                message
                    .fields
                    .push(MessageField::Map(self.parse_map(&inner_scope)?));
            } else if self.lexer.try_keyword("reserved") {
                message.reserved.push(self.parse_reserved()?);
            } else if self.lexer.try_keyword("extensions") {
                self.parse_extension_ranges()?;
            } else if self.lexer.try_keyword("extend") {
                message.extends.push(self.parse_extend(&inner_scope)?);
            } else if self.lexer.try_keyword("option") {
                message.options.push(self.parse_option_statement()?);
            } else if let Some(field) = self.parse_field(&inner_scope, FieldContext::Message)? {
                message.fields.push(MessageField::Normal(field));
            }
        }

        self.check_message(&message)?;
        Ok(message)
    }

    /// Parses one field declaration. Returns `None` for legacy `group`
    /// fields, which are accepted and dropped.
    fn parse_field(
        &mut self,
        scope: &str,
        context: FieldContext,
    ) -> Result<Option<NormalField>, ParseError> {
        let label = if context == FieldContext::OneOf {
            Label::Singular
        } else if self.lexer.try_keyword("optional") {
            Label::Optional
        } else if self.lexer.try_keyword("required") {
            if self.syntax == Syntax::Proto3 {
                return Err(ParseError::InvalidSyntax(
                    "`required` is not allowed in proto3".to_string(),
                ));
            }
            Label::Required
        } else if self.lexer.try_keyword("repeated") {
            Label::Repeated
        } else if self.syntax == Syntax::Proto2 {
            return Err(ParseError::InvalidSyntax(
                "proto2 fields require an explicit `optional`, `required`, or `repeated` label"
                    .to_string(),
            ));
        } else {
            Label::Singular
        };

        if self.lexer.try_keyword("group") {
            self.skip_group()?;
            return Ok(None);
        }

        let typ = self.parse_field_type(scope)?;
        let name = self.lexer.read_ident()?.to_string();
        self.lexer.expect_punct('=')?;
        let number = check_field_number(self.lexer.read_int()?)?;
        let options = self.parse_bracket_options()?;
        self.lexer.expect_punct(';')?;

        if self.syntax == Syntax::Proto3 && find_option(&options, "default").is_some() {
            return Err(ParseError::InvalidSyntax(
                "`default` field options are not allowed in proto3".to_string(),
            ));
        }

        Ok(Some(NormalField {
            name,
            number,
            typ,
            label,
            options,
        }))
    }

    /// Accepts a legacy `group Name = N { ... }` body without modeling it.
    fn skip_group(&mut self) -> Result<(), ParseError> {
        let name = self.lexer.read_ident()?.to_string();
        self.lexer.expect_punct('=')?;
        let _ = check_field_number(self.lexer.read_int()?)?;
        self.lexer.read_balanced_braces()?;
        debug!("dropping group {}", name);
        Ok(())
    }

    fn parse_field_type(&mut self, scope: &str) -> Result<FieldType, ParseError> {
        let (name, absolute) = self.lexer.read_scoped_ident()?;
        if !absolute && !name.contains('.') {
            if let Some(scalar) = FieldType::from_keyword(&name) {
                return Ok(scalar);
            }
        }
        Ok(FieldType::Named(NamedType::new(
            ScopedName::new(name, absolute),
            scope.to_string(),
        )))
    }

    fn parse_map(&mut self, scope: &str) -> Result<MapField, ParseError> {
        self.lexer.expect_punct('<')?;
        let key_type = self.parse_field_type(scope)?;
        if !key_type.is_valid_map_key() {
            return Err(ParseError::InvalidSyntax(
                "map keys must be an integral, bool, or string type".to_string(),
            ));
        }
        self.lexer.expect_punct(',')?;
        let value_type = self.parse_field_type(scope)?;
        self.lexer.expect_punct('>')?;
        let name = self.lexer.read_ident()?.to_string();
        self.lexer.expect_punct('=')?;
        let number = check_field_number(self.lexer.read_int()?)?;
        let options = self.parse_bracket_options()?;
        self.lexer.expect_punct(';')?;
        Ok(MapField {
            name,
            number,
            key_type,
            value_type,
            options,
        })
    }

    fn parse_oneof(&mut self, scope: &str) -> Result<OneOf, ParseError> {
        let name = self.lexer.read_ident()?.to_string();
        self.lexer.expect_punct('{')?;
        let mut oneof = OneOf {
            name,
            fields: Vec::new(),
            options: Vec::new(),
        };
        loop {
            if self.lexer.try_punct('}') {
                break;
            }
            if self.lexer.try_punct(';') {
                continue;
            }
            if self.lexer.try_keyword("option") {
                oneof.options.push(self.parse_option_statement()?);
            } else if let Some(field) = self.parse_field(scope, FieldContext::OneOf)? {
                oneof.fields.push(field);
            }
        }
        Ok(oneof)
    }

    fn parse_enum(&mut self) -> Result<Enum, ParseError> {
        let name = self.lexer.read_ident()?.to_string();
        self.lexer.expect_punct('{')?;
        let mut decl = Enum {
            name,
            ..Enum::default()
        };
        loop {
            if self.lexer.try_punct('}') {
                break;
            }
            if self.lexer.try_punct(';') {
                continue;
            }
            if self.lexer.try_keyword("option") {
                decl.options.push(self.parse_option_statement()?);
            } else if self.lexer.try_keyword("reserved") {
                // Accepted for compatibility; enum reservations are not
                // modeled.
                self.parse_reserved()?;
            } else {
                let value_name = self.lexer.read_ident()?.to_string();
                self.lexer.expect_punct('=')?;
                let number = self.parse_enum_number()?;
                let options = self.parse_bracket_options()?;
                self.lexer.expect_punct(';')?;
                decl.values.push(EnumValue {
                    name: value_name,
                    number,
                    options,
                });
            }
        }

        let mut names = std::collections::HashSet::new();
        let mut numbers = std::collections::HashSet::new();
        let allow_alias = decl.allow_alias();
        for value in &decl.values {
            if !names.insert(value.name.as_str()) {
                return Err(ParseError::DuplicateIdentifier(value.name.clone()));
            }
            if !numbers.insert(value.number) && !allow_alias {
                return Err(ParseError::DuplicateFieldNumber(value.number));
            }
        }
        Ok(decl)
    }

    fn parse_enum_number(&mut self) -> Result<i32, ParseError> {
        let negative = self.lexer.try_punct('-');
        let magnitude = self.lexer.read_int()?;
        let value = if negative {
            -(i64::try_from(magnitude).map_err(|_| ParseError::InvalidNumber)?)
        } else {
            i64::try_from(magnitude).map_err(|_| ParseError::InvalidNumber)?
        };
        i32::try_from(value).map_err(|_| ParseError::InvalidNumber)
    }

    fn parse_reserved(&mut self) -> Result<Reserved, ParseError> {
        if let Ok(first) = self.lexer.read_string() {
            let mut names = vec![first];
            while self.lexer.try_punct(',') {
                names.push(self.lexer.read_string()?);
            }
            self.lexer.expect_punct(';')?;
            return Ok(Reserved::Names(names));
        }

        let mut ranges = Vec::new();
        loop {
            let from = self.parse_enum_number()?;
            let to = if self.lexer.try_keyword("to") {
                if self.lexer.try_keyword("max") {
                    protowire::encoding::MAX_TAG as i32
                } else {
                    self.parse_enum_number()?
                }
            } else {
                from
            };
            ranges.push((from, to));
            if !self.lexer.try_punct(',') {
                break;
            }
        }
        self.lexer.expect_punct(';')?;
        Ok(Reserved::Ranges(ranges))
    }

    /// Accepts proto2 `extensions` ranges without modeling them.
    fn parse_extension_ranges(&mut self) -> Result<(), ParseError> {
        loop {
            let _ = self.parse_enum_number()?;
            if self.lexer.try_keyword("to") {
                if !self.lexer.try_keyword("max") {
                    let _ = self.parse_enum_number()?;
                }
            }
            if !self.lexer.try_punct(',') {
                break;
            }
        }
        let _ = self.parse_bracket_options()?;
        self.lexer.expect_punct(';')?;
        Ok(())
    }

    fn parse_extend(&mut self, scope: &str) -> Result<Extend, ParseError> {
        let (name, absolute) = self.lexer.read_scoped_ident()?;
        self.lexer.expect_punct('{')?;
        let mut fields = Vec::new();
        loop {
            if self.lexer.try_punct('}') {
                break;
            }
            if self.lexer.try_punct(';') {
                continue;
            }
            if let Some(field) = self.parse_field(scope, FieldContext::Message)? {
                fields.push(field);
            }
        }
        Ok(Extend {
            base: ScopedName::new(name, absolute),
            scope: scope.to_string(),
            fields,
        })
    }

    fn parse_service(&mut self) -> Result<Service, ParseError> {
        let name = self.lexer.read_ident()?.to_string();
        self.lexer.expect_punct('{')?;
        let mut service = Service {
            name,
            methods: Vec::new(),
            options: Vec::new(),
        };
        loop {
            if self.lexer.try_punct('}') {
                break;
            }
            if self.lexer.try_punct(';') {
                continue;
            }
            if self.lexer.try_keyword("option") {
                service.options.push(self.parse_option_statement()?);
            } else if self.lexer.try_keyword("rpc") {
                service.methods.push(self.parse_method()?);
            } else {
                return Err(ParseError::Unexpected("`rpc` or `option`".to_string()));
            }
        }
        Ok(service)
    }

    fn parse_method(&mut self) -> Result<Method, ParseError> {
        let name = self.lexer.read_ident()?.to_string();
        self.lexer.expect_punct('(')?;
        let client_streaming = self.lexer.try_keyword("stream");
        let (input, input_absolute) = self.lexer.read_scoped_ident()?;
        self.lexer.expect_punct(')')?;
        self.lexer.expect_keyword("returns")?;
        self.lexer.expect_punct('(')?;
        let server_streaming = self.lexer.try_keyword("stream");
        let (output, output_absolute) = self.lexer.read_scoped_ident()?;
        self.lexer.expect_punct(')')?;

        let mut options = Vec::new();
        if self.lexer.try_punct('{') {
            loop {
                if self.lexer.try_punct('}') {
                    break;
                }
                if self.lexer.try_punct(';') {
                    continue;
                }
                self.lexer.expect_keyword("option")?;
                options.push(self.parse_option_statement()?);
            }
        } else {
            self.lexer.expect_punct(';')?;
        }

        Ok(Method {
            name,
            input_type: ScopedName::new(input, input_absolute),
            output_type: ScopedName::new(output, output_absolute),
            client_streaming,
            server_streaming,
            options,
        })
    }

    /// Parses the remainder of an `option name = value;` statement.
    fn parse_option_statement(&mut self) -> Result<ProtoOption, ParseError> {
        let option = self.parse_option_entry()?;
        self.lexer.expect_punct(';')?;
        Ok(option)
    }

    /// Parses `name = value`, shared by option statements and `[...]` lists.
    fn parse_option_entry(&mut self) -> Result<ProtoOption, ParseError> {
        let name = self.parse_option_name()?;
        self.lexer.expect_punct('=')?;
        let value = self.parse_constant()?;
        Ok(ProtoOption { name, value })
    }

    /// Option names may mix plain components with parenthesized extension
    /// components; the spelling is preserved verbatim.
    fn parse_option_name(&mut self) -> Result<String, ParseError> {
        let mut name = String::new();
        loop {
            if self.lexer.try_punct('(') {
                let (inner, absolute) = self.lexer.read_scoped_ident()?;
                self.lexer.expect_punct(')')?;
                name.push('(');
                if absolute {
                    name.push('.');
                }
                name.push_str(&inner);
                name.push(')');
            } else {
                name.push_str(self.lexer.read_ident()?);
            }
            if !self.lexer.try_punct('.') {
                return Ok(name);
            }
            name.push('.');
        }
    }

    fn parse_bracket_options(&mut self) -> Result<Vec<ProtoOption>, ParseError> {
        let mut options = Vec::new();
        if !self.lexer.try_punct('[') {
            return Ok(options);
        }
        loop {
            options.push(self.parse_option_entry()?);
            if !self.lexer.try_punct(',') {
                break;
            }
        }
        self.lexer.expect_punct(']')?;
        Ok(options)
    }

    fn parse_constant(&mut self) -> Result<OptionValue, ParseError> {
        if let Ok(aggregate) = self.lexer.read_balanced_braces() {
            return Ok(OptionValue::Aggregate(aggregate.to_string()));
        }
        if let Ok(value) = self.lexer.read_string() {
            return Ok(OptionValue::String(value));
        }
        if let Ok(value) = self.lexer.read_bool() {
            return Ok(OptionValue::Bool(value));
        }
        if let Ok(ident) = self.lexer.read_ident() {
            return Ok(OptionValue::Ident(ident.to_string()));
        }

        let negative = self.lexer.try_punct('-');
        if let Ok(value) = self.lexer.read_float() {
            return Ok(OptionValue::Float(if negative { -value } else { value }));
        }
        let magnitude = self.lexer.read_int()?;
        if negative {
            let value = i64::try_from(magnitude)
                .map(|v| -v)
                .map_err(|_| ParseError::InvalidNumber)?;
            Ok(OptionValue::Int(value))
        } else if let Ok(value) = i64::try_from(magnitude) {
            Ok(OptionValue::Int(value))
        } else {
            Ok(OptionValue::Uint(magnitude))
        }
    }

    /// Message-level checks that need the whole body: number and name
    /// uniqueness across plain, map, and oneof fields, reserved
    /// declarations, and the nested type namespace.
    fn check_message(&self, message: &Message) -> Result<(), ParseError> {
        let mut numbers = std::collections::HashSet::new();
        let mut names = std::collections::HashSet::new();
        for (name, number) in message.numbered_fields() {
            if !numbers.insert(number) {
                return Err(ParseError::DuplicateFieldNumber(number));
            }
            if !names.insert(name.to_string()) {
                return Err(ParseError::DuplicateIdentifier(name.to_string()));
            }
            if message.is_reserved_number(number) || message.is_reserved_name(name) {
                return Err(ParseError::ReservedName(name.to_string()));
            }
        }

        check_type_namespace(
            message.messages.iter().map(|nested| nested.name.as_str()),
            message.enums.iter().map(|nested| nested.name.as_str()),
        )
    }
}

fn join_scope(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", scope, name)
    }
}

/// Messages and enums share one type namespace per scope.
fn check_type_namespace<'n>(
    messages: impl Iterator<Item = &'n str>,
    enums: impl Iterator<Item = &'n str>,
) -> Result<(), ParseError> {
    let mut seen = std::collections::HashSet::new();
    for name in messages.chain(enums) {
        if !seen.insert(name) {
            return Err(ParseError::DuplicateIdentifier(name.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn parse(src: &str) -> ProtoFile {
        parse_file(Path::new("test.proto"), src).expect("parse failed")
    }

    fn parse_err(src: &str) -> ParseError {
        parse_file(Path::new("test.proto"), src)
            .expect_err("parse succeeded")
            .error
    }

    #[test]
    fn empty_file_defaults_to_proto2() {
        let file = parse("// nothing here\n");
        assert_eq!(file.syntax, Syntax::Proto2);
        assert_eq!(file.package, None);
    }

    #[test]
    fn syntax_and_package() {
        let file = parse("syntax = \"proto3\";\npackage demo.v1;\n");
        assert_eq!(file.syntax, Syntax::Proto3);
        assert_eq!(file.package.as_deref(), Some("demo.v1"));
    }

    #[test]
    fn syntax_must_lead() {
        assert_eq!(
            parse_err("package p; syntax = \"proto3\";"),
            ParseError::InvalidSyntax("`syntax` must be the first statement".to_string()),
        );
    }

    #[test]
    fn imports() {
        let file = parse(
            "import \"a.proto\";\nimport public \"b.proto\";\nimport weak \"c.proto\";\n",
        );
        assert_eq!(file.imports.len(), 3);
        assert_eq!(file.imports[0].kind, ImportKind::Normal);
        assert_eq!(file.imports[1].kind, ImportKind::Public);
        assert_eq!(file.imports[1].path, "b.proto");
        assert_eq!(file.imports[2].kind, ImportKind::Weak);
    }

    #[test]
    fn proto3_message_fields() {
        let file = parse(
            r#"syntax = "proto3";
            message User {
                string name = 1;
                uint64 id = 2;
                optional bool verified = 3;
                repeated string tags = 10;
            }"#,
        );
        let message = &file.messages[0];
        assert_eq!(message.name, "User");
        let fields: Vec<_> = message.normal_fields().collect();
        assert_eq!(fields.len(), 4);
        assert_eq!(fields[0].label, Label::Singular);
        assert_eq!(fields[0].typ, FieldType::String);
        assert_eq!(fields[1].number, 2);
        assert_eq!(fields[2].label, Label::Optional);
        assert_eq!(fields[3].label, Label::Repeated);
    }

    #[test]
    fn proto2_requires_labels() {
        assert_eq!(
            parse_err("message M { int32 x = 1; }"),
            ParseError::InvalidSyntax(
                "proto2 fields require an explicit `optional`, `required`, or `repeated` label"
                    .to_string()
            ),
        );
    }

    #[test]
    fn proto3_rejects_required() {
        let error = parse_err("syntax = \"proto3\"; message M { required int32 x = 1; }");
        assert_eq!(
            error,
            ParseError::InvalidSyntax("`required` is not allowed in proto3".to_string()),
        );
    }

    #[test]
    fn proto3_rejects_default() {
        let error = parse_err("syntax = \"proto3\"; message M { int32 x = 1 [default = 4]; }");
        assert_eq!(
            error,
            ParseError::InvalidSyntax("`default` field options are not allowed in proto3".to_string()),
        );
    }

    #[test]
    fn proto2_default_and_options() {
        let file = parse(
            r#"message M {
                optional int32 x = 1 [default = 42, deprecated = true];
                optional string s = 2 [default = "hi", json_name = "sOverride"];
            }"#,
        );
        let fields: Vec<_> = file.messages[0].normal_fields().collect();
        assert_eq!(
            fields[0].default_value(),
            Some(&OptionValue::Int(42)),
        );
        assert!(fields[0].is_deprecated());
        assert_eq!(
            fields[1].default_value(),
            Some(&OptionValue::String("hi".to_string())),
        );
    }

    #[test]
    fn named_types_record_scope() {
        let file = parse(
            r#"syntax = "proto3";
            message Outer {
                message Inner { Color c = 1; }
                .abs.Type t = 1;
            }"#,
        );
        let outer = &file.messages[0];
        let inner = &outer.messages[0];
        match &inner.normal_fields().next().unwrap().typ {
            FieldType::Named(named) => {
                assert_eq!(named.scope, "Outer.Inner");
                assert!(!named.name.absolute);
            }
            other => panic!("unexpected type {:?}", other),
        }
        match &outer.normal_fields().next().unwrap().typ {
            FieldType::Named(named) => {
                assert!(named.name.absolute);
                assert_eq!(named.name.name, "abs.Type");
            }
            other => panic!("unexpected type {:?}", other),
        };
    }

    #[test]
    fn oneofs() {
        let file = parse(
            r#"syntax = "proto3";
            message Event {
                oneof payload {
                    string text = 1;
                    bytes blob = 2;
                }
                uint32 seq = 3;
            }"#,
        );
        let message = &file.messages[0];
        match &message.fields[0] {
            MessageField::OneOf(oneof) => {
                assert_eq!(oneof.name, "payload");
                assert_eq!(oneof.fields.len(), 2);
                assert_eq!(oneof.fields[1].number, 2);
            }
            other => panic!("unexpected field {:?}", other),
        }
    }

    #[test]
    fn maps() {
        let file = parse(
            "syntax = \"proto3\"; message M { map<string, int64> counts = 1; }",
        );
        match &file.messages[0].fields[0] {
            MessageField::Map(map) => {
                assert_eq!(map.key_type, FieldType::String);
                assert_eq!(map.value_type, FieldType::Int64);
            }
            other => panic!("unexpected field {:?}", other),
        }
    }

    #[test]
    fn map_keys_are_restricted() {
        assert_eq!(
            parse_err("syntax = \"proto3\"; message M { map<float, int32> m = 1; }"),
            ParseError::InvalidSyntax(
                "map keys must be an integral, bool, or string type".to_string()
            ),
        );
    }

    #[test]
    fn enums_and_aliases() {
        let file = parse(
            r#"syntax = "proto3";
            enum Status {
                option allow_alias = true;
                STATUS_UNKNOWN = 0;
                STATUS_OK = 1;
                STATUS_FINE = 1;
            }"#,
        );
        let decl = &file.enums[0];
        assert_eq!(decl.values.len(), 3);
        assert_eq!(decl.values[2].number, 1);
    }

    #[test]
    fn enum_duplicate_number_without_alias() {
        assert_eq!(
            parse_err("enum E { A = 0; B = 0; }"),
            ParseError::DuplicateFieldNumber(0),
        );
    }

    #[test]
    fn negative_enum_values() {
        let file = parse("enum E { NEGATIVE = -3; ZERO = 0; }");
        assert_eq!(file.enums[0].values[0].number, -3);
    }

    #[test]
    fn duplicate_field_numbers_span_oneofs() {
        assert_eq!(
            parse_err(
                "syntax = \"proto3\";
                message M { uint32 a = 1; oneof o { uint32 b = 1; } }"
            ),
            ParseError::DuplicateFieldNumber(1),
        );
    }

    #[test]
    fn reserved_numbers_and_names() {
        let file = parse(
            r#"message M {
                reserved 2, 15, 9 to 11, 40 to max;
                reserved "legacy", "old";
                optional uint32 ok = 1;
            }"#,
        );
        let message = &file.messages[0];
        assert!(message.is_reserved_number(10));
        assert!(message.is_reserved_number(1 << 28));
        assert!(message.is_reserved_name("legacy"));
    }

    #[test]
    fn reserved_number_rejects_field() {
        assert_eq!(
            parse_err("message M { reserved 5; optional uint32 x = 5; }"),
            ParseError::ReservedName("x".to_string()),
        );
    }

    #[test]
    fn reserved_name_rejects_field() {
        assert_eq!(
            parse_err("message M { reserved \"x\"; optional uint32 x = 9; }"),
            ParseError::ReservedName("x".to_string()),
        );
    }

    #[test]
    fn duplicate_nested_type_names() {
        assert_eq!(
            parse_err("message M { message T {} enum T { A = 0; } }"),
            ParseError::DuplicateIdentifier("T".to_string()),
        );
    }

    #[test]
    fn extends() {
        let file = parse(
            r#"message Base { optional uint32 id = 1; }
            extend Base { optional string note = 100; }
            message Wrapper {
                extend Base { optional bool flag = 101; }
            }"#,
        );
        assert_eq!(file.extends.len(), 1);
        assert_eq!(file.extends[0].base.name, "Base");
        assert_eq!(file.extends[0].fields[0].number, 100);
        let nested = &file.messages[1].extends[0];
        assert_eq!(nested.scope, "Wrapper");
        assert_eq!(nested.fields[0].number, 101);
    }

    #[test]
    fn groups_are_accepted_and_dropped() {
        let file = parse(
            r#"message M {
                optional group Result = 1 {
                    optional string url = 2;
                }
                optional uint32 after = 3;
            }"#,
        );
        let fields: Vec<_> = file.messages[0].normal_fields().collect();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].name, "after");
    }

    #[test]
    fn extension_ranges_are_accepted() {
        let file = parse("message M { extensions 100 to 199; extensions 500 to max; }");
        assert!(file.messages[0].fields.is_empty());
    }

    #[test]
    fn services_are_recorded() {
        let file = parse(
            r#"syntax = "proto3";
            message Ping {} message Pong {}
            service Echo {
                rpc Call (Ping) returns (stream Pong);
                rpc Other (stream Ping) returns (Pong) {
                    option deadline = 7.5;
                }
            }"#,
        );
        let service = &file.services[0];
        assert_eq!(service.name, "Echo");
        assert_eq!(service.methods.len(), 2);
        assert!(service.methods[0].server_streaming);
        assert!(service.methods[1].client_streaming);
        assert_eq!(
            service.methods[1].options[0].value,
            OptionValue::Float(7.5),
        );
    }

    #[test]
    fn custom_and_aggregate_options() {
        let file = parse(
            r#"option java_package = "com.example";
            option (custom.marker) = FAST;
            option (extra).detail = { key: "v" nested { x: 1 } };"#,
        );
        assert_eq!(file.options[0].name, "java_package");
        assert_eq!(
            file.options[1].value,
            OptionValue::Ident("FAST".to_string()),
        );
        assert_eq!(file.options[2].name, "(extra).detail");
        match &file.options[2].value {
            OptionValue::Aggregate(text) => assert!(text.contains("nested")),
            other => panic!("unexpected value {:?}", other),
        }
    }

    #[test]
    fn error_positions_point_into_the_failing_token() {
        let error = parse_file(
            Path::new("broken.proto"),
            "syntax = \"proto3\";\nmessage M { string name == 1; }\n",
        )
        .expect_err("parse succeeded");
        // The second `=` is where the field number should be.
        assert_eq!(error.line, 2);
        assert_eq!(error.error, ParseError::UnknownToken);
        assert_eq!(error.line_text.as_bytes()[error.col - 1], b'=');
    }

    #[test]
    fn negative_numbers_in_options() {
        let file = parse("message M { optional sint32 t = 1 [default = -40]; }");
        let field = file.messages[0].normal_fields().next().unwrap();
        assert_eq!(field.default_value(), Some(&OptionValue::Int(-40)));
    }
}
