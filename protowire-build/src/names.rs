//! The naming pass.
//!
//! Generated items need deterministic, collision-free Rust names, and a file
//! that references a type in another file must come up with exactly the name
//! that file's own generation chose. Names are therefore assigned in a
//! single pass over the whole resolved set, in emission order, and both the
//! defining and the referencing side read from the result.

use std::collections::HashMap;

use crate::ast::{FieldType, FileId, Message, MessageField, ProtoFile, TypeKind};
use crate::ident::{to_snake, to_snake_raw, to_upper_camel, NameSet};
use crate::resolver::FileSet;

/// The Rust names assigned to one message or enum.
#[derive(Debug)]
pub struct TypeNames {
    pub kind: TypeKind,
    /// Module segments from the generated file's root down to the scope the
    /// type lives in.
    pub mods: Vec<String>,
    pub name: String,
    /// Reader type name; empty for enums.
    pub reader: String,
    /// Name of the precomputed-tag module; empty for enums.
    pub wire_mod: String,
    /// Module holding nested types and oneof enums; empty when unneeded.
    pub child_mod: String,
    /// Oneof name → generated enum name, for messages with oneofs.
    pub oneofs: HashMap<String, String>,
}

#[derive(Debug)]
pub struct Names {
    /// Per file: fully-qualified proto name → assigned names.
    types: Vec<HashMap<String, TypeNames>>,
    /// Per file: the external files its generated source imports, in first
    /// reference order, with their module aliases.
    aliases: Vec<Vec<(FileId, String)>>,
}

impl Names {
    pub fn build(set: &FileSet) -> Names {
        let mut types = Vec::with_capacity(set.files.len());
        let mut aliases = Vec::with_capacity(set.files.len());

        for (file_id, file) in set.files.iter().enumerate() {
            let mut scope = NameSet::new();
            let mut file_types = HashMap::new();

            // Import aliases sit at the top of the file, so they claim
            // first.
            let file_aliases: Vec<(FileId, String)> = referenced_files(file, file_id)
                .into_iter()
                .map(|target| {
                    let stem = set.files[target]
                        .rel_path
                        .file_stem()
                        .map(|stem| stem.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "import".to_string());
                    let alias = scope.claim(&format!("{}_proto", to_snake_raw(&stem)));
                    (target, alias)
                })
                .collect();

            for decl in &file.enums {
                let name = scope.claim(&to_upper_camel(&decl.name));
                file_types.insert(
                    decl.fq_name.clone(),
                    TypeNames {
                        kind: TypeKind::Enum,
                        mods: Vec::new(),
                        name,
                        reader: String::new(),
                        wire_mod: String::new(),
                        child_mod: String::new(),
                        oneofs: HashMap::new(),
                    },
                );
            }
            for message in &file.messages {
                claim_message(message, &mut scope, &Vec::new(), &mut file_types);
            }

            types.push(file_types);
            aliases.push(file_aliases);
        }

        Names { types, aliases }
    }

    /// The names assigned to a resolved type.
    pub fn of(&self, file: FileId, fq_name: &str) -> &TypeNames {
        self.types[file]
            .get(fq_name)
            .unwrap_or_else(|| panic!("no names assigned for {}", fq_name))
    }

    /// The generated-import list of a file: `(target file, module alias)`.
    pub fn aliases(&self, file: FileId) -> &[(FileId, String)] {
        &self.aliases[file]
    }

    pub fn alias_for(&self, file: FileId, target: FileId) -> Option<&str> {
        self.aliases[file]
            .iter()
            .find(|(id, _)| *id == target)
            .map(|(_, alias)| alias.as_str())
    }
}

fn claim_message(
    message: &Message,
    scope: &mut NameSet,
    mods: &Vec<String>,
    out: &mut HashMap<String, TypeNames>,
) {
    let name = scope.claim(&to_upper_camel(&message.name));
    let reader = scope.claim(&format!("{}Reader", name));
    let wire_mod = scope.claim(&format!("{}_wire", to_snake_raw(&name)));

    let oneof_decls: Vec<&str> = message
        .fields
        .iter()
        .filter_map(|field| match field {
            MessageField::OneOf(oneof) => Some(oneof.name.as_str()),
            _ => None,
        })
        .collect();
    let needs_child =
        !message.messages.is_empty() || !message.enums.is_empty() || !oneof_decls.is_empty();
    let child_mod = if needs_child {
        scope.claim(&to_snake(&name))
    } else {
        String::new()
    };

    let mut oneofs = HashMap::new();
    if needs_child {
        let mut child_scope = NameSet::new();
        let child_mods: Vec<String> = mods
            .iter()
            .cloned()
            .chain(Some(child_mod.clone()))
            .collect();

        for decl in &message.enums {
            let child_name = child_scope.claim(&to_upper_camel(&decl.name));
            out.insert(
                decl.fq_name.clone(),
                TypeNames {
                    kind: TypeKind::Enum,
                    mods: child_mods.clone(),
                    name: child_name,
                    reader: String::new(),
                    wire_mod: String::new(),
                    child_mod: String::new(),
                    oneofs: HashMap::new(),
                },
            );
        }
        for nested in &message.messages {
            claim_message(nested, &mut child_scope, &child_mods, out);
        }
        for oneof in oneof_decls {
            oneofs.insert(
                oneof.to_string(),
                child_scope.claim(&to_upper_camel(oneof)),
            );
        }
    }

    out.insert(
        message.fq_name.clone(),
        TypeNames {
            kind: TypeKind::Message,
            mods: mods.clone(),
            name,
            reader,
            wire_mod,
            child_mod,
            oneofs,
        },
    );
}

/// External files referenced by resolved field types, in first-use order.
fn referenced_files(file: &ProtoFile, file_id: FileId) -> Vec<FileId> {
    let mut seen = Vec::new();

    fn visit_type(typ: &FieldType, file_id: FileId, seen: &mut Vec<FileId>) {
        if let FieldType::Named(named) = typ {
            let type_ref = named.type_ref();
            if type_ref.file != file_id && !seen.contains(&type_ref.file) {
                seen.push(type_ref.file);
            }
        }
    }

    fn visit_message(message: &Message, file_id: FileId, seen: &mut Vec<FileId>) {
        for field in &message.fields {
            match field {
                MessageField::Normal(field) => visit_type(&field.typ, file_id, seen),
                MessageField::Map(map) => visit_type(&map.value_type, file_id, seen),
                MessageField::OneOf(oneof) => {
                    for field in &oneof.fields {
                        visit_type(&field.typ, file_id, seen);
                    }
                }
            }
        }
        for nested in &message.messages {
            visit_message(nested, file_id, seen);
        }
    }

    for message in &file.messages {
        visit_message(message, file_id, &mut seen);
    }
    seen
}

/// Renders the Rust path of a generated item named `name` under module
/// chain `mods`, as seen from a module at `current` depth.
///
/// With `alias` set the item lives in another generated file: the path walks
/// to the file root (`super` per level) and enters through the alias module.
/// Without it, the shared module prefix is elided and only the diverging
/// tail is spelled out.
pub fn render_path(
    current: &[String],
    alias: Option<&str>,
    mods: &[String],
    name: &str,
) -> String {
    let mut segments: Vec<&str> = Vec::new();
    match alias {
        Some(alias) => {
            for _ in 0..current.len() {
                segments.push("super");
            }
            segments.push(alias);
            for module in mods {
                segments.push(module);
            }
        }
        None => {
            let common = current
                .iter()
                .zip(mods.iter())
                .take_while(|(a, b)| a == b)
                .count();
            for _ in common..current.len() {
                segments.push("super");
            }
            for module in &mods[common..] {
                segments.push(module);
            }
        }
    }
    segments.push(name);
    segments.join("::")
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::*;
    use crate::parser::parse_file;

    fn resolved(sources: &[(&str, &str)]) -> FileSet {
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
        set
    }

    #[test]
    fn nested_types_get_module_paths() {
        let set = resolved(&[(
            "demo.proto",
            r#"syntax = "proto3";
            package demo;
            message Outer {
                message Inner { uint32 x = 1; }
                enum Mode { MODE_A = 0; }
                Inner inner = 1;
            }"#,
        )]);
        let names = Names::build(&set);

        let outer = names.of(0, "demo.Outer");
        assert_eq!(outer.name, "Outer");
        assert_eq!(outer.reader, "OuterReader");
        assert_eq!(outer.wire_mod, "outer_wire");
        assert_eq!(outer.child_mod, "outer");

        let inner = names.of(0, "demo.Outer.Inner");
        assert_eq!(inner.mods, vec!["outer".to_string()]);
        assert_eq!(inner.name, "Inner");

        let mode = names.of(0, "demo.Outer.Mode");
        assert_eq!(mode.mods, vec!["outer".to_string()]);
        assert_eq!(mode.name, "Mode");
    }

    #[test]
    fn type_name_collisions_get_suffixes() {
        let set = resolved(&[(
            "clash.proto",
            r#"syntax = "proto3";
            message Widget {}
            message WidgetReader {}
            "#,
        )]);
        let names = Names::build(&set);

        assert_eq!(names.of(0, "Widget").name, "Widget");
        assert_eq!(names.of(0, "Widget").reader, "WidgetReader");
        // The message literally named WidgetReader is pushed aside.
        assert_eq!(names.of(0, "WidgetReader").name, "WidgetReader2");
    }

    #[test]
    fn import_aliases_are_recorded() {
        let set = resolved(&[
            (
                "common/shared.proto",
                "syntax = \"proto3\"; package shared; enum E { A = 0; }",
            ),
            (
                "api/svc.proto",
                "syntax = \"proto3\";\nimport \"common/shared.proto\";\nmessage M { shared.E e = 1; }",
            ),
        ]);
        let names = Names::build(&set);

        assert_eq!(names.aliases(1), &[(0, "shared_proto".to_string())]);
        assert_eq!(names.alias_for(1, 0), Some("shared_proto"));
        assert!(names.aliases(0).is_empty());
    }

    #[test]
    fn path_rendering() {
        let set = resolved(&[(
            "demo.proto",
            r#"syntax = "proto3";
            message Outer { message Inner { uint32 x = 1; } Inner inner = 1; }"#,
        )]);
        let names = Names::build(&set);

        let inner = names.of(0, "Outer.Inner");
        // From the file root.
        assert_eq!(render_path(&[], None, &inner.mods, &inner.name), "outer::Inner");
        // From inside `outer`.
        assert_eq!(
            render_path(&["outer".to_string()], None, &inner.mods, &inner.name),
            "Inner"
        );
        // Cross-file through an alias, seen from a nested module.
        assert_eq!(
            render_path(
                &["outer".to_string()],
                Some("shared_proto"),
                &inner.mods,
                &inner.name
            ),
            "super::shared_proto::outer::Inner"
        );
    }
}
