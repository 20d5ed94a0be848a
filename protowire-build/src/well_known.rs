//! Bundled sources for the standard `google/protobuf` well-known types.
//!
//! Imports of these canonical paths resolve against the embedded text below
//! instead of the filesystem, so schemas may depend on them without carrying
//! copies under the proto root.

/// Canonical import path to embedded `.proto` source.
pub const WELL_KNOWN_PROTOS: &[(&str, &str)] = &[
    (
        "google/protobuf/any.proto",
        include_str!("../protos/google/protobuf/any.proto"),
    ),
    (
        "google/protobuf/api.proto",
        include_str!("../protos/google/protobuf/api.proto"),
    ),
    (
        "google/protobuf/descriptor.proto",
        include_str!("../protos/google/protobuf/descriptor.proto"),
    ),
    (
        "google/protobuf/duration.proto",
        include_str!("../protos/google/protobuf/duration.proto"),
    ),
    (
        "google/protobuf/empty.proto",
        include_str!("../protos/google/protobuf/empty.proto"),
    ),
    (
        "google/protobuf/field_mask.proto",
        include_str!("../protos/google/protobuf/field_mask.proto"),
    ),
    (
        "google/protobuf/source_context.proto",
        include_str!("../protos/google/protobuf/source_context.proto"),
    ),
    (
        "google/protobuf/struct.proto",
        include_str!("../protos/google/protobuf/struct.proto"),
    ),
    (
        "google/protobuf/timestamp.proto",
        include_str!("../protos/google/protobuf/timestamp.proto"),
    ),
    (
        "google/protobuf/type.proto",
        include_str!("../protos/google/protobuf/type.proto"),
    ),
    (
        "google/protobuf/wrappers.proto",
        include_str!("../protos/google/protobuf/wrappers.proto"),
    ),
];

/// Returns the embedded source for a canonical well-known path.
pub fn lookup(path: &str) -> Option<&'static str> {
    WELL_KNOWN_PROTOS
        .iter()
        .find(|(known, _)| *known == path)
        .map(|&(_, source)| source)
}

/// Whether an import path names a bundled Google type.
pub fn is_well_known(path: &str) -> bool {
    path.starts_with("google/protobuf/")
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::parser::parse_file;

    #[test]
    fn lookup_hits_and_misses() {
        assert!(lookup("google/protobuf/timestamp.proto").is_some());
        assert!(lookup("google/protobuf/nonexistent.proto").is_none());
        assert!(is_well_known("google/protobuf/anything.proto"));
        assert!(!is_well_known("my/app.proto"));
    }

    #[test]
    fn every_bundled_proto_parses() {
        for &(path, source) in WELL_KNOWN_PROTOS {
            let file = parse_file(Path::new(path), source)
                .unwrap_or_else(|error| panic!("{} failed to parse:\n{}", path, error));
            assert_eq!(file.package.as_deref(), Some("google.protobuf"), "{}", path);
        }
    }

    #[test]
    fn descriptor_is_proto2_with_extension_ranges() {
        let source = lookup("google/protobuf/descriptor.proto").unwrap();
        let file = parse_file(Path::new("descriptor.proto"), source).unwrap();
        assert_eq!(file.syntax, crate::ast::Syntax::Proto2);
        assert!(file
            .messages
            .iter()
            .any(|message| message.name == "FieldDescriptorProto"));
    }
}
