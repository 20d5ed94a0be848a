//! Output-path mapping and relative import computation.

use std::path::{Component, Path, PathBuf};

use crate::Error;

/// Maps a root-relative `.proto` path to its root-relative `.rs` output
/// path, preserving directories.
pub fn output_rel_path(rel_proto: &Path) -> PathBuf {
    rel_proto.with_extension("rs")
}

/// Computes the path of `to_file` relative to `from_dir`, for `#[path]`
/// imports between generated files. Both arguments must be relative to the
/// same output root (or both absolute with a shared prefix); mixing forms
/// has no answer and is an error.
pub fn relative_import(from_dir: &Path, to_file: &Path) -> Result<PathBuf, Error> {
    if from_dir.is_absolute() != to_file.is_absolute() {
        return Err(Error::NoCommonRoot {
            from: from_dir.to_path_buf(),
            to: to_file.to_path_buf(),
        });
    }

    let mut from: Vec<Component> = from_dir.components().collect();
    let mut to: Vec<Component> = to_file.components().collect();

    // On absolute paths the prefix/root components must agree before any
    // relative walk makes sense.
    if from_dir.is_absolute() {
        let shares_root = matches!(
            (from.first(), to.first()),
            (Some(a), Some(b)) if a == b
        );
        if !shares_root {
            return Err(Error::NoCommonRoot {
                from: from_dir.to_path_buf(),
                to: to_file.to_path_buf(),
            });
        }
    }

    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();
    from.drain(..common);
    to.drain(..common);

    let mut relative = PathBuf::new();
    for _ in &from {
        relative.push("..");
    }
    for component in to {
        relative.push(component.as_os_str());
    }
    Ok(relative)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proto_to_rs() {
        assert_eq!(
            output_rel_path(Path::new("models/user.proto")),
            PathBuf::from("models/user.rs")
        );
        assert_eq!(output_rel_path(Path::new("a.proto")), PathBuf::from("a.rs"));
    }

    #[test]
    fn same_directory_is_basename() {
        assert_eq!(
            relative_import(Path::new("models"), Path::new("models/user.rs")).unwrap(),
            PathBuf::from("user.rs")
        );
        assert_eq!(
            relative_import(Path::new(""), Path::new("user.rs")).unwrap(),
            PathBuf::from("user.rs")
        );
    }

    #[test]
    fn cross_directory_walks_up() {
        assert_eq!(
            relative_import(Path::new("api/v1"), Path::new("common/types.rs")).unwrap(),
            PathBuf::from("../../common/types.rs")
        );
        assert_eq!(
            relative_import(Path::new("api"), Path::new("api/v2/next.rs")).unwrap(),
            PathBuf::from("v2/next.rs")
        );
    }

    #[test]
    fn mixed_absolute_and_relative_is_an_error() {
        match relative_import(Path::new("/abs/out"), Path::new("rel.rs")) {
            Err(Error::NoCommonRoot { .. }) => {}
            other => panic!("unexpected result {:?}", other.map(|p| p.display().to_string())),
        }
    }
}
