#![doc(html_root_url = "https://docs.rs/protowire-build/0.1.0")]

//! `protowire-build` compiles `.proto` schemas into Rust, with no `protoc`
//! anywhere in the loop.
//!
//! The crate carries its own recursive-descent schema parser, a cross-file
//! resolver (imports, public re-exports, bundled `google/protobuf` well-known
//! types, `extend` application), and a code generator. For every input file
//! it emits one Rust source containing, per message, a single-allocation
//! writer and a zero-allocation lazy reader built on the [`protowire`]
//! runtime crate.
//!
//! ## Example
//!
//! Generate bindings from a `build.rs` script:
//!
//! ```rust,no_run
//! fn main() {
//!     protowire_build::generate("protos", "src/generated").unwrap();
//! }
//! ```
//!
//! Every `.proto` under `protos/` becomes a `.rs` file under
//! `src/generated/` with the same relative path; files referencing each
//! other import each other with relative `#[path]` modules, so the output
//! tree is position-independent.
//!
//! Ignore masks skip inputs by root-relative glob:
//!
//! ```rust,no_run
//! protowire_build::Config::new()
//!     .ignore(["vendor/**", "**/*_draft.proto"])
//!     .generate("protos", "src/generated")
//!     .unwrap();
//! ```

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use walkdir::WalkDir;

mod ast;
mod code_generator;
mod code_writer;
mod error;
mod ident;
mod lexer;
mod message_graph;
mod names;
mod parser;
mod path;
mod resolver;
mod well_known;

pub use crate::error::{Error, ParseError, ParseErrorWithLocation, ResolveError};

use crate::message_graph::MessageGraph;
use crate::names::Names;
use crate::resolver::{path_key, FileSet};

/// Compiles every `.proto` under `proto_root` into `out`, with default
/// options.
///
/// Equivalent to `Config::new().generate(proto_root, out)`.
pub fn generate(proto_root: impl AsRef<Path>, out: impl AsRef<Path>) -> Result<(), Error> {
    Config::new().generate(proto_root, out)
}

/// Configuration options for schema compilation.
#[derive(Debug, Default)]
pub struct Config {
    ignores: Vec<String>,
}

impl Config {
    /// Creates a configuration with default options.
    pub fn new() -> Config {
        Config::default()
    }

    /// Adds glob masks matched against root-relative input paths; matching
    /// files are skipped during discovery.
    pub fn ignore<I, S>(&mut self, masks: I) -> &mut Config
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ignores
            .extend(masks.into_iter().map(|mask| mask.as_ref().to_string()));
        self
    }

    /// Discovers, parses, resolves, and generates.
    ///
    /// Parse errors are collected across all inputs and reported together;
    /// resolution and generation errors abort immediately. On a fatal error
    /// the output directory may be left partially written.
    pub fn generate(
        &self,
        proto_root: impl AsRef<Path>,
        out: impl AsRef<Path>,
    ) -> Result<(), Error> {
        let proto_root = proto_root.as_ref();
        let out = out.as_ref();
        if !proto_root.is_dir() {
            return Err(Error::CannotFindRoot(proto_root.to_path_buf()));
        }

        let masks = self
            .ignores
            .iter()
            .map(|mask| glob::Pattern::new(mask))
            .collect::<Result<Vec<_>, _>>()?;

        let mut inputs: Vec<PathBuf> = Vec::new();
        for entry in WalkDir::new(proto_root).sort_by_file_name() {
            let entry = entry.map_err(|error| Error::Io(error.into()))?;
            if !entry.file_type().is_file()
                || entry.path().extension() != Some(OsStr::new("proto"))
            {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(proto_root)
                .expect("walked entries live under the root")
                .to_path_buf();
            if masks.iter().any(|mask| mask.matches(&path_key(&rel))) {
                debug!("ignoring {}", rel.display());
                continue;
            }
            inputs.push(rel);
        }

        let mut files = Vec::new();
        let mut parse_errors = Vec::new();
        for rel in inputs {
            let full = proto_root.join(&rel);
            let source = fs::read_to_string(&full)?;
            match parser::parse_file(&full, &source) {
                Ok(mut file) => {
                    file.rel_path = rel;
                    files.push(file);
                }
                // Keep parsing the remaining files so one report covers
                // everything.
                Err(error) => parse_errors.push(error),
            }
        }
        if !parse_errors.is_empty() {
            return Err(Error::Parse(parse_errors));
        }

        let mut set = FileSet::new(files);
        set.resolve()?;

        let names = Names::build(&set);
        let graph = MessageGraph::new(&set.files);

        // Bundled well-known files absorbed during resolution are generated
        // too: importers reference their output by relative path.
        for file_id in 0..set.files.len() {
            let source = code_generator::generate_file(&set, &names, &graph, file_id)?;
            let out_path = out.join(path::output_rel_path(&set.files[file_id].rel_path));
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&out_path, source)?;
        }
        info!("generated {} files into {}", set.files.len(), out.display());
        Ok(())
    }
}
